use std::fs::File;
use std::io::BufReader;

use anyhow::{Context, Result};
use clap::{App, Arg, ArgMatches};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};

mod error;
mod logger;
mod pipeline;
mod sink;
mod source;
mod usb;

use error::ScanError;
use sink::PrintSink;
use source::ElementParser;
use usb::iso::IsoScannerExt;

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }

    let progress_bar = ProgressBar::new(len);
    progress_bar.set_style(
        ProgressStyle::default_bar()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .progress_chars("=> ")
            .template(" {spinner} {msg} [{bar:40}] {bytes}/{total_bytes}"),
    );
    progress_bar.set_message("Scanning packets");
    progress_bar
}

fn open(path: &str) -> Result<File, ScanError> {
    File::open(path).map_err(|source| ScanError::FileAccess {
        path: path.to_owned(),
        source,
    })
}

fn run(matches: &ArgMatches<'_>) -> Result<()> {
    let path = matches.value_of("file").context("Fetching file argument")?;
    let verbosity = matches.occurrences_of("verbose");
    logger::init(verbosity)?;

    let file = open(path)?;
    let len = file.metadata().map(|meta| meta.len()).unwrap_or(0);

    // log lines would tear through the bar
    let progress_bar = progress_bar(len, verbosity == 0 && console::Term::stderr().is_term());
    let input = BufReader::new(progress_bar.wrap_read(file));

    let stdout = std::io::stdout();
    let res = PrintSink::new(stdout.lock()).drain(ElementParser::new(input).into_iso_summaries());
    progress_bar.finish_and_clear();

    let lines = res.with_context(|| format!("Scanning {}", path))?;
    log::debug!("{} line(s) printed", lines);
    Ok(())
}

fn main() {
    let matches = App::new("pdml-iso-scan")
        .version(clap::crate_version!())
        .about("Summarizes isochronous usb transfers found in a PDML capture export.")
        .arg(
            Arg::with_name("file")
                .help("PDML file exported from the capture.")
                .required(true),
        )
        .arg(Arg::from_usage(
            "-v, --verbose... 'print scanner state changes to stderr (twice for every element).'",
        ))
        .get_matches();

    if let Err(e) = run(&matches) {
        eprintln!("{}: {:?}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}
