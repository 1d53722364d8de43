use std::fmt;

use anyhow::Context;
use itertools::Itertools;
use log::{debug, trace};

use crate::error::ScanError;
use crate::pipeline::Event;
use crate::source::{Attributes, Element};

/// Bytes per audio frame on the out endpoint: 24 bit samples on 4 channels.
pub const FRAME_SIZE: u64 = 3 * 4;

const ENDPOINT_NUMBER: &str = "usb.endpoint_number";
const ISO_DATA: &str = "usb.iso.data";
const ISO_DATA_LEN: &str = "usb.win32.iso_data_len";

const IN_ENDPOINT: &str = "0x81";
const OUT_ENDPOINT: &str = "0x02";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Idle,
    AwaitInData,
    CollectOutLengths,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Summary {
    /// Raw `show` value of the first isochronous data field after the in endpoint.
    In(String),
    /// Isochronous data lengths sent to the out endpoint, in capture order.
    Out(Vec<u64>),
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Summary::In(data) => write!(f, "In: {}", data),
            Summary::Out(lengths) => {
                // distinct lengths are listed in the order they were first seen
                let counts = lengths.iter().counts();
                write!(
                    f,
                    "Out: {{{}}}",
                    lengths
                        .iter()
                        .unique()
                        .map(|len| format!("{}: {}", len, counts[&len]))
                        .join(", ")
                )?;
                lengths
                    .iter()
                    .try_for_each(|len| write!(f, "{} ", len / FRAME_SIZE))
            }
        }
    }
}

/// Hexadecimal length as shown by the dissector, with or without its `0x`
/// prefix. A leading `+` is accepted; negative or wider than 64 bit values are
/// rejected.
pub fn parse_length(value: &str) -> Result<u64, ScanError> {
    let trimmed = value.trim();
    let trimmed = trimmed.strip_prefix('+').unwrap_or(trimmed);
    let digits = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    u64::from_str_radix(digits, 16).map_err(|source| ScanError::Format {
        value: value.to_owned(),
        source,
    })
}

/// What is known about the packet currently being read. Nothing survives the
/// packet's end tag.
#[derive(Debug, Default)]
pub struct PacketState {
    mode: Mode,
    lengths: Vec<u64>,
}

impl PacketState {
    fn transition(&mut self, mode: Mode) {
        debug!("{:?} -> {:?}", self.mode, mode);
        self.mode = mode;
    }

    pub fn on_element_start(
        &mut self,
        tag: &str,
        attributes: &Attributes,
    ) -> Result<Option<Summary>, ScanError> {
        if tag != "field" || self.mode == Mode::Done {
            return Ok(None);
        }

        let name = attributes.require(tag, "name")?;
        match (self.mode, name) {
            (Mode::Idle, ENDPOINT_NUMBER) => match attributes.require(tag, "show")? {
                IN_ENDPOINT => self.transition(Mode::AwaitInData),
                OUT_ENDPOINT => self.transition(Mode::CollectOutLengths),
                _ => {}
            },
            (Mode::AwaitInData, ISO_DATA) => {
                let data = attributes.require(tag, "show")?.to_owned();
                self.transition(Mode::Done);
                return Ok(Some(Summary::In(data)));
            }
            (Mode::CollectOutLengths, ISO_DATA_LEN) => {
                let len = parse_length(attributes.require(tag, "show")?)?;
                trace!("iso data length {}", len);
                self.lengths.push(len);
            }
            _ => {}
        }
        Ok(None)
    }

    pub fn on_element_end(&mut self, tag: &str) -> Option<Summary> {
        if tag != "packet" {
            return None;
        }

        let lengths = std::mem::take(&mut self.lengths);
        debug!("end of packet, {} length(s) collected", lengths.len());
        self.mode = Mode::Idle;
        if lengths.is_empty() {
            None
        } else {
            Some(Summary::Out(lengths))
        }
    }
}

pub struct IsoScanner<T> {
    it: T,
    state: PacketState,
    stopped: bool,
}

impl<T> Iterator for IsoScanner<T>
where
    T: Iterator<Item = Event<Element>>,
{
    type Item = Event<Summary>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }

        let out = loop {
            let (pos, element) = match self.it.next()? {
                (pos, Ok(element)) => (pos, element),
                (pos, Err(e)) => {
                    self.stopped = true;
                    return Some((pos, Err(e)));
                }
            };
            trace!("{}: {:?}", pos, element);

            let res = match element {
                Element::Start { name, attributes } => self
                    .state
                    .on_element_start(&name, &attributes)
                    .with_context(|| format!("Scanning <{}> before byte {}", name, pos)),
                Element::End { name } => Ok(self.state.on_element_end(&name)),
            };
            match res {
                Ok(Some(summary)) => break (pos, Ok(summary)),
                Ok(None) => {}
                Err(e) => {
                    self.stopped = true;
                    break (pos, Err(e));
                }
            }
        };
        Some(out)
    }
}

impl<T> IsoScanner<T> {
    pub fn new(input: T) -> Self {
        Self {
            it: input,
            state: PacketState::default(),
            stopped: false,
        }
    }
}

pub trait IsoScannerExt: Sized {
    fn into_iso_summaries(self) -> IsoScanner<Self> {
        IsoScanner::new(self)
    }
}
impl<T> IsoScannerExt for T where T: Iterator<Item = Event<Element>> {}
