use std::fmt::Display;
use std::io::Write;

use anyhow::Result;

use crate::pipeline::Event;

/// Writes one line per event and gives up on the first error.
pub struct PrintSink<W>(W);

impl<W: Write> PrintSink<W> {
    pub fn new(out: W) -> Self {
        Self(out)
    }

    pub fn drain<T, I>(&mut self, events: I) -> Result<usize>
    where
        T: Display,
        I: Iterator<Item = Event<T>>,
    {
        let mut lines = 0;
        for (_, res) in events {
            writeln!(self.0, "{}", res?)?;
            lines += 1;
        }
        self.0.flush()?;
        Ok(lines)
    }
}
