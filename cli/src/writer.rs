//! Output writer wrapper for seekzip.
//!
//! Thin wrapper around the decompression target (a file or stdout) providing
//! an explicit `finish()` method for flushing on a clean exit.

use std::io::{self, Write};

/// Wrapper around an output writer.
pub struct OutputWriter(Box<dyn Write>);

impl OutputWriter {
    pub fn new(writer: Box<dyn Write>) -> io::Result<Self> {
        Ok(OutputWriter(writer))
    }

    /// Flushes and finalizes the output.
    pub fn finish(mut self) -> io::Result<()> {
        self.0.flush()?;
        Ok(())
    }
}

impl Write for OutputWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}
