use std::io::{self, prelude::*, BufWriter};

use crate::spectrum::{ScanRange, SpectrumBlock};

/// Format a CDTA title line in the `Dataset.StartScan.EndScan.Charge`
/// convention, padded with the customary `=` decoration.
pub fn format_title(dataset: &str, scans: ScanRange, charge: i32) -> String {
    format!(
        "=================================== \"{}.{}.{}.{}.dta\" ===================================",
        dataset, scans.start, scans.end, charge
    )
}

/// A writer for CDTA-convention spectrum files.
///
/// Blocks are separated by a single blank line, mirroring the layout the
/// [`CDTAReader`](crate::io::cdta::CDTAReader) consumes.
pub struct CDTAWriter<W: io::Write> {
    pub handle: io::BufWriter<W>,
    blocks_written: usize,
}

impl<W: io::Write> CDTAWriter<W> {
    pub fn new(file: W) -> CDTAWriter<W> {
        let handle = io::BufWriter::with_capacity(500, file);
        CDTAWriter {
            handle,
            blocks_written: 0,
        }
    }

    /// The number of spectrum blocks written so far
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    /// Write one spectrum block from its constituent lines. `peak_text` is
    /// copied verbatim, save for a final newline added when missing.
    pub fn write_parts(
        &mut self,
        title_line: &str,
        parent_ion_line: &str,
        peak_text: &str,
    ) -> io::Result<()> {
        self.handle.write_all(b"\n")?;
        self.handle.write_all(title_line.as_bytes())?;
        self.handle.write_all(b"\n")?;
        self.handle.write_all(parent_ion_line.as_bytes())?;
        self.handle.write_all(b"\n")?;
        self.handle.write_all(peak_text.as_bytes())?;
        if !peak_text.ends_with('\n') {
            self.handle.write_all(b"\n")?;
        }
        self.blocks_written += 1;
        Ok(())
    }

    /// Write a parsed [`SpectrumBlock`] back out
    pub fn write(&mut self, block: &SpectrumBlock) -> io::Result<()> {
        self.write_parts(&block.title_line, &block.parent_ion_line, &block.peak_text)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.handle.flush()
    }

    pub fn into_inner(self) -> BufWriter<W> {
        self.handle
    }
}
