//! The data model for spectrum blocks read from CDTA and MGF text files.
//!
//! The peak list is deliberately kept as raw text. Every consumer of these
//! blocks either copies the text verbatim into another file or discards it,
//! so parsing the individual (m/z, intensity) pairs would only add cost.

use std::fmt::{self, Display};

/// The pair of acquisition scan numbers a spectrum block summarizes,
/// embedded in its title using the `Dataset.StartScan.EndScan.Charge`
/// convention.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScanRange {
    pub start: u32,
    pub end: u32,
}

impl ScanRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }

    /// Whether the reported end scan precedes the start scan. Certain
    /// upstream tools emit such headers when the true end scan is unknown.
    pub fn end_precedes_start(&self) -> bool {
        self.end < self.start
    }
}

impl Display for ScanRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// One parsed spectrum record from a CDTA-convention text file.
///
/// Immutable once read. `title_line` preserves the original text, including
/// the leading `=` marker decoration, so a block can be re-emitted verbatim.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SpectrumBlock {
    /// The original title line, e.g.
    /// `=================== "Dataset.100.100.2.dta" ===================`
    pub title_line: String,
    /// The parent-ion information line (MH+ mass and charge)
    pub parent_ion_line: String,
    /// The raw fragment-ion peak list, one `m/z intensity` pair per line
    pub peak_text: String,
    /// The scan window parsed from the title line
    pub scans: ScanRange,
    /// The precursor charge parsed from the title line
    pub charge: Option<i32>,
}

impl SpectrumBlock {
    /// Whether the block carries any peak data at all
    pub fn is_empty(&self) -> bool {
        self.peak_text.lines().all(|line| line.trim().is_empty())
    }

    /// The number of peak lines in the block
    pub fn peak_count(&self) -> usize {
        self.peak_text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .count()
    }
}
