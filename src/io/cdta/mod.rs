//! Read and write CDTA (concatenated DTA, `_dta.txt`) files: many MS/MS
//! spectra bundled into one text file, each block introduced by a `=` title
//! line carrying the `Dataset.StartScan.EndScan.Charge` naming convention.
//!
//! Rewinding is supported when reading from a source that implements
//! [`io::Seek`](std::io::Seek).
mod reader;
mod writer;

pub use reader::{CDTAError, CDTAParserState, CDTAReader};
pub use writer::{format_title, CDTAWriter};

pub fn is_cdta(buf: &[u8]) -> bool {
    let needle = b".dta\"";
    buf.first().is_some_and(|b| *b == b'=')
        && buf.windows(needle.len()).any(|window| window == needle)
}
