pub mod io;
pub mod jobs;
pub mod merge;
pub mod spectrum;
pub mod tool;

pub use crate::spectrum::{ScanRange, SpectrumBlock};

pub use crate::io::cdta::{CDTAError, CDTAReader, CDTAWriter};
pub use crate::io::mgf::{convert_mgf_to_cdta, MGFError, MGFReader};

pub use crate::merge::{
    merge_cdta_files, CDTAMerger, MergeError, MergeReport, ScanRangeIndex,
};
