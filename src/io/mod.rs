//! Reading, writing, and packaging the text spectrum formats that surround
//! CDTA processing.

pub mod cdta;
pub(crate) mod compression;
pub mod mgf;
mod utils;

pub use crate::io::cdta::{is_cdta, CDTAError, CDTAReader, CDTAWriter};
pub use crate::io::compression::{is_gzipped, is_gzipped_extension, RestartableGzDecoder};
pub use crate::io::mgf::{convert_mgf_path, convert_mgf_to_cdta, is_mgf, MGFError, MGFReader};
pub use crate::io::utils::{concatenate_dta_files, concatenate_files, zip_package};

use std::io as std_io;

/// Combined `Read + Seek` bound for sources that can participate in the
/// merge's rewind protocol.
pub trait SeekRead: std_io::Read + std_io::Seek {}
impl<T: std_io::Read + std_io::Seek> SeekRead for T {}
