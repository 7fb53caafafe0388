//! A minimal MGF (Mascot Generic Format) block reader and the MGF to CDTA
//! conversion used when a converter tool emits peak lists as MGF.

use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;

use log::warn;
use regex::Regex;
use thiserror::Error;

use crate::io::cdta::{format_title, CDTAWriter};
use crate::spectrum::ScanRange;

const PROTON: f64 = 1.00727646677;

#[derive(PartialEq, Debug)]
pub enum MGFParserState {
    Start,
    FileHeader,
    ScanHeaders,
    Peaks,
    Between,
    Done,
    Error,
}

#[derive(Debug, Error)]
pub enum MGFError {
    #[error("No error occurred")]
    NoError,
    #[error("Encountered a malformed peak line")]
    MalformedPeakLine,
    #[error("Encountered a malformed header line: {0}")]
    MalformedHeaderLine(String),
    #[error("Encountered an IO error: {0}")]
    IOError(
        #[from]
        #[source]
        io::Error,
    ),
}

/// One spectrum read from an MGF file, with the peak list kept as text
#[derive(Debug, Default, Clone)]
pub struct MGFSpectrum {
    pub title: String,
    pub precursor_mz: f64,
    pub precursor_charge: Option<i32>,
    pub scans: Option<ScanRange>,
    pub peak_lines: Vec<String>,
}

impl MGFSpectrum {
    fn is_empty(&self) -> bool {
        self.title.is_empty() && self.peak_lines.is_empty()
    }
}

/// An MGF parser reduced to the needs of CDTA conversion: titles, precursor
/// information, scan numbers, and raw peak lines.
pub struct MGFReader<R: io::Read> {
    pub handle: io::BufReader<R>,
    pub state: MGFParserState,
    pub error: Option<MGFError>,
    title_pattern: Regex,
}

impl<R: io::Read> MGFReader<R> {
    pub fn new(file: R) -> MGFReader<R> {
        let handle = io::BufReader::with_capacity(500, file);
        MGFReader {
            handle,
            state: MGFParserState::Start,
            error: None,
            title_pattern: Regex::new(r#"\.(\d+)\.(\d+)\.(-?\d+)(?:\.dta)?(?:["\s]|$)"#)
                .expect("The title pattern is a fixed expression"),
        }
    }

    fn parse_charge(&mut self, value: &str) -> Option<i32> {
        let (sign, value) = if let Some(stripped) = value.strip_suffix('+') {
            (1, stripped)
        } else if let Some(stripped) = value.strip_suffix('-') {
            (-1, stripped)
        } else {
            (1, value)
        };
        match value.parse::<i32>() {
            Ok(z) => Some(sign * z),
            Err(e) => {
                self.state = MGFParserState::Error;
                self.error = Some(MGFError::MalformedHeaderLine(format!(
                    "Could not parse charge value {value} : {e}"
                )));
                None
            }
        }
    }

    fn parse_scans(value: &str) -> Option<ScanRange> {
        let mut parts = value.splitn(2, '-');
        let start: u32 = parts.next()?.trim().parse().ok()?;
        let end: u32 = match parts.next() {
            Some(tok) => tok.trim().parse().ok()?,
            None => start,
        };
        Some(ScanRange::new(start, end))
    }

    fn is_peak_line(line: &str) -> bool {
        line.chars().next().is_some_and(|c| c.is_numeric())
    }

    fn handle_peak(&mut self, line: &str, spectrum: &mut MGFSpectrum) -> bool {
        // Keep only the m/z and intensity columns; MGF may carry a charge column
        let mut it = line.split_ascii_whitespace();
        let mz = it.next();
        let intensity = it.next();
        match (mz, intensity) {
            (Some(mz), Some(intensity)) => {
                spectrum.peak_lines.push(format!("{mz} {intensity}"));
                true
            }
            _ => {
                self.state = MGFParserState::Error;
                self.error = Some(MGFError::MalformedPeakLine);
                false
            }
        }
    }

    fn handle_scan_header(&mut self, line: &str, spectrum: &mut MGFSpectrum) -> bool {
        if Self::is_peak_line(line) {
            self.state = MGFParserState::Peaks;
            return self.handle_peak(line, spectrum);
        }
        if line == "END IONS" {
            self.state = MGFParserState::Between;
            return false;
        }
        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim();
            match key {
                "TITLE" => {
                    spectrum.title = value.to_string();
                    if spectrum.scans.is_none() {
                        // TPP-style titles embed Dataset.Start.End.Charge
                        if let Some(captures) = self.title_pattern.captures_iter(value).last() {
                            let start = captures[1].parse().ok();
                            let end = captures[2].parse().ok();
                            if let (Some(start), Some(end)) = (start, end) {
                                spectrum.scans = Some(ScanRange::new(start, end));
                            }
                        }
                    }
                }
                "PEPMASS" => {
                    let mz_token = value.split_ascii_whitespace().next().unwrap_or_default();
                    match mz_token.parse::<f64>() {
                        Ok(mz) => spectrum.precursor_mz = mz,
                        Err(e) => {
                            self.state = MGFParserState::Error;
                            self.error = Some(MGFError::MalformedHeaderLine(format!(
                                "Malformed m/z value in PEPMASS header {value}: {e}"
                            )));
                            return false;
                        }
                    }
                }
                "CHARGE" => {
                    spectrum.precursor_charge = self.parse_charge(value);
                }
                "SCANS" => {
                    spectrum.scans = Self::parse_scans(value).or(spectrum.scans);
                }
                // RTINSECONDS and any vendor extensions have no CDTA counterpart
                _ => {}
            }
            true
        } else {
            self.state = MGFParserState::Error;
            self.error = Some(MGFError::MalformedHeaderLine(
                "No '=' in header line".into(),
            ));
            false
        }
    }

    fn handle_start(&mut self, line: &str) -> bool {
        if line.contains('=') {
            self.state = MGFParserState::FileHeader;
            true
        } else if line == "BEGIN IONS" {
            self.state = MGFParserState::ScanHeaders;
            true
        } else {
            matches!(self.state, MGFParserState::FileHeader)
        }
    }

    fn handle_between(&mut self, line: &str) -> bool {
        if line == "BEGIN IONS" {
            self.state = MGFParserState::ScanHeaders;
        }
        true
    }

    /// Read the next spectrum from the file, distinguishing parse failures
    /// from a clean end of file.
    pub fn parse_next(&mut self) -> Result<Option<MGFSpectrum>, MGFError> {
        let mut spectrum = MGFSpectrum::default();
        let mut buffer = String::new();
        loop {
            buffer.clear();
            let b = match self.handle.read_line(&mut buffer) {
                Ok(b) => b,
                Err(err) => {
                    self.state = MGFParserState::Error;
                    return Err(MGFError::IOError(err));
                }
            };
            if b == 0 {
                self.state = MGFParserState::Done;
                break;
            }

            let line = buffer.trim();
            if line.is_empty() {
                continue;
            }

            let work = match self.state {
                MGFParserState::Start | MGFParserState::FileHeader => self.handle_start(line),
                MGFParserState::ScanHeaders => self.handle_scan_header(line, &mut spectrum),
                MGFParserState::Peaks => {
                    if line == "END IONS" {
                        self.state = MGFParserState::Between;
                        false
                    } else {
                        self.handle_peak(line, &mut spectrum)
                    }
                }
                MGFParserState::Between => self.handle_between(line),
                MGFParserState::Done => false,
                MGFParserState::Error => {
                    return Err(self.error.take().unwrap_or(MGFError::NoError))
                }
            };

            if self.state == MGFParserState::Error {
                return Err(self.error.take().unwrap_or(MGFError::NoError));
            }
            if !work && self.state == MGFParserState::Between {
                break;
            }
        }
        if spectrum.is_empty() {
            Ok(None)
        } else {
            Ok(Some(spectrum))
        }
    }

    pub fn read_next(&mut self) -> Option<MGFSpectrum> {
        match self.parse_next() {
            Ok(spectrum) => spectrum,
            Err(err) => {
                warn!("Failed to read MGF spectrum: {err}");
                None
            }
        }
    }
}

impl<R: io::Read> Iterator for MGFReader<R> {
    type Item = MGFSpectrum;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next()
    }
}

pub fn is_mgf(buf: &[u8]) -> bool {
    let needle = b"BEGIN IONS";
    buf.windows(needle.len()).any(|window| window == needle)
}

/// Convert an MGF stream to a CDTA stream, returning the number of spectra
/// written.
///
/// The parent-ion line carries the MH+ mass: `MH+ = z * mz - (z - 1) * PROTON`.
/// Spectra without an explicit charge are assumed singly charged. Scan numbers
/// come from the `SCANS` header or a TPP-style title; failing both, spectra
/// are numbered sequentially.
pub fn convert_mgf_to_cdta<R: io::Read, W: io::Write>(
    input: R,
    output: W,
    dataset: &str,
) -> Result<u64, MGFError> {
    let mut reader = MGFReader::new(input);
    let mut writer = CDTAWriter::new(output);
    let mut fallback_scan: u32 = 0;
    while let Some(spectrum) = reader.parse_next()? {
        fallback_scan += 1;
        let charge = spectrum.precursor_charge.unwrap_or(1);
        let scans = spectrum
            .scans
            .unwrap_or_else(|| ScanRange::new(fallback_scan, fallback_scan));
        let mh = spectrum.precursor_mz * charge as f64 - (charge as f64 - 1.0) * PROTON;
        writer.write_parts(
            &format_title(dataset, scans, charge),
            &format!("{mh:.5} {charge}"),
            &spectrum.peak_lines.join("\n"),
        )?;
    }
    let written = writer.blocks_written() as u64;
    writer.flush()?;
    Ok(written)
}

/// Convert an MGF file on disk to a CDTA file on disk
pub fn convert_mgf_path<P: AsRef<Path>, Q: AsRef<Path>>(
    input: P,
    output: Q,
    dataset: &str,
) -> Result<u64, MGFError> {
    let source = fs::File::open(input)?;
    let sink = fs::File::create(output)?;
    convert_mgf_to_cdta(source, sink, dataset)
}
