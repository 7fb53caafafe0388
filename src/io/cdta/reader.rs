use std::io::{self, prelude::*, SeekFrom};

use log::warn;
use regex::Regex;
use thiserror::Error;

use crate::spectrum::{ScanRange, SpectrumBlock};

#[derive(PartialEq, Debug)]
pub enum CDTAParserState {
    Start,
    ParentIon,
    Peaks,
    Done,
    Error,
}

#[derive(Debug, Error)]
pub enum CDTAError {
    #[error("No error occurred")]
    NoError,
    #[error("Encountered a malformed title line: {0}")]
    MalformedTitleLine(String),
    #[error("Encountered a malformed parent ion line: {0}")]
    MalformedParentIonLine(String),
    #[error("Encountered an IO error: {0}")]
    IOError(
        #[from]
        #[source]
        io::Error,
    ),
}

/// A CDTA (concatenated DTA, `_dta.txt`) file parser that yields
/// [`SpectrumBlock`]s in file order.
///
/// Each block is introduced by a title line beginning with `=`, carrying the
/// scan range and charge in the `Dataset.StartScan.EndScan.Charge` naming
/// convention, followed by one parent-ion line and the raw peak list.
///
/// When the underlying stream supports [`io::Seek`], the reader can be
/// returned to the start of the file with [`CDTAReader::rewind`] without
/// reopening the source.
pub struct CDTAReader<R: io::Read> {
    pub handle: io::BufReader<R>,
    pub state: CDTAParserState,
    pub error: Option<CDTAError>,
    /// Title line read past the end of the previous block, waiting to start
    /// the next one
    carried_title: Option<String>,
    title_pattern: Regex,
    blocks_read: usize,
}

impl<R: io::Read> CDTAReader<R> {
    pub fn new(file: R) -> CDTAReader<R> {
        let handle = io::BufReader::with_capacity(500, file);
        CDTAReader {
            handle,
            state: CDTAParserState::Start,
            error: None,
            carried_title: None,
            title_pattern: Regex::new(r#"\.(\d+)\.(\d+)\.(-?\d+)(?:\.dta)?(?:["\s=]|$)"#)
                .expect("The title pattern is a fixed expression"),
            blocks_read: 0,
        }
    }

    /// The number of spectrum blocks read so far
    pub fn blocks_read(&self) -> usize {
        self.blocks_read
    }

    fn read_line(&mut self, buffer: &mut String) -> io::Result<usize> {
        self.handle.read_line(buffer)
    }

    /// Extract the scan range and charge from a title line. The pattern is
    /// anchored to the end of the file name token, so dotted dataset names
    /// do not confuse the parse.
    fn parse_title(&self, line: &str) -> Option<(ScanRange, Option<i32>)> {
        let captures = self.title_pattern.captures_iter(line).last()?;
        let start: u32 = captures.get(1)?.as_str().parse().ok()?;
        let end: u32 = captures.get(2)?.as_str().parse().ok()?;
        let charge: Option<i32> = captures.get(3)?.as_str().parse().ok();
        Some((ScanRange::new(start, end), charge))
    }

    fn handle_title(&mut self, line: &str, block: &mut SpectrumBlock) -> bool {
        if !line.starts_with('=') {
            self.state = CDTAParserState::Error;
            self.error = Some(CDTAError::MalformedTitleLine(line.to_string()));
            return false;
        }
        match self.parse_title(line) {
            Some((scans, charge)) => {
                block.title_line = line.to_string();
                block.scans = scans;
                block.charge = charge;
                self.state = CDTAParserState::ParentIon;
                true
            }
            None => {
                self.state = CDTAParserState::Error;
                self.error = Some(CDTAError::MalformedTitleLine(line.to_string()));
                false
            }
        }
    }

    fn handle_parent_ion(&mut self, line: &str, block: &mut SpectrumBlock) -> bool {
        let mut parts = line.split_ascii_whitespace();
        let mass_ok = parts
            .next()
            .map(|tok| tok.parse::<f64>().is_ok())
            .unwrap_or(false);
        let charge_ok = parts
            .next()
            .map(|tok| tok.parse::<i32>().is_ok())
            .unwrap_or(true);
        if mass_ok && charge_ok {
            block.parent_ion_line = line.to_string();
            self.state = CDTAParserState::Peaks;
            true
        } else {
            self.state = CDTAParserState::Error;
            self.error = Some(CDTAError::MalformedParentIonLine(line.to_string()));
            false
        }
    }

    /// Read the next spectrum block, distinguishing parse failures from
    /// a clean end of file.
    pub fn parse_next(&mut self) -> Result<Option<SpectrumBlock>, CDTAError> {
        if self.state == CDTAParserState::Done {
            return Ok(None);
        }
        let mut block = SpectrumBlock::default();
        let mut buffer = String::new();
        let mut started = false;

        // A title line read while closing out the previous block opens this one
        if let Some(title) = self.carried_title.take() {
            started = true;
            if !self.handle_title(&title, &mut block) {
                return Err(self.error.take().unwrap_or(CDTAError::NoError));
            }
        }

        loop {
            buffer.clear();
            let b = match self.read_line(&mut buffer) {
                Ok(b) => b,
                Err(err) => {
                    self.state = CDTAParserState::Error;
                    return Err(CDTAError::IOError(err));
                }
            };
            if b == 0 {
                self.state = CDTAParserState::Done;
                break;
            }

            let line = buffer.trim_end_matches(['\r', '\n']);

            // Blank lines separate blocks but carry no information
            if line.trim().is_empty() {
                continue;
            }

            let work = match self.state {
                CDTAParserState::Start => {
                    started = true;
                    self.handle_title(line, &mut block)
                }
                CDTAParserState::ParentIon => self.handle_parent_ion(line, &mut block),
                CDTAParserState::Peaks => {
                    if line.starts_with('=') {
                        // Start of the next block; save it for the next call
                        self.carried_title = Some(line.to_string());
                        self.state = CDTAParserState::Start;
                        false
                    } else {
                        block.peak_text.push_str(line);
                        block.peak_text.push('\n');
                        true
                    }
                }
                CDTAParserState::Done => false,
                CDTAParserState::Error => {
                    return Err(self.error.take().unwrap_or(CDTAError::NoError))
                }
            };

            if self.state == CDTAParserState::Error {
                return Err(self.error.take().unwrap_or(CDTAError::NoError));
            }
            if !work {
                break;
            }
        }

        if started {
            self.blocks_read += 1;
            Ok(Some(block))
        } else {
            Ok(None)
        }
    }

    /// Read the next spectrum block, if there is one. Parse errors are
    /// logged and treated as the end of the stream; use
    /// [`CDTAReader::parse_next`] to observe them.
    pub fn read_next(&mut self) -> Option<SpectrumBlock> {
        match self.parse_next() {
            Ok(block) => block,
            Err(err) => {
                warn!("Failed to read spectrum block: {err}");
                None
            }
        }
    }
}

impl<R: io::Read + io::Seek> CDTAReader<R> {
    /// Return the stream to the beginning and reset the parser state,
    /// replacing the close-and-reopen idiom with a cheap in-place seek.
    pub fn rewind(&mut self) -> io::Result<()> {
        self.handle.seek(SeekFrom::Start(0))?;
        self.state = CDTAParserState::Start;
        self.error = None;
        self.carried_title = None;
        self.blocks_read = 0;
        Ok(())
    }
}

impl<R: io::Read> Iterator for CDTAReader<R> {
    type Item = SpectrumBlock;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_next()
    }
}
