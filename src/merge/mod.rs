//! Scan-matched merging of two CDTA files that describe the same underlying
//! scans: a parent-ion file carrying the authoritative title and precursor
//! lines, and a fragment-ion file carrying recomputed (e.g. centroided) peak
//! lists.
//!
//! The merge is a best-effort streaming join keyed on (start scan, end scan).
//! The fragment cursor only ever moves forward, except for a single permitted
//! rewind per parent spectrum when the two files' orderings diverge.

use std::fs;
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use log::{debug, warn};
use thiserror::Error;

use crate::io::cdta::{CDTAError, CDTAReader, CDTAWriter};
use crate::io::compression::{is_gzipped_extension, RestartableGzDecoder};
use crate::io::SeekRead;
use crate::spectrum::{ScanRange, SpectrumBlock};

/// A read-only map from start scan to the end scans observed for it in the
/// fragment-ion file, built by one full pass before the merge begins.
///
/// It exists solely to let the merge cheaply test whether a matching
/// spectrum exists at all before paying for a sequential re-scan.
#[derive(Debug, Default, Clone)]
pub struct ScanRangeIndex {
    ranges: IndexMap<u32, Vec<u32>>,
}

impl ScanRangeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scans: ScanRange) {
        let ends = self.ranges.entry(scans.start).or_default();
        if !ends.contains(&scans.end) {
            ends.push(scans.end);
        }
    }

    /// Whether a fragment-ion header could match the queried scan range.
    ///
    /// A recorded end equal to the query end matches. So does any recorded
    /// end smaller than its own start scan: such headers are a known tool
    /// artifact meaning "end scan unknown", and the merge accepts them on
    /// the start scan alone.
    pub fn contains(&self, scans: ScanRange) -> bool {
        self.ranges
            .get(&scans.start)
            .is_some_and(|ends| ends.iter().any(|&end| end == scans.end || end < scans.start))
    }

    /// The number of distinct start scans recorded
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Counters describing one completed merge
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeReport {
    /// Spectra written to the output, in parent-file order
    pub spectra_written: usize,
    /// Parent spectra dropped because no fragment-ion match was found
    pub spectra_skipped: usize,
    /// Full-file rewinds of the fragment-ion source
    pub rewinds: usize,
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Encountered an IO error: {0}")]
    IOError(
        #[from]
        #[source]
        io::Error,
    ),
    #[error("Failed to parse a spectrum block: {0}")]
    ParserError(
        #[from]
        #[source]
        CDTAError,
    ),
    #[error("The fragment-ion block for scans {0} was empty after removing header lines")]
    EmptyFragmentBlock(ScanRange),
}

/// Remove CDTA header lines from a raw spectrum text block: every line
/// beginning with `=` is dropped together with the line immediately
/// following it (its parent-ion line). Blank lines are never retained;
/// all other lines are kept verbatim.
pub fn strip_header_lines(text: &str) -> String {
    let mut stripped = String::new();
    let mut skip_next = false;
    for line in text.lines() {
        if skip_next {
            skip_next = false;
            continue;
        }
        if line.starts_with('=') {
            skip_next = true;
            continue;
        }
        if line.trim().is_empty() {
            continue;
        }
        stripped.push_str(line);
        stripped.push('\n');
    }
    stripped
}

/// Joins a parent-ion CDTA stream with a fragment-ion CDTA stream on
/// (start scan, end scan), writing one combined block per matched parent
/// spectrum: the parent's title and parent-ion lines over the fragment's
/// peak list.
///
/// The fragment source must support [`io::Seek`] so the merge can rewind it
/// once for the indexing pass and at most once per parent spectrum whose
/// match was passed by.
pub struct CDTAMerger<P: io::Read, F: io::Read + io::Seek, W: io::Write> {
    parent: CDTAReader<P>,
    fragments: CDTAReader<F>,
    writer: CDTAWriter<W>,
    index: ScanRangeIndex,
    report: MergeReport,
}

/// Two headers match when the start scans are equal and either the end
/// scans are equal, or the fragment header reports an end scan smaller than
/// its own start scan. The latter is a compatibility shim for a known
/// upstream tool artifact ("unknown end, accept on start alone") and is
/// evaluated only on the fragment header, never the parent header.
fn headers_match(parent: ScanRange, fragment: ScanRange) -> bool {
    parent.start == fragment.start
        && (parent.end == fragment.end || fragment.end_precedes_start())
}

impl<P: io::Read, F: io::Read + io::Seek, W: io::Write> CDTAMerger<P, F, W> {
    pub fn new(parent_source: P, fragment_source: F, sink: W) -> Self {
        Self {
            parent: CDTAReader::new(parent_source),
            fragments: CDTAReader::new(fragment_source),
            writer: CDTAWriter::new(sink),
            index: ScanRangeIndex::new(),
            report: MergeReport::default(),
        }
    }

    /// Run the merge to completion, consuming the merger and returning the
    /// counters for the whole operation.
    pub fn merge(mut self) -> Result<MergeReport, MergeError> {
        self.build_index()?;
        self.fragments.rewind()?;

        while let Some(parent) = self.parent.parse_next()? {
            if !self.index.contains(parent.scans) {
                // No possible match; the fragment cursor does not move
                warn!(
                    "No fragment-ion spectrum recorded for scans {}, skipping",
                    parent.scans
                );
                self.report.spectra_skipped += 1;
                continue;
            }
            match self.seek_fragment(parent.scans)? {
                Some(fragment) => self.emit(&parent, &fragment)?,
                None => {
                    warn!(
                        "Fragment-ion spectrum for scans {} was indexed but not found \
                         after a rewind, skipping",
                        parent.scans
                    );
                    self.report.spectra_skipped += 1;
                }
            }
        }

        self.writer.flush()?;
        if self.report.spectra_skipped > 0 {
            warn!(
                "{} spectra had no matching fragment-ion data and were dropped",
                self.report.spectra_skipped
            );
        }
        Ok(self.report)
    }

    /// Indexing pass: record every (start, end) pair in the fragment file
    fn build_index(&mut self) -> Result<(), MergeError> {
        while let Some(block) = self.fragments.parse_next()? {
            self.index.insert(block.scans);
        }
        debug!(
            "Indexed {} fragment-ion start scans across {} spectra",
            self.index.len(),
            self.fragments.blocks_read()
        );
        Ok(())
    }

    /// Advance the fragment cursor forward until a matching header is found.
    /// If the end of the file is reached first, rewind once and scan again;
    /// a second miss is final.
    fn seek_fragment(&mut self, scans: ScanRange) -> Result<Option<SpectrumBlock>, MergeError> {
        if let Some(block) = self.scan_forward(scans)? {
            return Ok(Some(block));
        }
        debug!(
            "Fragment-ion file exhausted while looking for scans {}, rescanning from the start",
            scans
        );
        self.fragments.rewind()?;
        self.report.rewinds += 1;
        self.scan_forward(scans)
    }

    fn scan_forward(&mut self, scans: ScanRange) -> Result<Option<SpectrumBlock>, MergeError> {
        while let Some(block) = self.fragments.parse_next()? {
            if headers_match(scans, block.scans) {
                return Ok(Some(block));
            }
        }
        Ok(None)
    }

    /// Write one merged block: the parent's title and parent-ion lines over
    /// the fragment's peak text, with any stray header lines stripped out.
    fn emit(&mut self, parent: &SpectrumBlock, fragment: &SpectrumBlock) -> Result<(), MergeError> {
        let peaks = strip_header_lines(&fragment.peak_text);
        if peaks.is_empty() {
            // An output record with no peak data is worse than stopping
            return Err(MergeError::EmptyFragmentBlock(parent.scans));
        }
        self.writer
            .write_parts(&parent.title_line, &parent.parent_ion_line, &peaks)?;
        self.report.spectra_written += 1;
        Ok(())
    }
}

/// Merge two CDTA files on disk, writing the combined file to `output`.
/// Inputs with a `.gz` extension are read through a restartable gzip
/// decoder.
pub fn merge_cdta_files(
    parent_path: &Path,
    fragment_path: &Path,
    output: &Path,
) -> Result<MergeReport, MergeError> {
    let open = |path: &Path| -> Result<fs::File, MergeError> {
        fs::File::open(path).map_err(|source| MergeError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })
    };

    let parent: Box<dyn io::Read> = {
        let handle = open(parent_path)?;
        if is_gzipped_extension(parent_path.to_path_buf()).0 {
            Box::new(RestartableGzDecoder::new(BufReader::new(handle)))
        } else {
            Box::new(handle)
        }
    };
    let fragments: Box<dyn SeekRead> = {
        let handle = open(fragment_path)?;
        if is_gzipped_extension(fragment_path.to_path_buf()).0 {
            Box::new(RestartableGzDecoder::new(BufReader::new(handle)))
        } else {
            Box::new(handle)
        }
    };
    let sink = fs::File::create(output).map_err(|source| MergeError::OpenFailed {
        path: output.to_path_buf(),
        source,
    })?;

    CDTAMerger::new(parent, fragments, sink).merge()
}
