//! Progress sources for running converter tools: a tailed progress/log file
//! whose free-text status lines are translated into a 0-100 value, or a
//! count of output files against an expected total.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use log::debug;
use regex::Regex;

/// A point-in-time view of a running tool's progress
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    /// Completion estimate, clamped to 0-100
    pub percent_complete: f32,
    /// The number of scans or spectra processed so far, when known
    pub spectra_counted: Option<u64>,
}

/// Something a [`ToolRunner`](crate::tool::ToolRunner) can poll on a timer
/// while the tool runs. Returning `Ok(None)` means "nothing to report yet",
/// which is normal early in a tool's lifetime.
pub trait ProgressSource {
    fn poll(&mut self) -> io::Result<Option<ProgressSnapshot>>;
}

impl<P: ProgressSource + ?Sized> ProgressSource for Box<P> {
    fn poll(&mut self) -> io::Result<Option<ProgressSnapshot>> {
        (**self).poll()
    }
}

/// No progress information available; always reports nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSource for NullProgress {
    fn poll(&mut self) -> io::Result<Option<ProgressSnapshot>> {
        Ok(None)
    }
}

/// Tails a tool-specific progress file, translating lines such as
/// `Percent complete: 42.5` and `Processing scan 1500` into a snapshot.
/// The last occurrence of each pattern wins.
pub struct LogFileProgress {
    path: PathBuf,
    percent_pattern: Regex,
    scan_pattern: Regex,
}

impl LogFileProgress {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            path: path.into(),
            percent_pattern: Regex::new(r"(?i)percent\s+complete:?\s*([0-9]+(?:\.[0-9]+)?)")
                .expect("The percent pattern is a fixed expression"),
            scan_pattern: Regex::new(r"(?i)process(?:ed|ing)\s+scan\s+(\d+)")
                .expect("The scan pattern is a fixed expression"),
        }
    }
}

impl ProgressSource for LogFileProgress {
    fn poll(&mut self) -> io::Result<Option<ProgressSnapshot>> {
        // The tool may not have created the file yet
        if !self.path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&self.path)?;
        let percent = self
            .percent_pattern
            .captures_iter(&text)
            .last()
            .and_then(|c| c[1].parse::<f32>().ok());
        let scans = self
            .scan_pattern
            .captures_iter(&text)
            .last()
            .and_then(|c| c[1].parse::<u64>().ok());
        if percent.is_none() && scans.is_none() {
            return Ok(None);
        }
        Ok(Some(ProgressSnapshot {
            percent_complete: percent.unwrap_or(0.0).clamp(0.0, 100.0),
            spectra_counted: scans,
        }))
    }
}

/// Counts the output files a tool has produced so far against the expected
/// total, for tools that write one file per spectrum and no progress file.
pub struct OutputCountProgress {
    directory: PathBuf,
    extension: String,
    expected: u64,
}

impl OutputCountProgress {
    pub fn new<P: Into<PathBuf>>(directory: P, extension: &str, expected: u64) -> Self {
        Self {
            directory: directory.into(),
            extension: extension.trim_start_matches('.').to_string(),
            expected: expected.max(1),
        }
    }
}

impl ProgressSource for OutputCountProgress {
    fn poll(&mut self) -> io::Result<Option<ProgressSnapshot>> {
        if !self.directory.exists() {
            return Ok(None);
        }
        let mut count = 0u64;
        for entry in fs::read_dir(&self.directory)? {
            let path = entry?.path();
            if path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case(self.extension.as_str()))
            {
                count += 1;
            }
        }
        Ok(Some(ProgressSnapshot {
            percent_complete: ((count as f32 / self.expected as f32) * 100.0).clamp(0.0, 100.0),
            spectra_counted: Some(count),
        }))
    }
}

/// Rate-limits polling of a [`ProgressSource`] to a fixed interval against
/// instants supplied by the caller, so cadence is testable with a manual
/// clock.
pub struct ProgressPoller<S: ProgressSource> {
    source: S,
    interval: Duration,
    last_polled: Option<Instant>,
    last_snapshot: Option<ProgressSnapshot>,
}

impl<S: ProgressSource> ProgressPoller<S> {
    pub fn new(source: S, interval: Duration) -> Self {
        Self {
            source,
            interval,
            last_polled: None,
            last_snapshot: None,
        }
    }

    /// Whether enough time has passed since the last poll
    pub fn due(&self, now: Instant) -> bool {
        self.last_polled
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true)
    }

    /// The most recent snapshot observed, if any
    pub fn last_snapshot(&self) -> Option<ProgressSnapshot> {
        self.last_snapshot
    }

    /// Poll the source if the interval has elapsed, returning the fresh
    /// snapshot when one was taken. Source errors are logged rather than
    /// propagated: a transiently unreadable progress file must not kill a
    /// healthy tool run.
    pub fn tick(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        if !self.due(now) {
            return None;
        }
        self.poll_now(now)
    }

    /// Poll the source immediately, regardless of the interval
    pub fn poll_now(&mut self, now: Instant) -> Option<ProgressSnapshot> {
        self.last_polled = Some(now);
        match self.source.poll() {
            Ok(Some(snapshot)) => {
                self.last_snapshot = Some(snapshot);
                Some(snapshot)
            }
            Ok(None) => None,
            Err(err) => {
                debug!("Progress source was unreadable: {err}");
                None
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::fs;

    #[test]
    fn test_log_file_progress() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("DeconMSn_progress.txt");

        let mut source = LogFileProgress::new(&path);
        assert!(source.poll()?.is_none());

        fs::write(
            &path,
            "Starting\nPercent complete: 10.5\nProcessing scan 150\nPercent complete: 42.5\nProcessing scan 610\n",
        )?;
        let snapshot = source.poll()?.expect("Expected a snapshot");
        assert!((snapshot.percent_complete - 42.5).abs() < 1e-6);
        assert_eq!(snapshot.spectra_counted, Some(610));
        Ok(())
    }

    #[test]
    fn test_log_file_progress_clamps() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("progress.txt");
        fs::write(&path, "Percent complete: 250.0\n")?;
        let snapshot = LogFileProgress::new(&path).poll()?.unwrap();
        assert_eq!(snapshot.percent_complete, 100.0);
        Ok(())
    }

    #[test]
    fn test_output_count_progress() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = OutputCountProgress::new(dir.path(), ".dta", 4);

        let snapshot = source.poll()?.unwrap();
        assert_eq!(snapshot.percent_complete, 0.0);
        assert_eq!(snapshot.spectra_counted, Some(0));

        fs::write(dir.path().join("DS.1.1.1.dta"), "x")?;
        fs::write(dir.path().join("DS.2.2.1.dta"), "x")?;
        fs::write(dir.path().join("DS.log"), "x")?;
        let snapshot = source.poll()?.unwrap();
        assert_eq!(snapshot.percent_complete, 50.0);
        assert_eq!(snapshot.spectra_counted, Some(2));
        Ok(())
    }

    #[test]
    fn test_poller_cadence_with_manual_instants() {
        struct Counting(u64);
        impl ProgressSource for Counting {
            fn poll(&mut self) -> io::Result<Option<ProgressSnapshot>> {
                self.0 += 1;
                Ok(Some(ProgressSnapshot {
                    percent_complete: self.0 as f32,
                    spectra_counted: Some(self.0),
                }))
            }
        }

        let start = Instant::now();
        let mut poller = ProgressPoller::new(Counting(0), Duration::from_secs(15));

        // First tick always polls
        assert!(poller.tick(start).is_some());
        // Within the interval nothing happens
        assert!(poller.tick(start + Duration::from_secs(5)).is_none());
        assert!(poller.tick(start + Duration::from_secs(14)).is_none());
        // At the interval boundary the source is polled again
        let snapshot = poller.tick(start + Duration::from_secs(15)).unwrap();
        assert_eq!(snapshot.spectra_counted, Some(2));
        assert_eq!(poller.last_snapshot(), Some(snapshot));
    }
}
