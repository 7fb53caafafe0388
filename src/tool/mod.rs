//! Launching external converter tools and polling their progress.
//!
//! A [`ToolRunner`] runs the child process on a background thread and waits
//! on an mpsc channel with a timeout; every timeout expiry is a chance to
//! poll the tool's [`ProgressSource`] and forward a snapshot to the caller's
//! callback. The tools themselves (MSConvert, DeconMSn, ExtractMSn,
//! RawConverter) are opaque executables; this module never interprets their
//! output beyond the exit code and the progress source.

pub mod progress;

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use thiserror::Error;

pub use progress::{
    LogFileProgress, NullProgress, OutputCountProgress, ProgressPoller, ProgressSnapshot,
    ProgressSource,
};

/// A source of time, injected so cadence logic can be tested without
/// wall-clock delays
pub trait Clock {
    fn now(&self) -> Instant;
}

/// The real wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// An executable invocation under construction: program, argument list, and
/// working directory.
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<OsString>,
    working_dir: Option<PathBuf>,
}

impl ToolCommand {
    pub fn new<P: Into<PathBuf>>(program: P) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg<S: Into<OsString>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    pub fn working_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Render the invocation for logging and error messages
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }

    fn to_command(&self) -> process::Command {
        let mut command = process::Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Failed to launch {program}: {source}")]
    LaunchFailed {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} exited with code {code}")]
    NonZeroExit { program: String, code: i32 },
    #[error("{program} was terminated by a signal")]
    Terminated { program: String },
    #[error("The worker thread monitoring {program} disappeared")]
    MonitorLost { program: String },
}

/// The result of a completed tool run
#[derive(Debug, Clone, Copy)]
pub struct ToolOutcome {
    pub runtime: Duration,
    /// The last progress snapshot observed before exit, if any
    pub final_progress: Option<ProgressSnapshot>,
}

/// Runs a [`ToolCommand`] to completion, polling a [`ProgressSource`] at a
/// fixed interval (15 seconds by default) while it runs.
pub struct ToolRunner<C: Clock = SystemClock> {
    poll_interval: Duration,
    clock: C,
}

impl Default for ToolRunner<SystemClock> {
    fn default() -> Self {
        Self::new(Duration::from_secs(15))
    }
}

impl ToolRunner<SystemClock> {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            clock: SystemClock,
        }
    }
}

impl<C: Clock> ToolRunner<C> {
    pub fn with_clock(poll_interval: Duration, clock: C) -> Self {
        Self {
            poll_interval,
            clock,
        }
    }

    /// Launch the tool and block until it exits, invoking `on_progress` for
    /// every fresh snapshot taken while waiting. A non-zero exit code is an
    /// error.
    pub fn run<S: ProgressSource>(
        &self,
        command: &ToolCommand,
        progress: S,
        mut on_progress: impl FnMut(ProgressSnapshot),
    ) -> Result<ToolOutcome, ToolError> {
        let program = command.program().display().to_string();
        info!("Running {}", command.command_line());

        let start = self.clock.now();
        let (sender, receiver) = mpsc::channel();
        let mut child = command.to_command();
        thread::spawn(move || {
            // The receiver hanging up means the caller stopped listening;
            // nothing useful to do about it here
            let _ = sender.send(child.status());
        });

        let mut poller = ProgressPoller::new(progress, self.poll_interval);
        let status = loop {
            match receiver.recv_timeout(self.poll_interval) {
                Ok(status) => break status,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(snapshot) = poller.tick(self.clock.now()) {
                        debug!(
                            "{program}: {:.1}% complete",
                            snapshot.percent_complete
                        );
                        on_progress(snapshot);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ToolError::MonitorLost { program });
                }
            }
        };

        let status = status.map_err(|source| ToolError::LaunchFailed {
            program: program.clone(),
            source,
        })?;

        // One last poll so short-lived tools still report a final state
        if let Some(snapshot) = poller.poll_now(self.clock.now()) {
            on_progress(snapshot);
        }

        let runtime = self.clock.now().duration_since(start);
        if status.success() {
            info!("{program} finished in {:.1} s", runtime.as_secs_f64());
            Ok(ToolOutcome {
                runtime,
                final_progress: poller.last_snapshot(),
            })
        } else {
            match status.code() {
                Some(code) => {
                    warn!("{program} exited with code {code}");
                    Err(ToolError::NonZeroExit { program, code })
                }
                None => Err(ToolError::Terminated { program }),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_command_construction() {
        let command = ToolCommand::new("deconmsn.exe")
            .arg("-F100")
            .args(["-L6000", "-XCDTA"])
            .arg("input.raw")
            .working_dir("/tmp/work");
        assert_eq!(command.program(), Path::new("deconmsn.exe"));
        assert_eq!(command.get_args().len(), 4);
        assert_eq!(
            command.command_line(),
            "deconmsn.exe -F100 -L6000 -XCDTA input.raw"
        );
    }

    #[cfg(unix)]
    #[test_log::test]
    fn test_run_successful_tool() {
        let command = ToolCommand::new("sh").args(["-c", "exit 0"]);
        let runner = ToolRunner::new(Duration::from_millis(20));
        let outcome = runner
            .run(&command, NullProgress, |_| {})
            .expect("Tool should succeed");
        assert!(outcome.final_progress.is_none());
    }

    #[cfg(unix)]
    #[test_log::test]
    fn test_run_failing_tool() {
        let command = ToolCommand::new("sh").args(["-c", "exit 3"]);
        let runner = ToolRunner::new(Duration::from_millis(20));
        let err = runner
            .run(&command, NullProgress, |_| {})
            .expect_err("Tool should fail");
        assert!(matches!(err, ToolError::NonZeroExit { code: 3, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_program_is_a_launch_failure() {
        let command = ToolCommand::new("definitely-not-a-real-tool-name");
        let runner = ToolRunner::new(Duration::from_millis(20));
        let err = runner
            .run(&command, NullProgress, |_| {})
            .expect_err("Launch should fail");
        assert!(matches!(err, ToolError::LaunchFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_progress_forwarded_while_tool_runs() {
        let dir = tempfile::tempdir().unwrap();
        let progress_file = dir.path().join("progress.txt");
        std::fs::write(&progress_file, "Percent complete: 55\n").unwrap();

        let command = ToolCommand::new("sh").args(["-c", "sleep 0.2"]);
        let runner = ToolRunner::new(Duration::from_millis(25));
        let mut seen = Vec::new();
        let outcome = runner
            .run(&command, LogFileProgress::new(&progress_file), |s| {
                seen.push(s)
            })
            .expect("Tool should succeed");
        assert!(!seen.is_empty());
        assert_eq!(outcome.final_progress.unwrap().percent_complete, 55.0);
    }
}
