//! Job orchestration: selecting a converter tool from job parameters,
//! staging its input, deciding whether existing results can be reused,
//! running the tool, post-processing its output into a CDTA file, and
//! packaging the result.
//!
//! The surrounding analysis framework is consumed through two narrow
//! injected interfaces, [`JobParameters`] and [`StatusReporter`], rather
//! than reimplemented.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use thiserror::Error;

use crate::io::cdta::{CDTAError, CDTAReader};
use crate::io::mgf::MGFError;
use crate::io::{concatenate_dta_files, convert_mgf_path, zip_package};
use crate::merge::{merge_cdta_files, MergeError};
use crate::tool::{
    LogFileProgress, OutputCountProgress, ProgressSource, ToolCommand, ToolError, ToolRunner,
};

pub const SECTION_JOB: &str = "JobParameters";
pub const SECTION_DTA: &str = "DtaGenerator";

/// Read-only access to the job's parameter table, keyed by section and name
pub trait JobParameters {
    fn get(&self, section: &str, name: &str) -> Option<String>;

    fn get_or(&self, section: &str, name: &str, default: &str) -> String {
        self.get(section, name)
            .unwrap_or_else(|| default.to_string())
    }

    fn get_bool(&self, section: &str, name: &str, default: bool) -> bool {
        match self.get(section, name) {
            Some(value) => matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            ),
            None => default,
        }
    }

    fn get_u32(&self, section: &str, name: &str, default: u32) -> u32 {
        self.get(section, name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn get_f64(&self, section: &str, name: &str, default: f64) -> f64 {
        self.get(section, name)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

/// An in-memory parameter table for tests and the command line
#[derive(Debug, Default, Clone)]
pub struct MemoryJobParameters {
    entries: IndexMap<(String, String), String>,
}

impl MemoryJobParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, section: &str, name: &str, value: &str) {
        self.entries
            .insert((section.to_string(), name.to_string()), value.to_string());
    }
}

impl JobParameters for MemoryJobParameters {
    fn get(&self, section: &str, name: &str) -> Option<String> {
        self.entries
            .get(&(section.to_string(), name.to_string()))
            .cloned()
    }
}

/// Receives progress and diagnostics from a running job, typically bridged
/// to the parent framework's status tracker
pub trait StatusReporter {
    fn update_progress(&mut self, percent_complete: f32);
    fn update_spectra_count(&mut self, count: u64);
    fn warn(&mut self, message: &str);
}

/// A [`StatusReporter`] that writes through the `log` facade and remembers
/// the time of the last update
#[derive(Debug, Default)]
pub struct LogStatusReporter {
    pub percent_complete: f32,
    pub spectra_counted: u64,
    pub last_update: Option<DateTime<Utc>>,
}

impl StatusReporter for LogStatusReporter {
    fn update_progress(&mut self, percent_complete: f32) {
        self.percent_complete = percent_complete.clamp(0.0, 100.0);
        self.last_update = Some(Utc::now());
        debug!("Progress: {:.1}%", self.percent_complete);
    }

    fn update_spectra_count(&mut self, count: u64) {
        self.spectra_counted = count;
        self.last_update = Some(Utc::now());
        debug!("Spectra so far: {count}");
    }

    fn warn(&mut self, message: &str) {
        self.last_update = Some(Utc::now());
        warn!("{message}");
    }
}

/// The converter tools a job step may wrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConverterKind {
    MSConvert,
    DeconMSn,
    ExtractMSn,
    RawConverter,
}

impl ConverterKind {
    /// Select the converter named by the `DtaGeneratorName` job parameter
    pub fn from_job_parameters<P: JobParameters>(params: &P) -> Result<Self, JobError> {
        let name = params
            .get(SECTION_DTA, "DtaGeneratorName")
            .ok_or(JobError::MissingParameter {
                section: SECTION_DTA,
                name: "DtaGeneratorName",
            })?;
        let lowered = name.to_ascii_lowercase();
        if lowered.contains("msconvert") {
            Ok(Self::MSConvert)
        } else if lowered.contains("deconmsn") {
            Ok(Self::DeconMSn)
        } else if lowered.contains("extract_msn") || lowered.contains("extractmsn") {
            Ok(Self::ExtractMSn)
        } else if lowered.contains("rawconverter") {
            Ok(Self::RawConverter)
        } else {
            Err(JobError::UnknownConverter(name))
        }
    }

    /// Build the tool invocation from the job's parameter table. Scan range,
    /// mass window, and centroiding flags all come from the `DtaGenerator`
    /// section with the defaults the tools themselves document.
    pub fn build_command<P: JobParameters>(
        &self,
        params: &P,
        tool_path: &Path,
        input: &Path,
        work_dir: &Path,
    ) -> ToolCommand {
        let scan_start = params.get_u32(SECTION_DTA, "ScanStart", 0);
        let scan_stop = params.get_u32(SECTION_DTA, "ScanStop", 0);
        let min_mass = params.get_f64(SECTION_DTA, "MinMass", 200.0);
        let max_mass = params.get_f64(SECTION_DTA, "MaxMass", 5000.0);
        let centroid = params.get_bool(SECTION_DTA, "CentroidDTAs", false);

        match self {
            Self::MSConvert => {
                let mut command = ToolCommand::new(tool_path)
                    .arg("--mgf")
                    .args(["--outdir".to_string(), work_dir.display().to_string()]);
                if centroid {
                    command = command.args(["--filter", "peakPicking true 1-"]);
                }
                if scan_stop > 0 {
                    command = command.args([
                        "--filter".to_string(),
                        format!("scanNumber [{scan_start},{scan_stop}]"),
                    ]);
                }
                command.arg(input).working_dir(work_dir)
            }
            Self::DeconMSn => {
                let mut command = ToolCommand::new(tool_path);
                if scan_start > 0 {
                    command = command.arg(format!("-F{scan_start}"));
                }
                if scan_stop > 0 {
                    command = command.arg(format!("-L{scan_stop}"));
                }
                command
                    .arg(format!("-B{min_mass}"))
                    .arg(format!("-T{max_mass}"))
                    .arg("-XCDTA")
                    .arg(format!("-D{}", work_dir.display()))
                    .arg(input)
                    .working_dir(work_dir)
            }
            Self::ExtractMSn => {
                let mut command = ToolCommand::new(tool_path);
                if scan_start > 0 {
                    command = command.arg(format!("-F{scan_start}"));
                }
                if scan_stop > 0 {
                    command = command.arg(format!("-L{scan_stop}"));
                }
                command
                    .arg(format!("-B{min_mass}"))
                    .arg(format!("-T{max_mass}"))
                    .arg(format!("-D{}", work_dir.display()))
                    .arg(input)
                    .working_dir(work_dir)
            }
            Self::RawConverter => {
                let mut command = ToolCommand::new(tool_path).arg(input).arg("--mgf");
                if centroid {
                    command = command.arg("--select_mono_prec");
                }
                command
                    .args(["--out_folder".to_string(), work_dir.display().to_string()])
                    .working_dir(work_dir)
            }
        }
    }

    /// The progress source appropriate for this tool: DeconMSn writes a
    /// progress file, the others are tracked by counting output files.
    pub fn progress_source(
        &self,
        work_dir: &Path,
        expected_scans: u64,
    ) -> Box<dyn ProgressSource> {
        match self {
            Self::DeconMSn => Box::new(LogFileProgress::new(
                work_dir.join("DeconMSn_progress.txt"),
            )),
            Self::ExtractMSn => Box::new(OutputCountProgress::new(
                work_dir,
                "dta",
                expected_scans,
            )),
            Self::MSConvert | Self::RawConverter => {
                Box::new(OutputCountProgress::new(work_dir, "mgf", 1))
            }
        }
    }

    /// Whether the tool emits MGF that must be converted to CDTA afterwards
    fn produces_mgf(&self) -> bool {
        matches!(self, Self::MSConvert | Self::RawConverter)
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job parameter {section}/{name} is required but was not provided")]
    MissingParameter {
        section: &'static str,
        name: &'static str,
    },
    #[error("No converter is known by the name {0}")]
    UnknownConverter(String),
    #[error("The input file {0} was not found in the working directory")]
    MissingInput(PathBuf),
    #[error("The tool finished but its expected output {0} was not produced")]
    MissingOutput(PathBuf),
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Merge(#[from] MergeError),
    #[error(transparent)]
    Parser(#[from] CDTAError),
    #[error(transparent)]
    Mgf(#[from] MGFError),
    #[error("Encountered an IO error: {0}")]
    IOError(#[from] io::Error),
}

/// How a job step ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionCode {
    Success,
    /// The tool ran cleanly but produced no spectra
    NoData,
    Failed,
}

/// The outcome of one conversion job step
#[derive(Debug, Clone)]
pub struct JobReport {
    pub completion: CompletionCode,
    pub cdta_path: PathBuf,
    pub zip_path: Option<PathBuf>,
    pub spectra_counted: u64,
    /// Spectra dropped by the scan-matched merge, when one ran
    pub spectra_skipped: usize,
    pub reused_existing: bool,
}

/// Drives one dataset through a converter tool and the CDTA post-processing
/// steps. Each job owns its working directory exclusively, so no locking is
/// needed between instances.
pub struct ConversionJob {
    dataset: String,
    work_dir: PathBuf,
    tool_path: PathBuf,
    runner: ToolRunner,
}

impl ConversionJob {
    pub fn new<D: Into<String>, W: Into<PathBuf>, T: Into<PathBuf>>(
        dataset: D,
        work_dir: W,
        tool_path: T,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            work_dir: work_dir.into(),
            tool_path: tool_path.into(),
            runner: ToolRunner::default(),
        }
    }

    pub fn with_runner(mut self, runner: ToolRunner) -> Self {
        self.runner = runner;
        self
    }

    fn cdta_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}_dta.txt", self.dataset))
    }

    /// Pre-existing results are reusable when the CDTA file exists, is
    /// non-empty, and is at least as new as the input it derives from.
    pub fn can_reuse_existing(&self, input: &Path) -> bool {
        let cdta = self.cdta_path();
        let Ok(cdta_meta) = fs::metadata(&cdta) else {
            return false;
        };
        if cdta_meta.len() == 0 {
            return false;
        }
        match (cdta_meta.modified(), fs::metadata(input).and_then(|m| m.modified())) {
            (Ok(cdta_time), Ok(input_time)) => cdta_time >= input_time,
            _ => false,
        }
    }

    fn count_spectra(&self, cdta: &Path) -> Result<u64, JobError> {
        let mut reader = CDTAReader::new(fs::File::open(cdta)?);
        let mut count = 0u64;
        while reader.parse_next()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Run the job step end to end. The input file named by the
    /// `JobParameters/InputFileName` parameter must already have been
    /// retrieved into the working directory.
    pub fn run<P: JobParameters, S: StatusReporter>(
        &self,
        params: &P,
        reporter: &mut S,
    ) -> Result<JobReport, JobError> {
        let input_name =
            params
                .get(SECTION_JOB, "InputFileName")
                .ok_or(JobError::MissingParameter {
                    section: SECTION_JOB,
                    name: "InputFileName",
                })?;
        let input = self.work_dir.join(&input_name);
        if !input.exists() {
            return Err(JobError::MissingInput(input));
        }

        let cdta = self.cdta_path();
        if self.can_reuse_existing(&input) {
            info!(
                "Reusing existing results in {} for dataset {}",
                cdta.display(),
                self.dataset
            );
            let count = self.count_spectra(&cdta)?;
            reporter.update_spectra_count(count);
            reporter.update_progress(100.0);
            return Ok(JobReport {
                completion: if count > 0 {
                    CompletionCode::Success
                } else {
                    CompletionCode::NoData
                },
                cdta_path: cdta,
                zip_path: None,
                spectra_counted: count,
                spectra_skipped: 0,
                reused_existing: true,
            });
        }

        let kind = ConverterKind::from_job_parameters(params)?;
        let command = kind.build_command(params, &self.tool_path, &input, &self.work_dir);
        let expected = params.get_u32(SECTION_DTA, "ScanStop", 0) as u64;
        let progress = kind.progress_source(&self.work_dir, expected);

        self.runner.run(&command, progress, |snapshot| {
            reporter.update_progress(snapshot.percent_complete);
            if let Some(count) = snapshot.spectra_counted {
                reporter.update_spectra_count(count);
            }
        })?;

        self.post_process(kind, &cdta)?;

        let spectra_skipped = if params.get_bool(SECTION_DTA, "MergeCentroidedDta", false) {
            self.merge_centroided(params, &cdta, reporter)?
        } else {
            0
        };

        let count = self.count_spectra(&cdta)?;
        reporter.update_spectra_count(count);
        reporter.update_progress(100.0);

        if count == 0 {
            warn!("Dataset {} produced no spectra", self.dataset);
            return Ok(JobReport {
                completion: CompletionCode::NoData,
                cdta_path: cdta,
                zip_path: None,
                spectra_counted: 0,
                spectra_skipped,
                reused_existing: false,
            });
        }

        let zip_path = if params.get_bool(SECTION_DTA, "ZipDtaFile", true) {
            let archive = self.work_dir.join(format!("{}_dta.zip", self.dataset));
            zip_package(&[&cdta], &archive)?;
            Some(archive)
        } else {
            None
        };

        Ok(JobReport {
            completion: CompletionCode::Success,
            cdta_path: cdta,
            zip_path,
            spectra_counted: count,
            spectra_skipped,
            reused_existing: false,
        })
    }

    /// Like [`ConversionJob::run`], but folds hard failures into a
    /// [`CompletionCode::Failed`] report for callers that only consume
    /// status codes.
    pub fn run_to_report<P: JobParameters, S: StatusReporter>(
        &self,
        params: &P,
        reporter: &mut S,
    ) -> JobReport {
        match self.run(params, reporter) {
            Ok(report) => report,
            Err(err) => {
                log::error!("Job step for dataset {} failed: {err}", self.dataset);
                reporter.warn(&format!("Job step failed: {err}"));
                JobReport {
                    completion: CompletionCode::Failed,
                    cdta_path: self.cdta_path(),
                    zip_path: None,
                    spectra_counted: 0,
                    spectra_skipped: 0,
                    reused_existing: false,
                }
            }
        }
    }

    /// Turn whatever the tool produced into the canonical CDTA file
    fn post_process(&self, kind: ConverterKind, cdta: &Path) -> Result<(), JobError> {
        if kind.produces_mgf() {
            let mgf = self.work_dir.join(format!("{}.mgf", self.dataset));
            if !mgf.exists() {
                return Err(JobError::MissingOutput(mgf));
            }
            let written = convert_mgf_path(&mgf, cdta, &self.dataset)?;
            debug!("Converted {} MGF spectra to CDTA", written);
        } else if kind == ConverterKind::ExtractMSn {
            let written = concatenate_dta_files(&self.work_dir, &self.dataset, cdta)?;
            debug!("Concatenated {} .dta files", written);
        } else if !cdta.exists() {
            // DeconMSn writes the CDTA file itself
            return Err(JobError::MissingOutput(cdta.to_path_buf()));
        }
        Ok(())
    }

    /// Merge a centroided second-pass CDTA back into the primary one,
    /// replacing it. The rename happens only after all file handles from the
    /// merge have been released.
    fn merge_centroided<P: JobParameters, S: StatusReporter>(
        &self,
        params: &P,
        cdta: &Path,
        reporter: &mut S,
    ) -> Result<usize, JobError> {
        let fragment_name = params.get_or(
            SECTION_DTA,
            "CentroidedDtaFileName",
            &format!("{}_dta_centroided.txt", self.dataset),
        );
        let fragment = self.work_dir.join(fragment_name);
        let merged = self.work_dir.join(format!("{}_dta_merged.txt", self.dataset));

        let report = merge_cdta_files(cdta, &fragment, &merged)?;
        if report.spectra_skipped > 0 {
            reporter.warn(&format!(
                "{} spectra had no matching centroided data and were dropped",
                report.spectra_skipped
            ));
        }
        fs::rename(&merged, cdta)?;
        Ok(report.spectra_skipped)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_params(tool_name: &str, input: &str) -> MemoryJobParameters {
        let mut params = MemoryJobParameters::new();
        params.set(SECTION_JOB, "InputFileName", input);
        params.set(SECTION_DTA, "DtaGeneratorName", tool_name);
        params
    }

    #[test]
    fn test_converter_selection() {
        for (name, expected) in [
            ("MSConvert.exe", ConverterKind::MSConvert),
            ("DeconMSn.exe", ConverterKind::DeconMSn),
            ("extract_msn.exe", ConverterKind::ExtractMSn),
            ("RawConverter.exe", ConverterKind::RawConverter),
        ] {
            let params = base_params(name, "DS.raw");
            assert_eq!(
                ConverterKind::from_job_parameters(&params).unwrap(),
                expected
            );
        }

        let params = base_params("mystery.exe", "DS.raw");
        assert!(matches!(
            ConverterKind::from_job_parameters(&params),
            Err(JobError::UnknownConverter(_))
        ));

        let params = MemoryJobParameters::new();
        assert!(matches!(
            ConverterKind::from_job_parameters(&params),
            Err(JobError::MissingParameter { .. })
        ));
    }

    #[test]
    fn test_deconmsn_command_construction() {
        let mut params = base_params("DeconMSn.exe", "DS.raw");
        params.set(SECTION_DTA, "ScanStart", "100");
        params.set(SECTION_DTA, "ScanStop", "6000");
        params.set(SECTION_DTA, "MinMass", "300");

        let command = ConverterKind::DeconMSn.build_command(
            &params,
            Path::new("/opt/deconmsn/DeconMSn.exe"),
            Path::new("/work/DS.raw"),
            Path::new("/work"),
        );
        let line = command.command_line();
        assert!(line.contains("-F100"));
        assert!(line.contains("-L6000"));
        assert!(line.contains("-B300"));
        assert!(line.contains("-T5000"));
        assert!(line.contains("-XCDTA"));
        assert!(line.ends_with("/work/DS.raw"));
    }

    #[test]
    fn test_msconvert_command_construction() {
        let mut params = base_params("MSConvert.exe", "DS.raw");
        params.set(SECTION_DTA, "CentroidDTAs", "true");

        let command = ConverterKind::MSConvert.build_command(
            &params,
            Path::new("msconvert"),
            Path::new("/work/DS.raw"),
            Path::new("/work"),
        );
        let line = command.command_line();
        assert!(line.contains("--mgf"));
        assert!(line.contains("peakPicking true 1-"));
        // No scan range requested, so no scanNumber filter
        assert!(!line.contains("scanNumber"));
    }

    #[test]
    fn test_parameter_defaults() {
        let params = MemoryJobParameters::new();
        assert_eq!(params.get_or("A", "B", "fallback"), "fallback");
        assert!(params.get_bool("A", "B", true));
        assert!(!params.get_bool("A", "B", false));
        assert_eq!(params.get_u32("A", "B", 7), 7);

        let mut params = MemoryJobParameters::new();
        params.set("A", "B", "Yes");
        assert!(params.get_bool("A", "B", false));
        params.set("A", "B", "0");
        assert!(!params.get_bool("A", "B", true));
    }

    #[test]
    fn test_reuse_decision() -> io::Result<()> {
        let dir = tempfile::tempdir()?;
        let job = ConversionJob::new("DS", dir.path(), "unused");
        let input = dir.path().join("DS.raw");
        fs::write(&input, "raw bytes")?;

        // No CDTA yet
        assert!(!job.can_reuse_existing(&input));

        // An empty CDTA is not reusable
        let cdta = dir.path().join("DS_dta.txt");
        fs::write(&cdta, "")?;
        assert!(!job.can_reuse_existing(&input));

        // A non-empty CDTA written after the input is reusable
        fs::write(&cdta, "=== \"DS.1.1.1.dta\" ===\n100.0 1\n50.0 3\n")?;
        assert!(job.can_reuse_existing(&input));
        Ok(())
    }

    #[test]
    fn test_reused_results_short_circuit() -> Result<(), JobError> {
        let dir = tempfile::tempdir().map_err(io::Error::from)?;
        fs::write(dir.path().join("DS.raw"), "raw bytes")?;
        fs::write(
            dir.path().join("DS_dta.txt"),
            "=== \"DS.1.1.1.dta\" ===\n100.0 1\n50.0 3\n",
        )?;

        // The tool path is bogus on purpose: a reused result must not launch it
        let job = ConversionJob::new("DS", dir.path(), "no-such-tool");
        let params = base_params("DeconMSn.exe", "DS.raw");
        let mut reporter = LogStatusReporter::default();

        let report = job.run(&params, &mut reporter)?;
        assert!(report.reused_existing);
        assert_eq!(report.completion, CompletionCode::Success);
        assert_eq!(report.spectra_counted, 1);
        assert_eq!(reporter.percent_complete, 100.0);
        assert!(reporter.last_update.is_some());
        Ok(())
    }

    #[test]
    fn test_missing_input_fails() {
        let dir = tempfile::tempdir().unwrap();
        let job = ConversionJob::new("DS", dir.path(), "unused");
        let params = base_params("DeconMSn.exe", "DS.raw");
        let mut reporter = LogStatusReporter::default();
        assert!(matches!(
            job.run(&params, &mut reporter),
            Err(JobError::MissingInput(_))
        ));

        let report = job.run_to_report(&params, &mut reporter);
        assert_eq!(report.completion, CompletionCode::Failed);
        assert_eq!(report.spectra_counted, 0);
    }

    #[cfg(unix)]
    mod unix {
        use super::*;
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        /// Stand in for a converter tool with a shell script that writes
        /// canned output into the working directory
        fn fake_tool(dir: &Path, body: &str) -> io::Result<PathBuf> {
            let path = dir.join("fake_tool.sh");
            fs::write(&path, format!("#!/bin/sh\n{body}\n"))?;
            let mut perms = fs::metadata(&path)?.permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms)?;
            Ok(path)
        }

        #[test_log::test]
        fn test_full_job_with_deconmsn_style_tool() -> Result<(), JobError> {
            let dir = tempfile::tempdir().map_err(io::Error::from)?;
            fs::write(dir.path().join("DS.raw"), "raw bytes")?;

            let cdta_body = "=== \"DS.100.100.2.dta\" ===\\n1482.5 2\\n121.3 500\\n";
            let tool = fake_tool(
                dir.path(),
                &format!("printf '{cdta_body}' > \"$(dirname \"$0\")/DS_dta.txt\""),
            )?;

            let job = ConversionJob::new("DS", dir.path(), &tool)
                .with_runner(ToolRunner::new(Duration::from_millis(25)));
            let params = base_params("DeconMSn.exe", "DS.raw");
            let mut reporter = LogStatusReporter::default();

            let report = job.run(&params, &mut reporter)?;
            assert_eq!(report.completion, CompletionCode::Success);
            assert!(!report.reused_existing);
            assert_eq!(report.spectra_counted, 1);
            assert!(report.zip_path.is_some());
            assert!(report.zip_path.unwrap().exists());
            assert_eq!(reporter.percent_complete, 100.0);
            Ok(())
        }

        #[test_log::test]
        fn test_job_with_no_spectra_reports_no_data() -> Result<(), JobError> {
            let dir = tempfile::tempdir().map_err(io::Error::from)?;
            fs::write(dir.path().join("DS.raw"), "raw bytes")?;

            let tool = fake_tool(
                dir.path(),
                "touch \"$(dirname \"$0\")/DS_dta.txt\"",
            )?;
            let job = ConversionJob::new("DS", dir.path(), &tool)
                .with_runner(ToolRunner::new(Duration::from_millis(25)));
            let params = base_params("DeconMSn.exe", "DS.raw");
            let mut reporter = LogStatusReporter::default();

            let report = job.run(&params, &mut reporter)?;
            assert_eq!(report.completion, CompletionCode::NoData);
            assert!(report.zip_path.is_none());
            Ok(())
        }

        #[test_log::test]
        fn test_failing_tool_surfaces_the_exit_code() -> io::Result<()> {
            let dir = tempfile::tempdir()?;
            fs::write(dir.path().join("DS.raw"), "raw bytes")?;

            let tool = fake_tool(dir.path(), "exit 5")?;
            let job = ConversionJob::new("DS", dir.path(), &tool)
                .with_runner(ToolRunner::new(Duration::from_millis(25)));
            let params = base_params("DeconMSn.exe", "DS.raw");
            let mut reporter = LogStatusReporter::default();

            let result = job.run(&params, &mut reporter);
            assert!(matches!(
                result,
                Err(JobError::Tool(ToolError::NonZeroExit { code: 5, .. }))
            ));
            Ok(())
        }

        #[test_log::test]
        fn test_job_with_centroided_merge() -> Result<(), JobError> {
            let dir = tempfile::tempdir().map_err(io::Error::from)?;
            fs::write(dir.path().join("DS.raw"), "raw bytes")?;

            // The fake tool writes the primary CDTA; the centroided file is
            // pre-staged as a second-pass product would be
            let cdta_body = "=== \"DS.100.100.2.dta\" ===\\n1482.5 2\\n121.3 500\\n\\n=== \"DS.200.205.3.dta\" ===\\n944.9 3\\n101.0 17\\n";
            let centroided_body = "\n=== \"DS.100.100.2.dta\" ===\n0.0 0\n121.30 499.5\n";
            fs::write(dir.path().join("DS_dta_centroided.txt"), centroided_body)?;

            let tool = fake_tool(
                dir.path(),
                &format!("printf '{cdta_body}' > \"$(dirname \"$0\")/DS_dta.txt\""),
            )?;
            let job = ConversionJob::new("DS", dir.path(), &tool)
                .with_runner(ToolRunner::new(Duration::from_millis(25)));
            let mut params = base_params("DeconMSn.exe", "DS.raw");
            params.set(SECTION_DTA, "MergeCentroidedDta", "true");
            let mut reporter = LogStatusReporter::default();

            let report = job.run(&params, &mut reporter)?;
            assert_eq!(report.completion, CompletionCode::Success);
            // Scan 200 has no centroided partner and is dropped by the merge
            assert_eq!(report.spectra_counted, 1);
            assert_eq!(report.spectra_skipped, 1);

            let text = fs::read_to_string(&report.cdta_path)?;
            // Parent metadata with centroided peaks
            assert!(text.contains("1482.5 2"));
            assert!(text.contains("121.30 499.5"));
            assert!(!text.contains("121.3 500"));
            Ok(())
        }
    }
}
