//! Comparison report sinks.
//!
//! The harness hands every record to a [`RecordSink`] as soon as it is
//! classified. [`TextReport`] flushes each block as it is written, so a
//! report on disk is valid up to the last finished sample even if the
//! process dies mid-run.

use crate::error::Result;
use crate::harness::{ComparisonRecord, ComparisonStatus, ComparisonSummary};
use crate::transport::TransportType;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Description of a comparison run, written once before the first record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHeader {
    /// Model description (architecture, input shape, profile name)
    pub model: String,
    /// Per-layer arithmetic settings, if known
    pub profile: Option<String>,
    /// Link to the device
    pub transport: TransportType,
    /// Samples queued
    pub samples: usize,
}

/// Consumer of comparison output
pub trait RecordSink {
    /// Called once before the first record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the sink cannot be written.
    fn begin(&mut self, header: &RunHeader) -> Result<()>;

    /// Called once per classified sample.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the sink cannot be written.
    fn record(&mut self, record: &ComparisonRecord) -> Result<()>;

    /// Called once after the last record.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the sink cannot be written.
    fn finish(&mut self, summary: &ComparisonSummary) -> Result<()>;
}

/// Collects records in memory
impl RecordSink for Vec<ComparisonRecord> {
    fn begin(&mut self, _header: &RunHeader) -> Result<()> {
        Ok(())
    }

    fn record(&mut self, record: &ComparisonRecord) -> Result<()> {
        self.push(record.clone());
        Ok(())
    }

    fn finish(&mut self, _summary: &ComparisonSummary) -> Result<()> {
        Ok(())
    }
}

/// Where a text report goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    /// Report file only
    File,
    /// Standard output only
    Console,
    /// Both
    #[default]
    Both,
}

impl std::str::FromStr for OutputMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "console" => Ok(Self::Console),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown output mode '{other}' (file|console|both)")),
        }
    }
}

impl std::fmt::Display for OutputMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Console => write!(f, "console"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// Human-readable report over one or more writers
pub struct TextReport {
    outputs: Vec<Box<dyn Write + Send>>,
}

impl std::fmt::Debug for TextReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextReport")
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl TextReport {
    /// Report written to every writer in `outputs`
    pub fn new(outputs: Vec<Box<dyn Write + Send>>) -> Self {
        Self { outputs }
    }

    /// Report for `mode`, creating `path` when a file is involved.
    ///
    /// # Errors
    ///
    /// Returns `Io` if the report file cannot be created.
    pub fn open(mode: OutputMode, path: impl AsRef<Path>) -> Result<Self> {
        let mut outputs: Vec<Box<dyn Write + Send>> = Vec::new();
        if matches!(mode, OutputMode::File | OutputMode::Both) {
            let file = File::create(path.as_ref())?;
            tracing::info!("Writing report to {}", path.as_ref().display());
            outputs.push(Box::new(BufWriter::new(file)));
        }
        if matches!(mode, OutputMode::Console | OutputMode::Both) {
            outputs.push(Box::new(io::stdout()));
        }
        Ok(Self::new(outputs))
    }

    fn emit(&mut self, text: &str) -> Result<()> {
        for out in &mut self.outputs {
            out.write_all(text.as_bytes())?;
            out.flush()?;
        }
        Ok(())
    }
}

const RULE: &str = "================================================================================";

/// Render the run header
pub fn format_header(header: &RunHeader) -> String {
    let mut s = format!("{RULE}\nHARDWARE / REFERENCE COMPARISON\n{RULE}\n");
    s.push_str(&format!("Model:     {}\n", header.model));
    if let Some(profile) = &header.profile {
        s.push_str(&format!("Profile:   {profile}\n"));
    }
    s.push_str(&format!("Transport: {}\n", header.transport));
    s.push_str(&format!("Samples:   {}\n{RULE}\n", header.samples));
    s
}

/// Render one sample block
pub fn format_record(r: &ComparisonRecord) -> String {
    let mut s = format!(
        "Image {:3} | Label: {} | Reference Pred: {} | Reference: {}\n",
        r.index, r.label, r.reference.prediction, r.reference.scores
    );
    if let Some(device) = &r.device {
        s.push_str(&format!(
            "          |          | Device Pred:    {} | Device:    {}\n",
            device.prediction, device.scores
        ));
    }
    match &r.status {
        ComparisonStatus::Match => s.push_str("Status: MATCH\n"),
        ComparisonStatus::Mismatch { max_abs_diff } => {
            s.push_str(&format!("Status: MISMATCH (max diff: {max_abs_diff})\n"));
        }
        ComparisonStatus::Error { reason } => {
            s.push_str(&format!("Status: ERROR ({reason})\n"));
        }
    }
    s.push('\n');
    s
}

/// Render the aggregate summary
pub fn format_summary(sum: &ComparisonSummary) -> String {
    let mut s = format!("{RULE}\nSUMMARY\n{RULE}\n");
    if sum.interrupted {
        s.push_str("Run interrupted; counts cover completed samples only\n");
    }
    s.push_str(&format!("Total images:       {}\n", sum.total));
    s.push_str(&format!(
        "Matches:            {} ({:.2}%)\n",
        sum.matches,
        sum.percent(sum.matches)
    ));
    s.push_str(&format!(
        "Mismatches:         {} ({:.2}%)\n",
        sum.mismatches,
        sum.percent(sum.mismatches)
    ));
    s.push_str(&format!(
        "Errors:             {} ({:.2}%)\n",
        sum.errors,
        sum.percent(sum.errors)
    ));
    s.push_str(&format!(
        "Reference accuracy: {:.2}%\n",
        sum.percent(sum.reference_correct)
    ));
    s.push_str(&format!(
        "Device accuracy:    {:.2}%\n{RULE}\n",
        sum.percent(sum.device_correct)
    ));
    s
}

impl RecordSink for TextReport {
    fn begin(&mut self, header: &RunHeader) -> Result<()> {
        self.emit(&format_header(header))
    }

    fn record(&mut self, record: &ComparisonRecord) -> Result<()> {
        self.emit(&format_record(record))
    }

    fn finish(&mut self, summary: &ComparisonSummary) -> Result<()> {
        self.emit(&format_summary(summary))
    }
}
