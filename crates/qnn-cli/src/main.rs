// SPDX-License-Identifier: AGPL-3.0-only

//! `qnn`: command-line interface for the fixed-point digit-classifier
//! accelerator.
//!
//! ```text
//! USAGE:
//!   qnn infer                 Trace one sample through the reference engine
//!   qnn fixtures              Write hex test vectors for the RTL test bench
//!   qnn compare [--simulate]  Compare device scores with the reference
//!   qnn upload-weights        Send the model's weight memory image
//!   qnn send-image            Upload one sample image
//!   qnn read-scores           Read the ten class scores
//!   qnn read-digit            Read the predicted digit
//!   qnn mem2bin <in> <out>    Convert .mem hex files to raw binaries
//! ```
//!
//! The serial port must already be configured (`stty -F /dev/ttyUSB0 115200 raw`).

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use qnn_chip::timing;
use qnn_driver::{
    ComparisonHarness, HarnessConfig, OutputMode, ProtocolConfig, ReadMode, SerialTransport,
    SimulatedDevice, TextReport, Transport, WireProtocol,
};
use qnn_models::fixtures::{generate_fixtures, read_expected};
use qnn_models::{
    mem, Architecture, HardwareProfile, InferenceEngine, OverflowPolicy, QuantizedModel,
    SampleSet,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "qnn", about = "Fixed-point accelerator validation CLI", version)]
struct Cli {
    /// Log progress at info level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run one sample through the reference engine and print every layer.
    Infer {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        samples: SampleArgs,
        /// Sample index.
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Generate hex fixtures (pixels, scores, predictions, labels).
    Fixtures {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        samples: SampleArgs,
        /// Output directory.
        #[arg(long, default_value = "test_vectors")]
        out: PathBuf,
        /// Read the written fixtures back and check them against the engine.
        #[arg(long)]
        verify: bool,
    },
    /// Compare device output with the reference engine.
    Compare {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        samples: SampleArgs,
        #[command(flatten)]
        link: LinkArgs,
        /// Use the in-process simulated accelerator instead of the port.
        #[arg(long)]
        simulate: bool,
        /// Also read the digit register (0xCC) after the scores.
        #[arg(long)]
        read_digit: bool,
        /// Upload the model weights before comparing.
        #[arg(long)]
        upload_weights: bool,
        /// Report destination.
        #[arg(long, default_value = "both")]
        output: OutputMode,
        /// Report file.
        #[arg(long, default_value = "comparison_results.txt")]
        report: PathBuf,
    },
    /// Upload the model's weights and biases to the device.
    UploadWeights {
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Upload one sample image and wait for the inference.
    SendImage {
        #[command(flatten)]
        samples: SampleArgs,
        #[command(flatten)]
        link: LinkArgs,
        /// Sample index.
        #[arg(long, default_value_t = 0)]
        index: usize,
    },
    /// Read the ten class scores of the last inference.
    ReadScores {
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Read the predicted digit of the last inference.
    ReadDigit {
        #[command(flatten)]
        link: LinkArgs,
    },
    /// Convert a .mem file (or every .mem file in a directory) to binary.
    Mem2bin {
        /// Input .mem file or directory.
        input: PathBuf,
        /// Output .bin file or directory.
        output: PathBuf,
    },
}

#[derive(Args)]
struct ModelArgs {
    /// Architecture preset (regression, mlp, simple-cnn, cnn).
    #[arg(long, default_value = "mlp")]
    arch: Architecture,
    /// Directory holding the weight and bias blobs (.bin or .mem).
    #[arg(long, env = "QNN_WEIGHTS_DIR", default_value = "outputs/bin")]
    weights_dir: PathBuf,
    /// Overflow policy for every layer (wrap32, saturate64).
    #[arg(long)]
    policy: Option<OverflowPolicy>,
    /// Requantization shift for the hidden layers.
    #[arg(long)]
    shift: Option<u32>,
}

impl ModelArgs {
    fn profile(&self) -> Result<HardwareProfile> {
        let mut profile = self.arch.default_profile();
        if let Some(policy) = self.policy {
            profile = profile.with_uniform_policy(policy);
        }
        if let Some(shift) = self.shift {
            profile = profile.with_hidden_shift(shift)?;
        }
        Ok(profile)
    }

    fn load(&self) -> Result<(InferenceEngine, HardwareProfile)> {
        let profile = self.profile()?;
        let model = QuantizedModel::load_dir(&self.weights_dir, self.arch, &profile)
            .with_context(|| format!("loading {} weights from {}", self.arch, self.weights_dir.display()))?;
        tracing::info!("Loaded {model} ({} parameters)", model.parameter_count());
        Ok((InferenceEngine::new(model), profile))
    }
}

#[derive(Args)]
struct SampleArgs {
    /// Fixture directory or directory with images.bin + labels.bin.
    #[arg(long, default_value = "outputs/test_vectors")]
    samples: PathBuf,
    /// Use only the first N samples.
    #[arg(long)]
    limit: Option<usize>,
}

impl SampleArgs {
    fn load(&self) -> Result<SampleSet> {
        let set = SampleSet::load(&self.samples)
            .with_context(|| format!("loading samples from {}", self.samples.display()))?;
        Ok(match self.limit {
            Some(n) => set.truncated(n),
            None => set,
        })
    }
}

#[derive(Args)]
struct LinkArgs {
    /// Serial device, configured beforehand (baud, raw mode).
    #[arg(long, env = "QNN_PORT", default_value = "/dev/ttyUSB0")]
    port: PathBuf,
    /// Wait after an image upload before reading, in milliseconds.
    #[arg(long)]
    inference_delay_ms: Option<u64>,
    /// Scores response timeout in milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Keep unread input instead of discarding it before each read.
    #[arg(long)]
    keep_stale_input: bool,
}

impl LinkArgs {
    fn config(&self) -> ProtocolConfig {
        let mut config = ProtocolConfig::default();
        if let Some(ms) = self.inference_delay_ms {
            config.inference_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timeout_ms {
            config.response_timeout = Duration::from_millis(ms);
        }
        config.discard_stale_input = !self.keep_stale_input;
        config
    }

    fn open(&self) -> Result<WireProtocol<SerialTransport>> {
        let transport = SerialTransport::open(&self.port)
            .with_context(|| format!("opening {}", self.port.display()))?;
        let mut protocol = WireProtocol::new(transport, self.config());
        protocol.settle()?;
        Ok(protocol)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()),
        )
        .init();

    match cli.command {
        Cmd::Infer {
            model,
            samples,
            index,
        } => cmd_infer(&model, &samples, index)?,
        Cmd::Fixtures {
            model,
            samples,
            out,
            verify,
        } => cmd_fixtures(&model, &samples, &out, verify)?,
        Cmd::Compare {
            model,
            samples,
            link,
            simulate,
            read_digit,
            upload_weights,
            output,
            report,
        } => {
            let opts = CompareOpts {
                simulate,
                read_digit,
                upload_weights,
                output,
                report,
            };
            cmd_compare(&model, &samples, &link, &opts)?;
        }
        Cmd::UploadWeights { model, link } => cmd_upload_weights(&model, &link)?,
        Cmd::SendImage {
            samples,
            link,
            index,
        } => cmd_send_image(&samples, &link, index)?,
        Cmd::ReadScores { link } => cmd_read_scores(&link)?,
        Cmd::ReadDigit { link } => cmd_read_digit(&link)?,
        Cmd::Mem2bin { input, output } => cmd_mem2bin(&input, &output)?,
    }

    Ok(())
}

fn cmd_infer(model: &ModelArgs, samples: &SampleArgs, index: usize) -> Result<()> {
    let (engine, profile) = model.load()?;
    let set = samples.load()?;
    let sample = set
        .get(index)
        .with_context(|| format!("sample {index} out of range ({} samples)", set.len()))?;

    let trace = engine.trace(&sample.pixels)?;
    println!("Model   : {}", engine.model());
    println!("Profile : {profile}");
    println!("Sample  : {index} (label {})", sample.label);
    println!();
    for layer in &trace.layers {
        println!(
            "  {:<12} {:<8} {:<14} overflows {}",
            layer.name,
            layer.layer_type.to_string(),
            layer.output.shape().to_string(),
            layer.overflows
        );
    }
    println!();
    println!("Scores     : {}", trace.inference.scores);
    println!("Prediction : {}", trace.inference.prediction);
    if trace.total_overflows() > 0 {
        println!("Overflows  : {}", trace.total_overflows());
    }
    Ok(())
}

fn cmd_fixtures(model: &ModelArgs, samples: &SampleArgs, out: &Path, verify: bool) -> Result<()> {
    let (engine, _) = model.load()?;
    let set = samples.load()?;
    let cancel = interrupt_flag()?;
    let summary = generate_fixtures(&engine, &set, out, &cancel)
        .with_context(|| format!("writing fixtures to {}", out.display()))?;
    println!(
        "Wrote {} fixtures to {} (reference accuracy {:.2}%)",
        summary.written,
        out.display(),
        summary.accuracy()
    );
    if summary.interrupted {
        println!("Interrupted: fixtures cover the first {} samples", summary.written);
        return Ok(());
    }

    if verify {
        let expected = read_expected(out)?;
        let actual = engine.infer_batch(&set.samples()[..expected.len().min(set.len())])?;
        if let Some(i) = expected.iter().zip(&actual).position(|(e, a)| e != a) {
            bail!("fixture {i} does not match the engine after read-back");
        }
        println!("Verified {} fixtures", expected.len());
    }
    Ok(())
}

struct CompareOpts {
    simulate: bool,
    read_digit: bool,
    upload_weights: bool,
    output: OutputMode,
    report: PathBuf,
}

fn cmd_compare(
    model: &ModelArgs,
    samples: &SampleArgs,
    link: &LinkArgs,
    opts: &CompareOpts,
) -> Result<()> {
    let (engine, profile) = model.load()?;
    let set = samples.load()?;

    let mut protocol: WireProtocol<Box<dyn Transport>> = if opts.simulate {
        let device = SimulatedDevice::new(engine.clone()).with_profile(profile.clone());
        let mut config = link.config();
        config.inference_delay = Duration::ZERO;
        config.upload_chunk_delay = Duration::ZERO;
        config.settle_delay = Duration::ZERO;
        WireProtocol::new(Box::new(device) as Box<dyn Transport>, config)
    } else {
        let transport = SerialTransport::open(&link.port)
            .with_context(|| format!("opening {}", link.port.display()))?;
        let mut protocol = WireProtocol::new(Box::new(transport) as Box<dyn Transport>, link.config());
        protocol.settle()?;
        protocol
    };

    if opts.upload_weights {
        protocol.upload_weights(engine.model().weights_payload()?)?;
    }

    let config = HarnessConfig {
        read_mode: if opts.read_digit {
            ReadMode::ScoresAndDigit
        } else {
            ReadMode::Scores
        },
        ..HarnessConfig::default()
    };
    let mut harness = ComparisonHarness::new(engine, protocol, config)
        .with_profile_description(profile.to_string())
        .with_cancel_flag(interrupt_flag()?);
    let mut report = TextReport::open(opts.output, &opts.report)?;
    let summary = harness.run(&set, &mut report)?;

    if opts.output == OutputMode::File {
        println!(
            "{} / {} match, {} mismatch, {} error; report in {}",
            summary.matches,
            summary.total,
            summary.mismatches,
            summary.errors,
            opts.report.display()
        );
    }
    Ok(())
}

/// Flag raised by the first Ctrl-C; a second one exits immediately.
fn interrupt_flag() -> Result<Arc<AtomicBool>> {
    let flag = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&flag);
    ctrlc::set_handler(move || {
        if handler_flag.swap(true, Ordering::Relaxed) {
            std::process::exit(130);
        }
        eprintln!("Interrupted: stopping after the current sample (Ctrl-C again to abort)");
    })
    .context("installing the Ctrl-C handler")?;
    Ok(flag)
}

fn cmd_upload_weights(model: &ModelArgs, link: &LinkArgs) -> Result<()> {
    let (engine, _) = model.load()?;
    let payload = engine.model().weights_payload()?;
    let mut protocol = link.open()?;
    let wire_time = timing::transmission_time(payload.len() + 4, timing::REFERENCE_BAUD);
    println!(
        "Uploading {} bytes of {} weights (~{:.1} s at {} baud) ...",
        payload.len(),
        model.arch,
        wire_time.as_secs_f64(),
        timing::REFERENCE_BAUD
    );
    protocol.upload_weights(payload)?;
    println!("Done.");
    Ok(())
}

fn cmd_send_image(samples: &SampleArgs, link: &LinkArgs, index: usize) -> Result<()> {
    let set = samples.load()?;
    let sample = set
        .get(index)
        .with_context(|| format!("sample {index} out of range ({} samples)", set.len()))?;
    let mut protocol = link.open()?;
    protocol.upload_image(&sample.pixels)?;
    println!("Sent image {index} (label {})", sample.label);
    Ok(())
}

fn cmd_read_scores(link: &LinkArgs) -> Result<()> {
    let mut protocol = link.open()?;
    let scores = protocol.read_scores()?;
    println!("Scores     : {scores}");
    println!("Prediction : {}", scores.prediction());
    Ok(())
}

fn cmd_read_digit(link: &LinkArgs) -> Result<()> {
    let mut protocol = link.open()?;
    println!("Digit: {}", protocol.read_digit()?);
    Ok(())
}

fn cmd_mem2bin(input: &Path, output: &Path) -> Result<()> {
    let conversions = if input.is_dir() {
        mem::convert_dir(input, output)?
    } else {
        vec![mem::mem_to_bin(input, output)?]
    };
    for c in &conversions {
        println!(
            "{} -> {} ({} x {}, {} bytes)",
            c.source.display(),
            c.target.display(),
            c.values,
            c.width,
            c.bytes
        );
    }
    println!("Converted {} file(s)", conversions.len());
    Ok(())
}
