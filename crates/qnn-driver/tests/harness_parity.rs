//! Harness runs against the simulated accelerator, including injected
//! device faults.

use qnn_driver::{
    ComparisonHarness, ComparisonRecord, ComparisonStatus, ComparisonSummary, Fault,
    HarnessConfig, OutputMode, ProtocolConfig, ReadMode, RecordSink, RunHeader, SimulatedDevice,
    TextReport, WireProtocol,
};
use qnn_models::{
    Architecture, HardwareProfile, InferenceEngine, QuantizedModel, Sample, SampleSet,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const PIXELS: usize = 784;

/// Regression payload where class `c` scores `scale * pixel[c] + bias[c]`
fn diagonal_payload(scale: i8, biases: [i32; 10]) -> Vec<u8> {
    let mut payload = vec![0u8; 10 * PIXELS];
    for class in 0..10 {
        payload[class * PIXELS + class] = scale as u8;
    }
    payload.extend(biases.iter().flat_map(|b| b.to_le_bytes()));
    payload
}

fn engine(scale: i8, biases: [i32; 10]) -> InferenceEngine {
    let model = QuantizedModel::from_payload(
        Architecture::Regression,
        &HardwareProfile::regression(),
        diagonal_payload(scale, biases),
    )
    .unwrap();
    InferenceEngine::new(model)
}

/// Sample `i` lights pixel `i % 10`, so its reference prediction is `i % 10`
fn samples(n: usize) -> SampleSet {
    let samples = (0..n)
        .map(|i| {
            let mut pixels = vec![0i8; PIXELS];
            pixels[i % 10] = 50;
            Sample {
                pixels,
                label: (i % 10) as u8,
            }
        })
        .collect();
    SampleSet::new(samples).unwrap()
}

fn harness(device: SimulatedDevice, read_mode: ReadMode) -> ComparisonHarness<SimulatedDevice> {
    let reference = device.engine().clone();
    let protocol = WireProtocol::new(device, ProtocolConfig::immediate());
    let config = HarnessConfig {
        read_mode,
        ..HarnessConfig::default()
    };
    ComparisonHarness::new(reference, protocol, config)
}

fn statuses(records: &[ComparisonRecord]) -> Vec<&ComparisonStatus> {
    records.iter().map(|r| &r.status).collect()
}

#[test]
fn simulator_matches_reference() {
    let device = SimulatedDevice::new(engine(1, [0; 10]));
    let mut h = harness(device, ReadMode::Scores);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(12), &mut records).unwrap();

    assert_eq!(summary.total, 12);
    assert_eq!(summary.matches, 12);
    assert_eq!(summary.device_correct, 12);
    assert!((summary.percent(summary.matches) - 100.0).abs() < f64::EPSILON);
    assert_eq!(h.protocol().transport().stats().images, 12);
    assert_eq!(h.protocol().transport().stats().score_reads, 12);
}

#[test]
fn truncated_response_is_error_and_run_continues() {
    let mut device = SimulatedDevice::new(engine(1, [0; 10]));
    device.inject(Fault::Truncate(30));
    let mut h = harness(device, ReadMode::Scores);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(3), &mut records).unwrap();

    assert_eq!(records.len(), 3);
    match &records[0].status {
        ComparisonStatus::Error { reason } => {
            assert!(reason.contains("expected 40 bytes, got 30"), "{reason}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert!(records[0].device.is_none());
    assert_eq!(
        statuses(&records[1..]),
        [&ComparisonStatus::Match, &ComparisonStatus::Match]
    );
    assert_eq!((summary.errors, summary.matches), (1, 2));
    assert_eq!(summary.reference_correct, 3);
    assert_eq!(summary.device_correct, 2);
}

#[test]
fn silent_device_is_error() {
    let mut device = SimulatedDevice::new(engine(1, [0; 10]));
    device.inject(Fault::Silent);
    let mut h = harness(device, ReadMode::Scores);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    h.run(&samples(2), &mut records).unwrap();
    assert!(matches!(
        &records[0].status,
        ComparisonStatus::Error { reason } if reason.starts_with("No response")
    ));
    assert_eq!(records[1].status, ComparisonStatus::Match);
}

#[test]
fn corrupted_score_is_mismatch_with_max_diff() {
    let mut device = SimulatedDevice::new(engine(1, [0; 10]));
    device.inject(Fault::CorruptScore { class: 6, delta: -9 });
    let mut h = harness(device, ReadMode::Scores);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(1), &mut records).unwrap();
    assert_eq!(
        records[0].status,
        ComparisonStatus::Mismatch { max_abs_diff: 9 }
    );
    assert_eq!(summary.mismatches, 1);
}

#[test]
fn stale_bytes_are_discarded_before_reads() {
    let mut device = SimulatedDevice::new(engine(1, [0; 10]));
    device.inject_noise(&[0xDE, 0xAD, 0xBE, 0xEF]);
    let mut h = harness(device, ReadMode::Scores);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(2), &mut records).unwrap();
    assert_eq!(summary.matches, 2);
}

#[test]
fn digit_mode_reads_digit_register() {
    let device = SimulatedDevice::new(engine(1, [0; 10]));
    let mut h = harness(device, ReadMode::ScoresAndDigit);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(4), &mut records).unwrap();
    assert_eq!(summary.matches, 4);
    assert_eq!(records[3].device.unwrap().digit.map(|d| d.index()), Some(3));
    assert_eq!(h.protocol().transport().stats().digit_reads, 4);
}

#[test]
fn digit_disagreement_is_mismatch() {
    let mut device = SimulatedDevice::new(engine(1, [0; 10]));
    // scores pass through untouched, the digit read answers 8
    device.inject(Fault::CorruptScore { class: 0, delta: 0 });
    device.inject(Fault::RawDigit(0x08));
    let mut h = harness(device, ReadMode::ScoresAndDigit);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    h.run(&samples(1), &mut records).unwrap();
    assert_eq!(
        records[0].status,
        ComparisonStatus::Mismatch { max_abs_diff: 0 }
    );
    assert_eq!(records[0].device.unwrap().prediction.index(), 8);
}

#[test]
fn invalid_digit_is_error() {
    let mut device = SimulatedDevice::new(engine(1, [0; 10]));
    device.inject(Fault::CorruptScore { class: 0, delta: 0 });
    device.inject(Fault::RawDigit(0x0F));
    let mut h = harness(device, ReadMode::ScoresAndDigit);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(2), &mut records).unwrap();
    assert!(matches!(records[0].status, ComparisonStatus::Error { .. }));
    assert_eq!(records[1].status, ComparisonStatus::Match);
    assert_eq!(summary.errors, 1);
}

#[test]
fn uploaded_weights_replace_device_model() {
    // device starts with different weights than the reference
    let device = SimulatedDevice::new(engine(2, [0; 10]));
    let reference = engine(1, [1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
    let mut protocol = WireProtocol::new(device, ProtocolConfig::immediate());
    protocol
        .upload_weights(reference.model().weights_payload().unwrap())
        .unwrap();
    assert_eq!(protocol.transport().stats().weight_uploads, 1);

    let mut h = ComparisonHarness::new(reference, protocol, HarnessConfig::default());
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(5), &mut records).unwrap();
    assert_eq!(summary.matches, 5);
}

#[test]
fn mismatched_models_disagree() {
    let device = SimulatedDevice::new(engine(2, [0; 10]));
    let reference = engine(1, [0; 10]);
    let protocol = WireProtocol::new(device, ProtocolConfig::immediate());
    let mut h = ComparisonHarness::new(reference, protocol, HarnessConfig::default());
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(3), &mut records).unwrap();
    assert_eq!(summary.mismatches, 3);
    assert_eq!(
        records[0].status,
        ComparisonStatus::Mismatch { max_abs_diff: 50 }
    );
    // argmax still agrees with the label
    assert_eq!(summary.device_correct, 3);
}

#[test]
fn cancelled_run_is_interrupted() {
    let device = SimulatedDevice::new(engine(1, [0; 10]));
    let mut h = harness(device, ReadMode::Scores);
    h.cancel_flag().store(true, Ordering::Relaxed);
    let mut records: Vec<ComparisonRecord> = Vec::new();
    let summary = h.run(&samples(5), &mut records).unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.total, 0);
    assert!(records.is_empty());
}

#[test]
fn text_report_on_disk() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("comparison.txt");
    let mut device = SimulatedDevice::new(engine(1, [0; 10]));
    device.inject(Fault::Truncate(30));
    let mut h = harness(device, ReadMode::Scores)
        .with_profile_description(HardwareProfile::regression().to_string());
    let mut report = TextReport::open(OutputMode::File, &path).unwrap();
    h.run(&samples(3), &mut report).unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("Profile:   regression-wrap32"));
    assert!(text.contains("Transport: Simulated"));
    assert!(text.contains("Status: ERROR"));
    assert_eq!(text.matches("Status: MATCH").count(), 2);
    assert!(text.contains("Errors:             1 (33.33%)"));
}

/// Text report that raises the cancel flag once `after` records are written
struct CancelAfter {
    report: TextReport,
    after: usize,
    seen: usize,
    cancel: Arc<AtomicBool>,
}

impl RecordSink for CancelAfter {
    fn begin(&mut self, header: &RunHeader) -> qnn_driver::Result<()> {
        self.report.begin(header)
    }

    fn record(&mut self, record: &ComparisonRecord) -> qnn_driver::Result<()> {
        self.report.record(record)?;
        self.seen += 1;
        if self.seen == self.after {
            self.cancel.store(true, Ordering::Relaxed);
        }
        Ok(())
    }

    fn finish(&mut self, summary: &ComparisonSummary) -> qnn_driver::Result<()> {
        self.report.finish(summary)
    }
}

#[test]
fn interrupt_mid_run_keeps_report_consistent() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("comparison.txt");
    let cancel = Arc::new(AtomicBool::new(false));
    let device = SimulatedDevice::new(engine(1, [0; 10]));
    let mut h = harness(device, ReadMode::Scores).with_cancel_flag(Arc::clone(&cancel));
    let mut sink = CancelAfter {
        report: TextReport::open(OutputMode::File, &path).unwrap(),
        after: 3,
        seen: 0,
        cancel,
    };
    let summary = h.run(&samples(8), &mut sink).unwrap();

    assert!(summary.interrupted);
    assert_eq!((summary.total, summary.matches), (3, 3));
    assert_eq!(h.protocol().transport().stats().images, 3);

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.matches("Status: MATCH").count(), 3);
    assert!(text.contains("Run interrupted"));
    assert!(text.contains("Total images:       3"));
}
