//! Integration tests for calibration persistence
//!
//! A filter restored from disk must make exactly the same decisions as the
//! filter that saved it, and a failed load must leave the current state alone.

use std::f32::consts::PI;
use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use biominer::calibration::{CalibrationFactor, CalibrationFilter};
use biominer::config::CalibrationConfig;
use biominer::error::{CalibrationError, IoError};
use biominer::mining::{Difficulty, MiningResult};
use biominer::SignalFrame;

fn temp_path(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!(
        "biominer_{}_{}_{}.json",
        name,
        std::process::id(),
        nanos
    ))
}

/// Slow carrier on even electrodes, fast carrier on odd ones
fn frames(count: usize, electrodes: usize) -> Vec<SignalFrame> {
    (0..count)
        .map(|i| {
            let voltages = (0..electrodes)
                .map(|e| {
                    let period = if e % 2 == 0 { 64.0 } else { 3.0 };
                    (2.0 * PI * i as f32 / period).sin() * 40.0
                })
                .collect();
            SignalFrame::new(1, i as u64, i as u64 * 4000, voltages)
        })
        .collect()
}

fn result(run_id: u64, success: bool) -> MiningResult {
    MiningResult {
        run_id,
        success,
        nonce: if success { Some(7) } else { None },
        header_hash: None,
        attempts: 10,
        hashes_computed: 10,
        elapsed_ms: 1,
        hash_value: 0,
        difficulty: Difficulty::MIN,
        calibration: CalibrationFactor::BASELINE,
    }
}

#[test]
fn test_restored_filter_makes_identical_decisions() {
    let path = temp_path("identical");
    let window = frames(128, 6);

    let mut original = CalibrationFilter::new(CalibrationConfig::default());
    original.run_calibration_cycle(&window).unwrap();
    original.apply_mining_feedback(&result(1, true));
    original.apply_mining_feedback(&result(2, false));
    original.save(&path).unwrap();

    let mut restored = CalibrationFilter::new(CalibrationConfig::default());
    let loaded = restored.load(&path).unwrap();
    assert_eq!(loaded, original.factor());
    assert_eq!(restored.state(), original.state());

    let next = frames(96, 6);
    assert_eq!(
        original.run_calibration_cycle(&next).unwrap(),
        restored.run_calibration_cycle(&next).unwrap()
    );
    assert_eq!(
        original.apply_mining_feedback(&result(3, true)),
        restored.apply_mining_feedback(&result(3, true))
    );
    assert_eq!(restored.state(), original.state());

    let _ = fs::remove_file(&path);
}

#[test]
fn test_missing_file_keeps_current_state() {
    let mut filter = CalibrationFilter::new(CalibrationConfig::default());
    filter.run_calibration_cycle(&frames(128, 4)).unwrap();
    let before = filter.state().clone();

    let err = filter.load(temp_path("missing")).unwrap_err();
    assert!(matches!(err, IoError::NotFound { .. }));
    assert_eq!(filter.state(), &before);
}

#[test]
fn test_corrupt_file_keeps_current_state() {
    let path = temp_path("corrupt");
    fs::write(&path, "{ \"factor\": 0.7, \"weights\": [").unwrap();

    let mut filter = CalibrationFilter::new(CalibrationConfig::default());
    filter.apply_mining_feedback(&result(1, true));
    let before = filter.factor();

    let err = filter.load(&path).unwrap_err();
    assert!(matches!(err, IoError::ParseError { .. }));
    assert_eq!(filter.factor(), before);

    let _ = fs::remove_file(&path);
}

#[test]
fn test_inconsistent_state_is_rejected() {
    let path = temp_path("inconsistent");
    let mut filter = CalibrationFilter::new(CalibrationConfig::default());
    filter.run_calibration_cycle(&frames(64, 4)).unwrap();
    filter.save(&path).unwrap();

    let mut json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
    json["weights"] = serde_json::json!([1.0, 1.0]);
    fs::write(&path, json.to_string()).unwrap();

    let mut fresh = CalibrationFilter::new(CalibrationConfig::default());
    assert!(matches!(
        fresh.load(&path).unwrap_err(),
        IoError::ParseError { .. }
    ));
    assert_eq!(fresh.factor(), CalibrationFactor::BASELINE);

    let _ = fs::remove_file(&path);
}

#[test]
fn test_factor_cell_follows_load() {
    let path = temp_path("cell");
    let mut source = CalibrationFilter::new(CalibrationConfig::default());
    for run_id in 0..5 {
        source.apply_mining_feedback(&result(run_id, true));
    }
    source.save(&path).unwrap();

    let mut target = CalibrationFilter::new(CalibrationConfig::default());
    let cell = target.factor_cell();
    let generation = cell.generation();
    target.load(&path).unwrap();

    assert_eq!(cell.snapshot(), source.factor());
    assert!(cell.generation() > generation);

    let _ = fs::remove_file(&path);
}

#[test]
fn test_state_for_other_electrode_count_is_rejected() {
    let path = temp_path("mismatch");
    let mut six = CalibrationFilter::new(CalibrationConfig::default());
    six.run_calibration_cycle(&frames(128, 6)).unwrap();
    six.apply_mining_feedback(&result(1, true));
    six.save(&path).unwrap();

    let mut four = CalibrationFilter::new(CalibrationConfig::default());
    four.run_calibration_cycle(&frames(128, 4)).unwrap();
    let before = four.state().clone();

    let err = four.load_matching(&path, 4).unwrap_err();
    assert_eq!(
        err,
        CalibrationError::ElectrodeMismatch {
            expected: 4,
            found: 6
        }
    );
    assert_eq!(four.state(), &before);

    assert_eq!(four.load_matching(&path, 6).unwrap(), six.factor());
    assert_eq!(four.state(), six.state());

    let _ = fs::remove_file(&path);
}

#[test]
fn test_uncommitted_state_fits_any_device() {
    let path = temp_path("uncommitted");
    let mut source = CalibrationFilter::new(CalibrationConfig::default());
    source.apply_mining_feedback(&result(1, true));
    source.save(&path).unwrap();

    let mut target = CalibrationFilter::new(CalibrationConfig::default());
    assert_eq!(target.load_matching(&path, 8).unwrap(), source.factor());

    let _ = fs::remove_file(&path);
}
