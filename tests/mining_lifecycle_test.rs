//! Integration tests for the mining engine through the public API

use std::time::Duration;

use biominer::calibration::{CalibrationFactor, FactorCell};
use biominer::config::EngineConfig;
use biominer::events::{CoreEvent, EventBus, EventReceiver};
use biominer::mining::{
    hash_value, to_display_hex, BlockHeaderTemplate, Difficulty, EngineState, MiningConfig,
    MiningEngine, MiningResult, NonceSchedule, OptimizationStrategy,
};

fn engine_config() -> EngineConfig {
    EngineConfig {
        initial_difficulty: 1,
        cancel_check_interval: 128,
        progress_interval_ms: 10,
        hashrate_interval_ms: 25,
        hashrate_window_ms: 250,
        feedback_wait_ms: 10,
    }
}

fn setup() -> (MiningEngine, EventReceiver) {
    let bus = EventBus::new(8192);
    let rx = bus.subscribe();
    (MiningEngine::new(engine_config(), bus), rx)
}

fn next_result(rx: &mut EventReceiver) -> MiningResult {
    match rx
        .wait_for(Duration::from_secs(30), |e| matches!(e, CoreEvent::MiningComplete(_)))
        .map(|e| e.event)
    {
        Some(CoreEvent::MiningComplete(result)) => result,
        other => panic!("expected MiningComplete, got {:?}", other),
    }
}

#[test]
fn test_reported_nonce_meets_difficulty() {
    let (engine, mut rx) = setup();
    let difficulty = Difficulty::new(1 << 10).unwrap();
    engine.adjust_difficulty(difficulty).unwrap();

    let config = MiningConfig {
        max_attempts: 1 << 18,
        strategy: OptimizationStrategy::CalibratedOffset,
        signal_weight: 0.8,
        ..MiningConfig::default()
    };
    let factor = CalibrationFactor::new(0.65);
    engine.start(config.clone(), factor).unwrap();
    let result = next_result(&mut rx);

    assert!(result.success);
    let nonce = result.nonce.unwrap();
    let hash = config.header.hash(nonce);
    assert!(difficulty.is_met_by(hash_value(&hash)));
    assert_eq!(result.hash_value, hash_value(&hash));
    assert_eq!(result.header_hash, Some(to_display_hex(&hash)));

    // The winner is the first qualifying position of the schedule
    let schedule = NonceSchedule::new(config.strategy, factor, config.signal_weight);
    assert_eq!(schedule.nonce_at(result.attempts - 1), nonce);
    for position in 0..result.attempts - 1 {
        let hash = config.header.hash(schedule.nonce_at(position));
        assert!(!difficulty.is_met_by(hash_value(&hash)));
    }
}

#[test]
fn test_event_order_of_a_run() {
    let (engine, mut rx) = setup();
    engine.adjust_difficulty(Difficulty::MAX).unwrap();
    let handle = engine
        .start(
            MiningConfig {
                max_attempts: 50_000,
                ..MiningConfig::default()
            },
            CalibrationFactor::BASELINE,
        )
        .unwrap();

    let result = next_result(&mut rx);
    assert!(!result.success);
    assert_eq!(result.attempts, 50_000);

    // Everything from the run arrived before completion, nothing after
    std::thread::sleep(Duration::from_millis(50));
    let late: Vec<_> = rx
        .drain()
        .into_iter()
        .filter(|e| e.event.run_id() == Some(handle.run_id()))
        .collect();
    assert!(late.is_empty(), "{:?}", late);
    assert_eq!(engine.state(), EngineState::Completed);
}

#[test]
fn test_cancelled_run_produces_no_result() {
    let (engine, mut rx) = setup();
    engine.adjust_difficulty(Difficulty::MAX).unwrap();
    let handle = engine
        .start(
            MiningConfig {
                max_attempts: 1 << 32,
                ..MiningConfig::default()
            },
            CalibrationFactor::BASELINE,
        )
        .unwrap();

    assert!(rx
        .wait_for(Duration::from_secs(5), |e| matches!(e, CoreEvent::MiningProgress { .. }))
        .is_some());
    handle.cancel();

    let stopped = rx.wait_for(Duration::from_secs(5), |e| {
        matches!(e, CoreEvent::MiningStopped { .. })
    });
    assert!(stopped.is_some());
    engine.stop().unwrap();
    assert_eq!(engine.state(), EngineState::Stopped);
    assert!(engine.drain_results().is_empty());
}

#[test]
fn test_continuous_mode_samples_calibration_each_run() {
    let (engine, mut rx) = setup();
    let cell = FactorCell::new(CalibrationFactor::new(0.25));
    engine
        .start_continuous(
            MiningConfig {
                max_attempts: 5_000,
                strategy: OptimizationStrategy::CalibratedStride,
                ..MiningConfig::default()
            },
            cell,
            false,
        )
        .unwrap();

    let first = next_result(&mut rx);
    let second = next_result(&mut rx);
    assert!(second.run_id > first.run_id);
    assert_eq!(second.calibration, CalibrationFactor::new(0.25));

    engine.stop().unwrap();
    assert!(!engine.is_running());
    assert!(engine.drain_results().len() >= 2);
}

#[test]
fn test_header_template_round_trips_through_json() {
    let header = BlockHeaderTemplate::genesis();
    let json = serde_json::to_string(&header).unwrap();
    assert!(json.contains("4a5e1e4baab89f3a32518a88c31bc87f618f76673e2cc77ab2127b7afdeda33b"));
    let parsed: BlockHeaderTemplate = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, header);
}
