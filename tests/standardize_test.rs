use chrono::Timelike;
use meteoset::assembler::{AssembleOutcome, Assembler, Sample};
use meteoset::grid::GridSpec;
use meteoset::params::{ParamKind, ParameterRegistry};
use meteoset::period::{PeriodIndex, PeriodName, PeriodSpec, parse_stamp};
use meteoset::standardize::{StandardizationStats, Standardizer};
use meteoset::storage::MemFieldSource;
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::Arc;

const NATIVE: (usize, usize) = (4, 5);

/// Six hourly timestamps; the single channel's field at hour h is the
/// constant h, so the fitted moments are known in closed form.
fn hour_valued_assembler() -> Assembler {
    let grid = GridSpec::resolve_custom(
        "unit",
        NATIVE,
        [0.0, 3.0, 0.0, 4.0],
        0,
        [0, 4, 0, 5],
        None,
        HashMap::new(),
    )
    .unwrap();
    let index = PeriodIndex::build(&PeriodSpec {
        name: PeriodName::Train,
        start: parse_stamp("2022020100").unwrap(),
        end: parse_stamp("2022020105").unwrap(),
        obs_step_secs: 3600,
    })
    .unwrap();
    let mut registry = ParameterRegistry::new();
    registry
        .register("aro_t2m", vec![2], ParamKind::InputOutput)
        .unwrap();
    let mut source = MemFieldSource::new();
    for &stamp in index.timestamps() {
        let value = stamp.hour() as f32;
        source.insert("aro_t2m", 2, stamp, Array2::from_elem(NATIVE, value));
    }
    Assembler::new(
        Arc::new(grid),
        Arc::new(registry),
        Arc::new(index),
        Arc::new(source),
    )
}

fn valid_positions(assembler: &Assembler, n_in: usize, n_pred: usize) -> Vec<usize> {
    (0..assembler.index().len())
        .filter(|&c| assembler.window_fits(c, n_in, n_pred))
        .collect()
}

fn raw_sample(assembler: &Assembler, center: usize) -> Sample {
    match assembler.assemble(center, 1, 1).unwrap() {
        AssembleOutcome::Sample(s) => s,
        AssembleOutcome::SkippedBoundary => panic!("unexpected boundary at {center}"),
    }
}

#[test]
fn test_fit_matches_closed_form_moments() {
    let assembler = hour_valued_assembler();
    let positions = valid_positions(&assembler, 1, 1);
    assert_eq!(positions, [0, 1, 2, 3, 4]);

    let stats = StandardizationStats::fit(&assembler, &positions, 1, 1).unwrap();
    assert_eq!(stats.inputs.len(), 1);
    assert_eq!(stats.outputs.len(), 1);

    // Inputs see hours 0..=4: mean 2, variance 2. Targets see 1..=5:
    // mean 3, same variance.
    let expected_std = 2.0f32.sqrt();
    assert!((stats.inputs[0].mean - 2.0).abs() < 1e-5);
    assert!((stats.inputs[0].scale - expected_std).abs() < 1e-5);
    assert_eq!(stats.inputs[0].min, 0.0);
    assert_eq!(stats.inputs[0].max, 4.0);
    assert!((stats.outputs[0].mean - 3.0).abs() < 1e-5);
    assert!((stats.outputs[0].scale - expected_std).abs() < 1e-5);
    assert_eq!(stats.outputs[0].min, 1.0);
    assert_eq!(stats.outputs[0].max, 5.0);
}

#[test]
fn test_apply_centers_and_scales() {
    let assembler = hour_valued_assembler();
    let positions = valid_positions(&assembler, 1, 1);
    let stats = Arc::new(StandardizationStats::fit(&assembler, &positions, 1, 1).unwrap());
    let standardizer = Standardizer::new(stats);

    // Center 2: input value 2 is exactly the input mean.
    let sample = standardizer.apply(raw_sample(&assembler, 2));
    assert!(sample.inputs.iter().all(|&v| v.abs() < 1e-6));
    // Its target value 3 is exactly the output mean.
    assert!(sample.targets.iter().all(|&v| v.abs() < 1e-6));

    let sample = standardizer.apply(raw_sample(&assembler, 4));
    let expected = (4.0 - 2.0) / 2.0f32.sqrt();
    assert!(sample.inputs.iter().all(|&v| (v - expected).abs() < 1e-5));
}

#[test]
fn test_invert_is_exact_inverse_within_tolerance() {
    let assembler = hour_valued_assembler();
    let positions = valid_positions(&assembler, 1, 1);
    let stats = Arc::new(StandardizationStats::fit(&assembler, &positions, 1, 1).unwrap());
    let standardizer = Standardizer::new(stats);

    for center in [0usize, 1, 3, 4] {
        let raw = raw_sample(&assembler, center);
        let mut roundtrip = standardizer.apply(raw.clone());
        standardizer.invert_inputs(&mut roundtrip.inputs);
        standardizer.invert_outputs(&mut roundtrip.targets);

        for (a, b) in raw.inputs.iter().zip(roundtrip.inputs.iter()) {
            let scale = a.abs().max(1.0);
            assert!((a - b).abs() / scale < 1e-5, "{a} vs {b}");
        }
        for (a, b) in raw.targets.iter().zip(roundtrip.targets.iter()) {
            let scale = a.abs().max(1.0);
            assert!((a - b).abs() / scale < 1e-5, "{a} vs {b}");
        }
    }
}

#[test]
fn test_identity_when_standardization_disabled() {
    let assembler = hour_valued_assembler();
    let standardizer = Standardizer::identity();
    assert!(standardizer.is_identity());

    let raw = raw_sample(&assembler, 3);
    let passed = standardizer.apply(raw.clone());
    assert_eq!(raw.inputs, passed.inputs);
    assert_eq!(raw.targets, passed.targets);

    let mut tensor = raw.inputs.clone();
    standardizer.invert_inputs(&mut tensor);
    assert_eq!(tensor, raw.inputs);
}

#[test]
fn test_constant_channel_keeps_unit_scale() {
    // All-constant data would have zero variance; the scale must clamp
    // to 1 so apply/invert stay defined.
    let grid = GridSpec::resolve_custom(
        "unit",
        NATIVE,
        [0.0, 3.0, 0.0, 4.0],
        0,
        [0, 4, 0, 5],
        None,
        HashMap::new(),
    )
    .unwrap();
    let index = PeriodIndex::build(&PeriodSpec {
        name: PeriodName::Train,
        start: parse_stamp("2022020100").unwrap(),
        end: parse_stamp("2022020103").unwrap(),
        obs_step_secs: 3600,
    })
    .unwrap();
    let mut registry = ParameterRegistry::new();
    registry
        .register("aro_lsm", vec![0], ParamKind::InputOutput)
        .unwrap();
    let mut source = MemFieldSource::new();
    for &stamp in index.timestamps() {
        source.insert("aro_lsm", 0, stamp, Array2::from_elem(NATIVE, 7.5));
    }
    let assembler = Assembler::new(
        Arc::new(grid),
        Arc::new(registry),
        Arc::new(index),
        Arc::new(source),
    );

    let positions = valid_positions(&assembler, 1, 1);
    let stats = StandardizationStats::fit(&assembler, &positions, 1, 1).unwrap();
    assert!((stats.inputs[0].mean - 7.5).abs() < 1e-6);
    assert_eq!(stats.inputs[0].scale, 1.0);
}
