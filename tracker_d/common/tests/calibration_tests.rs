use api::{AnchorKind, CalibrationKind, ChannelLayout, ChannelSpec, DeviceRole};
use common::config::CalibrationConfig;
use common::{
    CalibrationCommand, CalibrationEngine, CalibrationError, CalibrationState, ChannelAnchors,
};

fn eye_engine() -> CalibrationEngine {
    CalibrationEngine::new(
        ChannelLayout::for_role(DeviceRole::LeftEye),
        CalibrationConfig::default(),
    )
}

fn feed(engine: &mut CalibrationEngine, lids: &[f32]) {
    for lid in lids {
        assert!(engine.observe(&[*lid, 0.0, 0.0], 0.02).is_none());
    }
}

#[test]
fn test_open_closed_scenario_normalizes_midpoint() {
    let mut engine = eye_engine();

    engine.start(CalibrationKind::Open).unwrap();
    feed(&mut engine, &[0.8, 0.9, 0.85]);
    let outcome = engine.commit().unwrap();
    assert_eq!(outcome.kind, CalibrationKind::Open);
    assert_eq!(outcome.samples, 3);
    assert_eq!(outcome.changed, vec![0]);
    assert_eq!(engine.profile().channels[0].max, Some(0.9));

    engine.start(CalibrationKind::Closed).unwrap();
    feed(&mut engine, &[0.05, 0.02]);
    engine.commit().unwrap();
    assert_eq!(engine.profile().channels[0].min, Some(0.02));

    let (value, passthrough) = engine.profile().channels[0].normalize(AnchorKind::OpenClosed, 0.46);
    assert!(!passthrough);
    assert!((value - 0.5).abs() < 1e-5, "expected ~0.5, got {}", value);
}

#[test]
fn test_normalization_endpoints_and_clamping() {
    let anchors = ChannelAnchors {
        min: Some(0.1),
        max: Some(0.6),
        ..Default::default()
    };
    assert_eq!(anchors.normalize(AnchorKind::OpenClosed, 0.1), (0.0, false));
    assert_eq!(anchors.normalize(AnchorKind::OpenClosed, 0.6), (1.0, false));
    assert_eq!(anchors.normalize(AnchorKind::OpenClosed, -3.0), (0.0, false));
    assert_eq!(anchors.normalize(AnchorKind::OpenClosed, 9.0), (1.0, false));
}

#[test]
fn test_degenerate_range_passes_through_without_nan() {
    let flat = ChannelAnchors {
        min: Some(0.5),
        max: Some(0.5),
        ..Default::default()
    };
    assert_eq!(flat.normalize(AnchorKind::OpenClosed, 0.7), (0.7, true));

    let missing = ChannelAnchors::default();
    assert_eq!(missing.normalize(AnchorKind::NeutralExpressive, 1.5), (1.5, true));
    assert_eq!(missing.normalize(AnchorKind::Centered, -2.0), (-2.0, true));
}

#[test]
fn test_centered_maps_to_signed_range() {
    let anchors = ChannelAnchors {
        min: Some(0.0),
        center: Some(100.0),
        max: Some(300.0),
        ..Default::default()
    };
    assert_eq!(anchors.normalize(AnchorKind::Centered, 100.0), (0.0, false));
    assert_eq!(anchors.normalize(AnchorKind::Centered, 250.0), (0.75, false));
    assert_eq!(anchors.normalize(AnchorKind::Centered, 50.0), (-0.5, false));
    assert_eq!(anchors.normalize(AnchorKind::Centered, -40.0), (-1.0, false));
}

#[test]
fn test_start_while_collecting_is_rejected() {
    let mut engine = eye_engine();
    engine.start(CalibrationKind::Open).unwrap();
    assert_eq!(
        engine.start(CalibrationKind::Closed),
        Err(CalibrationError::AlreadyCalibrating(CalibrationKind::Open))
    );
    assert_eq!(engine.collecting(), Some(CalibrationKind::Open));
}

#[test]
fn test_cancel_discards_window_and_keeps_profile() {
    let mut engine = eye_engine();
    engine.start(CalibrationKind::Open).unwrap();
    feed(&mut engine, &[0.7, 0.8]);
    engine.commit().unwrap();
    let before = engine.profile().clone();

    engine.start(CalibrationKind::Open).unwrap();
    feed(&mut engine, &[0.99, 0.98, 0.97]);
    engine.cancel().unwrap();

    assert_eq!(engine.state(), &CalibrationState::Idle);
    assert_eq!(engine.profile(), &before);
    assert_eq!(engine.cancel(), Err(CalibrationError::NotCalibrating));
}

#[test]
fn test_commit_with_too_few_samples_keeps_collecting() {
    let mut engine = eye_engine();
    engine.start(CalibrationKind::Closed).unwrap();
    feed(&mut engine, &[0.1]);
    assert_eq!(
        engine.commit(),
        Err(CalibrationError::InsufficientSamples {
            required: 2,
            collected: 1
        })
    );
    assert_eq!(engine.collecting(), Some(CalibrationKind::Closed));

    feed(&mut engine, &[0.05]);
    assert!(engine.commit().is_ok());
}

#[test]
fn test_inverted_range_is_rejected_atomically() {
    let mut engine = eye_engine();
    engine.start(CalibrationKind::Closed).unwrap();
    feed(&mut engine, &[0.6, 0.5]);
    engine.commit().unwrap();
    let before = engine.profile().clone();

    // "Open" lower than the recorded closed value.
    engine.start(CalibrationKind::Open).unwrap();
    feed(&mut engine, &[0.3, 0.2]);
    let err = engine.commit().unwrap_err();
    assert!(matches!(err, CalibrationError::InvalidRange { channel: 0, .. }));
    assert_eq!(engine.profile(), &before);
    assert_eq!(engine.collecting(), None);
}

#[test]
fn test_face_kinds_are_not_accepted_by_eyes() {
    let mut engine = eye_engine();
    assert_eq!(
        engine.handle(CalibrationCommand::Start(CalibrationKind::Neutral)),
        Err(CalibrationError::Unsupported {
            kind: CalibrationKind::Neutral,
            role: DeviceRole::LeftEye
        })
    );
    assert_eq!(
        engine.handle(CalibrationCommand::Commit),
        Err(CalibrationError::NotCalibrating)
    );
}

#[test]
fn test_gaze_center_and_range() {
    let mut engine = eye_engine();
    engine.start(CalibrationKind::Center).unwrap();
    for (x, y) in [(120.0, 130.0), (130.0, 130.0), (125.0, 130.0)] {
        engine.observe(&[0.5, x, y], 0.02);
    }
    engine.commit().unwrap();

    engine.start(CalibrationKind::Range).unwrap();
    for (x, y) in [(20.0, 40.0), (240.0, 230.0), (125.0, 130.0)] {
        engine.observe(&[0.5, x, y], 0.02);
    }
    let outcome = engine.commit().unwrap();
    assert_eq!(outcome.changed, vec![1, 2]);

    let x = engine.profile().channels[1];
    assert_eq!(x.center, Some(125.0));
    assert_eq!((x.min, x.max), (Some(20.0), Some(240.0)));
    assert_eq!(x.normalize(AnchorKind::Centered, 240.0), (1.0, false));
    assert_eq!(x.normalize(AnchorKind::Centered, 20.0), (-1.0, false));
    // The lid channel was not touched.
    assert_eq!(engine.profile().channels[0], ChannelAnchors::default());
}

#[test]
fn test_face_neutral_and_expressive() {
    let layout = ChannelLayout::new(
        DeviceRole::Face,
        vec![
            ChannelSpec::new("jawOpen", AnchorKind::NeutralExpressive),
            ChannelSpec::new("tongueOut", AnchorKind::NeutralExpressive),
        ],
    );
    let mut engine = CalibrationEngine::new(layout, CalibrationConfig::default());

    engine.start(CalibrationKind::Neutral).unwrap();
    engine.observe(&[0.1, 0.0], 0.02);
    engine.observe(&[0.3, 0.0], 0.02);
    engine.commit().unwrap();
    assert_eq!(engine.profile().channels[0].neutral, Some(0.2));

    // The tongue never moves: it keeps its old (missing) anchor.
    engine.start(CalibrationKind::Expressive).unwrap();
    engine.observe(&[0.9, 0.0], 0.02);
    engine.observe(&[0.6, 0.0], 0.02);
    let outcome = engine.commit().unwrap();
    assert_eq!(outcome.changed, vec![0]);
    assert_eq!(engine.profile().channels[0].expressive, Some(0.9));
    assert_eq!(engine.profile().channels[1].expressive, None);

    // Nothing moved at all.
    let before = engine.profile().clone();
    engine.start(CalibrationKind::Expressive).unwrap();
    engine.observe(&[0.2, 0.0], 0.02);
    engine.observe(&[0.2, 0.0], 0.02);
    assert!(matches!(
        engine.commit(),
        Err(CalibrationError::InvalidRange { .. })
    ));
    assert_eq!(engine.profile(), &before);
}

#[test]
fn test_auto_commit_after_configured_duration() {
    let config = CalibrationConfig {
        min_samples: 2,
        max_samples: 100,
        auto_commit_secs: Some(0.1),
    };
    let mut engine = CalibrationEngine::new(ChannelLayout::for_role(DeviceRole::RightEye), config);
    engine.start(CalibrationKind::Open).unwrap();

    assert!(engine.observe(&[0.8, 0.0, 0.0], 0.05).is_none());
    let fired = engine.observe(&[0.9, 0.0, 0.0], 0.05);
    let outcome = fired.expect("auto commit").expect("valid window");
    assert_eq!(outcome.samples, 2);
    assert_eq!(engine.collecting(), None);
    assert_eq!(engine.profile().channels[0].max, Some(0.9));
}

#[test]
fn test_window_is_capped() {
    let config = CalibrationConfig {
        min_samples: 1,
        max_samples: 3,
        auto_commit_secs: None,
    };
    let mut engine = CalibrationEngine::new(ChannelLayout::for_role(DeviceRole::LeftEye), config);
    engine.start(CalibrationKind::Open).unwrap();
    feed(&mut engine, &[1.0, 0.2, 0.3, 0.4]);
    assert_eq!(engine.window_len(), 3);
    engine.commit().unwrap();
    // The 1.0 fell out of the rolling window.
    assert_eq!(engine.profile().channels[0].max, Some(0.4));
}
