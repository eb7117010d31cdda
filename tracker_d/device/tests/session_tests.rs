mod support;

use std::sync::Arc;
use std::time::Duration;

use api::{CalibrationKind, ChannelLayout, ConnectionStatus, DeviceRole};
use common::{
    CalibrationCommand, CalibrationError, CalibrationProfile, ChannelAnchors, ConnectError,
    DeviceSettings, KalmanParams, MemoryStore, SessionError, TrackerConfig, TransportError,
};
use device::decoder::encode_body;
use device::{DeviceSession, Handoff};

use support::{eye_bodies, identity, wait_until, AfterScript, ScriptedConnector};

const WAIT: Duration = Duration::from_secs(3);

fn test_config() -> TrackerConfig {
    let mut config = TrackerConfig::default();
    config.session.auto_reconnect = false;
    config.session.reconnect_delay_ms = 20;
    config
}

fn eye_profile() -> CalibrationProfile {
    let centered = ChannelAnchors {
        min: Some(-1.0),
        center: Some(0.0),
        max: Some(1.0),
        ..Default::default()
    };
    CalibrationProfile {
        channels: vec![
            ChannelAnchors {
                min: Some(0.1),
                max: Some(0.9),
                ..Default::default()
            },
            centered,
            centered,
        ],
    }
}

fn spawn(
    role: DeviceRole,
    config: &TrackerConfig,
    connector: ScriptedConnector,
    store: Arc<MemoryStore>,
) -> (DeviceSession, Arc<Handoff>, Arc<ScriptedConnector>) {
    let connector = Arc::new(connector);
    let handoff = Arc::new(Handoff::new(16));
    let session = DeviceSession::spawn(
        identity(role),
        ChannelLayout::for_role(role),
        config,
        connector.clone(),
        store,
        handoff.clone(),
    )
    .unwrap();
    (session, handoff, connector)
}

#[test]
fn test_stored_profile_is_loaded_on_connect() {
    let role = DeviceRole::LeftEye;
    let store = Arc::new(MemoryStore::with(
        role,
        DeviceSettings {
            profile: eye_profile(),
            kalman: None,
        },
    ));
    let connector =
        ScriptedConnector::new().script(role, eye_bodies(role, &[0.5]), AfterScript::Idle);
    let (session, handoff, _) = spawn(role, &test_config(), connector, store);

    assert!(wait_until(WAIT, || session.status().frames_received == 1));
    let status = session.status();
    assert_eq!(status.connection, ConnectionStatus::Connected);
    assert!(!status.needs_calibration);
    assert_eq!(status.battery, Some(80));
    assert_eq!(status.link_quality, Some(95));

    let sample = handoff.pop_timeout(WAIT).unwrap();
    assert_eq!(sample.passthrough_mask, 0);
    assert!((sample.values[0] - 0.5).abs() < 1e-5);
}

#[test]
fn test_missing_profile_flags_calibration() {
    let role = DeviceRole::RightEye;
    let connector =
        ScriptedConnector::new().script(role, eye_bodies(role, &[0.3]), AfterScript::Idle);
    let (session, handoff, _) =
        spawn(role, &test_config(), connector, Arc::new(MemoryStore::new()));

    assert!(wait_until(WAIT, || session.status().frames_received == 1));
    assert!(session.status().needs_calibration);
    let sample = handoff.pop_timeout(WAIT).unwrap();
    assert_eq!(sample.values, vec![0.3, 0.0, 0.0]);
    assert_eq!(sample.passthrough_mask, 0b111);
}

#[test]
fn test_bad_frames_are_counted_and_skipped() {
    let role = DeviceRole::LeftEye;
    let mut bodies = eye_bodies(role, &[0.2, 0.4, 0.6]);
    bodies[1][9] ^= 0x10;
    bodies.push(encode_body(DeviceRole::Face, 9, None, None, &[0.0, 0.0, 0.0]));
    let connector = ScriptedConnector::new().script(role, bodies, AfterScript::Idle);
    let (session, handoff, _) =
        spawn(role, &test_config(), connector, Arc::new(MemoryStore::new()));

    assert!(wait_until(WAIT, || session.status().frames_received == 4));
    let status = session.status();
    assert_eq!(status.frames_rejected, 2);
    assert_eq!(status.frames_dropped, 1);
    assert_eq!(status.connection, ConnectionStatus::Connected);

    let sequences: Vec<u32> = std::iter::from_fn(|| handoff.try_pop())
        .map(|s| s.sequence)
        .collect();
    assert_eq!(sequences, vec![0, 2]);
}

#[test]
fn test_calibration_through_commands_is_persisted() {
    let role = DeviceRole::LeftEye;
    let store = Arc::new(MemoryStore::new());
    let connector =
        ScriptedConnector::new().script(role, eye_bodies(role, &[0.8]), AfterScript::Repeat);
    let (session, _handoff, _) = spawn(role, &test_config(), connector, store.clone());
    assert!(wait_until(WAIT, || session.status().connection == ConnectionStatus::Connected));

    assert!(matches!(
        session.calibrate(CalibrationCommand::Start(CalibrationKind::Open)),
        Ok(None)
    ));
    assert_eq!(session.status().calibrating, Some(CalibrationKind::Open));
    assert!(matches!(
        session.calibrate(CalibrationCommand::Start(CalibrationKind::Closed)),
        Err(SessionError::Calibration(CalibrationError::AlreadyCalibrating(
            CalibrationKind::Open
        )))
    ));

    let seen = session.status().frames_received;
    assert!(wait_until(WAIT, || session.status().frames_received >= seen + 3));
    let outcome = session
        .calibrate(CalibrationCommand::Commit)
        .unwrap()
        .unwrap();
    assert_eq!(outcome.kind, CalibrationKind::Open);
    assert_eq!(outcome.changed, vec![0]);
    assert_eq!(session.status().calibrating, None);

    let saved = store.get(role).unwrap();
    assert!((saved.profile.channels[0].max.unwrap() - 0.8).abs() < 1e-6);
    assert_eq!(saved.profile.channels[0].min, None);
}

#[test]
fn test_filter_commands() {
    let role = DeviceRole::Face;
    let store = Arc::new(MemoryStore::new());
    let connector = ScriptedConnector::new();
    let (session, _handoff, _) = spawn(role, &test_config(), connector, store.clone());
    let handle = session.handle();

    handle.set_filter_enabled(false).unwrap();
    assert!(!session.status().filter_enabled);

    let params = KalmanParams::new(1.0, 0.05, 0.2);
    handle.set_kalman_params(params).unwrap();
    assert_eq!(store.get(role).unwrap().kalman, Some(params));

    assert!(matches!(
        handle.set_kalman_params(KalmanParams::new(1.0, 0.01, -1.0)),
        Err(SessionError::InvalidParams(_))
    ));
    assert_eq!(store.get(role).unwrap().kalman, Some(params));
}

#[test]
fn test_brightness_is_sent_to_the_device() {
    let role = DeviceRole::LeftEye;
    let connector = ScriptedConnector::new().script(role, vec![], AfterScript::Idle);
    let (session, _handoff, connector) =
        spawn(role, &test_config(), connector, Arc::new(MemoryStore::new()));
    assert!(wait_until(WAIT, || session.status().connection == ConnectionStatus::Connected));

    session.handle().set_brightness(128).unwrap();
    assert_eq!(connector.sent.lock().unwrap().clone(), vec![b"A6128B6".to_vec()]);
}

#[test]
fn test_unreachable_device_reports_error_and_keeps_answering() {
    let role = DeviceRole::RightEye;
    let (session, _handoff, connector) = spawn(
        role,
        &test_config(),
        ScriptedConnector::new(),
        Arc::new(MemoryStore::new()),
    );

    assert!(wait_until(WAIT, || session.status().connection == ConnectionStatus::Error));
    assert!(session.status().last_error.is_some());
    assert_eq!(connector.attempts(), 1);

    session.handle().set_filter_enabled(false).unwrap();
    assert!(matches!(
        session.handle().set_brightness(10),
        Err(SessionError::Transport(TransportError::Closed))
    ));
}

#[test]
fn test_lost_link_reconnects() {
    let role = DeviceRole::LeftEye;
    let mut config = test_config();
    config.session.auto_reconnect = true;
    let connector =
        ScriptedConnector::new().script(role, eye_bodies(role, &[0.5]), AfterScript::Fail);
    let (session, _handoff, connector) =
        spawn(role, &config, connector, Arc::new(MemoryStore::new()));

    assert!(wait_until(WAIT, || connector.attempts() >= 3));
    assert!(session.status().frames_received >= 2);
}

#[test]
fn test_close_stops_the_session() {
    let role = DeviceRole::Face;
    let connector = ScriptedConnector::new().script(role, vec![], AfterScript::Idle);
    let (mut session, _handoff, _) =
        spawn(role, &test_config(), connector, Arc::new(MemoryStore::new()));
    assert!(wait_until(WAIT, || session.status().connection == ConnectionStatus::Connected));
    let handle = session.handle();

    session.close();
    assert!(!session.is_running());
    assert_eq!(session.status().connection, ConnectionStatus::Disconnected);
    assert!(matches!(
        handle.set_filter_enabled(true),
        Err(SessionError::Closed(DeviceRole::Face))
    ));
}

#[test]
fn test_layout_must_match_identity() {
    let config = test_config();
    let result = DeviceSession::spawn(
        identity(DeviceRole::LeftEye),
        ChannelLayout::for_role(DeviceRole::Face),
        &config,
        Arc::new(ScriptedConnector::new()),
        Arc::new(MemoryStore::new()),
        Arc::new(Handoff::new(4)),
    );
    assert!(matches!(result, Err(ConnectError::InvalidIdentity(_))));
}
