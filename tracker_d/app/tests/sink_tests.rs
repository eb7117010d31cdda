use std::net::UdpSocket;
use std::time::Duration;

use api::{ChannelLayout, DeviceRole, OutputSink, SmoothedSample};
use common::config::OutputConfig;
use common::{OutputMode, TrackerConfig};
use rosc::{OscPacket, OscType};
use tracker_d::strategies::generic_udp::GenericUdpSink;
use tracker_d::strategies::vrchat::{clip_limit, osc_address, VrchatOscSink};
use tracker_d::strategies::{create_sink, OutputBackend};

fn listener() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket
}

fn sample(role: DeviceRole, values: Vec<f32>) -> SmoothedSample {
    SmoothedSample {
        role,
        sequence: 7,
        timestamp_us: 123,
        values,
        passthrough_mask: 0,
    }
}

fn float_args(packet: OscPacket) -> Vec<(String, f32)> {
    let OscPacket::Bundle(bundle) = packet else {
        panic!("expected a bundle");
    };
    bundle
        .content
        .into_iter()
        .map(|p| match p {
            OscPacket::Message(msg) => match msg.args.as_slice() {
                [OscType::Float(v)] => (msg.addr.clone(), *v),
                other => panic!("unexpected args {:?}", other),
            },
            OscPacket::Bundle(_) => panic!("nested bundle"),
        })
        .collect()
}

#[test]
fn test_clip_limit_is_power_of_ten_below_multiplier() {
    assert_eq!(clip_limit(1.0), 1.0);
    assert_eq!(clip_limit(2.5), 1.0);
    assert_eq!(clip_limit(10.0), 10.0);
    assert_eq!(clip_limit(45.0), 10.0);
    assert!((clip_limit(0.5) - 0.1).abs() < 1e-6);
}

#[test]
fn test_osc_addresses() {
    assert_eq!(
        osc_address("/avatar/parameters/v2/", "EyeLidLeft"),
        "/avatar/parameters/v2/EyeLidLeft"
    );
    assert_eq!(osc_address("", "cheekPuffLeft"), "/cheekPuffLeft");
}

#[test]
fn test_eye_sample_goes_to_eye_port_with_prefix() {
    let rx = listener();
    let output = OutputConfig {
        send_address: "127.0.0.1".to_string(),
        eye_send_port: rx.local_addr().unwrap().port(),
        multiplier: 2.0,
        ..OutputConfig::default()
    };
    let mut sink = VrchatOscSink::new(&output, &[ChannelLayout::for_role(DeviceRole::LeftEye)]);
    sink.initialize().unwrap();
    sink.send(&sample(DeviceRole::LeftEye, vec![0.25, 0.9, -0.5]))
        .unwrap();

    let mut buf = [0u8; 2048];
    let (n, _) = rx.recv_from(&mut buf).unwrap();
    let (_, packet) = rosc::decoder::decode_udp(&buf[..n]).unwrap();
    assert_eq!(
        float_args(packet),
        vec![
            ("/avatar/parameters/v2/EyeLidLeft".to_string(), 0.5),
            ("/avatar/parameters/v2/EyeLeftX".to_string(), 1.0),
            ("/avatar/parameters/v2/EyeLeftY".to_string(), -1.0),
        ]
    );
}

#[test]
fn test_face_sample_uses_face_port_and_names() {
    let config = TrackerConfig::default();
    let sink = VrchatOscSink::from_config(&config);
    let layout = ChannelLayout::for_role(DeviceRole::Face);
    let values: Vec<f32> = (0..layout.len()).map(|i| i as f32 / 100.0).collect();

    let messages = sink.messages(&sample(DeviceRole::Face, values));
    assert_eq!(messages.len(), layout.len());
    assert_eq!(messages[0].addr, "/cheekPuffLeft");
    assert_eq!(messages[1].args, vec![OscType::Float(0.01)]);
}

#[test]
fn test_sample_for_unknown_layout_is_skipped() {
    let output = OutputConfig::default();
    let mut sink = VrchatOscSink::new(&output, &[ChannelLayout::for_role(DeviceRole::Face)]);
    assert!(sink.messages(&sample(DeviceRole::RightEye, vec![0.1, 0.2, 0.3])).is_empty());
    sink.send(&sample(DeviceRole::RightEye, vec![0.1, 0.2, 0.3]))
        .unwrap();
}

#[test]
fn test_generic_udp_sends_json_samples() {
    let rx = listener();
    let mut sink = GenericUdpSink::new(rx.local_addr().unwrap().to_string());
    sink.initialize().unwrap();

    let sent = SmoothedSample {
        passthrough_mask: 0b10,
        ..sample(DeviceRole::Face, vec![0.1, 0.2])
    };
    sink.send(&sent).unwrap();

    let mut buf = [0u8; 4096];
    let (n, _) = rx.recv_from(&mut buf).unwrap();
    let received: SmoothedSample = serde_json::from_slice(&buf[..n]).unwrap();
    assert_eq!(received, sent);
    assert_eq!(sink.datagrams_sent(), 1);
    assert_eq!(sink.target(), rx.local_addr().unwrap().to_string());
}

#[test]
fn test_create_sink_follows_output_mode() {
    let mut config = TrackerConfig::default();
    assert!(matches!(create_sink(&config), OutputBackend::VRChat(_)));
    config.output.mode = OutputMode::Generic;
    assert!(matches!(create_sink(&config), OutputBackend::Generic(_)));
}
