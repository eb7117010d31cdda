#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use api::{DeviceIdentity, DeviceRole, TransportKind};
use common::{ConnectError, TransportError};
use device::decoder::encode_body;
use device::{Connector, TransportChannel};

/// What a scripted channel does once its bodies run out.
#[derive(Clone, Copy)]
pub enum AfterScript {
    Idle,
    /// Keep sending the last body every few milliseconds.
    Repeat,
    /// Keep sending fresh eye frames, continuing the sequence numbers.
    Stream,
    Fail,
}

#[derive(Clone)]
pub struct Script {
    pub bodies: Vec<Vec<u8>>,
    pub after: AfterScript,
}

pub struct ScriptedChannel {
    role: DeviceRole,
    handed_out: u32,
    bodies: VecDeque<Vec<u8>>,
    last: Option<Vec<u8>>,
    after: AfterScript,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl TransportChannel for ScriptedChannel {
    fn read_frame(&mut self) -> Result<Option<Vec<u8>>, TransportError> {
        if let Some(body) = self.bodies.pop_front() {
            self.handed_out += 1;
            self.last = Some(body.clone());
            return Ok(Some(body));
        }
        match self.after {
            AfterScript::Stream => {
                thread::sleep(Duration::from_millis(5));
                let sequence = self.handed_out;
                self.handed_out += 1;
                Ok(Some(eye_body(self.role, sequence, 0.5)))
            }
            AfterScript::Repeat if self.last.is_some() => {
                thread::sleep(Duration::from_millis(5));
                Ok(self.last.clone())
            }
            AfterScript::Idle | AfterScript::Repeat => {
                thread::sleep(Duration::from_millis(5));
                Ok(None)
            }
            AfterScript::Fail => Err(TransportError::HeartbeatTimeout(0)),
        }
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(bytes.to_vec());
        Ok(())
    }

    fn close(&mut self) {}
}

/// Per-role scripts; roles without a script are unreachable.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<Vec<(DeviceRole, Script)>>,
    pub sent: Arc<Mutex<Vec<Vec<u8>>>>,
    pub attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, role: DeviceRole, bodies: Vec<Vec<u8>>, after: AfterScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .push((role, Script { bodies, after }));
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    fn connect(
        &self,
        identity: &DeviceIdentity,
    ) -> Result<Box<dyn TransportChannel>, ConnectError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let scripts = self.scripts.lock().unwrap();
        let script = scripts
            .iter()
            .find(|(role, _)| *role == identity.role)
            .map(|(_, s)| s.clone())
            .ok_or_else(|| {
                ConnectError::Unreachable(identity.address.clone(), "no device".to_string())
            })?;
        Ok(Box::new(ScriptedChannel {
            role: identity.role,
            handed_out: 0,
            bodies: script.bodies.into(),
            last: None,
            after: script.after,
            sent: self.sent.clone(),
        }))
    }
}

pub fn identity(role: DeviceRole) -> DeviceIdentity {
    DeviceIdentity::new(role, TransportKind::Serial, format!("/dev/mock-{}", role))
}

pub fn eye_body(role: DeviceRole, sequence: u32, lid: f32) -> Vec<u8> {
    encode_body(role, sequence, Some(80), Some(95), &[lid, 0.0, 0.0])
}

pub fn eye_bodies(role: DeviceRole, lids: &[f32]) -> Vec<Vec<u8>> {
    lids.iter()
        .enumerate()
        .map(|(i, lid)| eye_body(role, i as u32, *lid))
        .collect()
}

pub fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    f()
}
