use anyhow::{Context, Result};
use api::{DeviceIdentity, DeviceRole, OutputSink, StatusSnapshot};
use common::config::{TrackerConfig, MAX_DEVICES};
use common::{ConnectError, SessionError, SettingsStore, Throttle};
use log::{error, info, warn};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::handoff::Handoff;
use crate::session::{CommandReply, DeviceSession, SessionCommand, SessionHandle};
use crate::transport::Connector;

const FORWARD_POLL: Duration = Duration::from_millis(100);

/// Owns the device sessions and the thread that feeds their merged output
/// into the sink. Sessions are fully independent: one failing device never
/// holds up another.
pub struct TrackingCoordinator {
    config: TrackerConfig,
    connector: Arc<dyn Connector>,
    store: Arc<dyn SettingsStore>,
    handoff: Arc<Handoff>,
    sessions: Mutex<BTreeMap<DeviceRole, DeviceSession>>,
    forwarder: Mutex<Option<JoinHandle<()>>>,
    running: Arc<AtomicBool>,
    forwarded: Arc<AtomicU64>,
}

impl TrackingCoordinator {
    pub fn new(
        config: TrackerConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        let handoff = Arc::new(Handoff::new(config.session.output_queue_depth));
        Self {
            config,
            connector,
            store,
            handoff,
            sessions: Mutex::new(BTreeMap::new()),
            forwarder: Mutex::new(None),
            running: Arc::new(AtomicBool::new(false)),
            forwarded: Arc::new(AtomicU64::new(0)),
        }
    }

    fn sessions(&self) -> MutexGuard<'_, BTreeMap<DeviceRole, DeviceSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn handoff(&self) -> Arc<Handoff> {
        self.handoff.clone()
    }

    /// Initializes the sink and starts forwarding to it.
    pub fn start(&self, mut sink: Box<dyn OutputSink>) -> Result<()> {
        let mut forwarder = self.forwarder.lock().unwrap_or_else(PoisonError::into_inner);
        if forwarder.is_some() {
            warn!("Output forwarding is already running");
            return Ok(());
        }
        sink.initialize().context("Failed to initialize output sink")?;

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let handoff = self.handoff.clone();
        let forwarded = self.forwarded.clone();

        let handle = thread::Builder::new()
            .name("output-forwarder".to_string())
            .spawn(move || {
                info!("Output Thread Started");
                let mut send_warn = Throttle::default();
                while running.load(Ordering::SeqCst) {
                    let Some(sample) = handoff.pop_timeout(FORWARD_POLL) else {
                        continue;
                    };
                    match sink.send(&sample) {
                        Ok(()) => {
                            forwarded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            if let Some(hidden) = send_warn.ready() {
                                error!(
                                    "Failed to send {} sample: {} ({} similar hidden)",
                                    sample.role, e, hidden
                                );
                            }
                        }
                    }
                }
                info!("Output Thread Stopped");
            })
            .context("Failed to spawn output thread")?;
        *forwarder = Some(handle);
        Ok(())
    }

    /// Starts a session for `identity`. At most one session per role.
    pub fn connect(&self, identity: DeviceIdentity) -> Result<(), ConnectError> {
        let mut sessions = self.sessions();
        if sessions.contains_key(&identity.role) {
            return Err(ConnectError::AlreadyConnected(identity.role));
        }
        if sessions.len() >= MAX_DEVICES {
            return Err(ConnectError::InvalidIdentity(format!(
                "at most {} devices can be connected",
                MAX_DEVICES
            )));
        }

        let layout = self.config.layout_for(identity.role);
        let role = identity.role;
        let session = DeviceSession::spawn(
            identity,
            layout,
            &self.config,
            self.connector.clone(),
            self.store.clone(),
            self.handoff.clone(),
        )?;
        sessions.insert(role, session);
        Ok(())
    }

    /// Closes the session for `role`. Returns false when there was none.
    pub fn disconnect(&self, role: DeviceRole) -> bool {
        let session = self.sessions().remove(&role);
        match session {
            Some(mut session) => {
                session.close();
                self.handoff.clear(role);
                true
            }
            None => false,
        }
    }

    /// Tears the session down and starts a fresh one with the same identity.
    pub fn reconnect(&self, role: DeviceRole) -> Result<(), SessionError> {
        let identity = self
            .sessions()
            .get(&role)
            .map(|s| s.identity().clone())
            .ok_or(SessionError::NoSession(role))?;
        self.disconnect(role);
        self.connect(identity)?;
        Ok(())
    }

    pub fn roles(&self) -> Vec<DeviceRole> {
        self.sessions().keys().copied().collect()
    }

    fn handle(&self, role: DeviceRole) -> Result<SessionHandle, SessionError> {
        self.sessions()
            .get(&role)
            .map(|s| s.handle())
            .ok_or(SessionError::NoSession(role))
    }

    /// Sends a command to one session without blocking the others.
    pub fn command(
        &self,
        role: DeviceRole,
        command: SessionCommand,
    ) -> Result<CommandReply, SessionError> {
        self.handle(role)?.command(command)
    }

    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            devices: self.sessions().values().map(|s| s.status()).collect(),
        }
    }

    /// Samples delivered to the sink so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    pub fn shutdown(&self) {
        let sessions = std::mem::take(&mut *self.sessions());
        for (_, mut session) in sessions {
            session.close();
        }

        self.running.store(false, Ordering::SeqCst);
        self.handoff.close();
        let forwarder = self
            .forwarder
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = forwarder {
            if handle.join().is_err() {
                error!("Output thread panicked");
            }
        }
        info!("Tracking coordinator stopped");
    }
}

impl Drop for TrackingCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
