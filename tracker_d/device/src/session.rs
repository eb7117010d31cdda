use api::{ChannelLayout, ConnectionStatus, DeviceIdentity, DeviceRole, DeviceStatus};
use common::config::{SessionConfig, TrackerConfig};
use common::{
    CalibrationCommand, CalibrationOutcome, ConnectError, KalmanParams, SessionError,
    SettingsStore, Throttle, TrackingMutator, TransportError,
};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, PoisonError, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::decoder::TelemetryDecoder;
use crate::handoff::Handoff;
use crate::transport::{Connector, DeviceCommand, TransportChannel};

const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionCommand {
    Calibrate(CalibrationCommand),
    SetFilterEnabled(bool),
    SetKalmanParams(KalmanParams),
    SetBrightness(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandReply {
    Done,
    /// Set for a successful commit.
    Calibration(Option<CalibrationOutcome>),
}

struct Request {
    command: SessionCommand,
    reply: Sender<Result<CommandReply, SessionError>>,
}

/// Cloneable sender side of a session's command queue.
#[derive(Clone)]
pub struct SessionHandle {
    role: DeviceRole,
    commands: Sender<Request>,
    timeout: Duration,
}

impl SessionHandle {
    pub fn role(&self) -> DeviceRole {
        self.role
    }

    pub fn command(&self, command: SessionCommand) -> Result<CommandReply, SessionError> {
        let (reply, answer) = channel();
        self.commands
            .send(Request { command, reply })
            .map_err(|_| SessionError::Closed(self.role))?;
        match answer.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(SessionError::Timeout(self.role)),
            Err(RecvTimeoutError::Disconnected) => Err(SessionError::Closed(self.role)),
        }
    }

    pub fn calibrate(
        &self,
        command: CalibrationCommand,
    ) -> Result<Option<CalibrationOutcome>, SessionError> {
        match self.command(SessionCommand::Calibrate(command))? {
            CommandReply::Calibration(outcome) => Ok(outcome),
            CommandReply::Done => Ok(None),
        }
    }

    pub fn set_filter_enabled(&self, enabled: bool) -> Result<(), SessionError> {
        self.command(SessionCommand::SetFilterEnabled(enabled))
            .map(|_| ())
    }

    pub fn set_kalman_params(&self, params: KalmanParams) -> Result<(), SessionError> {
        self.command(SessionCommand::SetKalmanParams(params))
            .map(|_| ())
    }

    pub fn set_brightness(&self, value: u8) -> Result<(), SessionError> {
        self.command(SessionCommand::SetBrightness(value))
            .map(|_| ())
    }
}

/// One device's connection and pipeline, running on its own thread.
pub struct DeviceSession {
    identity: DeviceIdentity,
    status: Arc<RwLock<DeviceStatus>>,
    handle: SessionHandle,
    cancel: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl DeviceSession {
    pub fn spawn(
        identity: DeviceIdentity,
        layout: ChannelLayout,
        config: &TrackerConfig,
        connector: Arc<dyn Connector>,
        store: Arc<dyn SettingsStore>,
        handoff: Arc<Handoff>,
    ) -> Result<Self, ConnectError> {
        if layout.role != identity.role {
            return Err(ConnectError::InvalidIdentity(format!(
                "{} layout given to a {} session",
                layout.role, identity.role
            )));
        }
        layout.validate().map_err(ConnectError::InvalidIdentity)?;

        let mutator = TrackingMutator::new(layout.clone(), config);
        let mut initial = DeviceStatus::new(&identity);
        initial.filter_enabled = mutator.filter_enabled();
        let status = Arc::new(RwLock::new(initial));
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = channel();

        let worker = Worker {
            identity: identity.clone(),
            config: config.session.clone(),
            connector,
            store,
            handoff,
            status: status.clone(),
            cancel: cancel.clone(),
            commands: rx,
            decoder: TelemetryDecoder::new(identity.role, layout.len()),
            mutator,
            settings_loaded: false,
            last_frame: None,
            decode_warn: Throttle::default(),
            frames_received: 0,
            frames_rejected: 0,
        };

        let name = format!("session-{}", identity.role);
        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || worker.run())
            .map_err(|e| ConnectError::Unreachable(identity.address.clone(), e.to_string()))?;

        Ok(Self {
            handle: SessionHandle {
                role: identity.role,
                commands: tx,
                timeout: Duration::from_millis(config.session.command_timeout_ms),
            },
            identity,
            status,
            cancel,
            worker: Some(worker),
        })
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn role(&self) -> DeviceRole {
        self.identity.role
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn command(&self, command: SessionCommand) -> Result<CommandReply, SessionError> {
        self.handle.command(command)
    }

    pub fn calibrate(
        &self,
        command: CalibrationCommand,
    ) -> Result<Option<CalibrationOutcome>, SessionError> {
        self.handle.calibrate(command)
    }

    /// Stops the worker, releases the transport and drops any open
    /// calibration window.
    pub fn close(&mut self) {
        self.cancel.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("{} session worker panicked", self.identity.role);
            }
            let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
            status.connection = ConnectionStatus::Disconnected;
            status.calibrating = None;
            info!("{} session closed", self.identity.role);
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct Worker {
    identity: DeviceIdentity,
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    store: Arc<dyn SettingsStore>,
    handoff: Arc<Handoff>,
    status: Arc<RwLock<DeviceStatus>>,
    cancel: Arc<AtomicBool>,
    commands: Receiver<Request>,
    decoder: TelemetryDecoder,
    mutator: TrackingMutator,
    settings_loaded: bool,
    last_frame: Option<Instant>,
    decode_warn: Throttle,
    frames_received: u64,
    frames_rejected: u64,
}

impl Worker {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    fn update_status(&self, f: impl FnOnce(&mut DeviceStatus)) {
        let mut status = self.status.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut status);
    }

    fn set_connection(&self, connection: ConnectionStatus, error: Option<String>) {
        self.update_status(|s| {
            s.connection = connection;
            if error.is_some() {
                s.last_error = error;
            }
        });
    }

    fn run(mut self) {
        let role = self.identity.role;
        while !self.cancelled() {
            self.set_connection(ConnectionStatus::Connecting, None);
            match self.connector.connect(&self.identity) {
                Ok(mut channel) => {
                    self.on_connected();
                    let result = self.pump(channel.as_mut());
                    channel.close();
                    self.on_disconnected();
                    match result {
                        Ok(()) => break,
                        Err(e) => {
                            error!("{} transport failed: {}", role, e);
                            self.set_connection(ConnectionStatus::Error, Some(e.to_string()));
                        }
                    }
                }
                Err(e) => {
                    error!("{} connect failed: {}", role, e);
                    self.set_connection(ConnectionStatus::Error, Some(e.to_string()));
                    if matches!(e, ConnectError::InvalidIdentity(_)) {
                        break;
                    }
                }
            }

            if !self.config.auto_reconnect {
                break;
            }
            info!(
                "{}: reconnecting in {} ms",
                role, self.config.reconnect_delay_ms
            );
            self.idle(Duration::from_millis(self.config.reconnect_delay_ms));
        }

        // Keep answering until the owner decides to close us.
        while !self.cancelled() {
            self.idle(IDLE_POLL);
        }
        self.mutator.abort_calibration();
        debug!("{} worker exiting", role);
    }

    fn on_connected(&mut self) {
        if !self.settings_loaded {
            self.settings_loaded = true;
            let role = self.identity.role;
            match self.store.load(role) {
                Ok(Some(settings)) => {
                    if !self.mutator.load_settings(settings) {
                        warn!(
                            "{}: stored calibration does not match the channel layout, ignoring it",
                            role
                        );
                    }
                }
                Ok(None) => info!("{}: no stored calibration", role),
                Err(e) => {
                    warn!("{}: {}", role, e);
                    self.update_status(|s| s.last_error = Some(e.to_string()));
                }
            }
        }

        self.decoder.reset_sequence();
        self.last_frame = None;
        let needs_calibration = self.mutator.needs_calibration();
        if needs_calibration {
            info!("{}: device needs calibration", self.identity.role);
        }
        self.update_status(|s| {
            s.connection = ConnectionStatus::Connected;
            s.needs_calibration = needs_calibration;
            s.last_error = None;
        });
        info!("{} connected", self.identity);
    }

    fn on_disconnected(&mut self) {
        // An interrupted window is never committed later.
        if self.mutator.collecting().is_some() {
            info!("{}: connection lost, calibration cancelled", self.identity.role);
            self.mutator.abort_calibration();
        }
        self.update_status(|s| s.calibrating = None);
    }

    /// Reads until cancelled (`Ok`) or the transport fails.
    fn pump(&mut self, channel: &mut dyn TransportChannel) -> Result<(), TransportError> {
        loop {
            if self.cancelled() {
                return Ok(());
            }
            self.drain_commands(Some(&mut *channel));
            if let Some(body) = channel.read_frame()? {
                self.handle_frame(&body);
            }
        }
    }

    fn idle(&mut self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while !self.cancelled() && Instant::now() < deadline {
            self.drain_commands(None);
            thread::sleep(IDLE_POLL.min(deadline.saturating_duration_since(Instant::now())));
        }
    }

    fn handle_frame(&mut self, body: &[u8]) {
        self.frames_received += 1;
        let raw = match self.decoder.decode(body) {
            Ok(raw) => raw,
            Err(e) => {
                self.frames_rejected += 1;
                if let Some(hidden) = self.decode_warn.ready() {
                    warn!(
                        "{}: dropped frame: {} ({} similar hidden)",
                        self.identity.role, e, hidden
                    );
                }
                let rejected = self.frames_rejected;
                let received = self.frames_received;
                self.update_status(|s| {
                    s.frames_rejected = rejected;
                    s.frames_received = received;
                });
                return;
            }
        };

        let now = Instant::now();
        let dt = self
            .last_frame
            .map(|t| now.duration_since(t).as_secs_f32())
            .unwrap_or(0.0);
        self.last_frame = Some(now);

        let (sample, auto_commit) = self.mutator.process(&raw, dt);
        if let Some(result) = auto_commit {
            match result {
                Ok(outcome) => self.after_commit(&outcome),
                Err(e) => warn!("{}: automatic calibration failed: {}", self.identity.role, e),
            }
            self.refresh_pipeline_status();
        }

        let role = sample.role;
        #[cfg(feature = "xtralog")]
        log::trace!(
            "{} frame #{} dt={:.4}s battery={:?}",
            role,
            raw.sequence,
            dt,
            raw.battery
        );
        self.handoff.push(sample);

        let superseded = self.handoff.superseded(role);
        let dropped = self.decoder.dropped_frames();
        let received = self.frames_received;
        self.update_status(|s| {
            s.frames_received = received;
            s.frames_dropped = dropped;
            s.samples_superseded = superseded;
            if raw.battery.is_some() {
                s.battery = raw.battery;
            }
            if raw.link_quality.is_some() {
                s.link_quality = raw.link_quality;
            }
        });
    }

    fn drain_commands(&mut self, mut channel: Option<&mut dyn TransportChannel>) {
        loop {
            let request = match self.commands.try_recv() {
                Ok(request) => request,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return,
            };
            let link = channel.as_mut().map(|c| -> &mut dyn TransportChannel { &mut **c });
            let result = self.execute(request.command, link);
            // The caller may have given up waiting.
            let _ = request.reply.send(result);
        }
    }

    fn execute(
        &mut self,
        command: SessionCommand,
        channel: Option<&mut dyn TransportChannel>,
    ) -> Result<CommandReply, SessionError> {
        let role = self.identity.role;
        let reply = match command {
            SessionCommand::Calibrate(cmd) => {
                let outcome = self.mutator.calibrate(cmd);
                self.refresh_pipeline_status();
                let outcome = outcome?;
                if let Some(outcome) = &outcome {
                    self.after_commit(outcome);
                }
                CommandReply::Calibration(outcome)
            }
            SessionCommand::SetFilterEnabled(enabled) => {
                self.mutator.set_filter_enabled(enabled);
                info!("{}: filtering {}", role, if enabled { "on" } else { "off" });
                self.refresh_pipeline_status();
                CommandReply::Done
            }
            SessionCommand::SetKalmanParams(params) => {
                self.mutator
                    .set_kalman_params(params)
                    .map_err(SessionError::InvalidParams)?;
                info!(
                    "{}: filter tuning dt={} q={} r={}",
                    role, params.dt, params.q, params.r
                );
                self.persist();
                CommandReply::Done
            }
            SessionCommand::SetBrightness(value) => {
                let channel = channel.ok_or(SessionError::Transport(TransportError::Closed))?;
                channel.send(&DeviceCommand::SetBrightness(value).encode())?;
                info!("{}: brightness set to {}", role, value);
                CommandReply::Done
            }
        };
        Ok(reply)
    }

    fn after_commit(&mut self, outcome: &CalibrationOutcome) {
        debug!(
            "{}: {:?} calibration updated channels {:?}",
            self.identity.role, outcome.kind, outcome.changed
        );
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self
            .store
            .save(self.identity.role, &self.mutator.settings())
        {
            error!("{}", e);
            self.update_status(|s| s.last_error = Some(e.to_string()));
        }
    }

    fn refresh_pipeline_status(&self) {
        let calibrating = self.mutator.collecting();
        let needs_calibration = self.mutator.needs_calibration();
        let filter_enabled = self.mutator.filter_enabled();
        self.update_status(|s| {
            s.calibrating = calibrating;
            s.needs_calibration = needs_calibration;
            s.filter_enabled = filter_enabled;
        });
    }
}
