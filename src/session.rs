//! Workout sessions: the per-minute level logic and the state machine that
//! drives a bike through handshake, polling and shutdown.
//!
//! [`Session`] holds the pure bookkeeping (schedule, collected samples, applied
//! level) and never touches I/O. [`SessionRunner`] owns a [`Transport`] and
//! walks the session through its [`SessionState`]s:
//!
//! ```text
//! Idle -> Connecting -> Initializing -> ConfiguringLevel -> Running -> Stopping -> Finalized
//!              \______________\_________________\______________\
//!                                                               -> Failed
//! ```

use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};
use tokio::{
    sync::{mpsc, watch},
    time::{sleep, timeout, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{
    error::{BikeError, Result},
    program::{LevelSchedule, ResistanceProgram},
    protocol::{decode_notification, Command, Notification},
    telemetry::{parse_telemetry, TelemetrySample},
    transport::{Connection, NotificationSender, Transport},
    types::{SessionConfig, SessionOutcome, SessionState},
};

/// Frames exchanged before the first `SET_LEVEL`
const HANDSHAKE: [Command; 9] = [
    Command::Ping,
    Command::InitA0,
    Command::Ping,
    Command::Ping,
    Command::Ping,
    Command::Ping,
    Command::Ping,
    Command::InitA3,
    Command::InitA4,
];

/// Receives every decoded sample while a session runs
pub trait TelemetrySink: Send + Sync {
    /// Called once per telemetry frame, in arrival order
    fn on_sample(&self, sample: &TelemetrySample);
}

impl TelemetrySink for mpsc::UnboundedSender<TelemetrySample> {
    fn on_sample(&self, sample: &TelemetrySample) {
        // A closed receiver only means nobody is watching.
        let _ = self.send(*sample);
    }
}

/// Persists finished sessions
pub trait SessionStore: Send + Sync {
    /// Called exactly once per finalized session
    fn on_session_finalized(&self, record: &SessionRecord);
}

impl SessionStore for mpsc::UnboundedSender<SessionRecord> {
    fn on_session_finalized(&self, record: &SessionRecord) {
        let _ = self.send(record.clone());
    }
}

/// Aggregates over a session's samples
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Number of telemetry samples
    pub sample_count: usize,
    /// Elapsed time of the last sample
    pub duration: Duration,
    /// Distance of the last sample in km
    pub distance: f32,
    /// Calories of the last sample
    pub calories: u16,
    /// Mean speed in km/h
    pub avg_speed: f32,
    /// Top speed in km/h
    pub max_speed: f32,
    /// Mean cadence
    pub avg_rpm: f32,
    /// Peak cadence
    pub max_rpm: u16,
    /// Mean heart rate
    pub avg_heart_rate: f32,
    /// Peak heart rate
    pub max_heart_rate: u16,
    /// Mean power in watts
    pub avg_watt: f32,
    /// Peak power in watts
    pub max_watt: f32,
}

impl SessionSummary {
    /// Summarize `samples`; all zero when empty
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_samples(samples: &[TelemetrySample]) -> Self {
        let Some(last) = samples.last() else {
            return Self::default();
        };

        let count = samples.len() as f32;
        let mean = |field: fn(&TelemetrySample) -> f32| samples.iter().map(field).sum::<f32>() / count;
        let peak = |field: fn(&TelemetrySample) -> f32| samples.iter().map(field).fold(0.0, f32::max);

        Self {
            sample_count: samples.len(),
            duration: last.elapsed(),
            distance: last.distance,
            calories: last.calories,
            avg_speed: mean(|s| s.speed),
            max_speed: peak(|s| s.speed),
            avg_rpm: mean(|s| f32::from(s.rpm)),
            max_rpm: samples.iter().map(|s| s.rpm).max().unwrap_or(0),
            avg_heart_rate: mean(|s| f32::from(s.heart_rate)),
            max_heart_rate: samples.iter().map(|s| s.heart_rate).max().unwrap_or(0),
            avg_watt: mean(|s| s.watt),
            max_watt: peak(|s| s.watt),
        }
    }
}

/// A finished session as handed to [`SessionStore`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    /// Program that was ridden
    pub program: ResistanceProgram,
    /// Minute-by-minute levels
    pub schedule: LevelSchedule,
    /// Every sample in arrival order
    pub samples: Vec<TelemetrySample>,
    /// Aggregates over `samples`
    pub summary: SessionSummary,
    /// How the session ended
    pub outcome: SessionOutcome,
    /// Whether STOP reached the bike; false means it may still be running
    pub stopped_cleanly: bool,
    /// Wall-clock creation time of the session
    pub started_at: SystemTime,
}

/// What the runner has to do after a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleAction {
    /// Nothing; keep polling
    Continue,
    /// The scheduled level differs from the applied one
    ChangeLevel(u8),
    /// The programmed duration has elapsed
    Complete,
}

/// Bookkeeping for one workout
#[derive(Debug, Clone)]
pub struct Session {
    program: ResistanceProgram,
    schedule: LevelSchedule,
    current_minute: u32,
    applied_level: u8,
    samples: Vec<TelemetrySample>,
    started_at: SystemTime,
    finalized: bool,
}

impl Session {
    /// Create a session for `program`, building its schedule
    ///
    /// # Errors
    ///
    /// See [`ResistanceProgram::build_schedule`].
    pub fn new(program: ResistanceProgram) -> Result<Self> {
        let schedule = program.build_schedule()?;
        Ok(Self::with_schedule(program, schedule))
    }

    /// Create a session that follows a hand-made schedule
    ///
    /// The program's duration and base level are taken from the schedule.
    #[must_use]
    pub fn with_schedule(program: ResistanceProgram, schedule: LevelSchedule) -> Self {
        let base_level = schedule.level_at(0).unwrap_or(program.base_level);
        let program = ResistanceProgram {
            base_level,
            duration_minutes: u32::try_from(schedule.len()).unwrap_or(u32::MAX),
            ..program
        };

        Self {
            program,
            schedule,
            current_minute: 0,
            applied_level: base_level,
            samples: Vec::new(),
            started_at: SystemTime::now(),
            finalized: false,
        }
    }

    /// Program being ridden
    #[must_use]
    pub const fn program(&self) -> &ResistanceProgram {
        &self.program
    }

    /// Level schedule
    #[must_use]
    pub const fn schedule(&self) -> &LevelSchedule {
        &self.schedule
    }

    /// Samples collected so far
    #[must_use]
    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    /// Elapsed minute of the latest sample
    #[must_use]
    pub const fn current_minute(&self) -> u32 {
        self.current_minute
    }

    /// Last level written to the bike
    #[must_use]
    pub const fn applied_level(&self) -> u8 {
        self.applied_level
    }

    /// Whether [`Session::finalize`] already ran
    #[must_use]
    pub const fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Record a sample and decide what happens next
    ///
    /// The decision compares the schedule against the last applied level, not
    /// the level the console reports.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::AlreadyFinalized`] once the session is finalized.
    pub fn record_sample(&mut self, sample: TelemetrySample) -> Result<SampleAction> {
        if self.finalized {
            return Err(BikeError::AlreadyFinalized);
        }

        self.samples.push(sample);
        self.current_minute = sample.elapsed_minute();

        Ok(match self.schedule.level_at(self.current_minute) {
            None => SampleAction::Complete,
            Some(level) if level != self.applied_level => SampleAction::ChangeLevel(level),
            Some(_) => SampleAction::Continue,
        })
    }

    /// Note that `level` reached the bike
    pub fn level_applied(&mut self, level: u8) {
        self.applied_level = level;
    }

    /// Close the session and produce its record
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::AlreadyFinalized`] on a second call.
    pub fn finalize(&mut self, outcome: SessionOutcome) -> Result<SessionRecord> {
        if self.finalized {
            return Err(BikeError::AlreadyFinalized);
        }
        self.finalized = true;

        Ok(SessionRecord {
            program: self.program,
            schedule: self.schedule.clone(),
            summary: SessionSummary::from_samples(&self.samples),
            samples: self.samples.clone(),
            outcome,
            stopped_cleanly: false,
            started_at: self.started_at,
        })
    }
}

/// Drives one [`Session`] over a [`Transport`]
pub struct SessionRunner<T: Transport> {
    transport: T,
    config: SessionConfig,
    session: Session,
    state: watch::Sender<SessionState>,
    sink: Option<Arc<dyn TelemetrySink>>,
    store: Option<Arc<dyn SessionStore>>,
    cancel: CancellationToken,
}

impl<T: Transport> SessionRunner<T> {
    /// Create an idle runner
    #[must_use]
    pub fn new(transport: T, config: SessionConfig, session: Session) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            transport,
            config,
            session,
            state,
            sink: None,
            store: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Forward every sample to `sink`
    #[must_use]
    pub fn with_sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// Hand the finalized record to `store`
    #[must_use]
    pub fn with_store(mut self, store: impl SessionStore + 'static) -> Self {
        self.store = Some(Arc::new(store));
        self
    }

    /// Token that stops the session at the next poll
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch state transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The session being driven
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Run the session to completion, cancellation or failure
    ///
    /// The connection is released on every path. A session that fails after
    /// recording samples is still handed to the store with a
    /// [`SessionOutcome::Failed`] outcome.
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::InvalidState`] if the runner already ran, or the
    /// transport error that failed the session.
    pub async fn run(&mut self) -> Result<SessionRecord> {
        if self.state() != SessionState::Idle || self.session.is_finalized() {
            return Err(BikeError::InvalidState {
                state: self.state().to_string(),
            });
        }

        let program = *self.session.program();
        info!(
            "Starting {} session: level {} for {} minute(s)",
            program.kind, program.base_level, program.duration_minutes
        );

        self.set_state(SessionState::Connecting);
        let mut connection = match self.connect().await {
            Ok(connection) => connection,
            Err(e) => return Err(self.fail(e)),
        };

        let (notification_tx, mut notifications) = mpsc::unbounded_channel();
        let driven = self
            .drive(&mut connection, notification_tx, &mut notifications)
            .await;

        if let Err(e) = connection.disconnect().await {
            warn!("Disconnect failed: {}", e);
        }

        match driven {
            Ok((outcome, stopped_cleanly)) => self.finish(outcome, stopped_cleanly),
            Err(e) => Err(self.fail(e)),
        }
    }

    async fn drive(
        &mut self,
        connection: &mut T::Connection,
        notification_tx: NotificationSender,
        notifications: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<(SessionOutcome, bool)> {
        let characteristic = self.config.characteristic;
        let settle = self.config.timing.settle_delay();

        self.set_state(SessionState::Initializing);
        let timeout_ms = self.config.timing.write_timeout_ms;
        timeout(
            Duration::from_millis(timeout_ms),
            connection.subscribe(characteristic, notification_tx),
        )
        .await
        .unwrap_or(Err(BikeError::Timeout { timeout_ms }))?;

        for command in HANDSHAKE {
            self.send(connection, command, true).await?;
        }

        self.set_state(SessionState::ConfiguringLevel);
        let base_level = self.session.applied_level();
        self.send(connection, Command::SetLevel(base_level), true)
            .await?;
        sleep(settle).await;
        self.send(connection, Command::Start, true).await?;
        sleep(settle).await;

        let stale = discard_pending(notifications);
        if stale > 0 {
            debug!("Discarded {} notification(s) received during setup", stale);
        }

        self.set_state(SessionState::Running);
        let outcome = self.poll(connection, notifications).await?;

        self.set_state(SessionState::Stopping);
        let stopped_cleanly = match self.send(connection, Command::Stop, false).await {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to stop the bike, it may still be running: {}", e);
                false
            }
        };
        if let Err(e) = connection.unsubscribe(characteristic).await {
            warn!("Failed to unsubscribe: {}", e);
        }

        Ok((outcome, stopped_cleanly))
    }

    /// One READ per tick until the schedule runs out or the token fires
    async fn poll(
        &mut self,
        connection: &mut T::Connection,
        notifications: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<SessionOutcome> {
        let mut ticker = tokio::time::interval(self.config.timing.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let max_missed = self.config.timing.max_missed_reads.max(1);
        let mut missed = 0;

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!("Session cancelled at minute {}", self.session.current_minute());
                    return Ok(SessionOutcome::Cancelled);
                }
                _ = ticker.tick() => {}
            }

            // Frames that showed up after their READ timed out would answer this one.
            let stale = discard_pending(notifications);
            if stale > 0 {
                debug!("Discarded {} late notification(s)", stale);
            }

            self.send(connection, Command::Read, true).await?;
            let Some(sample) = self.await_telemetry(notifications).await? else {
                missed += 1;
                if missed >= max_missed {
                    error!("{} READs in a row went unanswered", missed);
                    return Err(BikeError::Timeout {
                        timeout_ms: self.config.timing.notification_timeout_ms,
                    });
                }
                continue;
            };
            missed = 0;

            debug!(
                "{} level {} | {:.1} km/h {} rpm {:.1} W {} bpm",
                sample, sample.level, sample.speed, sample.rpm, sample.watt, sample.heart_rate
            );
            if let Some(sink) = &self.sink {
                sink.on_sample(&sample);
            }

            match self.session.record_sample(sample)? {
                SampleAction::Continue => {}
                SampleAction::ChangeLevel(level) => {
                    info!(
                        "Minute {}: resistance {} -> {}",
                        self.session.current_minute(),
                        self.session.applied_level(),
                        level
                    );
                    self.send(connection, Command::SetLevel(level), true).await?;
                    self.session.level_applied(level);
                    sleep(self.config.timing.settle_delay()).await;
                }
                SampleAction::Complete => {
                    info!("Program complete after {} minute(s)", self.session.current_minute());
                    return Ok(SessionOutcome::Completed);
                }
            }
        }
    }

    /// Wait for the telemetry frame answering a READ, dropping anything else
    ///
    /// A single missing frame is not fatal; the next tick asks again.
    async fn await_telemetry(
        &self,
        notifications: &mut mpsc::UnboundedReceiver<Vec<u8>>,
    ) -> Result<Option<TelemetrySample>> {
        let wait = Duration::from_millis(self.config.timing.notification_timeout_ms);
        let deadline = tokio::time::Instant::now() + wait;

        loop {
            match tokio::time::timeout_at(deadline, notifications.recv()).await {
                Err(_) => {
                    warn!("No telemetry within {}ms of READ", wait.as_millis());
                    return Ok(None);
                }
                Ok(None) => return Err(BikeError::Disconnected),
                Ok(Some(data)) => match decode_notification(&data) {
                    Notification::Telemetry(raw) => return Ok(Some(parse_telemetry(&raw))),
                    Notification::Pong => trace!("PONG"),
                    Notification::NotRecognized => {
                        trace!("Dropping unrecognized notification: {:02X?}", data);
                    }
                },
            }
        }
    }

    async fn connect(&self) -> Result<T::Connection> {
        let retry = &self.config.retry;
        let timeout_ms = self.config.timing.connect_timeout_ms;
        let mut attempt = 0;

        loop {
            info!(
                "Connecting to {} (attempt {}/{})",
                self.config.device_id,
                attempt + 1,
                retry.max_retries + 1
            );
            let result = timeout(
                Duration::from_millis(timeout_ms),
                self.transport.connect(&self.config.device_id),
            )
            .await
            .unwrap_or(Err(BikeError::Timeout { timeout_ms }));

            match result {
                Ok(connection) => return Ok(connection),
                Err(e) if attempt < retry.max_retries && e.is_recoverable() => {
                    attempt += 1;
                    warn!("Connect failed, retrying in {}ms: {}", retry.retry_delay_ms, e);
                    sleep(Duration::from_millis(retry.retry_delay_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send(
        &self,
        connection: &mut T::Connection,
        command: Command,
        require_ack: bool,
    ) -> Result<()> {
        let retry = &self.config.retry;
        let timeout_ms = self.config.timing.write_timeout_ms;
        let frame = command.encode();
        let mut attempt = 0;

        loop {
            debug!("Sending {}: {:02X?}", command, &frame[..]);
            let result = timeout(
                Duration::from_millis(timeout_ms),
                connection.write(self.config.characteristic, &frame, require_ack),
            )
            .await
            .unwrap_or(Err(BikeError::Timeout { timeout_ms }));

            match result {
                Ok(()) => return Ok(()),
                Err(e) if attempt < retry.max_retries && e.is_recoverable() => {
                    attempt += 1;
                    warn!(
                        "{} failed on attempt {}/{}, retrying in {}ms: {}",
                        command,
                        attempt,
                        retry.max_retries + 1,
                        retry.retry_delay_ms,
                        e
                    );
                    sleep(Duration::from_millis(retry.retry_delay_ms)).await;
                }
                Err(e) => {
                    error!("{} failed after {} attempt(s): {}", command, attempt + 1, e);
                    return Err(e);
                }
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state.send_replace(state);
        debug!("Session state: {} -> {}", previous, state);
    }

    fn persist(&self, record: &SessionRecord) {
        if let Some(store) = &self.store {
            store.on_session_finalized(record);
        }
    }

    fn finish(&mut self, outcome: SessionOutcome, stopped_cleanly: bool) -> Result<SessionRecord> {
        let mut record = self.session.finalize(outcome)?;
        record.stopped_cleanly = stopped_cleanly;
        self.persist(&record);
        self.set_state(SessionState::Finalized);
        info!(
            "Session finalized: {} after {} sample(s)",
            record.outcome,
            record.samples.len()
        );
        Ok(record)
    }

    /// Move to `Failed`, keeping whatever was recorded
    fn fail(&mut self, error: BikeError) -> BikeError {
        if error.is_transport_error() {
            error!("Session failed, bike unreachable: {}", error);
        } else {
            error!("Session failed: {}", error);
        }
        if !self.session.samples().is_empty() {
            match self
                .session
                .finalize(SessionOutcome::Failed(error.to_string()))
            {
                Ok(record) => self.persist(&record),
                Err(e) => warn!("Could not record the failed session: {}", e),
            }
        }
        self.set_state(SessionState::Failed);
        error
    }
}

/// Empty the notification queue, returning how many frames were dropped
fn discard_pending(notifications: &mut mpsc::UnboundedReceiver<Vec<u8>>) -> usize {
    let mut discarded = 0;
    while notifications.try_recv().is_ok() {
        discarded += 1;
    }
    discarded
}
