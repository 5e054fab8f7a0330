/*
    looply | Spotify now-playing sync and library reader.
    Copyright (C) 2025  The Looply contributors

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

//! The now-playing session: one poller, one display clock and the estimator,
//! all driven from a single task.
//!
//! Network calls run on their own tasks and hand their results back over
//! channels; only the session task touches [`SessionState`].

use crate::auth::CredentialStore;
use crate::estimator::ProgressEstimator;
use crate::gateway::{ControlFailure, PlaybackGateway, SyncError};
use crate::models::{format_time, Track};
use crate::poller::{PollOutcome, Poller};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_DISPLAY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    /// Display refresh period; only ticks while playing.
    pub display_interval: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            display_interval: DEFAULT_DISPLAY_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlAction {
    Pause,
    Resume,
}

impl ControlAction {
    pub fn target_playing(self) -> bool {
        matches!(self, ControlAction::Resume)
    }
}

#[derive(Debug)]
pub struct ControlOutcome {
    pub epoch: u64,
    pub action: ControlAction,
    pub completed_at: Instant,
    pub result: Result<(), ControlFailure>,
}

/// What the presentation layer renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressView {
    pub track: Option<Track>,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub duration_ms: Option<u64>,
}

impl ProgressView {
    /// Progress in `[0, 1]`; zero when the duration is unknown.
    pub fn ratio(&self) -> f64 {
        match self.duration_ms {
            Some(duration) if duration > 0 => {
                (self.progress_ms as f64 / duration as f64).clamp(0.0, 1.0)
            }
            _ => 0.0,
        }
    }

    pub fn elapsed_label(&self) -> String {
        format_time(self.progress_ms)
    }

    pub fn total_label(&self) -> Option<String> {
        self.duration_ms.map(format_time)
    }

    pub fn remaining_label(&self) -> Option<String> {
        self.duration_ms
            .map(|duration| format_time(duration.saturating_sub(self.progress_ms)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A fresh snapshot was applied.
    Updated(ProgressView),
    /// Nothing is playing on the account.
    Idle,
    /// Display refresh while playing.
    Tick(ProgressView),
    /// A pause/resume succeeded and was applied ahead of the next poll.
    PlaybackChanged(ProgressView),
    /// The last known state stays on display.
    PollFailed(SyncError),
    ControlFailed(ControlFailure),
}

/// State owned by one now-playing session.
///
/// Outcomes are only applied while the session is active and carry the
/// current epoch; anything else is a response that outlived its session.
#[derive(Debug, Default)]
pub struct SessionState {
    estimator: ProgressEstimator,
    track: Option<Track>,
    epoch: u64,
    active: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begins a new lifetime with empty state and returns its epoch.
    pub fn activate(&mut self) -> u64 {
        self.epoch += 1;
        self.active = true;
        self.estimator = ProgressEstimator::new();
        self.track = None;
        self.epoch
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.epoch += 1;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn is_playing(&self) -> bool {
        self.estimator.is_playing()
    }

    pub fn estimator(&self) -> &ProgressEstimator {
        &self.estimator
    }

    pub fn track(&self) -> Option<&Track> {
        self.track.as_ref()
    }

    fn accepts(&self, epoch: u64) -> bool {
        self.active && epoch == self.epoch
    }

    pub fn handle_poll(&mut self, outcome: PollOutcome) -> Option<SessionEvent> {
        if !self.accepts(outcome.epoch) {
            debug!("Discarding poll response from epoch {}", outcome.epoch);
            return None;
        }

        match outcome.result {
            Ok(Some(snapshot)) => {
                if !self
                    .estimator
                    .apply_snapshot_at(Some(&snapshot), outcome.received_at)
                {
                    return None;
                }
                self.track = snapshot.track;
                Some(SessionEvent::Updated(self.view_at(outcome.received_at)))
            }
            Ok(None) => {
                if !self.estimator.apply_snapshot_at(None, outcome.received_at) {
                    return None;
                }
                self.track = None;
                Some(SessionEvent::Idle)
            }
            Err(e) => {
                warn!("Now-playing poll failed: {}", e);
                Some(SessionEvent::PollFailed(e))
            }
        }
    }

    pub fn handle_control(&mut self, outcome: ControlOutcome) -> Option<SessionEvent> {
        if !self.accepts(outcome.epoch) {
            debug!("Discarding {:?} result from epoch {}", outcome.action, outcome.epoch);
            return None;
        }

        match outcome.result {
            Ok(()) => {
                self.estimator.apply_optimistic_transition_at(
                    outcome.action.target_playing(),
                    outcome.completed_at,
                );
                Some(SessionEvent::PlaybackChanged(
                    self.view_at(outcome.completed_at),
                ))
            }
            Err(failure) => {
                warn!("{:?} rejected: {}", outcome.action, failure);
                Some(SessionEvent::ControlFailed(failure))
            }
        }
    }

    pub fn view_at(&self, now: Instant) -> ProgressView {
        ProgressView {
            track: self.track.clone(),
            is_playing: self.estimator.is_playing(),
            progress_ms: self.estimator.estimate_at(now).unwrap_or(0),
            duration_ms: self.estimator.duration_ms(),
        }
    }
}

#[derive(Debug)]
enum Command {
    Refresh,
    Toggle,
    Control(ControlAction),
    Stop,
}

struct Running {
    commands: mpsc::UnboundedSender<Command>,
    /// Cleared by `stop` before the driver sees the command.
    alive: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Running {
    fn halt(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let _ = self.commands.send(Command::Stop);
    }
}

/// Handle to a now-playing session. Events arrive on the receiver returned
/// by [`NowPlayingSession::new`].
pub struct NowPlayingSession {
    gateway: Arc<dyn PlaybackGateway>,
    credentials: Arc<dyn CredentialStore>,
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    running: Option<Running>,
}

impl NowPlayingSession {
    pub fn new(
        gateway: Arc<dyn PlaybackGateway>,
        credentials: Arc<dyn CredentialStore>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let session = Self {
            gateway,
            credentials,
            config,
            events,
            running: None,
        };
        (session, rx)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Starts polling (with one immediate fetch) and the display clock.
    /// Calling it on a running session does nothing.
    pub fn start(&mut self) {
        if self.is_running() {
            debug!("Now-playing session already running");
            return;
        }

        let (commands, rx) = mpsc::unbounded_channel();
        let alive = Arc::new(AtomicBool::new(true));
        let driver = SessionDriver {
            gateway: Arc::clone(&self.gateway),
            credentials: Arc::clone(&self.credentials),
            config: self.config,
            events: self.events.clone(),
            alive: Arc::clone(&alive),
        };
        let task = tokio::spawn(driver.run(rx));
        self.running = Some(Running {
            commands,
            alive,
            task,
        });
    }

    /// Stops both clocks. No event is emitted after this returns; responses
    /// still in flight or already queued are dropped.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.halt();
        }
    }

    /// Like [`stop`](Self::stop), but waits for the session task to finish.
    pub async fn shutdown(&mut self) {
        if let Some(running) = self.running.take() {
            running.halt();
            if let Err(e) = running.task.await {
                warn!("Now-playing session ended abnormally: {}", e);
            }
        }
    }

    pub fn refresh(&self) {
        self.send(Command::Refresh);
    }

    /// Pauses when playing, resumes otherwise.
    pub fn toggle(&self) {
        self.send(Command::Toggle);
    }

    pub fn pause(&self) {
        self.send(Command::Control(ControlAction::Pause));
    }

    pub fn resume(&self) {
        self.send(Command::Control(ControlAction::Resume));
    }

    fn send(&self, command: Command) {
        match &self.running {
            Some(running) => {
                let _ = running.commands.send(command);
            }
            None => debug!("Session not running, ignoring {:?}", command),
        }
    }
}

impl Drop for NowPlayingSession {
    fn drop(&mut self) {
        self.stop();
    }
}

struct SessionDriver {
    gateway: Arc<dyn PlaybackGateway>,
    credentials: Arc<dyn CredentialStore>,
    config: SessionConfig,
    events: mpsc::UnboundedSender<SessionEvent>,
    alive: Arc<AtomicBool>,
}

impl SessionDriver {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn run(self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let mut state = SessionState::new();
        let epoch = state.activate();

        let (poll_tx, mut poll_rx) = mpsc::unbounded_channel();
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        let mut poller = Poller::new(Arc::clone(&self.gateway), self.config.poll_interval, poll_tx);
        poller.start(epoch);

        let mut display = time::interval(self.config.display_interval);
        display.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Now-playing session started");

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    None | Some(Command::Stop) => break,
                    Some(Command::Refresh) => poller.fetch_now(),
                    Some(Command::Toggle) => {
                        let action = if state.is_playing() {
                            ControlAction::Pause
                        } else {
                            ControlAction::Resume
                        };
                        self.spawn_control(action, epoch, &control_tx);
                    }
                    Some(Command::Control(action)) => self.spawn_control(action, epoch, &control_tx),
                },
                Some(outcome) = poll_rx.recv() => {
                    if !self.is_alive() {
                        break;
                    }
                    if let Some(event) = state.handle_poll(outcome) {
                        if let SessionEvent::PollFailed(e) = &event {
                            if e.is_credential_expired() {
                                self.discard_credential().await;
                            }
                        }
                        if state.is_playing() {
                            display.reset();
                        }
                        self.emit(event);
                    }
                },
                Some(outcome) = control_rx.recv() => {
                    if !self.is_alive() {
                        break;
                    }
                    let succeeded = outcome.result.is_ok();
                    if let Some(event) = state.handle_control(outcome) {
                        if event == SessionEvent::ControlFailed(ControlFailure::CredentialExpired) {
                            self.discard_credential().await;
                        }
                        if succeeded {
                            poller.fetch_now();
                            display.reset();
                        }
                        self.emit(event);
                    }
                },
                _ = display.tick(), if state.is_playing() => {
                    if !self.is_alive() {
                        break;
                    }
                    self.emit(SessionEvent::Tick(state.view_at(Instant::now())));
                }
            }
        }

        poller.stop();
        state.deactivate();
        info!("Now-playing session stopped");
    }

    fn spawn_control(
        &self,
        action: ControlAction,
        epoch: u64,
        results: &mpsc::UnboundedSender<ControlOutcome>,
    ) {
        debug!("Requesting {:?}", action);
        let gateway = Arc::clone(&self.gateway);
        let results = results.clone();
        tokio::spawn(async move {
            let result = match action {
                ControlAction::Pause => gateway.pause().await,
                ControlAction::Resume => gateway.resume().await,
            };
            let _ = results.send(ControlOutcome {
                epoch,
                action,
                completed_at: Instant::now(),
                result,
            });
        });
    }

    async fn discard_credential(&self) {
        info!("Spotify credential expired, discarding it");
        if let Err(e) = self.credentials.discard().await {
            warn!("Failed to discard credential: {}", e);
        }
    }

    fn emit(&self, event: SessionEvent) {
        if !self.is_alive() {
            debug!("Session stopped, dropping {:?}", event);
            return;
        }
        if self.events.send(event).is_err() {
            debug!("No listener for session events");
        }
    }
}
