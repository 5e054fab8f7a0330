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

use crate::gateway::{PlaybackGateway, SyncError};
use crate::models::PlaybackSnapshot;
use log::debug;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Result of one snapshot fetch, tagged with the session epoch that asked for it.
#[derive(Debug)]
pub struct PollOutcome {
    pub epoch: u64,
    /// When the response (or failure) came back.
    pub received_at: Instant,
    pub result: Result<Option<PlaybackSnapshot>, SyncError>,
}

struct Running {
    refresh: mpsc::UnboundedSender<()>,
    task: JoinHandle<()>,
}

/// Fetches snapshots on a fixed period and on demand.
///
/// Every fetch runs inside the poller's one task, so scheduled and on-demand
/// requests never overlap.
pub struct Poller {
    gateway: Arc<dyn PlaybackGateway>,
    period: Duration,
    outcomes: mpsc::UnboundedSender<PollOutcome>,
    running: Option<Running>,
}

impl Poller {
    pub fn new(
        gateway: Arc<dyn PlaybackGateway>,
        period: Duration,
        outcomes: mpsc::UnboundedSender<PollOutcome>,
    ) -> Self {
        Self {
            gateway,
            period,
            outcomes,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    /// Starts the timer; the first fetch happens immediately. Does nothing if
    /// already running.
    pub fn start(&mut self, epoch: u64) {
        if self.is_running() {
            debug!("Poller already running");
            return;
        }

        let (refresh_tx, mut refresh_rx) = mpsc::unbounded_channel::<()>();
        let gateway = Arc::clone(&self.gateway);
        let outcomes = self.outcomes.clone();
        let period = self.period;

        let task = tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    request = refresh_rx.recv() => {
                        if request.is_none() {
                            break;
                        }
                        // Requests queued meanwhile are served by this fetch.
                        while refresh_rx.try_recv().is_ok() {}
                        interval.reset();
                    }
                }

                let result = gateway.fetch_snapshot().await;
                let outcome = PollOutcome {
                    epoch,
                    received_at: Instant::now(),
                    result,
                };
                if outcomes.send(outcome).is_err() {
                    break;
                }
            }
        });

        debug!("Poller started ({:?} period)", self.period);
        self.running = Some(Running {
            refresh: refresh_tx,
            task,
        });
    }

    /// Requests an immediate fetch. Ignored when stopped.
    pub fn fetch_now(&self) {
        if let Some(running) = &self.running {
            let _ = running.refresh.send(());
        }
    }

    /// Cancels the timer and any fetch in flight. Safe to call when stopped.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.task.abort();
            debug!("Poller stopped");
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.stop();
    }
}
