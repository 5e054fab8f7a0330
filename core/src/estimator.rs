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

//! Local progress extrapolation between snapshots.
//!
//! The estimator keeps a baseline (progress, instant) pair and derives the
//! displayed position from wall-clock time elapsed since it. It does no
//! scheduling of its own; callers query it on each display tick.

use crate::models::PlaybackSnapshot;
use log::debug;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Baseline {
    progress_ms: u64,
    at: Instant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EstimatorState {
    baseline: Baseline,
    is_playing: bool,
    duration_ms: Option<u64>,
}

/// `None` state means idle: nothing is playing on the account.
#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    state: Option<EstimatorState>,
}

impl ProgressEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_none()
    }

    pub fn is_playing(&self) -> bool {
        self.state.map(|s| s.is_playing).unwrap_or(false)
    }

    pub fn duration_ms(&self) -> Option<u64> {
        self.state.and_then(|s| s.duration_ms)
    }

    /// The instant the current baseline was taken.
    pub fn baseline_at(&self) -> Option<Instant> {
        self.state.map(|s| s.baseline.at)
    }

    pub fn baseline_progress_ms(&self) -> Option<u64> {
        self.state.map(|s| s.baseline.progress_ms)
    }

    pub fn apply_snapshot(&mut self, snapshot: Option<&PlaybackSnapshot>) -> bool {
        self.apply_snapshot_at(snapshot, Instant::now())
    }

    /// Applies a snapshot observed at `at`.
    ///
    /// Returns `false` (leaving state untouched) when `at` predates the
    /// current baseline. A snapshot without `progress_ms` keeps the existing
    /// baseline as is.
    pub fn apply_snapshot_at(&mut self, snapshot: Option<&PlaybackSnapshot>, at: Instant) -> bool {
        if let Some(current) = self.state {
            if at < current.baseline.at {
                debug!("Ignoring snapshot older than the current baseline");
                return false;
            }
        }

        let Some(snapshot) = snapshot else {
            self.state = None;
            return true;
        };

        let baseline = match (snapshot.progress_ms, self.state) {
            (Some(progress_ms), _) => Baseline { progress_ms, at },
            (None, Some(current)) => current.baseline,
            (None, None) => Baseline { progress_ms: 0, at },
        };

        self.state = Some(EstimatorState {
            baseline,
            is_playing: snapshot.is_playing,
            duration_ms: snapshot.duration_ms(),
        });
        true
    }

    pub fn apply_optimistic_transition(&mut self, playing: bool) {
        self.apply_optimistic_transition_at(playing, Instant::now())
    }

    /// Rebases onto the current estimate and flips the playing flag.
    ///
    /// No-op while idle: there is no track to extrapolate. The baseline never
    /// moves back in time.
    pub fn apply_optimistic_transition_at(&mut self, playing: bool, at: Instant) {
        let Some(current) = self.state else {
            return;
        };
        let at = at.max(current.baseline.at);
        let progress_ms = self
            .estimate_at(at)
            .unwrap_or(current.baseline.progress_ms);
        self.state = Some(EstimatorState {
            baseline: Baseline { progress_ms, at },
            is_playing: playing,
            ..current
        });
    }

    pub fn estimate_now(&self) -> Option<u64> {
        self.estimate_at(Instant::now())
    }

    /// Estimated position at `now`, clamped to `[0, duration]`. `None` while idle.
    pub fn estimate_at(&self, now: Instant) -> Option<u64> {
        let state = self.state?;
        let mut progress = state.baseline.progress_ms;
        if state.is_playing {
            let elapsed = now.saturating_duration_since(state.baseline.at).as_millis();
            progress = progress.saturating_add(u64::try_from(elapsed).unwrap_or(u64::MAX));
        }
        Some(match state.duration_ms {
            Some(duration) => progress.min(duration),
            None => progress,
        })
    }
}
