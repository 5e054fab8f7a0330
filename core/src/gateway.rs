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

//! Boundary to the remote playback source.
//!
//! [`PlaybackGateway`] is what the session depends on; [`SpotifyGateway`]
//! implements it over an injected rspotify client and classifies
//! `ClientError`s into the taxonomy the core branches on.

use crate::models::{PlaybackSnapshot, Track, UNKNOWN_ARTIST};
use async_trait::async_trait;
use log::{debug, warn};
use rspotify::{
    http::HttpError,
    model::{AdditionalType, CurrentlyPlayingContext, PlayableItem},
    prelude::*,
    AuthCodeSpotify, ClientError,
};
use std::sync::Arc;
use thiserror::Error;

/// Why a pause/resume call was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControlFailure {
    #[error("Playback control requires a Spotify Premium account")]
    NeedsPremiumAccount,
    #[error("No active Spotify device found")]
    NoActiveDevice,
    #[error("Spotify credential expired")]
    CredentialExpired,
    #[error("Playback control failed: {0}")]
    Other(String),
}

impl ControlFailure {
    /// Maps a non-success HTTP status returned by a control endpoint.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => ControlFailure::CredentialExpired,
            403 => ControlFailure::NeedsPremiumAccount,
            404 => ControlFailure::NoActiveDevice,
            other => ControlFailure::Other(format!("HTTP {}", other)),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("No Spotify credential is stored")]
    NoCredential,
    #[error("Spotify credential expired")]
    CredentialExpired,
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl SyncError {
    pub fn is_credential_expired(&self) -> bool {
        matches!(self, SyncError::CredentialExpired)
    }
}

impl From<ClientError> for SyncError {
    fn from(err: ClientError) -> Self {
        if let Some(status) = http_status(&err) {
            return match status {
                401 => SyncError::CredentialExpired,
                other => SyncError::Transport(format!("HTTP {}", other)),
            };
        }
        match err {
            ClientError::InvalidToken => SyncError::NoCredential,
            ClientError::ParseJson(e) => SyncError::MalformedResponse(e.to_string()),
            ClientError::Model(e) => SyncError::MalformedResponse(e.to_string()),
            other => SyncError::Transport(other.to_string()),
        }
    }
}

impl From<ClientError> for ControlFailure {
    fn from(err: ClientError) -> Self {
        if let Some(status) = http_status(&err) {
            return ControlFailure::from_status(status);
        }
        match err {
            ClientError::InvalidToken => ControlFailure::CredentialExpired,
            other => ControlFailure::Other(other.to_string()),
        }
    }
}

fn http_status(err: &ClientError) -> Option<u16> {
    match err {
        ClientError::Http(http) => match &**http {
            HttpError::StatusCode(response) => Some(response.status().as_u16()),
            _ => None,
        },
        _ => None,
    }
}

/// The remote playback source and its transport controls.
#[async_trait]
pub trait PlaybackGateway: Send + Sync {
    /// `Ok(None)` means nothing is playing.
    async fn fetch_snapshot(&self) -> Result<Option<PlaybackSnapshot>, SyncError>;
    async fn pause(&self) -> Result<(), ControlFailure>;
    async fn resume(&self) -> Result<(), ControlFailure>;
}

pub struct SpotifyGateway {
    spotify: Arc<AuthCodeSpotify>,
}

impl SpotifyGateway {
    pub fn new(spotify: Arc<AuthCodeSpotify>) -> Self {
        Self { spotify }
    }

    async fn has_token(&self) -> bool {
        match self.spotify.get_token().lock().await {
            Ok(token) => token.is_some(),
            Err(_) => false,
        }
    }
}

#[async_trait]
impl PlaybackGateway for SpotifyGateway {
    async fn fetch_snapshot(&self) -> Result<Option<PlaybackSnapshot>, SyncError> {
        if !self.has_token().await {
            return Err(SyncError::NoCredential);
        }

        let context = self
            .spotify
            .current_playing(
                None,
                Some(&[AdditionalType::Track, AdditionalType::Episode]),
            )
            .await
            .map_err(|e| {
                warn!("Currently-playing request failed: {}", e);
                SyncError::from(e)
            })?;

        match context {
            Some(context) => snapshot_from_context(context).map(Some),
            None => {
                debug!("Nothing is playing");
                Ok(None)
            }
        }
    }

    async fn pause(&self) -> Result<(), ControlFailure> {
        if !self.has_token().await {
            return Err(ControlFailure::CredentialExpired);
        }
        self.spotify.pause_playback(None).await?;
        Ok(())
    }

    async fn resume(&self) -> Result<(), ControlFailure> {
        if !self.has_token().await {
            return Err(ControlFailure::CredentialExpired);
        }
        self.spotify.resume_playback(None, None).await?;
        Ok(())
    }
}

fn snapshot_from_context(context: CurrentlyPlayingContext) -> Result<PlaybackSnapshot, SyncError> {
    let progress_ms = match context.progress {
        Some(progress) => Some(non_negative_ms(progress.num_milliseconds(), "progress_ms")?),
        None => None,
    };
    let track = match &context.item {
        Some(item) => Some(track_from_item(item)?),
        None => None,
    };

    Ok(PlaybackSnapshot {
        is_playing: context.is_playing,
        progress_ms,
        track,
    })
}

fn track_from_item(item: &PlayableItem) -> Result<Track, SyncError> {
    match item {
        PlayableItem::Track(track) => Ok(Track {
            name: track.name.clone(),
            artist_name: track
                .artists
                .first()
                .map(|a| a.name.clone())
                .unwrap_or_else(|| UNKNOWN_ARTIST.to_string()),
            duration_ms: positive_ms(track.duration.num_milliseconds(), "duration_ms")?,
            artwork_url: track.album.images.first().map(|i| i.url.clone()),
        }),
        PlayableItem::Episode(episode) => Ok(Track {
            name: episode.name.clone(),
            artist_name: if episode.show.publisher.is_empty() {
                UNKNOWN_ARTIST.to_string()
            } else {
                episode.show.publisher.clone()
            },
            duration_ms: positive_ms(episode.duration.num_milliseconds(), "duration_ms")?,
            artwork_url: episode.images.first().map(|i| i.url.clone()),
        }),
    }
}

fn non_negative_ms(ms: i64, field: &str) -> Result<u64, SyncError> {
    u64::try_from(ms)
        .map_err(|_| SyncError::MalformedResponse(format!("negative {}: {}", field, ms)))
}

/// Zero durations are reported as unknown.
fn positive_ms(ms: i64, field: &str) -> Result<Option<u64>, SyncError> {
    non_negative_ms(ms, field).map(|ms| (ms > 0).then_some(ms))
}
