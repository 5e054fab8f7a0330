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

pub mod auth;
pub mod estimator;
pub mod gateway;
pub mod library;
pub mod models;
pub mod poller;
pub mod session;

// Re-export key items for convenience
pub use auth::{get_spotify_client, CredentialStore, TokenCache};
pub use estimator::ProgressEstimator;
pub use gateway::{ControlFailure, PlaybackGateway, SpotifyGateway, SyncError};
pub use library::Library;
pub use models::{PlaybackSnapshot, Track};
pub use rspotify::AuthCodeSpotify;
pub use session::{NowPlayingSession, ProgressView, SessionConfig, SessionEvent};
