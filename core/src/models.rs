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

use serde::{Deserialize, Serialize};
use std::fmt;

/// Artist label used when an item carries no artist at all.
pub const UNKNOWN_ARTIST: &str = "Unknown";

/// The playable item reported by the currently-playing endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub name: String,
    pub artist_name: String,
    /// `None` when the source reports no (or a zero) duration.
    pub duration_ms: Option<u64>,
    pub artwork_url: Option<String>,
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.artist_name)
    }
}

/// Point-in-time read of remote playback state.
///
/// "Nothing playing" is not a snapshot: the gateway reports it as `Ok(None)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackSnapshot {
    pub is_playing: bool,
    pub progress_ms: Option<u64>,
    pub track: Option<Track>,
}

impl PlaybackSnapshot {
    pub fn duration_ms(&self) -> Option<u64> {
        self.track.as_ref().and_then(|t| t.duration_ms)
    }
}

/// Formats milliseconds as `m:ss`, truncating partial seconds.
pub fn format_time(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{}:{:02}", seconds / 60, seconds % 60)
}

/// A saved ("liked") track or an album track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSummary {
    pub id: String,
    pub name: String,
    pub artists: String,
    pub album: Option<String>,
    pub duration_ms: u64,
    pub artwork_url: Option<String>,
    pub external_url: String,
}

impl fmt::Display for TrackSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.artists)?;
        if let Some(album) = &self.album {
            write!(f, " (Album: {})", album)?;
        }
        write!(f, " [{}]", format_time(self.duration_ms))
    }
}

/// A saved ("liked") album.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlbumSummary {
    pub id: String,
    pub name: String,
    pub artist_name: String,
    pub release_date: Option<String>,
    pub total_tracks: u32,
    pub artwork_url: Option<String>,
    pub external_url: String,
}

impl fmt::Display for AlbumSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} - {}", self.id, self.name, self.artist_name)?;
        match &self.release_date {
            Some(date) if !date.is_empty() => write!(f, " ({})", date),
            _ => Ok(()),
        }
    }
}

/// Summary of a playlist for listing purposes.
#[derive(Debug, Serialize, Deserialize)]
pub struct PlaylistSummary {
    pub id: String,
    pub name: String,
    pub total_tracks: u32,
    pub is_public: bool,
    pub is_collaborative: bool,
    pub owner_name: String,
    pub artwork_url: Option<String>,
}

/// The signed-in account.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub display_name: String,
    pub followers: u32,
    /// Playback control through the Web API requires a premium account.
    pub is_premium: bool,
    pub external_url: String,
}
