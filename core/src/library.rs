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

use crate::models::{AlbumSummary, PlaylistSummary, TrackSummary, UserProfile, UNKNOWN_ARTIST};
use futures::stream::TryStreamExt;
use log::debug;
use rspotify::{
    model::{
        AlbumId, FullTrack, Image, PlayableItem, PlaylistId, PlaylistItem, SearchResult,
        SearchType, SimplifiedArtist, SimplifiedTrack, SubscriptionLevel,
    },
    prelude::*,
    AuthCodeSpotify,
};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_LIKED_LIMIT: u32 = 20;
pub const DEFAULT_ALBUM_TRACKS_LIMIT: u32 = 50;
pub const DEFAULT_PLAYLIST_TRACKS_LIMIT: u32 = 50;
pub const DEFAULT_SEARCH_LIMIT: u32 = 20;

/// The Web API refuses page sizes above this.
const MAX_PAGE_LIMIT: u32 = 50;

#[derive(Error, Debug)]
pub enum LibraryError {
    #[error("Spotify API error: {0}")]
    Spotify(#[from] rspotify::ClientError),
    #[error("Invalid ID: {0}")]
    InvalidId(String),
    #[error("Search query is empty")]
    EmptyQuery,
}

/// Read-only access to the user's library.
pub struct Library {
    spotify: Arc<AuthCodeSpotify>,
}

impl Library {
    pub fn new(spotify: Arc<AuthCodeSpotify>) -> Self {
        Self { spotify }
    }

    /// Most recently liked tracks, newest first.
    pub async fn liked_tracks(&self, limit: u32) -> Result<Vec<TrackSummary>, LibraryError> {
        let page = self
            .spotify
            .current_user_saved_tracks_manual(None, Some(page_limit(limit)), Some(0))
            .await?;
        debug!("Fetched {} of {} liked tracks", page.items.len(), page.total);

        Ok(page.items.iter().map(|item| full_track_summary(&item.track)).collect())
    }

    /// Most recently liked albums, newest first.
    pub async fn liked_albums(&self, limit: u32) -> Result<Vec<AlbumSummary>, LibraryError> {
        let page = self
            .spotify
            .current_user_saved_albums_manual(None, Some(page_limit(limit)), Some(0))
            .await?;
        debug!("Fetched {} of {} liked albums", page.items.len(), page.total);

        Ok(page
            .items
            .into_iter()
            .map(|saved| {
                let album = saved.album;
                AlbumSummary {
                    id: album.id.id().to_string(),
                    name: album.name,
                    artist_name: first_artist(&album.artists),
                    release_date: Some(album.release_date).filter(|d| !d.is_empty()),
                    total_tracks: album.tracks.total,
                    artwork_url: first_image(&album.images),
                    external_url: spotify_url(&album.external_urls),
                }
            })
            .collect())
    }

    pub async fn list_playlists(&self) -> Result<Vec<PlaylistSummary>, LibraryError> {
        let mut playlists = Vec::new();
        let mut stream = self.spotify.current_user_playlists();

        while let Some(pl) = stream.try_next().await? {
            let owner_name = pl
                .owner
                .display_name
                .unwrap_or_else(|| pl.owner.id.id().to_string());

            playlists.push(PlaylistSummary {
                id: pl.id.id().to_string(),
                name: pl.name,
                total_tracks: pl.tracks.total,
                is_public: pl.public.unwrap_or(false),
                is_collaborative: pl.collaborative,
                owner_name,
                artwork_url: first_image(&pl.images),
            });
        }

        Ok(playlists)
    }

    pub async fn album_tracks(
        &self,
        album_id_str: &str,
        limit: u32,
    ) -> Result<Vec<TrackSummary>, LibraryError> {
        let album_id = AlbumId::from_id(album_id_str)
            .map_err(|_| LibraryError::InvalidId(album_id_str.to_string()))?;

        let page = self
            .spotify
            .album_track_manual(album_id, None, Some(page_limit(limit)), Some(0))
            .await?;

        Ok(page.items.iter().map(simplified_track_summary).collect())
    }

    /// Tracks of a playlist in playlist order. Episodes and unavailable
    /// entries are skipped.
    pub async fn playlist_tracks(
        &self,
        playlist_id_str: &str,
        limit: u32,
    ) -> Result<Vec<TrackSummary>, LibraryError> {
        let playlist_id = PlaylistId::from_id(playlist_id_str)
            .map_err(|_| LibraryError::InvalidId(playlist_id_str.to_string()))?;

        let page = self
            .spotify
            .playlist_items_manual(playlist_id, None, None, Some(page_limit(limit)), Some(0))
            .await?;
        debug!(
            "Fetched {} of {} playlist items",
            page.items.len(),
            page.total
        );

        Ok(playlist_track_summaries(&page.items))
    }

    pub async fn search_tracks(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<TrackSummary>, LibraryError> {
        let query = search_query(query)?;

        let result = self
            .spotify
            .search(
                query,
                SearchType::Track,
                None,
                None,
                Some(page_limit(limit)),
                Some(0),
            )
            .await?;

        match result {
            SearchResult::Tracks(page) => {
                debug!("Search matched {} tracks", page.total);
                Ok(page.items.iter().map(full_track_summary).collect())
            }
            _ => Ok(Vec::new()),
        }
    }

    pub async fn profile(&self) -> Result<UserProfile, LibraryError> {
        let user = self.spotify.current_user().await?;

        Ok(UserProfile {
            id: user.id.id().to_string(),
            display_name: user
                .display_name
                .unwrap_or_else(|| user.id.id().to_string()),
            followers: user.followers.map(|f| f.total).unwrap_or(0),
            is_premium: matches!(user.product, Some(SubscriptionLevel::Premium)),
            external_url: spotify_url(&user.external_urls),
        })
    }
}

fn page_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE_LIMIT)
}

fn search_query(query: &str) -> Result<&str, LibraryError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(LibraryError::EmptyQuery);
    }
    Ok(query)
}

fn playlist_track_summaries(items: &[PlaylistItem]) -> Vec<TrackSummary> {
    items
        .iter()
        .filter_map(|item| match &item.track {
            Some(PlayableItem::Track(track)) => Some(full_track_summary(track)),
            _ => None,
        })
        .collect()
}

fn first_artist(artists: &[SimplifiedArtist]) -> String {
    artists
        .first()
        .map(|a| a.name.clone())
        .unwrap_or_else(|| UNKNOWN_ARTIST.to_string())
}

fn join_artists(artists: &[SimplifiedArtist]) -> String {
    if artists.is_empty() {
        return UNKNOWN_ARTIST.to_string();
    }
    artists
        .iter()
        .map(|a| a.name.as_str())
        .collect::<Vec<&str>>()
        .join(", ")
}

fn first_image(images: &[Image]) -> Option<String> {
    images.first().map(|i| i.url.clone())
}

fn spotify_url(urls: &HashMap<String, String>) -> String {
    urls.get("spotify").cloned().unwrap_or_default()
}

fn duration_ms(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or(0)
}

fn full_track_summary(track: &FullTrack) -> TrackSummary {
    TrackSummary {
        id: track
            .id
            .as_ref()
            .map(|id| id.id().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        name: track.name.clone(),
        artists: join_artists(&track.artists),
        album: Some(track.album.name.clone()),
        duration_ms: duration_ms(track.duration.num_milliseconds()),
        artwork_url: first_image(&track.album.images),
        external_url: spotify_url(&track.external_urls),
    }
}

fn simplified_track_summary(track: &SimplifiedTrack) -> TrackSummary {
    TrackSummary {
        id: track
            .id
            .as_ref()
            .map(|id| id.id().to_string())
            .unwrap_or_else(|| "unknown".to_string()),
        name: track.name.clone(),
        artists: join_artists(&track.artists),
        album: None,
        duration_ms: duration_ms(track.duration.num_milliseconds()),
        artwork_url: None,
        external_url: spotify_url(&track.external_urls),
    }
}
