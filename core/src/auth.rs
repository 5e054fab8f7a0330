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

use async_trait::async_trait;
use log::info;
use rspotify::{prelude::*, scopes, AuthCodeSpotify, Config, Credentials, OAuth};
use std::io::ErrorKind;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Failed to initialize Spotify client: {0}")]
    ClientConfig(String),
    #[error("Spotify authentication failed: {0}")]
    Spotify(#[from] rspotify::ClientError),
    #[error("Failed to access the stored token: {0}")]
    TokenStorage(String),
}

/// Initializes and authenticates a Spotify client using the Authorization Code Flow.
///
/// This function:
/// 1. Reads credentials (`RSPOTIFY_CLIENT_ID`, `RSPOTIFY_CLIENT_SECRET`) from the environment.
/// 2. Reads the redirect URI (`RSPOTIFY_REDIRECT_URI`) from the environment.
/// 3. Requests the scopes needed to follow and control playback and to read the library.
/// 4. Handles the OAuth2 flow, including token caching and refreshing.
///
/// If a valid token is not cached, it will prompt the user (via stdout) to visit a URL
/// to authorize the application.
pub async fn get_spotify_client() -> Result<AuthCodeSpotify, AuthError> {
    let creds = Credentials::from_env().ok_or_else(|| {
        AuthError::ClientConfig("Missing RSPOTIFY_CLIENT_ID or RSPOTIFY_CLIENT_SECRET".to_string())
    })?;

    // - user-read-currently-playing / user-read-playback-state: the now-playing snapshot.
    // - user-modify-playback-state: pause and resume.
    // - user-library-read: liked tracks and albums.
    // - playlist-read-private / playlist-read-collaborative: the playlist listing.
    let scopes = scopes!(
        "user-read-currently-playing",
        "user-read-playback-state",
        "user-modify-playback-state",
        "user-library-read",
        "playlist-read-private",
        "playlist-read-collaborative"
    );

    let oauth = OAuth::from_env(scopes)
        .ok_or_else(|| AuthError::ClientConfig("Missing RSPOTIFY_REDIRECT_URI".to_string()))?;

    // `token_cached: true` saves the token to a file (default: .spotify_token_cache.json).
    let config = Config {
        token_cached: true,
        token_refreshing: true,
        ..Default::default()
    };

    let spotify = AuthCodeSpotify::with_config(creds, oauth, config);

    // Reuses a cached token when there is one; otherwise opens the browser (or
    // prints the URL) and waits for the redirect.
    let url = spotify.get_authorize_url(false)?;
    spotify.prompt_for_token(&url).await?;

    Ok(spotify)
}

/// Storage for the bearer credential. A 401 from the API means the stored
/// token is dead and must be discarded so the next run signs in again.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn discard(&self) -> Result<(), AuthError>;
}

/// The rspotify client's in-memory token plus its cache file.
pub struct TokenCache {
    spotify: Arc<AuthCodeSpotify>,
}

impl TokenCache {
    pub fn new(spotify: Arc<AuthCodeSpotify>) -> Self {
        Self { spotify }
    }
}

#[async_trait]
impl CredentialStore for TokenCache {
    async fn discard(&self) -> Result<(), AuthError> {
        let token = self.spotify.get_token();
        *token
            .lock()
            .await
            .map_err(|_| AuthError::TokenStorage("token lock poisoned".to_string()))? = None;

        let path = &self.spotify.get_config().cache_path;
        match tokio::fs::remove_file(path).await {
            Ok(()) => {
                info!("Discarded cached token at {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::TokenStorage(e.to_string())),
        }
    }
}
