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

use anyhow::Context;
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use log::debug;
use looply_core::library::{
    DEFAULT_ALBUM_TRACKS_LIMIT, DEFAULT_LIKED_LIMIT, DEFAULT_PLAYLIST_TRACKS_LIMIT,
    DEFAULT_SEARCH_LIMIT,
};
use looply_core::{
    get_spotify_client, AuthCodeSpotify, ControlFailure, CredentialStore, Library,
    NowPlayingSession, PlaybackGateway, ProgressView, SessionConfig, SessionEvent,
    SpotifyGateway, SyncError, TokenCache,
};
use serde::Serialize;
use std::fs::File;
use std::io::Write;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

/// Width of the progress bar drawn by `now-playing`.
const BAR_WIDTH: usize = 24;

const RERUN_TIP: &str = "Tip: re-run with --open-spotify to control playback in the Spotify app.";
const LIVE_TIP: &str = "Tip: type o + Enter to control playback in the Spotify app.";
const LIVE_HELP: &str = "p = play/pause, r = refresh, o = open Spotify, q = quit";

#[derive(Parser)]
#[command(name = "looply")]
#[command(about = "Follow and control what Spotify is playing, and browse your library", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follows the current playback live. Type p (play/pause), r (refresh), o (open Spotify) or q (quit) + Enter.
    NowPlaying {
        /// Seconds between now-playing polls
        #[arg(long, default_value_t = 10)]
        poll_secs: u64,
        /// Milliseconds between progress redraws
        #[arg(long, default_value_t = 1000)]
        tick_ms: u64,
        /// Open the Spotify app as soon as the account cannot be controlled remotely
        #[arg(long)]
        open_spotify: bool,
    },
    /// Prints a single snapshot of the current playback
    Status {
        /// Output the snapshot to a JSON file (e.g., --json=status.json)
        #[arg(long)]
        json: Option<String>,
    },
    /// Pauses playback on the active device
    Pause {
        /// Open the Spotify app if the account cannot be controlled remotely
        #[arg(long)]
        open_spotify: bool,
    },
    /// Resumes playback on the active device
    Resume {
        /// Open the Spotify app if the account cannot be controlled remotely
        #[arg(long)]
        open_spotify: bool,
    },
    /// Pauses if playing, resumes otherwise
    Toggle {
        /// Open the Spotify app if the account cannot be controlled remotely
        #[arg(long)]
        open_spotify: bool,
    },
    /// Lists your most recently liked tracks
    Liked {
        #[arg(long, default_value_t = DEFAULT_LIKED_LIMIT)]
        limit: u32,
        /// Output the list to a JSON file
        #[arg(long)]
        json: Option<String>,
    },
    /// Lists your most recently liked albums
    Albums {
        #[arg(long, default_value_t = DEFAULT_LIKED_LIMIT)]
        limit: u32,
        /// Output the list to a JSON file
        #[arg(long)]
        json: Option<String>,
    },
    /// Lists all your playlists with their IDs
    Playlists,
    /// Lists the tracks of an album
    AlbumTracks {
        /// The Spotify ID of the album
        #[arg(value_name = "ALBUM_ID")]
        album_id: String,
        #[arg(long, default_value_t = DEFAULT_ALBUM_TRACKS_LIMIT)]
        limit: u32,
    },
    /// Lists the tracks of a playlist
    PlaylistTracks {
        /// The Spotify ID of the playlist
        #[arg(value_name = "PLAYLIST_ID")]
        playlist_id: String,
        #[arg(long, default_value_t = DEFAULT_PLAYLIST_TRACKS_LIMIT)]
        limit: u32,
        /// Output the list to a JSON file
        #[arg(long)]
        json: Option<String>,
    },
    /// Searches the Spotify catalog for tracks
    Search {
        #[arg(value_name = "QUERY")]
        query: String,
        #[arg(long, default_value_t = DEFAULT_SEARCH_LIMIT)]
        limit: u32,
    },
    /// Shows your Spotify profile
    Me,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum LiveCommand {
    Toggle,
    Refresh,
    OpenSpotify,
    Quit,
}

#[derive(Debug, PartialEq)]
enum Followup<'a> {
    OpenSpotify,
    Tip(&'a str),
    Nothing,
}

#[derive(Clone, Copy, Debug)]
enum ControlCommand {
    Pause,
    Resume,
    Toggle,
}

#[tokio::main]
async fn main() {
    env_logger::init();

    if dotenv().is_err() {
        // Silently ignore
    }

    let cli = Cli::parse();

    match &cli.command {
        Commands::NowPlaying {
            poll_secs,
            tick_ms,
            open_spotify,
        } => {
            let config = SessionConfig {
                poll_interval: Duration::from_secs((*poll_secs).max(1)),
                display_interval: Duration::from_millis((*tick_ms).max(100)),
            };
            handle_now_playing(config, *open_spotify).await;
        }
        Commands::Status { json } => {
            handle_status(json.as_deref()).await;
        }
        Commands::Pause { open_spotify } => {
            handle_control(ControlCommand::Pause, *open_spotify).await;
        }
        Commands::Resume { open_spotify } => {
            handle_control(ControlCommand::Resume, *open_spotify).await;
        }
        Commands::Toggle { open_spotify } => {
            handle_control(ControlCommand::Toggle, *open_spotify).await;
        }
        Commands::Liked { limit, json } => {
            handle_liked(*limit, json.as_deref()).await;
        }
        Commands::Albums { limit, json } => {
            handle_albums(*limit, json.as_deref()).await;
        }
        Commands::Playlists => {
            handle_playlists().await;
        }
        Commands::AlbumTracks { album_id, limit } => {
            handle_album_tracks(album_id, *limit).await;
        }
        Commands::PlaylistTracks {
            playlist_id,
            limit,
            json,
        } => {
            handle_playlist_tracks(playlist_id, *limit, json.as_deref()).await;
        }
        Commands::Search { query, limit } => {
            handle_search(query, *limit).await;
        }
        Commands::Me => {
            handle_me().await;
        }
    }
}

async fn get_client() -> Arc<AuthCodeSpotify> {
    match get_spotify_client().await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Error initializing Spotify client: {}", e);
            process::exit(1);
        }
    }
}

fn write_json<T: Serialize>(path: &str, value: &T) -> anyhow::Result<()> {
    let json_content = serde_json::to_string_pretty(value).context("Failed to serialize report")?;
    let mut file =
        File::create(path).with_context(|| format!("Failed to create file '{}'", path))?;
    file.write_all(json_content.as_bytes())
        .with_context(|| format!("Failed to write report to '{}'", path))?;
    Ok(())
}

fn save_json<T: Serialize>(path: Option<&str>, value: &T) {
    if let Some(path) = path {
        match write_json(path, value) {
            Ok(()) => {
                println!();
                println!("[SAVED] Report saved to: {}", path);
            }
            Err(e) => {
                eprintln!();
                eprintln!("[ERROR] {:#}", e);
            }
        }
    }
}

fn progress_bar(view: &ProgressView) -> String {
    let filled = ((view.ratio() * BAR_WIDTH as f64).round() as usize).min(BAR_WIDTH);
    format!("{}{}", "=".repeat(filled), " ".repeat(BAR_WIDTH - filled))
}

fn render_view(view: &ProgressView) {
    let icon = if view.is_playing { ">" } else { "||" };
    let title = view
        .track
        .as_ref()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "(unknown item)".to_string());
    let total = view.total_label().unwrap_or_else(|| "--:--".to_string());
    let remaining = view
        .remaining_label()
        .map(|r| format!(" (-{})", r))
        .unwrap_or_default();

    print!(
        "\r\x1b[2K{} {}  {} / {}{}  [{}]",
        icon,
        title,
        view.elapsed_label(),
        total,
        remaining,
        progress_bar(view)
    );
    let _ = std::io::stdout().flush();
}

fn describe_sync_error(error: &SyncError) -> String {
    match error {
        SyncError::NoCredential => "Not signed in to Spotify.".to_string(),
        SyncError::CredentialExpired => {
            "Your Spotify session expired. Run looply again to sign in.".to_string()
        }
        other => format!("Could not reach Spotify: {}", other),
    }
}

fn describe_control_failure(failure: &ControlFailure) -> String {
    match failure {
        ControlFailure::NeedsPremiumAccount => {
            "Spotify Premium is required to control playback from here.".to_string()
        }
        ControlFailure::NoActiveDevice => {
            "No active device. Start playing something in a Spotify app first.".to_string()
        }
        ControlFailure::CredentialExpired => {
            "Your Spotify session expired. Run looply again to sign in.".to_string()
        }
        ControlFailure::Other(detail) => format!("Playback control failed: {}", detail),
    }
}

/// Only a premium rejection sends the user to the native app.
fn control_followup<'a>(failure: &ControlFailure, open_spotify: bool, tip: &'a str) -> Followup<'a> {
    match failure {
        ControlFailure::NeedsPremiumAccount if open_spotify => Followup::OpenSpotify,
        ControlFailure::NeedsPremiumAccount => Followup::Tip(tip),
        _ => Followup::Nothing,
    }
}

fn open_spotify_app() {
    if let Err(e) = open::that("spotify:") {
        eprintln!("[ERROR] Could not open the Spotify app: {}", e);
    }
}

fn report_control_failure(failure: &ControlFailure, open_spotify: bool, tip: &str) {
    eprintln!("[ERROR] {}", describe_control_failure(failure));
    match control_followup(failure, open_spotify, tip) {
        Followup::OpenSpotify => open_spotify_app(),
        Followup::Tip(tip) => eprintln!("{}", tip),
        Followup::Nothing => {}
    }
}

fn parse_live_command(line: &str) -> Result<Option<LiveCommand>, String> {
    match line.trim() {
        "p" => Ok(Some(LiveCommand::Toggle)),
        "r" => Ok(Some(LiveCommand::Refresh)),
        "o" => Ok(Some(LiveCommand::OpenSpotify)),
        "q" => Ok(Some(LiveCommand::Quit)),
        "" => Ok(None),
        other => Err(other.to_string()),
    }
}

fn render_event(event: &SessionEvent, open_spotify: bool) {
    match event {
        SessionEvent::Updated(view)
        | SessionEvent::Tick(view)
        | SessionEvent::PlaybackChanged(view) => render_view(view),
        SessionEvent::Idle => {
            print!("\r\x1b[2K[IDLE] Nothing playing right now");
            let _ = std::io::stdout().flush();
        }
        SessionEvent::PollFailed(e) => {
            eprintln!();
            eprintln!("[WARN] {}", describe_sync_error(e));
        }
        SessionEvent::ControlFailed(failure) => {
            eprintln!();
            report_control_failure(failure, open_spotify, LIVE_TIP);
        }
    }
}

async fn handle_now_playing(config: SessionConfig, open_spotify: bool) {
    let spotify = get_client().await;
    let gateway: Arc<dyn PlaybackGateway> = Arc::new(SpotifyGateway::new(Arc::clone(&spotify)));
    let credentials: Arc<dyn CredentialStore> = Arc::new(TokenCache::new(spotify));

    let (mut session, mut events) = NowPlayingSession::new(gateway, credentials, config);
    session.start();

    println!("Following Spotify playback. {}", LIVE_HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => render_event(&event, open_spotify),
                None => break,
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match parse_live_command(&line) {
                    Ok(Some(LiveCommand::Toggle)) => session.toggle(),
                    Ok(Some(LiveCommand::Refresh)) => session.refresh(),
                    Ok(Some(LiveCommand::OpenSpotify)) => open_spotify_app(),
                    Ok(Some(LiveCommand::Quit)) => break,
                    Ok(None) => {}
                    Err(other) => {
                        eprintln!();
                        eprintln!("Unknown command '{}' ({})", other, LIVE_HELP);
                    }
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    debug!("stdin closed: {}", e);
                    stdin_open = false;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown().await;
    println!();
}

async fn handle_status(json_path: Option<&str>) {
    let spotify = get_client().await;
    let gateway = SpotifyGateway::new(Arc::clone(&spotify));

    match gateway.fetch_snapshot().await {
        Ok(Some(snapshot)) => {
            println!();
            println!("NOW PLAYING");
            println!("---------------------------------------------------");
            match &snapshot.track {
                Some(track) => {
                    println!("Title:    {}", track.name);
                    println!("Artist:   {}", track.artist_name);
                    if let Some(url) = &track.artwork_url {
                        println!("Artwork:  {}", url);
                    }
                }
                None => println!("Title:    (unknown item)"),
            }
            println!(
                "State:    {}",
                if snapshot.is_playing { "Playing" } else { "Paused" }
            );
            if let Some(progress) = snapshot.progress_ms {
                let position = looply_core::models::format_time(progress);
                match snapshot.duration_ms() {
                    Some(duration) => println!(
                        "Position: {} / {}",
                        position,
                        looply_core::models::format_time(duration)
                    ),
                    None => println!("Position: {}", position),
                }
            }
            println!("---------------------------------------------------");

            save_json(json_path, &snapshot);
        }
        Ok(None) => {
            println!("[IDLE] Nothing playing right now.");
        }
        Err(e) => {
            if e.is_credential_expired() {
                discard_credential(spotify).await;
            }
            eprintln!();
            eprintln!("[ERROR] {}", describe_sync_error(&e));
            process::exit(1);
        }
    }
}

async fn discard_credential(spotify: Arc<AuthCodeSpotify>) {
    if let Err(e) = TokenCache::new(spotify).discard().await {
        eprintln!("[ERROR] Failed to discard the stored token: {}", e);
    }
}

async fn handle_control(command: ControlCommand, open_spotify: bool) {
    let spotify = get_client().await;
    let gateway = SpotifyGateway::new(Arc::clone(&spotify));

    let pause = match command {
        ControlCommand::Pause => true,
        ControlCommand::Resume => false,
        ControlCommand::Toggle => match gateway.fetch_snapshot().await {
            Ok(snapshot) => snapshot.map(|s| s.is_playing).unwrap_or(false),
            Err(e) => {
                if e.is_credential_expired() {
                    discard_credential(spotify).await;
                }
                eprintln!("[ERROR] {}", describe_sync_error(&e));
                process::exit(1);
            }
        },
    };

    let result = if pause {
        gateway.pause().await
    } else {
        gateway.resume().await
    };

    match result {
        Ok(()) => {
            println!("[OK] Playback {}", if pause { "paused" } else { "resumed" });
        }
        Err(failure) => {
            if failure == ControlFailure::CredentialExpired {
                discard_credential(spotify).await;
            }
            report_control_failure(&failure, open_spotify, RERUN_TIP);
            process::exit(1);
        }
    }
}

async fn handle_liked(limit: u32, json_path: Option<&str>) {
    let library = Library::new(get_client().await);
    println!("Fetching your liked tracks...");

    match library.liked_tracks(limit).await {
        Ok(tracks) => {
            println!();
            if tracks.is_empty() {
                println!("No liked tracks yet.");
            }
            for (i, track) in tracks.iter().enumerate() {
                println!("{}. {}", i + 1, track);
            }
            save_json(json_path, &tracks);
        }
        Err(e) => {
            eprintln!("Failed to fetch liked tracks: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_albums(limit: u32, json_path: Option<&str>) {
    let library = Library::new(get_client().await);
    println!("Fetching your liked albums...");

    match library.liked_albums(limit).await {
        Ok(albums) => {
            println!();
            if albums.is_empty() {
                println!("No liked albums yet.");
            }
            for (i, album) in albums.iter().enumerate() {
                println!("{}. {}", i + 1, album);
            }
            println!();
            println!("Tip: Copy an ID and run 'looply album-tracks <ID>'");
            save_json(json_path, &albums);
        }
        Err(e) => {
            eprintln!("Failed to fetch liked albums: {}", e);
            process::exit(1);
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}..", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}

async fn handle_playlists() {
    let library = Library::new(get_client().await);
    println!("Fetching your playlists...");

    match library.list_playlists().await {
        Ok(playlists) => {
            println!();
            println!(
                "{:<25} | {:<30} | {:<20} | {:<6} | {:<5}",
                "ID", "Name", "Owner", "Tracks", "Collab"
            );
            println!(
                "{:-<25}-+-{:-<30}-+-{:-<20}-+-{:-<6}-+-{:-<5}",
                "", "", "", "", ""
            );

            for pl in playlists {
                let collab = if pl.is_collaborative { "Yes" } else { "No" };

                println!(
                    "{:<25} | {:<30} | {:<20} | {:<6} | {:<5}",
                    pl.id,
                    truncate(&pl.name, 28),
                    truncate(&pl.owner_name, 18),
                    pl.total_tracks,
                    collab
                );
            }
        }
        Err(e) => {
            eprintln!("Failed to list playlists: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_album_tracks(album_id: &str, limit: u32) {
    let library = Library::new(get_client().await);
    println!("Fetching tracks of album {} ...", album_id);

    match library.album_tracks(album_id, limit).await {
        Ok(tracks) => print_track_list(&tracks),
        Err(e) => {
            eprintln!();
            eprintln!("[ERROR] Failed to fetch album tracks: {}", e);
            process::exit(1);
        }
    }
}

fn print_track_list(tracks: &[looply_core::models::TrackSummary]) {
    println!();
    for (i, track) in tracks.iter().enumerate() {
        println!("{:>2}. {}", i + 1, track);
    }
}

async fn handle_playlist_tracks(playlist_id: &str, limit: u32, json_path: Option<&str>) {
    let library = Library::new(get_client().await);
    println!("Fetching tracks of playlist {} ...", playlist_id);

    match library.playlist_tracks(playlist_id, limit).await {
        Ok(tracks) => {
            if tracks.is_empty() {
                println!();
                println!("No tracks in this playlist.");
            }
            print_track_list(&tracks);
            save_json(json_path, &tracks);
        }
        Err(e) => {
            eprintln!();
            eprintln!("[ERROR] Failed to fetch playlist tracks: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_search(query: &str, limit: u32) {
    let library = Library::new(get_client().await);
    println!("Searching for '{}' ...", query.trim());

    match library.search_tracks(query, limit).await {
        Ok(tracks) => {
            if tracks.is_empty() {
                println!();
                println!("No tracks found.");
            }
            print_track_list(&tracks);
        }
        Err(e) => {
            eprintln!();
            eprintln!("[ERROR] Search failed: {}", e);
            process::exit(1);
        }
    }
}

async fn handle_me() {
    let library = Library::new(get_client().await);

    match library.profile().await {
        Ok(profile) => {
            println!();
            println!("PROFILE");
            println!("---------------------------------------------------");
            println!("Name:       {}", profile.display_name);
            println!("ID:         {}", profile.id);
            println!("Followers:  {}", profile.followers);
            println!(
                "Plan:       {}",
                if profile.is_premium { "Premium" } else { "Free" }
            );
            println!("Link:       {}", profile.external_url);
            if !profile.is_premium {
                println!();
                println!("(Note: pause/resume need a Premium account.)");
            }
        }
        Err(e) => {
            eprintln!("Failed to fetch profile: {}", e);
            process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view(progress_ms: u64, duration_ms: Option<u64>) -> ProgressView {
        ProgressView {
            track: None,
            is_playing: true,
            progress_ms,
            duration_ms,
        }
    }

    #[test]
    fn test_progress_bar_fill() {
        assert_eq!(progress_bar(&view(0, Some(1_000))), " ".repeat(BAR_WIDTH));
        assert_eq!(progress_bar(&view(1_000, Some(1_000))), "=".repeat(BAR_WIDTH));
        assert_eq!(progress_bar(&view(500, Some(1_000))).matches('=').count(), 12);
        assert_eq!(progress_bar(&view(500, None)), " ".repeat(BAR_WIDTH));
    }

    #[test]
    fn test_truncate_counts_characters() {
        assert_eq!(truncate("short", 28), "short");
        assert_eq!(truncate("플레이리스트 이름이 아주 길어요", 4), "플레이리..");
    }

    #[test]
    fn test_failure_messages_are_reason_specific() {
        assert!(describe_control_failure(&ControlFailure::NeedsPremiumAccount).contains("Premium"));
        assert!(describe_control_failure(&ControlFailure::NoActiveDevice).contains("device"));
        assert!(describe_control_failure(&ControlFailure::CredentialExpired).contains("expired"));
        assert!(describe_sync_error(&SyncError::CredentialExpired).contains("expired"));
        assert!(describe_sync_error(&SyncError::Transport("timeout".to_string()))
            .contains("timeout"));
    }

    #[test]
    fn test_live_view_accepts_what_its_tip_offers() {
        assert_eq!(
            control_followup(&ControlFailure::NeedsPremiumAccount, false, LIVE_TIP),
            Followup::Tip(LIVE_TIP)
        );
        assert!(LIVE_TIP.contains("type o"));
        assert_eq!(parse_live_command("o"), Ok(Some(LiveCommand::OpenSpotify)));
        assert_eq!(parse_live_command(" p "), Ok(Some(LiveCommand::Toggle)));
        assert_eq!(parse_live_command(""), Ok(None));
        assert_eq!(parse_live_command("x"), Err("x".to_string()));
    }

    #[test]
    fn test_premium_rejection_opens_app_when_asked() {
        assert_eq!(
            control_followup(&ControlFailure::NeedsPremiumAccount, true, RERUN_TIP),
            Followup::OpenSpotify
        );
        assert_eq!(
            control_followup(&ControlFailure::NeedsPremiumAccount, false, RERUN_TIP),
            Followup::Tip(RERUN_TIP)
        );
        assert_eq!(
            control_followup(&ControlFailure::NoActiveDevice, true, LIVE_TIP),
            Followup::Nothing
        );
    }
}
