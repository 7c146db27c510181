//! Direct interactions with the music provider itself, separate from
//! the match backend: building the implicit-grant authorize URL and
//! reading the listener's currently playing track.
//!
//! Playback calls use their own access token, not the backend
//! credential, so a rejection here never tears down the session.

use crate::config::ClientConfig;
use crate::error::{AuthError, FetchError, NetworkError};
use crate::http::{HttpClient, HttpRequest, execute_with_timeout};
use log::debug;
use serde::Deserialize;
use std::sync::Arc;

pub const ACCOUNTS_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const CURRENTLY_PLAYING_URL: &str = "https://api.spotify.com/v1/me/player/currently-playing";

/// Scopes the client asks for: playback state, the current track, the
/// saved library, and top artists for match ranking.
pub const AUTH_SCOPES: [&str; 4] = [
    "user-read-playback-state",
    "user-read-currently-playing",
    "user-library-read",
    "user-top-read",
];

/// Builds the authorize URL for the implicit grant. The caller opens it
/// in a browser; the provider redirects back with the access token in
/// the URL fragment.
pub fn authorize_url(client_id: &str, redirect_uri: &str) -> String {
    format!(
        "{ACCOUNTS_AUTHORIZE_URL}?client_id={client_id}&redirect_uri={}&response_type=token&scope={}",
        urlencoding::encode(redirect_uri),
        urlencoding::encode(&AUTH_SCOPES.join(" "))
    )
}

/// What the listener is playing right now.
#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track: String,
    pub artists: Vec<String>,
    pub album_art_url: Option<String>,
}

#[derive(Deserialize)]
struct CurrentlyPlayingResponse {
    #[serde(default)]
    item: Option<TrackItem>,
}

#[derive(Deserialize)]
struct TrackItem {
    name: String,
    #[serde(default)]
    artists: Vec<Artist>,
    #[serde(default)]
    album: Album,
}

#[derive(Deserialize)]
struct Artist {
    name: String,
}

#[derive(Deserialize, Default)]
struct Album {
    #[serde(default)]
    images: Vec<AlbumImage>,
}

#[derive(Deserialize)]
struct AlbumImage {
    url: String,
}

/// Fetches the currently playing track. `Ok(None)` means nothing is
/// playing; the provider signals that with a 204 or an empty body, and
/// with `"item": null` during ads.
pub async fn fetch_now_playing(
    http: &Arc<dyn HttpClient>,
    config: &ClientConfig,
    playback_token: &str,
) -> Result<Option<NowPlaying>, FetchError> {
    let request = HttpRequest::get(CURRENTLY_PLAYING_URL).with_bearer(playback_token);
    let response = execute_with_timeout(http, request, config.request_timeout).await?;

    if response.is_success() {
        if response.status_code == 204 || response.body.is_empty() {
            return Ok(None);
        }
        let parsed: CurrentlyPlayingResponse = response
            .json()
            .map_err(|e| NetworkError::Transport(format!("bad now-playing body: {e}")))?;
        let Some(item) = parsed.item else {
            return Ok(None);
        };
        debug!(target: "Client", "Now playing: {}", item.name);
        return Ok(Some(NowPlaying {
            track: item.name,
            artists: item.artists.into_iter().map(|a| a.name).collect(),
            album_art_url: item.album.images.into_iter().next().map(|i| i.url),
        }));
    }

    match response.status_code {
        code @ (401 | 403) => Err(AuthError::Unauthorized(code).into()),
        code => Err(NetworkError::Status(code).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockHttpClient;

    fn config() -> ClientConfig {
        ClientConfig::new("http://b:8000", "ws://b:8000")
    }

    #[test]
    fn authorize_url_encodes_redirect_and_scopes() {
        let url = authorize_url("abc123", "http://localhost:5173/dashboard");
        assert_eq!(
            url,
            "https://accounts.spotify.com/authorize?client_id=abc123\
             &redirect_uri=http%3A%2F%2Flocalhost%3A5173%2Fdashboard\
             &response_type=token\
             &scope=user-read-playback-state%20user-read-currently-playing%20user-library-read%20user-top-read"
        );
    }

    #[tokio::test]
    async fn parses_currently_playing_track() {
        let mock = MockHttpClient::new();
        mock.push_json(
            200,
            r#"{"item":{"name":"Weird Fishes","artists":[{"name":"Radiohead"}],"album":{"images":[{"url":"https://img/cover.jpg"},{"url":"https://img/small.jpg"}]}}}"#,
        );
        let http: Arc<dyn HttpClient> = mock.clone();

        let playing = fetch_now_playing(&http, &config(), "playback-token")
            .await
            .unwrap();
        assert_eq!(
            playing,
            Some(NowPlaying {
                track: "Weird Fishes".to_string(),
                artists: vec!["Radiohead".to_string()],
                album_art_url: Some("https://img/cover.jpg".to_string()),
            })
        );

        let request = mock.request(0);
        assert_eq!(request.url, CURRENTLY_PLAYING_URL);
        assert_eq!(
            request.headers.get("Authorization").map(String::as_str),
            Some("Bearer playback-token")
        );
    }

    #[tokio::test]
    async fn nothing_playing_is_not_an_error() {
        let mock = MockHttpClient::new();
        mock.push_status(204);
        let http: Arc<dyn HttpClient> = mock.clone();
        let playing = fetch_now_playing(&http, &config(), "t").await;
        assert_eq!(playing, Ok(None));

        // Ad breaks come back as 200 with a null item.
        mock.push_json(200, r#"{"item":null}"#);
        let playing = fetch_now_playing(&http, &config(), "t").await;
        assert_eq!(playing, Ok(None));
    }

    #[tokio::test]
    async fn rejected_playback_token_maps_to_auth_error() {
        let mock = MockHttpClient::new();
        mock.push_status(401);
        let http: Arc<dyn HttpClient> = mock;
        let err = fetch_now_playing(&http, &config(), "expired")
            .await
            .unwrap_err();
        assert_eq!(err, FetchError::Auth(AuthError::Unauthorized(401)));
    }
}
