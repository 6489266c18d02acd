pub mod mock;
pub mod paging;
pub mod spotify;
pub mod spotify_auth;

use crate::error::Result;
use crate::models::{FullTrack, SimplifiedPlaylist, User};

/// Most track URIs the remote API accepts in one add/remove call.
pub const MAX_TRACKS_PER_REQUEST: usize = 100;

/// Supplies bearer tokens to the HTTP client.
/// Implementations: spotify_auth::TokenManager, or any caller-owned session.
#[async_trait::async_trait]
pub trait TokenAccessor: Send + Sync {
    /// Return a valid access token, refreshing first if it is within leeway of expiry.
    async fn access_token(&self) -> Result<String>;

    /// Called after the server rejected `rejected` with a 401. Refreshes and
    /// returns the new access token, unless the current token already differs
    /// from `rejected`, in which case that one is returned.
    async fn force_refresh(&self, rejected: &str) -> Result<String>;
}

/// Remote playlist operations the playlist service composes.
/// Implementations: spotify::SpotifyClient, mock::MockPlaylistApi.
#[async_trait::async_trait]
pub trait PlaylistApi: Send + Sync {
    async fn get_me(&self) -> Result<User>;

    /// All of the current user's playlists up to `max` (0 = unbounded).
    async fn list_current_user_playlists(&self, max: usize) -> Result<Vec<SimplifiedPlaylist>>;

    /// Tracks of a playlist up to `max` (0 = unbounded); null tracks are dropped.
    async fn list_playlist_tracks(&self, playlist_id: &str, max: usize) -> Result<Vec<FullTrack>>;

    async fn get_playlist(&self, playlist_id: &str) -> Result<SimplifiedPlaylist>;

    async fn create_playlist(
        &self,
        name: &str,
        description: &str,
        public: bool,
    ) -> Result<SimplifiedPlaylist>;

    /// Add track URIs, returning the last snapshot id.
    async fn add_tracks_to_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String>;

    /// Unfollow (delete) a playlist.
    async fn delete_playlist(&self, playlist_id: &str) -> Result<()>;

    async fn remove_tracks_from_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String>;
}
