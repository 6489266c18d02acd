use super::PlaylistApi;
use crate::error::{Error, Result};
use crate::models::{FullTrack, SimplifiedPlaylist, TrackTotal, User};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Clone)]
struct MockPlaylist {
    name: String,
    description: String,
    public: bool,
    tracks: Vec<String>,
}

#[derive(Default)]
struct State {
    // insertion order of playlist ids
    order: Vec<String>,
    playlists: HashMap<String, MockPlaylist>,
    next_id: u32,
    // uris that reads of a playlist do not (yet) return
    hidden: HashMap<String, HashSet<String>>,
    hidden_in_created: HashSet<String>,
    // hidden uris show up once a playlist has been read this many times
    reveal_after_reads: Option<usize>,
    fail_add_status: Option<u16>,
    fail_create_status: Option<u16>,
    fail_list_tracks: HashMap<String, u16>,
    fail_delete: HashMap<String, u16>,
    calls: Vec<String>,
    track_reads: HashMap<String, usize>,
}

/// A deterministic in-memory playlist backend.
///
/// Logs operations, records every call, and can be told to fail specific
/// operations with a given HTTP status or to hide tracks from reads to mimic
/// an eventually consistent store.
pub struct MockPlaylistApi {
    user_id: String,
    state: Mutex<State>,
}

impl Default for MockPlaylistApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlaylistApi {
    pub fn new() -> Self {
        Self {
            user_id: "mock_user".into(),
            state: Mutex::new(State::default()),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        // a panic while holding the lock only happens inside a failing test
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Seed a playlist with the given id, name and track URIs.
    pub fn with_playlist(self, id: &str, name: &str, tracks: &[&str]) -> Self {
        {
            let mut st = self.state();
            st.order.push(id.to_string());
            st.playlists.insert(
                id.to_string(),
                MockPlaylist {
                    name: name.to_string(),
                    description: String::new(),
                    public: false,
                    tracks: tracks.iter().map(|t| t.to_string()).collect(),
                },
            );
        }
        self
    }

    pub fn fail_add_tracks(&self, status: u16) {
        self.state().fail_add_status = Some(status);
    }

    pub fn fail_create(&self, status: u16) {
        self.state().fail_create_status = Some(status);
    }

    pub fn fail_list_tracks(&self, playlist_id: &str, status: u16) {
        self.state().fail_list_tracks.insert(playlist_id.to_string(), status);
    }

    pub fn fail_delete(&self, playlist_id: &str, status: u16) {
        self.state().fail_delete.insert(playlist_id.to_string(), status);
    }

    /// Keep `uris` out of track reads for every playlist created from now on.
    pub fn hide_tracks_in_created(&self, uris: &[&str]) {
        self.state()
            .hidden_in_created
            .extend(uris.iter().map(|u| u.to_string()));
    }

    /// Let hidden URIs appear from read number `reads + 1` of a playlist on.
    pub fn reveal_hidden_after_reads(&self, reads: usize) {
        self.state().reveal_after_reads = Some(reads);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    pub fn track_reads(&self, playlist_id: &str) -> usize {
        self.state().track_reads.get(playlist_id).copied().unwrap_or(0)
    }

    pub fn contains(&self, playlist_id: &str) -> bool {
        self.state().playlists.contains_key(playlist_id)
    }

    pub fn tracks_of(&self, playlist_id: &str) -> Vec<String> {
        self.state()
            .playlists
            .get(playlist_id)
            .map(|p| p.tracks.clone())
            .unwrap_or_default()
    }

    fn to_simplified(&self, id: &str, p: &MockPlaylist) -> SimplifiedPlaylist {
        SimplifiedPlaylist {
            id: id.to_string(),
            name: p.name.clone(),
            description: Some(p.description.clone()),
            public: Some(p.public),
            collaborative: false,
            owner: User {
                id: self.user_id.clone(),
                display_name: None,
            },
            tracks: TrackTotal {
                total: p.tracks.len() as u32,
            },
        }
    }
}

fn api_error(status: u16, message: &str) -> Error {
    Error::Api {
        status,
        message: message.to_string(),
    }
}

fn not_found() -> Error {
    api_error(404, "Not found.")
}

#[async_trait]
impl PlaylistApi for MockPlaylistApi {
    async fn get_me(&self) -> Result<User> {
        self.state().calls.push("get_me".into());
        Ok(User {
            id: self.user_id.clone(),
            display_name: Some("Mock User".into()),
        })
    }

    async fn list_current_user_playlists(&self, max: usize) -> Result<Vec<SimplifiedPlaylist>> {
        let entries = {
            let mut st = self.state();
            st.calls.push("list_playlists".into());
            st.order
                .iter()
                .filter_map(|id| st.playlists.get(id).map(|p| (id.clone(), p.clone())))
                .collect::<Vec<_>>()
        };
        let mut out: Vec<SimplifiedPlaylist> = entries
            .iter()
            .map(|(id, p)| self.to_simplified(id, p))
            .collect();
        if max > 0 {
            out.truncate(max);
        }
        Ok(out)
    }

    async fn list_playlist_tracks(&self, playlist_id: &str, max: usize) -> Result<Vec<FullTrack>> {
        let mut st = self.state();
        st.calls.push(format!("list_tracks:{}", playlist_id));
        let reads = {
            let n = st.track_reads.entry(playlist_id.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if let Some(status) = st.fail_list_tracks.get(playlist_id).copied() {
            return Err(api_error(status, "list tracks failed"));
        }
        let p = st.playlists.get(playlist_id).ok_or_else(not_found)?;
        let still_hidden = st.reveal_after_reads.map_or(true, |n| reads <= n);
        let hidden = st.hidden.get(playlist_id).filter(|_| still_hidden);
        let mut out: Vec<FullTrack> = p
            .tracks
            .iter()
            .filter(|u| hidden.map_or(true, |h| !h.contains(*u)))
            .map(|u| FullTrack {
                id: u.rsplit(':').next().map(String::from),
                name: u.clone(),
                uri: u.clone(),
                ..Default::default()
            })
            .collect();
        if max > 0 {
            out.truncate(max);
        }
        Ok(out)
    }

    async fn get_playlist(&self, playlist_id: &str) -> Result<SimplifiedPlaylist> {
        let p = {
            let mut st = self.state();
            st.calls.push(format!("get_playlist:{}", playlist_id));
            st.playlists.get(playlist_id).cloned().ok_or_else(not_found)?
        };
        Ok(self.to_simplified(playlist_id, &p))
    }

    async fn create_playlist(&self, name: &str, description: &str, public: bool) -> Result<SimplifiedPlaylist> {
        info!("MockPlaylistApi: create_playlist {}", name);
        let (id, p) = {
            let mut st = self.state();
            st.calls.push(format!("create:{}", name));
            if let Some(status) = st.fail_create_status {
                return Err(api_error(status, "create failed"));
            }
            st.next_id += 1;
            let id = format!("mock-playlist-{}", st.next_id);
            let p = MockPlaylist {
                name: name.to_string(),
                description: description.to_string(),
                public,
                tracks: Vec::new(),
            };
            st.order.push(id.clone());
            st.playlists.insert(id.clone(), p.clone());
            if !st.hidden_in_created.is_empty() {
                let h = st.hidden_in_created.clone();
                st.hidden.insert(id.clone(), h);
            }
            (id, p)
        };
        Ok(self.to_simplified(&id, &p))
    }

    async fn add_tracks_to_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        info!("MockPlaylistApi: add_tracks {} -> {} tracks", playlist_id, uris.len());
        let mut st = self.state();
        st.calls.push(format!("add:{}:{}", playlist_id, uris.len()));
        if let Some(status) = st.fail_add_status {
            return Err(api_error(status, "add failed"));
        }
        let p = st.playlists.get_mut(playlist_id).ok_or_else(not_found)?;
        p.tracks.extend(uris.iter().cloned());
        Ok(format!("snapshot-{}", p.tracks.len()))
    }

    async fn delete_playlist(&self, playlist_id: &str) -> Result<()> {
        info!("MockPlaylistApi: delete_playlist {}", playlist_id);
        let mut st = self.state();
        st.calls.push(format!("delete:{}", playlist_id));
        if let Some(status) = st.fail_delete.get(playlist_id).copied() {
            return Err(api_error(status, "delete failed"));
        }
        st.playlists.remove(playlist_id).ok_or_else(not_found)?;
        st.order.retain(|id| id != playlist_id);
        Ok(())
    }

    async fn remove_tracks_from_playlist(&self, playlist_id: &str, uris: &[String]) -> Result<String> {
        info!("MockPlaylistApi: remove_tracks {} -> {} tracks", playlist_id, uris.len());
        let mut st = self.state();
        st.calls.push(format!("remove:{}:{}", playlist_id, uris.len()));
        let p = st.playlists.get_mut(playlist_id).ok_or_else(not_found)?;
        p.tracks.retain(|t| !uris.contains(t));
        Ok(format!("snapshot-{}", p.tracks.len()))
    }
}
