use serde::{Deserialize, Deserializer, Serialize};

/// Treat JSON `null` like a missing field. Local-file tracks carry
/// `"id": null` on the track, its artists and its album.
fn null_as_default<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(d)?.unwrap_or_default())
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackTotal {
    #[serde(default)]
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimplifiedPlaylist {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub public: Option<bool>,
    #[serde(default)]
    pub collaborative: bool,
    #[serde(default)]
    pub owner: User,
    #[serde(default)]
    pub tracks: TrackTotal,
}

impl SimplifiedPlaylist {
    pub fn to_ref(&self) -> PlaylistRef {
        PlaylistRef {
            id: self.id.trim().to_string(),
            name: Some(self.name.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artist {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Album {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FullTrack {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub uri: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
    #[serde(default)]
    pub album: Album,
}

/// Entry of `/playlists/{id}/tracks`. `track` is null for removed or local items.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlaylistTrackItem {
    #[serde(default)]
    pub track: Option<FullTrack>,
}

/// Cursor-paginated envelope. `next == None` or an empty `items` ends the walk.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub offset: u32,
    #[serde(default)]
    pub total: u32,
}

impl<T> Page<T> {
    pub(crate) fn has_next(&self) -> bool {
        self.next.as_deref().map_or(false, |n| !n.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SnapshotResponse {
    #[serde(default)]
    pub snapshot_id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorEnvelope {
    pub error: ApiErrorBody,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub message: String,
}

/// Lightweight handle used for display and bulk operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistRef {
    pub id: String,
    pub name: Option<String>,
}

impl PlaylistRef {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self {
            id: id.as_ref().trim().to_string(),
            name: None,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.id.trim().is_empty()
    }
}

impl From<&str> for PlaylistRef {
    fn from(id: &str) -> Self {
        PlaylistRef::new(id)
    }
}

impl From<String> for PlaylistRef {
    fn from(id: String) -> Self {
        PlaylistRef::new(id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOptions {
    /// Drop repeated track URIs, first occurrence wins.
    pub deduplicate: bool,
    pub public: bool,
    pub description: String,
}

/// Outcome of a merge. `verified == false` is a confidence gap, not a failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub new_playlist_id: String,
    pub track_count: usize,
    pub duplicates_removed: usize,
    pub verified: bool,
    pub missing_uris: Vec<String>,
}
