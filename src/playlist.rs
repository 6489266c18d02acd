use crate::api::{PlaylistApi, MAX_TRACKS_PER_REQUEST};
use crate::error::{Error, MergeStage, Result};
use crate::models::{MergeOptions, MergeResult, PlaylistRef, SimplifiedPlaylist};
use regex::Regex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Reads of a freshly written playlist may lag; verification tries this many times.
pub const VERIFY_ATTEMPTS: usize = 3;
pub const VERIFY_RETRY_DELAY: Duration = Duration::from_millis(200);

/// High-level playlist operations composed from several remote calls.
///
/// Every multi-call loop here runs sequentially.
pub struct PlaylistService {
    api: Arc<dyn PlaylistApi>,
}

impl PlaylistService {
    pub fn new(api: Arc<dyn PlaylistApi>) -> Self {
        Self { api }
    }

    /// Current user's playlists whose names match `pattern` (case-sensitive
    /// regex), in their original order.
    pub async fn find_playlists_by_pattern(&self, pattern: &str) -> Result<Vec<SimplifiedPlaylist>> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(Error::Validation("pattern is required".into()));
        }
        let re = Regex::new(pattern)?;

        let playlists = self.api.list_current_user_playlists(0).await?;
        let matched: Vec<SimplifiedPlaylist> = playlists
            .into_iter()
            .filter(|p| re.is_match(&p.name))
            .collect();
        if matched.is_empty() {
            return Err(Error::NoMatches);
        }
        Ok(matched)
    }

    pub async fn merge_playlists(
        &self,
        source_ids: &[String],
        target_name: &str,
        opts: &MergeOptions,
    ) -> Result<MergeResult> {
        self.merge_playlists_with_progress(source_ids, target_name, opts, |_| {})
            .await
    }

    /// Merge the tracks of `source_ids` into a new playlist named `target_name`.
    ///
    /// Nothing is created until every source has been read. Once the target
    /// exists, a failure while adding tracks or re-reading them deletes it
    /// again (best effort) before the error is returned. Tracks still missing
    /// after the last verification attempt are reported through
    /// `MergeResult::verified` and `missing_uris`, not as an error.
    pub async fn merge_playlists_with_progress<F>(
        &self,
        source_ids: &[String],
        target_name: &str,
        opts: &MergeOptions,
        mut on_stage: F,
    ) -> Result<MergeResult>
    where
        F: FnMut(MergeStage) + Send,
    {
        let target_name = target_name.trim();
        if target_name.is_empty() {
            return Err(Error::Validation("target name is required".into()));
        }
        let sources: Vec<&str> = source_ids
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if sources.is_empty() {
            return Err(Error::Validation(
                "at least one source playlist is required".into(),
            ));
        }

        let mut enter = |stage: MergeStage| {
            info!("Merge into '{}': {}", target_name, stage);
            on_stage(stage);
        };

        enter(MergeStage::Collecting);
        let mut uris: Vec<String> = Vec::new();
        for id in &sources {
            let tracks = self
                .api
                .list_playlist_tracks(id, 0)
                .await
                .map_err(|e| Error::merge(MergeStage::Collecting, e))?;
            uris.extend(tracks.into_iter().map(|t| t.uri).filter(|u| !u.is_empty()));
        }
        info!("Collected {} tracks from {} playlists", uris.len(), sources.len());

        let mut duplicates_removed = 0;
        if opts.deduplicate {
            enter(MergeStage::Deduplicating);
            let (kept, dupes) = deduplicate(&uris);
            uris = kept;
            duplicates_removed = dupes;
        }

        enter(MergeStage::Creating);
        let created = self
            .api
            .create_playlist(target_name, &opts.description, opts.public)
            .await
            .map_err(|e| Error::merge(MergeStage::Creating, e))?;
        let new_id = created.id.trim().to_string();
        info!("Created playlist {} ({})", target_name, new_id);

        if !uris.is_empty() {
            enter(MergeStage::AddingTracks);
            for batch in uris.chunks(MAX_TRACKS_PER_REQUEST) {
                if let Err(e) = self.api.add_tracks_to_playlist(&new_id, batch).await {
                    self.rollback(&new_id).await;
                    return Err(Error::merge(MergeStage::AddingTracks, e));
                }
            }
        }

        enter(MergeStage::Verifying);
        let (verified, missing_uris) = match self.verify_playlist_contents(&new_id, &uris).await {
            Ok(v) => v,
            Err(e) => {
                self.rollback(&new_id).await;
                return Err(Error::merge(MergeStage::Verifying, e));
            }
        };
        if !verified {
            warn!(
                "Playlist {} is missing {} of {} tracks after verification",
                new_id,
                missing_uris.len(),
                uris.len()
            );
        }

        enter(MergeStage::Done);
        Ok(MergeResult {
            new_playlist_id: new_id,
            track_count: uris.len(),
            duplicates_removed,
            verified,
            missing_uris,
        })
    }

    /// Best-effort delete of a playlist created by a failed merge.
    async fn rollback(&self, playlist_id: &str) {
        info!("Rolling back created playlist {}", playlist_id);
        if let Err(e) = self.api.delete_playlist(playlist_id).await {
            warn!("Rollback of playlist {} failed: {}", playlist_id, e);
        }
    }

    /// Check that every expected URI is present in the playlist.
    ///
    /// Retries up to `VERIFY_ATTEMPTS` times, `VERIFY_RETRY_DELAY` apart.
    /// Returns `(true, [])` once nothing is missing, otherwise `(false, missing)`
    /// with missing URIs in expected order.
    pub async fn verify_playlist_contents(
        &self,
        playlist_id: &str,
        expected_uris: &[String],
    ) -> Result<(bool, Vec<String>)> {
        let playlist_id = playlist_id.trim();
        if playlist_id.is_empty() {
            return Err(Error::Validation("playlist id is required".into()));
        }
        let (expected, _) = deduplicate(expected_uris);
        if expected.is_empty() {
            return Ok((true, Vec::new()));
        }

        let mut missing = Vec::new();
        for attempt in 0..VERIFY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(VERIFY_RETRY_DELAY).await;
            }
            let tracks = self.api.list_playlist_tracks(playlist_id, 0).await?;
            let seen: HashSet<&str> = tracks.iter().map(|t| t.uri.as_str()).collect();
            missing = expected
                .iter()
                .filter(|u| !seen.contains(u.as_str()))
                .cloned()
                .collect();
            if missing.is_empty() {
                return Ok((true, Vec::new()));
            }
        }
        Ok((false, missing))
    }

    /// Delete (unfollow) playlists one at a time, stopping at the first failure.
    ///
    /// A 403 becomes `PermissionDenied` naming the playlist; other failures are
    /// wrapped with the playlist id. Blank ids are skipped.
    pub async fn delete_playlists(&self, playlists: &[PlaylistRef]) -> Result<()> {
        for p in playlists.iter().filter(|p| !p.is_blank()) {
            let id = p.id.trim();
            if let Err(e) = self.api.delete_playlist(id).await {
                if e.status() == Some(403) {
                    return Err(Error::PermissionDenied {
                        playlist_id: id.to_string(),
                    });
                }
                return Err(Error::DeleteFailed {
                    playlist_id: id.to_string(),
                    source: Box::new(e),
                });
            }
            info!("Deleted playlist {}", id);
        }
        Ok(())
    }
}

/// Stable first-occurrence-wins dedup. Entries are trimmed and blanks dropped
/// without being counted; returns the kept URIs and the number of duplicates.
pub fn deduplicate(uris: &[String]) -> (Vec<String>, usize) {
    let mut seen: HashSet<&str> = HashSet::with_capacity(uris.len());
    let mut out = Vec::with_capacity(uris.len());
    let mut dupes = 0;
    for u in uris {
        let u = u.trim();
        if u.is_empty() {
            continue;
        }
        if !seen.insert(u) {
            dupes += 1;
            continue;
        }
        out.push(u.to_string());
    }
    (out, dupes)
}
