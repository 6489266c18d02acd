use crate::error::{Error, Result};
use crate::models::{Artist, SimplifiedPlaylist};
use once_cell::sync::Lazy;
use regex::Regex;

pub const TRACK_URI_PREFIX: &str = "spotify:track:";

static OPEN_TRACK_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://open\.spotify\.com/track/([A-Za-z0-9]+)(?:\?.*)?$")
        .expect("static regex")
});
static OPEN_PLAYLIST_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^https?://open\.spotify\.com/playlist/([A-Za-z0-9]+)(?:\?.*)?$")
        .expect("static regex")
});
static PLAYLIST_URI_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^spotify:playlist:([A-Za-z0-9]+)$").expect("static regex")
});

/// True when `s` parses as an absolute URL (has a scheme).
fn looks_like_url(s: &str) -> bool {
    url::Url::parse(s).map(|u| !u.scheme().is_empty()).unwrap_or(false)
}

/// Convert a track id, `spotify:track:` URI or open.spotify.com track URL
/// into the canonical `spotify:track:<id>` form.
pub fn normalize_track_uri(input: &str) -> Result<String> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::Validation("empty track value".into()));
    }
    if s.to_ascii_lowercase().starts_with(TRACK_URI_PREFIX) {
        return Ok(s.to_string());
    }
    if let Some(caps) = OPEN_TRACK_URL_RE.captures(s) {
        return Ok(format!("{}{}", TRACK_URI_PREFIX, &caps[1]));
    }
    if looks_like_url(s) {
        return Err(Error::Validation(format!("unsupported track url: {}", s)));
    }
    Ok(format!("{}{}", TRACK_URI_PREFIX, s))
}

/// Convert a playlist id, `spotify:playlist:` URI or open.spotify.com
/// playlist URL into the bare playlist id.
pub fn normalize_playlist_id(input: &str) -> Result<String> {
    let s = input.trim();
    if s.is_empty() {
        return Err(Error::Validation("empty playlist id".into()));
    }
    if let Some(caps) = PLAYLIST_URI_RE.captures(s) {
        return Ok(caps[1].to_string());
    }
    if let Some(caps) = OPEN_PLAYLIST_URL_RE.captures(s) {
        return Ok(caps[1].to_string());
    }
    if looks_like_url(s) {
        return Err(Error::Validation(format!("unsupported playlist url: {}", s)));
    }
    Ok(s.to_string())
}

pub fn join_artist_names(artists: &[Artist]) -> String {
    artists
        .iter()
        .map(|a| a.name.as_str())
        .filter(|n| !n.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Case-insensitive substring filter on playlist names; a blank filter keeps everything.
pub fn filter_playlists_by_name<'a>(
    playlists: &'a [SimplifiedPlaylist],
    filter: &str,
) -> Vec<&'a SimplifiedPlaylist> {
    let want = filter.trim().to_lowercase();
    playlists
        .iter()
        .filter(|p| want.is_empty() || p.name.to_lowercase().contains(&want))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_uri_forms() {
        assert_eq!(normalize_track_uri("  abc123 ").unwrap(), "spotify:track:abc123");
        assert_eq!(
            normalize_track_uri("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=x").unwrap(),
            "spotify:track:4uLU6hMCjMI75M1A2tKUQC"
        );
        assert_eq!(normalize_track_uri("spotify:track:xyz").unwrap(), "spotify:track:xyz");
        assert!(matches!(normalize_track_uri("   "), Err(Error::Validation(_))));
        assert!(matches!(
            normalize_track_uri("https://example.com/track/1"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn track_uri_is_idempotent_on_canonical_input() {
        for raw in ["abc", "https://open.spotify.com/track/Zz9", "spotify:track:q1"] {
            let once = normalize_track_uri(raw).unwrap();
            assert_eq!(normalize_track_uri(&once).unwrap(), once);
        }
    }

    #[test]
    fn playlist_id_forms() {
        assert_eq!(normalize_playlist_id("spotify:playlist:37i9dQ").unwrap(), "37i9dQ");
        assert_eq!(
            normalize_playlist_id("https://open.spotify.com/playlist/37i9dQ?si=abc").unwrap(),
            "37i9dQ"
        );
        assert_eq!(normalize_playlist_id(" raw ").unwrap(), "raw");
        assert!(normalize_playlist_id("").is_err());
        assert!(normalize_playlist_id("https://open.spotify.com/album/1").is_err());
    }

    #[test]
    fn artists_and_filters() {
        let artists = vec![
            Artist { id: "1".into(), name: "A".into() },
            Artist { id: "2".into(), name: String::new() },
            Artist { id: "3".into(), name: "B".into() },
        ];
        assert_eq!(join_artist_names(&artists), "A, B");

        let pls = vec![
            SimplifiedPlaylist { id: "1".into(), name: "Rock Mix".into(), ..Default::default() },
            SimplifiedPlaylist { id: "2".into(), name: "Jazz".into(), ..Default::default() },
        ];
        let hits = filter_playlists_by_name(&pls, "rock");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1");
        assert_eq!(filter_playlists_by_name(&pls, "  ").len(), 2);
    }
}
