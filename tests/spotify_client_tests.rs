use async_trait::async_trait;
use genrify as lib;
use lib::api::spotify::SpotifyClient;
use lib::api::{PlaylistApi, TokenAccessor};
use lib::Error;
use mockito::{Matcher, Server};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Hands out "old" until a forced refresh, then "new".
/// With `refresh_ok == false` the forced refresh fails.
struct FakeTokens {
    refreshes: AtomicUsize,
    refresh_ok: bool,
}

impl FakeTokens {
    fn new(refresh_ok: bool) -> Arc<Self> {
        Arc::new(Self {
            refreshes: AtomicUsize::new(0),
            refresh_ok,
        })
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenAccessor for FakeTokens {
    async fn access_token(&self) -> lib::Result<String> {
        if self.refreshes() > 0 {
            Ok("new".into())
        } else {
            Ok("old".into())
        }
    }

    async fn force_refresh(&self, rejected: &str) -> lib::Result<String> {
        assert_eq!(rejected, "old");
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.refresh_ok {
            Ok("new".into())
        } else {
            Err(Error::Auth("token refresh failed: invalid_grant".into()))
        }
    }
}

fn client(base: &str, tokens: Arc<FakeTokens>) -> SpotifyClient {
    SpotifyClient::new(tokens)
        .with_base_url(base)
        .expect("base url")
        .with_user_agent("genrify-tests")
}

#[test]
fn get_me_sends_bearer_accept_and_user_agent_without_content_type() {
    let mut server = Server::new();
    let m = server
        .mock("GET", "/me")
        .match_header("authorization", "Bearer old")
        .match_header("accept", "application/json")
        .match_header("user-agent", "genrify-tests")
        .match_header("content-type", Matcher::Missing)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({"id": "u1", "display_name": "Una"}).to_string())
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let me = rt.block_on(c.get_me()).expect("get_me");
    assert_eq!(me.id, "u1");
    assert_eq!(me.display_name.as_deref(), Some("Una"));
    m.assert();
}

#[test]
fn unauthorized_forces_one_refresh_and_retries() {
    let mut server = Server::new();
    let stale = server
        .mock("GET", "/me")
        .match_header("authorization", "Bearer old")
        .with_status(401)
        .with_body(json!({"error": {"status": 401, "message": "The access token expired"}}).to_string())
        .expect(1)
        .create();
    let fresh = server
        .mock("GET", "/me")
        .match_header("authorization", "Bearer new")
        .with_status(200)
        .with_body(json!({"id": "u1"}).to_string())
        .expect(1)
        .create();

    let tokens = FakeTokens::new(true);
    let c = client(&server.url(), tokens.clone());
    let rt = tokio::runtime::Runtime::new().unwrap();
    let me = rt.block_on(c.get_me()).expect("get_me after refresh");
    assert_eq!(me.id, "u1");
    assert_eq!(tokens.refreshes(), 1);
    stale.assert();
    fresh.assert();
}

#[test]
fn second_unauthorized_is_an_auth_error() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/me")
        .with_status(401)
        .with_body(json!({"error": {"status": 401, "message": "nope"}}).to_string())
        .expect(2)
        .create();

    let tokens = FakeTokens::new(true);
    let c = client(&server.url(), tokens.clone());
    let rt = tokio::runtime::Runtime::new().unwrap();
    let res = rt.block_on(c.get_me());
    assert!(matches!(res, Err(Error::Auth(_))), "got {:?}", res);
    assert_eq!(tokens.refreshes(), 1);
}

#[test]
fn failed_forced_refresh_surfaces_its_auth_error() {
    let mut server = Server::new();
    let _m = server.mock("GET", "/me").with_status(401).expect(1).create();

    let c = client(&server.url(), FakeTokens::new(false));
    let rt = tokio::runtime::Runtime::new().unwrap();
    match rt.block_on(c.get_me()) {
        Err(Error::Auth(msg)) => assert!(msg.contains("invalid_grant")),
        other => panic!("expected auth error, got {:?}", other),
    }
}

#[test]
fn rate_limit_gives_up_after_five_retries() {
    let mut server = Server::new();
    let m = server
        .mock("GET", "/me")
        .with_status(429)
        .with_header("retry-after", "0")
        .expect(6)
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let res = rt.block_on(c.get_me());
    assert!(matches!(res, Err(Error::RateLimitExceeded { retries: 5 })), "got {:?}", res);
    m.assert();
}

#[test]
fn error_envelope_becomes_api_error() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/playlists/p1")
        .with_status(404)
        .with_body(json!({"error": {"status": 404, "message": "Not found."}}).to_string())
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    match rt.block_on(c.get_playlist("p1")) {
        Err(Error::Api { status, message }) => {
            assert_eq!(status, 404);
            assert_eq!(message, "Not found.");
        }
        other => panic!("expected api error, got {:?}", other),
    }
}

#[test]
fn non_envelope_body_becomes_http_error() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/playlists/p1")
        .with_status(502)
        .with_body("<html>bad gateway</html>")
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let res = rt.block_on(c.get_playlist("p1"));
    assert!(matches!(res, Err(Error::Http { status: 502 })), "got {:?}", res);
}

#[test]
fn empty_success_body_is_none() {
    let mut server = Server::new();
    let m = server
        .mock("DELETE", "/playlists/p1/followers")
        .with_status(200)
        .expect(2)
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let raw = rt
        .block_on(c.request(reqwest::Method::DELETE, "/playlists/p1/followers", &[], None))
        .expect("request");
    assert!(raw.is_none());
    rt.block_on(c.delete_playlist(" p1 ")).expect("delete");
    m.assert();
}

#[test]
fn blank_playlist_id_is_rejected_without_a_request() {
    let server = Server::new();
    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    assert!(matches!(rt.block_on(c.get_playlist("  ")), Err(Error::Validation(_))));
    assert!(matches!(rt.block_on(c.delete_playlist("")), Err(Error::Validation(_))));
    assert!(matches!(
        rt.block_on(c.create_playlist(" ", "", false)),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        rt.block_on(c.add_tracks_to_playlist("p1", &["  ".to_string()])),
        Err(Error::Validation(_))
    ));
}

#[test]
fn playlists_are_paged_until_next_is_null() {
    let mut server = Server::new();
    let base = server.url();
    let first = server
        .mock("GET", "/me/playlists")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("limit".into(), "50".into()),
            Matcher::UrlEncoded("offset".into(), "0".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "items": [{"id": "a", "name": "Jazz 1"}, {"id": "b", "name": "Rock"}],
                "next": format!("{}/me/playlists?offset=50&limit=50", base),
                "limit": 50, "offset": 0, "total": 3
            })
            .to_string(),
        )
        .create();
    let second = server
        .mock("GET", "/me/playlists")
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("limit".into(), "50".into()),
            Matcher::UrlEncoded("offset".into(), "50".into()),
        ]))
        .with_status(200)
        .with_body(
            json!({
                "items": [{"id": "c", "name": "Jazz 2"}],
                "next": null,
                "limit": 50, "offset": 50, "total": 3
            })
            .to_string(),
        )
        .create();

    let c = client(&base, FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let all = rt.block_on(c.list_current_user_playlists(0)).expect("list");
    let ids: Vec<&str> = all.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    first.assert();
    second.assert();
}

#[test]
fn playlist_tracks_skip_null_and_uriless_items() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/playlists/p1/tracks")
        .match_query(Matcher::UrlEncoded("limit".into(), "100".into()))
        .with_status(200)
        .with_body(
            json!({
                "items": [
                    {"track": {"id": "1", "name": "One", "uri": "spotify:track:1", "artists": [{"name": "A"}]}},
                    {"track": null},
                    {"track": {"id": null, "name": "Local", "uri": ""}},
                    {"track": {"id": "2", "name": "Two", "uri": "spotify:track:2"}}
                ],
                "next": null
            })
            .to_string(),
        )
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let tracks = rt.block_on(c.list_playlist_tracks("p1", 0)).expect("tracks");
    let uris: Vec<&str> = tracks.iter().map(|t| t.uri.as_str()).collect();
    assert_eq!(uris, vec!["spotify:track:1", "spotify:track:2"]);
    assert_eq!(tracks[0].artists[0].name, "A");
}

#[test]
fn add_tracks_batches_by_one_hundred_and_returns_last_snapshot() {
    let mut server = Server::new();
    let m = server
        .mock("POST", "/playlists/p1/tracks")
        .match_header("content-type", "application/json")
        .with_status(201)
        .with_body(json!({"snapshot_id": "snap"}).to_string())
        .expect(3)
        .create();

    let uris: Vec<String> = (0..250).map(|i| format!("spotify:track:{}", i)).collect();
    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let snap = rt.block_on(c.add_tracks_to_playlist("p1", &uris)).expect("add");
    assert_eq!(snap, "snap");
    m.assert();
}

#[test]
fn create_playlist_posts_name_public_and_description() {
    let mut server = Server::new();
    let m = server
        .mock("POST", "/me/playlists")
        .match_body(Matcher::PartialJson(json!({
            "name": "Merged",
            "public": false,
            "description": "all jazz"
        })))
        .with_status(201)
        .with_body(json!({"id": "new1", "name": "Merged"}).to_string())
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let p = rt
        .block_on(c.create_playlist(" Merged ", "all jazz", false))
        .expect("create");
    assert_eq!(p.id, "new1");
    m.assert();
}

#[test]
fn local_tracks_with_null_ids_are_listed() {
    let mut server = Server::new();
    let _m = server
        .mock("GET", "/playlists/p1/tracks")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            json!({
                "items": [
                    {"track": {"id": "1", "name": "One", "uri": "spotify:track:1",
                               "artists": [{"id": "a1", "name": "A"}], "album": {"id": "al1", "name": "Al"}}},
                    {"is_local": true, "track": {
                        "id": null,
                        "name": "Demo",
                        "uri": "spotify:local:Someone:Tape:Demo:180",
                        "artists": [{"id": null, "name": "Someone"}],
                        "album": {"id": null, "name": "Tape"}
                    }}
                ],
                "next": null
            })
            .to_string(),
        )
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let tracks = rt.block_on(c.list_playlist_tracks("p1", 0)).expect("tracks");
    assert_eq!(tracks.len(), 2);
    assert_eq!(tracks[1].id, None);
    assert_eq!(tracks[1].uri, "spotify:local:Someone:Tape:Demo:180");
    assert_eq!(tracks[1].artists[0].name, "Someone");
    assert_eq!(tracks[1].album.id, "");
}

#[test]
fn remove_tracks_sends_uri_objects_and_returns_snapshot() {
    let mut server = Server::new();
    let m = server
        .mock("DELETE", "/playlists/p1/tracks")
        .match_header("content-type", "application/json")
        .match_body(Matcher::PartialJson(json!({
            "tracks": [{"uri": "spotify:track:1"}, {"uri": "spotify:track:2"}]
        })))
        .with_status(200)
        .with_body(json!({"snapshot_id": "snap-after-remove"}).to_string())
        .expect(1)
        .create();

    let c = client(&server.url(), FakeTokens::new(true));
    let rt = tokio::runtime::Runtime::new().unwrap();
    let uris = vec![" spotify:track:1 ".to_string(), "".to_string(), "spotify:track:2".to_string()];
    let snap = rt
        .block_on(c.remove_tracks_from_playlist("p1", &uris))
        .expect("remove");
    assert_eq!(snap, "snap-after-remove");
    m.assert();

    assert!(matches!(
        rt.block_on(c.remove_tracks_from_playlist("p1", &["  ".to_string()])),
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        rt.block_on(c.remove_tracks_from_playlist(" ", &uris)),
        Err(Error::Validation(_))
    ));
}
