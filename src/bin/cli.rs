use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use genrify as lib;
use lib::api::spotify::SpotifyClient;
use lib::api::spotify_auth::{OAuthRefresher, SqliteTokenStore, Token, TokenManager, TokenStore};
use lib::api::PlaylistApi;
use lib::config::Config;
use lib::models::{MergeOptions, PlaylistRef};
use lib::playlist::PlaylistService;
use lib::util;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::subscriber as tracing_subscriber_global;
use tracing_appender::rolling::RollingFileAppender;
use tracing_log::LogTracer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "genrify", version, about = "Search, merge and clean up Spotify playlists")]
struct Cli {
    /// Path to config TOML
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current user
    Me,
    /// Playlist operations
    Playlists {
        #[command(subcommand)]
        sub: PlaylistCommands,
    },
    /// Delete the current user's playlists whose names match a regex
    DeletePlaylists {
        /// Regex used to match playlist names
        #[arg(long)]
        name_regex: String,

        /// Dry run: list matching playlists but do not delete anything
        #[arg(long)]
        dry_run: bool,

        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Token helpers
    Token {
        #[command(subcommand)]
        sub: TokenCommands,
    },
    /// Validate config file and exit
    ConfigValidate,
}

#[derive(Subcommand)]
enum PlaylistCommands {
    /// List the current user's playlists
    List {
        /// Case-insensitive substring filter on names
        #[arg(long)]
        filter: Option<String>,
        /// Maximum number of playlists to fetch (0 = all)
        #[arg(long, default_value_t = 0)]
        limit: usize,
    },
    /// List the tracks of a playlist (id, URI or open.spotify.com URL)
    Tracks {
        playlist: String,
        #[arg(long, default_value_t = 0)]
        limit: usize,
        /// Print only track URIs
        #[arg(long)]
        uris: bool,
    },
    /// Create an empty playlist
    Create {
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        public: bool,
    },
    /// Add tracks (ids, URIs or URLs) to a playlist
    Add {
        playlist: String,
        #[arg(required = true)]
        tracks: Vec<String>,
    },
    /// Find playlists whose names match a regex
    Find { pattern: String },
    /// Merge all playlists matching a regex into a new playlist
    Merge {
        #[arg(long)]
        pattern: String,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        public: bool,
        #[arg(long)]
        deduplicate: bool,
        /// Delete the source playlists after a verified merge
        #[arg(long)]
        delete_sources: bool,
        #[arg(long)]
        dry_run: bool,
        #[arg(long)]
        yes: bool,
    },
    /// Delete (unfollow) playlists
    Delete {
        #[arg(required = true)]
        playlists: Vec<String>,
    },
}

#[derive(Subcommand)]
enum TokenCommands {
    /// Import a token JSON file into the token store
    Import { file: PathBuf },
    /// Show whether a stored token exists and when it expires
    Status,
}

fn init_tracing(cfg: &Config) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    // Logs go to stderr and a daily-rotated file in cfg.log_dir.
    let _ = LogTracer::init();
    std::fs::create_dir_all(&cfg.log_dir)
        .with_context(|| format!("creating log dir {}", cfg.log_dir.display()))?;
    let file_appender: RollingFileAppender = tracing_appender::rolling::daily(&cfg.log_dir, "genrify.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // Honor RUST_LOG if set, otherwise default to warn on the console.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .with(fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber_global::set_global_default(subscriber)
        .context("failed to set global tracing subscriber")?;
    Ok(guard)
}

fn token_store(cfg: &Config) -> SqliteTokenStore {
    SqliteTokenStore::new(cfg.db_path.clone()).with_client_id(cfg.client_id.clone())
}

fn build_client(cfg: &Config) -> Result<Arc<SpotifyClient>> {
    let manager = TokenManager::new(
        Box::new(token_store(cfg)),
        Box::new(OAuthRefresher::new(cfg.auth_base_url.clone(), cfg.client_id.clone())),
        cfg.token_leeway(),
    );
    let client = SpotifyClient::from_config(cfg, Arc::new(manager)).context("building spotify client")?;
    Ok(Arc::new(client))
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N]: ", prompt);
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let answer = line.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(cli.config.as_deref()).context("loading config")?;
    let _log_guard = init_tracing(&cfg)?;

    match cli.command {
        Commands::ConfigValidate => {
            if !cfg.is_configured() {
                eprintln!("Config validation failed: client_id is not set");
                std::process::exit(2);
            }
            println!("OK");
        }
        Commands::Token { sub } => run_token(&cfg, sub).await?,
        Commands::Me => {
            let client = build_client(&cfg)?;
            let me = client.get_me().await?;
            match me.display_name {
                Some(name) if !name.is_empty() => println!("{} ({})", name, me.id),
                _ => println!("{}", me.id),
            }
        }
        Commands::Playlists { sub } => {
            let client = build_client(&cfg)?;
            run_playlists(client, sub).await?;
        }
        Commands::DeletePlaylists { name_regex, dry_run, yes } => {
            let client = build_client(&cfg)?;
            let service = PlaylistService::new(client);
            let matches = match service.find_playlists_by_pattern(&name_regex).await {
                Ok(m) => m,
                Err(lib::Error::NoMatches) => {
                    println!("No playlists matched regex '{}'.", name_regex);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            println!("Matched {} playlist(s):", matches.len());
            for p in &matches {
                println!("- {} ({})", p.name, p.id);
            }
            if dry_run {
                println!("Dry run: no playlists were deleted.");
                return Ok(());
            }
            if !yes && !confirm(&format!("Delete {} playlist(s)?", matches.len()))? {
                println!("Aborted.");
                return Ok(());
            }
            let refs: Vec<PlaylistRef> = matches.iter().map(|p| p.to_ref()).collect();
            service.delete_playlists(&refs).await?;
            println!("All matched playlists deleted successfully.");
        }
    }

    Ok(())
}

async fn run_token(cfg: &Config, sub: TokenCommands) -> Result<()> {
    let store = token_store(cfg);
    match sub {
        TokenCommands::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading token file {}", file.display()))?;
            let token: Token = serde_json::from_str(&raw).context("parsing token JSON")?;
            if token.access_token.trim().is_empty() {
                bail!("token file has no access_token");
            }
            store.save(&token).await?;
            println!("Token imported into {}", cfg.db_path.display());
        }
        TokenCommands::Status => match store.load().await? {
            None => println!("No token stored. Import one with `genrify token import <file>`."),
            Some(t) => {
                let state = if t.is_expired(cfg.token_leeway()) { "expired" } else { "valid" };
                println!("Token {} (expires at {})", state, t.expires_at.to_rfc3339());
                let has_refresh = t.refresh_token.as_deref().map_or(false, |r| !r.is_empty());
                println!("Refresh token: {}", if has_refresh { "present" } else { "missing" });
            }
        },
    }
    Ok(())
}

async fn run_playlists(client: Arc<SpotifyClient>, sub: PlaylistCommands) -> Result<()> {
    match sub {
        PlaylistCommands::List { filter, limit } => {
            let playlists = client.list_current_user_playlists(limit).await?;
            let shown = util::filter_playlists_by_name(&playlists, filter.as_deref().unwrap_or(""));
            for p in shown {
                println!("{}\t{}\t{} tracks", p.id, p.name, p.tracks.total);
            }
        }
        PlaylistCommands::Tracks { playlist, limit, uris } => {
            let id = util::normalize_playlist_id(&playlist)?;
            let tracks = client.list_playlist_tracks(&id, limit).await?;
            for t in tracks {
                if uris {
                    println!("{}", t.uri);
                } else {
                    println!("{} - {}\t{}", util::join_artist_names(&t.artists), t.name, t.uri);
                }
            }
        }
        PlaylistCommands::Create { name, description, public } => {
            let p = client.create_playlist(&name, &description, public).await?;
            println!("Created playlist {} ({})", p.name, p.id);
        }
        PlaylistCommands::Add { playlist, tracks } => {
            let id = util::normalize_playlist_id(&playlist)?;
            let uris = tracks
                .iter()
                .map(|t| util::normalize_track_uri(t))
                .collect::<lib::Result<Vec<_>>>()?;
            let snapshot = client.add_tracks_to_playlist(&id, &uris).await?;
            println!("Added {} track(s) to {} (snapshot {})", uris.len(), id, snapshot);
        }
        PlaylistCommands::Find { pattern } => {
            let service = PlaylistService::new(client);
            match service.find_playlists_by_pattern(&pattern).await {
                Ok(found) => {
                    for p in found {
                        println!("{}\t{}", p.id, p.name);
                    }
                }
                Err(lib::Error::NoMatches) => println!("No playlists matched '{}'.", pattern),
                Err(e) => return Err(e.into()),
            }
        }
        PlaylistCommands::Merge {
            pattern,
            name,
            description,
            public,
            deduplicate,
            delete_sources,
            dry_run,
            yes,
        } => {
            let service = PlaylistService::new(client);
            let sources = service.find_playlists_by_pattern(&pattern).await?;
            println!("Merging {} playlist(s) into '{}':", sources.len(), name);
            for p in &sources {
                println!("- {} ({}, {} tracks)", p.name, p.id, p.tracks.total);
            }
            if dry_run {
                println!("Dry run: nothing was created.");
                return Ok(());
            }
            if !yes && !confirm("Proceed with merge?")? {
                println!("Aborted.");
                return Ok(());
            }

            let ids: Vec<String> = sources.iter().map(|p| p.id.clone()).collect();
            let opts = MergeOptions {
                deduplicate,
                public,
                description,
            };
            let result = service
                .merge_playlists_with_progress(&ids, &name, &opts, |stage| {
                    println!("... {}", stage);
                })
                .await?;

            println!(
                "Created {} with {} track(s), {} duplicate(s) removed",
                result.new_playlist_id, result.track_count, result.duplicates_removed
            );
            if !result.verified {
                eprintln!("Warning: {} track(s) not visible yet:", result.missing_uris.len());
                for uri in &result.missing_uris {
                    eprintln!("  {}", uri);
                }
                if delete_sources {
                    eprintln!("Source playlists kept because the merge could not be verified.");
                }
                return Ok(());
            }

            if delete_sources {
                if !yes && !confirm(&format!("Delete the {} source playlist(s)?", sources.len()))? {
                    println!("Source playlists kept.");
                    return Ok(());
                }
                let refs: Vec<PlaylistRef> = sources.iter().map(|p| p.to_ref()).collect();
                service.delete_playlists(&refs).await?;
                println!("Deleted {} source playlist(s).", refs.len());
            }
        }
        PlaylistCommands::Delete { playlists } => {
            let refs = playlists
                .iter()
                .map(|p| util::normalize_playlist_id(p).map(PlaylistRef::from))
                .collect::<lib::Result<Vec<_>>>()?;
            let service = PlaylistService::new(client);
            service.delete_playlists(&refs).await?;
            println!("Deleted {} playlist(s).", refs.len());
        }
    }
    Ok(())
}
