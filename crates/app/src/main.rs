use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures_util::future::join_all;
use sonos_scrobbler_core::{AppConfig, DeviceConfig, TrackSnapshot};
use sonos_scrobbler_devices::{build_directory, DeviceDirectory};
use sonos_scrobbler_engine::{Orchestrator, OrchestratorConfig, StatusReport};
use sonos_scrobbler_lastfm::LastFmClient;
use sonos_scrobbler_queue::store::{read_json_or_default, QueueStore, STATUS_FILE};
use sonos_scrobbler_queue::{QueueSettings, SubmissionQueue};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{error, info, warn};

mod credentials;

#[derive(Parser, Debug)]
#[command(
    name = "sonos-scrobbler",
    about = "Sonos playback -> scrobble decisions -> Last.fm"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Run {
        /// Poll interval in milliseconds, overriding the config file.
        #[arg(long)]
        poll_ms: Option<u64>,
    },
    Doctor,
    Status,
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Exchange a Last.fm username and password for a session key.
    Auth,
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cmd = cli.command.unwrap_or(Commands::Run { poll_ms: None });
    let cfg_path = cli.config.unwrap_or_else(default_config_path);

    match cmd {
        Commands::Config {
            action: ConfigAction::Init,
        } => {
            init_config(&cfg_path)?;
            println!("Initialized config at {}", cfg_path.display());
            Ok(())
        }
        Commands::Doctor => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            doctor(&cfg, &cfg_path).await
        }
        Commands::Status => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            status(&cfg)
        }
        Commands::Auth => {
            let cfg = load_or_default(&cfg_path)?;
            init_logging(&cfg.log_level);
            auth(&cfg).await
        }
        Commands::Run { poll_ms } => {
            let mut cfg = load_or_default(&cfg_path)?;
            if let Some(poll_ms) = poll_ms {
                cfg.intervals.poll_ms = poll_ms;
            }
            init_logging(&cfg.log_level);
            run(cfg).await
        }
    }
}

async fn run(cfg: AppConfig) -> Result<()> {
    cfg.validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    let creds = credentials::load_credentials(&cfg.lastfm).await?;
    let api = LastFmClient::new(&cfg.lastfm.api_url, &creds.api_key, &creds.api_secret)?
        .with_session(&creds.session_key);

    let queue = SubmissionQueue::open(QueueSettings::from_config(&cfg.queue))?;
    let worker = queue.spawn_worker(Arc::new(api));

    if cfg.devices.is_empty() {
        warn!("no devices configured; add [[devices]] entries or set SONOS_SCROBBLER_DEVICES");
    }
    let directory = Arc::new(build_directory(&cfg.devices)?);
    let orchestrator = Orchestrator::new(
        OrchestratorConfig::from_app_config(&cfg),
        directory,
        queue.clone(),
    );

    info!(
        devices = cfg.devices.len(),
        data_dir = ?cfg.queue.data_dir,
        pending = queue.depth(),
        "sonos-scrobbler started"
    );

    orchestrator
        .run(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("received ctrl-c; shutting down"),
                Err(err) => {
                    error!(error = %err, "failed to listen for ctrl-c");
                    std::future::pending::<()>().await;
                }
            }
        })
        .await?;

    worker.abort();
    queue.flush().await;
    Ok(())
}

async fn doctor(cfg: &AppConfig, cfg_path: &Path) -> Result<()> {
    println!("== sonos-scrobbler doctor ==");
    println!(
        "Config file: {} ({})",
        cfg_path.display(),
        if cfg_path.exists() { "found" } else { "missing, using defaults" }
    );
    if let Err(err) = cfg.validate() {
        println!("Config problem: {err}");
    }

    let missing = credentials::missing_fields(&cfg.lastfm);
    if missing.is_empty() {
        println!("Last.fm credentials: present");
    } else {
        println!("Last.fm credentials: missing {}", missing.join(", "));
    }

    if let Some(dir) = &cfg.queue.data_dir {
        match QueueStore::open(dir).and_then(|store| store.load_queue()) {
            Ok(queue) => println!(
                "Data dir: {} ({} pending scrobbles)",
                dir.display(),
                queue.pending.len()
            ),
            Err(err) => println!("Data dir: {} ({err:#})", dir.display()),
        }
    }

    if cfg.devices.is_empty() {
        println!("No devices configured");
        return Ok(());
    }

    let directory = build_directory(&cfg.devices)?;
    let devices = directory.discover().await?;
    let results = join_all(devices.iter().map(|device| device.snapshot())).await;

    for (device, result) in devices.iter().zip(results) {
        match result {
            Ok(snapshot) => {
                println!("{} ({}): {}", device.name(), device.id(), describe(&snapshot))
            }
            Err(err) => println!("{} ({}): error: {err}", device.name(), device.id()),
        }
    }

    Ok(())
}

fn describe(snapshot: &TrackSnapshot) -> String {
    let track = match (&snapshot.artist, &snapshot.title) {
        (Some(artist), Some(title)) => format!("{artist} - {title}"),
        _ => "<no track>".to_string(),
    };
    let clock = |d: Option<Duration>| {
        d.map(|d| format!("{}:{:02}", d.as_secs() / 60, d.as_secs() % 60))
            .unwrap_or_else(|| "?".to_string())
    };
    format!(
        "{:?} {track} [{} / {}]",
        snapshot.transport_state,
        clock(snapshot.position),
        clock(snapshot.duration)
    )
}

fn status(cfg: &AppConfig) -> Result<()> {
    let Some(dir) = &cfg.queue.data_dir else {
        println!("no data directory configured; nothing to report");
        return Ok(());
    };

    let path = dir.join(STATUS_FILE);
    let Some(report) = read_json_or_default::<Option<StatusReport>>(&path)? else {
        println!("no status report at {}; is the daemon running?", path.display());
        return Ok(());
    };

    let age = SystemTime::now()
        .duration_since(report.generated_at)
        .unwrap_or_default();
    println!("report age: {}s", age.as_secs());
    println!("queue depth: {}", report.queue_depth);

    for device in &report.devices {
        println!("device: {} ({})", device.name, device.device_id);
        match &device.session {
            Some(session) => println!(
                "  playing: {} - {} ({}s played{})",
                session.artist,
                session.title,
                session.played_secs,
                if session.scrobbled { ", scrobbled" } else { "" }
            ),
            None => println!("  playing: <none>"),
        }
        if let Some(err) = &device.last_error {
            println!("  last error: {err}");
        }
    }

    let store = QueueStore::open(dir)?;
    let dead = store.load_dead_letters()?;
    if !dead.is_empty() {
        println!("dead letters: {}", dead.len());
        for letter in &dead {
            println!(
                "  {} ({}): {}",
                letter.submission.listen.track, letter.submission.listen.device_id, letter.error
            );
        }
    }

    Ok(())
}

async fn auth(cfg: &AppConfig) -> Result<()> {
    let lastfm = &cfg.lastfm;
    if lastfm.api_key.trim().is_empty() || lastfm.api_secret.trim().is_empty() {
        anyhow::bail!(
            "set lastfm.api_key and lastfm.api_secret (or LASTFM_API_KEY / LASTFM_API_SECRET) first"
        );
    }

    let username = match lastfm.username.trim() {
        "" => prompt("Last.fm Username: ")?,
        name => name.to_string(),
    };
    let password = match lastfm.password.as_str() {
        "" => prompt("Last.fm Password: ")?,
        pass => pass.to_string(),
    };

    let client = LastFmClient::new(
        &lastfm.api_url,
        lastfm.api_key.trim(),
        lastfm.api_secret.trim(),
    )?;
    let session_key = client.mobile_session(&username, &password).await?;

    println!("Session key: {session_key}");
    println!("Store it as lastfm.session_key in the config file or LASTFM_SESSION_KEY.");
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("sonos-scrobbler").join("config.toml")
}

fn default_data_dir() -> PathBuf {
    let base = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join("sonos-scrobbler")
}

fn init_config(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
    }
    let cfg = AppConfig::default();
    let toml = toml::to_string_pretty(&cfg)?;
    std::fs::write(path, toml)
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    Ok(())
}

fn load_or_default(path: &Path) -> Result<AppConfig> {
    let mut cfg = if !path.exists() {
        AppConfig::default()
    } else {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("failed to parse {}", path.display()))?
    };
    apply_env_overrides(&mut cfg);
    if cfg.queue.data_dir.is_none() {
        cfg.queue.data_dir = Some(default_data_dir());
    }
    Ok(cfg)
}

fn init_logging(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init();
}

fn parse_device_list(value: &str) -> Vec<DeviceConfig> {
    value
        .split(',')
        .map(str::trim)
        .filter(|host| !host.is_empty())
        .map(DeviceConfig::from_host)
        .collect()
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn apply_env_overrides(cfg: &mut AppConfig) {
    if let Some(v) = env_value("SONOS_SCROBBLER_LOG_LEVEL") {
        cfg.log_level = v;
    }
    if let Some(v) = env_value("SONOS_SCROBBLER_POLL_MS") {
        match v.trim().parse::<u64>() {
            Ok(ms) => cfg.intervals.poll_ms = ms,
            Err(_) => eprintln!("ignoring SONOS_SCROBBLER_POLL_MS={v}: not a number"),
        }
    }
    if let Some(v) = env_value("SONOS_SCROBBLER_DEVICES") {
        cfg.devices = parse_device_list(&v);
    }

    let lastfm = &mut cfg.lastfm;
    for (key, field) in [
        ("LASTFM_API_KEY", &mut lastfm.api_key),
        ("LASTFM_API_SECRET", &mut lastfm.api_secret),
        ("LASTFM_SESSION_KEY", &mut lastfm.session_key),
        ("LASTFM_USERNAME", &mut lastfm.username),
        ("LASTFM_PASSWORD", &mut lastfm.password),
    ] {
        if let Some(v) = env_value(key) {
            *field = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{describe, parse_device_list};
    use sonos_scrobbler_core::{TrackSnapshot, TransportState};
    use std::time::{Duration, SystemTime};

    #[test]
    fn device_list_skips_blanks() {
        let devices = parse_device_list(" 10.0.0.5, ,10.0.0.6 ,");
        let hosts: Vec<&str> = devices.iter().map(|d| d.host.as_str()).collect();
        assert_eq!(hosts, vec!["10.0.0.5", "10.0.0.6"]);
        assert_eq!(devices[0].port(), 1400);
    }

    #[test]
    fn describes_snapshot_for_doctor() {
        let snapshot = TrackSnapshot {
            artist: Some("Artist".to_string()),
            title: Some("Title".to_string()),
            duration: Some(Duration::from_secs(245)),
            position: Some(Duration::from_secs(61)),
            transport_state: TransportState::Playing,
            ..TrackSnapshot::idle("kitchen", SystemTime::now())
        };
        assert_eq!(describe(&snapshot), "Playing Artist - Title [1:01 / 4:05]");
        assert_eq!(
            describe(&TrackSnapshot::idle("kitchen", SystemTime::now())),
            "Stopped <no track> [? / ?]"
        );
    }
}
