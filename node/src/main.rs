use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, Command};
use config::{Config, File as ConfigFile};
use fshare_files::{Blake3Hasher, FilesService};
use fshare_rpc::{start_server, AppState};
use std::net::TcpListener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn, Subscriber};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

mod version;

use version::{git_commit_hash, FSHARE_VERSION};

const DEFAULT_CONFIG_PATH: &str = "config/fshare.toml";
const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 7656;
const DEFAULT_HASH_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct AppConfig {
    config_path: Option<PathBuf>,

    // HTTP
    rpc_host: String,
    rpc_port: u16,
    redirect_after_post: Option<String>,

    // Sharing
    shared_paths: Vec<PathBuf>,
    hash_buffer_size: usize,

    // Logging
    log_level: String,
    log_format: String,
}

impl AppConfig {
    fn load(config_path_override: Option<&str>) -> Result<Self> {
        let resolved_path = if let Some(path) = config_path_override {
            let path = PathBuf::from(path);
            if !path.exists() {
                anyhow::bail!(
                    "Configuration file {} not found (specified via --config)",
                    path.display()
                );
            }
            Some(path)
        } else {
            let path = PathBuf::from(DEFAULT_CONFIG_PATH);
            if path.exists() {
                Some(path)
            } else {
                None
            }
        };

        let mut builder = Config::builder();

        if let Some(path) = &resolved_path {
            builder = builder.add_source(ConfigFile::from(path.as_path()));
        }

        builder = builder.add_source(config::Environment::with_prefix("FSHARE"));

        let config = builder.build()?;

        Ok(Self {
            config_path: resolved_path,
            rpc_host: get_string_value(&config, &["rpc_host"])
                .unwrap_or_else(|| DEFAULT_RPC_HOST.to_string()),
            rpc_port: get_string_value(&config, &["rpc_port"])
                .map(|value| value.parse::<u16>())
                .transpose()
                .context("rpc_port must be a port number")?
                .unwrap_or(DEFAULT_RPC_PORT),
            redirect_after_post: get_string_value(&config, &["redirect_after_post"]),
            shared_paths: get_list_value(&config, "shared_paths")
                .into_iter()
                .map(PathBuf::from)
                .collect(),
            hash_buffer_size: get_string_value(&config, &["hash_buffer_size"])
                .map(|value| value.parse::<usize>())
                .transpose()
                .context("hash_buffer_size must be a byte count")?
                .unwrap_or(DEFAULT_HASH_BUFFER_SIZE),
            log_level: get_string_value(&config, &["log_level"])
                .unwrap_or_else(|| "info".to_string()),
            log_format: get_string_value(&config, &["log_format"])
                .unwrap_or_else(|| "pretty".to_string()),
        })
    }

    fn validate(&self) -> Result<()> {
        if self.rpc_host.trim().is_empty() {
            anyhow::bail!("RPC_HOST must not be empty");
        }
        if self.rpc_port == 0 {
            anyhow::bail!("RPC_PORT must be greater than zero");
        }
        if self.hash_buffer_size == 0 {
            anyhow::bail!("HASH_BUFFER_SIZE must be greater than zero");
        }
        if self.log_format != "pretty" && self.log_format != "json" {
            anyhow::bail!(
                "Invalid LOG_FORMAT '{}'; expected 'pretty' or 'json'",
                self.log_format
            );
        }
        if let Some(relative) = self.shared_paths.iter().find(|path| !path.is_absolute()) {
            anyhow::bail!("Shared path {} must be absolute", relative.display());
        }
        Ok(())
    }

    fn rpc_addr(&self) -> String {
        format!("{}:{}", self.rpc_host, self.rpc_port)
    }
}

fn get_string_value(config: &Config, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        config
            .get_string(key)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    })
}

/// A list key given either as an array (config file) or a comma separated
/// string (environment).
fn get_list_value(config: &Config, key: &str) -> Vec<String> {
    let raw: Vec<String> = match config.get_array(key) {
        Ok(values) => values
            .into_iter()
            .filter_map(|value| value.into_string().ok())
            .collect(),
        Err(_) => get_string_value(config, &[key])
            .unwrap_or_default()
            .split(',')
            .map(str::to_string)
            .collect(),
    };
    raw.into_iter()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn build_cli() -> Command {
    Command::new("fshare-node")
        .version(FSHARE_VERSION)
        .about("Shared-file index node")
        .disable_version_flag(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path"),
        )
        .arg(
            Arg::new("version_flag")
                .short('V')
                .long("version")
                .action(ArgAction::SetTrue)
                .help("Print detailed version information and exit"),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .action(ArgAction::SetTrue)
                .help("Run configuration and environment self-checks, then exit"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .help("Override the log level"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .value_parser(["pretty", "json"])
                .help("Select log output format"),
        )
        .arg(
            Arg::new("rpc-host")
                .long("rpc-host")
                .value_name("HOST")
                .help("Override HTTP bind host (defaults to config value)"),
        )
        .arg(
            Arg::new("rpc-port")
                .long("rpc-port")
                .value_name("PORT")
                .value_parser(value_parser!(u16))
                .help("Override HTTP port"),
        )
        .arg(
            Arg::new("share")
                .long("share")
                .value_name("PATH")
                .action(ArgAction::Append)
                .help("Share a file at startup (repeatable)"),
        )
}

fn load_config_with_overrides(matches: &clap::ArgMatches) -> Result<AppConfig> {
    let config_path = matches
        .get_one::<String>("config")
        .map(|value| value.as_str());
    let mut config = AppConfig::load(config_path)?;
    apply_overrides(matches, &mut config);
    config.validate()?;
    Ok(config)
}

fn apply_overrides(matches: &clap::ArgMatches, config: &mut AppConfig) {
    if let Some(log_level) = matches.get_one::<String>("log-level") {
        config.log_level = log_level.clone();
    }

    if let Some(log_format) = matches.get_one::<String>("log-format") {
        config.log_format = log_format.clone();
    }

    if let Some(rpc_host) = matches.get_one::<String>("rpc-host") {
        config.rpc_host = rpc_host.clone();
    }

    if let Some(rpc_port) = matches.get_one::<u16>("rpc-port") {
        config.rpc_port = *rpc_port;
    }

    if let Some(paths) = matches.get_many::<String>("share") {
        config.shared_paths.extend(paths.map(PathBuf::from));
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    if matches.get_flag("version_flag") {
        print_version_info();
        return Ok(());
    }

    let config = load_config_with_overrides(&matches)?;

    if matches.get_flag("check") {
        return run_self_check(&config);
    }

    init_logging(&config)?;

    info!("Starting fshare node {} ({})", FSHARE_VERSION, git_commit_hash());
    match &config.config_path {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file found; using defaults and environment"),
    }

    let files = Arc::new(FilesService::with_hasher(Arc::new(
        Blake3Hasher::with_buffer_size(config.hash_buffer_size),
    )));
    let hashing_worker = files.start_hashing();

    let shared = share_configured_paths(&files, &config.shared_paths);
    info!(
        "Shared {} of {} configured paths",
        shared,
        config.shared_paths.len()
    );

    let rpc_addr = config.rpc_addr();
    let app_state = AppState::new(files.clone(), config.redirect_after_post.clone());
    info!("Files API available at: http://{}/files", rpc_addr);

    let shutdown = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", err);
        }
        info!("Shutting down fshare node");
    };
    let served = start_server(app_state, &rpc_addr, shutdown).await;

    files.stop_hashing();
    if let Err(err) = hashing_worker.await {
        warn!("Hashing worker ended abnormally: {}", err);
    }

    served?;
    info!("fshare node shutdown complete");
    Ok(())
}

/// Share every configured path. Failures are logged and skipped.
fn share_configured_paths(files: &FilesService, paths: &[PathBuf]) -> usize {
    let mut shared = 0;
    for path in paths {
        let Some(raw) = path.to_str() else {
            warn!("Skipping non UTF-8 shared path {}", path.display());
            continue;
        };
        match files.share(raw) {
            Ok(_) => shared += 1,
            Err(err) => warn!("Failed to share {}: {}", path.display(), err),
        }
    }
    shared
}

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(format_layer(&config.log_format, std::io::stdout))
        .init();

    Ok(())
}

/// Formatting layer for the configured `log_format`: one JSON object per line,
/// or multi-line pretty output.
fn format_layer<S, W>(log_format: &str, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer().with_writer(writer);
    if log_format == "json" {
        layer.json().boxed()
    } else {
        layer.pretty().boxed()
    }
}

fn print_version_info() {
    println!("fshare {} (commit {})", FSHARE_VERSION, git_commit_hash());
}

fn run_self_check(config: &AppConfig) -> Result<()> {
    println!("Running fshare node self-check...");
    let issues = collect_issues(config);

    if issues.is_empty() {
        println!("OK");
        Ok(())
    } else {
        for issue in &issues {
            eprintln!("- {issue}");
        }
        anyhow::bail!("self-check failed")
    }
}

fn collect_issues(config: &AppConfig) -> Vec<String> {
    let mut issues = Vec::new();

    if let Err(err) = ensure_port_available(&config.rpc_host, config.rpc_port, "HTTP") {
        issues.push(err);
    }

    for path in &config.shared_paths {
        if let Err(err) = ensure_shareable(path) {
            issues.push(err);
        }
    }

    issues
}

fn ensure_port_available(host: &str, port: u16, label: &str) -> Result<(), String> {
    let addr = format!("{host}:{port}");
    match TcpListener::bind(&addr) {
        Ok(listener) => drop(listener),
        Err(err) => {
            return Err(format!(
                "{label} port {addr} is not available for binding: {err}"
            ))
        }
    }
    Ok(())
}

fn ensure_shareable(path: &Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("Shared path {} does not exist", path.display()));
    }
    if !path.is_file() {
        return Err(format!(
            "Shared path {} is not a regular file",
            path.display()
        ));
    }
    Ok(())
}
