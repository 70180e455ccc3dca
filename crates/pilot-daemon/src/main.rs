mod backend;
mod controller;
mod error;
mod http;
mod library;
mod remote;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use pilot_proto::config::{BackendKind, Config};
use tokio::sync::RwLock;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::controller::{Controller, PowerControl};
use crate::library::Library;
use crate::remote::RemoteLink;

#[derive(Parser, Debug)]
#[command(name = "pilot-daemon", about = "Remote-controlled video playback for a TV")]
struct Args {
    /// Config file (default: ~/.config/pilot/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Media root, overrides `library.root`
    #[arg(long)]
    root: Option<PathBuf>,

    /// HTTP listen address as host:port
    #[arg(long)]
    addr: Option<String>,

    /// Use the simulated player and disable the CEC remote
    #[arg(long)]
    mock: bool,

    /// Log to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,
}

fn init_logging(log_stderr: bool) -> anyhow::Result<Option<PathBuf>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,pilot_daemon=debug"));

    if log_stderr {
        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return Ok(None);
    }

    let data_dir = pilot_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(log_file)
                .with_ansi(false),
        )
        .with(filter)
        .init();
    Ok(Some(log_path))
}

fn apply_overrides(config: &mut Config, args: &Args) -> anyhow::Result<()> {
    if let Some(root) = &args.root {
        config.library.root = root.clone();
    }
    if let Some(addr) = &args.addr {
        let (host, port) = addr
            .rsplit_once(':')
            .with_context(|| format!("--addr {:?} is not host:port", addr))?;
        config.http.bind_address = host.to_string();
        config.http.port = port
            .parse()
            .with_context(|| format!("--addr {:?}: bad port", addr))?;
    }
    if args.mock {
        config.backend.kind = BackendKind::Simulated;
        config.remote.enabled = false;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if let Some(log_path) = init_logging(args.log_stderr)? {
        info!("Log file: {:?}", log_path);
    }

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    info!("Config loaded from: {:?}", config_path);
    apply_overrides(&mut config, &args)?;

    let library_config = config.library.clone();
    let library = tokio::task::spawn_blocking(move || Library::scan(library_config)).await?;
    let library = Arc::new(RwLock::new(library));
    let backend = backend::build(&config)?;
    let controller = Arc::new(Controller::new(backend, Arc::clone(&library)));

    let remote = if config.remote.enabled {
        let subs = Arc::new(remote::default_bindings(
            Arc::clone(&controller),
            config.remote.seek_step_secs,
        ));
        let link = RemoteLink::start(&config.remote, subs, Arc::clone(&controller)).await;
        if let Some(link) = &link {
            controller.attach_power(Arc::clone(link) as Arc<dyn PowerControl>);
        }
        link
    } else {
        info!("Remote control disabled");
        None
    };

    let server = http::start_server(
        config.http.bind_address.clone(),
        config.http.port,
        http::AppState {
            controller: Arc::clone(&controller),
            library,
        },
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            info!("Shutting down");
        }
        _ = server => {
            warn!("HTTP server stopped, shutting down");
        }
    }

    controller.shutdown().await;
    if let Some(link) = remote {
        link.shutdown().await;
    }
    info!("Bye");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["pilot-daemon"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_cli_overrides_config() {
        let mut config = Config::default();
        apply_overrides(
            &mut config,
            &args(&["--root", "/media/usb", "--addr", "127.0.0.1:9000", "--mock"]),
        )
        .unwrap();
        assert_eq!(config.library.root, PathBuf::from("/media/usb"));
        assert_eq!(config.http.bind_address, "127.0.0.1");
        assert_eq!(config.http.port, 9000);
        assert_eq!(config.backend.kind, BackendKind::Simulated);
        assert!(!config.remote.enabled);
    }

    #[test]
    fn test_bad_addr_rejected() {
        let mut config = Config::default();
        assert!(apply_overrides(&mut config, &args(&["--addr", "localhost"])).is_err());
        assert!(apply_overrides(&mut config, &args(&["--addr", "localhost:http"])).is_err());
    }
}
