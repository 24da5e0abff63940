//! beacon: location-sharing TLS session server.

use beacon::config::ServerConfig;
use beacon::directory::MemoryDirectory;
use beacon::server;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// beacon — TLS session server
#[derive(Parser, Debug)]
#[command(name = "beacon", version, about = "Location-sharing TLS session server")]
struct Cli {
    /// Config file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    address: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// TLS certificate chain (PEM)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// TLS private key (PEM)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Client CA bundle (PEM); enables optional client certificates
    #[arg(long)]
    client_ca: Option<PathBuf>,

    /// Worker threads
    #[arg(short, long)]
    workers: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(address) = &self.address {
            config.listener.address = address.clone();
        }
        if let Some(port) = self.port {
            config.listener.port = port;
        }
        if let Some(cert) = &self.cert {
            config.tls.cert = Some(cert.clone());
        }
        if let Some(key) = &self.key {
            config.tls.key = Some(key.clone());
        }
        if let Some(client_ca) = &self.client_ca {
            config.tls.client_ca = Some(client_ca.clone());
        }
        if let Some(workers) = self.workers {
            config.pool.workers = Some(workers);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting beacon");

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    cli.apply(&mut config);

    if let Err(e) = config.validate() {
        error!(error = %e, "refusing to start");
        return Err(e.into());
    }

    let cert = config.tls.cert.as_deref().ok_or("tls.cert is required")?;
    let key = config.tls.key.as_deref().ok_or("tls.key is required")?;
    let tls = beacon::tls::load_server_config(cert, key, config.tls.client_ca.as_deref())?;

    // Worker threads inherit the mask, so only `wait_for_signal` sees them.
    block_signals()?;

    let server = server::start(&config, tls, Arc::new(MemoryDirectory::new()))?;
    info!(address = %server.local_addr(), "ready");

    let signal = wait_for_signal()?;
    info!(signal, connections = server.connections(), "shutting down");
    server.shutdown();

    Ok(())
}

fn termination_set() -> libc::sigset_t {
    unsafe {
        let mut set: libc::sigset_t = std::mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGINT);
        libc::sigaddset(&mut set, libc::SIGTERM);
        set
    }
}

fn block_signals() -> io::Result<()> {
    let set = termination_set();
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }

    Ok(())
}

fn wait_for_signal() -> io::Result<i32> {
    let set = termination_set();
    let mut signal = 0;

    let rc = unsafe { libc::sigwait(&set, &mut signal) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }

    Ok(signal)
}
