use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

use athena_probe::config::{self, listen_addr, BackendConfig, Config};
use athena_probe::health::ProbeContext;
use athena_probe::http::{self, Role};
use athena_probe::pool::{StatelessPool, StatelessPoolConfig};

#[derive(Parser, Debug)]
#[command(name = "athena-probe")]
#[command(about = "HTTP health checks for MySQL master/slave replication", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Database URL, e.g. root:@tcp(127.0.0.1:3306)/information_schema
    ///
    /// The account must use mysql_native_password; caching_sha2_password
    /// (the MySQL 8 default) is not supported.
    #[arg(long, env = "ATHENA_PROBE_URL")]
    url: Option<String>,

    /// Maximum tolerated slave lag in seconds
    #[arg(long)]
    lag: Option<i64>,

    /// Master check listen address
    #[arg(long)]
    master: Option<String>,

    /// Slave check listen address
    #[arg(long)]
    slave: Option<String>,
}

impl Cli {
    /// Flags win over file values
    fn apply(self, mut config: Config) -> Config {
        if let Some(url) = self.url {
            config.backend.url = url;
        }
        if let Some(lag) = self.lag {
            config.health.slave_lag_secs = lag;
        }
        if let Some(master) = self.master {
            config.server.master_listen = master;
        }
        if let Some(slave) = self.slave {
            config.server.slave_listen = slave;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    let config = load_or_default_config(cli.config.as_deref())?;
    let config = cli.apply(config);

    let backend = BackendConfig::from_url(&config.backend.url).context("invalid database URL")?;
    info!(
        addr = %backend.addr(),
        user = %backend.user,
        slave_lag_secs = config.health.slave_lag_secs,
        "Probing MySQL instance"
    );

    let pool = Arc::new(StatelessPool::new(
        Arc::new(backend),
        StatelessPoolConfig::default(),
    ));

    // Connections are opened per request anyway; this only reports
    // reachability early.
    if let Err(e) = pool.ping().await {
        warn!(addr = %pool.backend_addr(), error = %e, "Backend not reachable yet");
    }

    let ctx = Arc::new(ProbeContext::new(
        pool.clone(),
        config.health.slave_lag_secs,
    ));

    let master_addr = listen_addr(&config.server.master_listen);
    let slave_addr = listen_addr(&config.server.slave_listen);
    let master_listener = http::bind(Role::Master, &master_addr)
        .await
        .with_context(|| format!("failed to bind master listener on {master_addr}"))?;
    let slave_listener = http::bind(Role::Slave, &slave_addr)
        .await
        .with_context(|| format!("failed to bind slave listener on {slave_addr}"))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(http::shutdown_signal(shutdown.clone()));

    tokio::try_join!(
        http::serve(master_listener, Role::Master, ctx.clone(), shutdown.clone()),
        http::serve(slave_listener, Role::Slave, ctx, shutdown.clone()),
    )?;

    pool.close_all().await;
    info!("athena-probe stopped");
    Ok(())
}

fn load_or_default_config(explicit: Option<&Path>) -> anyhow::Result<Config> {
    if let Some(path) = explicit {
        let config = config::load_config(path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        info!(path = %path.display(), "Loaded configuration");
        return Ok(config);
    }

    let config_paths = ["config/athena-probe.toml", "athena-probe.toml"];

    for path in config_paths {
        if !Path::new(path).exists() {
            debug!(path = path, "Config file not present");
            continue;
        }
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return Ok(config);
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Ok(Config::default())
}
