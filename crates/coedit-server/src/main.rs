use clap::Parser;
use coedit_server::ServerConfig;
use tracing_subscriber::EnvFilter;

/// Real-time collaboration coordinator.
#[derive(Parser, Debug)]
#[command(name = "coedit-server", version, about)]
struct Cli {
    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,
    /// Host/interface to bind.
    #[arg(long)]
    host: Option<String>,
    /// Require token authentication.
    #[arg(long)]
    auth: bool,
    /// Exact allowed CORS origin (permissive when omitted).
    #[arg(long)]
    cors_origin: Option<String>,
    /// Log level: trace, debug, info, warn, error.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Flags override environment, environment overrides defaults.
    let mut config = ServerConfig::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(host) = cli.host {
        config.host = host;
    }
    if cli.auth {
        config.auth_required = true;
    }
    if let Some(origin) = cli.cors_origin {
        config.cors_origin = Some(origin);
    }

    coedit_server::run(config).await
}
