use clap::Parser;
use imageshop_server::{DamStore, ServerConfig};
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "imageshop-server", about = "Reference server for the Imageshop DAM JSON API")]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 8322)]
    port: u16,

    /// Directory to store the catalog and uploaded files.
    #[arg(long, default_value = "./imageshop-dam-data")]
    data_dir: PathBuf,

    /// Public root of this server, used in the links it hands out.
    #[arg(long)]
    public_url: Option<String>,

    /// Require this value in the `token` header of API calls.
    #[arg(long)]
    token: Option<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = fs::create_dir_all(&cli.data_dir) {
        error!("cannot create data directory {}: {e}", cli.data_dir.display());
        return ExitCode::FAILURE;
    }

    let addr = format!("0.0.0.0:{}", cli.port);
    let config = ServerConfig {
        base_url: cli
            .public_url
            .map_or_else(|| format!("http://127.0.0.1:{}", cli.port), |u| u.trim_end_matches('/').to_owned()),
        auth_token: cli.token,
    };
    info!("starting imageshop-server on {addr}");
    info!("data directory: {}", cli.data_dir.display());

    let store = Arc::new(DamStore::new(cli.data_dir));
    match imageshop_server::run_server(&store, &config, &addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("server failed: {e}");
            ExitCode::FAILURE
        }
    }
}
