use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pcap_analyzer::api::routes;
use pcap_analyzer::capture::manager::AnalysisManager;
use pcap_analyzer::models::config::{AppConfig, DEFAULT_MAX_MESSAGE_SIZE};
use pcap_analyzer::utils::logging;

#[derive(Parser, Debug)]
#[clap(author, version, about = "Chunked packet capture analysis service")]
struct Args {
    /// Address for the REST API server
    #[clap(long, env = "ANALYZER_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port for the REST API server
    #[clap(short, long, env = "ANALYZER_PORT", default_value = "3000")]
    port: u16,

    /// Largest accepted event body in bytes
    #[clap(long, env = "MAX_MESSAGE_SIZE", default_value_t = DEFAULT_MAX_MESSAGE_SIZE)]
    max_message_size: usize,

    /// Expire sessions idle for this many seconds (never, when unset)
    #[clap(long, env = "SESSION_TTL")]
    session_ttl: Option<u64>,

    /// Log level (trace, debug, info, warn, error, off)
    #[clap(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Directory for the log file; logs go to stderr when unset
    #[clap(long, env = "LOG_DIR")]
    log_dir: Option<PathBuf>,

    /// Log file name inside the log directory
    #[clap(long, env = "LOG_FILE", default_value = "app.log")]
    log_file: String,
}

impl Args {
    fn into_config(self) -> AppConfig {
        let log_path = self.log_dir.map(|dir| dir.join(&self.log_file));
        AppConfig {
            host: self.host,
            port: self.port,
            max_message_size: self.max_message_size,
            session_ttl: self.session_ttl,
            log_path,
        }
    }
}

#[actix_web::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let log_level = logging::get_log_level(&args.log_level);
    let config = args.into_config();

    // Initialize logger with specified level
    logging::init_logger(log_level, config.log_path.as_deref())
        .context("Failed to open log file")?;

    info!("Starting pcap-analyzer v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {:?}", config);

    let manager = Arc::new(AnalysisManager::default());

    if let Some(ttl) = config.session_ttl {
        spawn_session_sweeper(manager.clone(), Duration::from_secs(ttl));
    } else {
        warn!("No session TTL configured; unfinished analyses are kept until restart");
    }

    // Create a shared state for our application
    let app_state = web::Data::new(manager);
    let max_message_size = config.max_message_size;

    info!("Starting API server on {}", config.bind_address());

    // Start the HTTP server; it stops gracefully on SIGINT/SIGTERM
    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .app_data(web::PayloadConfig::new(max_message_size))
            .configure(routes::configure)
    })
    .bind(config.bind_address())?
    .run()
    .await?;

    info!("Server stopped");
    Ok(())
}

/// Periodically drop sessions that never received a Finish
fn spawn_session_sweeper(manager: Arc<AnalysisManager>, ttl: Duration) {
    info!("Expiring sessions idle for more than {}s", ttl.as_secs());
    let period = (ttl / 2).max(Duration::from_secs(1));

    actix_rt::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let expired = manager.expire_idle_sessions(ttl);
            if expired > 0 {
                info!("Expired {} idle sessions", expired);
            }
        }
    });
}
