use clap::Parser;
use log::{error, info};
use server::auth::Credentials;
use server::config::{lock_duration_from_minutes, ServerConfig};
use server::network::Server;
use std::path::PathBuf;
use std::time::Duration;

/// Main-method of the application.
/// Parses command-line arguments, loads the credential table and runs the server until Ctrl+C.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Command line arguments
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Server IP address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// Server port to listen on
        #[clap(short, long, default_value = "5000")]
        port: u16,
        /// Maximum number of concurrent connections
        #[clap(long, default_value = "256")]
        max_clients: usize,
        /// Minutes a captured territory stays locked
        #[clap(long, default_value = "30")]
        lock_minutes: u64,
        /// Seconds a team may stay disconnected before its request is dropped (0 = never)
        #[clap(long, default_value = "900")]
        orphan_timeout_secs: u64,
        /// Seconds between orphaned-request sweeps
        #[clap(long, default_value = "30")]
        reap_interval_secs: u64,
        /// JSON file mapping team id to password
        #[clap(short, long, default_value = "credentials.json")]
        credentials: PathBuf,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // Parse command line arguments
    let args = Args::parse();

    let credentials = Credentials::load(&args.credentials)?;
    if credentials.is_empty() {
        return Err(format!("no credentials in {}", args.credentials.display()).into());
    }

    let lock_duration = lock_duration_from_minutes(args.lock_minutes)
        .ok_or_else(|| format!("--lock-minutes {} is too large", args.lock_minutes))?;

    let config = ServerConfig {
        bind_addr: format!("{}:{}", args.host, args.port),
        max_clients: args.max_clients,
        lock_duration,
        orphan_timeout: match args.orphan_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        },
        reap_interval: Duration::from_secs(args.reap_interval_secs.max(1)),
    };

    let server = Server::bind(&config, credentials).await?;
    let handle = server.handle();
    let mut server_task = tokio::spawn(server.run());

    // Handle shutdown gracefully
    tokio::select! {
        result = &mut server_task => {
            match result {
                Ok(Err(e)) => error!("Server stopped: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
                Ok(Ok(())) => {}
            }
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
        }
    }

    if let Err(e) = server_task.await {
        error!("Server task panicked: {}", e);
    }

    Ok(())
}
