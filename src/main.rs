use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use guac_gateway::recording::{HttpObjectStorage, ObjectStorageConfig, RecordingPipeline};
use guac_gateway::registry::ConnectionRegistry;
use guac_gateway::server::{router, AppState, GatewayConfig};

#[derive(Parser, Debug)]
#[command(name = "guac-gateway", version, about = "Guacamole file-transfer and recording gateway")]
struct Args {
    /// Address to serve HTTP/WebSocket on
    #[arg(long, env = "GATEWAY_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Address of the display daemon
    #[arg(long, env = "GATEWAY_DAEMON", default_value = "127.0.0.1:4822")]
    daemon: SocketAddr,

    /// Directory the daemon writes session recordings into
    #[arg(long, env = "GATEWAY_RECORDING_ROOT", default_value = "/var/lib/guac-gateway/recordings")]
    recording_root: PathBuf,

    /// Seconds to wait after session close before capturing the recording
    #[arg(long, env = "GATEWAY_RECORDING_GRACE", default_value_t = 2)]
    recording_grace: u64,

    /// Object storage endpoint; recordings are not offloaded when unset
    #[arg(long, env = "GATEWAY_STORAGE_ENDPOINT")]
    storage_endpoint: Option<String>,

    /// Object storage bucket
    #[arg(long, env = "GATEWAY_STORAGE_BUCKET", default_value = "session-recordings")]
    storage_bucket: String,

    /// Bearer token for the object storage service
    #[arg(long, env = "GATEWAY_STORAGE_TOKEN")]
    storage_token: Option<String>,

    /// Key prefix for uploaded recordings
    #[arg(long, env = "GATEWAY_STORAGE_PREFIX", default_value = "")]
    storage_prefix: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "guac_gateway=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = GatewayConfig::default()
        .bind(args.bind)
        .daemon(args.daemon)
        .recording_root(args.recording_root.clone())
        .recording_grace(Duration::from_secs(args.recording_grace));
    config.recording_key_prefix = args.storage_prefix.clone();

    let recorder = args.storage_endpoint.as_ref().map(|endpoint| {
        let storage = ObjectStorageConfig {
            endpoint: endpoint.clone(),
            bucket: args.storage_bucket.clone(),
            auth_token: args.storage_token.clone(),
        };
        config.storage = Some(storage.clone());
        Arc::new(RecordingPipeline::new(
            args.recording_root.clone(),
            Duration::from_secs(args.recording_grace),
            args.storage_prefix.clone(),
            Arc::new(HttpObjectStorage::new(storage)),
        ))
    });

    if recorder.is_none() {
        tracing::warn!("No object storage configured; session recordings will not be offloaded");
    }

    let state = AppState {
        registry: Arc::new(ConnectionRegistry::new()),
        recorder,
        config: Arc::new(config),
    };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(addr = %args.bind, daemon = %args.daemon, "Gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
