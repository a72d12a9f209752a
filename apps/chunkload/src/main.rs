//! chunkload: uploads files in resumable chunks.
//!
//! Interrupted uploads pick up where the server left off the next time the
//! same file content is uploaded.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chunkload_uploader::{
    ChunkloadConfig, HttpTransport, ResumeStore, UploadEvent, UploadRegistry, UploadStatus,
};

#[derive(Parser)]
#[command(author, version, about = "Resumable chunked HTTP uploader", long_about = None)]
struct Cli {
    /// Upload endpoint
    #[arg(long)]
    url: String,

    /// Query string appended to the endpoint for fresh uploads
    #[arg(long = "data", default_value = "")]
    additional_data: String,

    /// Config file (defaults to the per-user config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Resume store file, overriding the config
    #[arg(long = "resume-store")]
    resume_store: Option<PathBuf>,

    /// Files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chunkload=debug")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ChunkloadConfig::load_from(path),
        None => ChunkloadConfig::load(),
    }
    .context("loading configuration")?;
    if let Some(path) = cli.resume_store.clone() {
        config.resume_store_path = Some(path);
    }

    let store = Arc::new(ResumeStore::open(
        config.resume_store_path(),
        config.store_limits(),
    ));
    let transport = Arc::new(HttpTransport::new().context("building HTTP client")?);
    let (registry, mut events) = UploadRegistry::new(store, transport, config.policy.clone());

    let mut pending = HashSet::new();
    let mut names = HashMap::new();
    for path in &cli.files {
        match registry.enqueue(path).await {
            Ok(id) => {
                names.insert(id.clone(), path.display().to_string());
                pending.insert(id);
            }
            Err(e) => eprintln!("{}: {e}", path.display()),
        }
    }
    if pending.is_empty() {
        bail!("nothing to upload");
    }

    for id in &pending {
        registry
            .start_upload(id, &cli.url, &cli.additional_data)
            .await
            .with_context(|| format!("starting {}", names[id]))?;
    }

    let mut failed = 0usize;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, canceling uploads");
                for id in &pending {
                    let _ = registry.cancel_upload(id).await;
                }
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                let name = names
                    .get(event.session_id())
                    .map(String::as_str)
                    .unwrap_or("?");
                match &event {
                    UploadEvent::Progress { bytes_uploaded, total_bytes, .. } => {
                        let pct = if *total_bytes == 0 {
                            100.0
                        } else {
                            *bytes_uploaded as f64 * 100.0 / *total_bytes as f64
                        };
                        println!("{name}: {bytes_uploaded}/{total_bytes} bytes ({pct:.1}%)");
                    }
                    UploadEvent::Completed { session_id, response, .. } => {
                        println!("{name}: complete ({})", response.trim());
                        pending.remove(session_id);
                    }
                    UploadEvent::Failed { session_id, error_code, description } => {
                        failed += 1;
                        eprintln!("{name}: failed [{error_code}] {description}");
                        pending.remove(session_id);
                    }
                    UploadEvent::StatusChanged { session_id, status } => {
                        tracing::debug!(file = %name, status = %status, "status changed");
                        if *status == UploadStatus::Canceled {
                            println!("{name}: canceled");
                            pending.remove(session_id);
                        }
                    }
                    UploadEvent::Enqueued { .. } => {}
                }
                if pending.is_empty() {
                    break;
                }
            }
        }
    }

    registry.wait_idle().await;
    if failed > 0 {
        bail!("{failed} upload(s) failed");
    }
    Ok(())
}
