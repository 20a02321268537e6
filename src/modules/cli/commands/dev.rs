//! Dev command implementation with hot reload

use clap::Args;
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use polyquery_core::PolyqueryError;
use polyquery_parser::parse_file;
use polyquery_runtime::Runtime;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Dev command arguments
#[derive(Args, Debug)]
pub struct DevCommand {
    /// Override server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Debounce delay in milliseconds for file changes
    #[arg(long, default_value = "500")]
    pub debounce: u64,
}

impl DevCommand {
    /// Serve the configuration and restart the server whenever the file changes
    pub async fn execute(&self, config_path: &str) -> Result<(), PolyqueryError> {
        info!("Starting development mode with hot reload");
        info!("Watching: {}", config_path);

        let model = parse_file(config_path)?;
        let mut runtime = Runtime::with_port_override(model, self.port);

        let changed = Arc::new(Notify::new());
        let _watcher = watch(config_path, changed.clone())?;

        loop {
            let stop = Arc::new(AtomicBool::new(false));
            let wake = {
                let changed = changed.clone();
                let stop = stop.clone();
                async move {
                    tokio::select! {
                        _ = changed.notified() => {}
                        _ = Runtime::shutdown_signal() => stop.store(true, Ordering::SeqCst),
                    }
                }
            };

            runtime.run_until(wake).await?;
            if stop.load(Ordering::SeqCst) {
                return Ok(());
            }

            // Editors often write a file in several steps
            tokio::time::sleep(Duration::from_millis(self.debounce)).await;
            info!("Configuration file changed, reloading...");

            match parse_file(config_path) {
                Ok(model) => runtime.reload(model).await,
                Err(e) => {
                    warn!("Failed to parse configuration: {}", e);
                    warn!("Server continues with previous configuration");
                }
            }
        }
    }
}

/// Start a watcher that signals `changed` on every write to `path`.
/// The watcher stops when the returned handle is dropped.
fn watch(path: &str, changed: Arc<Notify>) -> Result<RecommendedWatcher, PolyqueryError> {
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| match result {
            Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                debug!("File event: {:?}", event.kind);
                changed.notify_one();
            }
            Ok(_) => {}
            Err(e) => warn!("File watcher error: {}", e),
        },
        Config::default().with_poll_interval(Duration::from_millis(500)),
    )
    .map_err(|e| PolyqueryError::Internal(format!("Failed to create file watcher: {}", e)))?;

    watcher
        .watch(Path::new(path), RecursiveMode::NonRecursive)
        .map_err(|e| PolyqueryError::Config(format!("Failed to watch {}: {}", path, e)))?;

    Ok(watcher)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_watch_signals_on_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("polyquery.yaml");
        std::fs::write(&path, "name: first\n").unwrap();

        let changed = Arc::new(Notify::new());
        let _watcher = watch(path.to_str().unwrap(), changed.clone()).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        std::fs::write(&path, "name: second\n").unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(5), changed.notified()).await;
        assert!(fired.is_ok());
    }

    #[test]
    fn test_watch_missing_file() {
        let changed = Arc::new(Notify::new());
        let err = watch("/nonexistent/polyquery.yaml", changed).unwrap_err();
        assert!(matches!(err, PolyqueryError::Config(_)));
    }
}
