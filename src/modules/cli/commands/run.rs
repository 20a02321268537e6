//! Run command implementation

use clap::Args;
use polyquery_core::PolyqueryError;
use polyquery_parser::parse_file;
use polyquery_runtime::Runtime;
use tracing::info;

/// Run command arguments
#[derive(Args, Debug)]
pub struct RunCommand {
    /// Override server port
    #[arg(short, long)]
    pub port: Option<u16>,
}

impl RunCommand {
    /// Execute the run command
    pub async fn execute(&self, config_path: &str) -> Result<(), PolyqueryError> {
        info!("Loading configuration from: {}", config_path);

        let model = parse_file(config_path)?;
        let runtime = Runtime::with_port_override(model, self.port);
        runtime.run().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_missing_config() {
        let cmd = RunCommand { port: Some(0) };
        let err = cmd.execute("/nonexistent/polyquery.yaml").await.unwrap_err();
        assert!(!matches!(err, PolyqueryError::Server(_)));
    }
}
