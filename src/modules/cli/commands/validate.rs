//! Validate command implementation

use clap::Args;
use polyquery_core::{Model, PolyqueryError, SecretStore};
use polyquery_parser::{parse_file, EnvSecretStore};
use tracing::{info, warn};

/// Validate command arguments
#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// Also resolve `{{ env.NAME }}` secrets of every connection
    #[arg(long)]
    pub secrets: bool,
}

impl ValidateCommand {
    /// Execute the validate command
    pub fn execute(&self, config_path: &str) -> Result<(), PolyqueryError> {
        let model = parse_file(config_path)?;
        info!("Configuration '{}' is valid", model.name);

        if self.secrets {
            let unresolved = check_secrets(&model, &EnvSecretStore::new());
            if !unresolved.is_empty() {
                return Err(PolyqueryError::Config(format!(
                    "unresolved secrets: {}",
                    unresolved.join("; ")
                )));
            }
        }

        println!("{}", summary(&model));
        Ok(())
    }
}

/// Connections whose secrets fail to resolve, as `name: reason`
fn check_secrets(model: &Model, secrets: &dyn SecretStore) -> Vec<String> {
    model
        .connections
        .iter()
        .filter_map(|descriptor| match secrets.resolve(descriptor) {
            Ok(_) => None,
            Err(e) => {
                warn!("Connection '{}': {}", descriptor.name, e);
                Some(format!("{}: {}", descriptor.name, e))
            }
        })
        .collect()
}

fn summary(model: &Model) -> String {
    let mut out = format!(
        "{} (port {}): {} connection(s), {} user(s)",
        model.name,
        model.port(),
        model.connections.len(),
        model.users.len()
    );
    for connection in &model.connections {
        out.push_str(&format!("\n  {} [{}]", connection.name, connection.engine));
    }
    out
}
