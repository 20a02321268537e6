//! CLI commands

mod completion;
mod dev;
mod init;
mod remote;
mod run;
mod validate;

pub use completion::CompletionCommand;
pub use dev::DevCommand;
pub use init::InitCommand;
pub use remote::{HealthCommand, QueryCommand, RemoteArgs, SchemaCommand};
pub use run::RunCommand;
pub use validate::ValidateCommand;

use clap::{Parser, Subcommand};

/// Polyquery - one query and catalog contract over heterogeneous data sources
#[derive(Parser, Debug)]
#[command(name = "polyquery")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path
    ///
    /// This is a *global* option so it can be specified after subcommands,
    /// e.g. `polyquery run -f polyquery.yaml`.
    #[arg(
        short = 'f',
        long = "file",
        global = true,
        default_value = "polyquery.yaml"
    )]
    pub config: String,

    /// Alias for `-f/--file`
    #[arg(short = 'c', long = "config", global = true, hide = true)]
    pub config_compat: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the Polyquery server
    Run(RunCommand),

    /// Start in development mode with hot reload
    Dev(DevCommand),

    /// Write a starter configuration file
    Init(InitCommand),

    /// Parse and validate the configuration without starting
    Validate(ValidateCommand),

    /// Check a running server
    Health(HealthCommand),

    /// Run a statement against a connection on a running server
    Query(QueryCommand),

    /// Print the catalog of a connection on a running server
    Schema(SchemaCommand),

    /// Generate shell completions
    #[command(hide = true)]
    Completion(CompletionCommand),
}

impl Cli {
    /// Effective configuration path, accounting for the alias
    pub fn config_path(&self) -> &str {
        self.config_compat.as_deref().unwrap_or(&self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::try_parse_from(["polyquery", "run"]);
        assert!(cli.is_ok());
        assert_eq!(cli.unwrap().config_path(), "polyquery.yaml");
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::try_parse_from(["polyquery", "run", "-f", "agents.yaml"]).unwrap();
        assert_eq!(cli.config_path(), "agents.yaml");
    }

    #[test]
    fn test_cli_with_config_alias() {
        let cli = Cli::try_parse_from(["polyquery", "run", "-c", "agents.yaml"]).unwrap();
        assert_eq!(cli.config_path(), "agents.yaml");
    }

    #[test]
    fn test_cli_query_command() {
        let cli = Cli::try_parse_from([
            "polyquery",
            "query",
            "pg_prod",
            "SELECT 1",
            "--api-key",
            "k",
            "--no-cache",
        ])
        .unwrap();
        match cli.command {
            Commands::Query(cmd) => {
                assert_eq!(cmd.connection, "pg_prod");
                assert_eq!(cmd.statement, "SELECT 1");
                assert!(cmd.no_cache);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_cli_completion_is_hidden() {
        use clap::CommandFactory;
        let cmd = Cli::command();
        let completion = cmd
            .get_subcommands()
            .find(|c| c.get_name() == "completion")
            .unwrap();
        assert!(completion.is_hide_set());
    }
}
