//! Init command implementation

use clap::Args;
use polyquery_core::PolyqueryError;
use polyquery_parser::env::EnvSubstitutor;
use polyquery_types::EngineType;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// Init command arguments
#[derive(Args, Debug)]
pub struct InitCommand {
    /// Deployment name
    #[arg(default_value = "polyquery")]
    pub name: String,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    pub output: String,

    /// Engine of the example connection
    #[arg(short = 'e', long, default_value = "postgres")]
    pub engine: EngineType,

    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

impl InitCommand {
    /// Execute the init command
    pub fn execute(&self) -> Result<(), PolyqueryError> {
        info!("Initializing Polyquery deployment: {}", self.name);

        let output_dir = Path::new(&self.output);
        if !output_dir.exists() {
            fs::create_dir_all(output_dir)?;
        }

        let config_path = self.write_files(output_dir)?;

        println!("\nPolyquery deployment initialized!");
        println!("\nNext steps:");
        println!("  1. Copy .env.example to .env and fill in the secrets");
        println!("  2. Edit {} to add connections and users", config_path.display());
        println!("  3. Run: polyquery run -f {}", config_path.display());

        Ok(())
    }

    fn write_files(&self, output_dir: &Path) -> Result<PathBuf, PolyqueryError> {
        let config_path = output_dir.join("polyquery.yaml");
        if config_path.exists() && !self.force {
            return Err(PolyqueryError::Config(format!(
                "{} already exists (use --force to overwrite)",
                config_path.display()
            )));
        }
        fs::write(&config_path, self.generate_config())?;
        info!("Created: {}", config_path.display());

        let env_path = output_dir.join(".env.example");
        fs::write(&env_path, self.generate_env_example())?;
        info!("Created: {}", env_path.display());

        Ok(config_path)
    }

    /// Connection name and YAML body of the example connection
    fn example_connection(&self) -> (&'static str, String) {
        match self.engine {
            EngineType::Clickhouse => (
                "warehouse",
                "    type: clickhouse\n    host: localhost\n    port: 8123\n    user: default\n    password: \"{{ env.CLICKHOUSE_PASSWORD }}\"\n    database: default\n    secure: false\n".to_string(),
            ),
            EngineType::Postgres | EngineType::Mysql => {
                let port = if self.engine == EngineType::Postgres { 5432 } else { 3306 };
                (
                    "main",
                    format!(
                        "    type: {}\n    host: localhost\n    port: {}\n    user: app\n    password: \"{{{{ env.DB_PASSWORD }}}}\"\n    database: app\n",
                        self.engine, port
                    ),
                )
            }
            EngineType::Oracle => (
                "erp",
                "    type: oracle\n    host: localhost\n    port: 1521\n    user: app\n    password: \"{{ env.ORACLE_PASSWORD }}\"\n    service_name: ORCLPDB1\n".to_string(),
            ),
            EngineType::Mssql => (
                "crm",
                "    type: mssql\n    server: localhost\n    port: 1433\n    user: sa\n    password: \"{{ env.MSSQL_PASSWORD }}\"\n    database: master\n    trust_server_certificate: false\n".to_string(),
            ),
            EngineType::Tableau => (
                "dashboards",
                "    type: tableau\n    server_url: https://tableau.example.com\n    site_id: \"\"\n    token_name: polyquery\n    token_value: \"{{ env.TABLEAU_TOKEN_VALUE }}\"\n".to_string(),
            ),
            EngineType::Filesystem => (
                "docs",
                "    type: filesystem\n    root_path: ./data\n".to_string(),
            ),
            EngineType::GoogleDrive => (
                "drive",
                "    type: google_drive\n    client_id: \"{{ env.DRIVE_CLIENT_ID }}\"\n    client_secret: \"{{ env.DRIVE_CLIENT_SECRET }}\"\n    refresh_token: \"{{ env.DRIVE_REFRESH_TOKEN }}\"\n".to_string(),
            ),
        }
    }

    /// Generate configuration file content
    fn generate_config(&self) -> String {
        let (connection, body) = self.example_connection();
        format!(
            r#"# Polyquery configuration
name: {}

server:
  port: 8080
  request_timeout_secs: 30
  connect_timeout_secs: 10

connections:
  {}:
{}
users:
  admin:
    api_key: "{{{{ env.POLYQUERY_ADMIN_KEY }}}}"
    role: admin
"#,
            self.name, connection, body
        )
    }

    /// Environment variables the generated file refers to
    fn generate_env_example(&self) -> String {
        let mut lines = vec![
            "# Key for the admin user".to_string(),
            "POLYQUERY_ADMIN_KEY=change-me".to_string(),
        ];
        let (_, body) = self.example_connection();
        for var in EnvSubstitutor::extract_var_names(&body) {
            lines.push(format!("{}=", var));
        }
        lines.push(String::new());
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyquery_core::ConnectionConfig;
    use polyquery_parser::YamlParser;

    fn cmd(engine: EngineType, output: &str) -> InitCommand {
        InitCommand {
            name: "agents".to_string(),
            output: output.to_string(),
            engine,
            force: false,
        }
    }

    #[test]
    fn test_generated_configs_are_valid() {
        for engine in [
            EngineType::Clickhouse,
            EngineType::Postgres,
            EngineType::Mysql,
            EngineType::Oracle,
            EngineType::Mssql,
            EngineType::Tableau,
            EngineType::Filesystem,
            EngineType::GoogleDrive,
        ] {
            let yaml = cmd(engine, ".").generate_config();
            let model = YamlParser::parse_raw(&yaml).unwrap();
            assert_eq!(model.name, "agents");
            assert_eq!(model.connections.len(), 1);
            assert_eq!(model.connections[0].engine, engine);
            assert!(ConnectionConfig::from_descriptor(&model.connections[0]).is_ok(), "{engine}");
            assert_eq!(model.users.len(), 1);
        }
    }

    #[test]
    fn test_env_example_lists_placeholders() {
        let env = cmd(EngineType::GoogleDrive, ".").generate_env_example();
        assert!(env.contains("POLYQUERY_ADMIN_KEY=change-me"));
        assert!(env.contains("DRIVE_CLIENT_ID="));
        assert!(env.contains("DRIVE_REFRESH_TOKEN="));
    }

    #[test]
    fn test_write_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().to_str().unwrap();

        let path = cmd(EngineType::Filesystem, out).write_files(dir.path()).unwrap();
        assert!(path.exists());
        assert!(dir.path().join(".env.example").exists());

        let err = cmd(EngineType::Filesystem, out).write_files(dir.path()).unwrap_err();
        assert!(matches!(err, PolyqueryError::Config(_)));

        let mut forced = cmd(EngineType::Filesystem, out);
        forced.force = true;
        assert!(forced.write_files(dir.path()).is_ok());
    }
}
