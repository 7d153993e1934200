//! Application state and initialization

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use copilot_api::state::AppState as ApiState;
use copilot_core::AppConfig;

use crate::cli::Args;
use crate::server::Server;

/// Main application: owns the composed [`ApiState`] and the CLI args that
/// shaped it.
pub struct App {
    args: Args,
    state: Arc<ApiState>,
}

impl App {
    /// Builds the application: loads config (file if present, else env/defaults)
    /// and bootstraps every collaborator behind `ApiState` (§1, §9).
    pub async fn build(args: Args) -> Result<Self> {
        args.validate().context("Invalid command line arguments")?;

        let config = if args.config.exists() {
            AppConfig::load_from_file(
                args.config
                    .to_str()
                    .context("config path must be valid UTF-8")?,
            )
            .context("Failed to load configuration file")?
        } else {
            info!(path = %args.config.display(), "config file not found, using environment/defaults");
            AppConfig::load().context("Failed to load configuration from environment")?
        };

        info!("Initializing application components");
        let state = ApiState::bootstrap(config);
        state.spawn_evaluation_worker();

        Ok(Self { args, state })
    }

    /// Runs the application until the server stops.
    pub async fn run(self) -> Result<()> {
        info!("Starting server");
        info!("HTTP port: {}", self.args.port);

        let server = Server::new(self.args, self.state);
        server.run().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_app_build() {
        let args = Args {
            config: "does-not-exist.toml".into(),
            port: 8080,
            log_level: "info".to_string(),
            env: "dev".to_string(),
            json_logs: false,
        };
        let result = App::build(args).await;
        assert!(result.is_ok());
    }
}
