//! Core application

use std::sync::Arc;

use anyhow::Result;

use crate::api::ApiServer;
use crate::broker::TopicRegistry;
use crate::core::cli::{self, Cli};
use crate::core::config::AppConfig;
use crate::core::constants::APP_NAME_LOWER;
use crate::core::shutdown::ShutdownService;

pub struct CoreApp {
    pub config: AppConfig,
    pub registry: Arc<TopicRegistry>,
    pub shutdown: ShutdownService,
}

impl CoreApp {
    /// Run the application with CLI argument parsing
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();

        let cli = cli::parse();
        Self::init_logging(cli.log.as_deref());
        tracing::debug!("Application starting");

        let app = Self::init(&cli)?;
        Self::start_server(app).await
    }

    fn init(cli: &Cli) -> Result<Self> {
        let config = AppConfig::load(cli)?;
        let registry = Arc::new(TopicRegistry::new(config.topic.clone()));
        let shutdown = ShutdownService::new(Arc::clone(&registry));

        Ok(Self {
            config,
            registry,
            shutdown,
        })
    }

    fn init_logging(cli_filter: Option<&str>) {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = cli_filter
            .map(str::to_string)
            .or_else(|| std::env::var("RUST_LOG").ok())
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_thread_ids(false)
            .with_level(true)
            .with_ansi(true)
            .compact()
            .with_env_filter(filter)
            .init();
    }

    async fn start_server(app: Self) -> Result<()> {
        // Install signal handlers FIRST (before any blocking calls)
        app.shutdown.install_signal_handlers();

        let server = ApiServer::new(app);
        let app = server.start().await?;
        app.shutdown.shutdown().await;

        Ok(())
    }
}
