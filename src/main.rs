//! Сервер Sensorlink
//!
//! Поднимает внутрипроцессную шину, один узел маршрутизации и TCP-транспорт,
//! работает до Ctrl-C.

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use sensorlink::{
    init_logging, Broker, ConnectionManager, InMemoryBus, LogFormat, RelayNode, RelayServer,
    Settings,
};
use tracing::{info, warn};

/// Аргументы командной строки.
///
/// Переопределяют значения из файла настроек и окружения.
#[derive(Parser, Debug)]
#[command(name = "sensorlink")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sensorlink - real-time relay for users and IoT devices", long_about = None)]
struct Cli {
    /// Путь к файлу настроек (toml, yaml, json)
    #[arg(short, long, env = "SENSORLINK_CONFIG")]
    config: Option<PathBuf>,
    /// Адрес для приёма соединений
    #[arg(short, long, help = "Адрес для приёма соединений, например 0.0.0.0:7070")]
    listen: Option<String>,
    /// Уровень логирования
    #[arg(long, help = "Уровень логирования: trace, debug, info, warn, error")]
    log_level: Option<String>,
    /// Формат логов
    #[arg(long, value_enum)]
    log_format: Option<CliLogFormat>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliLogFormat {
    Pretty,
    Compact,
    Json,
}

impl From<CliLogFormat> for LogFormat {
    fn from(f: CliLogFormat) -> Self {
        match f {
            CliLogFormat::Pretty => LogFormat::Pretty,
            CliLogFormat::Compact => LogFormat::Compact,
            CliLogFormat::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings =
        Settings::load_from(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(listen) = cli.listen {
        settings.listen_address = listen;
    }
    if let Some(level) = cli.log_level {
        settings.logging.level = level;
    }
    if let Some(format) = cli.log_format {
        settings.logging.format = format.into();
    }
    settings.validate().context("invalid settings")?;

    let logging = init_logging(&settings.logging).context("failed to initialize logging")?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_commit = env!("GIT_COMMIT"),
        build_time = env!("BUILD_TIME"),
        "Starting sensorlink"
    );

    let bus = InMemoryBus::new(settings.bus_capacity);
    let broker: Arc<dyn Broker> = Arc::new(bus.client());
    let node = Arc::new(RelayNode::new(broker, settings.node_config()));
    let manager = Arc::new(ConnectionManager::new(
        settings.connection_config(),
        node.clone(),
    ));

    let server = RelayServer::bind(&settings.listen_address, manager).await?;
    let result = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for Ctrl-C");
            }
        })
        .await;

    node.shutdown();
    let stats = bus.stats();
    info!(
        published = stats.publish_count,
        undelivered = stats.undelivered_count,
        "Sensorlink stopped"
    );
    logging.shutdown();
    result
}
