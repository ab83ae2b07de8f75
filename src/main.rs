use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use mcu_core::{init_logging, AppConfig};
use tokio::signal;
use tracing::{error, info, warn};

mod app;
mod shutdown;

use app::{AppMode, Application};
use shutdown::ShutdownManager;

/// 录制节点排空之外再留出的退出余量
const EXIT_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("mcu-recorder")
        .version(env!("CARGO_PKG_VERSION"))
        .about("集群化录制任务调度与执行引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/mcu.toml、mcu.toml、/etc/mcu/config.toml"),
        )
        .arg(
            Arg::new("mode")
                .short('m')
                .long("mode")
                .value_name("MODE")
                .help("运行模式")
                .value_parser(["mcu", "api", "all"])
                .default_value("mcu"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，缺省时使用配置文件中的设置")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mode: AppMode = matches
        .get_one::<String>("mode")
        .map_or("mcu", String::as_str)
        .parse()?;

    let config = AppConfig::load(config_path)
        .with_context(|| format!("加载配置失败: {}", config_path.unwrap_or("<default>")))?;

    let log_level = matches
        .get_one::<String>("log-level")
        .unwrap_or(&config.observability.log_level);
    let log_format = matches
        .get_one::<String>("log-format")
        .unwrap_or(&config.observability.log_format);
    init_logging(log_level, log_format).context("初始化日志失败")?;

    info!(mode = ?mode, config = config_path.unwrap_or("<default>"), "Starting mcu-recorder");

    if let Some(bind) = &config.observability.metrics_bind {
        install_metrics_exporter(bind)?;
    }

    let exit_deadline = config.worker.drain_timeout() + EXIT_GRACE;
    let application = Application::new(config, mode);
    let shutdown_manager = ShutdownManager::new();

    let mut app_handle = {
        let shutdown = shutdown_manager.sender();
        tokio::spawn(async move {
            if let Err(e) = application.run(shutdown).await {
                error!(error = ?e, "application failed");
            }
        })
    };

    let finished = tokio::select! {
        _ = wait_for_shutdown_signal() => {
            info!("Shutdown signal received, starting graceful shutdown");
            None
        }
        result = &mut app_handle => Some(result),
    };
    shutdown_manager.shutdown();

    match finished {
        Some(result) => {
            warn!("application stopped before shutdown was requested");
            if let Err(e) = result {
                error!(error = %e, "application task ended abnormally");
            }
        }
        None => match tokio::time::timeout(exit_deadline, app_handle).await {
            Ok(Ok(())) => info!("Application stopped gracefully"),
            Ok(Err(e)) => error!(error = %e, "application task ended abnormally"),
            Err(_) => warn!(timeout = ?exit_deadline, "application did not stop in time, exiting"),
        },
    }

    info!("mcu-recorder exited");
    Ok(())
}

fn install_metrics_exporter(bind: &str) -> Result<()> {
    let addr: SocketAddr = bind
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus指标导出失败")?;
    info!(address = %addr, "Prometheus exporter listening");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
