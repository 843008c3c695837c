use anyhow::Context;
use clap::Parser;
use log::{error, info};

use trafcap_rs::cli::{Args, Config};
use trafcap_rs::{CaptureError, Listener};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 加载配置
    let config = Config::resolve(&args).context("failed to load configuration")?;

    // 初始化日志
    env_logger::Builder::new()
        .filter_level(config.log_level.parse().unwrap_or(log::LevelFilter::Info))
        .init();
    let capture = &config.capture;

    // 创建监听器并发现接口
    let mut listener = Listener::new(
        &capture.host,
        capture.ports.clone(),
        &capture.transport,
        capture.engine_type(),
        capture.track_response,
    )
    .context("interface discovery failed")?;
    listener.set_pcap_options(capture.pcap_options());
    listener.set_debug(capture.debug);

    // 打开抓包句柄
    listener.activate().context("failed to activate capture engine")?;
    info!(
        "capturing with {} on {:?}",
        listener.engine(),
        listener.handle_keys()
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match listener.listen(shutdown, |packet| info!("{}", packet)).await {
        Ok(()) => info!("all capture handles closed"),
        Err(CaptureError::Cancelled) => info!("capture cancelled"),
        Err(e) => return Err(e.into()),
    }

    Ok(())
}
