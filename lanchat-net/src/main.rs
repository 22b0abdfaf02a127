// Lanchat daemon: joins the LAN chat, logs what happens, accepts files if configured.

use std::sync::Arc;

use lanchat_net::{config, LogErrorSink, LogFrontend, Session};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("lanchat {}", VERSION);
            return Ok(());
        }
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cfg = config::load();

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        let frontend = Arc::new(LogFrontend::new(
            cfg.download_dir.clone(),
            cfg.auto_accept_files,
        ));
        let session = Session::new(cfg, frontend, Arc::new(LogErrorSink)).await?;
        session.log_on().await?;
        shutdown_signal().await?;
        session.shutdown().await;
        Ok::<(), anyhow::Error>(())
    })
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    Ok(())
}
