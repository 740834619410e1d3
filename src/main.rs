//! rtmp-relay server binary
//!
//! Usage: `rtmp-relay [config.json]`. Without a config file the built-in
//! defaults apply (listen 1935, console logging).

use std::process::ExitCode;
use std::sync::Arc;

use rtmp_relay::config::Config;
use rtmp_relay::server::RelayServer;
use rtmp_relay::worker::WorkerContainer;

fn main() -> ExitCode {
    let config = match load_config() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("rtmp-relay: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_logging(&config) {
        eprintln!("rtmp-relay: {}", e);
        return ExitCode::FAILURE;
    }

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.workers > 0 {
        builder.worker_threads(config.workers as usize);
    }
    let runtime = match builder.build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("rtmp-relay: build runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "fatal");
            ExitCode::FAILURE
        }
    }
}

fn load_config() -> rtmp_relay::Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => Config::load(path),
        None => Ok(Config::default()),
    }
}

fn init_logging(config: &Config) -> rtmp_relay::Result<()> {
    use rtmp_relay::error::Error;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(format!("rtmp_relay={}", config.log.level))
        .map_err(|e| Error::Config(format!("log.level: {}", e)))?;

    match config.log.tank.as_str() {
        "file" => {
            let path = config.log.file.as_deref().unwrap_or("rtmp-relay.log");
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| Error::Config(format!("open log file {}: {}", path, e)))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(Arc::new(file))
                .with_ansi(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

async fn serve(config: Arc<Config>) -> rtmp_relay::Result<()> {
    let wc = Arc::new(WorkerContainer::new());
    let server = RelayServer::new(config, Arc::clone(&wc));

    let quit_wc = Arc::clone(&wc);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt: shutting down");
            quit_wc.quit();
        }
    });

    let result = server.run().await;
    wc.close().await;
    result
}
