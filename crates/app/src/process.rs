use std::str::FromStr;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::version::build_info;

const REQUEST_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Install the stderr logger. The returned guard flushes pending lines
///  when dropped and must live as long as the program.
pub fn init_logging(level: tracing::Level) -> tracing_appender::non_blocking::WorkerGuard {
    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let env_filter = EnvFilter::builder()
        .with_default_directive(tracing::level_filters::LevelFilter::from_level(level).into())
        .from_env_lossy();

    let layer = tracing_subscriber::fmt::layer()
        .compact()
        .with_writer(writer)
        .with_filter(env_filter);

    // a second init (e.g. from tests) keeps the first subscriber
    let _ = tracing_subscriber::registry().with(layer).try_init();

    register_panic_logger();
    guard
}

/// The configured level, falling back to `warn` for anything unparsable
pub fn parse_level(level: &str) -> tracing::Level {
    tracing::Level::from_str(level).unwrap_or(tracing::Level::WARN)
}

/// Spawns a task that listens for ctrl-c and SIGTERM and sends a shutdown
///  signal via a watch.
pub fn graceful_shutdown_blocker() -> (JoinHandle<()>, watch::Receiver<()>) {
    let (tx, rx) = watch::channel(());

    let handle = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::debug!("gracefully exiting immediately on ctrl-c");
            }
            _ = terminate() => {
                tracing::debug!("initiating graceful shutdown with delay on SIGTERM");
                tokio::time::sleep(REQUEST_GRACE_PERIOD).await;
            }
        }
        let _ = tx.send(());
    });

    (handle, rx)
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("cannot listen for SIGTERM: {}", e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

/// Registers a panic hook that logs panics using the `tracing` crate
pub fn register_panic_logger() {
    std::panic::set_hook(Box::new(|panic| match panic.location() {
        Some(loc) => {
            tracing::error!(
                message = %panic,
                panic.file = loc.file(),
                panic.line = loc.line(),
                panic.column = loc.column(),
            );
        }
        None => tracing::error!(message = %panic),
    }));
}

pub fn report_build_info() {
    let build = build_info();

    tracing::info!(
        build_profile = build.build_profile,
        features = build.build_features,
        version = build.version,
        "node starting up"
    );
}
