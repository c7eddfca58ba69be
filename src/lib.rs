pub mod admission;
pub mod batch;
pub mod config;
pub mod pipeline;
pub mod workflow;

use std::future::Future;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` (if given) applies to this
/// crate, falling back to [`config::default_log_filter`].
pub fn init_tracing(level: Option<&str>) {
    let fallback = match level {
        Some(level) => format!("invoice_flow={level},warn"),
        None => config::default_log_filter().to_string(),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .with_target(false)
        .try_init();

    tracing::debug!("{} v{} logging initialized", config::APP_NAME, config::APP_VERSION);
}

/// Drive `future` on a fresh multi-thread runtime, then shut it down without
/// waiting on blocking step bodies a timed-out or failed run left behind.
///
/// Dropping a runtime joins every `spawn_blocking` task, so a collaborator that
/// never returns would keep the process alive. Shutdown waits at most
/// [`config::SHUTDOWN_GRACE_MS`] and detaches whatever is still running.
pub fn block_on_detached<F: Future>(future: F) -> std::io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let output = runtime.block_on(future);
    runtime.shutdown_timeout(Duration::from_millis(config::SHUTDOWN_GRACE_MS));
    Ok(output)
}
