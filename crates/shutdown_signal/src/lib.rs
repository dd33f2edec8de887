use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use cfg_if::cfg_if;
use futures::{future::Shared, FutureExt};
use tokio::select;
use tokio::sync::Notify;
use tracing::{info, warn};

cfg_if! {
    if #[cfg(windows)] {
        use tokio::signal::windows::*;

        async fn raw_shutdown_signal() {
            let (Ok(mut ctrl_c), Ok(mut ctrl_close), Ok(mut ctrl_shutdown)) =
                (ctrl_c(), ctrl_close(), ctrl_shutdown())
            else {
                warn!("Could not attach windows shutdown handlers, relying on programmatic shutdown");
                return futures::future::pending().await;
            };
            select! {
                _ = ctrl_c.recv() => (),
                _ = ctrl_close.recv() => (),
                _ = ctrl_shutdown.recv() => (),
            }
        }
    } else if #[cfg(unix)] {
        use tokio::signal::unix::*;

        async fn unix_shutdown_signal(signal_kind: SignalKind) {
            match signal(signal_kind) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Could not listen to unix shutdown signal");
                    futures::future::pending::<()>().await;
                }
            }
        }

        async fn raw_shutdown_signal() {
            select! {
                _ = unix_shutdown_signal(SignalKind::interrupt()) => (),
                _ = unix_shutdown_signal(SignalKind::terminate()) => (),
                _ = unix_shutdown_signal(SignalKind::hangup()) => (),
            };
        }
    } else {
        compile_error!("Your OS does not support shutdown signal ! Are you targeting wasm ?");
    }
}

/// A cloneable future resolving once the worker must stop picking up jobs.
pub type ShutdownSignal = Shared<Pin<Box<dyn Future<Output = ()> + Send>>>;

/// Resolves on SIGINT, SIGTERM or SIGHUP (Ctrl-C/close/shutdown on windows).
pub fn shutdown_signal() -> ShutdownSignal {
    async {
        raw_shutdown_signal().await;
        info!("Shutdown signal detected. Attempting graceful shutdown...");
    }
    .boxed()
    .shared()
}

/// Like [`shutdown_signal`], but also resolves when `notifier` is notified,
/// which lets the embedding application stop a worker without a process signal.
///
/// Use `Notify::notify_one` to trigger it: the permit is kept even when the
/// signal has not been polled yet.
pub fn shutdown_signal_with_notifier(notifier: Arc<Notify>) -> ShutdownSignal {
    async move {
        select! {
            _ = raw_shutdown_signal() => {
                info!("Shutdown signal detected. Attempting graceful shutdown...");
            }
            _ = notifier.notified() => {
                info!("Shutdown requested. Attempting graceful shutdown...");
            }
        }
    }
    .boxed()
    .shared()
}
