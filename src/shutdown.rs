//! Process-wide quit handling
//!
//! Both binaries run until Ctrl-C or SIGTERM. The handler turns those signals
//! into a [`CancellationToken`] that loops and servers can poll or await.

use tokio::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawns a task that cancels the returned token on Ctrl-C or SIGTERM
///
/// Must be called from within a Tokio runtime.
pub fn install_quit_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        wait_for_quit().await;
        info!("Asked to quit");
        trigger.cancel();
    });
    token
}

async fn wait_for_quit() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match signal::unix::signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
