use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    storage::entry_storage::EntryStorage,
    tracker::{shutdown::detect_shutdown, Tracker},
};

use super::output::print_status;

/// Foreground session. Polls the shared folder and prints every change until Ctrl-C.
pub async fn run_watch<S: EntryStorage>(mut tracker: Tracker<S>) -> Result<()> {
    match tracker.on_foreground().await {
        Ok(state) => print_status(&state, tracker.settings(), Utc::now()),
        Err(e) => error!("Initial load failed, waiting for the folder to recover {e}"),
    }

    let shutdown_token = CancellationToken::new();
    let mut changes = tracker.subscribe();
    changes.borrow_and_update();

    let follow = async {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => break,
                changed = changes.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = changes.borrow_and_update().clone();
                    println!();
                    print_status(&state, tracker.settings(), Utc::now());
                    // A remote change counts as a data reload.
                    tracker.run_due_backups().await;
                }
            }
        }
    };

    tokio::join!(detect_shutdown(shutdown_token.clone()), follow);

    info!("Shutting down watch session");
    tracker.on_background().await;
    Ok(())
}
