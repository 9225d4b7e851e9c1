//! Progress bar fed by task events.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use mediafetch_core::{TaskEvent, TaskStatus};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawns the progress bar over `total` outstanding tasks.
///
/// Returns `None` when disabled. The bar stops on `stop` or when the event
/// channel closes.
pub(crate) fn spawn_progress_ui(
    enabled: bool,
    mut events: broadcast::Receiver<TaskEvent>,
    total: u64,
    stop: CancellationToken,
) -> Option<JoinHandle<()>> {
    if !enabled {
        return None;
    }

    Some(tokio::spawn(async move {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));

        let mut failed = 0u64;
        loop {
            let event = tokio::select! {
                () = stop.cancelled() => break,
                event = events.recv() => event,
            };
            match event {
                Ok(event) => match event.new_state {
                    TaskStatus::Completed => bar.inc(1),
                    TaskStatus::Failed => {
                        failed += 1;
                        bar.inc(1);
                    }
                    TaskStatus::Retrying => bar.set_message(format!("retrying {}", event.task_id)),
                    TaskStatus::Pending | TaskStatus::Processing => {}
                },
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
            if failed > 0 {
                bar.set_message(format!("{failed} failed"));
            }
        }

        bar.finish_and_clear();
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_progress_spawns_nothing() {
        let (_tx, rx) = broadcast::channel(4);
        assert!(spawn_progress_ui(false, rx, 3, CancellationToken::new()).is_none());
    }

    #[tokio::test]
    async fn test_progress_stops_when_channel_closes() {
        let (tx, rx) = broadcast::channel(4);
        let handle = spawn_progress_ui(true, rx, 1, CancellationToken::new()).unwrap_or_else(|| {
            panic!("progress should be enabled");
        });
        drop(tx);
        assert!(handle.await.is_ok());
    }
}
