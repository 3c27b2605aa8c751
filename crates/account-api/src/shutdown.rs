// Shutdown signal
// Decision: stdin is read on a detached std thread, so a blocked read never holds up runtime shutdown

use std::io::BufRead;

use tokio::sync::oneshot;

/// Watch `reader` for one line on a dedicated thread
///
/// The receiver resolves when a line is read. It is closed without a value when
/// the reader ends or fails, or when the thread can not be started.
pub fn watch_enter<R>(reader: R) -> oneshot::Receiver<()>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("stdin-watch".to_string())
        .spawn(move || {
            let mut reader = reader;
            let mut line = String::new();
            match reader.read_line(&mut line) {
                Ok(n) if n > 0 => {
                    let _ = tx.send(());
                }
                // stdin closed, e.g. running detached
                Ok(_) => tracing::debug!("stdin closed, ENTER will not stop the server"),
                Err(e) => tracing::warn!("Failed to read stdin: {}", e),
            }
        });
    if let Err(e) = spawned {
        tracing::error!("Failed to start stdin watcher: {}", e);
    }
    rx
}

/// Resolve on Ctrl-C, or on ENTER when `stop_on_enter` is set
pub async fn shutdown_signal(stop_on_enter: bool) {
    let enter = stop_on_enter.then(|| watch_enter(std::io::BufReader::new(std::io::stdin())));
    wait_for_signal(enter).await
}

async fn wait_for_signal(enter: Option<oneshot::Receiver<()>>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let enter = async {
        match enter {
            Some(rx) => {
                if rx.await.is_err() {
                    std::future::pending::<()>().await
                }
            }
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("Ctrl-C received, shutting down"),
        _ = enter => tracing::info!("ENTER pressed, shutting down"),
    }
}
