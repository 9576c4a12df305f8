use crate::shutdown::Shutdown;
use crate::types::GenericBoxedStream;

use futures_util::StreamExt;
use tracing::info;

/// Await the next item from a stream or the shutdown signal.
///
/// - Returns `Some(Some(item))` when the stream yields
/// - Returns `Some(None)` when the stream ends
/// - Returns `None` on shutdown
async fn next_or_shutdown<T>(
    stream: &mut GenericBoxedStream<T>,
    shutdown: &Shutdown,
) -> Option<Option<T>> {
    tokio::select! {
        item = stream.next() => Some(item),
        _ = shutdown.wait() => None,
    }
}

/// Hand every accepted connection to `handler` until the stream ends or
/// shutdown is requested. Connections already handed off run to completion.
pub async fn serve_stream<T>(
    mut stream: GenericBoxedStream<T>,
    shutdown: Shutdown,
    handler: impl Fn(T) -> tokio::task::JoinHandle<()> + Send + Sync + 'static,
) {
    loop {
        match next_or_shutdown(&mut stream, &shutdown).await {
            Some(Some(item)) => {
                handler(item);
            }
            Some(None) => {
                info!("Listener stream ended");
                break;
            }
            None => {
                info!("Shutdown requested, no longer accepting connections");
                break;
            }
        }
    }
}
