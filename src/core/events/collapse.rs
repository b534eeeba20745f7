use std::future::Future;

use futures::{Stream, StreamExt};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tracing::warn;

use crate::core::stt::{StreamError, StreamEvent};

/// Collect every chunk of `data` in order once it ends.
///
/// Resolves with the chunks on graceful end, or with the first
/// [`StreamEvent::Error`] seen on `events` before the data ended.
///
/// Errors already sent on `events` when the data ends are still seen.
/// Errors that another task has yet to relay onto `events` may be missed;
/// [`EventAggregator::into_text`](super::EventAggregator::into_text) flushes
/// its own relays first.
pub async fn collapse<S, T>(
    data: S,
    events: broadcast::Receiver<StreamEvent>,
) -> Result<Vec<T>, StreamError>
where
    S: Stream<Item = T>,
{
    collapse_settled(data, events, tokio::task::yield_now()).await
}

/// [`collapse`], awaiting `settle` between the end of the data and the
/// final check for queued errors.
pub(crate) async fn collapse_settled<S, T, F>(
    data: S,
    mut events: broadcast::Receiver<StreamEvent>,
    settle: F,
) -> Result<Vec<T>, StreamError>
where
    S: Stream<Item = T>,
    F: Future<Output = ()>,
{
    futures::pin_mut!(data);
    let mut chunks = Vec::new();
    let mut events_open = true;

    loop {
        tokio::select! {
            biased;

            event = events.recv(), if events_open => {
                match event {
                    Ok(StreamEvent::Error(e)) => return Err(e),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Collapse lagged behind events, {} skipped", skipped);
                    }
                    Err(RecvError::Closed) => events_open = false,
                }
            }

            chunk = data.next() => {
                match chunk {
                    Some(chunk) => chunks.push(chunk),
                    None => break,
                }
            }
        }
    }

    // Errors raised just before the end may still be in flight.
    settle.await;
    loop {
        match events.try_recv() {
            Ok(StreamEvent::Error(e)) => return Err(e),
            Ok(_) | Err(TryRecvError::Lagged(_)) => {}
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
        }
    }

    Ok(chunks)
}

/// Concatenate byte or string chunks of `data` into one string.
///
/// Invalid UTF-8 is replaced rather than rejected.
pub async fn collapse_text<S, T>(
    data: S,
    events: broadcast::Receiver<StreamEvent>,
) -> Result<String, StreamError>
where
    S: Stream<Item = T>,
    T: AsRef<[u8]>,
{
    let chunks = collapse(data, events).await?;
    Ok(join_text(&chunks))
}

pub(crate) fn join_text<T: AsRef<[u8]>>(chunks: &[T]) -> String {
    let mut bytes = Vec::with_capacity(chunks.iter().map(|c| c.as_ref().len()).sum());
    for chunk in chunks {
        bytes.extend_from_slice(chunk.as_ref());
    }
    String::from_utf8_lossy(&bytes).into_owned()
}
