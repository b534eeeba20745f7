use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::collapse::{collapse_settled, join_text};
use crate::core::stt::{
    EventKind, EventSource, StreamError, StreamEvent, TranscriptStream, next_source_id,
};
use crate::core::stt::recognize::config::DEFAULT_EVENT_CAPACITY;

type WiredKinds = Arc<Mutex<HashSet<EventKind>>>;

/// Relay task for one source. A flush request is answered once every
/// event the source had already raised has been re-raised.
struct Forwarder {
    handle: JoinHandle<()>,
    flush: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

/// Re-broadcasts named events from any number of upstream sources.
///
/// Sources are wired eagerly when attached, so a subscriber gets events
/// from sources attached before or after it subscribed. Each event kind is
/// wired at most once per source: attaching the same source again only
/// extends the set of forwarded kinds, it never duplicates events.
///
/// The aggregator can also carry a pass-through transcript output and
/// collapse it into a single result.
pub struct EventAggregator {
    id: u64,
    events: broadcast::Sender<StreamEvent>,
    sources: Mutex<HashMap<u64, WiredKinds>>,
    forwarders: Mutex<Vec<Forwarder>>,
    output: Mutex<Option<TranscriptStream>>,
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventAggregator {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            id: next_source_id(),
            events,
            sources: Mutex::new(HashMap::new()),
            forwarders: Mutex::new(Vec::new()),
            output: Mutex::new(None),
        }
    }

    /// Forward every event kind raised by `source`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach_source<S: EventSource + ?Sized>(&self, source: &S) {
        self.attach(source, &EventKind::ALL);
    }

    /// Forward only `error` events raised by `source`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach_error_source<S: EventSource + ?Sized>(&self, source: &S) {
        self.attach(source, &[EventKind::Error]);
    }

    /// Number of distinct sources attached so far.
    pub fn source_count(&self) -> usize {
        self.sources.lock().len()
    }

    fn attach<S: EventSource + ?Sized>(&self, source: &S, kinds: &[EventKind]) {
        let source_id = source.source_id();
        if source_id == self.id {
            warn!("Refusing to attach an event aggregator to itself");
            return;
        }

        let mut sources = self.sources.lock();
        if let Some(wired) = sources.get(&source_id) {
            wired.lock().extend(kinds.iter().copied());
            debug!("Extended wiring for event source {}", source_id);
            return;
        }

        let wired: WiredKinds = Arc::new(Mutex::new(kinds.iter().copied().collect()));
        sources.insert(source_id, wired.clone());

        let mut upstream = source.subscribe();
        let downstream = self.events.clone();
        let (flush_tx, mut flush_rx) = mpsc::unbounded_channel::<oneshot::Sender<()>>();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    event = upstream.recv() => match event {
                        Ok(event) => {
                            if wired.lock().contains(&event.kind()) {
                                let _ = downstream.send(event);
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(
                                "Event source {} lagged, {} events skipped",
                                source_id, skipped
                            );
                        }
                        Err(RecvError::Closed) => {
                            debug!("Event source {} closed", source_id);
                            break;
                        }
                    },

                    // Only reached once nothing is queued upstream.
                    Some(ack) = flush_rx.recv() => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        self.forwarders.lock().push(Forwarder {
            handle,
            flush: flush_tx,
        });
        debug!("Attached event source {} ({} kinds)", source_id, kinds.len());
    }

    /// Subscribe to events re-raised from every attached source.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }

    /// Install the pass-through output collapsed by [`Self::into_text`].
    pub fn set_output(&self, output: TranscriptStream) {
        *self.output.lock() = Some(output);
    }

    /// Concatenate the pass-through output into one string once it ends.
    ///
    /// Fails with the first `error` re-raised before the output ends.
    pub async fn into_text(&self) -> Result<String, StreamError> {
        let chunks = self.into_items().await?;
        Ok(join_text(&chunks))
    }

    /// Collect the pass-through output chunks in order once it ends.
    ///
    /// Every source's queued events are relayed before the final error
    /// check, so an error raised before the output ended is never missed.
    pub async fn into_items(&self) -> Result<Vec<String>, StreamError> {
        let output = self.take_output()?;
        collapse_settled(output, self.subscribe(), self.flush_forwarders()).await
    }

    /// Wait until every forwarder has relayed what its source already raised.
    async fn flush_forwarders(&self) {
        let acks: Vec<_> = self
            .forwarders
            .lock()
            .iter()
            .filter_map(|forwarder| {
                let (ack_tx, ack_rx) = oneshot::channel();
                forwarder.flush.send(ack_tx).ok().map(|_| ack_rx)
            })
            .collect();

        // A finished forwarder drops its request, having relayed everything.
        for ack in acks {
            let _ = ack.await;
        }
    }

    fn take_output(&self) -> Result<TranscriptStream, StreamError> {
        self.output.lock().take().ok_or_else(|| {
            StreamError::ConfigurationError("No output attached to the aggregator".to_string())
        })
    }
}

impl EventSource for EventAggregator {
    fn source_id(&self) -> u64 {
        self.id
    }

    fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.events.subscribe()
    }
}

impl Drop for EventAggregator {
    fn drop(&mut self) {
        for forwarder in self.forwarders.lock().drain(..) {
            forwarder.handle.abort();
        }
    }
}
