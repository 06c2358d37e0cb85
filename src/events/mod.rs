use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Events emitted by the catalog services.
///
/// Emission happens through deferred effects, so an event is only ever
/// published after the transaction that produced it has committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    // Product aggregate events
    ProductCreated(i32),
    ProductUpdated(i32),
    ProductDeleted(i32),

    // Lookup entity events
    TagCreated(i32),
    TagDeleted(i32),
    MaterialCreated(i32),
    MaterialDeleted(i32),
    CategoryCreated(i32),
    CategoryUpdated(i32),
    CategoryDeleted(i32),

    // Fulfillment events
    ShippingOptionCreated(i32),
    ShippingOptionUpdated(i32),
    ShippingOptionDeleted(i32),
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event, surfacing delivery failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the consumer is gone.
    /// Event delivery is best-effort; it never aborts the operation that
    /// produced the event.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event.clone()).await {
            warn!(?event, error = %e, "Event dropped");
        }
    }
}

/// Creates a paired sender and receiver for catalog events.
pub fn channel(buffer: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(buffer);
    (EventSender::new(tx), rx)
}

/// Consumes events from the channel until all senders are dropped.
///
/// Downstream delivery (webhooks, search indexing, ...) hangs off this
/// loop; the core only guarantees that events for rolled-back transactions
/// never reach it.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        info!(?event, "Received event");
    }

    info!("Event processing loop stopped");
}
