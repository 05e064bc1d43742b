use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

// Capacity defaults shared by the storage-change and session-event channels
pub const CHANNEL_CAPACITY: usize = 64;
pub const REPLAY_BUFFER_SIZE: usize = 16;

/// Broadcast stream carrying change notifications to every interested
/// consumer. The storage layer uses it for cross-tab style token signals,
/// the session layer for state-change events consumed by shell components.
///
/// A small replay buffer lets late subscribers observe recent events, which
/// keeps startup ordering forgiving: a shell that subscribes just after the
/// session finished initializing still sees the loaded transition.
pub struct EventStream<T: Clone + Send + 'static> {
    sender: broadcast::Sender<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
    buffer_size: usize,
}

impl<T: Clone + Send + 'static> EventStream<T> {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            buffer: Arc::new(RwLock::new(VecDeque::with_capacity(buffer_size))),
            buffer_size,
        }
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> Subscriber<T> {
        Subscriber {
            receiver: self.sender.subscribe(),
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Publish an event to all current subscribers. An event with no
    /// listeners is not an error; it is still recorded in the replay buffer.
    pub async fn publish(&self, event: T) -> usize {
        let delivered = self.sender.send(event.clone()).unwrap_or(0);
        trace!(delivered, "Event published");

        let mut buffer = self.buffer.write().await;
        buffer.push_back(event);
        while buffer.len() > self.buffer_size {
            buffer.pop_front();
        }

        delivered
    }

    /// Number of currently attached subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<T: Clone + Send + 'static> Clone for EventStream<T> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            buffer: Arc::clone(&self.buffer),
            buffer_size: self.buffer_size,
        }
    }
}

/// Receiving side of an [`EventStream`]
pub struct Subscriber<T: Clone + Send + 'static> {
    receiver: broadcast::Receiver<T>,
    buffer: Arc<RwLock<VecDeque<T>>>,
}

impl<T: Clone + Send + 'static> Subscriber<T> {
    /// Receive the next event, waiting until one is published
    pub async fn recv(&mut self) -> Result<T, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking receive; `None` when no event is pending
    pub fn try_recv(&mut self) -> Option<T> {
        self.receiver.try_recv().ok()
    }

    /// Snapshot of the recent events recorded before this subscriber attached
    pub async fn replay(&self) -> Vec<T> {
        self.buffer.read().await.iter().cloned().collect()
    }
}
