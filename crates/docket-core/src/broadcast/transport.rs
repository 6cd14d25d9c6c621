use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

use super::message::ProgressMessage;

/// Pub/sub fabric progress messages are published on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn publish(&self, channel: &str, message: &ProgressMessage) -> anyhow::Result<()>;
}

/// In-process transport: one broadcast channel per channel name.
pub struct LocalTransport {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<ProgressMessage>>>,
}

impl Default for LocalTransport {
    fn default() -> Self {
        Self::new(256)
    }
}

impl LocalTransport {
    /// `capacity` messages are buffered per channel before slow subscribers lag.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<ProgressMessage> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    pub fn subscribe(&self, channel: &str) -> broadcast::Receiver<ProgressMessage> {
        self.sender(channel).subscribe()
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn publish(&self, channel: &str, message: &ProgressMessage) -> anyhow::Result<()> {
        // No subscribers is not an error: delivery is best-effort.
        let _ = self.sender(channel).send(message.clone());
        Ok(())
    }
}
