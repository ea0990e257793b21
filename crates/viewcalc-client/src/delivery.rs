use parking_lot::Mutex;
use serde_json::Value as JsonValue;

/// Outbound transport for grid payloads. Implementations must not block for
/// long; they are called from session delivery threads.
pub trait DeliveryChannel: Send + Sync {
    fn deliver(&self, session_id: &str, topic: &str, payload: JsonValue);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivered {
    pub session_id: String,
    pub topic: String,
    pub payload: JsonValue,
}

/// Keeps everything delivered, in order.
#[derive(Debug, Default)]
pub struct RecordingChannel {
    delivered: Mutex<Vec<Delivered>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delivered(&self) -> Vec<Delivered> {
        self.delivered.lock().clone()
    }

    pub fn on_topic(&self, topic: &str) -> Vec<JsonValue> {
        self.delivered
            .lock()
            .iter()
            .filter(|d| d.topic == topic)
            .map(|d| d.payload.clone())
            .collect()
    }

    pub fn take(&self) -> Vec<Delivered> {
        std::mem::take(&mut *self.delivered.lock())
    }

    pub fn len(&self) -> usize {
        self.delivered.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeliveryChannel for RecordingChannel {
    fn deliver(&self, session_id: &str, topic: &str, payload: JsonValue) {
        self.delivered.lock().push(Delivered {
            session_id: session_id.to_string(),
            topic: topic.to_string(),
            payload,
        });
    }
}
