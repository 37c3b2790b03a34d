use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

mod bus;

pub use bus::{EventBus, EventHandler, SubscriptionId, DEFAULT_MAX_EVENTS};
pub(crate) use bus::panic_message;

/// Emitter identity used when the caller does not name one.
pub const SYSTEM_SOURCE: &str = "system";

/// Event represents an immutable record of something that happened in the core.
///
/// Ids are UUIDv7, so ordering by id follows emission time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,

    /// Dot-namespaced type (e.g., "module.activated")
    #[serde(rename = "type")]
    pub event_type: String,

    /// Opaque payload
    pub data: Value,

    pub timestamp: DateTime<Utc>,

    /// Emitter identity, "system" unless supplied
    pub source: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

impl Event {
    pub fn new(
        event_type: &str,
        data: Value,
        source: Option<&str>,
        target: Option<&str>,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            event_type: event_type.to_string(),
            data,
            timestamp: Utc::now(),
            source: source.unwrap_or(SYSTEM_SOURCE).to_string(),
            target: target.map(str::to_string),
        }
    }

    /// True if the module emitted this event or is its target.
    pub fn involves(&self, module_id: &str) -> bool {
        self.source == module_id || self.target.as_deref() == Some(module_id)
    }

    /// Filter used by history queries: both dimensions are optional.
    pub(crate) fn matches(&self, event_type: Option<&str>, module_id: Option<&str>) -> bool {
        event_type.map_or(true, |t| self.event_type == t)
            && module_id.map_or(true, |m| self.involves(m))
    }
}
