//! Sessions, interaction history, and the surrounding read-only carriers.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CustomerId(pub String);

impl CustomerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: CustomerId,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub agent_id: AgentId,
    pub customer_id: CustomerId,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        agent_id: impl Into<String>,
        customer_id: impl Into<String>,
    ) -> Self {
        Self {
            id: SessionId::new(id),
            agent_id: AgentId::new(agent_id),
            customer_id: CustomerId::new(customer_id),
            started_at: Utc::now(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    Customer,
    Agent,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Message,
    ToolResult,
    StatusUpdate,
}

/// One entry of the ordered interaction history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub source: EventSource,
    pub kind: EventKind,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl Event {
    pub fn message(source: EventSource, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source,
            kind: EventKind::Message,
            payload: serde_json::json!({ "message": text.into() }),
            occurred_at: Utc::now(),
        }
    }

    pub fn tool_result(payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            source: EventSource::System,
            kind: EventKind::ToolResult,
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Message text, when this event carries one.
    pub fn message_text(&self) -> Option<&str> {
        self.payload.get("message").and_then(|value| value.as_str())
    }
}

/// Glossary term available to prompt construction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub description: String,
    pub synonyms: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    pub title: String,
    pub description: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextVariable {
    pub name: String,
    pub value: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::{Event, EventSource};

    #[test]
    fn message_event_round_trips_text() {
        let event = Event::message(EventSource::Customer, "I want a refund");
        assert_eq!(event.message_text(), Some("I want a refund"));
    }

    #[test]
    fn tool_result_has_no_message_text() {
        let event = Event::tool_result(serde_json::json!({ "status": "ok" }));
        assert_eq!(event.message_text(), None);
    }
}
