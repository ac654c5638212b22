use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde_json::{json, Value};

use crate::destinations::BaselineTopic;

/// Key under which listeners register. Displays as the wire-style event name
/// (`task:created`, `notification:new`, `connection:reconnecting`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKey {
    Task(String),
    Workspace(String),
    User(String),
    NotificationNew,
    ConnectionEstablished,
    ConnectionReconnecting,
    ConnectionLost,
}

impl EventKey {
    pub fn task(action: impl Into<String>) -> Self {
        Self::Task(action.into())
    }

    pub fn workspace(action: impl Into<String>) -> Self {
        Self::Workspace(action.into())
    }

    pub fn user(action: impl Into<String>) -> Self {
        Self::User(action.into())
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Task(action) => write!(f, "task:{action}"),
            Self::Workspace(action) => write!(f, "workspace:{action}"),
            Self::User(action) => write!(f, "user:{action}"),
            Self::NotificationNew => f.write_str("notification:new"),
            Self::ConnectionEstablished => f.write_str("connection:established"),
            Self::ConnectionReconnecting => f.write_str("connection:reconnecting"),
            Self::ConnectionLost => f.write_str("connection:lost"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown event name: {0}")]
pub struct UnknownEvent(pub String);

impl FromStr for EventKey {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (domain, action) = s
            .split_once(':')
            .filter(|(_, action)| !action.is_empty())
            .ok_or_else(|| UnknownEvent(s.to_owned()))?;
        match (domain, action) {
            ("task", action) => Ok(Self::task(action)),
            ("workspace", action) => Ok(Self::workspace(action)),
            ("user", action) => Ok(Self::user(action)),
            ("notification", "new") => Ok(Self::NotificationNew),
            ("connection", "established") => Ok(Self::ConnectionEstablished),
            ("connection", "reconnecting") => Ok(Self::ConnectionReconnecting),
            ("connection", "lost") => Ok(Self::ConnectionLost),
            _ => Err(UnknownEvent(s.to_owned())),
        }
    }
}

/// Logical events delivered to listeners.
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    Task { action: String, task: Value },
    Workspace { action: String, workspace: Value },
    /// Presence messages are forwarded whole, `action` included.
    Presence { action: String, message: Value },
    Notification(Value),
    Established,
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        next_attempt_in: Duration,
    },
    Lost { reason: String },
}

impl RealtimeEvent {
    /// Translate a message received on a baseline topic.
    ///
    /// Returns `None` for action-keyed topics whose message has no string
    /// `action` field. Notifications are accepted regardless of shape.
    pub fn from_topic(topic: BaselineTopic, mut message: Value) -> Option<Self> {
        let event = match topic {
            BaselineTopic::Notifications => Self::Notification(message),
            BaselineTopic::Tasks => Self::Task {
                action: action_of(&message)?,
                task: take_field(&mut message, "task"),
            },
            BaselineTopic::Workspaces => Self::Workspace {
                action: action_of(&message)?,
                workspace: take_field(&mut message, "workspace"),
            },
            BaselineTopic::Presence => Self::Presence {
                action: action_of(&message)?,
                message,
            },
        };
        Some(event)
    }

    pub fn key(&self) -> EventKey {
        match self {
            Self::Task { action, .. } => EventKey::task(action.as_str()),
            Self::Workspace { action, .. } => EventKey::workspace(action.as_str()),
            Self::Presence { action, .. } => EventKey::user(action.as_str()),
            Self::Notification(_) => EventKey::NotificationNew,
            Self::Established => EventKey::ConnectionEstablished,
            Self::Reconnecting { .. } => EventKey::ConnectionReconnecting,
            Self::Lost { .. } => EventKey::ConnectionLost,
        }
    }

    /// The payload a listener sees: the entity for task/workspace events,
    /// the full message otherwise.
    pub fn payload(&self) -> Value {
        match self {
            Self::Task { task, .. } => task.clone(),
            Self::Workspace { workspace, .. } => workspace.clone(),
            Self::Presence { message, .. } => message.clone(),
            Self::Notification(notification) => notification.clone(),
            Self::Established => Value::Null,
            Self::Reconnecting {
                attempt,
                max_attempts,
                next_attempt_in,
            } => json!({
                "attempt": attempt,
                "maxAttempts": max_attempts,
                "nextAttemptIn": whole_millis(*next_attempt_in),
            }),
            Self::Lost { reason } => json!({ "reason": reason }),
        }
    }
}

/// Milliseconds in `duration`, saturating at `u64::MAX`.
pub fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn action_of(message: &Value) -> Option<String> {
    message.get("action")?.as_str().map(str::to_owned)
}

fn take_field(message: &mut Value, field: &str) -> Value {
    message
        .as_object_mut()
        .and_then(|map| map.remove(field))
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn whole_millis_saturates() {
        assert_eq!(whole_millis(Duration::from_millis(1500)), 1500);
        assert_eq!(whole_millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn task_message_unwraps_entity() {
        let event = RealtimeEvent::from_topic(
            BaselineTopic::Tasks,
            json!({"action": "updated", "task": {"id": "42"}}),
        )
        .unwrap();
        assert_eq!(event.key(), EventKey::task("updated"));
        assert_eq!(event.payload(), json!({"id": "42"}));
    }

    #[test]
    fn workspace_message_unwraps_entity() {
        let event = RealtimeEvent::from_topic(
            BaselineTopic::Workspaces,
            json!({"action": "deleted", "workspace": {"id": 3}}),
        )
        .unwrap();
        assert_eq!(event.key().to_string(), "workspace:deleted");
        assert_eq!(event.payload(), json!({"id": 3}));
    }

    #[test]
    fn presence_keeps_whole_message() {
        let msg = json!({"action": "online", "userId": "u1"});
        let event = RealtimeEvent::from_topic(BaselineTopic::Presence, msg.clone()).unwrap();
        assert_eq!(event.key().to_string(), "user:online");
        assert_eq!(event.payload(), msg);
    }

    #[test]
    fn notification_ignores_shape() {
        let event = RealtimeEvent::from_topic(BaselineTopic::Notifications, json!([1, 2])).unwrap();
        assert_eq!(event.key(), EventKey::NotificationNew);
        assert_eq!(event.payload(), json!([1, 2]));
    }

    #[test]
    fn missing_action_is_dropped() {
        assert!(RealtimeEvent::from_topic(BaselineTopic::Tasks, json!({"task": {}})).is_none());
        assert!(RealtimeEvent::from_topic(BaselineTopic::Presence, json!({"action": 7})).is_none());
    }

    #[test]
    fn task_without_entity_is_null_payload() {
        let event =
            RealtimeEvent::from_topic(BaselineTopic::Tasks, json!({"action": "created"})).unwrap();
        assert_eq!(event.payload(), Value::Null);
    }

    #[test]
    fn reconnecting_payload_uses_wire_names() {
        let event = RealtimeEvent::Reconnecting {
            attempt: 2,
            max_attempts: 5,
            next_attempt_in: Duration::from_millis(2000),
        };
        assert_eq!(
            event.payload(),
            json!({"attempt": 2, "maxAttempts": 5, "nextAttemptIn": 2000})
        );
        assert_eq!(event.key().to_string(), "connection:reconnecting");
    }

    #[test]
    fn key_parses_from_wire_name() {
        assert_eq!("task:created".parse::<EventKey>().unwrap(), EventKey::task("created"));
        assert_eq!(
            "notification:new".parse::<EventKey>().unwrap(),
            EventKey::NotificationNew
        );
        assert_matches!("task:".parse::<EventKey>(), Err(UnknownEvent(_)));
        assert_matches!("bogus".parse::<EventKey>(), Err(UnknownEvent(_)));
        assert_matches!("notification:old".parse::<EventKey>(), Err(_));
    }

    #[test]
    fn key_display_parse_agree() {
        for key in [
            EventKey::user("typing"),
            EventKey::ConnectionLost,
            EventKey::ConnectionEstablished,
            EventKey::workspace("member_added"),
        ] {
            assert_eq!(key.to_string().parse::<EventKey>().unwrap(), key);
        }
    }
}
