use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use taskflow_core::destinations::BaselineTopic;

use crate::stomp::Frame;

pub type ChannelCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Where an inbound MESSAGE goes.
#[derive(Clone)]
pub(crate) enum Route {
    Baseline(BaselineTopic),
    Workspace(ChannelCallback),
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Baseline(topic) => f.debug_tuple("Baseline").field(topic).finish(),
            Self::Workspace(_) => f.write_str("Workspace(..)"),
        }
    }
}

struct Entry {
    id: String,
    route: Route,
}

/// Destination → STOMP subscription, at most one per destination.
///
/// Ids are `sub-N` and never reused within one client, even across
/// reconnects.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    next_id: u64,
    by_destination: HashMap<String, Entry>,
    destination_by_id: HashMap<String, String>,
}

impl SubscriptionTable {
    /// Returns the SUBSCRIBE frame to send, or `None` if already subscribed.
    pub fn subscribe(&mut self, destination: &str, route: Route) -> Option<Frame> {
        if self.by_destination.contains_key(destination) {
            return None;
        }
        let id = format!("sub-{}", self.next_id);
        self.next_id += 1;
        let frame = Frame::subscribe(&id, destination);
        self.destination_by_id
            .insert(id.clone(), destination.to_string());
        self.by_destination
            .insert(destination.to_string(), Entry { id, route });
        Some(frame)
    }

    /// Returns the UNSUBSCRIBE frame to send, or `None` if not subscribed.
    pub fn unsubscribe(&mut self, destination: &str) -> Option<Frame> {
        let entry = self.by_destination.remove(destination)?;
        self.destination_by_id.remove(&entry.id);
        Some(Frame::unsubscribe(&entry.id))
    }

    /// Forget everything, returning `(destination, UNSUBSCRIBE)` per entry.
    pub fn drain(&mut self) -> Vec<(String, Frame)> {
        self.destination_by_id.clear();
        let mut frames: Vec<(String, Frame)> = self
            .by_destination
            .drain()
            .map(|(dest, entry)| (dest, Frame::unsubscribe(&entry.id)))
            .collect();
        frames.sort_by(|a, b| a.0.cmp(&b.0));
        frames
    }

    /// Forget everything without producing frames. Used when the link that
    /// owned these subscriptions is already gone.
    pub fn reset(&mut self) {
        self.by_destination.clear();
        self.destination_by_id.clear();
    }

    /// Resolve a MESSAGE by its `subscription` header, falling back to
    /// `destination`.
    pub fn route(&self, subscription: Option<&str>, destination: Option<&str>) -> Option<Route> {
        let destination = subscription
            .and_then(|id| self.destination_by_id.get(id).map(String::as_str))
            .or(destination)?;
        self.by_destination.get(destination).map(|e| e.route.clone())
    }

    pub fn destinations(&self) -> Vec<String> {
        let mut all: Vec<String> = self.by_destination.keys().cloned().collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stomp::Command;
    use assert_matches::assert_matches;

    #[test]
    fn subscribe_once_per_destination() {
        let mut table = SubscriptionTable::default();
        let frame = table
            .subscribe("/topic/tasks", Route::Baseline(BaselineTopic::Tasks))
            .unwrap();
        assert_eq!(frame.command, Command::Subscribe);
        assert_eq!(frame.get("id"), Some("sub-0"));
        assert_eq!(frame.get("destination"), Some("/topic/tasks"));

        assert!(table
            .subscribe("/topic/tasks", Route::Baseline(BaselineTopic::Tasks))
            .is_none());
        assert_eq!(table.destinations().len(), 1);
    }

    #[test]
    fn route_by_id_then_destination() {
        let mut table = SubscriptionTable::default();
        table.subscribe("/topic/tasks", Route::Baseline(BaselineTopic::Tasks));
        table.subscribe("/topic/presence", Route::Baseline(BaselineTopic::Presence));

        assert_matches!(
            table.route(Some("sub-1"), Some("/topic/tasks")),
            Some(Route::Baseline(BaselineTopic::Presence))
        );
        assert_matches!(
            table.route(None, Some("/topic/tasks")),
            Some(Route::Baseline(BaselineTopic::Tasks))
        );
        assert_matches!(
            table.route(Some("sub-9"), Some("/topic/tasks")),
            Some(Route::Baseline(BaselineTopic::Tasks))
        );
        assert!(table.route(None, Some("/topic/other")).is_none());
        assert!(table.route(None, None).is_none());
    }

    #[test]
    fn unsubscribe_forgets_route() {
        let mut table = SubscriptionTable::default();
        table.subscribe("/topic/tasks", Route::Baseline(BaselineTopic::Tasks));
        let frame = table.unsubscribe("/topic/tasks").unwrap();
        assert_eq!(frame.command, Command::Unsubscribe);
        assert_eq!(frame.get("id"), Some("sub-0"));
        assert!(table.unsubscribe("/topic/tasks").is_none());
        assert!(table.route(Some("sub-0"), None).is_none());
    }

    #[test]
    fn ids_not_reused_after_reset() {
        let mut table = SubscriptionTable::default();
        table.subscribe("/a", Route::Baseline(BaselineTopic::Tasks));
        table.reset();
        let frame = table
            .subscribe("/a", Route::Baseline(BaselineTopic::Tasks))
            .unwrap();
        assert_eq!(frame.get("id"), Some("sub-1"));
    }

    #[test]
    fn drain_yields_unsubscribe_per_entry() {
        let mut table = SubscriptionTable::default();
        table.subscribe("/b", Route::Baseline(BaselineTopic::Tasks));
        table.subscribe("/a", Route::Baseline(BaselineTopic::Tasks));
        let drained = table.drain();
        let dests: Vec<&str> = drained.iter().map(|(d, _)| d.as_str()).collect();
        assert_eq!(dests, vec!["/a", "/b"]);
        assert!(table.destinations().is_empty());
        assert!(drained.iter().all(|(_, f)| f.command == Command::Unsubscribe));
    }
}
