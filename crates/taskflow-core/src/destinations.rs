//! Broker destination strings. These are matched bit-exact by the backend.

use crate::ids::WorkspaceId;

pub const TASKS_TOPIC: &str = "/topic/tasks";
pub const WORKSPACES_TOPIC: &str = "/topic/workspaces";
pub const PRESENCE_TOPIC: &str = "/topic/presence";
pub const NOTIFICATIONS_QUEUE: &str = "/user/queue/notifications";

pub const WORKSPACE_JOIN: &str = "/app/workspace.join";
pub const WORKSPACE_LEAVE: &str = "/app/workspace.leave";
pub const TASK_WATCH: &str = "/app/task.watch";
pub const TASK_UNWATCH: &str = "/app/task.unwatch";
pub const CURSOR_UPDATE: &str = "/app/cursor.update";
pub const TYPING_START: &str = "/app/typing.start";
pub const TYPING_STOP: &str = "/app/typing.stop";

/// Topics every connection subscribes to right after the handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BaselineTopic {
    Tasks,
    Workspaces,
    Presence,
    Notifications,
}

impl BaselineTopic {
    pub const ALL: [BaselineTopic; 4] = [
        Self::Tasks,
        Self::Workspaces,
        Self::Presence,
        Self::Notifications,
    ];

    pub fn destination(self) -> &'static str {
        match self {
            Self::Tasks => TASKS_TOPIC,
            Self::Workspaces => WORKSPACES_TOPIC,
            Self::Presence => PRESENCE_TOPIC,
            Self::Notifications => NOTIFICATIONS_QUEUE,
        }
    }

    pub fn from_destination(destination: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|topic| topic.destination() == destination)
    }
}

/// Workspace-scoped channels, one destination each per workspace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WorkspaceChannel {
    Tasks,
    Presence,
    Activity,
    Cursors,
}

impl WorkspaceChannel {
    pub const ALL: [WorkspaceChannel; 4] = [
        Self::Tasks,
        Self::Presence,
        Self::Activity,
        Self::Cursors,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Presence => "presence",
            Self::Activity => "activity",
            Self::Cursors => "cursors",
        }
    }

    pub fn destination(self, workspace_id: &WorkspaceId) -> String {
        format!("/topic/workspace/{}/{}", workspace_id, self.as_str())
    }
}

/// All four workspace destinations for one workspace, in channel order.
pub fn workspace_destinations(workspace_id: &WorkspaceId) -> [String; 4] {
    WorkspaceChannel::ALL.map(|channel| channel.destination(workspace_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_destinations_are_exact() {
        let id = WorkspaceId::new("12");
        assert_eq!(
            workspace_destinations(&id),
            [
                "/topic/workspace/12/tasks".to_string(),
                "/topic/workspace/12/presence".to_string(),
                "/topic/workspace/12/activity".to_string(),
                "/topic/workspace/12/cursors".to_string(),
            ]
        );
    }

    #[test]
    fn baseline_lookup_by_destination() {
        assert_eq!(
            BaselineTopic::from_destination("/user/queue/notifications"),
            Some(BaselineTopic::Notifications)
        );
        assert_eq!(BaselineTopic::from_destination("/topic/tasks"), Some(BaselineTopic::Tasks));
        assert_eq!(BaselineTopic::from_destination("/topic/workspace/1/tasks"), None);
    }
}
