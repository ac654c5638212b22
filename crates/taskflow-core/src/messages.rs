//! Outbound payloads published to `/app/*` destinations.

use serde::{Deserialize, Serialize};

use crate::ids::{TaskId, WorkspaceId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceRef {
    pub workspace_id: WorkspaceId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRef {
    pub task_id: TaskId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdate {
    pub x: f64,
    pub y: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

/// Typing start/stop indicator. `taskId` is omitted when not typing in a task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn workspace_ref_wire_shape() {
        let msg = WorkspaceRef {
            workspace_id: WorkspaceId::new("7"),
        };
        assert_eq!(serde_json::to_value(&msg).unwrap(), json!({"workspaceId": "7"}));
    }

    #[test]
    fn cursor_omits_missing_task() {
        let msg = CursorUpdate {
            x: 10.0,
            y: 20.5,
            task_id: None,
        };
        assert_eq!(serde_json::to_value(&msg).unwrap(), json!({"x": 10.0, "y": 20.5}));

        let msg = CursorUpdate {
            task_id: Some(TaskId::new("t1")),
            ..msg
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({"x": 10.0, "y": 20.5, "taskId": "t1"})
        );
    }

    #[test]
    fn typing_indicator_empty_object() {
        assert_eq!(
            serde_json::to_value(TypingIndicator::default()).unwrap(),
            json!({})
        );
    }
}
