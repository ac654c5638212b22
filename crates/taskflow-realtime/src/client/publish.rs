use serde::Serialize;
use taskflow_core::destinations::{
    CURSOR_UPDATE, TASK_UNWATCH, TASK_WATCH, TYPING_START, TYPING_STOP, WORKSPACE_JOIN,
    WORKSPACE_LEAVE,
};
use taskflow_core::messages::{CursorUpdate, TaskRef, TypingIndicator, WorkspaceRef};
use taskflow_core::{TaskId, WorkspaceId};
use tracing::{debug, trace, warn};

use super::RealtimeClient;
use crate::stomp::Frame;

impl RealtimeClient {
    /// Publish `payload` as JSON. Dropped without error when not connected;
    /// nothing is queued.
    pub fn send_message<T: Serialize + ?Sized>(&self, destination: &str, payload: &T) {
        let shared = self.inner.shared.lock();
        let Some(link) = shared.link.as_ref().filter(|_| shared.state.is_connected()) else {
            trace!(destination, "not connected, publish dropped");
            return;
        };
        let body = match serde_json::to_string(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!(destination, error = %e, "failed to serialize payload");
                return;
            }
        };
        if !link.send(&Frame::send_json(destination, body)) {
            debug!(destination, "link closed, publish dropped");
        }
    }

    pub fn join_workspace(&self, workspace_id: &WorkspaceId) {
        self.send_message(
            WORKSPACE_JOIN,
            &WorkspaceRef {
                workspace_id: workspace_id.clone(),
            },
        );
    }

    pub fn leave_workspace(&self, workspace_id: &WorkspaceId) {
        self.send_message(
            WORKSPACE_LEAVE,
            &WorkspaceRef {
                workspace_id: workspace_id.clone(),
            },
        );
    }

    pub fn watch_task(&self, task_id: &TaskId) {
        self.send_message(
            TASK_WATCH,
            &TaskRef {
                task_id: task_id.clone(),
            },
        );
    }

    pub fn unwatch_task(&self, task_id: &TaskId) {
        self.send_message(
            TASK_UNWATCH,
            &TaskRef {
                task_id: task_id.clone(),
            },
        );
    }

    pub fn update_cursor(&self, x: f64, y: f64, task_id: Option<&TaskId>) {
        self.send_message(
            CURSOR_UPDATE,
            &CursorUpdate {
                x,
                y,
                task_id: task_id.cloned(),
            },
        );
    }

    pub fn start_typing(&self, task_id: Option<&TaskId>) {
        self.send_message(
            TYPING_START,
            &TypingIndicator {
                task_id: task_id.cloned(),
            },
        );
    }

    pub fn stop_typing(&self, task_id: Option<&TaskId>) {
        self.send_message(
            TYPING_STOP,
            &TypingIndicator {
                task_id: task_id.cloned(),
            },
        );
    }
}
