use std::sync::Arc;

use serde_json::Value;
use taskflow_core::destinations::workspace_destinations;
use taskflow_core::{RealtimeError, WorkspaceId};
use tracing::{debug, info, warn};

use super::RealtimeClient;
use crate::state::ConnectionState;
use crate::subscriptions::{ChannelCallback, Route};

impl RealtimeClient {
    /// Subscribe to the tasks, presence, activity and cursors channels of
    /// one workspace and announce the join. Connects first if needed.
    ///
    /// Subscribing a workspace twice keeps the first callback.
    pub async fn subscribe_to_workspace_channel<F>(
        &self,
        workspace_id: &WorkspaceId,
        callback: F,
    ) -> Result<(), RealtimeError>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let callback: ChannelCallback = Arc::new(callback);
        loop {
            match self.try_subscribe_workspace(workspace_id, &callback) {
                Ok(()) => break,
                Err(state) if state.is_pending() => {
                    debug!(workspace_id = %workspace_id, %state, "link not ready, retrying workspace subscribe");
                    tokio::time::sleep(self.inner.config.workspace_retry_delay).await;
                }
                Err(_) => self.connect().await?,
            }
        }
        self.join_workspace(workspace_id);
        Ok(())
    }

    fn try_subscribe_workspace(
        &self,
        workspace_id: &WorkspaceId,
        callback: &ChannelCallback,
    ) -> Result<(), ConnectionState> {
        let mut guard = self.inner.shared.lock();
        let shared = &mut *guard;
        let Some(link) = shared.link.as_ref().filter(|_| shared.state.is_connected()) else {
            return Err(shared.state);
        };

        let callback = Arc::clone(
            shared
                .channels
                .entry(workspace_id.clone())
                .or_insert_with(|| Arc::clone(callback)),
        );
        let mut added = 0;
        for destination in workspace_destinations(workspace_id) {
            if let Some(frame) = shared
                .subscriptions
                .subscribe(&destination, Route::Workspace(Arc::clone(&callback)))
            {
                link.send(&frame);
                added += 1;
            }
        }
        if added > 0 {
            info!(workspace_id = %workspace_id, "subscribed to workspace channels");
        }
        Ok(())
    }

    /// Drop the four channel subscriptions of one workspace. Other
    /// workspaces are untouched.
    pub fn unsubscribe_from_workspace_channel(&self, workspace_id: &WorkspaceId) {
        let mut guard = self.inner.shared.lock();
        let shared = &mut *guard;
        shared.channels.remove(workspace_id);
        for destination in workspace_destinations(workspace_id) {
            let Some(frame) = shared.subscriptions.unsubscribe(&destination) else {
                continue;
            };
            let sent = shared.link.as_ref().is_some_and(|link| link.send(&frame));
            if !sent {
                warn!(destination, "failed to send UNSUBSCRIBE");
            }
        }
        debug!(workspace_id = %workspace_id, "unsubscribed from workspace channels");
    }
}
