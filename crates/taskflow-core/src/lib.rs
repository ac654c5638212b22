//! Shared vocabulary for the taskflow realtime client: backend-assigned IDs,
//! broker destinations, typed logical events, outbound payloads and the
//! realtime error taxonomy.

pub mod destinations;
pub mod errors;
pub mod events;
pub mod ids;
pub mod messages;

pub use errors::{ErrorCategory, RealtimeError};
pub use events::{EventKey, RealtimeEvent};
pub use ids::{TaskId, WorkspaceId};
