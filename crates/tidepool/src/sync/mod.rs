pub mod callback;
pub mod conflict;
pub mod scheduler;
pub mod synchronizer;

pub use callback::SyncCallback;
pub use conflict::{is_conflicting, SyncConflict};
pub use synchronizer::{SyncOptions, DEFAULT_MAX_RETRIES};
