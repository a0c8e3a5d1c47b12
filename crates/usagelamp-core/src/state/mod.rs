mod status_file;
mod store;

pub use status_file::{DaemonStatusRecord, StatusFile};
pub use store::{SharedStore, SnapshotStore};
