pub mod clock;
pub mod framing;
mod error;
mod store;
mod types;

pub use clock::{CivilTime, Clock, ManualClock, SystemClock, civil_from_ms, now_ms};
pub use error::{ErrorKind, StoreError};
pub use store::{StatusSlot, Store, StoreResult};
pub use types::{Batch, LogEntry, LogRequest, LogResponse, LogResult};
