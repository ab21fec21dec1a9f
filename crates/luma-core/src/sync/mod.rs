pub mod channel;
pub mod memory;
pub mod worker;

pub use channel::{ChangeEvent, ChangeStream, InboundMessage, RemoteChannel, SyncError};
pub use memory::MemoryHub;
pub use worker::{DataChange, SyncCommand, SyncWorker};
