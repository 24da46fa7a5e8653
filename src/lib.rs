pub mod cancel;
pub mod client;
pub mod decoder;
pub mod error;
pub mod events;
pub mod frame;
pub mod history;
pub mod init;
pub mod models;
pub mod persistence;
pub mod retry;
pub mod session;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::client::ResearchClient;
pub use crate::error::{ErrorKind, ResearchError, Result};
pub use crate::events::{EventKind, StreamEvent};
pub use crate::history::{HistoryStore, RecordPatch, RecordStatus, ResearchRecord};
pub use crate::transport::{HttpTransport, ResearchTransport};
