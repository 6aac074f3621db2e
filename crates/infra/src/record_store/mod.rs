//! Append-only record store boundary.
//!
//! Every durable state change of the stock ledger and the purchasing
//! components is one [`StockRecord`]. The store keeps them in order and
//! maintains the ledger snapshot used to reload quantities on restart; the
//! remaining state is folded back from the records by [`RecoveredState`].

pub mod in_memory;
pub mod record;
pub mod recorder;
pub mod recovery;
pub mod r#trait;

pub use in_memory::InMemoryRecordStore;
pub use record::{RecordBody, StockRecord, StoredRecord};
pub use recorder::StoreRecorder;
pub use recovery::RecoveredState;
pub use r#trait::RecordStore;
