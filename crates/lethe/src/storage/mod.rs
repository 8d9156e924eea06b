pub mod lance;
pub mod memory_store;
pub mod record;

pub use lance::LanceStore;
pub use memory_store::InMemoryStore;
pub use record::{
    Collection, Condition, OrderBy, RecordFilter, RecordQuery, RecordStore, SortOrder, fetch,
    to_record,
};
