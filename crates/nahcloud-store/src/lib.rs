pub mod error;
pub mod store;
pub mod memory;
pub mod sqlite_store;

pub use error::StoreError;
pub use store::Store;
pub use memory::InMemoryStore;
pub use sqlite_store::SqliteStore;
