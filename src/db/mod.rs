pub mod store;
pub mod dbdocs;
pub mod memdocs;

pub use store::{DocumentStore, StoreError};
pub use dbdocs::PgDocumentStore;
pub use memdocs::MemoryDocumentStore;
