pub mod memstore;
pub mod persistence;
pub mod table;

pub use memstore::MemStore;
pub use persistence::Persistence;
pub use table::Table;
