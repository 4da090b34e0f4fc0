pub mod store;

pub use store::MemoryDocStore;
