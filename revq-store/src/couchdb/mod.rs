pub mod config;
pub mod store;

pub use config::CouchDbConfig;
pub use store::{CouchDbError, CouchDbStore};
