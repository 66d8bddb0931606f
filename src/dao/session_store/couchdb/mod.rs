mod config;
mod error;
mod models;
mod store;

pub use config::CouchConfig;
pub use error::CouchDaoError;
pub use store::CouchSessionStore;

use crate::dao::storage::StorageError;

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::DuplicateCode { code } => {
                StorageError::conflict(format!("session code `{code}` already in use"))
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
