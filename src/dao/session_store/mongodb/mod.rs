mod config;
mod error;
mod models;
/// Collection access and reconnect handling.
pub mod store;

pub use config::MongoConfig;
pub use error::MongoDaoError;
pub use store::MongoSessionStore;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        match err {
            MongoDaoError::DuplicateCode { code } => {
                StorageError::conflict(format!("session code `{code}` already in use"))
            }
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}
