use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for the MongoDB store.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures raised by the MongoDB session store.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum MongoDaoError {
    /// The connection URI could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// The driver refused the parsed options.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// The server never answered a ping while connecting.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// A readiness ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// Index creation failed at startup.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// Another active session already holds the code.
    #[error("session code `{code}` is already taken")]
    DuplicateCode { code: String },
    /// Inserting a new record failed.
    #[error("failed to insert session `{id}`")]
    InsertSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// A lookup by id or code failed.
    #[error("failed to load session `{key}`")]
    LoadSession {
        key: String,
        #[source]
        source: MongoError,
    },
    /// A conditional update failed.
    #[error("failed to update session `{id}`")]
    UpdateSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    /// A game-state value could not be converted to BSON.
    #[error("failed to encode game state patch for session `{id}`")]
    EncodePatch {
        id: Uuid,
        #[source]
        source: mongodb::bson::error::Error,
    },
    /// A stored `_id` is not a UUID.
    #[error("stored session `{key}` has a malformed identifier")]
    MalformedId { key: String },
    /// The expiry sweep failed.
    #[error("failed to delete stale sessions")]
    DeleteStale {
        #[source]
        source: MongoError,
    },
}
