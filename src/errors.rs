use thiserror::Error;

/// Domain-specific error types for the chain indexer
#[derive(Error, Debug)]
pub enum IndexerError {
    /// Errors related to invalid hex or field formats
    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    /// Errors related to RPC connections and requests
    #[error("RPC connection failed: {message}")]
    RpcConnectionFailed { message: String },

    /// Errors when RPC requests timeout
    #[error("RPC request timed out after {timeout_seconds} seconds")]
    RpcTimeout { timeout_seconds: u64 },

    /// The node answered with a JSON-RPC error object
    #[error("RPC call {method} returned error {code}: {message}")]
    RpcResponse {
        method: String,
        code: i64,
        message: String,
    },

    /// Errors when a block is not found
    #[error("Block not found: {block_identifier}")]
    BlockNotFound { block_identifier: String },

    /// The block content could not be turned into a domain batch
    #[error("Failed to parse block {block_height}: {reason}")]
    BlockParse { block_height: i64, reason: String },

    /// Database connection errors
    #[error("Database connection failed: {message}")]
    DatabaseConnectionFailed { message: String },

    /// Database query errors
    #[error("Database query failed: {query}")]
    DatabaseQueryFailed { query: String },

    /// Configuration errors
    #[error("Configuration error: {parameter} - {message}")]
    ConfigurationError { parameter: String, message: String },

    /// Range errors for block operations
    #[error("Invalid block range: start={start}, end={end}")]
    InvalidBlockRange { start: i64, end: i64 },

    /// Generic internal errors
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl IndexerError {
    /// Create an invalid hex format error
    #[must_use]
    pub fn invalid_hex(value: &str) -> Self {
        Self::InvalidFormat {
            message: format!("Cannot parse hex value: '{value}'"),
        }
    }

    /// Create an invalid format error
    #[must_use]
    pub fn invalid_format(field_name: &str, message: &str) -> Self {
        Self::InvalidFormat {
            message: format!("Invalid {field_name}: {message}"),
        }
    }

    /// Create an RPC connection error
    pub fn rpc_connection(message: impl Into<String>) -> Self {
        Self::RpcConnectionFailed {
            message: message.into(),
        }
    }

    /// Create an RPC timeout error
    #[must_use]
    pub const fn rpc_timeout(timeout_seconds: u64) -> Self {
        Self::RpcTimeout { timeout_seconds }
    }

    /// Create an RPC error-response error
    pub fn rpc_response(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::RpcResponse {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// Create a block not found error
    pub fn block_not_found(block_identifier: impl Into<String>) -> Self {
        Self::BlockNotFound {
            block_identifier: block_identifier.into(),
        }
    }

    /// Create a block parse error
    pub fn block_parse(block_height: i64, reason: impl Into<String>) -> Self {
        Self::BlockParse {
            block_height,
            reason: reason.into(),
        }
    }

    /// Create a database connection error
    pub fn database_connection(message: impl Into<String>) -> Self {
        Self::DatabaseConnectionFailed {
            message: message.into(),
        }
    }

    /// Create a database query error
    pub fn database_query(query: impl Into<String>) -> Self {
        Self::DatabaseQueryFailed {
            query: query.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(parameter: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            parameter: parameter.into(),
            message: message.into(),
        }
    }

    /// Create an invalid block range error
    #[must_use]
    pub const fn invalid_range(start: i64, end: i64) -> Self {
        Self::InvalidBlockRange { start, end }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether the error comes from the infrastructure rather than from one block.
    ///
    /// Systemic errors stop the scheduler from advancing a cursor and trigger its
    /// backoff. Everything else is contained to the block that produced it.
    #[must_use]
    pub const fn is_systemic(&self) -> bool {
        matches!(
            self,
            Self::RpcConnectionFailed { .. }
                | Self::RpcTimeout { .. }
                | Self::DatabaseConnectionFailed { .. }
        )
    }
}

/// Result type alias for indexer operations
pub type Result<T> = std::result::Result<T, IndexerError>;

/// Convert from standard database errors
impl From<sqlx::Error> for IndexerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                Self::database_query(format!("Database error: {db_err}"))
            }
            sqlx::Error::PoolClosed => {
                Self::database_connection("Connection pool closed".to_string())
            }
            sqlx::Error::PoolTimedOut => {
                Self::database_connection("Connection pool timed out".to_string())
            }
            sqlx::Error::Io(e) => Self::database_connection(format!("IO error: {e}")),
            _ => Self::database_query(format!("SQLx error: {err}")),
        }
    }
}

/// Convert from reqwest errors
impl From<reqwest::Error> for IndexerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::rpc_timeout(30) // Default timeout assumption
        } else if err.is_connect() || err.is_request() {
            Self::rpc_connection(format!("Connection error: {err}"))
        } else {
            Self::rpc_connection(format!("Request error: {err}"))
        }
    }
}

/// Convert from serde JSON errors
impl From<serde_json::Error> for IndexerError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("JSON parsing error: {err}"))
    }
}

impl From<eyre::Report> for IndexerError {
    fn from(err: eyre::Report) -> Self {
        Self::internal(format!("{err:#}"))
    }
}
