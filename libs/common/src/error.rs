//! Custom error types for the common library
//!
//! This module defines the infrastructure error types shared by the portal
//! services: database connectivity and the cache/counter backends.

use redis::RedisError;
use sqlx::Error as SqlxError;
use thiserror::Error;

/// Custom error type for database operations
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Error occurred during database connection
    #[error("Database connection error: {0}")]
    Connection(#[source] SqlxError),

    /// Error occurred during database query execution
    #[error("Database query error: {0}")]
    Query(#[source] SqlxError),

    /// Configuration error
    #[error("Database configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with DatabaseError
pub type DatabaseResult<T> = Result<T, DatabaseError>;

/// Error type for cache and counter backends
#[derive(Error, Debug)]
pub enum CacheError {
    /// The backend could not be reached or rejected the command
    #[error("Cache backend error: {0}")]
    Backend(#[from] RedisError),

    /// A stored value could not be interpreted
    #[error("Cache value error: {0}")]
    Value(String),

    /// Configuration error
    #[error("Cache configuration error: {0}")]
    Configuration(String),
}

/// Type alias for Result with CacheError
pub type CacheResult<T> = Result<T, CacheError>;
