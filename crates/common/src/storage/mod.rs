//! Storage primitives for encrypted databases
//!
//! SQLCipher-backed r2d2 pool and connection wrappers used by the infra
//! repositories.

pub mod error;
pub mod sqlcipher;

pub use error::{StorageError, StorageResult};
pub use sqlcipher::{
    apply_connection_pragmas, PoolHealth, SqlCipherConnection, SqlCipherPool, SqlCipherPoolConfig,
    SqlCipherStatement,
};
