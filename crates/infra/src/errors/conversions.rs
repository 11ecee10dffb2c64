//! Conversions from external infrastructure errors into domain errors.

use orgsync_common::storage::StorageError;
use orgsync_domain::OrgSyncError;
use reqwest::{Error as HttpError, StatusCode};
use rusqlite::Error as SqlError;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the domain error.
#[derive(Debug)]
pub struct InfraError(pub OrgSyncError);

impl From<InfraError> for OrgSyncError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<OrgSyncError> for InfraError {
    fn from(value: OrgSyncError) -> Self {
        InfraError(value)
    }
}

/// Extension trait to make the conversion logic explicit in tests and within
/// this module.
trait IntoOrgSyncError {
    fn into_orgsync(self) -> OrgSyncError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → OrgSyncError */
/* -------------------------------------------------------------------------- */

impl IntoOrgSyncError for SqlError {
    fn into_orgsync(self) -> OrgSyncError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        fn looks_like_wrong_key(message: &str) -> bool {
            let lower = message.to_ascii_lowercase();
            lower.contains("not a database") || lower.contains("encrypted")
        }

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match (err.code, err.extended_code) {
                    (ErrorCode::DatabaseBusy, _) => {
                        OrgSyncError::Database("database is busy".into())
                    }
                    (ErrorCode::DatabaseLocked, _) => {
                        OrgSyncError::Database("database is locked".into())
                    }
                    // SQLITE_CONSTRAINT_UNIQUE and SQLITE_CONSTRAINT_PRIMARYKEY
                    (ErrorCode::ConstraintViolation, 2067 | 1555) => {
                        OrgSyncError::Conflict(format!("unique constraint violation: {message}"))
                    }
                    (ErrorCode::ConstraintViolation, 787) => {
                        OrgSyncError::Database("foreign key constraint violation".into())
                    }
                    (_, _) if looks_like_wrong_key(&message) => OrgSyncError::Security(
                        "SQLCipher key rejected or database not encrypted".into(),
                    ),
                    _ => OrgSyncError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => OrgSyncError::NotFound("no rows returned by query".into()),
            RE::FromSqlConversionFailure(_, _, cause) => {
                OrgSyncError::Database(format!("failed to convert sqlite value: {cause}"))
            }
            RE::InvalidColumnType(_, _, ty) => {
                OrgSyncError::Database(format!("invalid column type: {ty}"))
            }
            RE::Utf8Error(_) => OrgSyncError::Database("invalid UTF-8 returned from sqlite".into()),
            RE::InvalidPath(path) => OrgSyncError::Database(format!(
                "invalid database path: {}",
                path.to_string_lossy()
            )),
            RE::InvalidQuery => OrgSyncError::Database("invalid SQL query".into()),
            other => OrgSyncError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_orgsync())
    }
}

/* -------------------------------------------------------------------------- */
/* StorageError → OrgSyncError */
/* -------------------------------------------------------------------------- */

impl IntoOrgSyncError for StorageError {
    fn into_orgsync(self) -> OrgSyncError {
        match self {
            StorageError::Rusqlite(err) => err.into_orgsync(),
            StorageError::WrongKeyOrNotEncrypted => OrgSyncError::Security(
                "SQLCipher key rejected or database not encrypted".into(),
            ),
            StorageError::Encryption(msg) => OrgSyncError::Security(msg),
            StorageError::InvalidConfig(msg) => OrgSyncError::Config(msg),
            StorageError::Timeout(secs) => {
                OrgSyncError::Database(format!("connection pool timed out after {secs}s"))
            }
            StorageError::SerdeJson(err) => {
                OrgSyncError::Internal(format!("stored JSON is invalid: {err}"))
            }
            other => OrgSyncError::Database(other.to_string()),
        }
    }
}

impl From<StorageError> for InfraError {
    fn from(value: StorageError) -> Self {
        InfraError(value.into_orgsync())
    }
}

/* -------------------------------------------------------------------------- */
/* serde_json::Error → OrgSyncError */
/* -------------------------------------------------------------------------- */

impl IntoOrgSyncError for serde_json::Error {
    fn into_orgsync(self) -> OrgSyncError {
        if self.is_data() || self.is_syntax() || self.is_eof() {
            OrgSyncError::InvalidInput(format!("malformed JSON: {self}"))
        } else {
            OrgSyncError::Internal(format!("JSON error: {self}"))
        }
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(value: serde_json::Error) -> Self {
        InfraError(value.into_orgsync())
    }
}

/* -------------------------------------------------------------------------- */
/* reqwest::Error → OrgSyncError */
/* -------------------------------------------------------------------------- */

impl IntoOrgSyncError for HttpError {
    fn into_orgsync(self) -> OrgSyncError {
        if self.is_timeout() {
            return OrgSyncError::Network("HTTP request timed out".into());
        }

        if self.is_connect() {
            return OrgSyncError::Network("HTTP connection failure".into());
        }

        if let Some(status) = self.status() {
            return status_error(status, "");
        }

        if self.is_decode() {
            return OrgSyncError::InvalidInput(format!("unexpected response body: {self}"));
        }

        OrgSyncError::Network(self.to_string())
    }
}

impl From<HttpError> for InfraError {
    fn from(value: HttpError) -> Self {
        InfraError(value.into_orgsync())
    }
}

/// Maps a non-success provider status onto the domain error taxonomy.
///
/// `410 Gone` is how calendar APIs reject stale sync tokens and delta links,
/// so it surfaces as [`OrgSyncError::SyncTokenExpired`].
pub fn status_error(status: StatusCode, detail: &str) -> OrgSyncError {
    let code = status.as_u16();
    let mut message = format!("HTTP {} {}", code, status.canonical_reason().unwrap_or("unknown status"));
    if !detail.is_empty() {
        message.push_str(": ");
        message.extend(detail.chars().take(300));
    }

    match code {
        401 | 403 => OrgSyncError::Auth(message),
        404 => OrgSyncError::NotFound(message),
        409 => OrgSyncError::Conflict(message),
        410 => OrgSyncError::SyncTokenExpired(message),
        429 => OrgSyncError::RateLimited(message),
        400..=499 => OrgSyncError::InvalidInput(message),
        _ => OrgSyncError::Network(message),
    }
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */
