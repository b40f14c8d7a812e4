//! Mapping of sqlx errors onto [`InventoryError`].

use boxoffice_core::InventoryError;

/// SQLSTATE codes after which the whole transaction can simply be retried.
///
/// - `40001` `serialization_failure`
/// - `40P01` `deadlock_detected`
/// - `55P03` `lock_not_available` (raised by `lock_timeout`)
/// - `57014` `query_canceled` (raised by `statement_timeout`)
const RETRYABLE_SQLSTATES: [&str; 4] = ["40001", "40P01", "55P03", "57014"];

/// Classify a sqlx error.
///
/// Connectivity problems and the SQLSTATEs above are transient; everything
/// else is a storage fault.
pub(crate) fn map_sqlx(error: sqlx::Error) -> InventoryError {
    match &error {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            InventoryError::Transient(error.to_string())
        }
        sqlx::Error::Database(db) => {
            let code = db.code();
            match code.as_deref() {
                Some(code) if RETRYABLE_SQLSTATES.contains(&code) => {
                    if code == "55P03" {
                        metrics::counter!("inventory_lock_timeouts_total").increment(1);
                    }
                    tracing::debug!(sqlstate = code, %error, "Transient database error");
                    InventoryError::Transient(error.to_string())
                }
                _ => InventoryError::Storage(error.to_string()),
            }
        }
        _ => InventoryError::Storage(error.to_string()),
    }
}
