//! Diesel and pool error mapping shared by the relay repositories.
//!
//! Every port error enum has a `connection` and a `query` constructor; the
//! helpers here pick between them so each adapter only supplies the
//! constructors.

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use tracing::debug;

use super::pool::PoolError;

/// Map a pool failure onto a port's connection error.
pub(crate) fn map_pool_error<E>(error: PoolError, connection: impl FnOnce(String) -> E) -> E {
    let message = match error {
        PoolError::Checkout { message } | PoolError::Build { message } => message,
    };
    connection(message)
}

/// Map a Diesel failure onto a port's query or connection error.
///
/// Database messages are logged at debug level only; port errors carry a
/// stable summary so SQL details never reach API responses.
pub(crate) fn map_diesel_error<E>(
    error: DieselError,
    operation: &'static str,
    query: impl FnOnce(String) -> E,
    connection: impl FnOnce(String) -> E,
) -> E {
    match &error {
        DieselError::DatabaseError(kind, info) => {
            debug!(?kind, message = info.message(), operation, "diesel operation failed");
        }
        other => debug!(error = %other, operation, "diesel operation failed"),
    }

    match error {
        DieselError::DatabaseError(DatabaseErrorKind::ClosedConnection, _) => {
            connection(format!("{operation}: database connection error"))
        }
        DieselError::DatabaseError(DatabaseErrorKind::SerializationFailure, _) => {
            query(format!("{operation}: serialization failure"))
        }
        DieselError::DatabaseError(DatabaseErrorKind::CheckViolation, _) => {
            query(format!("{operation}: check constraint violated"))
        }
        DieselError::NotFound => query(format!("{operation}: record not found")),
        DieselError::QueryBuilderError(_) => query(format!("{operation}: database query error")),
        _ => query(format!("{operation}: database error")),
    }
}

/// Convert a stored non-negative count to `u32`, flooring corrupt values at 0.
pub(crate) fn count_from_db(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

/// Convert a domain count to the `INTEGER` column type, saturating.
pub(crate) fn count_to_db(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[derive(Debug, PartialEq, Eq)]
    enum Mapped {
        Query(String),
        Connection(String),
    }

    fn map(error: DieselError) -> Mapped {
        map_diesel_error(error, "claim", Mapped::Query, Mapped::Connection)
    }

    #[rstest]
    fn closed_connection_is_a_connection_error() {
        let error = DieselError::DatabaseError(
            DatabaseErrorKind::ClosedConnection,
            Box::new("server closed the connection".to_owned()),
        );
        assert_eq!(
            map(error),
            Mapped::Connection("claim: database connection error".to_owned())
        );
    }

    #[rstest]
    #[case(DieselError::NotFound, "claim: record not found")]
    #[case(
        DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new("duplicate key value violates unique constraint".to_owned()),
        ),
        "claim: database error"
    )]
    #[case(
        DieselError::DatabaseError(
            DatabaseErrorKind::CheckViolation,
            Box::new("outbox_events_attempts_within_budget".to_owned()),
        ),
        "claim: check constraint violated"
    )]
    fn other_failures_are_query_errors(#[case] error: DieselError, #[case] expected: &str) {
        assert_eq!(map(error), Mapped::Query(expected.to_owned()));
    }

    #[rstest]
    fn database_details_are_not_leaked() {
        let error = DieselError::DatabaseError(
            DatabaseErrorKind::Unknown,
            Box::new("relation \"secret_table\" does not exist".to_owned()),
        );
        let Mapped::Query(message) = map(error) else {
            panic!("expected query error");
        };
        assert!(!message.contains("secret_table"));
    }

    #[rstest]
    fn pool_errors_keep_their_message() {
        let mapped = map_pool_error(PoolError::checkout("timed out"), Mapped::Connection);
        assert_eq!(mapped, Mapped::Connection("timed out".to_owned()));
    }

    #[rstest]
    #[case(-1, 0)]
    #[case(0, 0)]
    #[case(7, 7)]
    fn counts_floor_at_zero(#[case] stored: i32, #[case] expected: u32) {
        assert_eq!(count_from_db(stored), expected);
    }

    #[rstest]
    fn counts_saturate_on_write() {
        assert_eq!(count_to_db(u32::MAX), i32::MAX);
    }
}
