use std::error;
use std::fmt;

/// Convenient result type for replication operations using [`CdcError`] as the error type.
///
/// This type alias reduces boilerplate when working with fallible replication
/// operations. Most functions in this crate return this type.
pub type CdcResult<T> = Result<T, CdcError>;

/// Main error type for replication operations.
///
/// [`CdcError`] can represent single errors, errors with additional detail, or
/// multiple aggregated errors collected from a worker fan-out. The design allows
/// for rich error information while maintaining ergonomic usage patterns.
#[derive(Debug, Clone)]
pub struct CdcError {
    repr: ErrorRepr,
}

/// Internal representation of error data.
///
/// This enum supports different error patterns while maintaining a unified interface.
/// Users should not interact with this type directly but use [`CdcError`] methods instead.
#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Error with kind and static description
    WithDescription(ErrorKind, &'static str),
    /// Error with kind, static description, and dynamic detail
    WithDescriptionAndDetail(ErrorKind, &'static str, String),
    /// Multiple aggregated errors
    Many(Vec<CdcError>),
}

/// Specific categories of errors that can occur during replication.
///
/// Error kinds are organized by functional area and failure mode; callers
/// dispatch on them to decide whether a failure is expected absence, a
/// table-local failure, or a run-level infrastructure failure.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
#[non_exhaustive]
pub enum ErrorKind {
    // Ledger Errors
    LedgerQueryFailed,
    InvalidBatchState,

    // Destination & Apply Errors
    DestinationQueryFailed,
    ApplyFailed,

    // Copy & Discovery Errors
    CopyFailed,
    /// A captured-change table does not exist because no changes occurred.
    /// Always non-fatal and treated as "zero changes".
    ChangeTableMissing,

    // Schema Errors
    SchemaChangeFailed,
    /// Per-shard field lists for the same table disagree; merging them would
    /// silently corrupt data, so the whole batch is aborted and reverted.
    SchemaDrift,

    // Configuration Errors
    ConfigError,

    // Data Errors
    InvalidData,

    // Concurrency Errors
    WorkerPanic,

    // Unknown / Uncategorized
    Unknown,
}

impl CdcError {
    /// Creates a [`CdcError`] containing multiple aggregated errors.
    ///
    /// This is useful when multiple fan-out units fail and all failures should
    /// be reported rather than just the first one.
    pub fn many(errors: Vec<CdcError>) -> CdcError {
        CdcError {
            repr: ErrorRepr::Many(errors),
        }
    }

    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For multiple errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the error list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => kind,
            ErrorRepr::Many(ref errors) => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error.
    ///
    /// For single errors, returns a vector with one element. For multiple errors,
    /// returns a flattened vector of all error kinds.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::WithDescription(kind, _)
            | ErrorRepr::WithDescriptionAndDetail(kind, _, _) => vec![kind],
            ErrorRepr::Many(ref errors) => errors
                .iter()
                .flat_map(|err| err.kinds())
                .collect::<Vec<_>>(),
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For multiple errors, returns the detail of the first error that has one.
    /// Returns [`None`] if no detailed information is available.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::WithDescriptionAndDetail(_, _, ref detail) => Some(detail.as_str()),
            ErrorRepr::Many(ref errors) => {
                // For multiple errors, return the detail of the first error that has one
                errors.iter().find_map(|e| e.detail())
            }
            _ => None,
        }
    }
}

impl PartialEq for CdcError {
    fn eq(&self, other: &CdcError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::WithDescription(kind_a, _), ErrorRepr::WithDescription(kind_b, _)) => {
                kind_a == kind_b
            }
            (
                ErrorRepr::WithDescriptionAndDetail(kind_a, _, _),
                ErrorRepr::WithDescriptionAndDetail(kind_b, _, _),
            ) => kind_a == kind_b,
            (ErrorRepr::Many(errors_a), ErrorRepr::Many(errors_b)) => {
                errors_a.len() == errors_b.len()
                    && errors_a.iter().zip(errors_b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl fmt::Display for CdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match self.repr {
            ErrorRepr::WithDescription(kind, desc) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;

                Ok(())
            }
            ErrorRepr::WithDescriptionAndDetail(kind, desc, ref detail) => {
                fmt::Debug::fmt(&kind, f)?;
                f.write_str(": ")?;
                desc.fmt(f)?;
                f.write_str(" -> ")?;
                detail.fmt(f)?;

                Ok(())
            }
            ErrorRepr::Many(ref errors) => {
                if errors.is_empty() {
                    write!(f, "Multiple errors occurred (empty)")?;
                } else if errors.len() == 1 {
                    // If there's only one error, just display it directly
                    errors[0].fmt(f)?;
                } else {
                    write!(f, "Multiple errors occurred ({} total):", errors.len())?;
                    for (i, error) in errors.iter().enumerate() {
                        write!(f, "\n  {}: {}", i + 1, error)?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl error::Error for CdcError {}

/// Creates a [`CdcError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for CdcError {
    fn from((kind, desc): (ErrorKind, &'static str)) -> CdcError {
        CdcError {
            repr: ErrorRepr::WithDescription(kind, desc),
        }
    }
}

/// Creates a [`CdcError`] from an error kind, static description, and dynamic detail.
impl From<(ErrorKind, &'static str, String)> for CdcError {
    fn from((kind, desc, detail): (ErrorKind, &'static str, String)) -> CdcError {
        CdcError {
            repr: ErrorRepr::WithDescriptionAndDetail(kind, desc, detail),
        }
    }
}

/// Creates a [`CdcError`] from a vector of errors for aggregation.
impl<E> From<Vec<E>> for CdcError
where
    E: Into<CdcError>,
{
    fn from(errors: Vec<E>) -> CdcError {
        CdcError {
            repr: ErrorRepr::Many(errors.into_iter().map(Into::into).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdc_error;

    #[test]
    fn test_kind_of_single_error() {
        let err = cdc_error!(ErrorKind::ChangeTableMissing, "change table does not exist");

        assert_eq!(err.kind(), ErrorKind::ChangeTableMissing);
        assert_eq!(err.detail(), None);
    }

    #[test]
    fn test_kinds_of_aggregated_errors() {
        let err = CdcError::many(vec![
            cdc_error!(ErrorKind::ApplyFailed, "apply failed"),
            cdc_error!(ErrorKind::CopyFailed, "copy failed", "timeout"),
        ]);

        assert_eq!(err.kind(), ErrorKind::ApplyFailed);
        assert_eq!(err.kinds(), vec![ErrorKind::ApplyFailed, ErrorKind::CopyFailed]);
        assert_eq!(err.detail(), Some("timeout"));
    }

    #[test]
    fn test_display_of_aggregated_errors() {
        let err = CdcError::many(vec![
            cdc_error!(ErrorKind::ApplyFailed, "apply failed"),
            cdc_error!(ErrorKind::CopyFailed, "copy failed"),
        ]);

        let rendered = err.to_string();
        assert!(rendered.contains("2 total"));
        assert!(rendered.contains("apply failed"));
        assert!(rendered.contains("copy failed"));
    }
}
