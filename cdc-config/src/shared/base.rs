use thiserror::Error;

/// Errors that can occur during configuration validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required host name is missing or empty.
    #[error("Invalid connection config: a required host name is missing")]
    MissingHost,

    /// A host name contains characters that are never valid in a host.
    #[error("Invalid connection config: host `{0}` contains whitespace")]
    InvalidHost(String),

    /// The worker pool would be empty.
    #[error("Invalid configuration: `max_workers` must be greater than zero")]
    MaxWorkersZero,

    /// The slave identifier is missing.
    #[error("Invalid configuration: `slave_name` must be set for a slave agent")]
    MissingSlaveName,

    /// No tables are configured for replication.
    #[error("At least one table must be configured")]
    NoTables,

    /// No shard databases are configured for a shard deployment.
    #[error("At least one shard database must be configured")]
    NoShardDatabases,

    /// The configured master shard is not part of the shard list.
    #[error("Invalid configuration: master shard `{0}` must be one of the shard databases")]
    MasterShardNotListed(String),

    /// General configuration validation error.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Validates a host name that is required for an agent to run.
///
/// A valid host is non-empty and contains no whitespace of any kind.
pub fn validate_required_host(host: &str) -> Result<(), ValidationError> {
    if host.is_empty() {
        return Err(ValidationError::MissingHost);
    }

    if host.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidHost(host.to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_required_host() {
        assert!(validate_required_host("relay01").is_ok());
        assert!(validate_required_host("relay01.internal").is_ok());

        assert!(validate_required_host("").is_err());
        assert!(validate_required_host(" ").is_err());
        assert!(validate_required_host("has space").is_err());
        assert!(validate_required_host("has\r\nnewline").is_err());
    }
}
