use serde::{Deserialize, Serialize};

use crate::SerializableSecretString;
use crate::shared::{ValidationError, validate_required_host};

/// Connection settings for one database server in the replication topology.
///
/// The same shape is used for the relay and the slave side; which role the
/// server plays is decided by where the config is placed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerConnectionConfig {
    /// Hostname or IP address of the database server.
    pub host: String,
    /// Port number on which the server is listening.
    pub port: u16,
    /// Username for authenticating with the server.
    pub username: String,
    /// Password for the specified user. This field is sensitive and redacted in debug output.
    pub password: Option<SerializableSecretString>,
}

impl ServerConnectionConfig {
    /// Validates the connection settings.
    ///
    /// Checks that the host is present and well formed.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_required_host(&self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_redacted_in_debug_output() {
        let config: ServerConnectionConfig = serde_json::from_str(
            r#"{
                "host": "relay01",
                "port": 1433,
                "username": "replication",
                "password": "hunter2"
            }"#,
        )
        .unwrap();

        assert!(config.validate().is_ok());

        let rendered = format!("{config:?}");
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("hunter2"));
    }
}
