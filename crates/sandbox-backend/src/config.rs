use serde::{Deserialize, Serialize};

/// Configuration for a sandbox backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SandboxConfig {
    /// Shell-driven backend running commands on this host
    Local {
        /// Directory commands run in and relative paths resolve against
        root: std::path::PathBuf,
        /// Cap on captured command output, in bytes
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_output_bytes: Option<usize>,
    },
    /// Backend speaking the sandbox I/O protocol
    Remote {
        /// Address of the sandbox I/O service (e.g., "http://localhost:50051")
        endpoint: String,
        /// Identifier to report instead of asking the service
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sandbox_id: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tagged_json() {
        let local: SandboxConfig =
            serde_json::from_str(r#"{"type": "local", "root": "/work"}"#).unwrap();
        assert_eq!(
            local,
            SandboxConfig::Local {
                root: "/work".into(),
                max_output_bytes: None,
            }
        );

        let remote: SandboxConfig = serde_json::from_str(
            r#"{"type": "remote", "endpoint": "http://sandbox:50051", "sandbox_id": "box-1"}"#,
        )
        .unwrap();
        assert_eq!(
            remote,
            SandboxConfig::Remote {
                endpoint: "http://sandbox:50051".to_string(),
                sandbox_id: Some("box-1".to_string()),
            }
        );
    }

    #[test]
    fn rejects_unknown_kind() {
        assert!(serde_json::from_str::<SandboxConfig>(r#"{"type": "docker"}"#).is_err());
    }
}
