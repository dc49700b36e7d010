//! Error types for bridge migration.
//!
//! Every failing step of a migration run surfaces as one [`MigrateError`].
//! All errors implement `std::error::Error` via `thiserror`.

use std::io;
use thiserror::Error;

/// Result type alias for migration operations.
pub type MigrateResult<T> = Result<T, MigrateError>;

/// Errors that can occur while inspecting or migrating an interface.
#[derive(Debug, Error)]
pub enum MigrateError {
    /// The named interface does not exist on the host.
    #[error("Interface '{name}' not found")]
    InterfaceNotFound {
        /// The interface name.
        name: String,
    },

    /// An address was removed from the source but could not be added to the bridge.
    #[error(
        "Address {address} removed from '{source_iface}' but not added to '{bridge}': {output}{hint}",
        hint = restore_hint(.unreplayed)
    )]
    AddressMigrationIncomplete {
        /// The orphaned address in CIDR notation.
        address: String,
        /// The interface the address was taken from.
        source_iface: String,
        /// The bridge that should now hold it.
        bridge: String,
        /// Kernel tool output.
        output: String,
        /// `ip route add` commands for routes the run never replayed.
        unreplayed: Vec<String>,
    },

    /// A route could not be re-homed onto the bridge.
    #[error(
        "Failed to migrate route '{route}' to '{bridge}': {output}{hint}",
        hint = restore_hint(.unreplayed)
    )]
    RouteMigrationFailed {
        /// The route as rendered for the bridge.
        route: String,
        /// The bridge name.
        bridge: String,
        /// Kernel tool output.
        output: String,
        /// `ip route add` commands for routes the run never replayed,
        /// the failed one included.
        unreplayed: Vec<String>,
    },

    /// The kernel refused to attach the interface to the bridge.
    #[error("Failed to enslave '{iface}' to '{bridge}': {output}")]
    EnslavementFailed {
        /// The interface being enslaved.
        iface: String,
        /// The bridge name.
        bridge: String,
        /// Kernel tool output.
        output: String,
    },

    /// A required kernel configuration utility is missing.
    #[error("Required tool '{tool}' is not available")]
    ToolingUnavailable {
        /// Path of the missing tool.
        tool: String,
    },

    /// The process lacks the privilege to reconfigure the network.
    #[error("Permission denied: {message}")]
    PermissionDenied {
        /// Error message.
        message: String,
    },

    /// A device with the bridge's name exists but is not a bridge.
    #[error("Device '{name}' exists but is not a bridge (kind: {kind})")]
    NotABridge {
        /// The device name.
        name: String,
        /// The device's link kind.
        kind: String,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Shell command returned non-zero exit code.
    #[error("Shell command failed: '{command}' (exit code {exit_code}): {output}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
        /// Combined stdout/stderr output.
        output: String,
    },

    /// Structured query output could not be decoded.
    #[error("Failed to parse output of '{query}': {message}")]
    QueryParse {
        /// The query that produced the output.
        query: String,
        /// Error message.
        message: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },
}

/// The kernel drops a source route once its gateway loses reachability,
/// so a run that stops mid-way cannot rediscover it.
fn restore_hint(unreplayed: &[String]) -> String {
    if unreplayed.is_empty() {
        return String::new();
    }
    format!("; routes not replayed, restore with: {}", unreplayed.join("; "))
}

impl MigrateError {
    /// Creates an interface not found error.
    pub fn interface_not_found(name: impl Into<String>) -> Self {
        Self::InterfaceNotFound { name: name.into() }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates a query parse error.
    pub fn query_parse(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self::QueryParse {
            query: query.into(),
            message: message.into(),
        }
    }

    /// Creates a permission denied error.
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: message.into(),
        }
    }

    /// Attach the routes an aborted run left unreplayed.
    ///
    /// Only address and route migration failures carry the list; other
    /// errors are returned unchanged.
    pub fn with_unreplayed_routes(mut self, routes: Vec<String>) -> Self {
        match &mut self {
            MigrateError::AddressMigrationIncomplete { unreplayed, .. }
            | MigrateError::RouteMigrationFailed { unreplayed, .. } => *unreplayed = routes,
            _ => {}
        }
        self
    }

    /// Returns the kernel tool output attached to a command failure, if any.
    pub fn command_output(&self) -> Option<&str> {
        match self {
            MigrateError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }

    /// Process exit code reported by the `migrate` binary.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::InvalidConfig { .. } => 2,
            MigrateError::InterfaceNotFound { .. } | MigrateError::NotABridge { .. } => 3,
            MigrateError::AddressMigrationIncomplete { .. } => 4,
            MigrateError::RouteMigrationFailed { .. } => 5,
            MigrateError::EnslavementFailed { .. } => 6,
            MigrateError::ToolingUnavailable { .. } => 7,
            MigrateError::PermissionDenied { .. } => 8,
            MigrateError::ShellExec { .. }
            | MigrateError::CommandFailed { .. }
            | MigrateError::QueryParse { .. } => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MigrateError::interface_not_found("eth0");
        assert_eq!(err.to_string(), "Interface 'eth0' not found");
    }

    #[test]
    fn test_address_migration_incomplete_names_address() {
        let err = MigrateError::AddressMigrationIncomplete {
            address: "192.168.1.5/24".to_string(),
            source_iface: "eth0".to_string(),
            bridge: "br0".to_string(),
            output: "RTNETLINK answers: File exists".to_string(),
            unreplayed: Vec::new(),
        };
        assert!(err.to_string().contains("192.168.1.5/24"));
        assert!(err.to_string().contains("eth0"));
        assert!(err.to_string().contains("br0"));
        assert!(!err.to_string().contains("restore with"));
    }

    #[test]
    fn test_route_failure_lists_restore_commands() {
        let err = MigrateError::RouteMigrationFailed {
            route: "default via 192.168.1.1 dev br0".to_string(),
            bridge: "br0".to_string(),
            output: "RTNETLINK answers: Invalid argument".to_string(),
            unreplayed: Vec::new(),
        }
        .with_unreplayed_routes(vec![
            "/sbin/ip -4 route add default via 192.168.1.1 dev \"br0\"".to_string(),
        ]);
        assert!(err
            .to_string()
            .ends_with("restore with: /sbin/ip -4 route add default via 192.168.1.1 dev \"br0\""));
        assert_eq!(err.exit_code(), 5);

        let other = MigrateError::interface_not_found("eth0").with_unreplayed_routes(vec!["x".into()]);
        assert_eq!(other.to_string(), "Interface 'eth0' not found");
    }

    #[test]
    fn test_command_failed() {
        let err = MigrateError::CommandFailed {
            command: "ip link set dev eth0 mtu 9100".to_string(),
            exit_code: 2,
            output: "Cannot find device".to_string(),
        };
        assert!(err.to_string().contains("ip link set dev"));
        assert!(err.to_string().contains("exit code 2"));
        assert_eq!(err.command_output(), Some("Cannot find device"));
    }

    #[test]
    fn test_exit_codes_are_distinct_and_nonzero() {
        let errors = [
            MigrateError::invalid_config("ageing_time", "out of range"),
            MigrateError::interface_not_found("eth0"),
            MigrateError::ToolingUnavailable {
                tool: "/sbin/ip".to_string(),
            },
            MigrateError::permission_denied("not root"),
        ];
        let codes: Vec<u8> = errors.iter().map(|e| e.exit_code()).collect();
        assert_eq!(codes, vec![2, 3, 7, 8]);
        assert!(codes.iter().all(|c| *c != 0));
    }
}
