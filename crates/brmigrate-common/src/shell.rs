//! Shell execution for iproute2.
//!
//! Every mutation and every structured query goes through `/bin/sh -c`
//! with device names quoted by [`shellquote`], so a rendered command can
//! be pasted back into a terminal verbatim.
//!
//! # Example
//!
//! ```ignore
//! use brmigrate_common::shell::{self, IP_CMD, shellquote};
//!
//! let cmd = format!("{} link set dev {} mtu {}", IP_CMD, shellquote("eth0"), 9000);
//! let out = shell::exec(&cmd).await?;
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{MigrateError, MigrateResult};

/// `ip`: links, addresses and routes.
pub const IP_CMD: &str = "/sbin/ip";

/// `bridge`: bridge port attributes.
pub const BRIDGE_CMD: &str = "/sbin/bridge";

const SHELL: &str = "/bin/sh";

/// Kernel message for operations attempted without CAP_NET_ADMIN.
const EPERM_MESSAGE: &str = "Operation not permitted";

/// Characters that keep a special meaning inside double quotes
static DQUOTE_SPECIAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"([$`"\\\n])"#).expect("static pattern"));

/// Wrap `s` in double quotes, backslash-escaping `$`, `` ` ``, `"`, `\`
/// and newline.
///
/// ```
/// use brmigrate_common::shell::shellquote;
///
/// assert_eq!(shellquote("br0"), "\"br0\"");
/// assert_eq!(shellquote("a$b"), "\"a\\$b\"");
/// ```
pub fn shellquote(s: &str) -> String {
    format!("\"{}\"", DQUOTE_SPECIAL.replace_all(s, r"\$1"))
}

/// Returns true if the tool at `path` exists on this host.
pub fn tool_available(path: &str) -> bool {
    Path::new(path).exists()
}

/// Captured outcome of one command
#[derive(Debug, Clone)]
pub struct ExecResult {
    /// Exit status; -1 when the process was killed by a signal
    pub exit_code: i32,
    /// Trimmed stdout
    pub stdout: String,
    /// Trimmed stderr
    pub stderr: String,
}

impl ExecResult {
    /// Exit status was zero
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout and stderr joined by a newline, skipping whichever is empty
    pub fn combined_output(&self) -> String {
        [self.stdout.as_str(), self.stderr.as_str()]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Run `cmd` under `/bin/sh -c`.
///
/// Only a spawn failure is an `Err`; a non-zero exit is reported in
/// [`ExecResult::exit_code`].
pub async fn exec(cmd: &str) -> MigrateResult<ExecResult> {
    debug!(command = %cmd, "exec");

    let output = Command::new(SHELL)
        .args(["-c", cmd])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| MigrateError::ShellExec {
            command: cmd.to_string(),
            source,
        })?;

    let result = ExecResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    };

    if !result.success() {
        warn!(
            command = %cmd,
            exit_code = result.exit_code,
            stderr = %result.stderr,
            "Command exited non-zero"
        );
    }
    Ok(result)
}

/// Run `cmd` and turn a non-zero exit into an error.
///
/// Output carrying the kernel's EPERM message becomes
/// [`MigrateError::PermissionDenied`]; anything else becomes
/// [`MigrateError::CommandFailed`].
pub async fn exec_or_throw(cmd: &str) -> MigrateResult<String> {
    let result = exec(cmd).await?;
    if result.success() {
        return Ok(result.stdout);
    }

    let output = result.combined_output();
    if output.contains(EPERM_MESSAGE) {
        return Err(MigrateError::permission_denied(format!("{}: {}", cmd, output)));
    }
    Err(MigrateError::CommandFailed {
        command: cmd.to_string(),
        exit_code: result.exit_code,
        output,
    })
}
