//! Verification helpers for applied commands and gate traces

use thiserror::Error;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Expected a command containing '{expected}', got {actual:?}")]
    CommandMissing { expected: String, actual: Vec<String> },

    #[error("Command containing '{unexpected}' should not have run")]
    UnexpectedCommand { unexpected: String },

    #[error("Expected {expected} commands, found {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Expected '{first}' before '{second}'")]
    OrderMismatch { first: String, second: String },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Checks a list of commands, either applied by a host or recorded by a gate
pub struct CommandVerifier {
    commands: Vec<String>,
}

impl CommandVerifier {
    /// Create a verifier over `commands`
    pub fn new(commands: Vec<String>) -> Self {
        Self { commands }
    }

    /// Create a verifier over a gate trace, dropping step headers
    pub fn from_trace(trace: &[String]) -> Self {
        Self::new(
            trace
                .iter()
                .filter(|line| !line.starts_with('#'))
                .cloned()
                .collect(),
        )
    }

    fn position(&self, needle: &str) -> Option<usize> {
        self.commands.iter().position(|cmd| cmd.contains(needle))
    }

    /// Verify that a command containing `expected` ran
    pub fn assert_command_executed(&self, expected: &str) -> VerifyResult<()> {
        match self.position(expected) {
            Some(_) => Ok(()),
            None => Err(VerificationError::CommandMissing {
                expected: expected.to_string(),
                actual: self.commands.clone(),
            }),
        }
    }

    /// Verify that no command containing `unexpected` ran
    pub fn assert_command_not_executed(&self, unexpected: &str) -> VerifyResult<()> {
        match self.position(unexpected) {
            Some(_) => Err(VerificationError::UnexpectedCommand {
                unexpected: unexpected.to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Verify the number of commands
    pub fn assert_command_count(&self, expected: usize) -> VerifyResult<()> {
        let actual = self.commands.len();
        if actual != expected {
            Err(VerificationError::CountMismatch { expected, actual })
        } else {
            Ok(())
        }
    }

    /// Verify the first command matching `first` precedes the first matching `second`
    pub fn assert_ordered(&self, first: &str, second: &str) -> VerifyResult<()> {
        self.assert_command_executed(first)?;
        self.assert_command_executed(second)?;
        match (self.position(first), self.position(second)) {
            (Some(a), Some(b)) if a < b => Ok(()),
            _ => Err(VerificationError::OrderMismatch {
                first: first.to_string(),
                second: second.to_string(),
            }),
        }
    }

    /// All commands
    pub fn commands(&self) -> &[String] {
        &self.commands
    }
}
