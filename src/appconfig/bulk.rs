//! Outcome of applying one operation to many key-values.

use crate::error::AzCliError;

/// Successes and failures collected while looping over matching entries.
#[derive(Debug)]
pub struct BulkOutcome<T> {
    succeeded: Vec<T>,
    failed: Vec<(String, AzCliError)>,
}

impl<T> Default for BulkOutcome<T> {
    fn default() -> Self {
        BulkOutcome {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }
}

impl<T> BulkOutcome<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self, item: T) {
        self.succeeded.push(item);
    }

    pub fn failure(&mut self, description: impl Into<String>, err: AzCliError) {
        self.failed.push((description.into(), err));
    }

    /// Fails only when every item failed; partial failures are logged and
    /// the successes returned.
    pub fn finish(self, operation: &str) -> crate::Result<Vec<T>> {
        if self.failed.is_empty() {
            return Ok(self.succeeded);
        }
        if self.succeeded.is_empty() {
            let last = self
                .failed
                .last()
                .map(|(_, e)| e.to_string())
                .unwrap_or_default();
            return Err(AzCliError::Cli(format!(
                "{} operation failed. {}",
                operation, last
            )));
        }
        let failures: Vec<String> = self
            .failed
            .iter()
            .map(|(item, e)| format!("{}: {}", item, e))
            .collect();
        tracing::error!(
            operation,
            failed = self.failed.len(),
            succeeded = self.succeeded.len(),
            "{} partially completed. Failed for: {}",
            operation,
            failures.join("; ")
        );
        Ok(self.succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_ok() {
        let outcome: BulkOutcome<u32> = BulkOutcome::new();
        assert!(outcome.finish("Delete").unwrap().is_empty());
    }

    #[test]
    fn test_all_failed_is_error() {
        let mut outcome: BulkOutcome<u32> = BulkOutcome::new();
        outcome.failure("a", AzCliError::Cli("locked".into()));
        outcome.failure("b", AzCliError::Cli("gone".into()));
        let err = outcome.finish("Delete").unwrap_err();
        assert_eq!(err.to_string(), "Delete operation failed. gone");
    }

    #[test]
    fn test_partial_failure_returns_successes() {
        let mut outcome = BulkOutcome::new();
        outcome.success(1);
        outcome.failure("b", AzCliError::Cli("locked".into()));
        assert_eq!(outcome.finish("Delete").unwrap(), vec![1]);
    }
}
