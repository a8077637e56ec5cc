//! Runner configuration.

use serde::{Deserialize, Serialize};

use crate::ledger::DEFAULT_LEDGER_TABLE;

/// Settings for a [`MigrationRunner`](crate::runner::MigrationRunner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Name of the ledger table. The lock table is `<ledger_table>_lock`.
    pub ledger_table: String,
    /// Identity written into the lock record.
    pub lock_owner: String,
    /// Compile and report statements without executing them.
    pub dry_run: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            ledger_table: DEFAULT_LEDGER_TABLE.to_string(),
            lock_owner: default_lock_owner(),
            dry_run: false,
        }
    }
}

impl RunnerConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ledger table name.
    #[must_use]
    pub fn ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = table.into();
        self
    }

    /// Sets the lock owner identity.
    #[must_use]
    pub fn lock_owner(mut self, owner: impl Into<String>) -> Self {
        self.lock_owner = owner.into();
        self
    }

    /// Enables or disables dry-run mode.
    #[must_use]
    pub const fn dry_run(mut self, enabled: bool) -> Self {
        self.dry_run = enabled;
        self
    }
}

fn default_lock_owner() -> String {
    format!("strata-{}", std::process::id())
}
