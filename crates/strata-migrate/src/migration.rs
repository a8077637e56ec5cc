//! Migration descriptors.
//!
//! A [`Migration`] pairs a version and name with its logic: either an
//! explicit `up`/`down` pair or a single reversible `change`. Logic is a
//! plain function pointer returning a boxed future, so migration sets can
//! be assembled as ordinary values and handed to the runner.
//!
//! ```rust
//! use strata_migrate::prelude::*;
//! use futures::future::BoxFuture;
//!
//! fn create_tags<'a>(schema: &'a mut Schema<'_>) -> BoxFuture<'a, Result<()>> {
//!     Box::pin(async move {
//!         let tags = schema
//!             .table("tags")
//!             .add_column("label", ColumnType::String, ColumnOptions::new().limit(64));
//!         schema.create(tags).await
//!     })
//! }
//!
//! let migration = Migration::reversible(20240101120000, "create_tags", create_tags);
//! assert!(migration.is_reversible());
//! ```

use std::fmt;

use chrono::{DateTime, Datelike, Timelike, Utc};
use futures::future::BoxFuture;

use crate::context::Schema;
use crate::error::{MigrateError, Result};

/// Signature of a migration step.
pub type MigrationFn = for<'a, 'c> fn(&'a mut Schema<'c>) -> BoxFuture<'a, Result<()>>;

/// The logic of a migration.
#[derive(Clone, Copy)]
pub enum MigrationLogic {
    /// Separate forward and backward steps.
    Explicit {
        /// Forward step.
        up: MigrationFn,
        /// Backward step.
        down: MigrationFn,
    },
    /// A single step whose inverse is derived from what it records.
    Reversible {
        /// Forward step, also replayed in record mode to derive the inverse.
        change: MigrationFn,
    },
}

impl fmt::Debug for MigrationLogic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit { .. } => f.write_str("Explicit { up, down }"),
            Self::Reversible { .. } => f.write_str("Reversible { change }"),
        }
    }
}

/// A versioned migration.
#[derive(Debug, Clone)]
pub struct Migration {
    version: i64,
    name: String,
    logic: MigrationLogic,
}

impl Migration {
    /// Creates a migration with a single reversible `change` step.
    pub fn reversible(version: i64, name: impl Into<String>, change: MigrationFn) -> Self {
        Self {
            version,
            name: name.into(),
            logic: MigrationLogic::Reversible { change },
        }
    }

    /// Creates a migration with explicit `up` and `down` steps.
    pub fn explicit(
        version: i64,
        name: impl Into<String>,
        up: MigrationFn,
        down: MigrationFn,
    ) -> Self {
        Self {
            version,
            name: name.into(),
            logic: MigrationLogic::Explicit { up, down },
        }
    }

    /// Starts a builder that validates the combination of steps.
    pub fn builder(version: i64, name: impl Into<String>) -> MigrationBuilder {
        MigrationBuilder {
            version,
            name: name.into(),
            up: None,
            down: None,
            change: None,
        }
    }

    /// The migration version.
    #[must_use]
    pub const fn version(&self) -> i64 {
        self.version
    }

    /// The migration name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The migration logic.
    #[must_use]
    pub const fn logic(&self) -> &MigrationLogic {
        &self.logic
    }

    /// Returns true for `change` migrations.
    #[must_use]
    pub const fn is_reversible(&self) -> bool {
        matches!(self.logic, MigrationLogic::Reversible { .. })
    }

    /// The step run when applying.
    #[must_use]
    pub fn forward(&self) -> MigrationFn {
        match self.logic {
            MigrationLogic::Explicit { up, .. } => up,
            MigrationLogic::Reversible { change } => change,
        }
    }
}

/// Builder for [`Migration`].
#[derive(Clone)]
#[must_use = "call build() to obtain the migration"]
pub struct MigrationBuilder {
    version: i64,
    name: String,
    up: Option<MigrationFn>,
    down: Option<MigrationFn>,
    change: Option<MigrationFn>,
}

impl MigrationBuilder {
    /// Sets the forward step.
    pub fn up(mut self, up: MigrationFn) -> Self {
        self.up = Some(up);
        self
    }

    /// Sets the backward step.
    pub fn down(mut self, down: MigrationFn) -> Self {
        self.down = Some(down);
        self
    }

    /// Sets the reversible step.
    pub fn change(mut self, change: MigrationFn) -> Self {
        self.change = Some(change);
        self
    }

    /// Validates and builds the migration.
    ///
    /// A migration has either `change` alone or both `up` and `down`.
    pub fn build(self) -> Result<Migration> {
        let invalid = |reason: &str| MigrateError::InvalidDefinition {
            version: self.version,
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.version <= 0 {
            return Err(invalid("version must be positive"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }

        let logic = match (self.change, self.up, self.down) {
            (Some(_), Some(_), _) | (Some(_), _, Some(_)) => {
                return Err(invalid("defines both change and up/down"));
            }
            (Some(change), None, None) => MigrationLogic::Reversible { change },
            (None, Some(up), Some(down)) => MigrationLogic::Explicit { up, down },
            (None, Some(_), None) => return Err(invalid("defines up without down")),
            (None, None, Some(_)) => return Err(invalid("defines down without up")),
            (None, None, None) => return Err(invalid("defines neither change nor up/down")),
        };

        Ok(Migration {
            version: self.version,
            name: self.name,
            logic,
        })
    }
}

/// Derives a `YYYYMMDDHHMMSS` version from a timestamp.
#[must_use]
pub fn version_from_timestamp(timestamp: DateTime<Utc>) -> i64 {
    let date = i64::from(timestamp.year()) * 10_000
        + i64::from(timestamp.month()) * 100
        + i64::from(timestamp.day());
    let time = i64::from(timestamp.hour()) * 10_000
        + i64::from(timestamp.minute()) * 100
        + i64::from(timestamp.second());
    date * 1_000_000 + time
}
