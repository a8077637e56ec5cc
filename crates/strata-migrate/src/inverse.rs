//! Inference of inverse change sets.
//!
//! A change set recorded from a migration's `change` logic is undone by
//! inverting every operation and replaying them last-to-first. Operations
//! that destroy a definition (drops without a restore definition, raw
//! statements) cannot be inverted, and neither can a set whose
//! create-versus-update intent was decided at run time.

use crate::operations::{ChangeIntent, ChangeOperation, ChangeSet};

/// Why a change set could not be inverted.
#[derive(Debug, Clone, PartialEq)]
pub enum Irreversible {
    /// The set contains an operation without an inverse.
    Operation(ChangeOperation),
    /// The set was committed with `save()`.
    AmbiguousIntent {
        /// Table of the ambiguous set.
        table: String,
    },
}

/// Returns the inverse of a single operation, or `None` if it has none.
#[must_use]
pub fn invert_operation(op: &ChangeOperation) -> Option<ChangeOperation> {
    match op {
        ChangeOperation::CreateTable { table, options } => Some(ChangeOperation::DropTable {
            table: table.clone(),
            definition: Some(options.clone()),
        }),

        ChangeOperation::DropTable {
            table,
            definition: Some(options),
        } => Some(ChangeOperation::CreateTable {
            table: table.clone(),
            options: options.clone(),
        }),

        ChangeOperation::RenameTable { from, to } => Some(ChangeOperation::RenameTable {
            from: to.clone(),
            to: from.clone(),
        }),

        ChangeOperation::AddColumn { table, column } => Some(ChangeOperation::DropColumn {
            table: table.clone(),
            name: column.name.clone(),
            definition: Some(column.clone()),
        }),

        ChangeOperation::DropColumn {
            table,
            definition: Some(column),
            ..
        } => Some(ChangeOperation::AddColumn {
            table: table.clone(),
            column: column.clone(),
        }),

        ChangeOperation::RenameColumn { table, from, to } => {
            Some(ChangeOperation::RenameColumn {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            })
        }

        ChangeOperation::AddIndex {
            table,
            columns,
            options,
        } => Some(ChangeOperation::DropIndex {
            table: table.clone(),
            columns: columns.clone(),
            definition: Some(options.clone()),
        }),

        ChangeOperation::DropIndex {
            table,
            columns,
            definition: Some(options),
        } => Some(ChangeOperation::AddIndex {
            table: table.clone(),
            columns: columns.clone(),
            options: options.clone(),
        }),

        ChangeOperation::AddForeignKey { table, foreign_key } => {
            Some(ChangeOperation::DropForeignKey {
                table: table.clone(),
                columns: foreign_key.columns.clone(),
                definition: Some(foreign_key.clone()),
            })
        }

        ChangeOperation::DropForeignKey {
            table,
            definition: Some(foreign_key),
            ..
        } => Some(ChangeOperation::AddForeignKey {
            table: table.clone(),
            foreign_key: foreign_key.clone(),
        }),

        ChangeOperation::DropTable {
            definition: None, ..
        }
        | ChangeOperation::DropColumn {
            definition: None, ..
        }
        | ChangeOperation::DropIndex {
            definition: None, ..
        }
        | ChangeOperation::DropForeignKey {
            definition: None, ..
        }
        | ChangeOperation::Execute { .. } => None,
    }
}

/// Inverts a change set.
///
/// The whole set is scanned before anything is built, and the first
/// offending operation is reported. The inverse lists the inverted
/// operations in reverse order and starts from the table name the forward
/// set ends with.
pub fn invert(change_set: &ChangeSet) -> Result<ChangeSet, Irreversible> {
    if change_set.intent() == ChangeIntent::Ambiguous {
        return Err(Irreversible::AmbiguousIntent {
            table: change_set.table().to_string(),
        });
    }

    let mut inverted = Vec::with_capacity(change_set.len());
    for op in change_set.operations() {
        match invert_operation(op) {
            Some(inverse) => inverted.push(inverse),
            None => return Err(Irreversible::Operation(op.clone())),
        }
    }
    inverted.reverse();

    let intent = match change_set.intent() {
        ChangeIntent::Create => ChangeIntent::Drop,
        ChangeIntent::Drop => ChangeIntent::Create,
        other => other,
    };

    Ok(ChangeSet::new(change_set.final_table(), intent, inverted))
}

/// Inverts every change set of a migration.
///
/// Sets are checked in forward order, so the first offending set is the
/// one reported. The result runs the last forward set's inverse first.
pub fn invert_all(change_sets: &[ChangeSet]) -> Result<Vec<ChangeSet>, Irreversible> {
    let mut inverses = change_sets
        .iter()
        .map(invert)
        .collect::<Result<Vec<_>, _>>()?;
    inverses.reverse();
    Ok(inverses)
}
