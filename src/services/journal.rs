//! Operation journal: the authoritative stroke history of one room.
//!
//! DESIGN
//! ======
//! The journal is an append-ordered `Vec<Operation>` plus one undone stack per
//! author. An operation lives in exactly one of the two places at any time:
//! undo moves it from the journal to its author's stack, redo moves it back
//! to the *end* of the journal, clear drops both.
//!
//! Undo is per author. It scans backward for the requester's most recent
//! operation, so one author can never undo another's work. The scan is
//! O(journal length) per call, which is fine for short-lived rooms.
//!
//! TRADE-OFFS
//! ==========
//! Redo reinserts at the current end rather than the original position, so
//! when others drew in between, undo followed by redo reorders the history.
//! Recording new work does not discard pending redos.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::message::ErrorCode;
use crate::state::{Operation, OperationDraft, now_ms};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JournalError {
    #[error("duplicate operation id: {0}")]
    DuplicateOperation(String),
}

impl ErrorCode for JournalError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateOperation(_) => "E_DUPLICATE_OPERATION",
        }
    }
}

#[derive(Debug, Default)]
pub struct Journal {
    /// Recorded operations in arrival order.
    operations: Vec<Operation>,
    /// Author id -> operations removed by that author's undo, most recent last.
    undone: HashMap<String, Vec<Operation>>,
    /// Ids held in `operations` or any undone stack.
    ids: HashSet<String>,
}

impl Journal {
    /// Append an operation, assigning an id and timestamp when absent.
    /// Returns the operation as recorded.
    ///
    /// # Errors
    ///
    /// `DuplicateOperation` if the id is already in the journal or an undone
    /// stack. The journal is unchanged.
    pub fn record(&mut self, draft: OperationDraft) -> Result<Operation, JournalError> {
        let operation_id = draft
            .operation_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self.ids.contains(&operation_id) {
            return Err(JournalError::DuplicateOperation(operation_id));
        }

        let mut stroke = draft.stroke;
        stroke.drop_reserved();
        let operation = Operation {
            kind: draft.kind,
            operation_id,
            user_id: draft.user_id,
            user_name: draft.user_name,
            timestamp: draft.timestamp.unwrap_or_else(now_ms),
            stroke,
        };
        self.ids.insert(operation.operation_id.clone());
        self.operations.push(operation.clone());
        Ok(operation)
    }

    /// Move `user_id`'s most recent operation onto their undone stack.
    /// `None` when they have nothing left in the journal.
    pub fn undo(&mut self, user_id: &str) -> Option<Operation> {
        let index = self.operations.iter().rposition(|op| op.user_id == user_id)?;
        let operation = self.operations.remove(index);
        self.undone
            .entry(user_id.to_owned())
            .or_default()
            .push(operation.clone());
        Some(operation)
    }

    /// Pop `user_id`'s most recent undo and append it to the journal.
    /// `None` when their undone stack is empty.
    pub fn redo(&mut self, user_id: &str) -> Option<Operation> {
        let stack = self.undone.get_mut(user_id)?;
        let operation = stack.pop()?;
        if stack.is_empty() {
            self.undone.remove(user_id);
        }
        self.operations.push(operation.clone());
        Some(operation)
    }

    /// Drop every operation and every undone stack. Returns how many journal
    /// entries were removed.
    pub fn clear(&mut self) -> usize {
        if self.is_empty() && self.undone.is_empty() {
            return 0;
        }
        let removed = self.operations.len();
        self.operations.clear();
        self.undone.clear();
        self.ids.clear();
        removed
    }

    /// The journal in order, for initializing a newly joined participant.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Operation> {
        self.operations().to_vec()
    }

    #[must_use]
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Depth of `user_id`'s undone stack.
    #[must_use]
    pub fn undone_len(&self, user_id: &str) -> usize {
        self.undone.get(user_id).map_or(0, Vec::len)
    }

    /// Total entries across all undone stacks.
    #[must_use]
    pub fn undone_total(&self) -> usize {
        self.undone.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
#[path = "journal_test.rs"]
mod tests;
