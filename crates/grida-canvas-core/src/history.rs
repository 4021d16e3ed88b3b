//! Undo/redo history built from command inverses.

use std::collections::VecDeque;

use crate::command::{self, Command, Patch};
use crate::document::Document;
use crate::error::CommandError;

/// Default number of undo entries to keep.
pub const DEFAULT_MAX_HISTORY: usize = 100;

#[derive(Debug, Clone)]
struct Transaction {
    label: String,
    inverses: Vec<Command>,
}

/// Inverse-command history.
///
/// Every recorded entry is the command that undoes one user-level change.
/// Undoing applies it and pushes the inverse of *that* onto the redo stack,
/// so redo is just undo in the other direction.
#[derive(Debug, Clone)]
pub struct History {
    undo_stack: VecDeque<Command>,
    redo_stack: Vec<Command>,
    max_depth: usize,
    transaction: Option<Transaction>,
}

impl Default for History {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl History {
    pub fn new(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: Vec::new(),
            max_depth: max_depth.max(1),
            transaction: None,
        }
    }

    /// Record the inverse of a change that was just applied.
    ///
    /// Inside a transaction the inverse is buffered; otherwise it becomes a
    /// new undo entry and the redo stack is cleared.
    pub fn record(&mut self, inverse: Command) {
        if let Some(tx) = &mut self.transaction {
            tx.inverses.push(inverse);
            return;
        }
        self.push_undo(inverse);
        self.redo_stack.clear();
    }

    fn push_undo(&mut self, inverse: Command) {
        self.undo_stack.push_back(inverse);
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
    }

    /// Open a transaction. Changes recorded until [`commit_transaction`]
    /// undo as a single step.
    ///
    /// [`commit_transaction`]: History::commit_transaction
    pub fn begin_transaction(&mut self, label: impl Into<String>) -> Result<(), CommandError> {
        if let Some(tx) = &self.transaction {
            return Err(CommandError::precondition(format!(
                "transaction '{}' is already open",
                tx.label
            )));
        }
        self.transaction = Some(Transaction {
            label: label.into(),
            inverses: Vec::new(),
        });
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    /// Close the open transaction. Returns false when there was nothing to
    /// commit.
    pub fn commit_transaction(&mut self) -> bool {
        let Some(mut tx) = self.transaction.take() else {
            return false;
        };
        if tx.inverses.is_empty() {
            return false;
        }
        log::debug!("commit transaction '{}' ({} steps)", tx.label, tx.inverses.len());
        tx.inverses.reverse();
        let entry = if tx.inverses.len() == 1 {
            tx.inverses.remove(0)
        } else {
            Command::Batch {
                commands: tx.inverses,
            }
        };
        self.record(entry);
        true
    }

    /// Abort the open transaction, undoing everything it recorded.
    pub fn rollback_transaction(&mut self, doc: &mut Document) -> Result<Patch, CommandError> {
        let Some(tx) = self.transaction.take() else {
            return Ok(Patch::new());
        };
        let mut patch = Patch::new();
        for inverse in tx.inverses.into_iter().rev() {
            patch.merge(command::apply(doc, inverse)?.patch);
        }
        Ok(patch)
    }

    /// Undo the most recent entry. Returns `None` when the stack is empty.
    ///
    /// An entry that no longer applies (e.g. a remote peer removed its
    /// target) is dropped and reported as a precondition failure.
    pub fn undo(&mut self, doc: &mut Document) -> Result<Option<Patch>, CommandError> {
        if self.transaction.is_some() {
            return Err(CommandError::precondition("cannot undo inside a transaction"));
        }
        let Some(entry) = self.undo_stack.pop_back() else {
            return Ok(None);
        };
        match command::apply(doc, entry) {
            Ok(result) => {
                self.redo_stack.push(result.inverse);
                Ok(Some(result.patch))
            }
            Err(e) => {
                log::warn!("undo entry superseded: {e}");
                Err(CommandError::precondition(format!("undo entry superseded: {e}")))
            }
        }
    }

    /// Redo the most recently undone entry. Returns `None` when the stack is
    /// empty.
    pub fn redo(&mut self, doc: &mut Document) -> Result<Option<Patch>, CommandError> {
        if self.transaction.is_some() {
            return Err(CommandError::precondition("cannot redo inside a transaction"));
        }
        let Some(entry) = self.redo_stack.pop() else {
            return Ok(None);
        };
        match command::apply(doc, entry) {
            Ok(result) => {
                self.push_undo(result.inverse);
                Ok(Some(result.patch))
            }
            Err(e) => {
                log::warn!("redo entry superseded: {e}");
                Err(CommandError::precondition(format!("redo entry superseded: {e}")))
            }
        }
    }

    /// Check if undo is available.
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available.
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.transaction = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Fragment;
    use crate::node::{BoxData, Node, NodeId, NodeKind};

    fn insert_rect(doc: &mut Document, history: &mut History) -> NodeId {
        let result = command::apply(
            doc,
            Command::Insert {
                fragment: Fragment::single(Node::new("r", NodeKind::Rectangle(BoxData::new(5.0, 5.0)))),
                parent: None,
                index: None,
            },
        )
        .unwrap();
        history.record(result.inverse);
        result.created[0].clone()
    }

    #[test]
    fn test_undo_redo_insert() {
        let mut doc = Document::with_default_scene();
        let mut history = History::default();
        let original = doc.clone();
        let id = insert_rect(&mut doc, &mut history);
        let inserted = doc.clone();

        assert!(history.undo(&mut doc).unwrap().is_some());
        assert_eq!(doc, original);
        assert!(history.can_redo());

        assert!(history.redo(&mut doc).unwrap().is_some());
        assert_eq!(doc, inserted);
        assert!(doc.contains(&id));
    }

    #[test]
    fn test_undo_empty_stack() {
        let mut doc = Document::with_default_scene();
        let mut history = History::default();
        assert_eq!(history.undo(&mut doc).unwrap(), None);
        assert_eq!(history.redo(&mut doc).unwrap(), None);
    }

    #[test]
    fn test_record_clears_redo() {
        let mut doc = Document::with_default_scene();
        let mut history = History::default();
        insert_rect(&mut doc, &mut history);
        history.undo(&mut doc).unwrap();
        assert!(history.can_redo());
        insert_rect(&mut doc, &mut history);
        assert!(!history.can_redo());
    }

    #[test]
    fn test_depth_limit() {
        let mut doc = Document::with_default_scene();
        let mut history = History::new(3);
        for _ in 0..5 {
            insert_rect(&mut doc, &mut history);
        }
        assert_eq!(history.undo_depth(), 3);
    }

    #[test]
    fn test_transaction_undoes_as_one() {
        let mut doc = Document::with_default_scene();
        let mut history = History::default();
        let original = doc.clone();
        history.begin_transaction("drag").unwrap();
        let id = insert_rect(&mut doc, &mut history);
        for name in ["a", "b", "c"] {
            let result = command::apply(&mut doc, Command::rename(id.clone(), name)).unwrap();
            history.record(result.inverse);
        }
        assert!(history.undo(&mut doc).is_err());
        assert!(history.commit_transaction());
        assert_eq!(history.undo_depth(), 1);
        history.undo(&mut doc).unwrap();
        assert_eq!(doc, original);
    }

    #[test]
    fn test_rollback_transaction() {
        let mut doc = Document::with_default_scene();
        let mut history = History::default();
        let original = doc.clone();
        history.begin_transaction("insert").unwrap();
        insert_rect(&mut doc, &mut history);
        history.rollback_transaction(&mut doc).unwrap();
        assert_eq!(doc, original);
        assert!(!history.can_undo());
    }

    #[test]
    fn test_superseded_entry_is_dropped() {
        let mut doc = Document::with_default_scene();
        let mut history = History::default();
        let id = insert_rect(&mut doc, &mut history);
        let result = command::apply(&mut doc, Command::rename(id.clone(), "x")).unwrap();
        history.record(result.inverse);
        // Remove the node behind the history's back, as a remote peer would.
        command::apply(&mut doc, Command::Remove { ids: vec![id] }).unwrap();
        assert!(matches!(
            history.undo(&mut doc),
            Err(CommandError::PreconditionFailed(_))
        ));
        assert_eq!(history.undo_depth(), 1);
    }
}
