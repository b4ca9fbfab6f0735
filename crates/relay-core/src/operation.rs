//! Row operations and the set of operations a capture source is enabled for.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A row-level change operation.
///
/// Serialized in upper case (`"INSERT"`, `"UPDATE"`, `"DELETE"`), which is
/// both the webhook wire format and what the database triggers emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Insert,
    Update,
    Delete,
}

impl Operation {
    /// All operations, in the order triggers are installed.
    pub const ALL: [Operation; 3] = [Operation::Insert, Operation::Update, Operation::Delete];

    /// Upper-case SQL keyword, e.g. `INSERT`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }

    /// Lower-case form used inside generated object names, e.g. `orders_insert_trigger`.
    pub fn name_fragment(&self) -> &'static str {
        match self {
            Operation::Insert => "insert",
            Operation::Update => "update",
            Operation::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown operation type: {0}")]
pub struct OperationParseError(pub String);

impl FromStr for Operation {
    type Err = OperationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            _ => Err(OperationParseError(s.to_string())),
        }
    }
}

/// The subset of operations a capture source installs triggers for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OperationSet {
    insert: bool,
    update: bool,
    delete: bool,
}

impl OperationSet {
    pub fn all() -> Self {
        Self {
            insert: true,
            update: true,
            delete: true,
        }
    }

    /// Parse a free-form mode selector such as `"insert,update"` or
    /// `"INSERT | DELETE"`. Matching is case-insensitive and by substring,
    /// so any separator works and unknown words are ignored.
    pub fn from_modes(modes: &str) -> Self {
        let modes = modes.to_lowercase();
        Self {
            insert: modes.contains("insert"),
            update: modes.contains("update"),
            delete: modes.contains("delete"),
        }
    }

    pub fn contains(&self, op: Operation) -> bool {
        match op {
            Operation::Insert => self.insert,
            Operation::Update => self.update,
            Operation::Delete => self.delete,
        }
    }

    pub fn insert(&mut self, op: Operation) {
        match op {
            Operation::Insert => self.insert = true,
            Operation::Update => self.update = true,
            Operation::Delete => self.delete = true,
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.insert || self.update || self.delete)
    }

    /// Enabled operations in installation order.
    pub fn iter(&self) -> impl Iterator<Item = Operation> + '_ {
        Operation::ALL.into_iter().filter(|op| self.contains(*op))
    }
}

impl FromIterator<Operation> for OperationSet {
    fn from_iter<I: IntoIterator<Item = Operation>>(iter: I) -> Self {
        let mut set = OperationSet::default();
        for op in iter {
            set.insert(op);
        }
        set
    }
}

impl fmt::Display for OperationSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("none");
        }
        let names: Vec<&str> = self.iter().map(|op| op.as_str()).collect();
        f.write_str(&names.join(", "))
    }
}
