//! # Command Layer
//!
//! Operator-facing operations over the stores, guard, validator and
//! migration. Each command lives in its own submodule and returns a
//! structured [`CmdResult`]; rendering is left to the caller.
//!
//! Commands never print, prompt or exit. Failures that mean "the operation
//! did not happen" are `Err`; findings worth reporting (a dry run, validator
//! issues, skipped documents) are messages.
//!
//! ## Command Modules
//!
//! - [`resolve`]: where an id lives and how it was found
//! - [`show`]: one document (with tasks, for projects)
//! - [`list`]: every document of a kind, optionally by parent
//! - [`reindex`]: rebuild indexes from disk
//! - [`migrate`]: legacy to hierarchical migration
//! - [`validate`]: cross-entity consistency audit
//! - [`matching`]: guarded project creation and cancellation

use crate::model::{EntityId, EntityKind, Task};
use crate::store::Resolved;
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

pub mod list;
pub mod matching;
pub mod migrate;
pub mod reindex;
pub mod resolve;
pub mod show;
pub mod validate;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct CmdMessage {
    pub level: MessageLevel,
    pub content: String,
}

impl CmdMessage {
    pub fn info(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Info,
            content: content.into(),
        }
    }

    pub fn success(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Success,
            content: content.into(),
        }
    }

    pub fn warning(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Warning,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            level: MessageLevel::Error,
            content: content.into(),
        }
    }
}

/// An entity a command wrote to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Affected {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl Affected {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct CmdResult {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub affected: Vec<Affected>,
    /// Documents to display, as stored.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub listed: Vec<Value>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<Task>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<Resolved>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub paths: Vec<PathBuf>,
    /// Structured report (migration summary, validation report, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
    pub messages: Vec<CmdMessage>,
}

impl CmdResult {
    pub fn add_message(&mut self, message: CmdMessage) {
        self.messages.push(message);
    }

    pub fn with_affected(mut self, affected: Vec<Affected>) -> Self {
        self.affected = affected;
        self
    }

    pub fn with_listed(mut self, listed: Vec<Value>) -> Self {
        self.listed = listed;
        self
    }

    pub fn with_report<R: Serialize>(mut self, report: &R) -> crate::error::Result<Self> {
        self.report = Some(serde_json::to_value(report)?);
        Ok(self)
    }

    pub fn has_errors(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m.level, MessageLevel::Error))
    }
}
