use serde::{Deserialize, Serialize};

use super::identity::SourceIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProject {
    pub key: String,
    pub name: String,
}

/// Read-only snapshot of one source issue for a single migration pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceWorkItem {
    pub key: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<SourceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reporter: Option<SourceIdentity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl SourceWorkItem {
    /// Title of the target task. Exact-match lookups on this string are the
    /// only thing that makes task migration idempotent.
    pub fn task_title(&self) -> String {
        format!("{}: {}", self.key, self.summary)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceComment {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub body: String,
    /// Source identity key of the author, if the record names one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}
