use serde::{Deserialize, Serialize};
use std::fmt;

use super::identity::TargetUserId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetTaskId(pub u64);

impl fmt::Display for TargetTaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTargetUser {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub department_id: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTargetTask {
    pub title: String,
    pub description: String,
    pub responsible_id: Option<TargetUserId>,
    pub created_by: Option<TargetUserId>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub group_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTargetComment {
    pub task_id: TargetTaskId,
    pub body: String,
    pub author_id: Option<TargetUserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workgroup {
    pub id: u64,
    pub name: String,
}
