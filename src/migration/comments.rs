use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::model::{SourceComment, TargetTaskId};

/// Normalize non-breaking spaces to plain spaces, then drop C0 control
/// characters and DEL. Newlines and tabs are control characters too.
pub fn sanitize_comment(body: &str) -> String {
    body.chars()
        .map(|c| if c == '\u{00A0}' { ' ' } else { c })
        .filter(|c| !matches!(c, '\u{0000}'..='\u{001F}' | '\u{007F}'))
        .collect()
}

/// Stable identity of a source comment for replay bookkeeping.
pub fn fingerprint(issue_key: &str, comment: &SourceComment) -> String {
    match &comment.id {
        Some(id) => format!("{issue_key}#{id}"),
        None => format!(
            "{issue_key}@{}/{}",
            comment.created_at.as_deref().unwrap_or_default(),
            comment.author_key.as_deref().unwrap_or_default()
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct LedgerLine {
    task_id: TargetTaskId,
    fingerprint: String,
}

/// Append-only JSONL record of comments already posted to each target task.
pub struct ReplayLedger {
    path: PathBuf,
    file: File,
    seen: HashMap<TargetTaskId, HashSet<String>>,
}

impl ReplayLedger {
    /// Open (or create) the ledger and load what earlier runs recorded.
    /// Unreadable lines are ignored.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut seen: HashMap<TargetTaskId, HashSet<String>> = HashMap::new();
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read comment ledger {}", path.display()))?;
            for line in contents.lines().filter(|l| !l.trim().is_empty()) {
                match serde_json::from_str::<LedgerLine>(line) {
                    Ok(entry) => {
                        seen.entry(entry.task_id).or_default().insert(entry.fingerprint);
                    }
                    Err(err) => {
                        tracing::warn!(path = %path.display(), error = %err, "skipping ledger line")
                    }
                }
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open comment ledger {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            seen,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, task_id: TargetTaskId, fingerprint: &str) -> bool {
        self.seen
            .get(&task_id)
            .is_some_and(|set| set.contains(fingerprint))
    }

    pub fn record(&mut self, task_id: TargetTaskId, fingerprint: &str) -> Result<()> {
        let line = serde_json::to_string(&LedgerLine {
            task_id,
            fingerprint: fingerprint.to_string(),
        })?;
        writeln!(self.file, "{line}")
            .with_context(|| format!("Failed to append to {}", self.path.display()))?;
        self.seen
            .entry(task_id)
            .or_default()
            .insert(fingerprint.to_string());
        Ok(())
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.seen.values().map(HashSet::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
