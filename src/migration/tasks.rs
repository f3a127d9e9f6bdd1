use serde::Serialize;
use serde_json::json;

use super::comments::{fingerprint, sanitize_comment, ReplayLedger};
use super::identity::IdentityMap;
use crate::error::ApiError;
use crate::events::EventSink;
use crate::model::{NewTargetComment, NewTargetTask, SourceWorkItem, TargetTaskId};
use crate::remote::{all_comments, SourceSystem, TargetSystem};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskAction {
    Created,
    Replaced,
    Kept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskMigration {
    pub task_id: TargetTaskId,
    pub action: TaskAction,
    pub comments_posted: usize,
    pub comments_skipped: usize,
}

pub struct TaskMigrator<'a> {
    source: &'a dyn SourceSystem,
    target: &'a dyn TargetSystem,
    sink: &'a dyn EventSink,
    ledger: Option<ReplayLedger>,
}

impl<'a> TaskMigrator<'a> {
    pub fn new(
        source: &'a dyn SourceSystem,
        target: &'a dyn TargetSystem,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            source,
            target,
            sink,
            ledger: None,
        }
    }

    /// Skip comments the ledger says were already posted to the same task.
    pub fn with_ledger(mut self, ledger: ReplayLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Find, replace or create the task for `item`, then replay its comments.
    ///
    /// The title is the only existence check. With `delete_if_exists` off an
    /// existing task is kept as is; comments are replayed either way.
    pub async fn migrate_task(
        &mut self,
        item: &SourceWorkItem,
        identities: &IdentityMap,
        delete_if_exists: bool,
        group_id: Option<u64>,
    ) -> Result<TaskMigration, ApiError> {
        let title = item.task_title();
        let existing = self.target.find_task_by_title(&title).await?;

        let (task_id, action) = match existing {
            Some(id) if !delete_if_exists => {
                self.sink.record(
                    "task.kept",
                    json!({"issue": item.key, "task_id": id}),
                );
                (id, TaskAction::Kept)
            }
            Some(old) => {
                if !self.target.delete_task(old).await? {
                    self.sink.record(
                        "task.delete.failed",
                        json!({"issue": item.key, "task_id": old}),
                    );
                }
                let id = self.create(item, title, identities, group_id).await?;
                self.sink.record(
                    "task.replaced",
                    json!({"issue": item.key, "old_task_id": old, "task_id": id}),
                );
                (id, TaskAction::Replaced)
            }
            None => {
                let id = self.create(item, title, identities, group_id).await?;
                self.sink.record(
                    "task.created",
                    json!({"issue": item.key, "task_id": id}),
                );
                (id, TaskAction::Created)
            }
        };

        let (comments_posted, comments_skipped) =
            self.replay_comments(item, task_id, identities).await?;

        Ok(TaskMigration {
            task_id,
            action,
            comments_posted,
            comments_skipped,
        })
    }

    async fn create(
        &self,
        item: &SourceWorkItem,
        title: String,
        identities: &IdentityMap,
        group_id: Option<u64>,
    ) -> Result<TargetTaskId, ApiError> {
        let task = NewTargetTask {
            title,
            description: item.description.clone().unwrap_or_default(),
            responsible_id: identities.resolve(item.assignee.as_ref().map(|a| a.key.as_str())),
            created_by: identities.resolve(item.reporter.as_ref().map(|r| r.key.as_str())),
            created_at: item.created_at.clone(),
            updated_at: item.updated_at.clone(),
            group_id,
        };
        self.target.add_task(&task).await
    }

    /// Post every source comment in order. Returns (posted, skipped).
    async fn replay_comments(
        &mut self,
        item: &SourceWorkItem,
        task_id: TargetTaskId,
        identities: &IdentityMap,
    ) -> Result<(usize, usize), ApiError> {
        let comments = all_comments(self.source, &item.key).await?;
        let mut posted = 0;
        let mut skipped = 0;

        for comment in &comments {
            let print = fingerprint(&item.key, comment);
            if self
                .ledger
                .as_ref()
                .is_some_and(|ledger| ledger.contains(task_id, &print))
            {
                skipped += 1;
                continue;
            }

            self.target
                .add_comment(&NewTargetComment {
                    task_id,
                    body: sanitize_comment(&comment.body),
                    author_id: identities.resolve(comment.author_key.as_deref()),
                })
                .await?;
            posted += 1;

            if let Some(ledger) = self.ledger.as_mut() {
                if let Err(err) = ledger.record(task_id, &print) {
                    tracing::warn!(
                        path = %ledger.path().display(),
                        error = %err,
                        "comment posted but not recorded in ledger"
                    );
                }
            }
        }

        if !comments.is_empty() {
            self.sink.record(
                "comments.replayed",
                json!({"issue": item.key, "task_id": task_id, "posted": posted, "skipped": skipped}),
            );
        }
        Ok((posted, skipped))
    }
}
