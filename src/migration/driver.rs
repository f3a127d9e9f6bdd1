use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use serde::Serialize;
use serde_json::{json, Value};

use super::comments::ReplayLedger;
use super::identity::{IdentityMap, IdentityResolver};
use super::tasks::{TaskAction, TaskMigrator};
use super::users::UserMigrator;
use crate::error::ApiError;
use crate::events::EventSink;
use crate::model::{SourceProject, Workgroup};
use crate::remote::{all_issues, SourceSystem, TargetSystem};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Step {
    Users,
    Issues,
    #[default]
    All,
    /// List target workgroups and exit.
    Groups,
}

impl Step {
    pub fn migrates_users(self) -> bool {
        matches!(self, Step::Users | Step::All)
    }

    pub fn migrates_issues(self) -> bool {
        matches!(self, Step::Issues | Step::All)
    }
}

/// What to do when one user, project or issue fails.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    Abort,
    /// Record a `*.failed` event, count it, move on to the next item.
    SkipItem,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub step: Step,
    pub project: Option<String>,
    pub group: Option<u64>,
    pub delete_if_exists: bool,
    pub failure_policy: FailurePolicy,
    pub department_id: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            step: Step::All,
            project: None,
            group: None,
            delete_if_exists: true,
            failure_policy: FailurePolicy::Abort,
            department_id: 1,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub identities: usize,
    pub users_created: usize,
    pub users_existing: usize,
    pub users_unresolved: usize,
    pub tasks_created: usize,
    pub tasks_replaced: usize,
    pub tasks_kept: usize,
    pub comments_posted: usize,
    pub comments_skipped: usize,
    pub workgroups: usize,
    pub failures: usize,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.failures > 0
    }
}

pub struct MigrationDriver<'a> {
    source: &'a dyn SourceSystem,
    target: &'a dyn TargetSystem,
    sink: &'a dyn EventSink,
    options: RunOptions,
    ledger: Option<ReplayLedger>,
}

impl<'a> MigrationDriver<'a> {
    pub fn new(
        source: &'a dyn SourceSystem,
        target: &'a dyn TargetSystem,
        sink: &'a dyn EventSink,
        options: RunOptions,
    ) -> Self {
        Self {
            source,
            target,
            sink,
            options,
            ledger: None,
        }
    }

    pub fn with_comment_ledger(mut self, ledger: ReplayLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub async fn run(mut self) -> Result<RunSummary> {
        let step = self.options.step;
        let mut summary = RunSummary::default();
        self.sink.record(
            "run.started",
            json!({
                "step": format!("{step:?}").to_lowercase(),
                "project": self.options.project,
                "group": self.options.group,
                "delete_if_exists": self.options.delete_if_exists,
            }),
        );

        if step == Step::Groups {
            summary.workgroups = self.list_groups().await?.len();
            self.finish(&summary);
            return Ok(summary);
        }

        let mut projects = Vec::new();
        if step.migrates_issues() {
            if let Some(group) = self.options.group {
                self.check_group(group).await?;
            }
            projects = self.selected_projects().await?;
        }

        let mut identities = IdentityResolver::new(self.source, self.sink)
            .resolve()
            .await
            .context("Failed to resolve source identities")?;
        summary.identities = identities.len();

        let mut users = UserMigrator::new(self.target, self.sink, self.options.department_id);
        if step.migrates_users() {
            self.users_stage(&mut users, &mut identities, &mut summary)
                .await?;
        } else {
            self.attach_existing(&mut users, &mut identities, &mut summary)
                .await?;
        }

        if step.migrates_issues() {
            self.issues_stage(projects, &identities, &mut summary)
                .await?;
        }

        self.finish(&summary);
        Ok(summary)
    }

    fn finish(&self, summary: &RunSummary) {
        self.sink.record(
            "run.finished",
            serde_json::to_value(summary).unwrap_or(Value::Null),
        );
    }

    /// Ensure a target account for every identity, sentinel included.
    pub async fn users_stage(
        &self,
        users: &mut UserMigrator<'_>,
        identities: &mut IdentityMap,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let pending: Vec<(String, String, String)> = identities
            .entries()
            .map(|e| (e.key.clone(), e.email.clone(), e.display_name.clone()))
            .collect();

        for (key, email, display_name) in pending {
            match users.ensure_user(&email, &display_name).await {
                Ok(ensured) => {
                    identities.set_target(&key, ensured.id());
                    if ensured.was_created() {
                        summary.users_created += 1;
                    } else {
                        summary.users_existing += 1;
                    }
                }
                Err(err) => self.item_failed(
                    summary,
                    "user.failed",
                    json!({"key": key, "email": email}),
                    err,
                    format!("Failed to migrate user {key} <{email}>"),
                )?,
            }
        }

        self.sink
            .record("identity.map", json!(identities.target_view()));
        Ok(())
    }

    /// Issues-only runs: attach target ids of accounts that already exist,
    /// never creating any.
    pub async fn attach_existing(
        &self,
        users: &mut UserMigrator<'_>,
        identities: &mut IdentityMap,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let pending: Vec<(String, String)> = identities
            .entries()
            .map(|e| (e.key.clone(), e.email.clone()))
            .collect();

        for (key, email) in pending {
            match users.lookup(&email).await {
                Ok(Some(id)) => {
                    identities.set_target(&key, id);
                    summary.users_existing += 1;
                }
                Ok(None) => summary.users_unresolved += 1,
                Err(err) => self.item_failed(
                    summary,
                    "user.lookup.failed",
                    json!({"key": key, "email": email}),
                    err,
                    format!("Failed to look up user {key} <{email}>"),
                )?,
            }
        }

        let missing = identities.missing_targets();
        if !missing.is_empty() {
            self.sink.record(
                "identity.unmigrated",
                json!({"keys": missing, "hint": "run --step users first"}),
            );
        }
        Ok(())
    }

    /// Migrate every issue of the given projects.
    pub async fn issues_stage(
        &mut self,
        projects: Vec<SourceProject>,
        identities: &IdentityMap,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let mut tasks = TaskMigrator::new(self.source, self.target, self.sink);
        if let Some(ledger) = self.ledger.take() {
            tasks = tasks.with_ledger(ledger);
        }

        for project in projects {
            let issues = match all_issues(self.source, &project.key).await {
                Ok(issues) => issues,
                Err(err) => {
                    self.item_failed(
                        summary,
                        "project.failed",
                        json!({"project": project.key}),
                        err,
                        format!("Failed to fetch issues of project {}", project.key),
                    )?;
                    continue;
                }
            };
            self.sink.record(
                "project.started",
                json!({"project": project.key, "name": project.name, "issues": issues.len()}),
            );

            for (n, issue) in issues.iter().enumerate() {
                let migrated = tasks
                    .migrate_task(
                        issue,
                        identities,
                        self.options.delete_if_exists,
                        self.options.group,
                    )
                    .await;
                match migrated {
                    Ok(done) => {
                        match done.action {
                            TaskAction::Created => summary.tasks_created += 1,
                            TaskAction::Replaced => summary.tasks_replaced += 1,
                            TaskAction::Kept => summary.tasks_kept += 1,
                        }
                        summary.comments_posted += done.comments_posted;
                        summary.comments_skipped += done.comments_skipped;
                        tracing::debug!(
                            project = %project.key,
                            issue = %issue.key,
                            "issue {} of {}",
                            n + 1,
                            issues.len()
                        );
                    }
                    Err(err) => self.item_failed(
                        summary,
                        "task.failed",
                        json!({"issue": issue.key}),
                        err,
                        format!("Failed to migrate issue {}", issue.key),
                    )?,
                }
            }
        }
        Ok(())
    }

    /// The `--project` selection, or every project when none was given.
    async fn selected_projects(&self) -> Result<Vec<SourceProject>> {
        let projects = self
            .source
            .list_projects()
            .await
            .context("Failed to list source projects")?;
        match &self.options.project {
            None => Ok(projects),
            Some(key) => {
                let Some(project) = projects.into_iter().find(|p| &p.key == key) else {
                    bail!("Unknown project {key:?}");
                };
                Ok(vec![project])
            }
        }
    }

    pub async fn list_groups(&self) -> Result<Vec<Workgroup>> {
        let groups = self
            .target
            .list_workgroups()
            .await
            .context("Failed to list workgroups")?;
        for group in &groups {
            self.sink
                .record("workgroup", json!({"id": group.id, "name": group.name}));
        }
        Ok(groups)
    }

    async fn check_group(&self, group: u64) -> Result<()> {
        let groups = self
            .target
            .list_workgroups()
            .await
            .context("Failed to list workgroups")?;
        if !groups.iter().any(|g| g.id == group) {
            bail!("Workgroup {group} does not exist in the target portal");
        }
        Ok(())
    }

    /// Count and report one failed item, then abort or carry on per policy.
    fn item_failed(
        &self,
        summary: &mut RunSummary,
        event: &str,
        mut fields: Value,
        err: ApiError,
        what: String,
    ) -> Result<()> {
        summary.failures += 1;
        if let Some(map) = fields.as_object_mut() {
            map.insert("operation".into(), json!(err.operation()));
            map.insert("error".into(), json!(err.to_string()));
        }
        self.sink.record(event, fields);
        match self.options.failure_policy {
            FailurePolicy::Abort => Err(anyhow::Error::new(err).context(what)),
            FailurePolicy::SkipItem => Ok(()),
        }
    }
}
