pub mod bitrix;
mod http;
pub mod jira;
pub mod paging;
pub mod retry;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::model::{
    NewTargetComment, NewTargetTask, NewTargetUser, SourceComment, SourceIdentity,
    SourceProject, SourceWorkItem, TargetTaskId, TargetUserId, Workgroup,
};

pub use paging::{collect_pages, Page};

/// Read-only view of the issue tracker being migrated from.
///
/// List operations return one page starting at `offset`; callers loop with
/// [`collect_pages`] (or the `all_*` helpers below) until a short page.
#[async_trait]
pub trait SourceSystem: Send + Sync {
    fn page_size(&self) -> usize;
    async fn search_users(&self, prefix: &str, offset: usize) -> Result<Page<SourceIdentity>, ApiError>;
    async fn find_user(&self, username: &str) -> Result<Option<SourceIdentity>, ApiError>;
    async fn list_projects(&self) -> Result<Vec<SourceProject>, ApiError>;
    async fn search_issues(&self, project_key: &str, offset: usize) -> Result<Page<SourceWorkItem>, ApiError>;
    async fn list_comments(&self, issue_key: &str, offset: usize) -> Result<Page<SourceComment>, ApiError>;
}

/// The portal being migrated into.
#[async_trait]
pub trait TargetSystem: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<TargetUserId>, ApiError>;
    async fn add_user(&self, user: &NewTargetUser) -> Result<TargetUserId, ApiError>;
    async fn find_task_by_title(&self, title: &str) -> Result<Option<TargetTaskId>, ApiError>;
    /// Returns false when the target answered without confirming the delete.
    async fn delete_task(&self, id: TargetTaskId) -> Result<bool, ApiError>;
    async fn add_task(&self, task: &NewTargetTask) -> Result<TargetTaskId, ApiError>;
    async fn add_comment(&self, comment: &NewTargetComment) -> Result<(), ApiError>;
    async fn list_workgroups(&self) -> Result<Vec<Workgroup>, ApiError>;
}

pub async fn all_users_with_prefix(
    source: &dyn SourceSystem,
    prefix: &str,
) -> Result<Vec<SourceIdentity>, ApiError> {
    collect_pages(source.page_size(), |offset| source.search_users(prefix, offset)).await
}

pub async fn all_issues(
    source: &dyn SourceSystem,
    project_key: &str,
) -> Result<Vec<SourceWorkItem>, ApiError> {
    collect_pages(source.page_size(), |offset| source.search_issues(project_key, offset)).await
}

pub async fn all_comments(
    source: &dyn SourceSystem,
    issue_key: &str,
) -> Result<Vec<SourceComment>, ApiError> {
    collect_pages(source.page_size(), |offset| source.list_comments(issue_key, offset)).await
}
