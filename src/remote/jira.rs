use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

use super::http::read_json;
use super::retry::{Idempotency, RetryPolicy};
use super::{Page, SourceSystem};
use crate::config::JiraConfig;
use crate::error::ApiError;
use crate::model::{SourceComment, SourceIdentity, SourceProject, SourceWorkItem};
use crate::util::adf::plain_text;

const API: &str = "/rest/api/2";
const ISSUE_FIELDS: &str = "summary,description,issuetype,assignee,reporter,created,updated";

/// Jira Server / Data Center REST v2 client with basic auth.
pub struct JiraClient {
    base_url: String,
    auth_header: String,
    client: reqwest::Client,
    page_size: usize,
    retry: RetryPolicy,
}

impl JiraClient {
    pub fn new(cfg: &JiraConfig, retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        let creds = format!("{}:{}", cfg.user, cfg.token);
        let encoded = base64::engine::general_purpose::STANDARD.encode(creds);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .danger_accept_invalid_certs(!cfg.verify_ssl)
            .build()
            .context("Failed to build Jira HTTP client")?;
        Ok(Self {
            base_url: cfg.url.trim_end_matches('/').to_string(),
            auth_header: format!("Basic {encoded}"),
            client,
            page_size: cfg.max_results,
            retry,
        })
    }

    async fn get(
        &self,
        operation: &str,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Value, ApiError> {
        let url = format!("{}{API}{path}", self.base_url);
        let url = url.as_str();
        let client = &self.client;
        let auth = self.auth_header.as_str();
        self.retry
            .run(operation, Idempotency::Idempotent, move || async move {
                let resp = client
                    .get(url)
                    .header(AUTHORIZATION, auth)
                    .header(ACCEPT, "application/json")
                    .query(query)
                    .send()
                    .await
                    .map_err(|e| ApiError::transport(operation, e))?;
                read_json(operation, resp).await
            })
            .await
    }

    fn paging(&self, offset: usize) -> [(&'static str, String); 2] {
        [
            ("startAt", offset.to_string()),
            ("maxResults", self.page_size.to_string()),
        ]
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JiraUser {
    name: Option<String>,
    key: Option<String>,
    email_address: Option<String>,
    display_name: Option<String>,
    active: Option<bool>,
}

#[derive(Deserialize)]
struct JiraProject {
    key: String,
    #[serde(default)]
    name: String,
}

#[derive(Deserialize)]
struct JiraIssue {
    key: String,
    fields: IssueFields,
}

#[derive(Deserialize)]
struct IssueFields {
    summary: Option<String>,
    description: Option<Value>,
    assignee: Option<JiraUser>,
    reporter: Option<JiraUser>,
    created: Option<String>,
    updated: Option<String>,
}

#[derive(Deserialize)]
struct JiraComment {
    id: Option<String>,
    body: Option<Value>,
    author: Option<JiraUser>,
    created: Option<String>,
}

impl JiraUser {
    /// The username is the stable handle; older payloads only carry `key`.
    fn handle(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.key.as_deref())
            .filter(|k| !k.is_empty())
    }

    fn into_identity(self) -> Option<SourceIdentity> {
        let key = self.handle()?.to_string();
        Some(SourceIdentity {
            display_name: self.display_name.unwrap_or_else(|| key.clone()),
            email: self.email_address.filter(|e| !e.trim().is_empty()),
            active: self.active.unwrap_or(false),
            key,
        })
    }
}

pub(crate) fn parse_user(value: &Value) -> Option<SourceIdentity> {
    serde_json::from_value::<JiraUser>(value.clone())
        .ok()?
        .into_identity()
}

pub(crate) fn parse_project(value: &Value) -> Option<SourceProject> {
    let project: JiraProject = serde_json::from_value(value.clone()).ok()?;
    Some(SourceProject {
        key: project.key,
        name: project.name,
    })
}

pub(crate) fn parse_issue(value: &Value) -> Option<SourceWorkItem> {
    let issue: JiraIssue = serde_json::from_value(value.clone()).ok()?;
    let fields = issue.fields;
    Some(SourceWorkItem {
        key: issue.key,
        summary: fields.summary.unwrap_or_default(),
        description: fields.description.as_ref().and_then(plain_text),
        assignee: fields.assignee.and_then(JiraUser::into_identity),
        reporter: fields.reporter.and_then(JiraUser::into_identity),
        created_at: fields.created,
        updated_at: fields.updated,
    })
}

pub(crate) fn parse_comment(value: &Value) -> Option<SourceComment> {
    let comment: JiraComment = serde_json::from_value(value.clone()).ok()?;
    Some(SourceComment {
        id: comment.id,
        body: comment
            .body
            .as_ref()
            .and_then(plain_text)
            .unwrap_or_default(),
        author_key: comment
            .author
            .as_ref()
            .and_then(|a| a.handle())
            .map(String::from),
        created_at: comment.created,
    })
}

/// Parse every record of a list, dropping (and logging) malformed ones while
/// keeping the raw count for pagination.
fn parse_page<T>(operation: &str, raw: &[Value], parse: fn(&Value) -> Option<T>) -> Page<T> {
    let items = raw
        .iter()
        .filter_map(|record| {
            let parsed = parse(record);
            if parsed.is_none() {
                tracing::warn!(operation, %record, "skipping malformed record");
            }
            parsed
        })
        .collect();
    Page::new(items, raw.len())
}

fn list_field<'a>(operation: &str, body: &'a Value, field: &str) -> Result<&'a [Value], ApiError> {
    body.get(field)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .ok_or_else(|| ApiError::parse(operation, format!("missing `{field}` list")))
}

fn as_list<'a>(operation: &str, body: &'a Value) -> Result<&'a [Value], ApiError> {
    body.as_array()
        .map(Vec::as_slice)
        .ok_or_else(|| ApiError::parse(operation, "expected a JSON list"))
}

pub(crate) fn issues_jql(project_key: &str) -> String {
    let escaped = project_key.replace('\\', "\\\\").replace('"', "\\\"");
    format!("project = \"{escaped}\" ORDER BY created ASC")
}

#[async_trait]
impl SourceSystem for JiraClient {
    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn search_users(&self, prefix: &str, offset: usize) -> Result<Page<SourceIdentity>, ApiError> {
        const OP: &str = "search_users";
        let [start, max] = self.paging(offset);
        let body = self
            .get(OP, "/user/search", &[("username", prefix.to_string()), start, max])
            .await?;
        let page = parse_page(OP, as_list(OP, &body)?, parse_user);
        tracing::debug!(prefix, offset, fetched = page.fetched, "fetched user page");
        Ok(page)
    }

    async fn find_user(&self, username: &str) -> Result<Option<SourceIdentity>, ApiError> {
        const OP: &str = "find_user";
        let body = self
            .get(
                OP,
                "/user/search",
                &[
                    ("username", username.to_string()),
                    ("maxResults", self.page_size.to_string()),
                ],
            )
            .await?;
        Ok(as_list(OP, &body)?
            .iter()
            .filter_map(parse_user)
            .find(|user| user.key == username))
    }

    async fn list_projects(&self) -> Result<Vec<SourceProject>, ApiError> {
        const OP: &str = "list_projects";
        let body = self.get(OP, "/project", &[]).await?;
        let projects = parse_page(OP, as_list(OP, &body)?, parse_project).items;
        tracing::info!(count = projects.len(), "fetched projects");
        Ok(projects)
    }

    async fn search_issues(&self, project_key: &str, offset: usize) -> Result<Page<SourceWorkItem>, ApiError> {
        const OP: &str = "search_issues";
        let [start, max] = self.paging(offset);
        let body = self
            .get(
                OP,
                "/search",
                &[
                    ("jql", issues_jql(project_key)),
                    start,
                    max,
                    ("fields", ISSUE_FIELDS.to_string()),
                ],
            )
            .await?;
        let page = parse_page(OP, list_field(OP, &body, "issues")?, parse_issue);
        tracing::debug!(project = project_key, offset, fetched = page.fetched, "fetched issue page");
        Ok(page)
    }

    async fn list_comments(&self, issue_key: &str, offset: usize) -> Result<Page<SourceComment>, ApiError> {
        const OP: &str = "list_comments";
        let [start, max] = self.paging(offset);
        let path = format!("/issue/{}/comment", urlencoding::encode(issue_key));
        let body = self.get(OP, &path, &[start, max]).await?;
        Ok(parse_page(OP, list_field(OP, &body, "comments")?, parse_comment))
    }
}
