use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::http::{parse_id, read_json};
use super::retry::{Idempotency, RetryPolicy};
use super::TargetSystem;
use crate::config::BitrixConfig;
use crate::error::ApiError;
use crate::model::{
    NewTargetComment, NewTargetTask, NewTargetUser, TargetTaskId, TargetUserId, Workgroup,
};

/// Bitrix24 inbound-webhook client: every method is `POST {webhook}{method}`.
pub struct BitrixClient {
    webhook: String,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl BitrixClient {
    pub fn new(cfg: &BitrixConfig, retry: RetryPolicy, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Bitrix24 HTTP client")?;
        Ok(Self {
            webhook: normalize_webhook(&cfg.webhook),
            client,
            retry,
        })
    }

    /// Call a webhook method and return its `result` (null when absent).
    pub async fn call(
        &self,
        method: &str,
        params: &Value,
        idempotency: Idempotency,
    ) -> Result<Value, ApiError> {
        let url = format!("{}{method}", self.webhook);
        let url = url.as_str();
        let client = &self.client;
        let body = self
            .retry
            .run(method, idempotency, move || async move {
                let resp = client
                    .post(url)
                    .json(params)
                    .send()
                    .await
                    .map_err(|e| ApiError::transport(method, e))?;
                read_json(method, resp).await
            })
            .await?;
        Ok(body.get("result").cloned().unwrap_or(Value::Null))
    }
}

pub(crate) fn normalize_webhook(webhook: &str) -> String {
    let trimmed = webhook.trim();
    if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{trimmed}/")
    }
}

pub(crate) fn user_fields(user: &NewTargetUser) -> Value {
    json!({
        "EMAIL": user.email,
        "NAME": user.first_name,
        "LAST_NAME": user.last_name,
        "UF_DEPARTMENT": [user.department_id],
    })
}

pub(crate) fn task_fields(task: &NewTargetTask) -> Value {
    let mut fields = Map::new();
    fields.insert("TITLE".into(), json!(task.title));
    fields.insert("DESCRIPTION".into(), json!(task.description));
    if let Some(id) = task.responsible_id {
        fields.insert("RESPONSIBLE_ID".into(), json!(id.0));
    }
    if let Some(id) = task.created_by {
        fields.insert("CREATED_BY".into(), json!(id.0));
    }
    if let Some(created) = &task.created_at {
        fields.insert("CREATED_DATE".into(), json!(created));
    }
    if let Some(updated) = &task.updated_at {
        fields.insert("CHANGED_DATE".into(), json!(updated));
    }
    if let Some(group) = task.group_id {
        fields.insert("GROUP_ID".into(), json!(group));
    }
    json!({ "fields": fields })
}

pub(crate) fn comment_params(comment: &NewTargetComment) -> Value {
    let mut message = Map::new();
    message.insert("POST_MESSAGE".into(), json!(comment.body));
    if let Some(author) = comment.author_id {
        message.insert("AUTHOR_ID".into(), json!(author.0));
    }
    json!([comment.task_id.0, message])
}

/// First user id of a `user.get` result; malformed ids count as not found.
pub(crate) fn first_user_id(result: &Value) -> Option<TargetUserId> {
    result
        .as_array()?
        .first()?
        .get("ID")
        .and_then(parse_id)
        .map(TargetUserId)
}

/// Id of the first task in a `tasks.task.list` result whose title equals
/// `title` byte for byte. The portal's title filter also matches substrings.
pub(crate) fn exact_task_id(result: &Value, title: &str) -> Option<TargetTaskId> {
    result
        .get("tasks")?
        .as_array()?
        .iter()
        .filter(|task| {
            task.get("title")
                .or_else(|| task.get("TITLE"))
                .and_then(Value::as_str)
                == Some(title)
        })
        .find_map(|task| task.get("id").or_else(|| task.get("ID")).and_then(parse_id))
        .map(TargetTaskId)
}

/// Id of a task returned by `tasks.task.add`: `{"task": {"id": ..}}`, or a
/// bare id on older portals.
pub(crate) fn created_task_id(result: &Value) -> Option<TargetTaskId> {
    result
        .get("task")
        .and_then(|task| task.get("id").or_else(|| task.get("ID")))
        .and_then(parse_id)
        .or_else(|| parse_id(result))
        .map(TargetTaskId)
}

pub(crate) fn parse_workgroups(result: &Value) -> Vec<Workgroup> {
    let list = result
        .get("workgroups")
        .or(Some(result))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    list.iter()
        .filter_map(|group| {
            let id = group.get("id").or_else(|| group.get("ID")).and_then(parse_id)?;
            let name = group
                .get("name")
                .or_else(|| group.get("NAME"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Some(Workgroup { id, name })
        })
        .collect()
}

/// Loose truthiness of a webhook result, as the portal reports deletes.
pub(crate) fn is_truthy(result: &Value) -> bool {
    match result {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty() && o.values().any(is_truthy),
    }
}

#[async_trait]
impl TargetSystem for BitrixClient {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<TargetUserId>, ApiError> {
        let params = json!({"filter": {"EMAIL": email}, "start": 0});
        let result = self.call("user.get", &params, Idempotency::Idempotent).await?;
        Ok(first_user_id(&result))
    }

    async fn add_user(&self, user: &NewTargetUser) -> Result<TargetUserId, ApiError> {
        let result = self
            .call("user.add", &user_fields(user), Idempotency::NonIdempotent)
            .await?;
        parse_id(&result)
            .map(TargetUserId)
            .ok_or_else(|| ApiError::parse("user.add", format!("no user id in {result}")))
    }

    async fn find_task_by_title(&self, title: &str) -> Result<Option<TargetTaskId>, ApiError> {
        let params = json!({"filter": {"TITLE": title}, "select": ["ID", "TITLE"], "start": 0});
        let result = self
            .call("tasks.task.list", &params, Idempotency::Idempotent)
            .await?;
        Ok(exact_task_id(&result, title))
    }

    async fn delete_task(&self, id: TargetTaskId) -> Result<bool, ApiError> {
        let result = self
            .call(
                "tasks.task.delete",
                &json!({"taskId": id.0}),
                Idempotency::NonIdempotent,
            )
            .await?;
        Ok(is_truthy(&result))
    }

    async fn add_task(&self, task: &NewTargetTask) -> Result<TargetTaskId, ApiError> {
        let result = self
            .call("tasks.task.add", &task_fields(task), Idempotency::NonIdempotent)
            .await?;
        created_task_id(&result)
            .ok_or_else(|| ApiError::parse("tasks.task.add", format!("no task id in {result}")))
    }

    async fn add_comment(&self, comment: &NewTargetComment) -> Result<(), ApiError> {
        self.call(
            "task.commentitem.add",
            &comment_params(comment),
            Idempotency::NonIdempotent,
        )
        .await?;
        Ok(())
    }

    async fn list_workgroups(&self) -> Result<Vec<Workgroup>, ApiError> {
        let params = json!({"select": ["ID", "NAME"]});
        let result = self
            .call("socialnetwork.api.workgroup.list", &params, Idempotency::Idempotent)
            .await?;
        Ok(parse_workgroups(&result))
    }
}
