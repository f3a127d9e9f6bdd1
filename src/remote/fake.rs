//! In-memory stand-ins for both remote systems, recording every call.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use super::{Page, SourceSystem, TargetSystem};
use crate::error::ApiError;
use crate::model::{
    NewTargetComment, NewTargetTask, NewTargetUser, SourceComment, SourceIdentity,
    SourceProject, SourceWorkItem, TargetTaskId, TargetUserId, Workgroup,
};

pub fn identity(key: &str, email: &str, name: &str, active: bool) -> SourceIdentity {
    SourceIdentity {
        key: key.to_string(),
        email: Some(email.to_string()),
        display_name: name.to_string(),
        active,
    }
}

pub fn work_item(key: &str, summary: &str, assignee: Option<&SourceIdentity>) -> SourceWorkItem {
    SourceWorkItem {
        key: key.to_string(),
        summary: summary.to_string(),
        description: Some(format!("Description of {key}")),
        assignee: assignee.cloned(),
        reporter: None,
        created_at: Some("2024-01-05T10:00:00.000+0000".into()),
        updated_at: Some("2024-01-06T10:00:00.000+0000".into()),
    }
}

pub fn comment(id: &str, body: &str, author: Option<&str>) -> SourceComment {
    SourceComment {
        id: Some(id.to_string()),
        body: body.to_string(),
        author_key: author.map(String::from),
        created_at: Some("2024-01-07T09:00:00.000+0000".into()),
    }
}

#[derive(Default)]
pub struct FakeSource {
    pub page_size: usize,
    pub users: Vec<SourceIdentity>,
    pub projects: Vec<SourceProject>,
    pub issues: HashMap<String, Vec<SourceWorkItem>>,
    pub comments: HashMap<String, Vec<SourceComment>>,
    pub fail_issues_for: Option<String>,
    calls: Mutex<Vec<String>>,
}

impl FakeSource {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user: SourceIdentity) -> Self {
        self.users.push(user);
        self
    }

    pub fn with_project(mut self, key: &str, issues: Vec<SourceWorkItem>) -> Self {
        self.projects.push(SourceProject {
            key: key.to_string(),
            name: format!("Project {key}"),
        });
        self.issues.insert(key.to_string(), issues);
        self
    }

    pub fn with_comments(mut self, issue_key: &str, comments: Vec<SourceComment>) -> Self {
        self.comments.insert(issue_key.to_string(), comments);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn page<T: Clone>(&self, all: &[T], offset: usize) -> Page<T> {
        let end = all.len().min(offset + self.page_size.max(1));
        let items = all.get(offset..end).unwrap_or_default().to_vec();
        Page::full(items)
    }
}

/// Prefix match the way a directory search does: on the handle, any word of
/// the display name, or the email.
fn matches_prefix(user: &SourceIdentity, prefix: &str) -> bool {
    let prefix = prefix.to_lowercase();
    user.key.to_lowercase().starts_with(&prefix)
        || user
            .display_name
            .split_whitespace()
            .any(|w| w.to_lowercase().starts_with(&prefix))
        || user
            .email
            .as_deref()
            .is_some_and(|e| e.to_lowercase().starts_with(&prefix))
}

#[async_trait]
impl SourceSystem for FakeSource {
    fn page_size(&self) -> usize {
        self.page_size
    }

    async fn search_users(&self, prefix: &str, offset: usize) -> Result<Page<SourceIdentity>, ApiError> {
        self.log(format!("search_users {prefix} {offset}"));
        let matching: Vec<SourceIdentity> = self
            .users
            .iter()
            .filter(|u| matches_prefix(u, prefix))
            .cloned()
            .collect();
        Ok(self.page(&matching, offset))
    }

    async fn find_user(&self, username: &str) -> Result<Option<SourceIdentity>, ApiError> {
        self.log(format!("find_user {username}"));
        Ok(self.users.iter().find(|u| u.key == username).cloned())
    }

    async fn list_projects(&self) -> Result<Vec<SourceProject>, ApiError> {
        self.log("list_projects".into());
        Ok(self.projects.clone())
    }

    async fn search_issues(&self, project_key: &str, offset: usize) -> Result<Page<SourceWorkItem>, ApiError> {
        self.log(format!("search_issues {project_key} {offset}"));
        if self.fail_issues_for.as_deref() == Some(project_key) {
            return Err(ApiError::Http {
                operation: "search_issues".into(),
                status: 403,
                message: "forbidden".into(),
            });
        }
        let issues = self.issues.get(project_key).cloned().unwrap_or_default();
        Ok(self.page(&issues, offset))
    }

    async fn list_comments(&self, issue_key: &str, offset: usize) -> Result<Page<SourceComment>, ApiError> {
        self.log(format!("list_comments {issue_key} {offset}"));
        let comments = self.comments.get(issue_key).cloned().unwrap_or_default();
        Ok(self.page(&comments, offset))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeUser {
    pub id: TargetUserId,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeTask {
    pub id: TargetTaskId,
    pub task: NewTargetTask,
}

#[derive(Default)]
pub struct TargetState {
    pub next_id: u64,
    pub users: Vec<FakeUser>,
    pub tasks: Vec<FakeTask>,
    pub comments: Vec<NewTargetComment>,
    pub workgroups: Vec<Workgroup>,
    pub user_lookups: usize,
    pub user_creates: usize,
    pub task_lookups: usize,
    pub task_creates: usize,
    pub task_deletes: usize,
    pub comment_creates: usize,
}

#[derive(Default)]
pub struct FakeTarget {
    pub state: Mutex<TargetState>,
    /// Emails whose `add_user` call fails with an application error.
    pub reject_emails: Vec<String>,
    /// Task titles whose `add_task` call fails with an application error.
    pub reject_titles: Vec<String>,
    pub refuse_deletes: bool,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_user(self, id: u64, email: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.users.push(FakeUser {
                id: TargetUserId(id),
                email: email.to_string(),
                first_name: String::new(),
                last_name: String::new(),
            });
            state.next_id = state.next_id.max(id);
        }
        self
    }

    pub fn with_workgroup(self, id: u64, name: &str) -> Self {
        self.state.lock().unwrap().workgroups.push(Workgroup {
            id,
            name: name.to_string(),
        });
        self
    }

    pub fn snapshot<R>(&self, f: impl FnOnce(&TargetState) -> R) -> R {
        f(&self.state.lock().unwrap())
    }

    fn next_id(state: &mut TargetState) -> u64 {
        state.next_id += 1;
        state.next_id
    }
}

fn rejected(operation: &str, message: &str) -> ApiError {
    ApiError::Remote {
        operation: operation.into(),
        message: message.into(),
    }
}

#[async_trait]
impl TargetSystem for FakeTarget {
    async fn find_user_by_email(&self, email: &str) -> Result<Option<TargetUserId>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.user_lookups += 1;
        Ok(state.users.iter().find(|u| u.email == email).map(|u| u.id))
    }

    async fn add_user(&self, user: &NewTargetUser) -> Result<TargetUserId, ApiError> {
        if self.reject_emails.contains(&user.email) {
            return Err(rejected("user.add", "Email is invalid"));
        }
        let mut state = self.state.lock().unwrap();
        state.user_creates += 1;
        let id = TargetUserId(Self::next_id(&mut state));
        state.users.push(FakeUser {
            id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
        });
        Ok(id)
    }

    async fn find_task_by_title(&self, title: &str) -> Result<Option<TargetTaskId>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.task_lookups += 1;
        Ok(state
            .tasks
            .iter()
            .find(|t| t.task.title == title)
            .map(|t| t.id))
    }

    async fn delete_task(&self, id: TargetTaskId) -> Result<bool, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.task_deletes += 1;
        if self.refuse_deletes {
            return Ok(false);
        }
        let before = state.tasks.len();
        state.tasks.retain(|t| t.id != id);
        Ok(state.tasks.len() < before)
    }

    async fn add_task(&self, task: &NewTargetTask) -> Result<TargetTaskId, ApiError> {
        if self.reject_titles.contains(&task.title) {
            return Err(rejected("tasks.task.add", "Task could not be created"));
        }
        let mut state = self.state.lock().unwrap();
        state.task_creates += 1;
        let id = TargetTaskId(Self::next_id(&mut state));
        state.tasks.push(FakeTask {
            id,
            task: task.clone(),
        });
        Ok(id)
    }

    async fn add_comment(&self, comment: &NewTargetComment) -> Result<(), ApiError> {
        let mut state = self.state.lock().unwrap();
        state.comment_creates += 1;
        state.comments.push(comment.clone());
        Ok(())
    }

    async fn list_workgroups(&self) -> Result<Vec<Workgroup>, ApiError> {
        Ok(self.state.lock().unwrap().workgroups.clone())
    }
}

/// Minimal HTTP/1.1 server answering every request with the next canned
/// `(status, body)` pair; the last pair repeats once the list runs out.
pub struct CannedServer {
    pub base_url: String,
    hits: std::sync::Arc<std::sync::atomic::AtomicUsize>,
    bodies: std::sync::Arc<Mutex<Vec<String>>>,
}

impl CannedServer {
    pub async fn start(responses: Vec<(u16, &str)>) -> Self {
        use std::sync::atomic::Ordering;
        use std::sync::Arc;
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let responses: Vec<(u16, String)> = responses
            .into_iter()
            .map(|(status, body)| (status, body.to_string()))
            .collect();
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let bodies = Arc::new(Mutex::new(Vec::new()));

        let (served, seen) = (hits.clone(), bodies.clone());
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let request = read_request(&mut stream).await;
                seen.lock().unwrap().push(request);
                let n = served.fetch_add(1, Ordering::SeqCst);
                let (status, body) = &responses[n.min(responses.len() - 1)];
                let reply = format!(
                    "HTTP/1.1 {status} Canned\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(reply.as_bytes()).await;
                let _ = stream.shutdown().await;
            }
        });

        Self {
            base_url,
            hits,
            bodies,
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(std::sync::atomic::Ordering::SeqCst)
    }

    /// Raw request bodies received so far.
    pub fn request_bodies(&self) -> Vec<String> {
        self.bodies.lock().unwrap().clone()
    }
}

async fn read_request(stream: &mut tokio::net::TcpStream) -> String {
    use tokio::io::AsyncReadExt;

    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let Ok(n) = stream.read(&mut chunk).await else {
            break;
        };
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return String::from_utf8_lossy(&buf[end + 4..end + 4 + length]).into_owned();
            }
        }
    }
    String::new()
}
