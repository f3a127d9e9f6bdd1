use serde_json::json;
use std::collections::{HashMap, VecDeque};

use crate::error::ApiError;
use crate::events::EventSink;
use crate::model::{NewTargetUser, TargetUserId};
use crate::remote::TargetSystem;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

/// Bounded email to target id memo, oldest entry evicted first.
/// One instance lives for one run.
#[derive(Debug)]
pub struct EmailCache {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashMap<String, TargetUserId>,
}

impl EmailCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashMap::new(),
        }
    }

    pub fn get(&self, email: &str) -> Option<TargetUserId> {
        self.ids.get(email).copied()
    }

    pub fn insert(&mut self, email: &str, id: TargetUserId) {
        if self.ids.insert(email.to_string(), id).is_some() {
            return;
        }
        self.order.push_back(email.to_string());
        while self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ensured {
    Existing(TargetUserId),
    Created(TargetUserId),
}

impl Ensured {
    pub fn id(self) -> TargetUserId {
        match self {
            Ensured::Existing(id) | Ensured::Created(id) => id,
        }
    }

    pub fn was_created(self) -> bool {
        matches!(self, Ensured::Created(_))
    }
}

/// First whitespace token and the remainder, joined by single spaces.
pub fn split_display_name(display_name: &str) -> (String, String) {
    let mut words = display_name.split_whitespace();
    let first = words.next().unwrap_or_default().to_string();
    let rest = words.collect::<Vec<_>>().join(" ");
    (first, rest)
}

pub struct UserMigrator<'a> {
    target: &'a dyn TargetSystem,
    sink: &'a dyn EventSink,
    department_id: u64,
    cache: EmailCache,
}

impl<'a> UserMigrator<'a> {
    pub fn new(target: &'a dyn TargetSystem, sink: &'a dyn EventSink, department_id: u64) -> Self {
        Self::with_cache_capacity(target, sink, department_id, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_cache_capacity(
        target: &'a dyn TargetSystem,
        sink: &'a dyn EventSink,
        department_id: u64,
        capacity: usize,
    ) -> Self {
        Self {
            target,
            sink,
            department_id,
            cache: EmailCache::new(capacity),
        }
    }

    /// Existing target account for `email`, if any. Never creates.
    pub async fn lookup(&mut self, email: &str) -> Result<Option<TargetUserId>, ApiError> {
        if let Some(id) = self.cache.get(email) {
            return Ok(Some(id));
        }
        let found = self.target.find_user_by_email(email).await?;
        if let Some(id) = found {
            self.cache.insert(email, id);
        }
        Ok(found)
    }

    /// Lookup-before-create. Existing accounts are returned untouched.
    pub async fn ensure_user(
        &mut self,
        email: &str,
        display_name: &str,
    ) -> Result<Ensured, ApiError> {
        if let Some(id) = self.lookup(email).await? {
            return Ok(Ensured::Existing(id));
        }

        let (first_name, last_name) = split_display_name(display_name);
        let id = self
            .target
            .add_user(&NewTargetUser {
                email: email.to_string(),
                first_name,
                last_name,
                department_id: self.department_id,
            })
            .await?;
        self.cache.insert(email, id);
        self.sink
            .record("user.created", json!({"email": email, "id": id}));
        Ok(Ensured::Created(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::MemorySink;
    use crate::remote::fake::FakeTarget;

    #[test]
    fn split_names() {
        assert_eq!(split_display_name("John Doe"), ("John".into(), "Doe".into()));
        assert_eq!(
            split_display_name("  Maria  de la   Cruz "),
            ("Maria".into(), "de la Cruz".into())
        );
        assert_eq!(split_display_name("Cher"), ("Cher".into(), String::new()));
        assert_eq!(split_display_name(""), (String::new(), String::new()));
    }

    #[test]
    fn cache_evicts_oldest() {
        let mut cache = EmailCache::new(2);
        cache.insert("a@x.com", TargetUserId(1));
        cache.insert("b@x.com", TargetUserId(2));
        cache.insert("a@x.com", TargetUserId(1));
        cache.insert("c@x.com", TargetUserId(3));

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a@x.com"), None);
        assert_eq!(cache.get("b@x.com"), Some(TargetUserId(2)));
        assert_eq!(cache.get("c@x.com"), Some(TargetUserId(3)));
    }

    #[tokio::test]
    async fn ensure_user_is_idempotent() {
        let target = FakeTarget::new();
        let sink = MemorySink::default();
        let mut users = UserMigrator::new(&target, &sink, 1);

        let first = users.ensure_user("jdoe@x.com", "John Doe").await.unwrap();
        let second = users.ensure_user("jdoe@x.com", "John Doe").await.unwrap();

        assert!(first.was_created());
        assert_eq!(second, Ensured::Existing(first.id()));
        assert_eq!(target.snapshot(|s| s.user_creates), 1);
        assert_eq!(sink.count("user.created"), 1);
    }

    #[tokio::test]
    async fn idempotent_across_migrator_instances() {
        let target = FakeTarget::new();
        let sink = MemorySink::default();

        let first = UserMigrator::new(&target, &sink, 1)
            .ensure_user("jdoe@x.com", "John Doe")
            .await
            .unwrap();
        let second = UserMigrator::new(&target, &sink, 1)
            .ensure_user("jdoe@x.com", "John Doe")
            .await
            .unwrap();

        assert_eq!(first.id(), second.id());
        assert_eq!(target.snapshot(|s| (s.user_creates, s.user_lookups)), (1, 2));
    }

    #[tokio::test]
    async fn existing_account_is_not_touched() {
        let target = FakeTarget::new().with_user(40, "jdoe@x.com");
        let sink = MemorySink::default();
        let mut users = UserMigrator::new(&target, &sink, 1);

        let ensured = users.ensure_user("jdoe@x.com", "Someone Else").await.unwrap();

        assert_eq!(ensured, Ensured::Existing(TargetUserId(40)));
        let user = target.snapshot(|s| s.users[0].clone());
        assert_eq!(user.first_name, "");
        assert_eq!(target.snapshot(|s| s.user_creates), 0);
    }

    #[tokio::test]
    async fn created_user_gets_split_name_and_department() {
        let target = FakeTarget::new();
        let sink = MemorySink::default();
        let mut users = UserMigrator::new(&target, &sink, 9);

        users.ensure_user("mc@x.com", "Maria de la Cruz").await.unwrap();

        let user = target.snapshot(|s| s.users[0].clone());
        assert_eq!(user.first_name, "Maria");
        assert_eq!(user.last_name, "de la Cruz");
    }

    #[tokio::test]
    async fn cache_hit_skips_lookup() {
        let target = FakeTarget::new().with_user(5, "a@x.com");
        let sink = MemorySink::default();
        let mut users = UserMigrator::new(&target, &sink, 1);

        users.lookup("a@x.com").await.unwrap();
        users.lookup("a@x.com").await.unwrap();

        assert_eq!(target.snapshot(|s| s.user_lookups), 1);
    }

    #[tokio::test]
    async fn lookup_misses_are_not_cached() {
        let target = FakeTarget::new();
        let sink = MemorySink::default();
        let mut users = UserMigrator::new(&target, &sink, 1);

        assert_eq!(users.lookup("new@x.com").await.unwrap(), None);
        assert_eq!(users.lookup("new@x.com").await.unwrap(), None);

        assert_eq!(target.snapshot(|s| s.user_lookups), 2);
    }

    #[tokio::test]
    async fn create_failure_propagates() {
        let target = FakeTarget {
            reject_emails: vec!["bad@x.com".into()],
            ..FakeTarget::default()
        };
        let sink = MemorySink::default();
        let mut users = UserMigrator::new(&target, &sink, 1);

        let err = users.ensure_user("bad@x.com", "Bad Mail").await.unwrap_err();

        assert_eq!(err.operation(), "user.add");
        assert_eq!(sink.count("user.created"), 0);
    }
}
