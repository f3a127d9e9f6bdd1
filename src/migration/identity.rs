//! Source identity discovery and the per-run identity map.

use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::ApiError;
use crate::events::EventSink;
use crate::model::{SourceIdentity, TargetUserId};
use crate::remote::{all_issues, all_users_with_prefix, SourceSystem};

/// Letters iterated by the directory scan; the source's user search has no
/// "list all" mode, only prefix search.
pub const DIRECTORY_PREFIXES: &str = "abcdefghijklmnopqrstuvwxyz";

pub const SENTINEL_KEY: &str = "Nobody";
pub const SENTINEL_EMAIL: &str = "nobody@example.com";
pub const SENTINEL_NAME: &str = "Nobody";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityOrigin {
    Directory,
    Issue,
    Sentinel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityEntry {
    pub key: String,
    pub email: String,
    pub display_name: String,
    pub origin: IdentityOrigin,
    pub target_id: Option<TargetUserId>,
}

/// Source key to identity, first-seen wins, insertion order kept.
///
/// One map serves both the contact view (key to email, used to find or
/// create accounts) and the target view (key to target user id, used to
/// fill task and comment fields).
#[derive(Debug, Clone, Default)]
pub struct IdentityMap {
    entries: Vec<IdentityEntry>,
    index: HashMap<String, usize>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the key is already present. Returns whether it was added.
    pub fn insert(&mut self, entry: IdentityEntry) -> bool {
        if self.index.contains_key(&entry.key) {
            return false;
        }
        self.index.insert(entry.key.clone(), self.entries.len());
        self.entries.push(entry);
        true
    }

    #[cfg(test)]
    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&IdentityEntry> {
        self.index.get(key).map(|&i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = &IdentityEntry> {
        self.entries.iter()
    }

    pub fn email(&self, key: &str) -> Option<&str> {
        self.get(key).map(|e| e.email.as_str())
    }

    pub fn target_id(&self, key: &str) -> Option<TargetUserId> {
        self.get(key).and_then(|e| e.target_id)
    }

    /// Record the target account for `key`; the first recorded id is kept.
    pub fn set_target(&mut self, key: &str, id: TargetUserId) {
        if let Some(&i) = self.index.get(key) {
            self.entries[i].target_id.get_or_insert(id);
        }
    }

    /// Target id for an optional source key, falling back to the sentinel
    /// for absent, unknown, or unmigrated identities.
    pub fn resolve(&self, key: Option<&str>) -> Option<TargetUserId> {
        key.and_then(|k| self.target_id(k))
            .or_else(|| self.target_id(SENTINEL_KEY))
    }

    pub fn target_view(&self) -> BTreeMap<String, TargetUserId> {
        self.entries
            .iter()
            .filter_map(|e| e.target_id.map(|id| (e.key.clone(), id)))
            .collect()
    }

    pub fn contact_view(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|e| (e.key.clone(), e.email.clone()))
            .collect()
    }

    pub fn missing_targets(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.target_id.is_none())
            .map(|e| e.key.clone())
            .collect()
    }
}

pub fn sentinel_entry() -> IdentityEntry {
    IdentityEntry {
        key: SENTINEL_KEY.to_string(),
        email: SENTINEL_EMAIL.to_string(),
        display_name: SENTINEL_NAME.to_string(),
        origin: IdentityOrigin::Sentinel,
        target_id: None,
    }
}

/// Builds the [`IdentityMap`] from the two discovery paths.
pub struct IdentityResolver<'a> {
    source: &'a dyn SourceSystem,
    sink: &'a dyn EventSink,
}

impl<'a> IdentityResolver<'a> {
    pub fn new(source: &'a dyn SourceSystem, sink: &'a dyn EventSink) -> Self {
        Self { source, sink }
    }

    /// Prefix scan over `a..z`, deduplicated by key, active accounts only.
    ///
    /// Inactive accounts are not marked as seen, so issue-derived discovery
    /// can still recover them when they are referenced as assignees.
    pub async fn scan_directory(&self) -> Result<Vec<SourceIdentity>, ApiError> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut inactive = HashSet::new();
        for letter in DIRECTORY_PREFIXES.chars() {
            let prefix = letter.to_string();
            for user in all_users_with_prefix(self.source, &prefix).await? {
                if seen.contains(&user.key) {
                    continue;
                }
                if !user.active {
                    inactive.insert(user.key);
                    continue;
                }
                seen.insert(user.key.clone());
                found.push(user);
            }
        }
        self.sink.record(
            "identity.directory_scanned",
            json!({"active": found.len(), "inactive_skipped": inactive.len()}),
        );
        Ok(found)
    }

    /// Every distinct assignee of every issue in every project whose key is
    /// not in `seen`, in discovery order. Assignees whose payload hides the
    /// email are looked up by exact username.
    pub async fn discover_from_issues(
        &self,
        seen: &HashSet<String>,
    ) -> Result<Vec<SourceIdentity>, ApiError> {
        let mut keys = HashSet::new();
        let mut found = Vec::new();
        for project in self.source.list_projects().await? {
            for issue in all_issues(self.source, &project.key).await? {
                let Some(assignee) = issue.assignee else {
                    continue;
                };
                if seen.contains(&assignee.key) || !keys.insert(assignee.key.clone()) {
                    continue;
                }
                found.push(self.with_email(assignee).await?);
            }
        }
        self.sink.record(
            "identity.assignees_discovered",
            json!({"new": found.len()}),
        );
        Ok(found)
    }

    async fn with_email(&self, identity: SourceIdentity) -> Result<SourceIdentity, ApiError> {
        if identity.email.is_some() {
            return Ok(identity);
        }
        let email = self
            .source
            .find_user(&identity.key)
            .await?
            .and_then(|full| full.email);
        Ok(SourceIdentity { email, ..identity })
    }

    /// Directory scan first, then issue-derived discovery for keys not yet
    /// seen, then the sentinel. Identities without an email are skipped.
    pub async fn resolve(&self) -> Result<IdentityMap, ApiError> {
        let directory = self.scan_directory().await?;
        // Only keys that produced a usable email count as seen; issue
        // discovery may still find an address for the rest.
        let seen: HashSet<String> = directory
            .iter()
            .filter(|u| u.email.is_some())
            .map(|u| u.key.clone())
            .collect();
        let discovered = self.discover_from_issues(&seen).await?;

        let mut map = IdentityMap::new();
        let sources = directory
            .into_iter()
            .map(|u| (u, IdentityOrigin::Directory))
            .chain(discovered.into_iter().map(|u| (u, IdentityOrigin::Issue)));
        for (user, origin) in sources {
            let Some(email) = user.email else {
                self.sink.record(
                    "identity.skipped",
                    json!({"key": user.key, "reason": "no email"}),
                );
                continue;
            };
            map.insert(IdentityEntry {
                key: user.key,
                email,
                display_name: user.display_name,
                origin,
                target_id: None,
            });
        }
        map.insert(sentinel_entry());

        self.sink.record(
            "identity.resolved",
            json!({"identities": map.len(), "contacts": map.contact_view()}),
        );
        Ok(map)
    }
}
