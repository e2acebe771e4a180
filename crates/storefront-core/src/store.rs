//! User store collaborator
//!
//! The account service depends only on the narrow [`UserStore`] contract:
//! point reads by id, revision-checked writes, and selector queries.
//! [`MemoryUserStore`] is the in-process implementation used by the server
//! binary and by tests.

use crate::user::User;
use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Revision conflict on document {0}")]
    Conflict(String),

    #[error("Username already taken: {0}")]
    DuplicateUsername(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Field selector for [`UserStore::find`]; every set field must match
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSelector {
    pub username: Option<String>,
    pub shop_domain: Option<String>,
    pub reset_token_hash: Option<String>,
}

impl UserSelector {
    pub fn username(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            ..Default::default()
        }
    }

    pub fn shop_domain(shop_domain: impl Into<String>) -> Self {
        Self {
            shop_domain: Some(shop_domain.into()),
            ..Default::default()
        }
    }

    pub fn reset_token_hash(hash: impl Into<String>) -> Self {
        Self {
            reset_token_hash: Some(hash.into()),
            ..Default::default()
        }
    }

    pub fn matches(&self, user: &User) -> bool {
        if let Some(username) = &self.username {
            if &user.username != username {
                return false;
            }
        }
        if let Some(shop) = &self.shop_domain {
            if user.shop_domain.as_ref() != Some(shop) {
                return false;
            }
        }
        if let Some(hash) = &self.reset_token_hash {
            match &user.password_reset {
                Some(reset) if &reset.token_hash == hash => {}
                _ => return false,
            }
        }
        true
    }
}

/// Document store holding user records
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetch a user by id
    async fn get(&self, id: &str) -> Result<User, StoreError>;

    /// Write a user; `revision` must equal the stored revision (or be `None`
    /// for a new document) and no other document may hold the same username.
    /// Returns the record carrying its new revision.
    async fn put(&self, id: &str, record: User, revision: Option<&str>)
        -> Result<User, StoreError>;

    /// All users matching the selector
    async fn find(&self, selector: &UserSelector) -> Result<Vec<User>, StoreError>;
}

/// In-memory revisioned user store
#[derive(Default)]
pub struct MemoryUserStore {
    docs: RwLock<HashMap<String, User>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored documents
    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }
}

fn next_revision(current: Option<&str>) -> String {
    let generation = current
        .and_then(|rev| rev.split('-').next())
        .and_then(|n| n.parse::<u64>().ok())
        .unwrap_or(0);
    format!("{}-{}", generation + 1, Uuid::new_v4().simple())
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn get(&self, id: &str) -> Result<User, StoreError> {
        self.docs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn put(
        &self,
        id: &str,
        mut record: User,
        revision: Option<&str>,
    ) -> Result<User, StoreError> {
        let mut docs = self.docs.write().await;

        let stored_revision = docs.get(id).and_then(|u| u.revision.as_deref());
        let exists = docs.contains_key(id);
        if (exists && stored_revision != revision) || (!exists && revision.is_some()) {
            return Err(StoreError::Conflict(id.to_string()));
        }
        if docs
            .values()
            .any(|other| other.id != id && other.username == record.username)
        {
            return Err(StoreError::DuplicateUsername(record.username));
        }

        record.id = id.to_string();
        record.revision = Some(next_revision(revision));
        docs.insert(id.to_string(), record.clone());

        Ok(record)
    }

    async fn find(&self, selector: &UserSelector) -> Result<Vec<User>, StoreError> {
        Ok(self
            .docs
            .read()
            .await
            .values()
            .filter(|user| selector.matches(user))
            .cloned()
            .collect())
    }
}
