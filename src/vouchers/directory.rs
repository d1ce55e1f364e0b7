//! Read-only user and task snapshots fetched once per import.

use rocket_db_pools::sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

/// Projection of a platform user used to resolve `muid` cells.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct UserLookup {
    pub id: Uuid,
    pub muid: String,
    pub email: String,
    pub first_name: String,
    pub last_name: Option<String>,
}

impl UserLookup {
    /// Display name: first name alone when no last name is recorded.
    pub fn full_name(&self) -> String {
        match self.last_name.as_deref() {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        }
    }
}

/// Projection of a task used to resolve `hashtag` cells.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct TaskLookup {
    pub id: Uuid,
    pub hashtag: String,
}

/// Users keyed by muid.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    by_muid: HashMap<String, UserLookup>,
}

impl UserDirectory {
    pub fn new(users: impl IntoIterator<Item = UserLookup>) -> Self {
        Self {
            by_muid: users
                .into_iter()
                .map(|user| (user.muid.clone(), user))
                .collect(),
        }
    }

    pub fn get(&self, muid: &str) -> Option<&UserLookup> {
        self.by_muid.get(muid)
    }

    pub fn len(&self) -> usize {
        self.by_muid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_muid.is_empty()
    }
}

/// Task ids keyed by hashtag.
#[derive(Debug, Clone, Default)]
pub struct TaskDirectory {
    by_hashtag: HashMap<String, Uuid>,
}

impl TaskDirectory {
    pub fn new(tasks: impl IntoIterator<Item = TaskLookup>) -> Self {
        Self {
            by_hashtag: tasks
                .into_iter()
                .map(|task| (task.hashtag, task.id))
                .collect(),
        }
    }

    pub fn get(&self, hashtag: &str) -> Option<Uuid> {
        self.by_hashtag.get(hashtag).copied()
    }

    pub fn len(&self) -> usize {
        self.by_hashtag.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hashtag.is_empty()
    }
}
