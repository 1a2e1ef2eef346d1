//! Record-store boundary: trait seams for users, tasks and their audit
//! trail, plus the MongoDB implementations used in production.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, Document};
use mongodb::{Collection, Database};

use crate::error::ApiError;
use crate::models::{AuditLog, Priority, Status, Task, User};

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn create(&self, user: &User) -> Result<(), ApiError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError>;
    async fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, ApiError>;
    async fn find_all(&self) -> Result<Vec<User>, ApiError>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create(&self, task: &Task) -> Result<(), ApiError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, ApiError>;
    /// Exact-match filters; `None` imposes no constraint. Results come back
    /// in natural store order, the service layer sorts.
    async fn find_filtered(
        &self,
        status: Option<Status>,
        priority: Option<Priority>,
    ) -> Result<Vec<Task>, ApiError>;
    async fn find_by_assignee(&self, user_id: &str) -> Result<Vec<Task>, ApiError>;
    async fn find_by_creator(&self, user_id: &str) -> Result<Vec<Task>, ApiError>;
    /// Overdue is user-agnostic here; user scoping happens at the
    /// aggregation layer so the same query can be reused.
    async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Task>, ApiError>;
    async fn update(&self, task: &Task) -> Result<(), ApiError>;
    /// Deletes the task and cascades to its audit entries.
    async fn delete(&self, id: &str) -> Result<(), ApiError>;
    async fn append_audit(&self, entry: &AuditLog) -> Result<(), ApiError>;
    /// Most recent entries first, capped at `limit`.
    async fn recent_audit(&self, task_id: &str, limit: usize) -> Result<Vec<AuditLog>, ApiError>;
}

pub struct MongoUserStore {
    db: Database,
}

impl MongoUserStore {
    pub fn new(db: Database) -> Self {
        MongoUserStore { db }
    }

    fn coll(&self) -> Collection<User> {
        self.db.collection::<User>("users")
    }
}

#[async_trait]
impl UserStore for MongoUserStore {
    async fn create(&self, user: &User) -> Result<(), ApiError> {
        self.coll().insert_one(user).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError> {
        Ok(self.coll().find_one(doc! { "id": id }).await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
        Ok(self.coll().find_one(doc! { "email": email }).await?)
    }

    async fn update_profile(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
    ) -> Result<Option<User>, ApiError> {
        let Some(mut user) = self.find_by_id(id).await? else {
            return Ok(None);
        };
        if let Some(name) = name {
            user.name = name.to_string();
        }
        if let Some(email) = email {
            user.email = email.to_string();
        }
        user.updated_at = Utc::now();
        self.coll()
            .replace_one(doc! { "id": id }, &user)
            .await?;
        Ok(Some(user))
    }

    async fn find_all(&self) -> Result<Vec<User>, ApiError> {
        Ok(self.coll().find(doc! {}).await?.try_collect().await?)
    }
}

pub struct MongoTaskStore {
    db: Database,
}

impl MongoTaskStore {
    pub fn new(db: Database) -> Self {
        MongoTaskStore { db }
    }

    fn tasks(&self) -> Collection<Task> {
        self.db.collection::<Task>("tasks")
    }

    fn audits(&self) -> Collection<AuditLog> {
        self.db.collection::<AuditLog>("audit_logs")
    }
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    async fn create(&self, task: &Task) -> Result<(), ApiError> {
        self.tasks().insert_one(task).await?;
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Task>, ApiError> {
        Ok(self.tasks().find_one(doc! { "id": id }).await?)
    }

    async fn find_filtered(
        &self,
        status: Option<Status>,
        priority: Option<Priority>,
    ) -> Result<Vec<Task>, ApiError> {
        // Build the filter field-by-field; an absent option must not turn
        // into a "field is null" match.
        let mut filter = Document::new();
        if let Some(status) = status {
            filter.insert("status", status.as_str());
        }
        if let Some(priority) = priority {
            filter.insert("priority", priority.as_str());
        }
        Ok(self.tasks().find(filter).await?.try_collect().await?)
    }

    async fn find_by_assignee(&self, user_id: &str) -> Result<Vec<Task>, ApiError> {
        Ok(self
            .tasks()
            .find(doc! { "assignedToId": user_id })
            .await?
            .try_collect()
            .await?)
    }

    async fn find_by_creator(&self, user_id: &str) -> Result<Vec<Task>, ApiError> {
        Ok(self
            .tasks()
            .find(doc! { "creatorId": user_id })
            .await?
            .try_collect()
            .await?)
    }

    async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Task>, ApiError> {
        // Due dates are stored in chrono's string form, so the cutoff is
        // applied here rather than in a store-side range query.
        let mut tasks: Vec<Task> = self
            .tasks()
            .find(doc! { "status": { "$ne": Status::Completed.as_str() } })
            .await?
            .try_collect()
            .await?;
        tasks.retain(|t| t.due_date < now);
        Ok(tasks)
    }

    async fn update(&self, task: &Task) -> Result<(), ApiError> {
        self.tasks()
            .replace_one(doc! { "id": &task.id }, task)
            .await?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<(), ApiError> {
        self.tasks().delete_one(doc! { "id": id }).await?;
        self.audits().delete_many(doc! { "taskId": id }).await?;
        Ok(())
    }

    async fn append_audit(&self, entry: &AuditLog) -> Result<(), ApiError> {
        self.audits().insert_one(entry).await?;
        Ok(())
    }

    async fn recent_audit(&self, task_id: &str, limit: usize) -> Result<Vec<AuditLog>, ApiError> {
        let mut entries: Vec<AuditLog> = self
            .audits()
            .find(doc! { "taskId": task_id })
            .await?
            .try_collect()
            .await?;
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit);
        Ok(entries)
    }
}

#[cfg(test)]
pub mod memory {
    //! In-memory store doubles for engine and aggregator tests.

    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[derive(Default)]
    pub struct MemoryStore {
        users: Mutex<HashMap<String, User>>,
        tasks: Mutex<HashMap<String, Task>>,
        audits: Mutex<Vec<AuditLog>>,
    }

    impl MemoryStore {
        pub fn new() -> Arc<Self> {
            Arc::new(MemoryStore::default())
        }

        pub fn seed_user(&self, name: &str, email: &str) -> User {
            let now = Utc::now();
            let user = User {
                id: Uuid::new_v4().to_string(),
                email: email.to_string(),
                name: name.to_string(),
                password: "hash".to_string(),
                created_at: now,
                updated_at: now,
            };
            self.users
                .lock()
                .unwrap()
                .insert(user.id.clone(), user.clone());
            user
        }

        pub fn task_snapshot(&self, id: &str) -> Option<Task> {
            self.tasks.lock().unwrap().get(id).cloned()
        }

        pub fn audit_entries(&self, task_id: &str) -> Vec<AuditLog> {
            self.audits
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.task_id == task_id)
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl UserStore for MemoryStore {
        async fn create(&self, user: &User) -> Result<(), ApiError> {
            self.users
                .lock()
                .unwrap()
                .insert(user.id.clone(), user.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<User>, ApiError> {
            Ok(self.users.lock().unwrap().get(id).cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Option<User>, ApiError> {
            Ok(self
                .users
                .lock()
                .unwrap()
                .values()
                .find(|u| u.email == email)
                .cloned())
        }

        async fn update_profile(
            &self,
            id: &str,
            name: Option<&str>,
            email: Option<&str>,
        ) -> Result<Option<User>, ApiError> {
            let mut users = self.users.lock().unwrap();
            if let Some(user) = users.get_mut(id) {
                if let Some(name) = name {
                    user.name = name.to_string();
                }
                if let Some(email) = email {
                    user.email = email.to_string();
                }
                user.updated_at = Utc::now();
                return Ok(Some(user.clone()));
            }
            Ok(None)
        }

        async fn find_all(&self) -> Result<Vec<User>, ApiError> {
            let mut users: Vec<User> = self.users.lock().unwrap().values().cloned().collect();
            users.sort_by(|a, b| a.id.cmp(&b.id));
            Ok(users)
        }
    }

    #[async_trait]
    impl TaskStore for MemoryStore {
        async fn create(&self, task: &Task) -> Result<(), ApiError> {
            self.tasks
                .lock()
                .unwrap()
                .insert(task.id.clone(), task.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &str) -> Result<Option<Task>, ApiError> {
            Ok(self.tasks.lock().unwrap().get(id).cloned())
        }

        async fn find_filtered(
            &self,
            status: Option<Status>,
            priority: Option<Priority>,
        ) -> Result<Vec<Task>, ApiError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| status.map_or(true, |s| t.status == s))
                .filter(|t| priority.map_or(true, |p| t.priority == p))
                .cloned()
                .collect())
        }

        async fn find_by_assignee(&self, user_id: &str) -> Result<Vec<Task>, ApiError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.assigned_to_id.as_deref() == Some(user_id))
                .cloned()
                .collect())
        }

        async fn find_by_creator(&self, user_id: &str) -> Result<Vec<Task>, ApiError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.creator_id == user_id)
                .cloned()
                .collect())
        }

        async fn find_overdue(&self, now: DateTime<Utc>) -> Result<Vec<Task>, ApiError> {
            Ok(self
                .tasks
                .lock()
                .unwrap()
                .values()
                .filter(|t| t.due_date < now && t.status != Status::Completed)
                .cloned()
                .collect())
        }

        async fn update(&self, task: &Task) -> Result<(), ApiError> {
            self.tasks
                .lock()
                .unwrap()
                .insert(task.id.clone(), task.clone());
            Ok(())
        }

        async fn delete(&self, id: &str) -> Result<(), ApiError> {
            self.tasks.lock().unwrap().remove(id);
            self.audits.lock().unwrap().retain(|e| e.task_id != id);
            Ok(())
        }

        async fn append_audit(&self, entry: &AuditLog) -> Result<(), ApiError> {
            self.audits.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn recent_audit(
            &self,
            task_id: &str,
            limit: usize,
        ) -> Result<Vec<AuditLog>, ApiError> {
            // The log is append-only, so reverse insertion order is
            // newest-first.
            let mut entries: Vec<AuditLog> = self
                .audits
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.task_id == task_id)
                .cloned()
                .collect();
            entries.reverse();
            entries.truncate(limit);
            Ok(entries)
        }
    }
}
