use anyhow::Result;
use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, SqlErr, Statement,
};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::domain::ServerStatus;

pub mod migrator;
pub mod repositories;

pub use repositories::api_key::{ApiKey, NewApiKey};
pub use repositories::server::{NewServerRecord, ServerRecord};
pub use repositories::user::{NewUser, User, UserUpdate};

/// Errors surfaced by the credential store. `NotFound` and `AlreadyExists` are
/// domain outcomes; `Database` is a transport or engine failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(#[from] DbErr),
}

impl StoreError {
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Maps a write error, turning unique-constraint violations into `AlreadyExists`.
    pub(crate) fn from_write(err: DbErr, entity: &str) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => {
                Self::AlreadyExists(conflict_subject(entity, &detail))
            }
            _ => Self::Database(err),
        }
    }
}

fn conflict_subject(entity: &str, detail: &str) -> String {
    // SQLite reports "UNIQUE constraint failed: users.email"
    detail
        .rsplit_once('.')
        .map(|(_, column)| column.trim())
        .filter(|column| {
            !column.is_empty() && column.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        .map_or_else(
            || entity.to_string(),
            |column| format!("{entity} with this {column}"),
        )
}

/// Persistence contract used by authentication, authorization and the
/// lifecycle orchestrator.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError>;

    async fn get_user_by_id(&self, id: i64) -> Result<User, StoreError>;

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError>;

    /// Returns the user together with the stored password hash.
    async fn get_user_with_password_hash(
        &self,
        username: &str,
    ) -> Result<(User, String), StoreError>;

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<User, StoreError>;

    /// Removes the user and every API key the user owns.
    async fn delete_user(&self, id: i64) -> Result<(), StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    async fn record_login(&self, id: i64) -> Result<(), StoreError>;

    async fn create_api_key(&self, key: NewApiKey) -> Result<ApiKey, StoreError>;

    async fn get_api_key(&self, key: &str) -> Result<ApiKey, StoreError>;

    async fn get_api_key_by_id(&self, id: i64) -> Result<ApiKey, StoreError>;

    async fn delete_api_key(&self, id: i64) -> Result<(), StoreError>;

    async fn list_api_keys_by_user(&self, user_id: i64) -> Result<Vec<ApiKey>, StoreError>;

    async fn touch_api_key(&self, id: i64) -> Result<(), StoreError>;

    async fn create_server_record(
        &self,
        record: NewServerRecord,
    ) -> Result<ServerRecord, StoreError>;

    async fn get_server_by_name(&self, server_name: &str) -> Result<ServerRecord, StoreError>;

    async fn list_servers_by_owner(&self, owner_id: i64) -> Result<Vec<ServerRecord>, StoreError>;

    async fn list_servers(&self) -> Result<Vec<ServerRecord>, StoreError>;

    async fn update_server_status(
        &self,
        server_name: &str,
        status: ServerStatus,
    ) -> Result<ServerRecord, StoreError>;

    async fn delete_server_record(&self, server_name: &str) -> Result<(), StoreError>;
}

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite://").trim_start_matches("sqlite:");
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .sqlx_logging(false);

        // Each pooled in-memory connection would otherwise see its own empty database.
        if !db_url.contains(":memory:") {
            opt.idle_timeout(Duration::from_secs(300))
                .max_lifetime(Duration::from_secs(600));
        }

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    /// Single-connection in-memory store, used by tests and the `memory` backend.
    pub async fn in_memory() -> Result<Self> {
        Self::with_pool_options("sqlite::memory:", 1, 1).await
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn user_repo(&self) -> repositories::user::UserRepository {
        repositories::user::UserRepository::new(self.conn.clone())
    }

    fn api_key_repo(&self) -> repositories::api_key::ApiKeyRepository {
        repositories::api_key::ApiKeyRepository::new(self.conn.clone())
    }

    fn server_repo(&self) -> repositories::server::ServerRepository {
        repositories::server::ServerRepository::new(self.conn.clone())
    }
}

#[async_trait]
impl CredentialStore for Store {
    async fn create_user(&self, user: NewUser) -> Result<User, StoreError> {
        self.user_repo().create(user).await
    }

    async fn get_user_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.user_repo().get_by_id(id).await
    }

    async fn get_user_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.user_repo().get_by_username(username).await
    }

    async fn get_user_with_password_hash(
        &self,
        username: &str,
    ) -> Result<(User, String), StoreError> {
        self.user_repo().get_by_username_with_password(username).await
    }

    async fn update_user(&self, id: i64, update: UserUpdate) -> Result<User, StoreError> {
        self.user_repo().update(id, update).await
    }

    async fn delete_user(&self, id: i64) -> Result<(), StoreError> {
        self.user_repo().delete(id).await
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.user_repo().list().await
    }

    async fn record_login(&self, id: i64) -> Result<(), StoreError> {
        self.user_repo().record_login(id).await
    }

    async fn create_api_key(&self, key: NewApiKey) -> Result<ApiKey, StoreError> {
        self.api_key_repo().create(key).await
    }

    async fn get_api_key(&self, key: &str) -> Result<ApiKey, StoreError> {
        self.api_key_repo().get_by_key(key).await
    }

    async fn get_api_key_by_id(&self, id: i64) -> Result<ApiKey, StoreError> {
        self.api_key_repo().get_by_id(id).await
    }

    async fn delete_api_key(&self, id: i64) -> Result<(), StoreError> {
        self.api_key_repo().delete(id).await
    }

    async fn list_api_keys_by_user(&self, user_id: i64) -> Result<Vec<ApiKey>, StoreError> {
        self.api_key_repo().list_by_user(user_id).await
    }

    async fn touch_api_key(&self, id: i64) -> Result<(), StoreError> {
        self.api_key_repo().touch(id).await
    }

    async fn create_server_record(
        &self,
        record: NewServerRecord,
    ) -> Result<ServerRecord, StoreError> {
        self.server_repo().create(record).await
    }

    async fn get_server_by_name(&self, server_name: &str) -> Result<ServerRecord, StoreError> {
        self.server_repo().get_by_name(server_name).await
    }

    async fn list_servers_by_owner(&self, owner_id: i64) -> Result<Vec<ServerRecord>, StoreError> {
        self.server_repo().list_by_owner(owner_id).await
    }

    async fn list_servers(&self) -> Result<Vec<ServerRecord>, StoreError> {
        self.server_repo().list().await
    }

    async fn update_server_status(
        &self,
        server_name: &str,
        status: ServerStatus,
    ) -> Result<ServerRecord, StoreError> {
        self.server_repo().update_status(server_name, status).await
    }

    async fn delete_server_record(&self, server_name: &str) -> Result<(), StoreError> {
        self.server_repo().delete(server_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_subject_names_the_column() {
        assert_eq!(
            conflict_subject("user", "UNIQUE constraint failed: users.email"),
            "user with this email"
        );
        assert_eq!(conflict_subject("server", "constraint failed"), "server");
    }

    #[tokio::test]
    async fn update_server_status_returns_the_updated_record() {
        let store = Store::in_memory().await.unwrap();
        store
            .create_server_record(NewServerRecord {
                server_name: "alice-survival".to_string(),
                workload_name: "minecraft-server-alice-survival".to_string(),
                volume_claim_name: "minecraft-server-alice-survival-pvc".to_string(),
                owner_id: 1,
                status: ServerStatus::Creating,
            })
            .await
            .unwrap();

        let record = store
            .update_server_status("alice-survival", ServerStatus::Stopped)
            .await
            .unwrap();
        assert_eq!(record.status, ServerStatus::Stopped);
        assert_eq!(record.owner_id, 1);
        assert_eq!(
            store.get_server_by_name("alice-survival").await.unwrap().status,
            ServerStatus::Stopped
        );

        let missing = store
            .update_server_status("ghost", ServerStatus::Running)
            .await
            .unwrap_err();
        assert!(missing.is_not_found());
    }
}
