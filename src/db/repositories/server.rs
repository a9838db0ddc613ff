use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::db::StoreError;
use crate::domain::ServerStatus;
use crate::entities::minecraft_servers;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerRecord {
    pub id: i64,
    pub server_name: String,
    pub workload_name: String,
    pub volume_claim_name: String,
    pub owner_id: i64,
    pub status: ServerStatus,
    pub created_at: String,
    pub updated_at: String,
}

impl From<minecraft_servers::Model> for ServerRecord {
    fn from(model: minecraft_servers::Model) -> Self {
        Self {
            id: model.id,
            server_name: model.server_name,
            workload_name: model.workload_name,
            volume_claim_name: model.volume_claim_name,
            owner_id: model.owner_id,
            // Only this module writes the column.
            status: model.status.parse().unwrap_or(ServerStatus::Creating),
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewServerRecord {
    pub server_name: String,
    pub workload_name: String,
    pub volume_claim_name: String,
    pub owner_id: i64,
    pub status: ServerStatus,
}

pub struct ServerRepository {
    conn: DatabaseConnection,
}

impl ServerRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, record: NewServerRecord) -> Result<ServerRecord, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();

        let active = minecraft_servers::ActiveModel {
            server_name: Set(record.server_name),
            workload_name: Set(record.workload_name),
            volume_claim_name: Set(record.volume_claim_name),
            owner_id: Set(record.owner_id),
            status: Set(record.status.as_str().to_string()),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .map_err(|e| StoreError::from_write(e, "server"))?;

        Ok(ServerRecord::from(model))
    }

    async fn find_model(&self, server_name: &str) -> Result<minecraft_servers::Model, StoreError> {
        minecraft_servers::Entity::find()
            .filter(minecraft_servers::Column::ServerName.eq(server_name))
            .one(&self.conn)
            .await?
            .ok_or(StoreError::NotFound("server"))
    }

    pub async fn get_by_name(&self, server_name: &str) -> Result<ServerRecord, StoreError> {
        self.find_model(server_name).await.map(ServerRecord::from)
    }

    pub async fn list_by_owner(&self, owner_id: i64) -> Result<Vec<ServerRecord>, StoreError> {
        let rows = minecraft_servers::Entity::find()
            .filter(minecraft_servers::Column::OwnerId.eq(owner_id))
            .order_by_asc(minecraft_servers::Column::ServerName)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(ServerRecord::from).collect())
    }

    pub async fn list(&self) -> Result<Vec<ServerRecord>, StoreError> {
        let rows = minecraft_servers::Entity::find()
            .order_by_asc(minecraft_servers::Column::ServerName)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(ServerRecord::from).collect())
    }

    pub async fn update_status(
        &self,
        server_name: &str,
        status: ServerStatus,
    ) -> Result<ServerRecord, StoreError> {
        let model = self.find_model(server_name).await?;

        let mut active: minecraft_servers::ActiveModel = model.into();
        active.status = Set(status.as_str().to_string());
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());
        let updated = active.update(&self.conn).await?;

        Ok(updated.into())
    }

    pub async fn delete(&self, server_name: &str) -> Result<(), StoreError> {
        let result = minecraft_servers::Entity::delete_many()
            .filter(minecraft_servers::Column::ServerName.eq(server_name))
            .exec(&self.conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound("server"));
        }
        Ok(())
    }
}
