use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};

use crate::db::StoreError;
use crate::domain::Permissions;
use crate::entities::{api_keys, users};

/// User data returned from repository (without sensitive password hash)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub permissions: Permissions,
    pub active: bool,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<users::Model> for User {
    fn from(model: users::Model) -> Self {
        Self {
            id: model.id,
            username: model.username,
            email: model.email,
            permissions: Permissions::from_bits(model.permissions),
            active: model.active,
            last_login: model.last_login,
            created_at: model.created_at,
            updated_at: model.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub permissions: Permissions,
    pub active: bool,
}

/// Partial update; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub permissions: Option<Permissions>,
    pub active: Option<bool>,
}

pub struct UserRepository {
    conn: DatabaseConnection,
}

impl UserRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, user: NewUser) -> Result<User, StoreError> {
        let now = chrono::Utc::now().to_rfc3339();

        let active = users::ActiveModel {
            username: Set(user.username),
            email: Set(user.email),
            password_hash: Set(user.password_hash),
            permissions: Set(user.permissions.bits()),
            active: Set(user.active),
            last_login: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .map_err(|e| StoreError::from_write(e, "user"))?;

        Ok(User::from(model))
    }

    async fn find_model(&self, id: i64) -> Result<users::Model, StoreError> {
        users::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .ok_or(StoreError::NotFound("user"))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<User, StoreError> {
        self.find_model(id).await.map(User::from)
    }

    pub async fn get_by_username(&self, username: &str) -> Result<User, StoreError> {
        self.get_by_username_with_password(username)
            .await
            .map(|(user, _)| user)
    }

    pub async fn get_by_username_with_password(
        &self,
        username: &str,
    ) -> Result<(User, String), StoreError> {
        let user = users::Entity::find()
            .filter(users::Column::Username.eq(username))
            .one(&self.conn)
            .await?
            .ok_or(StoreError::NotFound("user"))?;

        let password_hash = user.password_hash.clone();
        Ok((User::from(user), password_hash))
    }

    pub async fn update(&self, id: i64, update: UserUpdate) -> Result<User, StoreError> {
        let user = self.find_model(id).await?;

        let mut active: users::ActiveModel = user.into();
        if let Some(email) = update.email {
            active.email = Set(email);
        }
        if let Some(hash) = update.password_hash {
            active.password_hash = Set(hash);
        }
        if let Some(permissions) = update.permissions {
            active.permissions = Set(permissions.bits());
        }
        if let Some(flag) = update.active {
            active.active = Set(flag);
        }
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());

        let model = active
            .update(&self.conn)
            .await
            .map_err(|e| StoreError::from_write(e, "user"))?;

        Ok(User::from(model))
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let txn = self.conn.begin().await?;

        api_keys::Entity::delete_many()
            .filter(api_keys::Column::UserId.eq(id))
            .exec(&txn)
            .await?;

        let result = users::Entity::delete_by_id(id).exec(&txn).await?;
        if result.rows_affected == 0 {
            txn.rollback().await?;
            return Err(StoreError::NotFound("user"));
        }

        txn.commit().await?;
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<User>, StoreError> {
        let rows = users::Entity::find()
            .order_by_asc(users::Column::Id)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn record_login(&self, id: i64) -> Result<(), StoreError> {
        let user = self.find_model(id).await?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut active: users::ActiveModel = user.into();
        active.last_login = Set(Some(now.clone()));
        active.updated_at = Set(now);
        active.update(&self.conn).await?;

        Ok(())
    }
}
