use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

use crate::db::StoreError;
use crate::entities::api_keys;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKey {
    pub id: i64,
    pub user_id: i64,
    pub key: String,
    pub description: String,
    pub last_used: Option<String>,
    pub expires_at: Option<String>,
    pub created_at: String,
}

impl ApiKey {
    /// A key whose expiry has passed, or whose expiry cannot be parsed, is expired.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.as_deref().is_some_and(|raw| {
            DateTime::parse_from_rfc3339(raw).map_or(true, |expires| expires.with_timezone(&Utc) < now)
        })
    }

    /// Prefix and last four characters, for listings.
    #[must_use]
    pub fn masked(&self) -> String {
        let prefix = self.key.split_once('.').map_or("", |(prefix, _)| prefix);
        let tail: String = self
            .key
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("{prefix}.****{tail}")
    }
}

impl From<api_keys::Model> for ApiKey {
    fn from(model: api_keys::Model) -> Self {
        Self {
            id: model.id,
            user_id: model.user_id,
            key: model.key,
            description: model.description,
            last_used: model.last_used,
            expires_at: model.expires_at,
            created_at: model.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: i64,
    pub key: String,
    pub description: String,
    pub expires_at: Option<DateTime<Utc>>,
}

pub struct ApiKeyRepository {
    conn: DatabaseConnection,
}

impl ApiKeyRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    pub async fn create(&self, key: NewApiKey) -> Result<ApiKey, StoreError> {
        let active = api_keys::ActiveModel {
            user_id: Set(key.user_id),
            key: Set(key.key),
            description: Set(key.description),
            last_used: Set(None),
            expires_at: Set(key.expires_at.map(|t| t.to_rfc3339())),
            created_at: Set(Utc::now().to_rfc3339()),
            ..Default::default()
        };

        let model = active
            .insert(&self.conn)
            .await
            .map_err(|e| StoreError::from_write(e, "api key"))?;

        Ok(ApiKey::from(model))
    }

    pub async fn get_by_key(&self, key: &str) -> Result<ApiKey, StoreError> {
        api_keys::Entity::find()
            .filter(api_keys::Column::Key.eq(key))
            .one(&self.conn)
            .await?
            .map(ApiKey::from)
            .ok_or(StoreError::NotFound("api key"))
    }

    pub async fn get_by_id(&self, id: i64) -> Result<ApiKey, StoreError> {
        api_keys::Entity::find_by_id(id)
            .one(&self.conn)
            .await?
            .map(ApiKey::from)
            .ok_or(StoreError::NotFound("api key"))
    }

    pub async fn delete(&self, id: i64) -> Result<(), StoreError> {
        let result = api_keys::Entity::delete_by_id(id).exec(&self.conn).await?;
        if result.rows_affected == 0 {
            return Err(StoreError::NotFound("api key"));
        }
        Ok(())
    }

    pub async fn list_by_user(&self, user_id: i64) -> Result<Vec<ApiKey>, StoreError> {
        let rows = api_keys::Entity::find()
            .filter(api_keys::Column::UserId.eq(user_id))
            .order_by_asc(api_keys::Column::Id)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(ApiKey::from).collect())
    }

    pub async fn touch(&self, id: i64) -> Result<(), StoreError> {
        let result = api_keys::Entity::update_many()
            .col_expr(
                api_keys::Column::LastUsed,
                sea_orm::sea_query::Expr::value(Utc::now().to_rfc3339()),
            )
            .filter(api_keys::Column::Id.eq(id))
            .exec(&self.conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(StoreError::NotFound("api key"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_with_expiry(expires_at: Option<&str>) -> ApiKey {
        ApiKey {
            id: 1,
            user_id: 1,
            key: "mcapi.abcdefghijklmnopqrstuvwxyz123456".to_string(),
            description: String::new(),
            last_used: None,
            expires_at: expires_at.map(str::to_string),
            created_at: Utc::now().to_rfc3339(),
        }
    }

    #[test]
    fn expiry_is_checked_against_now() {
        let now = Utc::now();
        assert!(!key_with_expiry(None).is_expired_at(now));

        let past = (now - chrono::Duration::hours(1)).to_rfc3339();
        assert!(key_with_expiry(Some(&past)).is_expired_at(now));

        let future = (now + chrono::Duration::hours(1)).to_rfc3339();
        assert!(!key_with_expiry(Some(&future)).is_expired_at(now));

        assert!(key_with_expiry(Some("not a date")).is_expired_at(now));
    }

    #[test]
    fn masked_hides_the_secret() {
        let key = key_with_expiry(None);
        assert_eq!(key.masked(), "mcapi.****3456");
    }
}
