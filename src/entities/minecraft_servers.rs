use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "minecraft_servers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,

    #[sea_orm(unique)]
    pub server_name: String,

    pub workload_name: String,

    pub volume_claim_name: String,

    pub owner_id: i64,

    /// One of `Creating`, `Running`, `Stopped`.
    pub status: String,

    pub created_at: String,

    pub updated_at: String,
}

/// Owner is kept as a plain column; server records outlive account removal.
#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
