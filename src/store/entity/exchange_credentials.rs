//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "exchange_credentials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: u64,
    pub exchange: String,
    /// AES-GCM encrypted, base64 payload
    #[sea_orm(column_type = "Text")]
    pub api_key_enc: String,
    #[sea_orm(column_type = "Text")]
    pub api_secret_enc: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub passphrase_enc: Option<String>,
    pub active: bool,
    pub created_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
