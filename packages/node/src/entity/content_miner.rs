use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Storage provider assigned to a content. Repairs append a new row and retire the previous one;
/// at most one row per content is `active`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "content_miner")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub content_id: i32,
    #[sea_orm(belongs_to, from = "content_id", to = "id")]
    pub content: HasOne<super::content::Entity>,

    pub miner: String,

    #[sea_orm(default_value = true, indexed)]
    pub active: bool,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
