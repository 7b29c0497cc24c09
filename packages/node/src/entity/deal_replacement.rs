use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Written whenever a new deal supersedes the active one.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "deal_replacement")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub content_id: i32,
    #[sea_orm(belongs_to, from = "content_id", to = "id")]
    pub content: HasOne<super::content::Entity>,

    pub old_deal_id: i32,
    pub new_deal_id: i32,
    /// One of: repair, retry, auto-retry, resend.
    pub reason: String,

    pub created_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
