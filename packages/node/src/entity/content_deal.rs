use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One attempt at storing a content with one provider. Only the newest row per content has
/// `failed = false`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "content_deal")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub content_id: i32,
    #[sea_orm(belongs_to, from = "content_id", to = "id")]
    pub content: HasOne<super::content::Entity>,

    pub miner: String,
    pub proposal_cid: Option<String>,
    #[sea_orm(unique)]
    pub deal_uuid: Uuid,
    /// Assigned by the provider once the deal is published.
    pub deal_id: Option<i64>,
    /// Transfer channel id.
    pub dt_chan: Option<String>,

    pub verified: bool,
    #[sea_orm(default_value = false)]
    pub slashed: bool,
    #[sea_orm(default_value = false, indexed)]
    pub failed: bool,

    pub failed_at: Option<DateTimeUtc>,
    pub transfer_started: Option<DateTimeUtc>,
    pub transfer_finished: Option<DateTimeUtc>,
    pub on_chain_at: Option<DateTimeUtc>,
    pub sealed_at: Option<DateTimeUtc>,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_message: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
