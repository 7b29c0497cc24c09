use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Proposal overrides for a content. Superseded rows are kept with `active = false`.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "content_deal_proposal_parameters")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(indexed)]
    pub content_id: i32,
    #[sea_orm(belongs_to, from = "content_id", to = "id")]
    pub content: HasOne<super::content::Entity>,

    pub label: Option<String>,
    /// Deal length in epochs.
    pub duration: i64,
    pub start_epoch: Option<i64>,
    pub end_epoch: Option<i64>,

    pub verified_deal: bool,
    pub remove_unsealed_copy: bool,
    pub skip_ipni_announce: bool,

    #[sea_orm(default_value = true, indexed)]
    pub active: bool,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
