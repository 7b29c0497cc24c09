use common::{ConnectionMode, ContentStatus};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A unit of data the node is trying to get stored.
#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "content")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub name: String,
    /// Hex SHA-256 of the payload, also its blockstore address.
    #[sea_orm(indexed)]
    pub cid: String,
    pub size: i64,
    pub requesting_api_key: Option<String>,

    pub piece_commitment_id: Option<i32>,
    #[sea_orm(belongs_to, from = "piece_commitment_id", to = "id")]
    pub piece_commitment: HasOne<super::piece_commitment::Entity>,

    #[sea_orm(indexed)]
    pub status: ContentStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_message: Option<String>,

    pub connection_mode: ConnectionMode,
    #[sea_orm(default_value = true)]
    pub auto_retry: bool,

    /// Bumped on every status change; writers compare-and-swap on it.
    #[sea_orm(default_value = 0)]
    pub version: i32,

    #[sea_orm(has_many)]
    pub deals: HasMany<super::content_deal::Entity>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
