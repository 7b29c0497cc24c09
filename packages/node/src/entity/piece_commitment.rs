use common::CommitmentStatus;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "piece_commitment")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// Content address of the source payload.
    #[sea_orm(indexed)]
    pub cid: String,
    /// Piece CID (`baga...`).
    pub piece: String,
    pub size: i64,
    pub padded_piece_size: i64,
    pub unpadded_piece_size: i64,

    pub status: CommitmentStatus,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_message: Option<String>,

    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

impl ActiveModelBehavior for ActiveModel {}
