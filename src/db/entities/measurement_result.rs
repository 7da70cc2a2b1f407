use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One sampling cycle. Rows are never updated after insert.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "measurement_results")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub measurement_id: Uuid,
    pub created_at: ChronoDateTimeUtc,
    pub packets_sent: i32,
    pub packets_received: i32,
    pub packet_loss: f64,
    pub min_rtt_ms: i64,
    pub avg_rtt_ms: i64,
    pub max_rtt_ms: i64,
    pub jitter_ms: i64,
    pub ip_hop_count: i32,
    pub as_hop_count: i32,
    #[sea_orm(column_type = "Text")]
    pub ip_path: String,
    #[sea_orm(column_type = "Text")]
    pub as_path: String,
    #[sea_orm(column_type = "Text")]
    pub combined_path: String,
    pub alerting: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::measurement::Entity",
        from = "Column::MeasurementId",
        to = "super::measurement::Column::Id",
        on_delete = "Cascade",
        on_update = "Cascade"
    )]
    Measurement,
}

impl Related<super::measurement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Measurement.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
