use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::AlertReason;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "measurement_alerts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub measurement_id: Uuid,
    // Correlates with the result written in the same cycle; not a foreign key.
    pub result_id: Option<i32>,
    pub raised_at: ChronoDateTimeUtc,
    pub reason: AlertReason,
    #[sea_orm(column_type = "Text")]
    pub message: String,
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
