use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::enums::MeasurementStatus;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "measurements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub target: String,
    pub packet_count: i32,
    pub frequency_minutes: i32,
    pub is_hostname: bool,
    pub status: MeasurementStatus,
    pub created_at: ChronoDateTimeUtc,
    pub last_poll_at: Option<ChronoDateTimeUtc>,
    pub stopped_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::measurement_result::Entity")]
    MeasurementResult,
    #[sea_orm(has_many = "super::measurement_alert::Entity")]
    MeasurementAlert,
}

impl Related<super::measurement_result::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MeasurementResult.def()
    }
}

impl Related<super::measurement_alert::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MeasurementAlert.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
