use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a measurement. Deletion is not a state, the row is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MeasurementStatus {
    #[sea_orm(string_value = "STOPPED")]
    Stopped,
    #[sea_orm(string_value = "RUNNING")]
    Running,
    #[sea_orm(string_value = "SCHEDULED")]
    Scheduled,
    #[sea_orm(string_value = "RESTARTING")]
    Restarting,
}

impl MeasurementStatus {
    /// Timers only probe measurements in one of these states.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            MeasurementStatus::Running | MeasurementStatus::Scheduled | MeasurementStatus::Restarting
        )
    }

    pub fn active_states() -> [MeasurementStatus; 3] {
        [
            MeasurementStatus::Running,
            MeasurementStatus::Scheduled,
            MeasurementStatus::Restarting,
        ]
    }
}

impl fmt::Display for MeasurementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertReason {
    #[sea_orm(string_value = "PACKET_LOSS")]
    PacketLoss,
    #[sea_orm(string_value = "HIGH_LATENCY")]
    HighLatency,
    #[sea_orm(string_value = "HIGH_JITTER")]
    HighJitter,
    #[sea_orm(string_value = "AS_PATH_CHANGE_LONGER")]
    AsPathChangeLonger,
    #[sea_orm(string_value = "AS_PATH_CHANGE_SHORTER")]
    AsPathChangeShorter,
    #[sea_orm(string_value = "IP_PATH_CHANGE_LONGER")]
    IpPathChangeLonger,
    #[sea_orm(string_value = "IP_PATH_CHANGE_SHORTER")]
    IpPathChangeShorter,
}

impl AlertReason {
    pub fn is_path_change(self) -> bool {
        matches!(
            self,
            AlertReason::AsPathChangeLonger
                | AlertReason::AsPathChangeShorter
                | AlertReason::IpPathChangeLonger
                | AlertReason::IpPathChangeShorter
        )
    }
}

impl fmt::Display for AlertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_value())
    }
}
