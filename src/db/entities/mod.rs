//! SeaORM entities for measurements and the time series they own.

pub mod measurement;
pub mod measurement_alert;
pub mod measurement_result;

pub mod prelude {
    pub use super::measurement::ActiveModel as MeasurementActiveModel;
    pub use super::measurement::Column as MeasurementColumn;
    pub use super::measurement::Entity as Measurement;
    pub use super::measurement::Model as MeasurementModel;

    pub use super::measurement_result::ActiveModel as MeasurementResultActiveModel;
    pub use super::measurement_result::Column as MeasurementResultColumn;
    pub use super::measurement_result::Entity as MeasurementResult;
    pub use super::measurement_result::Model as MeasurementResultModel;

    pub use super::measurement_alert::ActiveModel as MeasurementAlertActiveModel;
    pub use super::measurement_alert::Column as MeasurementAlertColumn;
    pub use super::measurement_alert::Entity as MeasurementAlert;
    pub use super::measurement_alert::Model as MeasurementAlertModel;
}
