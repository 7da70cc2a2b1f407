pub mod entities;
pub mod enums;
pub mod schema;
pub mod services;
pub mod store;

pub use store::{MeasurementStore, NewMeasurement, NewResult, SaveOutcome, SeaOrmStore, StoreError};
