pub mod db;
pub mod measurement;
pub mod server;

pub mod alerting;
pub mod reports;
pub mod version;
