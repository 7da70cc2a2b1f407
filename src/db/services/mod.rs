//! Data access layer. Each sub-module groups the queries for one area and
//! takes the connection as its first argument.

pub mod measurement_service;

pub use measurement_service::*;
