/// Build version, overridable at compile time through `HOPWATCH_VERSION`.
pub const VERSION: &str = match option_env!("HOPWATCH_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// User agent sent by outbound HTTP lookups.
pub fn user_agent() -> String {
    format!("hopwatch/{VERSION}")
}
