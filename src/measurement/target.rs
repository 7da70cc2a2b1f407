//! Target validation and name resolution.

use std::net::{IpAddr, ToSocketAddrs};

const MAX_HOSTNAME_LEN: usize = 253;
const MAX_LABEL_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetError {
    #[error("Target must not be empty")]
    Empty,
    #[error("Target '{0}' is not a valid IP address or hostname")]
    Malformed(String),
    #[error("Failed to resolve target '{target}': {reason}")]
    Resolve { target: String, reason: String },
}

/// Trims the raw target and checks that it is an IP literal or a well-formed
/// hostname. Returns the trimmed form that should be stored.
pub fn validate_target(raw: &str) -> Result<String, TargetError> {
    let target = raw.trim();
    if target.is_empty() {
        return Err(TargetError::Empty);
    }
    if target.parse::<IpAddr>().is_ok() || is_valid_hostname(target) {
        Ok(target.to_owned())
    } else {
        Err(TargetError::Malformed(target.to_owned()))
    }
}

/// A target that is not an IP literal is a hostname and gets resolved per cycle.
pub fn is_hostname(target: &str) -> bool {
    target.trim().parse::<IpAddr>().is_err()
}

fn is_valid_hostname(name: &str) -> bool {
    let name = name.strip_suffix('.').unwrap_or(name);
    if name.is_empty() || name.len() > MAX_HOSTNAME_LEN {
        return false;
    }
    // All-numeric dotted names are malformed IPv4 literals, not hostnames.
    if name.split('.').all(|label| label.chars().all(|c| c.is_ascii_digit())) {
        return false;
    }
    name.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= MAX_LABEL_LEN
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Resolves a target to one address using the system resolver. IP literals
/// are returned without a lookup; for hostnames the first address wins.
pub async fn resolve(target: &str) -> Result<IpAddr, TargetError> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    let host = target.to_owned();
    let lookup = tokio::task::spawn_blocking(move || {
        let host_with_port = format!("{host}:0");
        host_with_port.to_socket_addrs()
    })
    .await;

    let resolve_error = |reason: String| TargetError::Resolve {
        target: target.to_owned(),
        reason,
    };

    match lookup {
        Ok(Ok(mut addrs)) => addrs
            .next()
            .map(|addr| addr.ip())
            .ok_or_else(|| resolve_error("no addresses returned".to_string())),
        Ok(Err(e)) => Err(resolve_error(e.to_string())),
        Err(e) => Err(resolve_error(format!("lookup task failed: {e}"))),
    }
}
