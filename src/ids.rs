use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Opaque identifier a deputy assigns itself at boot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct DeputyId(pub String);

impl fmt::Display for DeputyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DeputyId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeputyId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Operator-assigned identifier, globally unique across all deputies.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize)]
pub struct CommandId(pub String);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for CommandId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommandId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Self-assigned identifier sufficient to detect rival sheriffs: host name,
/// process id, and a monotonic construction timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct SheriffId(pub String);

impl fmt::Display for SheriffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl SheriffId {
    /// Builds a fresh id from the local host name, process id, and the
    /// current time in microseconds. Good enough for rival-sheriff
    /// detection; not intended to be stable across restarts.
    pub fn generate() -> Self {
        let host = nix::unistd::gethostname()
            .ok()
            .and_then(|s| s.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string());
        let pid = std::process::id();
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros();
        Self(format!("{host}-{pid}-{micros}"))
    }
}
