use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identity of one worker process, unique across the fleet for the lifetime
/// of a run.
///
/// Built from the host name, wall-clock nanoseconds, and the OS process id,
/// so two incarnations of the same worker never share an id. Opaque
/// everywhere except as a hash-ring key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkerId(String);

impl WorkerId {
    /// Mint a fresh id for this process.
    pub fn generate() -> Self {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        Self(format!("worker-{host}-{nanos}-{}", std::process::id()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A change in the fleet's member set, delivered in coordination-service
/// commit order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    Joined(WorkerId),
    Left(WorkerId),
}
