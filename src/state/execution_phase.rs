use std::fmt;

/// Phase of an in-flight execution record
///
/// A record starts in `Running`. It moves to `Stopping` when a manual stop is
/// requested, or to `Finishing` once its process has exited on its own and the
/// background task has claimed reconciliation. Exactly one of the two claims
/// can win, which is what keeps the final status write single.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionPhase {
    Running,
    Stopping,
    Finishing,
}

impl ExecutionPhase {
    /// Returns true if a stop request may still take over this execution
    pub fn accepts_stop(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Finishing => "finishing",
        }
    }
}

impl fmt::Display for ExecutionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
