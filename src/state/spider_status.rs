/// Persisted spider status
///
/// This module defines the status a spider record carries between and during runs.
use std::fmt;

/// Represents the persisted status of a spider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpiderStatus {
    /// Idle; the last run (if any) completed successfully
    Inactive,

    /// An execution is in flight
    Running,

    /// The last run exited non-zero or failed inside the engine
    Error,

    /// The last run was terminated manually
    Stopped,
}

impl SpiderStatus {
    /// Returns true if this status marks the end of a run
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns true if the last run ended in failure
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error)
    }

    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Inactive => "inactive",
            Self::Running => "running",
            Self::Error => "error",
            Self::Stopped => "stopped",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "inactive" => Some(Self::Inactive),
            "running" => Some(Self::Running),
            "error" => Some(Self::Error),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }

    /// Maps a finished process exit code to the status it leaves behind
    pub fn from_exit_code(code: i32) -> Self {
        if code == 0 {
            Self::Inactive
        } else {
            Self::Error
        }
    }

    /// Returns all possible statuses
    pub fn all_statuses() -> Vec<Self> {
        vec![Self::Inactive, Self::Running, Self::Error, Self::Stopped]
    }
}

impl Default for SpiderStatus {
    fn default() -> Self {
        Self::Inactive
    }
}

impl fmt::Display for SpiderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_string_roundtrip() {
        for status in SpiderStatus::all_statuses() {
            let parsed = SpiderStatus::from_db_string(status.to_db_string());
            assert_eq!(parsed, Some(status));
        }
    }

    #[test]
    fn test_unknown_db_string() {
        assert_eq!(SpiderStatus::from_db_string("paused"), None);
        assert_eq!(SpiderStatus::from_db_string(""), None);
    }

    #[test]
    fn test_from_exit_code() {
        assert_eq!(SpiderStatus::from_exit_code(0), SpiderStatus::Inactive);
        assert_eq!(SpiderStatus::from_exit_code(1), SpiderStatus::Error);
        assert_eq!(SpiderStatus::from_exit_code(-15), SpiderStatus::Error);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!SpiderStatus::Running.is_terminal());
        assert!(SpiderStatus::Inactive.is_terminal());
        assert!(SpiderStatus::Stopped.is_terminal());
        assert!(SpiderStatus::Error.is_error());
    }

    #[test]
    fn test_display() {
        assert_eq!(SpiderStatus::Stopped.to_string(), "stopped");
    }
}
