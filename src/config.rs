use serde::{Deserialize, Serialize};

/// Tunables read by the branch update state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Bounded retry count for the collapse of an intention log.
    pub p2_commit_attempts: u32,
    /// Block on the collapse instead of letting it run in the background.
    pub wait_on_collapse: bool,
    /// Emit spans around the collapse and each attempt.
    pub enable_tracing: bool,
}

impl Default for StoreConfig {
    fn default() -> StoreConfig {
        StoreConfig {
            p2_commit_attempts: 5,
            wait_on_collapse: true,
            enable_tracing: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = StoreConfig::default();
        assert_eq!(c.p2_commit_attempts, 5);
        assert!(c.wait_on_collapse);
        assert!(!c.enable_tracing);
    }

    #[test]
    fn round_trips_through_json() {
        let c = StoreConfig {
            p2_commit_attempts: 9,
            wait_on_collapse: false,
            enable_tracing: true,
        };
        let json = serde_json::to_string(&c).unwrap();
        let back: StoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.p2_commit_attempts, 9);
        assert!(!back.wait_on_collapse);
        assert!(back.enable_tracing);
    }
}
