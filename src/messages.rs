// Message types exchanged with remote operators

use serde::{Deserialize, Serialize};

/// Watchdog health, published on every transition
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WatchdogState {
    /// Control traffic is arriving, motors may run
    Armed,
    /// No control traffic within the timeout, motors forced off
    Tripped,
}

/// Drive levels actually requested, echoed back to the operator
///
/// Values are the clamped request in [-1, 1], before voltage derating.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct DriveStatus {
    pub left: f32,
    pub right: f32,
}

impl DriveStatus {
    pub fn left_percent(&self) -> f32 {
        self.left * 100.0
    }

    pub fn right_percent(&self) -> f32 {
        self.right * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_state_json() {
        assert_eq!(
            serde_json::to_string(&WatchdogState::Tripped).unwrap(),
            "\"tripped\""
        );
        let state: WatchdogState = serde_json::from_str("\"armed\"").unwrap();
        assert_eq!(state, WatchdogState::Armed);
    }
}
