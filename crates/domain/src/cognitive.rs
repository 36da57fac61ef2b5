//! The processor's cognitive-state machine.
//!
//! WAKEUP admits only bootstrap tasks; WORK applies full gating; SHUTDOWN
//! closes intake and drains. PLAY, SOLITUDE and DREAM are declared but not
//! enabled — the processor refuses to enter them.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CognitiveState {
    Wakeup,
    Work,
    Play,
    Solitude,
    Dream,
    Shutdown,
}

impl CognitiveState {
    /// States the processor may actually enter.
    pub fn enabled(self) -> bool {
        matches!(self, Self::Wakeup | Self::Work | Self::Shutdown)
    }

    /// Legal transitions between enabled states. Shutdown is reachable
    /// from anywhere; nothing leaves it.
    pub fn can_transition_to(self, next: CognitiveState) -> bool {
        if !next.enabled() {
            return false;
        }
        match (self, next) {
            (_, Self::Shutdown) => self != Self::Shutdown,
            (Self::Wakeup, Self::Work) => true,
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wakeup => "wakeup",
            Self::Work => "work",
            Self::Play => "play",
            Self::Solitude => "solitude",
            Self::Dream => "dream",
            Self::Shutdown => "shutdown",
        }
    }
}

impl std::fmt::Display for CognitiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
