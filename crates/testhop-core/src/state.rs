//! Pipeline state machine types

use std::fmt;

/// States of one remote execution
///
/// `Idle -> ConfigParsed -> ConnectionReady -> Connected -> BinaryUploaded
/// -> Executed -> (CoverageRetrieved) -> Done`, or `Failed` from any state
/// that is not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ConfigParsed,
    ConnectionReady,
    Connected,
    BinaryUploaded,
    Executed,
    CoverageRetrieved,
    Done,
    Failed,
}

impl PipelineState {
    /// Whether `next` directly follows `self`
    #[must_use]
    pub fn can_transition_to(self, next: PipelineState) -> bool {
        use PipelineState::{
            BinaryUploaded, ConfigParsed, Connected, ConnectionReady, CoverageRetrieved, Done,
            Executed, Failed, Idle,
        };

        matches!(
            (self, next),
            (Idle, ConfigParsed)
                | (ConfigParsed, ConnectionReady)
                | (ConnectionReady, Connected)
                | (Connected, BinaryUploaded)
                | (BinaryUploaded, Executed)
                | (Executed, CoverageRetrieved | Done)
                | (CoverageRetrieved, Done)
        ) || (next == Failed && !self.is_terminal())
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, PipelineState::Done | PipelineState::Failed)
    }
}

/// The step that leads into the state, used to annotate errors
impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            PipelineState::Idle => "idle",
            PipelineState::ConfigParsed => "parse ssh_config",
            PipelineState::ConnectionReady => "build connection profile",
            PipelineState::Connected => "connect",
            PipelineState::BinaryUploaded => "copy test binary",
            PipelineState::Executed => "execute test binary",
            PipelineState::CoverageRetrieved => "copy coverprofile",
            PipelineState::Done => "done",
            PipelineState::Failed => "failed",
        };
        f.write_str(step)
    }
}

#[cfg(test)]
mod tests {
    use super::PipelineState::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            Idle,
            ConfigParsed,
            ConnectionReady,
            Connected,
            BinaryUploaded,
            Executed,
            CoverageRetrieved,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
        assert!(Executed.can_transition_to(Done));
    }

    #[test]
    fn test_no_skipping_steps() {
        assert!(!Idle.can_transition_to(Connected));
        assert!(!ConfigParsed.can_transition_to(BinaryUploaded));
        assert!(!Connected.can_transition_to(Executed));
        assert!(!Done.can_transition_to(Idle));
    }

    #[test]
    fn test_failed_reachable_until_terminal() {
        assert!(Idle.can_transition_to(Failed));
        assert!(Executed.can_transition_to(Failed));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }
}
