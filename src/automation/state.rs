//! Loop states, status snapshots and the events published to observers.
//!
//! The cycle runs Capturing → Extracting → Injecting → Navigating and back to
//! Capturing. Only an explicit stop returns it to Idle.

use crate::capture::{CaptureTarget, Region};
use crate::error::AutomationError;
use crate::ocr::Token;

/// Loop controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Not running (initial state, and after stop)
    Idle,
    /// Waiting for a frame of the capture target
    Capturing,
    /// OCR worker is processing the frame
    Extracting,
    /// Token is being written to the page
    Injecting,
    /// Advance key sent, waiting for the next item to settle
    Navigating,
}

impl LoopState {
    /// The state that follows this one in a running cycle.
    pub fn next(self) -> LoopState {
        match self {
            LoopState::Idle => LoopState::Capturing,
            LoopState::Capturing => LoopState::Extracting,
            LoopState::Extracting => LoopState::Injecting,
            LoopState::Injecting => LoopState::Navigating,
            LoopState::Navigating => LoopState::Capturing,
        }
    }

    pub fn is_active(self) -> bool {
        self != LoopState::Idle
    }

    /// Whether the controller may move from this state to `to`.
    ///
    /// Allowed: the cyclic successor, Idle from any running state (stop),
    /// and Capturing → Injecting when the capture itself failed.
    pub fn can_move_to(self, to: LoopState) -> bool {
        to == self.next()
            || (to == LoopState::Idle && self.is_active())
            || (self == LoopState::Capturing && to == LoopState::Injecting)
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopState::Idle => write!(f, "Idle"),
            LoopState::Capturing => write!(f, "Capturing"),
            LoopState::Extracting => write!(f, "Extracting"),
            LoopState::Injecting => write!(f, "Injecting"),
            LoopState::Navigating => write!(f, "Navigating"),
        }
    }
}

/// Point-in-time view of the controller, for status displays.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopStatus {
    pub state: LoopState,
    pub region: Option<Region>,
    pub full_page: bool,
    /// Last token derived by OCR that has not been consumed by a navigation
    pub last_token: Option<Token>,
    /// Completed cycles since the loop last started
    pub cycles: u64,
    pub injection_in_flight: bool,
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let region = match (&self.region, self.full_page) {
            (_, true) => "full page".to_string(),
            (Some(r), false) => r.to_string(),
            (None, false) => "none".to_string(),
        };
        let token = self
            .last_token
            .as_ref()
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{} | region: {} | last token: {} | cycles: {}",
            self.state, region, token, self.cycles
        )
    }
}

/// Published by the controller on its broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    StateChanged(LoopState),
    Started,
    Stopped,
    Captured(CaptureTarget),
    /// OCR finished; `token` is what will be (or was offered to be) written.
    TextExtracted { raw_text: String, token: Token },
    /// A single-step capture produced text that fails validation.
    Rejected(String),
    Injected { token: Token, confirmed: bool },
    SaveVerified(bool),
    Navigated(bool),
    RegionChanged(Option<Region>),
    /// A recovered error inside a cycle or a refused command.
    Error(AutomationError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_order() {
        let mut state = LoopState::Idle.next();
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(state);
            state = state.next();
        }
        assert_eq!(
            seen,
            vec![
                LoopState::Capturing,
                LoopState::Extracting,
                LoopState::Injecting,
                LoopState::Navigating,
                LoopState::Capturing,
                LoopState::Extracting,
                LoopState::Injecting,
                LoopState::Navigating,
            ]
        );
    }

    #[test]
    fn test_no_state_leads_back_to_idle() {
        for state in [
            LoopState::Idle,
            LoopState::Capturing,
            LoopState::Extracting,
            LoopState::Injecting,
            LoopState::Navigating,
        ] {
            assert_ne!(state.next(), LoopState::Idle);
        }
        assert!(!LoopState::Idle.is_active());
        assert!(LoopState::Injecting.is_active());
    }

    #[test]
    fn test_allowed_moves() {
        assert!(LoopState::Idle.can_move_to(LoopState::Capturing));
        assert!(LoopState::Navigating.can_move_to(LoopState::Capturing));
        assert!(LoopState::Capturing.can_move_to(LoopState::Injecting));
        assert!(LoopState::Extracting.can_move_to(LoopState::Idle));

        assert!(!LoopState::Idle.can_move_to(LoopState::Idle));
        assert!(!LoopState::Idle.can_move_to(LoopState::Injecting));
        assert!(!LoopState::Extracting.can_move_to(LoopState::Navigating));
        assert!(!LoopState::Navigating.can_move_to(LoopState::Extracting));
    }

    #[test]
    fn test_status_display() {
        let status = LoopStatus {
            state: LoopState::Injecting,
            region: Some(Region::new(10, 20, 300, 40).unwrap()),
            full_page: false,
            last_token: Some(Token::Text("zoe99".into())),
            cycles: 4,
            injection_in_flight: true,
        };
        let text = status.to_string();
        assert!(text.starts_with("Injecting"));
        assert!(text.contains("300x40 at (10, 20)"));
        assert!(text.contains("zoe99"));

        let idle = LoopStatus {
            state: LoopState::Idle,
            region: None,
            full_page: true,
            last_token: None,
            cycles: 0,
            injection_in_flight: false,
        };
        assert!(idle.to_string().contains("full page"));
    }
}
