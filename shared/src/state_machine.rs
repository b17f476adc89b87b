//! Bridge Lifecycle State Machine
//!
//! Defines the valid lifecycle transitions of the bridge:
//! `Idle -> Starting -> Running -> Stopping -> Stopped`, with `Failed`
//! reachable from anywhere when startup or shutdown hits a fatal defect.

use std::fmt;

/// Lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Nothing spawned yet
    Idle,
    /// Reader spawned, waiting for identity and the streamer
    Starting,
    /// Both loops live
    Running,
    /// Stop requested, joining loops
    Stopping,
    /// Both loops joined; the transport may be closed
    Stopped,
    /// A fatal startup or shutdown defect was recorded
    Failed,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events that can trigger state transitions
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// `start()` called
    StartRequested,
    /// Reader and streamer confirmed live
    LoopsLive,
    /// `stop()` or quit signal
    StopRequested,
    /// All loops terminated
    LoopsJoined,
    /// Fatal defect (spawn failure, join timeout, loop panic)
    Fault { reason: String },
}

/// Result of a state transition attempt
#[derive(Debug, Clone)]
pub enum TransitionResult {
    /// Transition was valid and state changed (or stayed, for idempotent events)
    Success(LifecycleState),
    /// Transition was invalid from current state
    Invalid {
        from: LifecycleState,
        event: LifecycleEvent,
    },
    /// A fault was recorded
    Failed { reason: String },
}

/// The lifecycle state machine owned by the bridge controller
#[derive(Debug)]
pub struct LifecycleStateMachine {
    current_state: LifecycleState,
    failure: Option<String>,
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleStateMachine {
    /// Create a new state machine in Idle state
    pub fn new() -> Self {
        Self {
            current_state: LifecycleState::Idle,
            failure: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> LifecycleState {
        self.current_state
    }

    /// Reason of the recorded fault, if any
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Only a fully stopped bridge may have its transport closed
    pub fn can_close_transport(&self) -> bool {
        self.current_state == LifecycleState::Stopped
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: LifecycleEvent) -> TransitionResult {
        // Faults win from any state; the first reason is kept
        if let LifecycleEvent::Fault { reason } = &event {
            self.current_state = LifecycleState::Failed;
            if self.failure.is_none() {
                self.failure = Some(reason.clone());
            }
            return TransitionResult::Failed {
                reason: reason.clone(),
            };
        }

        match self.get_next_state(&event) {
            Some(state) => {
                self.current_state = state;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    /// Get the next state for a given event, if the transition is valid
    fn get_next_state(&self, event: &LifecycleEvent) -> Option<LifecycleState> {
        use LifecycleEvent::*;
        use LifecycleState::*;

        match (self.current_state, event) {
            // From Idle
            (Idle, StartRequested) => Some(Starting),
            (Idle, StopRequested) => Some(Stopped), // nothing to join

            // From Starting
            (Starting, LoopsLive) => Some(Running),
            (Starting, StopRequested) => Some(Stopping),

            // From Running
            (Running, StopRequested) => Some(Stopping),

            // From Stopping
            (Stopping, StopRequested) => Some(Stopping),
            (Stopping, LoopsJoined) => Some(Stopped),

            // Stop is idempotent once stopped
            (Stopped, StopRequested) => Some(Stopped),

            // Invalid transition
            _ => None,
        }
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: LifecycleState, to: LifecycleState) -> bool {
    use LifecycleState::*;

    match (from, to) {
        // Same state is valid for the idempotent stop path only
        (Stopping, Stopping) | (Stopped, Stopped) => true,

        // Failed can be reached from anywhere
        (_, Failed) => true,

        (Idle, Starting) => true,
        (Idle, Stopped) => true,
        (Starting, Running) => true,
        (Starting, Stopping) => true,
        (Running, Stopping) => true,
        (Stopping, Stopped) => true,

        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        let fsm = LifecycleStateMachine::new();
        assert_eq!(fsm.state(), LifecycleState::Idle);
        assert!(!fsm.can_close_transport());
    }

    #[test]
    fn test_normal_lifecycle() {
        let mut fsm = LifecycleStateMachine::new();

        let result = fsm.process_event(LifecycleEvent::StartRequested);
        assert!(matches!(result, TransitionResult::Success(LifecycleState::Starting)));

        let result = fsm.process_event(LifecycleEvent::LoopsLive);
        assert!(matches!(result, TransitionResult::Success(LifecycleState::Running)));

        let result = fsm.process_event(LifecycleEvent::StopRequested);
        assert!(matches!(result, TransitionResult::Success(LifecycleState::Stopping)));
        assert!(!fsm.can_close_transport());

        let result = fsm.process_event(LifecycleEvent::LoopsJoined);
        assert!(matches!(result, TransitionResult::Success(LifecycleState::Stopped)));
        assert!(fsm.can_close_transport());
    }

    #[test]
    fn test_stop_while_starting() {
        let mut fsm = LifecycleStateMachine::new();
        fsm.process_event(LifecycleEvent::StartRequested);

        let result = fsm.process_event(LifecycleEvent::StopRequested);
        assert!(matches!(result, TransitionResult::Success(LifecycleState::Stopping)));

        // Loops coming up late must not resurrect the bridge
        let result = fsm.process_event(LifecycleEvent::LoopsLive);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), LifecycleState::Stopping);
    }

    #[test]
    fn test_stop_is_idempotent() {
        let mut fsm = LifecycleStateMachine::new();

        // From idle there is nothing to join
        let result = fsm.process_event(LifecycleEvent::StopRequested);
        assert!(matches!(result, TransitionResult::Success(LifecycleState::Stopped)));

        let result = fsm.process_event(LifecycleEvent::StopRequested);
        assert!(matches!(result, TransitionResult::Success(LifecycleState::Stopped)));
    }

    #[test]
    fn test_fault_from_any_state() {
        let mut fsm = LifecycleStateMachine::new();
        fsm.process_event(LifecycleEvent::StartRequested);
        fsm.process_event(LifecycleEvent::LoopsLive);
        fsm.process_event(LifecycleEvent::StopRequested);

        let result = fsm.process_event(LifecycleEvent::Fault {
            reason: "reader did not terminate".to_string(),
        });
        assert!(matches!(result, TransitionResult::Failed { .. }));
        assert_eq!(fsm.state(), LifecycleState::Failed);
        assert_eq!(fsm.failure(), Some("reader did not terminate"));
        assert!(!fsm.can_close_transport());

        // First reason is kept
        fsm.process_event(LifecycleEvent::Fault {
            reason: "second".to_string(),
        });
        assert_eq!(fsm.failure(), Some("reader did not terminate"));
    }

    #[test]
    fn test_event_transitions_are_all_valid() {
        let events = || {
            vec![
                LifecycleEvent::StartRequested,
                LifecycleEvent::LoopsLive,
                LifecycleEvent::StopRequested,
                LifecycleEvent::LoopsJoined,
                LifecycleEvent::Fault {
                    reason: "x".to_string(),
                },
            ]
        };
        // Event prefixes that reach each state
        let paths: Vec<Vec<LifecycleEvent>> = vec![
            vec![],
            vec![LifecycleEvent::StartRequested],
            vec![LifecycleEvent::StartRequested, LifecycleEvent::LoopsLive],
            vec![LifecycleEvent::StartRequested, LifecycleEvent::StopRequested],
            vec![LifecycleEvent::StopRequested],
            vec![LifecycleEvent::Fault {
                reason: "x".to_string(),
            }],
        ];

        for path in paths {
            for event in events() {
                let mut fsm = LifecycleStateMachine::new();
                for step in path.clone() {
                    fsm.process_event(step);
                }
                let from = fsm.state();
                match fsm.process_event(event.clone()) {
                    TransitionResult::Success(to) => assert!(
                        is_valid_transition(from, to),
                        "{:?} moved {} -> {}",
                        event,
                        from,
                        to
                    ),
                    TransitionResult::Failed { .. } => {
                        assert!(is_valid_transition(from, LifecycleState::Failed))
                    }
                    TransitionResult::Invalid { .. } => assert_eq!(fsm.state(), from),
                }
            }
        }
    }

    #[test]
    fn test_invalid_transition() {
        let mut fsm = LifecycleStateMachine::new();

        // Can't be live without starting
        let result = fsm.process_event(LifecycleEvent::LoopsLive);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
        assert_eq!(fsm.state(), LifecycleState::Idle);

        // Can't restart once stopped
        fsm.process_event(LifecycleEvent::StopRequested);
        let result = fsm.process_event(LifecycleEvent::StartRequested);
        assert!(matches!(result, TransitionResult::Invalid { .. }));
    }

    #[test]
    fn test_is_valid_transition() {
        use LifecycleState::*;
        assert!(is_valid_transition(Idle, Starting));
        assert!(is_valid_transition(Running, Failed));
        assert!(is_valid_transition(Stopping, Stopped));
        assert!(!is_valid_transition(Stopped, Running));
        assert!(!is_valid_transition(Running, Starting));
    }
}
