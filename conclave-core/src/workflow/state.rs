//! Generic phase state machine shared by every role
//!
//! Roles declare their valid transitions up front; any other transition is
//! a workflow error and leaves the phase unchanged.

use std::fmt::Debug;

use crate::agent::AgentId;
use crate::error::{Error, Result};

/// Phase tracking for a role workflow
pub trait Workflow {
    /// The phase type for this workflow
    type Phase: Clone + PartialEq + Debug;

    /// Get the current phase of the workflow
    fn current_phase(&self) -> &Self::Phase;

    /// Check if a transition to the given phase is valid
    fn can_transition_to(&self, phase: &Self::Phase) -> bool;

    /// Attempt to transition to a new phase
    ///
    /// Returns an error if the transition is not valid.
    fn transition_to(&mut self, phase: Self::Phase) -> Result<()>;
}

/// A phase state machine with an explicit transition table
#[derive(Debug, Clone)]
pub struct StateMachine<P: Clone + PartialEq + Debug> {
    agent: Option<AgentId>,
    initial_phase: P,
    current_phase: P,
    valid_transitions: Vec<(P, P)>,
    history: Vec<(P, P)>,
}

impl<P: Clone + PartialEq + Debug> StateMachine<P> {
    /// Create a new state machine with the given initial phase
    pub fn new(initial_phase: P) -> Self {
        Self {
            agent: None,
            initial_phase: initial_phase.clone(),
            current_phase: initial_phase,
            valid_transitions: Vec::new(),
            history: Vec::new(),
        }
    }

    /// Label transition logs with the owning agent
    pub fn for_agent(mut self, agent: AgentId) -> Self {
        self.agent = Some(agent);
        self
    }

    /// Add a valid transition from one phase to another
    pub fn add_transition(mut self, from: P, to: P) -> Self {
        self.valid_transitions.push((from, to));
        self
    }

    /// Add multiple valid transitions
    pub fn add_transitions(mut self, transitions: Vec<(P, P)>) -> Self {
        self.valid_transitions.extend(transitions);
        self
    }

    /// Allow each phase to advance to the next one, closing the loop
    /// back to the first
    pub fn add_cycle(mut self, phases: &[P]) -> Self {
        for pair in phases.windows(2) {
            self.valid_transitions.push((pair[0].clone(), pair[1].clone()));
        }
        if let (Some(first), Some(last)) = (phases.first(), phases.last()) {
            if phases.len() > 1 {
                self.valid_transitions.push((last.clone(), first.clone()));
            }
        }
        self
    }

    /// Transitions taken so far, oldest first
    pub fn history(&self) -> &[(P, P)] {
        &self.history
    }

    /// Force the machine back to its initial phase
    ///
    /// Used when a request fails midway; the forced jump is logged but not
    /// recorded as a transition.
    pub fn reset(&mut self) {
        if self.current_phase != self.initial_phase {
            tracing::warn!(
                agent = self.agent.as_ref().map(AgentId::as_str),
                from = ?self.current_phase,
                to = ?self.initial_phase,
                "Workflow reset"
            );
            self.current_phase = self.initial_phase.clone();
        }
    }

    /// Check if a transition is in the valid transitions list
    fn is_valid_transition(&self, from: &P, to: &P) -> bool {
        self.valid_transitions
            .iter()
            .any(|(f, t)| f == from && t == to)
    }
}

impl<P: Clone + PartialEq + Debug> Workflow for StateMachine<P> {
    type Phase = P;

    fn current_phase(&self) -> &Self::Phase {
        &self.current_phase
    }

    fn can_transition_to(&self, phase: &Self::Phase) -> bool {
        self.is_valid_transition(&self.current_phase, phase)
    }

    fn transition_to(&mut self, phase: Self::Phase) -> Result<()> {
        if !self.can_transition_to(&phase) {
            return Err(Error::Workflow(format!(
                "Invalid transition from {:?} to {:?}",
                self.current_phase, phase
            )));
        }

        tracing::info!(
            agent = self.agent.as_ref().map(AgentId::as_str),
            from = ?self.current_phase,
            to = ?phase,
            "Workflow phase transition"
        );

        let from = std::mem::replace(&mut self.current_phase, phase.clone());
        self.history.push((from, phase));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum TestPhase {
        Start,
        Middle,
        End,
    }

    #[test]
    fn test_state_machine_creation() {
        let sm = StateMachine::new(TestPhase::Start);
        assert_eq!(sm.current_phase(), &TestPhase::Start);
        assert!(sm.history().is_empty());
    }

    #[test]
    fn test_valid_transition() {
        let mut sm = StateMachine::new(TestPhase::Start)
            .add_transition(TestPhase::Start, TestPhase::Middle)
            .add_transition(TestPhase::Middle, TestPhase::End);

        assert!(sm.can_transition_to(&TestPhase::Middle));
        assert!(!sm.can_transition_to(&TestPhase::End));

        assert!(sm.transition_to(TestPhase::Middle).is_ok());
        assert_eq!(sm.current_phase(), &TestPhase::Middle);

        assert!(sm.can_transition_to(&TestPhase::End));
        assert!(!sm.can_transition_to(&TestPhase::Start));
    }

    #[test]
    fn test_invalid_transition() {
        let mut sm =
            StateMachine::new(TestPhase::Start).add_transition(TestPhase::Start, TestPhase::Middle);

        let result = sm.transition_to(TestPhase::End);
        assert!(matches!(result, Err(Error::Workflow(_))));
        assert_eq!(sm.current_phase(), &TestPhase::Start);
    }

    #[test]
    fn test_cycle_returns_to_start() {
        let mut sm = StateMachine::new(TestPhase::Start).add_cycle(&[
            TestPhase::Start,
            TestPhase::Middle,
            TestPhase::End,
        ]);

        sm.transition_to(TestPhase::Middle).unwrap();
        sm.transition_to(TestPhase::End).unwrap();
        sm.transition_to(TestPhase::Start).unwrap();
        assert_eq!(sm.history().len(), 3);
        assert_eq!(sm.history()[2], (TestPhase::End, TestPhase::Start));
    }

    #[test]
    fn test_reset_goes_back_to_initial() {
        let mut sm = StateMachine::new(TestPhase::Start)
            .for_agent("a".into())
            .add_transitions(vec![
                (TestPhase::Start, TestPhase::Middle),
                (TestPhase::Middle, TestPhase::End),
            ]);
        sm.transition_to(TestPhase::Middle).unwrap();
        sm.reset();
        assert_eq!(sm.current_phase(), &TestPhase::Start);
        assert!(sm.can_transition_to(&TestPhase::Middle));
    }
}
