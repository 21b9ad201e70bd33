//! State model consumed by the protocol-level mutators.
//!
//! A [`StateModel`] is an ordered list of [`State`]s, each an ordered list of actions. Actions
//! live in an arena owned by the model and are referenced through [`ActionId`]s, so mutators can
//! track an action's identity even when the lists are reordered during a run.
//!
//! Executing a protocol is not the job of this crate, but the hooks exposed by
//! [`Mutator`](crate::mutator::Mutator) only make sense against a concrete walking discipline,
//! which [`StateModel::walk`] implements:
//!
//!  1. the walker peeks at the state's next action and passes it to
//!     [`Mutator::next_action`](crate::mutator::Mutator::next_action), which decides what is
//!     actually executed and is responsible for consuming the state's cursor;
//!  2. when a [`ActionKind::ChangeState`] action is executed, the walker asks
//!     [`Mutator::change_state`](crate::mutator::Mutator::change_state) which state to move to;
//!  3. the walk ends when no action is returned or after a maximum number of steps.

use std::collections::BTreeMap;

use log::trace;

use crate::error::*;
use crate::mutator::Mutator;
use crate::utils::Random;

/// Index of a state in its model.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct StateId(pub(crate) usize);

/// Index of an action in its model's arena.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ActionId(pub(crate) usize);

/// What an action does when executed.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum ActionKind {
    Start,
    Stop,
    Accept,
    Connect,
    Close,
    Input,
    Output,
    Call,
    GetProperty,
    SetProperty,
    ChangeState(StateId),
}

impl ActionKind {
    /// Returns `true` for actions with externally observable side effects, which are the only
    /// ones protocol-level mutators duplicate, remove or swap.
    pub fn is_mutable(&self) -> bool {
        matches!(
            self,
            ActionKind::Call | ActionKind::GetProperty | ActionKind::Output | ActionKind::SetProperty
        )
    }
}

#[derive(Clone, Debug)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
}

/// An ordered list of actions with a cursor.
#[derive(Clone, Debug)]
pub struct State {
    pub name: String,
    actions: Vec<ActionId>,
    position: usize,
}

impl State {
    pub fn actions(&self) -> &[ActionId] {
        &self.actions
    }

    /// Returns the action at the cursor without moving it.
    pub fn next_action(&self) -> Option<ActionId> {
        self.actions.get(self.position).copied()
    }

    /// Moves the cursor to the following action.
    pub fn move_to_next_action(&mut self) {
        if self.position < self.actions.len() {
            self.position += 1;
        }
    }

    /// Returns the action at the cursor and moves past it.
    pub fn pop_action(&mut self) -> Option<ActionId> {
        let a = self.next_action();
        self.move_to_next_action();
        a
    }

    fn reset(&mut self) {
        self.position = 0;
    }
}

/// A protocol's states and actions.
#[derive(Clone, Debug, Default)]
pub struct StateModel {
    pub name: String,
    /// Per-mutator configuration.
    pub hints: BTreeMap<String, String>,
    states: Vec<State>,
    actions: Vec<Action>,
    initial: usize,
}

impl StateModel {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// Adds a state. The first one added is the initial state.
    pub fn add_state(&mut self, name: &str) -> StateId {
        self.states.push(State {
            name: name.to_string(),
            actions: vec![],
            position: 0,
        });
        StateId(self.states.len() - 1)
    }

    /// Appends an action to a state.
    pub fn add_action(&mut self, state: StateId, name: &str, kind: ActionKind) -> Result<ActionId> {
        self.actions.push(Action {
            name: name.to_string(),
            kind,
        });
        let id = ActionId(self.actions.len() - 1);
        self.state_mut(state)?.actions.push(id);
        Ok(id)
    }

    pub fn set_initial(&mut self, state: StateId) -> Result<()> {
        self.state(state)?;
        self.initial = state.0;
        Ok(())
    }

    /// Adds a hint.
    pub fn hint(mut self, key: &str, value: &str) -> Self {
        self.hints.insert(key.to_string(), value.to_string());
        self
    }

    pub fn states(&self) -> impl Iterator<Item = StateId> {
        (0..self.states.len()).map(StateId)
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn state(&self, id: StateId) -> Result<&State> {
        self.states
            .get(id.0)
            .ok_or(Error::State(StateError::InvalidState(id.0)))
    }

    pub fn state_mut(&mut self, id: StateId) -> Result<&mut State> {
        self.states
            .get_mut(id.0)
            .ok_or(Error::State(StateError::InvalidState(id.0)))
    }

    pub fn action(&self, id: ActionId) -> Result<&Action> {
        self.actions
            .get(id.0)
            .ok_or(Error::State(StateError::InvalidAction(id.0)))
    }

    /// Every action of every state, in state order.
    pub fn flattened_actions(&self) -> Vec<ActionId> {
        self.states
            .iter()
            .flat_map(|s| s.actions.iter().copied())
            .collect()
    }

    /// Actions that protocol-level mutators can duplicate, remove or swap.
    pub fn mutable_actions(&self) -> Vec<ActionId> {
        self.flattened_actions()
            .into_iter()
            .filter(|a| self.actions[a.0].kind.is_mutable())
            .collect()
    }

    /// Runs the protocol and returns the names of the executed actions.
    ///
    /// `hooks` is consulted before each action and on each state transition. Without hooks,
    /// actions are executed in order and transitions go where they are declared to.
    pub fn walk(
        &mut self,
        mut hooks: Option<&mut dyn Mutator>,
        rand: &mut Random,
        max_steps: usize,
    ) -> Result<Vec<String>> {
        if self.states.is_empty() {
            return Err(Error::State(StateError::Empty));
        }
        self.states.iter_mut().for_each(State::reset);
        let mut current = StateId(self.initial);
        let mut last = None;
        let mut trace = vec![];
        for _ in 0..max_steps {
            let proposed = self.state(current)?.next_action();
            let state = &mut self.states[current.0];
            let chosen = match hooks.as_deref_mut() {
                Some(h) => h.next_action(state, last, proposed),
                None => state.pop_action(),
            };
            let Some(action) = chosen else {
                break;
            };
            let kind = self.action(action)?.kind;
            trace!("executing action '{}'", self.action(action)?.name);
            trace.push(self.action(action)?.name.clone());
            last = Some(action);
            if let ActionKind::ChangeState(to) = kind {
                let next = match hooks.as_deref_mut() {
                    Some(h) => h.change_state(self, current, action, to, rand),
                    None => to,
                };
                self.state(next)?;
                self.states[next.0].reset();
                current = next;
            }
        }
        Ok(trace)
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_cursor() {
        let mut sm = StateModel::new("SM");
        let s = sm.add_state("Initial");
        let a = sm.add_action(s, "A", ActionKind::Output).unwrap();
        let b = sm.add_action(s, "B", ActionKind::Input).unwrap();
        let state = sm.state_mut(s).unwrap();
        assert_eq!(state.next_action(), Some(a));
        assert_eq!(state.pop_action(), Some(a));
        assert_eq!(state.pop_action(), Some(b));
        assert_eq!(state.pop_action(), None);
        assert_eq!(sm.mutable_actions(), vec![a]);
        assert!(sm.add_action(StateId(5), "C", ActionKind::Call).is_err());
    }

    #[test]
    fn state_walk_follows_transitions() {
        let mut sm = StateModel::new("SM");
        let s1 = sm.add_state("First");
        let s2 = sm.add_state("Second");
        sm.add_action(s1, "A", ActionKind::Output).unwrap();
        sm.add_action(s1, "Go", ActionKind::ChangeState(s2)).unwrap();
        sm.add_action(s1, "Never", ActionKind::Output).unwrap();
        sm.add_action(s2, "B", ActionKind::Input).unwrap();
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let trace = sm.walk(None, &mut rand, 100).unwrap();
        assert_eq!(trace, vec!["A", "Go", "B"]);
        assert!(StateModel::new("Empty")
            .walk(None, &mut rand, 10)
            .is_err());
    }
}
