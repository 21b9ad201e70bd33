//! Mutators bound to a [`StateModel`], changing the order in which a protocol is run rather than
//! the data it exchanges.
//!
//! A sequential or random mutation only selects the actions involved and returns
//! [`MutationResult::Scheduled`]. The actual mutation happens during the next
//! [`StateModel::walk`], through the [`Mutator::next_action`] and [`Mutator::change_state`]
//! hooks.

use log::debug;

use crate::error::*;
use crate::mutator::*;
use crate::state::{ActionId, State, StateId, StateModel};
use crate::utils::Random;

fn unsupported(name: &'static str, model: &StateModel) -> Error {
    Error::Mutator(MutatorError::Unsupported(name, model.name.clone()))
}

fn out_of_range(name: &'static str, mutation: usize, count: usize) -> Error {
    Error::Mutator(MutatorError::IndexOutOfRange(name, mutation, count))
}

// -----------------------------------------------------------------------------------------------
// ActionDuplicate

/// Executes an action several times in a row.
pub struct ActionDuplicate {
    count: usize,
    mutation: usize,
    n: usize,
    target: Option<ActionId>,
    duplicates: usize,
    pending: Option<usize>,
}

impl ActionDuplicate {
    pub const NAME: &'static str = "ActionDuplicate";

    pub fn supported(model: &StateModel) -> bool {
        !model.mutable_actions().is_empty()
    }

    pub fn new(model: &StateModel) -> Result<Self> {
        if !Self::supported(model) {
            return Err(unsupported(Self::NAME, model));
        }
        let key = format!("{}-N", Self::NAME);
        let n = match model.hints.get(&key) {
            Some(v) => parse_hint_number(&key, v)?,
            None => 50,
        }
        .max(1);
        Ok(Self {
            count: model.flattened_actions().len() * n,
            mutation: 0,
            n,
            target: None,
            duplicates: 0,
            pending: None,
        })
    }

    fn schedule(&mut self, target: ActionId, duplicates: usize) -> MutationResult {
        debug!("{} scheduled {:?} {} more time(s)", Self::NAME, target, duplicates);
        self.target = Some(target);
        self.duplicates = duplicates;
        self.pending = None;
        MutationResult::Scheduled
    }
}

impl Mutator for ActionDuplicate {
    mutator_index!(Self::NAME);

    fn affects_data_model(&self) -> bool {
        false
    }

    fn affects_state_model(&self) -> bool {
        true
    }

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let model = target.state_model(Self::NAME)?;
        let action = *model
            .flattened_actions()
            .get(self.mutation / self.n)
            .ok_or(out_of_range(Self::NAME, self.mutation, self.count))?;
        if !model.action(action)?.kind.is_mutable() {
            self.target = None;
            debug!("{} skipped {:?}: unsupported action kind", Self::NAME, action);
            return Ok(MutationResult::Skipped);
        }
        Ok(self.schedule(action, self.mutation % self.n + 1))
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let model = target.state_model(Self::NAME)?;
        let actions = model.mutable_actions();
        let Some(action) = rand.choose(&actions).copied() else {
            return Ok(MutationResult::Skipped);
        };
        let duplicates = rand.usize_range(1, self.n + 1);
        Ok(self.schedule(action, duplicates))
    }

    fn next_action(
        &mut self,
        state: &mut State,
        _last: Option<ActionId>,
        proposed: Option<ActionId>,
    ) -> Option<ActionId> {
        if proposed.is_none() || proposed != self.target {
            return state.pop_action();
        }
        let pending = self.pending.get_or_insert(self.duplicates);
        if *pending > 0 {
            *pending -= 1;
            return proposed;
        }
        self.pending = None;
        state.pop_action()
    }
}

// -----------------------------------------------------------------------------------------------
// ActionRemove

/// Skips an action.
pub struct ActionRemove {
    count: usize,
    mutation: usize,
    target: Option<ActionId>,
}

impl ActionRemove {
    pub const NAME: &'static str = "ActionRemove";

    pub fn supported(model: &StateModel) -> bool {
        !model.mutable_actions().is_empty()
    }

    pub fn new(model: &StateModel) -> Result<Self> {
        if !Self::supported(model) {
            return Err(unsupported(Self::NAME, model));
        }
        Ok(Self {
            count: model.mutable_actions().len(),
            mutation: 0,
            target: None,
        })
    }
}

impl Mutator for ActionRemove {
    mutator_index!(Self::NAME);

    fn affects_data_model(&self) -> bool {
        false
    }

    fn affects_state_model(&self) -> bool {
        true
    }

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        let model = target.state_model(Self::NAME)?;
        let action = *model
            .mutable_actions()
            .get(self.mutation)
            .ok_or(out_of_range(Self::NAME, self.mutation, self.count))?;
        self.target = Some(action);
        Ok(MutationResult::Scheduled)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let model = target.state_model(Self::NAME)?;
        self.target = rand.choose(&model.mutable_actions()).copied();
        Ok(MutationResult::Scheduled)
    }

    fn next_action(
        &mut self,
        state: &mut State,
        _last: Option<ActionId>,
        proposed: Option<ActionId>,
    ) -> Option<ActionId> {
        if proposed.is_some() && proposed == self.target {
            state.move_to_next_action();
        }
        state.pop_action()
    }
}

// -----------------------------------------------------------------------------------------------
// ActionSwap

/// Exchanges the positions of two actions.
pub struct ActionSwap {
    count: usize,
    mutation: usize,
    pair: Option<(ActionId, ActionId)>,
}

impl ActionSwap {
    pub const NAME: &'static str = "ActionSwap";

    pub fn supported(model: &StateModel) -> bool {
        model.mutable_actions().len() >= 2
    }

    pub fn new(model: &StateModel) -> Result<Self> {
        if !Self::supported(model) {
            return Err(unsupported(Self::NAME, model));
        }
        Ok(Self {
            count: model.mutable_actions().len(),
            mutation: 0,
            pair: None,
        })
    }
}

impl Mutator for ActionSwap {
    mutator_index!(Self::NAME);

    fn affects_data_model(&self) -> bool {
        false
    }

    fn affects_state_model(&self) -> bool {
        true
    }

    fn sequential_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let model = target.state_model(Self::NAME)?;
        let actions = model.mutable_actions();
        let left = *actions
            .get(self.mutation)
            .ok_or(out_of_range(Self::NAME, self.mutation, self.count))?;
        // Draws among the other actions and skips over the left one.
        let mut idx = rand.usize_range(0, actions.len() - 1);
        if idx >= self.mutation {
            idx += 1;
        }
        self.pair = Some((left, actions[idx]));
        Ok(MutationResult::Scheduled)
    }

    fn random_mutation(&mut self, target: Target<'_>, rand: &mut Random) -> Result<MutationResult> {
        let model = target.state_model(Self::NAME)?;
        let actions = model.mutable_actions();
        let picked = rand.permutation(actions.len(), 2);
        self.pair = match picked[..] {
            [a, b] => Some((actions[a - 1], actions[b - 1])),
            _ => None,
        };
        Ok(MutationResult::Scheduled)
    }

    fn next_action(
        &mut self,
        state: &mut State,
        _last: Option<ActionId>,
        proposed: Option<ActionId>,
    ) -> Option<ActionId> {
        match (self.pair, proposed) {
            (Some((left, right)), Some(p)) if p == left => {
                state.move_to_next_action();
                Some(right)
            }
            (Some((left, right)), Some(p)) if p == right => {
                state.move_to_next_action();
                Some(left)
            }
            _ => state.pop_action(),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// StateChangeRandom

/// Occasionally transitions to a random state instead of the declared one.
pub struct StateChangeRandom {
    count: usize,
    mutation: usize,
    armed: bool,
}

impl StateChangeRandom {
    pub const NAME: &'static str = "StateChangeRandom";

    pub fn supported(model: &StateModel) -> bool {
        model.state_count() >= 2
    }

    pub fn new(model: &StateModel) -> Result<Self> {
        if !Self::supported(model) {
            return Err(unsupported(Self::NAME, model));
        }
        Ok(Self {
            count: model.state_count(),
            mutation: 0,
            armed: false,
        })
    }
}

impl Mutator for StateChangeRandom {
    mutator_index!(Self::NAME);

    fn affects_data_model(&self) -> bool {
        false
    }

    fn affects_state_model(&self) -> bool {
        true
    }

    fn sequential_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        target.state_model(Self::NAME)?;
        if self.mutation >= self.count {
            return Err(out_of_range(Self::NAME, self.mutation, self.count));
        }
        self.armed = true;
        Ok(MutationResult::Scheduled)
    }

    fn random_mutation(&mut self, target: Target<'_>, _rand: &mut Random) -> Result<MutationResult> {
        target.state_model(Self::NAME)?;
        self.armed = true;
        Ok(MutationResult::Scheduled)
    }

    fn change_state(
        &mut self,
        model: &StateModel,
        _current: StateId,
        _action: ActionId,
        proposed: StateId,
        rand: &mut Random,
    ) -> StateId {
        let states = model.state_count();
        if !self.armed || states == 0 || rand.usize_range(0, states) != 0 {
            return proposed;
        }
        let next = StateId(rand.usize_range(0, states));
        debug!("{} changed state {:?} into {:?}", Self::NAME, proposed, next);
        next
    }
}

// -----------------------------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ActionKind;

    fn protocol() -> StateModel {
        let mut sm = StateModel::new("SM").hint("ActionDuplicate-N", "3");
        let s = sm.add_state("Initial");
        sm.add_action(s, "Out1", ActionKind::Output).unwrap();
        sm.add_action(s, "In", ActionKind::Input).unwrap();
        sm.add_action(s, "Out2", ActionKind::Output).unwrap();
        sm.add_action(s, "Out3", ActionKind::Call).unwrap();
        sm
    }

    fn run(sm: &mut StateModel, m: &mut dyn Mutator, mutation: usize) -> Vec<String> {
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        m.set_mutation(mutation);
        let r = m
            .sequential_mutation(Target::StateModel(sm), &mut rand)
            .unwrap();
        if r.is_skipped() {
            return vec![];
        }
        sm.walk(Some(m), &mut rand, 100).unwrap()
    }

    #[test]
    fn action_duplicate() {
        let mut sm = protocol();
        let mut m = ActionDuplicate::new(&sm).unwrap();
        assert_eq!(m.count(), 12);
        assert!(!m.affects_data_model());
        assert!(m.affects_state_model());
        assert_eq!(run(&mut sm, &mut m, 0), vec!["Out1", "Out1", "In", "Out2", "Out3"]);
        assert_eq!(
            run(&mut sm, &mut m, 8),
            vec!["Out1", "In", "Out2", "Out2", "Out2", "Out2", "Out3"]
        );
        // Input actions are never duplicated.
        assert!(run(&mut sm, &mut m, 4).is_empty());
        let mut dm = crate::model::DataModel::new("Root");
        let root = dm.root();
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        assert_eq!(
            m.sequential_mutation(Target::Element(&mut dm, root), &mut rand)
                .err(),
            Some(Error::Mutator(MutatorError::WrongTarget("ActionDuplicate")))
        );
    }

    #[test]
    fn action_duplicate_random() {
        let mut sm = protocol();
        let mut m = ActionDuplicate::new(&sm).unwrap();
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        for _ in 0..50 {
            m.random_mutation(Target::StateModel(&mut sm), &mut rand)
                .unwrap();
            let trace = sm.walk(Some(&mut m), &mut rand, 100).unwrap();
            assert!((5..=7).contains(&trace.len()));
            assert_eq!(trace.iter().filter(|a| *a == "In").count(), 1);
        }
    }

    #[test]
    fn action_remove() {
        let mut sm = protocol();
        let mut m = ActionRemove::new(&sm).unwrap();
        assert_eq!(m.count(), 3);
        assert_eq!(run(&mut sm, &mut m, 1), vec!["Out1", "In", "Out3"]);
        assert_eq!(run(&mut sm, &mut m, 2), vec!["Out1", "In", "Out2"]);
    }

    #[test]
    fn action_swap() {
        let mut sm = protocol();
        let mut m = ActionSwap::new(&sm).unwrap();
        assert_eq!(m.count(), 3);
        for i in 0..m.count() {
            let trace = run(&mut sm, &mut m, i);
            assert_eq!(trace.len(), 4);
            assert_eq!(trace[1], "In");
            assert_ne!(trace, vec!["Out1", "In", "Out2", "Out3"]);
            let mut sorted = trace.clone();
            sorted.sort();
            assert_eq!(sorted, vec!["In", "Out1", "Out2", "Out3"]);
        }
        let mut single = StateModel::new("SM");
        let s = single.add_state("Initial");
        single.add_action(s, "Out", ActionKind::Output).unwrap();
        assert!(!ActionSwap::supported(&single));
        assert!(ActionSwap::new(&single).is_err());
    }

    #[test]
    fn state_change_random() {
        let mut sm = StateModel::new("SM");
        let s1 = sm.add_state("First");
        let s2 = sm.add_state("Second");
        sm.add_action(s1, "A", ActionKind::Output).unwrap();
        sm.add_action(s1, "Go", ActionKind::ChangeState(s2)).unwrap();
        sm.add_action(s2, "B", ActionKind::Input).unwrap();
        let mut m = StateChangeRandom::new(&sm).unwrap();
        assert_eq!(m.count(), 2);
        let mut rand = Random::new(0xa5a5a5a5a5a5a5);
        let mut changed = 0;
        for _ in 0..50 {
            m.random_mutation(Target::StateModel(&mut sm), &mut rand)
                .unwrap();
            let trace = sm.walk(Some(&mut m), &mut rand, 20).unwrap();
            assert_eq!(trace[..2], ["A", "Go"]);
            if trace[2] != "B" {
                changed += 1;
            }
        }
        assert!(changed > 0);
        assert!(changed < 50);
    }
}
