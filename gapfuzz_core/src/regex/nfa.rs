use super::parser::Node;
use std::collections::{BTreeMap, BTreeSet};

/// Index of a state inside [`Nfa::states`].
pub type StateId = usize;

/// Ordered so that closures and enumeration iterate deterministically.
pub type StateSet = BTreeSet<StateId>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    pub epsilon: Vec<StateId>,
    pub transitions: BTreeMap<char, StateSet>,
}

/// Thompson automaton stored as an arena of states.
///
/// The automaton is plain data: states refer to each other by index, it is
/// never mutated after [`Nfa::compile`] returns, and it has exactly one
/// accepting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nfa {
    pub states: Vec<State>,
    pub start: StateId,
    pub accept: StateId,
}

impl Nfa {
    pub fn compile(root: &Node) -> Self {
        let mut builder = Builder::default();
        let start = builder.add_state();
        let accept = builder.fragment(root, start);
        Nfa {
            states: builder.states,
            start,
            accept,
        }
    }

    /// All states reachable from `seeds` through epsilon edges alone,
    /// including the seeds themselves.
    pub fn epsilon_closure<I>(&self, seeds: I) -> StateSet
    where
        I: IntoIterator<Item = StateId>,
    {
        let mut closure = StateSet::new();
        let mut stack: Vec<StateId> = seeds.into_iter().collect();
        while let Some(id) = stack.pop() {
            if closure.insert(id) {
                stack.extend(
                    self.states[id]
                        .epsilon
                        .iter()
                        .copied()
                        .filter(|next| !closure.contains(next)),
                );
            }
        }
        closure
    }

    /// Outgoing symbols of every state in `set`, merged per symbol.
    pub fn step_targets(&self, set: &StateSet) -> BTreeMap<char, StateSet> {
        let mut targets: BTreeMap<char, StateSet> = BTreeMap::new();
        for &id in set {
            for (&symbol, successors) in &self.states[id].transitions {
                targets
                    .entry(symbol)
                    .or_default()
                    .extend(successors.iter().copied());
            }
        }
        targets
    }

    pub fn is_accepting(&self, set: &StateSet) -> bool {
        set.contains(&self.accept)
    }
}

#[derive(Default)]
struct Builder {
    states: Vec<State>,
}

impl Builder {
    fn add_state(&mut self) -> StateId {
        self.states.push(State::default());
        self.states.len() - 1
    }

    fn add_epsilon(&mut self, from: StateId, to: StateId) {
        self.states[from].epsilon.push(to);
    }

    fn add_transition(&mut self, from: StateId, symbol: char, to: StateId) {
        self.states[from]
            .transitions
            .entry(symbol)
            .or_default()
            .insert(to);
    }

    /// Emits the fragment for `node` starting at the existing state `start`
    /// and returns its end state.
    ///
    /// Fragments are built in place from the caller's state, so a
    /// concatenation's second half starts on the first half's end state
    /// instead of being joined by an extra edge. Loop edges only ever point at
    /// a state created for that loop; a fragment's returned end state has no
    /// outgoing edges yet.
    fn fragment(&mut self, node: &Node, start: StateId) -> StateId {
        match node {
            Node::Literal(c) => {
                let end = self.add_state();
                self.add_transition(start, *c, end);
                end
            }
            Node::Class(set) => {
                let end = self.add_state();
                for &c in set {
                    self.add_transition(start, c, end);
                }
                end
            }
            Node::Concat(left, right) => {
                let middle = self.fragment(left, start);
                self.fragment(right, middle)
            }
            Node::Union(left, right) => {
                let left_start = self.add_state();
                let right_start = self.add_state();
                self.add_epsilon(start, left_start);
                self.add_epsilon(start, right_start);
                let left_end = self.fragment(left, left_start);
                let right_end = self.fragment(right, right_start);
                let end = self.add_state();
                self.add_epsilon(left_end, end);
                self.add_epsilon(right_end, end);
                end
            }
            Node::Star(inner) => self.star(inner, start),
            Node::Plus(inner) => {
                let once = self.fragment(inner, start);
                self.star(inner, once)
            }
            Node::Quest(inner) => {
                let end = self.fragment(inner, start);
                self.add_epsilon(start, end);
                end
            }
        }
    }

    fn star(&mut self, inner: &Node, start: StateId) -> StateId {
        let loop_start = self.add_state();
        self.add_epsilon(start, loop_start);
        let loop_end = self.fragment(inner, loop_start);
        self.add_epsilon(loop_end, loop_start);
        let end = self.add_state();
        self.add_epsilon(loop_end, end);
        self.add_epsilon(start, end);
        end
    }
}
