// Transition tables - the legal state graph of one workflow, held as plain data

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

/// Anything usable as a workflow state.
///
/// States are compared by value. The engine never interprets them beyond
/// looking them up in a [`TransitionTable`].
pub trait State: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> State for T where T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// Maps a target state to the set of states it may legally be entered from.
///
/// The edge `(from, to)` is legal iff `from` is in `table[to]`. Targets with
/// no entry can never be entered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable<S: State> {
    entries: HashMap<S, HashSet<S>>,
}

impl<S: State> TransitionTable<S> {
    /// Build a table from `(target, predecessors)` pairs.
    ///
    /// Repeated targets are merged.
    pub fn new<I, P>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        P: IntoIterator<Item = S>,
    {
        let mut table = Self {
            entries: HashMap::new(),
        };
        for (target, from) in entries {
            table.entries.entry(target).or_default().extend(from);
        }
        table
    }

    pub fn allows(&self, from: &S, to: &S) -> bool {
        self.entries
            .get(to)
            .is_some_and(|predecessors| predecessors.contains(from))
    }

    /// Predecessors of `target`, or `None` when the table has no entry for it.
    pub fn predecessors(&self, target: &S) -> Option<&HashSet<S>> {
        self.entries.get(target)
    }

    /// States reachable from `initial` by following legal edges, `initial` included.
    pub fn reachable_from(&self, initial: &S) -> HashSet<S> {
        let mut seen = HashSet::from([initial.clone()]);
        let mut frontier = vec![initial.clone()];
        while let Some(current) = frontier.pop() {
            for (target, predecessors) in &self.entries {
                if predecessors.contains(&current) && seen.insert(target.clone()) {
                    frontier.push(target.clone());
                }
            }
        }
        seen
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TransitionTable<&'static str> {
        TransitionTable::new([
            ("b", vec!["a"]),
            ("c", vec!["a", "b"]),
            ("c", vec!["c"]),
        ])
    }

    #[test]
    fn test_lookup_is_by_target() {
        let table = table();
        assert!(table.allows(&"a", &"b"));
        assert!(!table.allows(&"b", &"a"));
        assert!(table.allows(&"c", &"c"));
    }

    #[test]
    fn test_unknown_target_is_never_legal() {
        let table = table();
        assert!(!table.allows(&"a", &"z"));
        assert!(table.predecessors(&"z").is_none());
    }

    #[test]
    fn test_repeated_targets_merge() {
        let table = table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.predecessors(&"c").map(|p| p.len()), Some(3));
    }

    #[test]
    fn test_reachability() {
        let table = table();
        let reachable = table.reachable_from(&"a");
        assert_eq!(reachable, HashSet::from(["a", "b", "c"]));
        assert_eq!(table.reachable_from(&"c"), HashSet::from(["c"]));
    }
}
