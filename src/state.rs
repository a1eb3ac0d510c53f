use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{PddlError, Result};
use crate::formula::{Predicate, Proposition};
use crate::generator::ParameterGenerator;
use crate::registry::Registry;

/// How absent propositions are read when conditions are evaluated.
///
/// Under [`Closed`](WorldAssumption::Closed), anything not known true is
/// false and transitions simply retract retired facts. Under
/// [`Open`](WorldAssumption::Open), negative literals must be explicitly
/// known false, and transitions record retractions in the false set.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub enum WorldAssumption {
    Closed,
    Open,
}

impl Default for WorldAssumption {
    fn default() -> Self {
        WorldAssumption::Closed
    }
}

/// What a state update did to the targeted proposition.
#[derive(Copy, Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub enum Delta {
    Unchanged,
    Added,
    /// The proposition moved from one truth set to the other.
    Flipped,
}

impl Delta {
    pub fn changed(self) -> bool {
        self != Delta::Unchanged
    }
}

/// A state with disjoint known-true and known-false proposition sets.
/// Propositions in neither set are unknown (open world) or false (closed
/// world).
#[derive(Clone, Debug, Default, Ord, PartialOrd, PartialEq, Eq)]
pub struct PartialState {
    pos: BTreeSet<Proposition>,
    neg: BTreeSet<Proposition>,
}

impl PartialState {
    pub fn new() -> Self {
        PartialState::default()
    }

    pub fn from_true<I: IntoIterator<Item = Proposition>>(props: I) -> Self {
        PartialState {
            pos: props.into_iter().collect(),
            neg: BTreeSet::new(),
        }
    }

    pub fn contains(&self, prop: &Proposition) -> bool {
        self.pos.contains(prop)
    }

    pub fn is_negated(&self, prop: &Proposition) -> bool {
        self.neg.contains(prop)
    }

    pub fn is_unknown(&self, prop: &Proposition) -> bool {
        !self.contains(prop) && !self.is_negated(prop)
    }

    /// Marks `prop` known true.
    pub fn insert(&mut self, prop: Proposition) -> Delta {
        let flipped = self.neg.remove(&prop);
        let added = self.pos.insert(prop);
        if flipped {
            Delta::Flipped
        } else if added {
            Delta::Added
        } else {
            Delta::Unchanged
        }
    }

    /// Marks `prop` known false.
    pub fn negate(&mut self, prop: Proposition) -> Delta {
        let flipped = self.pos.remove(&prop);
        let added = self.neg.insert(prop);
        if flipped {
            Delta::Flipped
        } else if added {
            Delta::Added
        } else {
            Delta::Unchanged
        }
    }

    /// Forgets `prop` entirely. Returns true when anything was removed.
    pub fn unset(&mut self, prop: &Proposition) -> bool {
        let was_true = self.pos.remove(prop);
        let was_false = self.neg.remove(prop);
        was_true || was_false
    }

    pub fn truths(&self) -> &BTreeSet<Proposition> {
        &self.pos
    }

    pub fn negations(&self) -> &BTreeSet<Proposition> {
        &self.neg
    }

    pub fn len(&self) -> usize {
        self.pos.len() + self.neg.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos.is_empty() && self.neg.is_empty()
    }

    /// Canonical string forms of both truth sets.
    pub fn stringify(&self) -> (BTreeSet<String>, BTreeSet<String>) {
        (
            self.pos.iter().map(|p| p.to_string()).collect(),
            self.neg.iter().map(|p| p.to_string()).collect(),
        )
    }
}

impl fmt::Display for PartialState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{ ")?;
        let mut first = true;
        for prop in self.pos.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{prop}")?;
            first = false;
        }
        for prop in self.neg.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "not {prop}")?;
            first = false;
        }
        write!(f, " }}")
    }
}

/// Bijection between ground propositions and dense vector positions.
///
/// Indices are assigned once, walking predicates in declaration order and
/// argument tuples in generator order, and are never renumbered. Growing
/// the object universe appends fresh indices; removing an object retires
/// its indices without reusing them.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct StateIndex {
    predicates: Vec<Predicate>,
    generators: Vec<ParameterGenerator>,
    ids: BTreeMap<Proposition, usize>,
    props: Vec<Proposition>,
    alive: Vec<bool>,
}

impl StateIndex {
    pub fn new(predicates: &[Predicate], registry: &Registry) -> Self {
        let mut index = StateIndex {
            predicates: predicates.to_vec(),
            generators: predicates
                .iter()
                .map(|p| ParameterGenerator::new(&p.params))
                .collect(),
            ids: BTreeMap::new(),
            props: Vec::new(),
            alive: Vec::new(),
        };
        index.extend(registry);
        index
    }

    /// Numbers every proposition of the current universe that has no index
    /// yet. Existing assignments are untouched.
    pub fn extend(&mut self, registry: &Registry) {
        for (predicate, gen) in self.predicates.iter().zip(self.generators.iter()) {
            for args in gen.tuples(registry) {
                let prop = Proposition::new(&predicate.name, args);
                if !self.ids.contains_key(&prop) {
                    let id = self.props.len();
                    self.ids.insert(prop.clone(), id);
                    self.props.push(prop);
                    self.alive.push(true);
                }
            }
        }
    }

    /// Retires every index whose proposition mentions `object_name`.
    pub fn retire(&mut self, object_name: &str) {
        for (prop, id) in self.ids.iter() {
            if prop.args.iter().any(|obj| obj.name == object_name) {
                self.alive[*id] = false;
            }
        }
    }

    /// Total number of assigned indices, retired ones included.
    pub fn len(&self) -> usize {
        self.props.len()
    }

    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    pub fn get_proposition(&self, index: usize) -> Result<&Proposition> {
        self.props.get(index).ok_or_else(|| {
            PddlError::InvalidArgument(format!(
                "proposition index {index} out of range for {}",
                self.props.len()
            ))
        })
    }

    pub fn get_proposition_index(&self, prop: &Proposition) -> Result<usize> {
        self.ids
            .get(prop)
            .copied()
            .ok_or_else(|| PddlError::UnknownSymbol(format!("proposition {prop}")))
    }

    /// Encodes the known-true set as a boolean vector. States carrying
    /// explicit negative literals have no vector form and are rejected.
    pub fn get_indexed_state(&self, state: &PartialState) -> Result<Vec<bool>> {
        if !state.negations().is_empty() {
            return Err(PddlError::InvalidArgument(
                "state with explicit negative literals has no indexed form".to_owned(),
            ));
        }
        let mut bits = vec![false; self.props.len()];
        for prop in state.truths().iter() {
            let id = self.get_proposition_index(prop)?;
            if !self.alive[id] {
                return Err(PddlError::InvalidArgument(format!(
                    "{prop} refers to a removed object"
                )));
            }
            bits[id] = true;
        }
        Ok(bits)
    }

    pub fn get_state(&self, bits: &[bool]) -> Result<PartialState> {
        if bits.len() != self.props.len() {
            return Err(PddlError::InvalidArgument(format!(
                "indexed state has {} entries, expected {}",
                bits.len(),
                self.props.len()
            )));
        }
        let mut state = PartialState::new();
        for (id, set) in bits.iter().enumerate() {
            if *set {
                if !self.alive[id] {
                    return Err(PddlError::InvalidArgument(format!(
                        "{} refers to a removed object",
                        self.props[id]
                    )));
                }
                state.insert(self.props[id].clone());
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::formula::Parameter;
    use crate::registry::Object;

    fn prop(name: &str, args: &[&str]) -> Proposition {
        Proposition::new(
            name,
            args.iter().map(|a| Object::new(a, "letter")).collect(),
        )
    }

    #[test]
    fn inserts_and_negations_report_deltas() {
        let mut state = PartialState::new();
        assert_eq!(state.insert(prop("on", &["a", "b"])), Delta::Added);
        assert_eq!(state.insert(prop("on", &["a", "b"])), Delta::Unchanged);
        assert_eq!(state.negate(prop("on", &["a", "b"])), Delta::Flipped);
        assert!(state.is_negated(&prop("on", &["a", "b"])));
        assert!(!state.contains(&prop("on", &["a", "b"])));
        assert_eq!(state.insert(prop("on", &["a", "b"])), Delta::Flipped);
        assert_eq!(state.negate(prop("clear", &["a"])), Delta::Added);
        assert!(state.is_unknown(&prop("clear", &["b"])));
    }

    #[test]
    fn unset_forgets_both_polarities() {
        let mut state = PartialState::new();
        state.insert(prop("on", &["a", "b"]));
        state.negate(prop("clear", &["a"]));
        assert!(state.unset(&prop("on", &["a", "b"])));
        assert!(state.unset(&prop("clear", &["a"])));
        assert!(!state.unset(&prop("clear", &["a"])));
        assert!(state.is_empty());
    }

    #[test]
    fn display_lists_truths_then_negations() {
        let mut state = PartialState::new();
        state.insert(prop("on", &["a", "b"]));
        state.negate(prop("clear", &["a"]));
        assert_eq!(state.to_string(), "{ on(a, b), not clear(a) }");
    }

    fn letters() -> (Registry, Vec<Predicate>) {
        let mut registry = Registry::new();
        registry
            .declare_types(&[("letter".to_owned(), None)])
            .unwrap();
        registry.add_object("a", "letter").unwrap();
        registry.add_object("b", "letter").unwrap();
        let predicates = vec![
            Predicate::new(
                "on",
                vec![
                    Parameter::new("?x", "letter"),
                    Parameter::new("?y", "letter"),
                ],
            ),
            Predicate::new("clear", vec![Parameter::new("?x", "letter")]),
            Predicate::new("handempty", vec![]),
        ];
        (registry, predicates)
    }

    #[test]
    fn indices_follow_declaration_then_tuple_order() {
        let (registry, predicates) = letters();
        let index = StateIndex::new(&predicates, &registry);
        assert_eq!(index.len(), 7);
        assert_eq!(index.get_proposition_index(&prop("on", &["a", "a"])).unwrap(), 0);
        assert_eq!(index.get_proposition_index(&prop("on", &["a", "b"])).unwrap(), 1);
        assert_eq!(index.get_proposition_index(&prop("on", &["b", "a"])).unwrap(), 2);
        assert_eq!(index.get_proposition_index(&prop("on", &["b", "b"])).unwrap(), 3);
        assert_eq!(index.get_proposition_index(&prop("clear", &["a"])).unwrap(), 4);
        assert_eq!(index.get_proposition_index(&prop("clear", &["b"])).unwrap(), 5);
        assert_eq!(
            index
                .get_proposition_index(&Proposition::new("handempty", vec![]))
                .unwrap(),
            6
        );
        assert_eq!(index.get_proposition(1).unwrap().to_string(), "on(a, b)");
        assert_eq!(
            index.get_proposition(7).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            index
                .get_proposition_index(&prop("on", &["a", "c"]))
                .unwrap_err()
                .kind(),
            ErrorKind::UnknownSymbol
        );
    }

    #[test]
    fn states_round_trip_through_vectors() {
        let (registry, predicates) = letters();
        let index = StateIndex::new(&predicates, &registry);
        let state = PartialState::from_true([
            prop("on", &["a", "b"]),
            prop("clear", &["a"]),
            Proposition::new("handempty", vec![]),
        ]);
        let bits = index.get_indexed_state(&state).unwrap();
        assert_eq!(bits, vec![false, true, false, false, true, false, true]);
        assert_eq!(index.get_state(&bits).unwrap(), state);
    }

    #[test]
    fn negative_literals_have_no_vector_form() {
        let (registry, predicates) = letters();
        let index = StateIndex::new(&predicates, &registry);
        let mut state = PartialState::new();
        state.negate(prop("clear", &["a"]));
        assert_eq!(
            index.get_indexed_state(&state).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn growth_appends_without_renumbering() {
        let (mut registry, predicates) = letters();
        let mut index = StateIndex::new(&predicates, &registry);
        registry.add_object("c", "letter").unwrap();
        index.extend(&registry);
        assert_eq!(index.get_proposition_index(&prop("on", &["a", "b"])).unwrap(), 1);
        assert_eq!(index.get_proposition_index(&prop("clear", &["b"])).unwrap(), 5);
        assert_eq!(index.get_proposition_index(&prop("on", &["a", "c"])).unwrap(), 7);
        assert_eq!(index.get_proposition_index(&prop("on", &["b", "c"])).unwrap(), 8);
        assert_eq!(index.get_proposition_index(&prop("on", &["c", "a"])).unwrap(), 9);
        assert_eq!(index.get_proposition_index(&prop("clear", &["c"])).unwrap(), 12);
        assert_eq!(index.len(), 13);
    }

    #[test]
    fn retired_indices_reject_encoding() {
        let (registry, predicates) = letters();
        let mut index = StateIndex::new(&predicates, &registry);
        index.retire("b");
        let ok = PartialState::from_true([prop("clear", &["a"])]);
        assert!(index.get_indexed_state(&ok).is_ok());
        let stale = PartialState::from_true([prop("on", &["a", "b"])]);
        assert_eq!(
            index.get_indexed_state(&stale).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(index.get_proposition_index(&prop("clear", &["a"])).unwrap(), 4);
    }
}
