use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{PddlError, Result};
use crate::formula::{Bindings, Formula, Parameter, Predicate, Proposition};
use crate::generator::ParameterGenerator;
use crate::normal_form::DisjunctiveFormula;
use crate::registry::{Object, Registry};
use crate::state::{Delta, PartialState, WorldAssumption};

/// Upper bound on full axiom passes before giving up on convergence.
pub const MAX_CONSISTENCY_PASSES: usize = 50;

/// One derivation rule: the head holds for a grounding whenever the
/// condition does. A head predicate may have several rules.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct DerivedPredicate {
    pub head: Predicate,
    pub condition: Formula,
    gen: ParameterGenerator,
}

impl DerivedPredicate {
    pub fn new(head: Predicate, condition: Formula) -> Self {
        let gen = ParameterGenerator::new(&head.params);
        DerivedPredicate {
            head,
            condition,
            gen,
        }
    }

    fn groundings(
        &self,
        registry: &Registry,
    ) -> Result<Vec<(Vec<Object>, DisjunctiveFormula)>> {
        let mut out = Vec::new();
        for args in self.gen.tuples(registry) {
            let bindings: Bindings = self
                .head
                .params
                .iter()
                .zip(args.iter())
                .map(|(param, arg)| (param.symbol.clone(), arg.clone()))
                .collect();
            let dnf = DisjunctiveFormula::normalize(registry, &self.condition, &bindings)?;
            out.push((args, dnf));
        }
        Ok(out)
    }
}

/// All derivation rules of a domain, stratified so that a rule reading a
/// head through negation sits strictly above every rule deriving it.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct DerivedPredicates {
    rules: Vec<DerivedPredicate>,
    strata: Vec<usize>,
    max_stratum: usize,
}

impl DerivedPredicates {
    /// Assigns strata, rejecting rule sets whose negative dependencies
    /// form a cycle.
    pub fn stratify(rules: Vec<DerivedPredicate>) -> Result<Self> {
        let heads: BTreeSet<String> = rules.iter().map(|r| r.head.name.clone()).collect();
        let mut head_strata: BTreeMap<String, usize> =
            heads.iter().map(|h| (h.clone(), 0)).collect();
        let mut deps: Vec<(String, String, bool)> = Vec::new();
        for rule in rules.iter() {
            collect_deps(&rule.condition, false, &heads, &rule.head.name, &mut deps);
        }

        let bound = heads.len() + 1;
        let mut passes = 0;
        loop {
            let mut changed = false;
            for (head, dep, negative) in deps.iter() {
                let need = head_strata[dep] + usize::from(*negative);
                if head_strata[head] < need {
                    head_strata.insert(head.clone(), need);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
            passes += 1;
            if passes > bound {
                return Err(PddlError::Stratification(
                    "negative dependency cycle among derived predicates".to_owned(),
                ));
            }
        }

        let strata: Vec<usize> = rules.iter().map(|r| head_strata[&r.head.name]).collect();
        let max_stratum = strata.iter().copied().max().unwrap_or(0);
        Ok(DerivedPredicates {
            rules,
            strata,
            max_stratum,
        })
    }

    pub fn rules(&self) -> &[DerivedPredicate] {
        &self.rules
    }

    pub fn strata(&self) -> &[usize] {
        &self.strata
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn contains_head(&self, name: &str) -> bool {
        self.rules.iter().any(|r| r.head.name == name)
    }

    /// Adds every derivable fact to a copy of `state`, running each
    /// stratum to a fixpoint before moving up. Facts are only ever added;
    /// a derivation that contradicts an explicit negation is an error.
    pub fn derived_state(
        &self,
        registry: &Registry,
        mode: WorldAssumption,
        state: &PartialState,
    ) -> Result<PartialState> {
        let mut next = state.clone();
        for stratum in 0..=self.max_stratum {
            let mut grounded = Vec::new();
            for (rule, rule_stratum) in self.rules.iter().zip(self.strata.iter()) {
                if *rule_stratum == stratum {
                    grounded.push((rule.head.name.clone(), rule.groundings(registry)?));
                }
            }
            loop {
                let mut changed = false;
                for (head, groundings) in grounded.iter() {
                    for (args, dnf) in groundings.iter() {
                        if dnf.is_satisfied(&next, mode) {
                            let prop = Proposition::new(head, args.clone());
                            match next.insert(prop.clone()) {
                                Delta::Flipped => {
                                    return Err(PddlError::InvalidTransition(format!(
                                        "derived fact {prop} contradicts an explicit negation"
                                    )))
                                }
                                Delta::Added => changed = true,
                                Delta::Unchanged => {}
                            }
                        }
                    }
                }
                if !changed {
                    break;
                }
            }
        }
        Ok(next)
    }

    /// Forgets every fact a rule could derive, then recomputes the
    /// closure. This is how stale head facts disappear after a
    /// transition.
    pub fn rederive(
        &self,
        registry: &Registry,
        mode: WorldAssumption,
        state: &PartialState,
    ) -> Result<PartialState> {
        let mut base = state.clone();
        for rule in self.rules.iter() {
            for args in rule.gen.tuples(registry) {
                base.unset(&Proposition::new(&rule.head.name, args));
            }
        }
        self.derived_state(registry, mode, &base)
    }
}

fn collect_deps(
    formula: &Formula,
    negative: bool,
    heads: &BTreeSet<String>,
    rule_head: &str,
    deps: &mut Vec<(String, String, bool)>,
) {
    match formula {
        Formula::Atom { head, .. } => {
            if heads.contains(head) {
                deps.push((rule_head.to_owned(), head.clone(), negative));
            }
        }
        Formula::Not(inner) => collect_deps(inner, !negative, heads, rule_head, deps),
        Formula::And(parts) | Formula::Or(parts) => {
            for part in parts.iter() {
                collect_deps(part, negative, heads, rule_head, deps);
            }
        }
        Formula::Forall { body, .. } | Formula::Exists { body, .. } => {
            collect_deps(body, negative, heads, rule_head, deps)
        }
    }
}

/// A state constraint: wherever `context` holds, `implies` is made to
/// hold. `implies` is shaped like an effect (a conjunction of literals).
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Axiom {
    pub params: Vec<Parameter>,
    pub context: Formula,
    pub implies: Formula,
    gen: ParameterGenerator,
}

impl Axiom {
    pub fn new(params: Vec<Parameter>, context: Formula, implies: Formula) -> Self {
        let gen = ParameterGenerator::new(&params);
        Axiom {
            params,
            context,
            implies,
            gen,
        }
    }

    fn grounded(
        &self,
        registry: &Registry,
    ) -> Result<Vec<(Vec<Object>, DisjunctiveFormula, DisjunctiveFormula)>> {
        let mut out = Vec::new();
        for args in self.gen.tuples(registry) {
            let bindings: Bindings = self
                .params
                .iter()
                .zip(args.iter())
                .map(|(param, arg)| (param.symbol.clone(), arg.clone()))
                .collect();
            let context = DisjunctiveFormula::normalize(registry, &self.context, &bindings)?;
            let implies = DisjunctiveFormula::normalize(registry, &self.implies, &bindings)?;
            out.push((args, context, implies));
        }
        Ok(out)
    }

    /// True when every grounding with a satisfied context also satisfies
    /// the implication.
    pub fn is_consistent(
        &self,
        registry: &Registry,
        mode: WorldAssumption,
        state: &PartialState,
    ) -> Result<bool> {
        for (_, context, implies) in self.grounded(registry)? {
            if context.is_satisfied(state, mode) && !implies.is_satisfied(state, mode) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Forces the implication wherever the context holds, in place.
    /// Returns whether the state changed. Forcing a proposition against
    /// explicit contrary knowledge is a violation.
    pub fn apply(
        &self,
        registry: &Registry,
        mode: WorldAssumption,
        state: &mut PartialState,
    ) -> Result<bool> {
        let mut changed = false;
        for (args, context, implies) in self.grounded(registry)? {
            if !context.is_satisfied(state, mode) {
                continue;
            }
            if implies.clauses.len() > 1 {
                return Err(PddlError::InvalidArgument(format!(
                    "implication of {self} grounds to a disjunction"
                )));
            }
            let clause = implies.clauses.iter().next().ok_or_else(|| {
                PddlError::InvalidTransition(format!(
                    "{self} is unsatisfiable for ({})",
                    args.iter()
                        .map(|a| a.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })?;
            for prop in clause.pos.iter() {
                match state.insert(prop.clone()) {
                    Delta::Flipped => {
                        return Err(PddlError::InvalidTransition(format!(
                            "axiom violation: {prop} forced true but known false"
                        )))
                    }
                    Delta::Added => changed = true,
                    Delta::Unchanged => {}
                }
            }
            for prop in clause.neg.iter() {
                match mode {
                    WorldAssumption::Closed => {
                        if state.unset(prop) {
                            changed = true;
                        }
                    }
                    WorldAssumption::Open => match state.negate(prop.clone()) {
                        Delta::Flipped => {
                            return Err(PddlError::InvalidTransition(format!(
                                "axiom violation: {prop} forced false but known true"
                            )))
                        }
                        Delta::Added => changed = true,
                        Delta::Unchanged => {}
                    },
                }
            }
        }
        Ok(changed)
    }
}

impl fmt::Display for Axiom {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "axiom(")?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{param}")?;
        }
        write!(f, "): {} => {}", self.context, self.implies)
    }
}

/// Applies every axiom until a full pass changes nothing. Oscillating
/// axiom sets fail after [`MAX_CONSISTENCY_PASSES`].
pub fn consistent_state(
    axioms: &[Axiom],
    registry: &Registry,
    mode: WorldAssumption,
    state: &PartialState,
) -> Result<PartialState> {
    let mut next = state.clone();
    for _ in 0..MAX_CONSISTENCY_PASSES {
        let mut changed = false;
        for axiom in axioms.iter() {
            changed |= axiom.apply(registry, mode, &mut next)?;
        }
        if !changed {
            return Ok(next);
        }
    }
    Err(PddlError::InvalidTransition(
        "axiom application did not converge".to_owned(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn graph() -> Registry {
        let mut registry = Registry::new();
        registry
            .declare_types(&[("node".to_owned(), None)])
            .unwrap();
        registry.add_object("a", "node").unwrap();
        registry.add_object("b", "node").unwrap();
        registry.add_object("c", "node").unwrap();
        registry
    }

    fn obj(registry: &Registry, name: &str) -> Object {
        registry.object(name).unwrap().clone()
    }

    fn prop(registry: &Registry, name: &str, args: &[&str]) -> Proposition {
        Proposition::new(name, args.iter().map(|a| obj(registry, a)).collect())
    }

    fn reachability_rules() -> Vec<DerivedPredicate> {
        let reach_head = Predicate::new(
            "reachable",
            vec![Parameter::new("?x", "node"), Parameter::new("?y", "node")],
        );
        let base = DerivedPredicate::new(
            reach_head.clone(),
            Formula::atom("edge", &["?x", "?y"]),
        );
        let step = DerivedPredicate::new(
            reach_head,
            Formula::Exists {
                params: vec![Parameter::new("?z", "node")],
                body: Box::new(Formula::And(vec![
                    Formula::atom("reachable", &["?x", "?z"]),
                    Formula::atom("edge", &["?z", "?y"]),
                ])),
            },
        );
        let isolated = DerivedPredicate::new(
            Predicate::new("isolated", vec![Parameter::new("?x", "node")]),
            Formula::Forall {
                params: vec![Parameter::new("?y", "node")],
                body: Box::new(Formula::Not(Box::new(Formula::atom(
                    "reachable",
                    &["?x", "?y"],
                )))),
            },
        );
        vec![base, step, isolated]
    }

    #[test]
    fn negative_readers_land_in_higher_strata() {
        let derived = DerivedPredicates::stratify(reachability_rules()).unwrap();
        assert_eq!(derived.strata(), &[0, 0, 1]);
    }

    #[test]
    fn negative_cycles_are_rejected() {
        let p = DerivedPredicate::new(
            Predicate::new("p", vec![Parameter::new("?x", "node")]),
            Formula::Not(Box::new(Formula::atom("q", &["?x"]))),
        );
        let q = DerivedPredicate::new(
            Predicate::new("q", vec![Parameter::new("?x", "node")]),
            Formula::Not(Box::new(Formula::atom("p", &["?x"]))),
        );
        let err = DerivedPredicates::stratify(vec![p, q]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Stratification);
    }

    #[test]
    fn closure_runs_each_stratum_to_fixpoint() {
        let registry = graph();
        let derived = DerivedPredicates::stratify(reachability_rules()).unwrap();
        let base = PartialState::from_true([
            prop(&registry, "edge", &["a", "b"]),
            prop(&registry, "edge", &["b", "c"]),
        ]);
        let closed = derived
            .derived_state(&registry, WorldAssumption::Closed, &base)
            .unwrap();
        assert!(closed.contains(&prop(&registry, "reachable", &["a", "b"])));
        assert!(closed.contains(&prop(&registry, "reachable", &["b", "c"])));
        // two hops, derived through the transitive rule
        assert!(closed.contains(&prop(&registry, "reachable", &["a", "c"])));
        assert!(!closed.contains(&prop(&registry, "reachable", &["c", "a"])));
        assert!(closed.contains(&prop(&registry, "isolated", &["c"])));
        assert!(!closed.contains(&prop(&registry, "isolated", &["a"])));
        assert!(!closed.contains(&prop(&registry, "isolated", &["b"])));
        // a second closure adds nothing
        assert_eq!(
            derived
                .derived_state(&registry, WorldAssumption::Closed, &closed)
                .unwrap(),
            closed
        );
        // inputs are untouched
        assert!(!base.contains(&prop(&registry, "reachable", &["a", "b"])));
    }

    #[test]
    fn rederivation_drops_stale_heads() {
        let registry = graph();
        let derived = DerivedPredicates::stratify(reachability_rules()).unwrap();
        let base = PartialState::from_true([
            prop(&registry, "edge", &["a", "b"]),
            prop(&registry, "edge", &["b", "c"]),
        ]);
        let mut closed = derived
            .derived_state(&registry, WorldAssumption::Closed, &base)
            .unwrap();
        closed.unset(&prop(&registry, "edge", &["b", "c"]));
        let refreshed = derived
            .rederive(&registry, WorldAssumption::Closed, &closed)
            .unwrap();
        assert!(refreshed.contains(&prop(&registry, "reachable", &["a", "b"])));
        assert!(!refreshed.contains(&prop(&registry, "reachable", &["b", "c"])));
        assert!(!refreshed.contains(&prop(&registry, "reachable", &["a", "c"])));
        assert!(refreshed.contains(&prop(&registry, "isolated", &["b"])));
        assert!(refreshed.contains(&prop(&registry, "isolated", &["c"])));
    }

    #[test]
    fn derivation_against_explicit_negation_is_an_error() {
        let registry = graph();
        let derived = DerivedPredicates::stratify(reachability_rules()).unwrap();
        let mut base = PartialState::from_true([prop(&registry, "edge", &["a", "b"])]);
        base.negate(prop(&registry, "reachable", &["a", "b"]));
        let err = derived
            .derived_state(&registry, WorldAssumption::Closed, &base)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    fn no_limbo() -> Axiom {
        // anything held may not also be flagged loose
        Axiom::new(
            vec![Parameter::new("?x", "node")],
            Formula::atom("held", &["?x"]),
            Formula::Not(Box::new(Formula::atom("loose", &["?x"]))),
        )
    }

    #[test]
    fn consistency_checks_report_violations() {
        let registry = graph();
        let axiom = no_limbo();
        let ok = PartialState::from_true([prop(&registry, "held", &["a"])]);
        assert!(axiom
            .is_consistent(&registry, WorldAssumption::Closed, &ok)
            .unwrap());
        let bad = PartialState::from_true([
            prop(&registry, "held", &["a"]),
            prop(&registry, "loose", &["a"]),
        ]);
        assert!(!axiom
            .is_consistent(&registry, WorldAssumption::Closed, &bad)
            .unwrap());
    }

    #[test]
    fn applying_axioms_repairs_the_state() {
        let registry = graph();
        let axioms = vec![no_limbo()];
        let bad = PartialState::from_true([
            prop(&registry, "held", &["a"]),
            prop(&registry, "loose", &["a"]),
            prop(&registry, "loose", &["b"]),
        ]);
        let repaired =
            consistent_state(&axioms, &registry, WorldAssumption::Closed, &bad).unwrap();
        assert!(repaired.contains(&prop(&registry, "held", &["a"])));
        assert!(!repaired.contains(&prop(&registry, "loose", &["a"])));
        assert!(repaired.contains(&prop(&registry, "loose", &["b"])));
        assert!(axioms[0]
            .is_consistent(&registry, WorldAssumption::Closed, &repaired)
            .unwrap());
    }

    #[test]
    fn oscillating_axioms_fail_to_converge() {
        let registry = graph();
        let assert_p = Axiom::new(
            vec![],
            Formula::always(),
            Formula::atom("p", &["a"]),
        );
        let retract_p = Axiom::new(
            vec![],
            Formula::always(),
            Formula::Not(Box::new(Formula::atom("p", &["a"]))),
        );
        let err = consistent_state(
            &[assert_p, retract_p],
            &registry,
            WorldAssumption::Closed,
            &PartialState::new(),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }

    #[test]
    fn open_mode_flips_are_violations() {
        let registry = graph();
        let axiom = Axiom::new(
            vec![],
            Formula::always(),
            Formula::Not(Box::new(Formula::atom("p", &["a"]))),
        );
        let state = PartialState::from_true([prop(&registry, "p", &["a"])]);
        let err = consistent_state(
            &[axiom],
            &registry,
            WorldAssumption::Open,
            &state,
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidTransition);
    }
}
