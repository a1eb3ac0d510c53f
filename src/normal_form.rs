use std::collections::BTreeSet;
use std::fmt;

use crate::error::{PddlError, Result};
use crate::formula::{resolve_term, Bindings, Formula, Parameter, Proposition, EQUALITY};
use crate::generator::ParameterGenerator;
use crate::registry::Registry;
use crate::state::{PartialState, WorldAssumption};

/// One DNF clause: a conjunction of positive and negative ground literals.
#[derive(Clone, Debug, Default, Ord, PartialOrd, PartialEq, Eq)]
pub struct Conjunction {
    pub pos: BTreeSet<Proposition>,
    pub neg: BTreeSet<Proposition>,
}

impl Conjunction {
    pub fn is_empty(&self) -> bool {
        self.pos.is_empty() && self.neg.is_empty()
    }

    fn is_contradictory(&self) -> bool {
        self.pos.intersection(&self.neg).next().is_some()
    }

    fn subsumes(&self, other: &Conjunction) -> bool {
        self.pos.is_subset(&other.pos) && self.neg.is_subset(&other.neg)
    }

    pub fn is_satisfied(&self, state: &PartialState, mode: WorldAssumption) -> bool {
        self.pos.iter().all(|p| state.contains(p))
            && self.neg.iter().all(|p| match mode {
                WorldAssumption::Closed => !state.contains(p),
                WorldAssumption::Open => state.is_negated(p),
            })
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "(and")?;
        for p in self.pos.iter() {
            write!(f, " {p}")?;
        }
        for p in self.neg.iter() {
            write!(f, " (not {p})")?;
        }
        write!(f, ")")
    }
}

/// A grounded condition in disjunctive normal form.
///
/// No clauses means unsatisfiable; a single empty clause means trivially
/// true. Clause and literal order is canonical, so equal conditions
/// normalize to equal values.
#[derive(Clone, Debug, Default, Ord, PartialOrd, PartialEq, Eq)]
pub struct DisjunctiveFormula {
    pub clauses: BTreeSet<Conjunction>,
}

impl DisjunctiveFormula {
    /// The unsatisfiable condition.
    pub fn never() -> Self {
        DisjunctiveFormula {
            clauses: BTreeSet::new(),
        }
    }

    /// The trivially true condition.
    pub fn always() -> Self {
        let mut clauses = BTreeSet::new();
        clauses.insert(Conjunction::default());
        DisjunctiveFormula { clauses }
    }

    pub fn is_never(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn is_always(&self) -> bool {
        self.clauses.len() == 1 && self.clauses.iter().all(|c| c.is_empty())
    }

    /// Grounds `formula` under `bindings` and rewrites it to DNF:
    /// negations pushed to the literals, conjunctions distributed over
    /// disjunctions, quantifiers expanded over the current universe,
    /// equality and type atoms evaluated away, contradictory clauses
    /// dropped, and subsumed clauses pruned.
    pub fn normalize(
        registry: &Registry,
        formula: &Formula,
        bindings: &Bindings,
    ) -> Result<Self> {
        Ok(build(registry, formula, bindings, false)?.pruned())
    }

    pub fn is_satisfied(&self, state: &PartialState, mode: WorldAssumption) -> bool {
        self.clauses.iter().any(|c| c.is_satisfied(state, mode))
    }

    /// De Morgan negation, re-normalized.
    pub fn negate(&self) -> Self {
        let mut out = DisjunctiveFormula::always();
        for clause in self.clauses.iter() {
            let mut per_clause = DisjunctiveFormula::never();
            for p in clause.pos.iter() {
                let mut unit = Conjunction::default();
                unit.neg.insert(p.clone());
                per_clause.clauses.insert(unit);
            }
            for p in clause.neg.iter() {
                let mut unit = Conjunction::default();
                unit.pos.insert(p.clone());
                per_clause.clauses.insert(unit);
            }
            out = conjoin(&out, &per_clause);
        }
        out.pruned()
    }

    /// The condition as a formula tree with constant arguments.
    pub fn to_formula(&self) -> Formula {
        let mut clauses: Vec<Formula> = Vec::new();
        for clause in self.clauses.iter() {
            let mut literals: Vec<Formula> = clause.pos.iter().map(atom_of).collect();
            literals.extend(
                clause
                    .neg
                    .iter()
                    .map(|p| Formula::Not(Box::new(atom_of(p)))),
            );
            clauses.push(if literals.len() == 1 {
                literals.remove(0)
            } else {
                Formula::And(literals)
            });
        }
        if clauses.len() == 1 {
            clauses.remove(0)
        } else {
            Formula::Or(clauses)
        }
    }

    fn pruned(mut self) -> Self {
        let keep: BTreeSet<Conjunction> = self
            .clauses
            .iter()
            .filter(|c| {
                !self
                    .clauses
                    .iter()
                    .any(|d| d != *c && d.subsumes(c))
            })
            .cloned()
            .collect();
        self.clauses = keep;
        self
    }
}

impl fmt::Display for DisjunctiveFormula {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_formula())
    }
}

fn atom_of(p: &Proposition) -> Formula {
    Formula::Atom {
        head: p.name.clone(),
        args: p.args.iter().map(|obj| obj.name.clone()).collect(),
    }
}

fn literal(prop: Proposition, negated: bool) -> DisjunctiveFormula {
    let mut clause = Conjunction::default();
    if negated {
        clause.neg.insert(prop);
    } else {
        clause.pos.insert(prop);
    }
    let mut clauses = BTreeSet::new();
    clauses.insert(clause);
    DisjunctiveFormula { clauses }
}

fn constant(holds: bool) -> DisjunctiveFormula {
    if holds {
        DisjunctiveFormula::always()
    } else {
        DisjunctiveFormula::never()
    }
}

fn conjoin(a: &DisjunctiveFormula, b: &DisjunctiveFormula) -> DisjunctiveFormula {
    let mut clauses = BTreeSet::new();
    for ca in a.clauses.iter() {
        for cb in b.clauses.iter() {
            let mut merged = ca.clone();
            merged.pos.extend(cb.pos.iter().cloned());
            merged.neg.extend(cb.neg.iter().cloned());
            if !merged.is_contradictory() {
                clauses.insert(merged);
            }
        }
    }
    DisjunctiveFormula { clauses }
}

fn disjoin(a: &DisjunctiveFormula, b: &DisjunctiveFormula) -> DisjunctiveFormula {
    let mut clauses = a.clauses.clone();
    clauses.extend(b.clauses.iter().cloned());
    DisjunctiveFormula { clauses }
}

// Negation-normal-form rewrite: `negated` records whether an odd number of
// nots encloses the current subformula.
fn build(
    registry: &Registry,
    formula: &Formula,
    bindings: &Bindings,
    negated: bool,
) -> Result<DisjunctiveFormula> {
    match formula {
        Formula::Atom { head, args } => {
            if head == EQUALITY {
                if args.len() != 2 {
                    return Err(PddlError::ArityMismatch {
                        symbol: head.clone(),
                        expected: 2,
                        found: args.len(),
                    });
                }
                let left = resolve_term(&args[0], registry, bindings)?;
                let right = resolve_term(&args[1], registry, bindings)?;
                return Ok(constant((left.name == right.name) != negated));
            }
            if registry.contains_type(head) {
                if args.len() != 1 {
                    return Err(PddlError::ArityMismatch {
                        symbol: head.clone(),
                        expected: 1,
                        found: args.len(),
                    });
                }
                let obj = resolve_term(&args[0], registry, bindings)?;
                return Ok(constant(registry.is_subtype(&obj.typ, head) != negated));
            }
            let resolved: Result<Vec<_>> = args
                .iter()
                .map(|term| resolve_term(term, registry, bindings))
                .collect();
            Ok(literal(Proposition::new(head, resolved?), negated))
        }
        Formula::Not(inner) => build(registry, inner, bindings, !negated),
        Formula::And(parts) => {
            if negated {
                fold_disjoin(registry, parts, bindings, negated)
            } else {
                fold_conjoin(registry, parts, bindings, negated)
            }
        }
        Formula::Or(parts) => {
            if negated {
                fold_conjoin(registry, parts, bindings, negated)
            } else {
                fold_disjoin(registry, parts, bindings, negated)
            }
        }
        Formula::Forall { params, body } => {
            let expanded = expand(registry, params, body, bindings, negated)?;
            Ok(if negated {
                fold_parts(expanded, disjoin, DisjunctiveFormula::never())
            } else {
                fold_parts(expanded, conjoin, DisjunctiveFormula::always())
            })
        }
        Formula::Exists { params, body } => {
            let expanded = expand(registry, params, body, bindings, negated)?;
            Ok(if negated {
                fold_parts(expanded, conjoin, DisjunctiveFormula::always())
            } else {
                fold_parts(expanded, disjoin, DisjunctiveFormula::never())
            })
        }
    }
}

fn fold_conjoin(
    registry: &Registry,
    parts: &[Formula],
    bindings: &Bindings,
    negated: bool,
) -> Result<DisjunctiveFormula> {
    let mut out = DisjunctiveFormula::always();
    for part in parts.iter() {
        out = conjoin(&out, &build(registry, part, bindings, negated)?);
    }
    Ok(out)
}

fn fold_disjoin(
    registry: &Registry,
    parts: &[Formula],
    bindings: &Bindings,
    negated: bool,
) -> Result<DisjunctiveFormula> {
    let mut out = DisjunctiveFormula::never();
    for part in parts.iter() {
        out = disjoin(&out, &build(registry, part, bindings, negated)?);
    }
    Ok(out)
}

fn expand(
    registry: &Registry,
    params: &[Parameter],
    body: &Formula,
    bindings: &Bindings,
    negated: bool,
) -> Result<Vec<DisjunctiveFormula>> {
    let gen = ParameterGenerator::new(params);
    let mut expanded = Vec::new();
    for tuple in gen.tuples(registry) {
        let mut inner = bindings.clone();
        for (param, obj) in params.iter().zip(tuple.into_iter()) {
            inner.insert(param.symbol.clone(), obj);
        }
        expanded.push(build(registry, body, &inner, negated)?);
    }
    Ok(expanded)
}

fn fold_parts(
    parts: Vec<DisjunctiveFormula>,
    combine: fn(&DisjunctiveFormula, &DisjunctiveFormula) -> DisjunctiveFormula,
    unit: DisjunctiveFormula,
) -> DisjunctiveFormula {
    let mut out = unit;
    for part in parts.iter() {
        out = combine(&out, part);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formula::Parameter;
    use crate::registry::Object;

    fn tabletop() -> Registry {
        let mut registry = Registry::new();
        registry
            .declare_types(&[("item".to_owned(), None), ("surface".to_owned(), None)])
            .unwrap();
        registry.add_object("box", "item").unwrap();
        registry.add_object("hook", "item").unwrap();
        registry.add_object("table", "surface").unwrap();
        registry.add_object("shelf", "surface").unwrap();
        registry
    }

    fn obj(registry: &Registry, name: &str) -> Object {
        registry.object(name).unwrap().clone()
    }

    fn prop(registry: &Registry, name: &str, args: &[&str]) -> Proposition {
        Proposition::new(name, args.iter().map(|a| obj(registry, a)).collect())
    }

    fn bind(registry: &Registry, pairs: &[(&str, &str)]) -> Bindings {
        pairs
            .iter()
            .map(|(var, name)| ((*var).to_owned(), obj(registry, name)))
            .collect()
    }

    #[test]
    fn pick_style_preconditions_normalize_to_one_clause() {
        let registry = tabletop();
        let f = Formula::And(vec![
            Formula::atom("inworkspace", &["?a"]),
            Formula::Not(Box::new(Formula::Exists {
                params: vec![Parameter::new("?b", "item")],
                body: Box::new(Formula::atom("inhand", &["?b"])),
            })),
        ]);
        let dnf = DisjunctiveFormula::normalize(
            &registry,
            &f,
            &bind(&registry, &[("?a", "hook")]),
        )
        .unwrap();
        assert_eq!(dnf.clauses.len(), 1);
        let clause = dnf.clauses.iter().next().unwrap();
        assert_eq!(
            clause.pos.iter().collect::<Vec<_>>(),
            vec![&prop(&registry, "inworkspace", &["hook"])]
        );
        assert_eq!(
            clause.neg.iter().collect::<Vec<_>>(),
            vec![
                &prop(&registry, "inhand", &["box"]),
                &prop(&registry, "inhand", &["hook"]),
            ]
        );
    }

    #[test]
    fn negation_crosses_clauses_by_de_morgan() {
        let registry = tabletop();
        let f = Formula::And(vec![
            Formula::atom("inworkspace", &["hook"]),
            Formula::Not(Box::new(Formula::atom("inhand", &["box"]))),
        ]);
        let dnf =
            DisjunctiveFormula::normalize(&registry, &f, &Bindings::new()).unwrap();
        let negated = dnf.negate();
        assert_eq!(negated.clauses.len(), 2);
        let clauses: Vec<&Conjunction> = negated.clauses.iter().collect();
        assert!(clauses.iter().any(|c| c.pos.is_empty()
            && c.neg.contains(&prop(&registry, "inworkspace", &["hook"]))));
        assert!(clauses.iter().any(|c| c.neg.is_empty()
            && c.pos.contains(&prop(&registry, "inhand", &["box"]))));
        assert_eq!(DisjunctiveFormula::never().negate(), DisjunctiveFormula::always());
        assert_eq!(DisjunctiveFormula::always().negate(), DisjunctiveFormula::never());
    }

    #[test]
    fn conjunction_distributes_over_disjunction() {
        let registry = tabletop();
        let f = Formula::And(vec![
            Formula::Or(vec![
                Formula::atom("inhand", &["box"]),
                Formula::atom("inhand", &["hook"]),
            ]),
            Formula::atom("inworkspace", &["box"]),
        ]);
        let dnf =
            DisjunctiveFormula::normalize(&registry, &f, &Bindings::new()).unwrap();
        assert_eq!(dnf.clauses.len(), 2);
        for clause in dnf.clauses.iter() {
            assert!(clause.pos.contains(&prop(&registry, "inworkspace", &["box"])));
        }
    }

    #[test]
    fn contradictory_clauses_disappear() {
        let registry = tabletop();
        let f = Formula::And(vec![
            Formula::atom("on", &["box", "table"]),
            Formula::Not(Box::new(Formula::atom("on", &["box", "table"]))),
        ]);
        let dnf =
            DisjunctiveFormula::normalize(&registry, &f, &Bindings::new()).unwrap();
        assert!(dnf.is_never());

        let f = Formula::Or(vec![
            Formula::atom("inhand", &["box"]),
            Formula::And(vec![
                Formula::atom("inhand", &["hook"]),
                Formula::Not(Box::new(Formula::atom("inhand", &["hook"]))),
            ]),
        ]);
        let dnf =
            DisjunctiveFormula::normalize(&registry, &f, &Bindings::new()).unwrap();
        assert_eq!(dnf.clauses.len(), 1);
    }

    #[test]
    fn equality_and_type_atoms_evaluate_away() {
        let registry = tabletop();
        let f = Formula::And(vec![
            Formula::atom("inworkspace", &["?x"]),
            Formula::Not(Box::new(Formula::atom("=", &["?x", "?y"]))),
            Formula::atom("item", &["?x"]),
        ]);
        let bindings = bind(&registry, &[("?x", "box"), ("?y", "hook")]);
        let dnf = DisjunctiveFormula::normalize(&registry, &f, &bindings).unwrap();
        assert_eq!(dnf.clauses.len(), 1);
        let clause = dnf.clauses.iter().next().unwrap();
        assert_eq!(clause.pos.len(), 1);
        assert!(clause.neg.is_empty());

        let bindings = bind(&registry, &[("?x", "box"), ("?y", "box")]);
        let dnf = DisjunctiveFormula::normalize(&registry, &f, &bindings).unwrap();
        assert!(dnf.is_never());

        let bindings = bind(&registry, &[("?x", "table"), ("?y", "box")]);
        let dnf = DisjunctiveFormula::normalize(&registry, &f, &bindings).unwrap();
        assert!(dnf.is_never());
    }

    #[test]
    fn universal_expansion_covers_the_type() {
        let registry = tabletop();
        let f = Formula::Forall {
            params: vec![Parameter::new("?s", "surface")],
            body: Box::new(Formula::atom("on", &["?x", "?s"])),
        };
        let dnf = DisjunctiveFormula::normalize(
            &registry,
            &f,
            &bind(&registry, &[("?x", "box")]),
        )
        .unwrap();
        assert_eq!(dnf.clauses.len(), 1);
        let clause = dnf.clauses.iter().next().unwrap();
        assert!(clause.pos.contains(&prop(&registry, "on", &["box", "table"])));
        assert!(clause.pos.contains(&prop(&registry, "on", &["box", "shelf"])));
    }

    #[test]
    fn subsumed_clauses_are_pruned() {
        let registry = tabletop();
        let f = Formula::Or(vec![
            Formula::atom("inhand", &["box"]),
            Formula::And(vec![
                Formula::atom("inhand", &["box"]),
                Formula::atom("inworkspace", &["box"]),
            ]),
        ]);
        let dnf =
            DisjunctiveFormula::normalize(&registry, &f, &Bindings::new()).unwrap();
        assert_eq!(dnf.clauses.len(), 1);
        let clause = dnf.clauses.iter().next().unwrap();
        assert_eq!(clause.pos.len(), 1);
    }

    #[test]
    fn normalization_is_idempotent() {
        let registry = tabletop();
        let f = Formula::And(vec![
            Formula::atom("inworkspace", &["hook"]),
            Formula::Not(Box::new(Formula::Or(vec![
                Formula::atom("inhand", &["box"]),
                Formula::atom("inhand", &["hook"]),
            ]))),
        ]);
        let dnf =
            DisjunctiveFormula::normalize(&registry, &f, &Bindings::new()).unwrap();
        let again =
            DisjunctiveFormula::normalize(&registry, &dnf.to_formula(), &Bindings::new())
                .unwrap();
        assert_eq!(dnf, again);
    }

    #[test]
    fn satisfaction_respects_the_world_assumption() {
        let registry = tabletop();
        let f = Formula::Not(Box::new(Formula::atom("inhand", &["box"])));
        let dnf =
            DisjunctiveFormula::normalize(&registry, &f, &Bindings::new()).unwrap();

        let empty = PartialState::new();
        assert!(dnf.is_satisfied(&empty, WorldAssumption::Closed));
        assert!(!dnf.is_satisfied(&empty, WorldAssumption::Open));

        let mut denied = PartialState::new();
        denied.negate(prop(&registry, "inhand", &["box"]));
        assert!(dnf.is_satisfied(&denied, WorldAssumption::Open));

        let mut holding = PartialState::new();
        holding.insert(prop(&registry, "inhand", &["box"]));
        assert!(!dnf.is_satisfied(&holding, WorldAssumption::Closed));
    }

    #[test]
    fn empty_conjunction_is_always_true() {
        let registry = tabletop();
        let dnf = DisjunctiveFormula::normalize(
            &registry,
            &Formula::always(),
            &Bindings::new(),
        )
        .unwrap();
        assert!(dnf.is_always());
        assert!(dnf.is_satisfied(&PartialState::new(), WorldAssumption::Closed));
        assert!(dnf.is_satisfied(&PartialState::new(), WorldAssumption::Open));
    }
}
