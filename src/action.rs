use std::fmt;

use crate::error::{PddlError, Result};
use crate::formula::{Bindings, Formula, Parameter};
use crate::generator::ParameterGenerator;
use crate::normal_form::DisjunctiveFormula;
use crate::registry::{Object, Registry};
use crate::state::{PartialState, WorldAssumption};

/// A lifted action schema: typed parameters, a precondition formula, and
/// an effect formula restricted to conjunctions of literals.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Action {
    pub name: String,
    pub params: Vec<Parameter>,
    pub precondition: Formula,
    pub effect: Formula,
    gen: ParameterGenerator,
}

impl Action {
    pub fn new(
        name: &str,
        params: Vec<Parameter>,
        precondition: Formula,
        effect: Formula,
    ) -> Self {
        let gen = ParameterGenerator::new(&params);
        Action {
            name: name.to_owned(),
            params,
            precondition,
            effect,
            gen,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn generator(&self) -> &ParameterGenerator {
        &self.gen
    }

    /// Rejects argument tuples of the wrong length or with objects outside
    /// the declared parameter types.
    pub fn check_args(&self, registry: &Registry, args: &[Object]) -> Result<()> {
        if args.len() != self.params.len() {
            return Err(PddlError::ArityMismatch {
                symbol: self.name.clone(),
                expected: self.params.len(),
                found: args.len(),
            });
        }
        for (param, arg) in self.params.iter().zip(args.iter()) {
            if !registry.is_subtype(&arg.typ, &param.typ) {
                return Err(PddlError::InvalidArgument(format!(
                    "{} is not a {} (parameter {} of {})",
                    arg.name, param.typ, param.symbol, self.name
                )));
            }
        }
        Ok(())
    }

    fn bindings(&self, args: &[Object]) -> Bindings {
        self.params
            .iter()
            .zip(args.iter())
            .map(|(param, arg)| (param.symbol.clone(), arg.clone()))
            .collect()
    }

    pub fn precondition_dnf(
        &self,
        registry: &Registry,
        args: &[Object],
    ) -> Result<DisjunctiveFormula> {
        self.check_args(registry, args)?;
        DisjunctiveFormula::normalize(registry, &self.precondition, &self.bindings(args))
    }

    pub fn effect_dnf(
        &self,
        registry: &Registry,
        args: &[Object],
    ) -> Result<DisjunctiveFormula> {
        self.check_args(registry, args)?;
        DisjunctiveFormula::normalize(registry, &self.effect, &self.bindings(args))
    }

    /// Whether the grounded precondition holds in `state`.
    pub fn is_valid(
        &self,
        registry: &Registry,
        mode: WorldAssumption,
        state: &PartialState,
        args: &[Object],
    ) -> Result<bool> {
        Ok(self
            .precondition_dnf(registry, args)?
            .is_satisfied(state, mode))
    }

    /// Applies the grounded effect to a copy of `state`. The precondition
    /// is not consulted here.
    pub fn apply(
        &self,
        registry: &Registry,
        mode: WorldAssumption,
        state: &PartialState,
        args: &[Object],
    ) -> Result<PartialState> {
        let dnf = self.effect_dnf(registry, args)?;
        if dnf.clauses.len() > 1 {
            return Err(PddlError::InvalidArgument(format!(
                "effect of {} grounds to a disjunction",
                self.call_string(args)
            )));
        }
        let clause = dnf.clauses.iter().next().ok_or_else(|| {
            PddlError::InvalidArgument(format!(
                "effect of {} is contradictory",
                self.call_string(args)
            ))
        })?;
        let mut next = state.clone();
        for prop in clause.neg.iter() {
            match mode {
                WorldAssumption::Closed => {
                    next.unset(prop);
                }
                WorldAssumption::Open => {
                    next.negate(prop.clone());
                }
            }
        }
        for prop in clause.pos.iter() {
            next.insert(prop.clone());
        }
        Ok(next)
    }

    /// Canonical call syntax, e.g. `pick(hook)`.
    pub fn call_string(&self, args: &[Object]) -> String {
        let mut out = format!("{}(", self.name);
        for (i, arg) in args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&arg.name);
        }
        out.push(')');
        out
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param.symbol)?;
        }
        write!(f, ")")
    }
}

/// Effects may only conjoin literals, possibly under `forall`. Disjunction
/// and existential quantification have no single-successor semantics.
pub(crate) fn validate_effect_shape(formula: &Formula, action: &str) -> Result<()> {
    match formula {
        Formula::Atom { .. } => Ok(()),
        Formula::Not(inner) => match inner.as_ref() {
            Formula::Atom { .. } => Ok(()),
            _ => Err(PddlError::InvalidArgument(format!(
                "negated compound effect in {action}"
            ))),
        },
        Formula::And(parts) => {
            for part in parts.iter() {
                validate_effect_shape(part, action)?;
            }
            Ok(())
        }
        Formula::Forall { body, .. } => validate_effect_shape(body, action),
        Formula::Or(_) => Err(PddlError::InvalidArgument(format!(
            "disjunctive effect in {action}"
        ))),
        Formula::Exists { .. } => Err(PddlError::InvalidArgument(format!(
            "existential effect in {action}"
        ))),
    }
}
