use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::error::{PddlError, Result};
use crate::registry::{Object, Registry};

/// Built-in equality head. Always available, never declared.
pub const EQUALITY: &str = "=";

/// Variable bindings accumulated while grounding a formula.
pub type Bindings = BTreeMap<String, Object>;

/// A typed formal parameter, e.g. `?x - block`.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Parameter {
    pub symbol: String,
    pub typ: String,
}

impl Parameter {
    pub fn new(symbol: &str, typ: &str) -> Self {
        Parameter {
            symbol: symbol.to_owned(),
            typ: typ.to_owned(),
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} - {}", self.symbol, self.typ)
    }
}

/// Declared predicate schema: a name plus typed parameter slots.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Predicate {
    pub name: String,
    pub params: Vec<Parameter>,
}

impl Predicate {
    pub fn new(name: &str, params: Vec<Parameter>) -> Self {
        Predicate {
            name: name.to_owned(),
            params,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

impl fmt::Display for Predicate {
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

/// A ground atom: predicate name applied to resolved objects.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Proposition {
    pub name: String,
    pub args: Vec<Object>,
}

impl Proposition {
    pub fn new(name: &str, args: Vec<Object>) -> Self {
        Proposition {
            name: name.to_owned(),
            args,
        }
    }
}

impl fmt::Display for Proposition {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", arg)?;
        }
        write!(f, ")")
    }
}

/// First-order condition tree as written in a domain file. Atom arguments
/// are raw tokens: `?`-prefixed variables or object names.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub enum Formula {
    Atom { head: String, args: Vec<String> },
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Forall { params: Vec<Parameter>, body: Box<Formula> },
    Exists { params: Vec<Parameter>, body: Box<Formula> },
}

impl Formula {
    pub fn atom(head: &str, args: &[&str]) -> Self {
        Formula::Atom {
            head: head.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    /// The trivially true condition, used when an action declares no
    /// precondition.
    pub fn always() -> Self {
        Formula::And(Vec::new())
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Formula::Atom { head, args } => {
                write!(f, "({head}")?;
                for arg in args.iter() {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            Formula::Not(inner) => write!(f, "(not {inner})"),
            Formula::And(parts) => {
                write!(f, "(and")?;
                for part in parts.iter() {
                    write!(f, " {part}")?;
                }
                write!(f, ")")
            }
            Formula::Or(parts) => {
                write!(f, "(or")?;
                for part in parts.iter() {
                    write!(f, " {part}")?;
                }
                write!(f, ")")
            }
            Formula::Forall { params, body } => {
                write!(f, "(forall (")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} - {}", param.symbol, param.typ)?;
                }
                write!(f, ") {body})")
            }
            Formula::Exists { params, body } => {
                write!(f, "(exists (")?;
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{} - {}", param.symbol, param.typ)?;
                }
                write!(f, ") {body})")
            }
        }
    }
}

/// Resolves one atom argument to an object, through the bindings for
/// variables and the registry for constants.
pub(crate) fn resolve_term(
    term: &str,
    registry: &Registry,
    bindings: &Bindings,
) -> Result<Object> {
    if term.starts_with('?') {
        bindings
            .get(term)
            .cloned()
            .ok_or_else(|| PddlError::UnknownSymbol(format!("unbound variable {term}")))
    } else {
        registry.object(term).cloned()
    }
}

fn term_type<'a>(
    term: &'a str,
    registry: &'a Registry,
    scope: &'a BTreeMap<String, String>,
) -> Result<&'a str> {
    if term.starts_with('?') {
        scope
            .get(term)
            .map(|t| t.as_str())
            .ok_or_else(|| PddlError::UnknownSymbol(format!("unbound variable {term}")))
    } else {
        registry.object(term).map(|obj| obj.typ.as_str())
    }
}

/// Checks that every atom resolves against the declared predicates, the
/// built-in heads (`=` and type names), the registry, and the variables in
/// scope, with matching arity and compatible argument types.
pub(crate) fn validate(
    formula: &Formula,
    registry: &Registry,
    predicates: &BTreeMap<String, Predicate>,
    scope: &BTreeMap<String, String>,
) -> Result<()> {
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
                for term in args.iter() {
                    term_type(term, registry, scope)?;
                }
                return Ok(());
            }
            if registry.contains_type(head) && !predicates.contains_key(head) {
                if args.len() != 1 {
                    return Err(PddlError::ArityMismatch {
                        symbol: head.clone(),
                        expected: 1,
                        found: args.len(),
                    });
                }
                term_type(&args[0], registry, scope)?;
                return Ok(());
            }
            let predicate = predicates
                .get(head)
                .ok_or_else(|| PddlError::UnknownSymbol(format!("predicate {head}")))?;
            if args.len() != predicate.arity() {
                return Err(PddlError::ArityMismatch {
                    symbol: head.clone(),
                    expected: predicate.arity(),
                    found: args.len(),
                });
            }
            for (term, slot) in args.iter().zip(predicate.params.iter()) {
                let typ = term_type(term, registry, scope)?;
                if !registry.is_subtype(typ, &slot.typ) {
                    return Err(PddlError::InvalidArgument(format!(
                        "{term} has type {typ}, but slot {} of {head} requires {}",
                        slot.symbol, slot.typ
                    )));
                }
            }
            Ok(())
        }
        Formula::Not(inner) => validate(inner, registry, predicates, scope),
        Formula::And(parts) | Formula::Or(parts) => {
            for part in parts.iter() {
                validate(part, registry, predicates, scope)?;
            }
            Ok(())
        }
        Formula::Forall { params, body } | Formula::Exists { params, body } => {
            let mut inner_scope = scope.clone();
            let mut seen = BTreeSet::new();
            for param in params.iter() {
                if !seen.insert(param.symbol.clone()) {
                    return Err(PddlError::InvalidArgument(format!(
                        "quantifier repeats variable {}",
                        param.symbol
                    )));
                }
                if !registry.contains_type(&param.typ) {
                    return Err(PddlError::UnknownSymbol(format!("type {}", param.typ)));
                }
                inner_scope.insert(param.symbol.clone(), param.typ.clone());
            }
            validate(body, registry, predicates, &inner_scope)
        }
    }
}
