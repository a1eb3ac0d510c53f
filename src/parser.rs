use fixed::types::I40F24;
use sexpr_parser::SexprTree::{Sub, Sym};
use sexpr_parser::{Parser, SexprTree};

use crate::action::Action;
use crate::axiom::{Axiom, DerivedPredicate};
use crate::error::{PddlError, Result};
use crate::formula::{Formula, Parameter, Predicate};
use crate::registry::OBJECT_TYPE;

/// Parses `name(arg, arg)` call syntax, or the bare `name arg arg` form,
/// into a lowercased head and argument tokens. No symbol resolution
/// happens here.
pub fn parse_head(text: &str) -> Result<(String, Vec<String>)> {
    let text = text.trim();
    if text.is_empty() {
        return Err(PddlError::Syntax("empty proposition".to_owned()));
    }
    match text.find('(') {
        Some(open) => {
            if !text.ends_with(')') {
                return Err(PddlError::Syntax(format!(
                    "unbalanced parentheses in {text}"
                )));
            }
            let head = text[..open].trim();
            if head.is_empty() {
                return Err(PddlError::Syntax(format!("missing head in {text}")));
            }
            let args = parse_args(&text[open + 1..text.len() - 1])?;
            Ok((head.to_lowercase(), args))
        }
        None => {
            if text.contains(')') {
                return Err(PddlError::Syntax(format!(
                    "unbalanced parentheses in {text}"
                )));
            }
            let mut tokens = text.split_whitespace();
            let head = tokens
                .next()
                .ok_or_else(|| PddlError::Syntax("empty proposition".to_owned()))?;
            Ok((
                head.to_lowercase(),
                tokens.map(|t| t.to_lowercase()).collect(),
            ))
        }
    }
}

/// Tokenizes a comma- or whitespace-separated argument list, lowercased.
pub fn parse_args(text: &str) -> Result<Vec<String>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }
    if text.contains('(') || text.contains(')') {
        return Err(PddlError::Syntax(format!(
            "nested expression in argument list {text}"
        )));
    }
    if text.contains(',') {
        text.split(',')
            .map(|arg| {
                let arg = arg.trim();
                if arg.is_empty() {
                    Err(PddlError::Syntax(format!("empty argument in {text}")))
                } else {
                    Ok(arg.to_lowercase())
                }
            })
            .collect()
    } else {
        Ok(text.split_whitespace().map(|t| t.to_lowercase()).collect())
    }
}

fn expect_sub<'a>(tree: &'a SexprTree, what: &str) -> Result<&'a [SexprTree]> {
    match tree {
        Sub(parts) => Ok(parts),
        Sym(s) => Err(PddlError::Syntax(format!("expected {what}, found {s}"))),
    }
}

fn expect_sym(tree: &SexprTree, what: &str) -> Result<String> {
    match tree {
        Sym(s) => Ok(s.clone()),
        Sub(_) => Err(PddlError::Syntax(format!(
            "expected {what}, found a nested expression"
        ))),
    }
}

/// Splits a flattened `n1 n2 - t n3` token run into `(name, type)` pairs.
/// Names before a dash share the type after it; trailing names are
/// untyped.
fn parse_typed_list(tokens: &[String]) -> Result<Vec<(String, Option<String>)>> {
    let mut out = Vec::new();
    let mut pending: Vec<String> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        if tokens[i] == "-" {
            let typ = tokens
                .get(i + 1)
                .filter(|t| t.as_str() != "-")
                .ok_or_else(|| PddlError::Syntax("dangling - in typed list".to_owned()))?;
            if pending.is_empty() {
                return Err(PddlError::Syntax(format!(
                    "type {typ} follows no names in typed list"
                )));
            }
            for name in pending.drain(..) {
                out.push((name, Some(typ.clone())));
            }
            i += 2;
        } else {
            pending.push(tokens[i].clone());
            i += 1;
        }
    }
    for name in pending.drain(..) {
        out.push((name, None));
    }
    Ok(out)
}

fn parse_parameters(tokens: &[String]) -> Result<Vec<Parameter>> {
    let mut params = Vec::new();
    for (name, typ) in parse_typed_list(tokens)? {
        if !name.starts_with('?') {
            return Err(PddlError::Syntax(format!(
                "parameter {name} must start with ?"
            )));
        }
        params.push(Parameter::new(
            &name,
            typ.as_deref().unwrap_or(OBJECT_TYPE),
        ));
    }
    Ok(params)
}

fn parse_formula(tree: &SexprTree) -> Result<Formula> {
    let parts = expect_sub(tree, "a formula")?;
    let head = match parts.first() {
        Some(Sym(s)) => s.clone(),
        Some(Sub(_)) => {
            return Err(PddlError::Syntax(
                "formula must start with a symbol".to_owned(),
            ))
        }
        None => return Ok(Formula::always()),
    };
    match head.as_str() {
        "and" => Ok(Formula::And(
            parts[1..]
                .iter()
                .map(parse_formula)
                .collect::<Result<Vec<_>>>()?,
        )),
        "or" => Ok(Formula::Or(
            parts[1..]
                .iter()
                .map(parse_formula)
                .collect::<Result<Vec<_>>>()?,
        )),
        "not" => {
            if parts.len() != 2 {
                return Err(PddlError::Syntax(format!(
                    "not takes one argument, found {}",
                    parts.len() - 1
                )));
            }
            Ok(Formula::Not(Box::new(parse_formula(&parts[1])?)))
        }
        "forall" | "exists" => {
            if parts.len() != 3 {
                return Err(PddlError::Syntax(format!(
                    "{head} takes a parameter list and a body"
                )));
            }
            let params = parse_parameters(&parts[1].flatten())?;
            let body = Box::new(parse_formula(&parts[2])?);
            Ok(if head == "forall" {
                Formula::Forall { params, body }
            } else {
                Formula::Exists { params, body }
            })
        }
        "when" => Err(PddlError::Syntax(
            "conditional effects are not supported".to_owned(),
        )),
        _ => {
            let mut args = Vec::new();
            for part in parts[1..].iter() {
                match part {
                    Sym(s) => args.push(s.clone()),
                    Sub(_) => {
                        return Err(PddlError::Syntax(format!(
                            "nested expression in atom ({head} ...)"
                        )))
                    }
                }
            }
            Ok(Formula::Atom { head, args })
        }
    }
}

/// Everything a `(define (domain ...))` form declares.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq, Default)]
pub struct PddlDomain {
    pub name: String,
    pub types: Vec<(String, Option<String>)>,
    pub constants: Vec<(String, String)>,
    pub predicates: Vec<Predicate>,
    pub functions: Vec<Predicate>,
    pub actions: Vec<Action>,
    pub axioms: Vec<Axiom>,
    pub derived: Vec<DerivedPredicate>,
}

pub struct PddlDomainParser {
    domain: PddlDomain,
}

impl PddlDomainParser {
    pub fn parse(text: &str) -> Result<PddlDomain> {
        let tree = Parser::build_parse_tree(text)?;
        let parts = expect_sub(&tree, "a domain definition")?;
        match parts.first() {
            Some(first) if first.is("define") => {}
            _ => {
                return Err(PddlError::Syntax(
                    "domain must start with define".to_owned(),
                ))
            }
        }
        let mut parser = PddlDomainParser {
            domain: PddlDomain::default(),
        };
        for section in parts[1..].iter() {
            parser.section(section)?;
        }
        if parser.domain.name.is_empty() {
            return Err(PddlError::Syntax("missing (domain name)".to_owned()));
        }
        Ok(parser.domain)
    }

    fn section(&mut self, tree: &SexprTree) -> Result<()> {
        let parts = expect_sub(tree, "a domain section")?;
        let tag = match parts.first() {
            Some(Sym(s)) => s.clone(),
            _ => {
                return Err(PddlError::Syntax(
                    "domain section must start with a tag".to_owned(),
                ))
            }
        };
        match tag.as_str() {
            "domain" => {
                let name_tree = parts
                    .get(1)
                    .ok_or_else(|| PddlError::Syntax("missing domain name".to_owned()))?;
                self.domain.name = expect_sym(name_tree, "the domain name")?;
                Ok(())
            }
            ":requirements" => Ok(()),
            ":types" => {
                let flat = tree.flatten();
                self.domain.types.extend(parse_typed_list(&flat[1..])?);
                Ok(())
            }
            ":constants" => {
                let flat = tree.flatten();
                for (name, typ) in parse_typed_list(&flat[1..])? {
                    let typ = typ.unwrap_or_else(|| OBJECT_TYPE.to_owned());
                    self.domain.constants.push((name, typ));
                }
                Ok(())
            }
            ":predicates" => {
                for decl in parts[1..].iter() {
                    self.domain.predicates.push(predicate_decl(decl)?);
                }
                Ok(())
            }
            ":functions" => {
                // return-type annotations like `- number` are skipped
                for decl in parts[1..].iter() {
                    if let Sub(_) = decl {
                        self.domain.functions.push(predicate_decl(decl)?);
                    }
                }
                Ok(())
            }
            ":action" => self.action(parts),
            ":axiom" => self.axiom(parts),
            ":derived" => self.derived(parts),
            _ => Err(PddlError::Syntax(format!("unknown domain section {tag}"))),
        }
    }

    fn action(&mut self, parts: &[SexprTree]) -> Result<()> {
        let name_tree = parts
            .get(1)
            .ok_or_else(|| PddlError::Syntax("action without a name".to_owned()))?;
        let name = expect_sym(name_tree, "an action name")?;
        let mut params = Vec::new();
        let mut precondition = Formula::always();
        let mut effect = None;
        let mut i = 2;
        while i < parts.len() {
            let key = expect_sym(&parts[i], "an action keyword")?;
            let value = parts.get(i + 1).ok_or_else(|| {
                PddlError::Syntax(format!("{key} without a value in action {name}"))
            })?;
            match key.as_str() {
                ":parameters" => params = parse_parameters(&value.flatten())?,
                ":precondition" => precondition = parse_formula(value)?,
                ":effect" => effect = Some(parse_formula(value)?),
                _ => {
                    return Err(PddlError::Syntax(format!(
                        "unknown keyword {key} in action {name}"
                    )))
                }
            }
            i += 2;
        }
        let effect = effect
            .ok_or_else(|| PddlError::Syntax(format!("action {name} has no effect")))?;
        self.domain
            .actions
            .push(Action::new(&name, params, precondition, effect));
        Ok(())
    }

    fn axiom(&mut self, parts: &[SexprTree]) -> Result<()> {
        let mut params = Vec::new();
        let mut context = Formula::always();
        let mut implies = None;
        let mut i = 1;
        while i < parts.len() {
            let key = expect_sym(&parts[i], "an axiom keyword")?;
            let value = parts.get(i + 1).ok_or_else(|| {
                PddlError::Syntax(format!("{key} without a value in axiom"))
            })?;
            match key.as_str() {
                ":vars" => params = parse_parameters(&value.flatten())?,
                ":context" => context = parse_formula(value)?,
                ":implies" => implies = Some(parse_formula(value)?),
                _ => {
                    return Err(PddlError::Syntax(format!(
                        "unknown keyword {key} in axiom"
                    )))
                }
            }
            i += 2;
        }
        let implies = implies
            .ok_or_else(|| PddlError::Syntax("axiom has no :implies".to_owned()))?;
        self.domain.axioms.push(Axiom::new(params, context, implies));
        Ok(())
    }

    fn derived(&mut self, parts: &[SexprTree]) -> Result<()> {
        if parts.len() != 3 {
            return Err(PddlError::Syntax(
                "derived predicate takes a head and a condition".to_owned(),
            ));
        }
        let head_tokens = parts[1].flatten();
        let name = head_tokens.first().ok_or_else(|| {
            PddlError::Syntax("derived predicate has an empty head".to_owned())
        })?;
        let params = parse_parameters(&head_tokens[1..])?;
        let condition = parse_formula(&parts[2])?;
        self.domain
            .derived
            .push(DerivedPredicate::new(Predicate::new(name, params), condition));
        Ok(())
    }
}

fn predicate_decl(tree: &SexprTree) -> Result<Predicate> {
    expect_sub(tree, "a predicate declaration")?;
    let flat = tree.flatten();
    if flat.is_empty() {
        return Err(PddlError::Syntax("empty predicate declaration".to_owned()));
    }
    let params = parse_parameters(&flat[1..])?;
    Ok(Predicate::new(&flat[0], params))
}

/// A ground atom as raw tokens, before symbol resolution.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct GroundAtom {
    pub name: String,
    pub args: Vec<String>,
}

#[derive(Copy, Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub enum MetricKind {
    Minimize,
    Maximize,
}

/// Everything a `(define (problem ...))` form declares.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct PddlProblem {
    pub name: String,
    pub domain: String,
    pub objects: Vec<(String, String)>,
    pub init: Vec<GroundAtom>,
    pub numeric_init: Vec<(GroundAtom, I40F24)>,
    pub goal: Formula,
    pub metric: Option<(MetricKind, GroundAtom)>,
}

impl Default for PddlProblem {
    fn default() -> Self {
        PddlProblem {
            name: String::new(),
            domain: String::new(),
            objects: Vec::new(),
            init: Vec::new(),
            numeric_init: Vec::new(),
            goal: Formula::always(),
            metric: None,
        }
    }
}

pub struct PddlProblemParser {
    problem: PddlProblem,
}

impl PddlProblemParser {
    pub fn parse(text: &str) -> Result<PddlProblem> {
        let tree = Parser::build_parse_tree(text)?;
        let parts = expect_sub(&tree, "a problem definition")?;
        match parts.first() {
            Some(first) if first.is("define") => {}
            _ => {
                return Err(PddlError::Syntax(
                    "problem must start with define".to_owned(),
                ))
            }
        }
        let mut parser = PddlProblemParser {
            problem: PddlProblem::default(),
        };
        for section in parts[1..].iter() {
            parser.section(section)?;
        }
        if parser.problem.name.is_empty() {
            return Err(PddlError::Syntax("missing (problem name)".to_owned()));
        }
        Ok(parser.problem)
    }

    fn section(&mut self, tree: &SexprTree) -> Result<()> {
        let parts = expect_sub(tree, "a problem section")?;
        let tag = match parts.first() {
            Some(Sym(s)) => s.clone(),
            _ => {
                return Err(PddlError::Syntax(
                    "problem section must start with a tag".to_owned(),
                ))
            }
        };
        match tag.as_str() {
            "problem" => {
                let name_tree = parts
                    .get(1)
                    .ok_or_else(|| PddlError::Syntax("missing problem name".to_owned()))?;
                self.problem.name = expect_sym(name_tree, "the problem name")?;
                Ok(())
            }
            ":domain" => {
                let name_tree = parts.get(1).ok_or_else(|| {
                    PddlError::Syntax("missing domain reference".to_owned())
                })?;
                self.problem.domain = expect_sym(name_tree, "the domain name")?;
                Ok(())
            }
            ":objects" => {
                let flat = tree.flatten();
                for (name, typ) in parse_typed_list(&flat[1..])? {
                    let typ = typ.unwrap_or_else(|| OBJECT_TYPE.to_owned());
                    self.problem.objects.push((name, typ));
                }
                Ok(())
            }
            ":init" => {
                for literal in parts[1..].iter() {
                    self.literal(literal)?;
                }
                Ok(())
            }
            ":goal" => {
                if parts.len() != 2 {
                    return Err(PddlError::Syntax(
                        "goal takes exactly one formula".to_owned(),
                    ));
                }
                self.problem.goal = parse_formula(&parts[1])?;
                Ok(())
            }
            ":metric" => {
                if parts.len() != 3 {
                    return Err(PddlError::Syntax(
                        "metric takes a direction and a function".to_owned(),
                    ));
                }
                let kind = match expect_sym(&parts[1], "a metric direction")?.as_str() {
                    "minimize" => MetricKind::Minimize,
                    "maximize" => MetricKind::Maximize,
                    other => {
                        return Err(PddlError::Syntax(format!(
                            "unknown metric direction {other}"
                        )))
                    }
                };
                self.problem.metric = Some((kind, ground_atom(&parts[2])?));
                Ok(())
            }
            _ => Err(PddlError::Syntax(format!("unknown problem section {tag}"))),
        }
    }

    fn literal(&mut self, tree: &SexprTree) -> Result<()> {
        let parts = expect_sub(tree, "an init literal")?;
        match parts.first() {
            Some(first) if first.is("=") => {
                if parts.len() != 3 {
                    return Err(PddlError::Syntax(
                        "numeric init takes a function and a value".to_owned(),
                    ));
                }
                let atom = ground_atom(&parts[1])?;
                let token = expect_sym(&parts[2], "a numeric value")?;
                let value = token.parse::<I40F24>().map_err(|e| {
                    PddlError::Syntax(format!("bad numeric value {token}: {e}"))
                })?;
                self.problem.numeric_init.push((atom, value));
                Ok(())
            }
            Some(first) if first.is("not") => Err(PddlError::Syntax(
                "negative init literals are not supported".to_owned(),
            )),
            _ => {
                self.problem.init.push(ground_atom(tree)?);
                Ok(())
            }
        }
    }
}

fn ground_atom(tree: &SexprTree) -> Result<GroundAtom> {
    let parts = expect_sub(tree, "a ground atom")?;
    let name = match parts.first() {
        Some(Sym(s)) => s.clone(),
        _ => return Err(PddlError::Syntax("empty ground atom".to_owned())),
    };
    let mut args = Vec::new();
    for part in parts[1..].iter() {
        let token = expect_sym(part, "a ground argument")?;
        if token.starts_with('?') {
            return Err(PddlError::Syntax(format!(
                "variable {token} in ground atom ({name} ...)"
            )));
        }
        args.push(token);
    }
    Ok(GroundAtom { name, args })
}
