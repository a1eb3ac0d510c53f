//! A PDDL-style planning model: typed objects, STRIPS actions, axiom
//! constraints, derived predicates, and a forward state-space planner.
//! [`Pddl`] ties a parsed domain and problem together and answers
//! queries about states, actions, and plans.

mod action;
mod axiom;
mod error;
mod formula;
mod generator;
mod normal_form;
mod parser;
mod planner;
mod registry;
mod state;

pub use action::Action;
pub use axiom::{Axiom, DerivedPredicate, DerivedPredicates, MAX_CONSISTENCY_PASSES};
pub use error::{ErrorKind, PddlError, Result};
pub use formula::{Bindings, Formula, Parameter, Predicate, Proposition, EQUALITY};
pub use generator::{ParameterGenerator, Tuples};
pub use normal_form::{Conjunction, DisjunctiveFormula};
pub use parser::{
    parse_args, parse_head, GroundAtom, MetricKind, PddlDomain, PddlDomainParser,
    PddlProblem, PddlProblemParser,
};
pub use planner::{
    BreadthFirstSearch, DepthFirstSearch, Plan, PlanStep, Planner, PlannerNode,
    SearchConfig, SearchStrategy,
};
pub use registry::{Object, ObjectType, Registry, OBJECT_TYPE};
pub use state::{Delta, PartialState, StateIndex, WorldAssumption};

use std::collections::BTreeMap;

use fixed::types::I40F24;

/// Resolved optimization target from a problem's `:metric` section.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub enum Metric {
    Minimize(Proposition),
    Maximize(Proposition),
}

/// A complete planning model: one domain paired with one problem, fully
/// resolved and validated.
///
/// The initial state is axiom-consistent and closed under the derivation
/// rules, and every successor produced through [`Pddl::next_state`] or
/// [`Pddl::transition`] is kept that way.
#[derive(Clone, Debug)]
pub struct Pddl {
    domain_name: String,
    problem_name: String,
    registry: Registry,
    predicates: BTreeMap<String, Predicate>,
    functions: BTreeMap<String, Predicate>,
    actions: Vec<Action>,
    axioms: Vec<Axiom>,
    derived: DerivedPredicates,
    index: StateIndex,
    mode: WorldAssumption,
    initial: PartialState,
    numeric: BTreeMap<Proposition, I40F24>,
    goal: Formula,
    goal_dnf: DisjunctiveFormula,
    metric: Option<Metric>,
}

impl Pddl {
    /// Parses a domain and a problem under the closed-world assumption.
    pub fn parse(domain: &str, problem: &str) -> Result<Self> {
        Pddl::parse_with_mode(domain, problem, WorldAssumption::default())
    }

    pub fn parse_with_mode(
        domain: &str,
        problem: &str,
        mode: WorldAssumption,
    ) -> Result<Self> {
        let domain = PddlDomainParser::parse(domain)?;
        let problem = PddlProblemParser::parse(problem)?;
        Pddl::new(domain, problem, mode)
    }

    /// Resolves and validates every declaration, then builds the initial
    /// state: init literals, axiom repair, derivation closure.
    pub fn new(
        domain: PddlDomain,
        problem: PddlProblem,
        mode: WorldAssumption,
    ) -> Result<Self> {
        if !problem.domain.is_empty() && problem.domain != domain.name {
            return Err(PddlError::UnknownSymbol(format!(
                "domain {} required by problem {}",
                problem.domain, problem.name
            )));
        }

        let mut registry = Registry::new();
        registry.declare_types(&domain.types)?;
        for (name, typ) in domain.constants.iter() {
            registry.add_object(name, typ)?;
        }
        for (name, typ) in problem.objects.iter() {
            registry.add_object(name, typ)?;
        }

        let mut predicates = BTreeMap::new();
        for predicate in domain.predicates.iter() {
            declare_head(&mut predicates, &registry, predicate, "predicate")?;
        }
        let mut functions = BTreeMap::new();
        for function in domain.functions.iter() {
            if predicates.contains_key(&function.name) {
                return Err(PddlError::InvalidArgument(format!(
                    "function {} is already a predicate",
                    function.name
                )));
            }
            declare_head(&mut functions, &registry, function, "function")?;
        }

        // Derived heads join the predicate schema; when one is also
        // declared explicitly, the declarations must agree.
        let mut index_predicates = domain.predicates.clone();
        for rule in domain.derived.iter() {
            if functions.contains_key(&rule.head.name) {
                return Err(PddlError::InvalidArgument(format!(
                    "derived predicate {} is already a function",
                    rule.head.name
                )));
            }
            match predicates.get(&rule.head.name) {
                Some(declared) => {
                    if !same_schema(declared, &rule.head) {
                        return Err(PddlError::InvalidArgument(format!(
                            "derived predicate {} disagrees with its declaration",
                            rule.head.name
                        )));
                    }
                }
                None => {
                    declare_head(&mut predicates, &registry, &rule.head, "derived predicate")?;
                    index_predicates.push(rule.head.clone());
                }
            }
        }
        let derived = DerivedPredicates::stratify(domain.derived)?;

        for rule in derived.rules() {
            let scope = scope_of(&registry, &rule.head.params)?;
            formula::validate(&rule.condition, &registry, &predicates, &scope)?;
        }

        let mut actions: Vec<Action> = Vec::new();
        for action in domain.actions.into_iter() {
            if actions.iter().any(|a| a.name == action.name) {
                return Err(PddlError::InvalidArgument(format!(
                    "action {} declared twice",
                    action.name
                )));
            }
            let scope = scope_of(&registry, &action.params)?;
            formula::validate(&action.precondition, &registry, &predicates, &scope)?;
            action::validate_effect_shape(&action.effect, &action.name)?;
            formula::validate(&action.effect, &registry, &predicates, &scope)?;
            check_effect_targets(&action.effect, &registry, &derived, &action.name)?;
            actions.push(action);
        }

        let mut axioms = Vec::new();
        for axiom in domain.axioms.into_iter() {
            let scope = scope_of(&registry, &axiom.params)?;
            formula::validate(&axiom.context, &registry, &predicates, &scope)?;
            action::validate_effect_shape(&axiom.implies, "an axiom implication")?;
            formula::validate(&axiom.implies, &registry, &predicates, &scope)?;
            check_effect_targets(&axiom.implies, &registry, &derived, "an axiom implication")?;
            axioms.push(axiom);
        }

        let index = StateIndex::new(&index_predicates, &registry);

        let mut initial = PartialState::new();
        for atom in problem.init.iter() {
            if derived.contains_head(&atom.name) {
                return Err(PddlError::InvalidArgument(format!(
                    "derived predicate {} cannot appear in the initial state",
                    atom.name
                )));
            }
            initial.insert(resolve_ground(
                &registry,
                &predicates,
                &atom.name,
                &atom.args,
                "predicate",
            )?);
        }
        let mut numeric = BTreeMap::new();
        for (atom, value) in problem.numeric_init.iter() {
            let prop = resolve_ground(&registry, &functions, &atom.name, &atom.args, "function")?;
            numeric.insert(prop, *value);
        }
        let metric = match problem.metric {
            Some((kind, atom)) => {
                let prop =
                    resolve_ground(&registry, &functions, &atom.name, &atom.args, "function")?;
                Some(match kind {
                    MetricKind::Minimize => Metric::Minimize(prop),
                    MetricKind::Maximize => Metric::Maximize(prop),
                })
            }
            None => None,
        };

        formula::validate(&problem.goal, &registry, &predicates, &BTreeMap::new())?;
        let goal_dnf = DisjunctiveFormula::normalize(&registry, &problem.goal, &Bindings::new())?;

        let initial = axiom::consistent_state(&axioms, &registry, mode, &initial)?;
        let initial = derived.derived_state(&registry, mode, &initial)?;

        Ok(Pddl {
            domain_name: domain.name,
            problem_name: problem.name,
            registry,
            predicates,
            functions,
            actions,
            axioms,
            derived,
            index,
            mode,
            initial,
            numeric,
            goal: problem.goal,
            goal_dnf,
            metric,
        })
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    pub fn problem_name(&self) -> &str {
        &self.problem_name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn mode(&self) -> WorldAssumption {
        self.mode
    }

    pub fn predicates(&self) -> &BTreeMap<String, Predicate> {
        &self.predicates
    }

    pub fn functions(&self) -> &BTreeMap<String, Predicate> {
        &self.functions
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn axioms(&self) -> &[Axiom] {
        &self.axioms
    }

    pub fn derived(&self) -> &DerivedPredicates {
        &self.derived
    }

    pub fn initial_state(&self) -> &PartialState {
        &self.initial
    }

    pub fn goal(&self) -> &Formula {
        &self.goal
    }

    pub fn metric(&self) -> Option<&Metric> {
        self.metric.as_ref()
    }

    /// Numeric fluent values from `:init`, keyed by ground function call.
    pub fn numeric_values(&self) -> &BTreeMap<Proposition, I40F24> {
        &self.numeric
    }

    pub fn function_value(&self, function: &Proposition) -> Option<I40F24> {
        self.numeric.get(function).copied()
    }

    fn action(&self, name: &str) -> Result<&Action> {
        self.actions
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| PddlError::UnknownSymbol(format!("action {name}")))
    }

    /// Resolves `on(a, b)`-style text into a ground proposition over the
    /// declared predicates.
    pub fn parse_proposition(&self, text: &str) -> Result<Proposition> {
        let (name, args) = parse_head(text)?;
        resolve_ground(&self.registry, &self.predicates, &name, &args, "predicate")
    }

    /// As [`Pddl::parse_proposition`], over the declared functions.
    pub fn parse_function(&self, text: &str) -> Result<Proposition> {
        let (name, args) = parse_head(text)?;
        resolve_ground(&self.registry, &self.functions, &name, &args, "function")
    }

    /// Whether `text` names a well-formed ground proposition. Malformed
    /// syntax is an error; a clean parse that fails resolution is `false`.
    pub fn is_valid_tuple(&self, text: &str) -> Result<bool> {
        match self.parse_proposition(text) {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::Syntax => Err(e),
            Err(_) => Ok(false),
        }
    }

    /// Whether `state` is well formed and satisfies every axiom: each
    /// literal resolves against the current declarations and universe,
    /// and every axiom grounding whose context holds has its implication
    /// satisfied.
    pub fn is_valid_state(&self, state: &PartialState) -> Result<bool> {
        let resolves = state
            .truths()
            .iter()
            .chain(state.negations().iter())
            .all(|prop| self.check_ground(prop).is_ok());
        if !resolves {
            return Ok(false);
        }
        for axiom in self.axioms.iter() {
            if !axiom.is_consistent(&self.registry, self.mode, state)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn check_ground(&self, prop: &Proposition) -> Result<()> {
        let args: Vec<String> = prop.args.iter().map(|obj| obj.name.clone()).collect();
        resolve_ground(&self.registry, &self.predicates, &prop.name, &args, "predicate")?;
        Ok(())
    }

    /// Builds a state from positive proposition strings.
    pub fn state(&self, props: &[&str]) -> Result<PartialState> {
        let mut state = PartialState::new();
        for text in props.iter() {
            state.insert(self.parse_proposition(text)?);
        }
        Ok(state)
    }

    pub fn is_goal_satisfied(&self, state: &PartialState) -> bool {
        self.goal_dnf.is_satisfied(state, self.mode)
    }

    /// Whether the named action call has a satisfied precondition in
    /// `state`. Calls that do not resolve are errors, not `false`.
    pub fn is_valid_action(&self, state: &PartialState, call: &str) -> Result<bool> {
        let (action, args) = self.resolve_call(call)?;
        action.is_valid(&self.registry, self.mode, state, &args)
    }

    /// Call strings of every applicable grounding, actions in declaration
    /// order and argument tuples in generator order.
    pub fn list_valid_actions(&self, state: &PartialState) -> Result<Vec<String>> {
        let mut calls = Vec::new();
        for action in self.actions.iter() {
            for args in action.generator().tuples(&self.registry) {
                if action.is_valid(&self.registry, self.mode, state, &args)? {
                    calls.push(action.call_string(&args));
                }
            }
        }
        Ok(calls)
    }

    /// Applicable argument tuples for one action, in generator order.
    pub fn list_valid_arguments(
        &self,
        state: &PartialState,
        action_name: &str,
    ) -> Result<Vec<Vec<Object>>> {
        let action = self.action(action_name)?;
        let mut tuples = Vec::new();
        for args in action.generator().tuples(&self.registry) {
            if action.is_valid(&self.registry, self.mode, state, &args)? {
                tuples.push(args);
            }
        }
        Ok(tuples)
    }

    /// The grounded precondition and effect of an action call, as DNF.
    pub fn normalize_conditions(
        &self,
        call: &str,
    ) -> Result<(DisjunctiveFormula, DisjunctiveFormula)> {
        let (action, args) = self.resolve_call(call)?;
        let precondition = action.precondition_dnf(&self.registry, &args)?;
        let effect = action.effect_dnf(&self.registry, &args)?;
        Ok((precondition, effect))
    }

    /// The successor of `state` under an action call, or an
    /// `InvalidTransition` error when the precondition fails.
    pub fn next_state(&self, state: &PartialState, call: &str) -> Result<PartialState> {
        let (action, args) = self.resolve_call(call)?;
        if !action.is_valid(&self.registry, self.mode, state, &args)? {
            return Err(PddlError::InvalidTransition(format!(
                "precondition not satisfied: {}",
                action.call_string(&args)
            )));
        }
        self.transition(state, action, &args)
    }

    /// Applies an already-resolved grounding: effect, then axiom repair,
    /// then rederivation. The precondition is not consulted.
    pub fn transition(
        &self,
        state: &PartialState,
        action: &Action,
        args: &[Object],
    ) -> Result<PartialState> {
        let applied = action.apply(&self.registry, self.mode, state, args)?;
        let consistent =
            axiom::consistent_state(&self.axioms, &self.registry, self.mode, &applied)?;
        self.derived.rederive(&self.registry, self.mode, &consistent)
    }

    /// Runs a call sequence from `state`, failing on the first
    /// inapplicable action.
    pub fn apply_actions(&self, state: &PartialState, calls: &[&str]) -> Result<PartialState> {
        let mut state = state.clone();
        for call in calls.iter() {
            state = self.next_state(&state, call)?;
        }
        Ok(state)
    }

    /// Whether applying `call` to `state` yields exactly `next`. A failed
    /// precondition reads as `false`; unresolvable calls are errors.
    pub fn is_valid_transition(
        &self,
        state: &PartialState,
        call: &str,
        next: &PartialState,
    ) -> Result<bool> {
        match self.next_state(state, call) {
            Ok(result) => Ok(&result == next),
            Err(e) if e.kind() == ErrorKind::InvalidTransition => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Whether the call sequence executes from the initial state and ends
    /// in a goal state. Inapplicable steps read as `false`.
    pub fn is_valid_plan(&self, plan: &[&str]) -> Result<bool> {
        let mut state = self.initial.clone();
        for call in plan.iter() {
            match self.next_state(&state, call) {
                Ok(next) => state = next,
                Err(e) if e.kind() == ErrorKind::InvalidTransition => return Ok(false),
                Err(e) => return Err(e),
            }
        }
        Ok(self.is_goal_satisfied(&state))
    }

    /// The derivation closure of `state` under the domain's rules.
    pub fn derived_state(&self, state: &PartialState) -> Result<PartialState> {
        self.derived.derived_state(&self.registry, self.mode, state)
    }

    /// `state` with every axiom implication forced until stable.
    pub fn consistent_state(&self, state: &PartialState) -> Result<PartialState> {
        axiom::consistent_state(&self.axioms, &self.registry, self.mode, state)
    }

    /// Grows the universe. Existing proposition indices are preserved;
    /// new groundings get fresh indices and the goal is re-grounded.
    pub fn add_object(&mut self, name: &str, typ: &str) -> Result<()> {
        self.registry.add_object(name, typ)?;
        self.index.extend(&self.registry);
        self.goal_dnf =
            DisjunctiveFormula::normalize(&self.registry, &self.goal, &Bindings::new())?;
        Ok(())
    }

    /// Removes an object that the initial state, the numeric values, and
    /// the goal never mention, retiring its proposition indices.
    pub fn remove_object(&mut self, name: &str) -> Result<Object> {
        self.registry.object(name)?;
        let in_initial = self
            .initial
            .truths()
            .iter()
            .chain(self.initial.negations().iter())
            .any(|prop| prop.args.iter().any(|obj| obj.name == name));
        if in_initial {
            return Err(PddlError::ReferentialIntegrity(format!(
                "object {name} appears in the initial state"
            )));
        }
        if self
            .numeric
            .keys()
            .any(|prop| prop.args.iter().any(|obj| obj.name == name))
        {
            return Err(PddlError::ReferentialIntegrity(format!(
                "object {name} appears in a numeric initial value"
            )));
        }
        if formula_mentions(&self.goal, name) {
            return Err(PddlError::ReferentialIntegrity(format!(
                "object {name} appears in the goal"
            )));
        }
        let removed = self.registry.remove_object(name)?;
        self.index.retire(name);
        self.goal_dnf =
            DisjunctiveFormula::normalize(&self.registry, &self.goal, &Bindings::new())?;
        Ok(removed)
    }

    /// Total proposition indices assigned so far, retired ones included.
    pub fn num_propositions(&self) -> usize {
        self.index.len()
    }

    pub fn get_proposition(&self, index: usize) -> Result<&Proposition> {
        self.index.get_proposition(index)
    }

    pub fn get_proposition_index(&self, prop: &Proposition) -> Result<usize> {
        self.index.get_proposition_index(prop)
    }

    /// The known-true set of `state` as a boolean vector.
    pub fn get_indexed_state(&self, state: &PartialState) -> Result<Vec<bool>> {
        self.index.get_indexed_state(state)
    }

    pub fn get_state(&self, bits: &[bool]) -> Result<PartialState> {
        self.index.get_state(bits)
    }

    fn resolve_call(&self, call: &str) -> Result<(&Action, Vec<Object>)> {
        let (name, arg_tokens) = parse_head(call)?;
        let action = self.action(&name)?;
        let mut args = Vec::new();
        for token in arg_tokens.iter() {
            args.push(self.registry.object(token)?.clone());
        }
        action.check_args(&self.registry, &args)?;
        Ok((action, args))
    }
}

fn formula_mentions(formula: &Formula, name: &str) -> bool {
    match formula {
        Formula::Atom { args, .. } => args.iter().any(|arg| arg == name),
        Formula::Not(inner) => formula_mentions(inner, name),
        Formula::And(parts) | Formula::Or(parts) => {
            parts.iter().any(|part| formula_mentions(part, name))
        }
        Formula::Forall { body, .. } | Formula::Exists { body, .. } => {
            formula_mentions(body, name)
        }
    }
}

fn same_schema(a: &Predicate, b: &Predicate) -> bool {
    a.arity() == b.arity()
        && a.params
            .iter()
            .zip(b.params.iter())
            .all(|(x, y)| x.typ == y.typ)
}

fn declare_head(
    schema: &mut BTreeMap<String, Predicate>,
    registry: &Registry,
    predicate: &Predicate,
    what: &str,
) -> Result<()> {
    if predicate.name == EQUALITY || registry.contains_type(&predicate.name) {
        return Err(PddlError::InvalidArgument(format!(
            "{what} {} shadows a built-in head",
            predicate.name
        )));
    }
    for param in predicate.params.iter() {
        if !registry.contains_type(&param.typ) {
            return Err(PddlError::UnknownSymbol(format!("type {}", param.typ)));
        }
    }
    if schema
        .insert(predicate.name.clone(), predicate.clone())
        .is_some()
    {
        return Err(PddlError::InvalidArgument(format!(
            "{what} {} declared twice",
            predicate.name
        )));
    }
    Ok(())
}

fn scope_of(registry: &Registry, params: &[Parameter]) -> Result<BTreeMap<String, String>> {
    let mut scope = BTreeMap::new();
    for param in params.iter() {
        if !registry.contains_type(&param.typ) {
            return Err(PddlError::UnknownSymbol(format!("type {}", param.typ)));
        }
        if scope
            .insert(param.symbol.clone(), param.typ.clone())
            .is_some()
        {
            return Err(PddlError::InvalidArgument(format!(
                "parameter {} declared twice",
                param.symbol
            )));
        }
    }
    Ok(scope)
}

fn resolve_ground(
    registry: &Registry,
    schema: &BTreeMap<String, Predicate>,
    name: &str,
    args: &[String],
    what: &str,
) -> Result<Proposition> {
    let predicate = schema
        .get(name)
        .ok_or_else(|| PddlError::UnknownSymbol(format!("{what} {name}")))?;
    if args.len() != predicate.arity() {
        return Err(PddlError::ArityMismatch {
            symbol: name.to_owned(),
            expected: predicate.arity(),
            found: args.len(),
        });
    }
    let mut resolved = Vec::new();
    for (token, slot) in args.iter().zip(predicate.params.iter()) {
        let obj = registry.object(token)?.clone();
        if !registry.is_subtype(&obj.typ, &slot.typ) {
            return Err(PddlError::InvalidArgument(format!(
                "{} is not a {} (slot {} of {name})",
                obj.name, slot.typ, slot.symbol
            )));
        }
        resolved.push(obj);
    }
    Ok(Proposition::new(name, resolved))
}

// Effects and implications may only write plain predicates: never
// equality, type heads, or derived predicates.
fn check_effect_targets(
    formula: &Formula,
    registry: &Registry,
    derived: &DerivedPredicates,
    context: &str,
) -> Result<()> {
    match formula {
        Formula::Atom { head, .. } => {
            if head == EQUALITY || registry.contains_type(head) {
                return Err(PddlError::InvalidArgument(format!(
                    "{head} cannot be a target of {context}"
                )));
            }
            if derived.contains_head(head) {
                return Err(PddlError::InvalidArgument(format!(
                    "derived predicate {head} cannot be a target of {context}"
                )));
            }
            Ok(())
        }
        Formula::Not(inner) => check_effect_targets(inner, registry, derived, context),
        Formula::And(parts) | Formula::Or(parts) => {
            for part in parts.iter() {
                check_effect_targets(part, registry, derived, context)?;
            }
            Ok(())
        }
        Formula::Forall { body, .. } | Formula::Exists { body, .. } => {
            check_effect_targets(body, registry, derived, context)
        }
    }
}
