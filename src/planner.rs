use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

use crate::error::Result;
use crate::state::PartialState;
use crate::Pddl;

/// Search budgets. Depth counts actions from the initial state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SearchConfig {
    pub max_depth: usize,
    pub max_nodes: Option<usize>,
    pub timeout: Option<Duration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_depth: 5,
            max_nodes: None,
            timeout: None,
        }
    }
}

impl SearchConfig {
    pub fn with_depth(max_depth: usize) -> Self {
        SearchConfig {
            max_depth,
            ..SearchConfig::default()
        }
    }
}

/// One node of the search arena. Children refer to parents by index, so
/// plans are recovered by walking indices back to the root.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct PlannerNode {
    pub state: PartialState,
    /// Call string of the action that produced this node; `None` at the
    /// root.
    pub action: Option<String>,
    pub parent: Option<usize>,
    pub depth: usize,
}

/// Frontier discipline: decides which open node expands next.
pub trait SearchStrategy {
    fn push(&mut self, id: usize);
    fn pop(&mut self) -> Option<usize>;
}

/// FIFO frontier. With unit action costs this finds a shortest plan, and
/// ties fall to enumeration order, so results are deterministic.
#[derive(Debug, Default)]
pub struct BreadthFirstSearch {
    frontier: VecDeque<usize>,
}

impl SearchStrategy for BreadthFirstSearch {
    fn push(&mut self, id: usize) {
        self.frontier.push_back(id);
    }

    fn pop(&mut self) -> Option<usize> {
        self.frontier.pop_front()
    }
}

/// LIFO frontier. Commits to deep branches first; plans found are not
/// necessarily shortest.
#[derive(Debug, Default)]
pub struct DepthFirstSearch {
    frontier: Vec<usize>,
}

impl SearchStrategy for DepthFirstSearch {
    fn push(&mut self, id: usize) {
        self.frontier.push(id);
    }

    fn pop(&mut self) -> Option<usize> {
        self.frontier.pop()
    }
}

/// A found plan: the node chain from the initial state to a goal state.
#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

#[derive(Clone, Debug, Ord, PartialOrd, PartialEq, Eq)]
pub struct PlanStep {
    pub action: Option<String>,
    pub state: PartialState,
    pub depth: usize,
}

impl Plan {
    /// The action call strings, in execution order.
    pub fn action_calls(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|step| step.action.as_deref())
            .collect()
    }

    /// Number of actions in the plan.
    pub fn len(&self) -> usize {
        self.steps.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for step in self.steps.iter() {
            match &step.action {
                Some(action) => {
                    writeln!(f, "{}{} -> {}", "-".repeat(step.depth), action, step.state)?
                }
                None => writeln!(f, "{}", step.state)?,
            }
        }
        Ok(())
    }
}

/// Forward state-space search over the grounded transition system.
pub struct Planner<'a> {
    pddl: &'a Pddl,
    nodes: Vec<PlannerNode>,
}

impl<'a> Planner<'a> {
    pub fn new(pddl: &'a Pddl) -> Self {
        let root = PlannerNode {
            state: pddl.initial_state().clone(),
            action: None,
            parent: None,
            depth: 0,
        };
        Planner {
            pddl,
            nodes: vec![root],
        }
    }

    /// Every node allocated so far, root first.
    pub fn nodes(&self) -> &[PlannerNode] {
        &self.nodes
    }

    /// Searches with a breadth-first frontier.
    pub fn plan(&mut self, config: &SearchConfig) -> Result<Option<Plan>> {
        let mut strategy = BreadthFirstSearch::default();
        self.search(&mut strategy, config)
    }

    /// Runs the search until a goal state is popped, the frontier
    /// empties, or a budget runs out. Exhaustion and exceeded budgets are
    /// `Ok(None)`.
    pub fn search(
        &mut self,
        strategy: &mut dyn SearchStrategy,
        config: &SearchConfig,
    ) -> Result<Option<Plan>> {
        let start = Instant::now();
        let mut visited: BTreeSet<PartialState> = BTreeSet::new();
        visited.insert(self.nodes[0].state.clone());
        strategy.push(0);

        while let Some(id) = strategy.pop() {
            if self.pddl.is_goal_satisfied(&self.nodes[id].state) {
                return Ok(Some(self.plan_to(id)));
            }
            if let Some(timeout) = config.timeout {
                if start.elapsed() >= timeout {
                    return Ok(None);
                }
            }
            if self.nodes[id].depth >= config.max_depth {
                continue;
            }
            let state = self.nodes[id].state.clone();
            let depth = self.nodes[id].depth;
            for action in self.pddl.actions() {
                for args in action.generator().tuples(self.pddl.registry()) {
                    if !action.is_valid(
                        self.pddl.registry(),
                        self.pddl.mode(),
                        &state,
                        &args,
                    )? {
                        continue;
                    }
                    let next = self.pddl.transition(&state, action, &args)?;
                    if visited.contains(&next) {
                        continue;
                    }
                    if let Some(max_nodes) = config.max_nodes {
                        if self.nodes.len() >= max_nodes {
                            return Ok(None);
                        }
                    }
                    visited.insert(next.clone());
                    let child = self.nodes.len();
                    self.nodes.push(PlannerNode {
                        state: next,
                        action: Some(action.call_string(&args)),
                        parent: Some(id),
                        depth: depth + 1,
                    });
                    strategy.push(child);
                }
            }
        }
        Ok(None)
    }

    fn plan_to(&self, id: usize) -> Plan {
        let mut chain = Vec::new();
        let mut cursor = Some(id);
        while let Some(at) = cursor {
            let node = &self.nodes[at];
            chain.push(PlanStep {
                action: node.action.clone(),
                state: node.state.clone(),
                depth: node.depth,
            });
            cursor = node.parent;
        }
        chain.reverse();
        Plan { steps: chain }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCKS_DOMAIN: &str = "(define (domain blocks)
        (:predicates (on ?x ?y) (inhand ?x) (inworkspace ?x))
        (:action pick
            :parameters (?x ?y)
            :precondition (and (on ?x ?y) (inworkspace ?x)
                               (not (exists (?z) (inhand ?z))))
            :effect (and (inhand ?x) (not (on ?x ?y)))))";

    const BLOCKS_PROBLEM: &str = "(define (problem blocks-1)
        (:domain blocks)
        (:objects box table hand)
        (:init (on box table) (inworkspace box))
        (:goal (inhand box)))";

    const SWITCH_DOMAIN: &str = "(define (domain switch)
        (:predicates (lit ?s))
        (:action on
            :parameters (?s)
            :precondition (not (lit ?s))
            :effect (lit ?s))
        (:action off
            :parameters (?s)
            :precondition (lit ?s)
            :effect (not (lit ?s))))";

    const SWITCH_PROBLEM: &str = "(define (problem switch-1)
        (:domain switch)
        (:objects bulb)
        (:init)
        (:goal (and (lit bulb) (not (lit bulb)))))";

    #[test]
    fn breadth_first_finds_the_one_action_plan() {
        let pddl = Pddl::parse(BLOCKS_DOMAIN, BLOCKS_PROBLEM).unwrap();
        let mut planner = Planner::new(&pddl);
        let plan = planner
            .plan(&SearchConfig::default())
            .unwrap()
            .expect("plan");
        assert_eq!(plan.action_calls(), vec!["pick(box, table)"]);
        assert_eq!(plan.len(), 1);
        assert!(pddl.is_goal_satisfied(&plan.steps[1].state));
        assert!(plan.steps[1].state.contains(&pddl.parse_proposition("inhand(box)").unwrap()));
    }

    #[test]
    fn zero_depth_cannot_reach_the_goal() {
        let pddl = Pddl::parse(BLOCKS_DOMAIN, BLOCKS_PROBLEM).unwrap();
        let mut planner = Planner::new(&pddl);
        let plan = planner.plan(&SearchConfig::with_depth(0)).unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn unsatisfiable_goals_exhaust_without_error() {
        let pddl = Pddl::parse(SWITCH_DOMAIN, SWITCH_PROBLEM).unwrap();
        let mut planner = Planner::new(&pddl);
        // lit and not-lit can never hold together; the toggle loop must
        // not recur into visited states
        let plan = planner.plan(&SearchConfig::with_depth(10)).unwrap();
        assert!(plan.is_none());
        assert_eq!(planner.nodes().len(), 2);
    }

    #[test]
    fn node_budget_stops_the_search() {
        let pddl = Pddl::parse(BLOCKS_DOMAIN, BLOCKS_PROBLEM).unwrap();
        let mut planner = Planner::new(&pddl);
        let config = SearchConfig {
            max_nodes: Some(1),
            ..SearchConfig::default()
        };
        assert!(planner.plan(&config).unwrap().is_none());
    }

    #[test]
    fn expired_timeout_reads_as_no_plan() {
        let pddl = Pddl::parse(BLOCKS_DOMAIN, BLOCKS_PROBLEM).unwrap();
        let mut planner = Planner::new(&pddl);
        let config = SearchConfig {
            timeout: Some(Duration::from_secs(0)),
            ..SearchConfig::default()
        };
        assert!(planner.plan(&config).unwrap().is_none());
    }

    #[test]
    fn depth_first_plans_are_still_valid() {
        let pddl = Pddl::parse(BLOCKS_DOMAIN, BLOCKS_PROBLEM).unwrap();
        let mut planner = Planner::new(&pddl);
        let mut strategy = DepthFirstSearch::default();
        let plan = planner
            .search(&mut strategy, &SearchConfig::default())
            .unwrap()
            .expect("plan");
        let calls = plan.action_calls();
        assert!(pddl.is_valid_plan(&calls).unwrap());
    }

    #[test]
    fn plans_render_with_depth_dashes() {
        let pddl = Pddl::parse(BLOCKS_DOMAIN, BLOCKS_PROBLEM).unwrap();
        let mut planner = Planner::new(&pddl);
        let plan = planner
            .plan(&SearchConfig::default())
            .unwrap()
            .expect("plan");
        let text = plan.to_string();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("{ inworkspace(box), on(box, table) }"));
        assert_eq!(
            lines.next(),
            Some("-pick(box, table) -> { inhand(box), inworkspace(box) }")
        );
    }
}
