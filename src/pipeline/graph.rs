//! Declarative encoding: an execution graph generated from the transition table.
//!
//! The graph never carries semantics of its own. [`ExecutionGraph::from_table`] expands each
//! table row into an edge, and [`drive`] walks those edges while the run context re-checks
//! every step against the table. A disagreement between the two is reported as
//! `InvalidTransition`.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt::Write as _;

use super::context::RunContext;
use super::orchestrator::Orchestrator;
use super::stage::StageRole;
use super::state::{Budget, Effect, Event, Guard, PipelineState, Source, Transition};
use crate::errors::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "role")]
pub enum NodeKind {
    Entry,
    Stage(StageRole),
    /// Routes on run state without invoking a stage.
    Decision,
    Terminal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphNode {
    pub state: PipelineState,
    pub kind: NodeKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub from: PipelineState,
    pub event: Event,
    pub guard: Guard,
    pub effect: Effect,
    pub to: PipelineState,
}

impl GraphEdge {
    fn label(&self) -> String {
        let mut label = self.event.to_string();
        if let Some(guard) = self.guard.label() {
            label.push_str(&format!(" [{guard}]"));
        }
        if self.effect == Effect::CountAttempt {
            label.push_str(" / attempts += 1");
        }
        label
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionGraph {
    nodes: BTreeMap<PipelineState, GraphNode>,
    edges: Vec<GraphEdge>,
}

impl ExecutionGraph {
    /// Generate the graph from a transition table. Wildcard rows become one edge per active
    /// state.
    pub fn from_table(table: &[Transition]) -> Self {
        let nodes = PipelineState::ALL
            .iter()
            .map(|&state| (state, GraphNode { state, kind: kind_of(state) }))
            .collect();

        let mut edges = Vec::new();
        for row in table {
            let sources: Vec<PipelineState> = match row.from {
                Source::State(state) => vec![state],
                Source::AnyActive => PipelineState::ALL
                    .iter()
                    .copied()
                    .filter(|s| !s.is_terminal())
                    .collect(),
            };
            for from in sources {
                edges.push(GraphEdge {
                    from,
                    event: row.event,
                    guard: row.guard,
                    effect: row.effect,
                    to: row.to,
                });
            }
        }

        Self { nodes, edges }
    }

    pub fn entry(&self) -> PipelineState {
        PipelineState::Init
    }

    pub fn node(&self, state: PipelineState) -> Option<&GraphNode> {
        self.nodes.get(&state)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.nodes.values()
    }

    pub fn edges(&self) -> &[GraphEdge] {
        &self.edges
    }

    pub fn outgoing(&self, from: PipelineState) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.from == from)
    }

    /// The edge taken from `from` on `event` under `budget`.
    pub fn select(&self, from: PipelineState, event: Event, budget: Budget) -> Option<&GraphEdge> {
        self.outgoing(from)
            .find(|e| e.event == event && e.guard.holds(budget))
    }

    /// States reachable from the entry node.
    pub fn reachable(&self) -> BTreeSet<PipelineState> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([self.entry()]);
        while let Some(state) = queue.pop_front() {
            if seen.insert(state) {
                queue.extend(self.outgoing(state).map(|e| e.to));
            }
        }
        seen
    }

    /// Mermaid flowchart. Interrupt edges are folded into one note per target.
    pub fn render_mermaid(&self) -> String {
        let mut out = String::from("stateDiagram-v2\n");
        let _ = writeln!(out, "    [*] --> {}", self.entry());
        for edge in self.edges.iter().filter(|e| !e.event.is_interrupt()) {
            let _ = writeln!(out, "    {} --> {} : {}", edge.from, edge.to, edge.label());
        }
        for node in self.nodes().filter(|n| n.kind == NodeKind::Terminal) {
            let _ = writeln!(out, "    {} --> [*]", node.state);
        }
        for (event, to) in self.interrupts() {
            let _ = writeln!(out, "    note right of {to} : {event} from any active state");
        }
        out
    }

    /// Graphviz digraph. Interrupt edges are folded like in the mermaid rendering.
    pub fn render_dot(&self) -> String {
        let mut out = String::from("digraph mend {\n    rankdir=TB;\n");
        for node in self.nodes() {
            let shape = match node.kind {
                NodeKind::Entry => "circle",
                NodeKind::Stage(_) => "box",
                NodeKind::Decision => "diamond",
                NodeKind::Terminal => "doublecircle",
            };
            let _ = writeln!(out, "    {} [shape={shape}];", node.state);
        }
        for edge in self.edges.iter().filter(|e| !e.event.is_interrupt()) {
            let _ = writeln!(
                out,
                "    {} -> {} [label=\"{}\"];",
                edge.from,
                edge.to,
                edge.label()
            );
        }
        for (event, to) in self.interrupts() {
            let _ = writeln!(out, "    // {event}: any active state -> {to}");
        }
        out.push_str("}\n");
        out
    }

    /// Plain-text table listing every edge, interrupts included.
    pub fn render_table(&self) -> String {
        let mut out = format!(
            "{:<20} {:<16} {:<22} {:<16} {}\n",
            "FROM", "EVENT", "GUARD", "EFFECT", "TO"
        );
        for edge in &self.edges {
            let effect = match edge.effect {
                Effect::None => "-",
                Effect::CountAttempt => "attempts += 1",
            };
            let _ = writeln!(
                out,
                "{:<20} {:<16} {:<22} {:<16} {}",
                edge.from.as_str(),
                edge.event.as_str(),
                edge.guard.label().unwrap_or("-"),
                effect,
                edge.to.as_str()
            );
        }
        out
    }

    fn interrupts(&self) -> BTreeSet<(&'static str, PipelineState)> {
        self.edges
            .iter()
            .filter(|e| e.event.is_interrupt())
            .map(|e| (e.event.as_str(), e.to))
            .collect()
    }
}

fn kind_of(state: PipelineState) -> NodeKind {
    if state == PipelineState::Init {
        NodeKind::Entry
    } else if state.is_terminal() {
        NodeKind::Terminal
    } else if let Some(role) = state.stage() {
        NodeKind::Stage(role)
    } else {
        NodeKind::Decision
    }
}

/// Walk the graph from its entry node until a terminal node is reached.
pub(crate) async fn drive(
    orch: &Orchestrator,
    graph: &ExecutionGraph,
    ctx: &mut RunContext,
) -> Result<(), PipelineError> {
    let mut cursor = graph.entry();
    loop {
        let node = graph
            .node(cursor)
            .copied()
            .ok_or(PipelineError::OutOfOrder {
                operation: "dispatch a missing graph node",
                state: cursor,
            })?;

        let step = match node.kind {
            NodeKind::Terminal => return Ok(()),
            NodeKind::Stage(role) => orch.invoke(role, ctx).await,
            NodeKind::Entry | NodeKind::Decision => orch.decide(ctx),
        };

        let budget = ctx.budget();
        let transition = orch.commit(ctx, step)?;
        let edge = graph
            .select(cursor, transition.event, budget)
            .filter(|edge| edge.to == transition.to && edge.to == ctx.state())
            .ok_or(PipelineError::InvalidTransition {
                from: cursor,
                event: transition.event,
            })?;
        cursor = edge.to;
    }
}
