//! Execution graph rendering: `mend graph`.

use anyhow::Result;

use super::super::GraphFormat;
use mend::pipeline::{ExecutionGraph, TRANSITIONS};

pub fn cmd_graph(format: GraphFormat) -> Result<u8> {
    let graph = ExecutionGraph::from_table(TRANSITIONS);
    let rendered = match format {
        GraphFormat::Mermaid => graph.render_mermaid(),
        GraphFormat::Dot => graph.render_dot(),
        GraphFormat::Table => graph.render_table(),
    };
    print!("{rendered}");
    if !rendered.ends_with('\n') {
        println!();
    }
    Ok(0)
}
