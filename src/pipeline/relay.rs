//! Relay encoding: a sequential loop that re-reads the current state each iteration.

use super::context::RunContext;
use super::orchestrator::Orchestrator;
use crate::errors::PipelineError;

pub(crate) async fn drive(orch: &Orchestrator, ctx: &mut RunContext) -> Result<(), PipelineError> {
    while !ctx.is_sealed() {
        let step = match ctx.state().stage() {
            Some(role) => orch.invoke(role, ctx).await,
            None => orch.decide(ctx),
        };
        orch.commit(ctx, step)?;
    }
    Ok(())
}
