//! Code unit evaluation

use rquickjs::context::EvalOptions;
use rquickjs::{CatchResultExt, Value};
use tracing::debug;

use crate::buffer::CodeUnit;
use crate::context::ExecutionContext;
use crate::failure::ExecutionFailure;

/// Compile and run `unit` as a sloppy-mode global script, then drain the
/// promise jobs it queued.
///
/// Returning `Ok` only means the top-level statements finished; the
/// invocation itself is finished by `complete()`.
pub fn execute(context: &mut ExecutionContext, unit: &CodeUnit) -> Result<(), ExecutionFailure> {
    debug!(generation = context.generation(), "Evaluating code unit");

    context.with(|ctx| {
        let mut options = EvalOptions::default();
        options.strict = false;

        ctx.eval_with_options::<Value, _>(unit.source(), options)
            .catch(&ctx)
            .map(|_| ())
            .map_err(ExecutionFailure::from_caught)
    })?;

    context.run_pending_jobs();
    Ok(())
}
