//! Execution contexts
//!
//! Each invocation runs in its own QuickJS runtime and context, so globals,
//! the `require` cache, timers and pending jobs all vanish with it. The
//! [`ContextFactory`] builds contexts from a read-only [`Capabilities`] set
//! shared across invocations.

use rquickjs::{CatchResultExt, Context, Ctx, Function, Object, Runtime};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::failure::ExecutionFailure;
use crate::modules::ModuleLoader;
use crate::output::Output;
use crate::signal::{completion_channel, CompletionSignal};
use crate::timers::{SharedTimers, TimerQueue};
use crate::{console, modules, timers};

/// Ambient capabilities injected into every context, never mutated after startup
#[derive(Debug)]
pub struct Capabilities {
    env: BTreeMap<String, String>,
    module_root: PathBuf,
    output: Output,
}

impl Capabilities {
    pub fn new(env: BTreeMap<String, String>, module_root: PathBuf, output: Output) -> Self {
        Self {
            env,
            module_root,
            output,
        }
    }

    /// The `process.env` snapshot
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn module_root(&self) -> &Path {
        &self.module_root
    }

    pub fn output(&self) -> &Output {
        &self.output
    }
}

/// Builds a fresh [`ExecutionContext`] per invocation
#[derive(Debug)]
pub struct ContextFactory {
    capabilities: Arc<Capabilities>,
    next_generation: u64,
}

impl ContextFactory {
    pub fn new(capabilities: Arc<Capabilities>) -> Self {
        Self {
            capabilities,
            next_generation: 1,
        }
    }

    pub fn capabilities(&self) -> &Arc<Capabilities> {
        &self.capabilities
    }

    /// Construct a new isolated context with all capabilities installed
    pub fn create(&mut self) -> Result<ExecutionContext, EngineError> {
        let generation = self.next_generation;
        self.next_generation += 1;

        let runtime = Runtime::new().map_err(|e| EngineError::runtime(&e))?;
        let context = Context::full(&runtime).map_err(|e| EngineError::runtime(&e))?;
        let timer_queue: SharedTimers = Rc::new(RefCell::new(TimerQueue::new()));
        let (trigger, completion) = completion_channel(generation);

        context.with(|ctx| -> Result<(), EngineError> {
            let caps = &self.capabilities;

            install(&ctx, "console", |ctx| console::install(ctx, caps.output().clone()))?;
            install(&ctx, "complete", |ctx| {
                let trigger = trigger.clone();
                let complete = Function::new(ctx.clone(), move || {
                    trigger.fire();
                })?
                .with_name("complete")?;
                ctx.globals().set("complete", complete)
            })?;
            install(&ctx, "timers", |ctx| timers::install(ctx, &timer_queue))?;
            install(&ctx, "process", |ctx| install_process(ctx, caps))?;
            install(&ctx, "require", |ctx| {
                modules::install(ctx, ModuleLoader::new(caps.module_root()))
            })?;
            Ok(())
        })?;

        debug!(generation, "Created execution context");

        Ok(ExecutionContext {
            generation,
            timers: timer_queue,
            completion,
            context,
            runtime,
        })
    }
}

fn install<'js>(
    ctx: &Ctx<'js>,
    capability: &'static str,
    installer: impl FnOnce(&Ctx<'js>) -> rquickjs::Result<()>,
) -> Result<(), EngineError> {
    installer(ctx)
        .catch(ctx)
        .map_err(|error| EngineError::Capability {
            capability,
            message: ExecutionFailure::from_caught(error).to_string(),
        })
}

const PROCESS_EXTRAS: &str = r#"
(function (process) {
    var slice = Array.prototype.slice;

    globalThis.global = globalThis;

    globalThis.queueMicrotask = function (callback) {
        if (typeof callback !== "function") {
            throw new TypeError('The "callback" argument must be of type function');
        }
        Promise.resolve().then(function () {
            callback();
        });
    };

    process.nextTick = function (callback) {
        var args = slice.call(arguments, 1);
        Promise.resolve().then(function () {
            callback.apply(undefined, args);
        });
    };

    globalThis.process = process;
})
"#;

fn install_process<'js>(ctx: &Ctx<'js>, caps: &Capabilities) -> rquickjs::Result<()> {
    let process = Object::new(ctx.clone())?;

    let env = Object::new(ctx.clone())?;
    for (key, value) in caps.env() {
        env.set(key.as_str(), value.as_str())?;
    }
    process.set("env", env)?;
    process.set("platform", node_platform())?;
    process.set("argv", vec!["terrable".to_string()])?;

    let cwd = caps.module_root().display().to_string();
    process.set("cwd", Function::new(ctx.clone(), move || cwd.clone())?)?;

    let extras: Function<'js> = ctx.eval(PROCESS_EXTRAS)?;
    extras.call((process,))
}

/// Platform names as Node reports them
fn node_platform() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// One isolated context, live for exactly one invocation
pub struct ExecutionContext {
    generation: u64,
    timers: SharedTimers,
    completion: CompletionSignal,
    // drop order: context before runtime
    context: Context,
    runtime: Runtime,
}

impl ExecutionContext {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn with<R>(&self, f: impl FnOnce(Ctx<'_>) -> R) -> R {
        self.context.with(f)
    }

    /// Whether `complete()` has been called in this context
    pub fn is_complete(&mut self) -> bool {
        self.completion.has_fired()
    }

    /// Drain queued promise jobs, stopping early once the invocation completed
    pub fn run_pending_jobs(&mut self) {
        while !self.is_complete() {
            match self.runtime.execute_pending_job() {
                Ok(true) => {}
                Ok(false) => break,
                Err(_) => {
                    warn!(generation = self.generation, "Pending job raised an exception");
                }
            }
        }
    }

    /// Fire every timer due at `now`, draining jobs after each callback.
    ///
    /// A callback that throws is reported as a failure of the invocation.
    pub fn run_due_timers(&mut self, now: Instant) -> Result<(), ExecutionFailure> {
        while !self.is_complete() {
            let Some(callback) = self.timers.borrow_mut().pop_due(now) else {
                break;
            };

            self.with(|ctx| {
                let callback = callback
                    .restore(&ctx)
                    .map_err(|error| ExecutionFailure::from_pending(&ctx, error))?;
                callback
                    .call::<_, ()>(())
                    .catch(&ctx)
                    .map_err(ExecutionFailure::from_caught)
            })?;

            self.run_pending_jobs();
        }
        Ok(())
    }

    pub fn next_timer_deadline(&self) -> Option<Instant> {
        self.timers.borrow().next_deadline()
    }

    /// Whether anything queued could still run (and call `complete()`)
    pub fn has_pending_work(&self) -> bool {
        !self.timers.borrow().is_empty() || self.runtime.is_job_pending()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.borrow().len()
    }
}

impl Drop for ExecutionContext {
    fn drop(&mut self) {
        // Persistent callbacks must be released while the runtime is alive
        self.timers.borrow_mut().clear();
        debug!(generation = self.generation, "Discarded execution context");
    }
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("generation", &self.generation)
            .field("pending_timers", &self.pending_timers())
            .finish_non_exhaustive()
    }
}
