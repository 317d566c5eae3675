//! The engine state machine
//!
//! One [`Engine`] serves a whole control channel. It owns the invocation
//! buffer, the live execution context and the context factory, and it moves
//! through `Idle -> Receiving -> Executing -> (AwaitingAsyncCompletion ->
//! Completing | Failing) -> Idle` once per code unit. Input arriving while an
//! invocation is live stays buffered until the completion marker went out.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use terrable_core::InvocationId;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, info_span, warn, Span};

use crate::buffer::{CodeUnit, InvocationBuffer};
use crate::context::{Capabilities, ContextFactory, ExecutionContext};
use crate::error::EngineError;
use crate::executor::execute;
use crate::failure::{ExecutionFailure, FailureReporter};
use crate::output::Output;
use crate::signal::emit_completion;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Resolved engine settings
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Snapshot exposed as `process.env`
    pub environment: BTreeMap<String, String>,
    /// Base directory for `require` and `process.cwd()`
    pub module_root: PathBuf,
    /// Print a 500 Result Envelope when a code unit fails
    pub envelope_on_failure: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: BTreeMap::new(),
            module_root: PathBuf::from("."),
            envelope_on_failure: true,
        }
    }
}

/// Where the engine is in the lifecycle of the current invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Waiting for input, nothing buffered
    Idle,
    /// Part of a code unit arrived, no newline yet
    Receiving,
    /// Top-level statements of a code unit are running
    Executing,
    /// The code unit returned without calling `complete()`
    AwaitingAsyncCompletion,
    /// `complete()` fired; marker and rotation in progress
    Completing,
    /// A failure is being reported; marker and rotation follow
    Failing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Receiving => "receiving",
            Self::Executing => "executing",
            Self::AwaitingAsyncCompletion => "awaiting_async_completion",
            Self::Completing => "completing",
            Self::Failing => "failing",
        };
        f.write_str(name)
    }
}

/// Isolated execution engine
pub struct Engine {
    state: EngineState,
    buffer: InvocationBuffer,
    factory: ContextFactory,
    context: ExecutionContext,
    output: Output,
    reporter: FailureReporter,
    span: Span,
    completed: u64,
}

impl Engine {
    /// Build an engine and its first execution context
    pub fn new(config: EngineConfig, output: Output) -> Result<Self, EngineError> {
        let reporter = FailureReporter::new(output.clone(), config.envelope_on_failure);
        let capabilities = Capabilities::new(config.environment, config.module_root, output.clone());
        let mut factory = ContextFactory::new(Arc::new(capabilities));
        let context = factory.create()?;

        Ok(Self {
            state: EngineState::Idle,
            buffer: InvocationBuffer::new(),
            factory,
            context,
            output,
            reporter,
            span: Span::none(),
            completed: 0,
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Generation of the live execution context
    pub fn generation(&self) -> u64 {
        self.context.generation()
    }

    /// Number of invocations that emitted their completion marker
    pub fn completed(&self) -> u64 {
        self.completed
    }

    /// Serve `input` until it closes and nothing is left to run.
    pub async fn run<R>(&mut self, mut input: R) -> Result<(), EngineError>
    where
        R: AsyncRead + Unpin,
    {
        info!(
            module_root = %self.factory.capabilities().module_root().display(),
            env_vars = self.factory.capabilities().env().len(),
            "Engine ready"
        );

        let mut chunk = vec![0u8; READ_CHUNK_SIZE];
        let mut input_open = true;

        loop {
            let deadline = self.next_timer_deadline();

            if !input_open && !self.has_pending_work() {
                self.close_input();
                return Ok(());
            }

            tokio::select! {
                read = input.read(&mut chunk), if input_open => {
                    let read = read?;
                    if read == 0 {
                        debug!(state = %self.state, "Control channel closed");
                        input_open = false;
                    } else {
                        self.feed(&chunk[..read])?;
                    }
                }
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.fire_timers(Instant::now())?;
                }
                else => {
                    self.close_input();
                    return Ok(());
                }
            }
        }
    }

    /// Append a raw chunk from the control channel and run whatever became
    /// runnable.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<(), EngineError> {
        self.buffer.push(chunk);
        if self.state == EngineState::Idle {
            self.state = EngineState::Receiving;
        }
        self.dispatch()
    }

    /// Fire the live context's timers due at `now`
    pub fn fire_timers(&mut self, now: Instant) -> Result<(), EngineError> {
        if self.state != EngineState::AwaitingAsyncCompletion {
            return Ok(());
        }

        let span = self.span.clone();
        let outcome = span.in_scope(|| self.context.run_due_timers(now));
        match outcome {
            Err(failure) => span.in_scope(|| self.fail(&failure))?,
            Ok(()) => {
                if self.context.is_complete() {
                    span.in_scope(|| self.finish())?;
                }
            }
        }

        self.dispatch()
    }

    /// Earliest timer of a live invocation
    pub fn next_timer_deadline(&self) -> Option<Instant> {
        match self.state {
            EngineState::AwaitingAsyncCompletion => self.context.next_timer_deadline(),
            _ => None,
        }
    }

    /// Whether the live invocation still has queued work that could call
    /// `complete()`
    pub fn has_pending_work(&self) -> bool {
        self.state == EngineState::AwaitingAsyncCompletion && self.context.has_pending_work()
    }

    /// Start buffered code units while the gate is open
    fn dispatch(&mut self) -> Result<(), EngineError> {
        while matches!(self.state, EngineState::Idle | EngineState::Receiving) {
            let Some(unit) = self.buffer.take_unit() else {
                self.state = if self.buffer.pending_len() == 0 {
                    EngineState::Idle
                } else {
                    EngineState::Receiving
                };
                break;
            };
            self.start(&unit)?;
        }
        Ok(())
    }

    fn start(&mut self, unit: &CodeUnit) -> Result<(), EngineError> {
        let invocation_id = InvocationId::new();
        self.span = info_span!(
            "invocation",
            generation = self.context.generation(),
            invocation_id = %invocation_id.short()
        );
        let span = self.span.clone();
        let _enter = span.enter();

        info!(
            code_sha256 = unit.code_sha256(),
            code_size = unit.len(),
            "Executing code unit"
        );
        self.state = EngineState::Executing;

        if let Err(failure) = execute(&mut self.context, unit) {
            return self.fail(&failure);
        }

        if self.context.is_complete() {
            self.finish()
        } else {
            self.state = EngineState::AwaitingAsyncCompletion;
            debug!(
                pending_timers = self.context.pending_timers(),
                "Awaiting asynchronous completion"
            );
            Ok(())
        }
    }

    fn fail(&mut self, failure: &ExecutionFailure) -> Result<(), EngineError> {
        if self.context.is_complete() {
            self.reporter.report_late(failure)?;
        } else {
            self.state = EngineState::Failing;
            self.reporter.report(failure)?;
        }
        self.finish()
    }

    /// Emit the marker, drop the in-flight unit and rotate the context
    fn finish(&mut self) -> Result<(), EngineError> {
        if self.state != EngineState::Failing {
            self.state = EngineState::Completing;
        }

        emit_completion(&self.output)?;
        self.buffer.reset();
        self.completed += 1;

        let retired = self.context.generation();
        self.context = self.factory.create()?;
        info!(
            retired,
            generation = self.context.generation(),
            "Invocation complete"
        );

        self.span = Span::none();
        self.state = EngineState::Idle;
        Ok(())
    }

    fn close_input(&self) {
        match self.state {
            EngineState::AwaitingAsyncCompletion => warn!(
                generation = self.context.generation(),
                "Control channel closed while an invocation can no longer complete"
            ),
            EngineState::Receiving => warn!(
                pending_bytes = self.buffer.pending_len(),
                "Control channel closed with an unterminated code unit"
            ),
            _ => {}
        }
        info!(completed = self.completed, "Engine stopped");
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("state", &self.state)
            .field("generation", &self.context.generation())
            .field("completed", &self.completed)
            .finish_non_exhaustive()
    }
}
