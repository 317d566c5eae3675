//! terrable execution engine
//!
//! Reads newline-terminated JavaScript code units from a control channel and
//! runs each one in a freshly built QuickJS context. Handler code signals the
//! end of an invocation by calling `complete()`; the engine then prints
//! `CODE_EXECUTION_COMPLETE`, throws the context away and starts the next
//! buffered unit. Synchronous failures are reported with a diagnostic and a
//! 500 Result Envelope and complete the invocation the same way.
//!
//! Orchestrators must frame multi-line source with
//! [`terrable_core::encode_code_unit`]; a raw `\n` ends the unit.

pub mod buffer;
pub mod console;
pub mod context;
pub mod engine;
pub mod error;
pub mod executor;
pub mod failure;
pub mod modules;
pub mod output;
pub mod signal;
pub mod timers;

pub use buffer::{CodeUnit, InvocationBuffer};
pub use context::{Capabilities, ContextFactory, ExecutionContext};
pub use engine::{Engine, EngineConfig, EngineState};
pub use error::EngineError;
pub use failure::{ExecutionFailure, FailureKind, FailureReporter};
pub use modules::{ModuleError, ModuleLoader};
pub use output::{Output, SharedBuffer, Stream};
