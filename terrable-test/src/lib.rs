//! Test utilities for terrable
//!
//! Drives the engine binary the way an orchestrator does:
//! - Spawn the engine as a subprocess with piped stdio
//! - Write one framed code unit per invocation
//! - Read stdout until `CODE_EXECUTION_COMPLETE`
//! - Extract the Result Envelope from the captured lines
//!
//! ## Usage
//!
//! ```rust,no_run
//! use terrable_test::EngineProcess;
//!
//! #[tokio::test]
//! async fn test_complete() {
//!     let mut engine = EngineProcess::spawn("target/debug/terrable", ["--clear-env"])
//!         .await
//!         .unwrap();
//!
//!     let execution = engine.execute("console.log('hi'); complete();").await.unwrap();
//!     assert_eq!(execution.lines, vec!["hi"]);
//! }
//! ```

pub mod process;

pub use process::{ClientError, EngineProcess, Execution};

/// How long to wait for a completion marker before giving up
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
