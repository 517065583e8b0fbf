//! Execution safety layer for generated page-modification code.
//!
//! Generated snippets are sanitized, matched against a closed whitelist of
//! DOM operations and, when recognised, performed through restricted DOM
//! calls that no page Content-Security-Policy can block. Anything else is
//! escalated to script-element injection, exactly once.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod matcher;
pub mod page;
pub mod protocol;
pub mod session;
pub mod snippet;
pub mod storage;

pub use coordinator::{Coordinator, ExecutionOutcome, ExecutionReport, Stage};
pub use error::{ExecutionFault, PagetweakError, Result};
pub use snippet::{sanitize, SanitizedSnippet, Snippet};
