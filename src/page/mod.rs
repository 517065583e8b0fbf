//! In-process page: the live document the execution paths act on when no
//! real browser tab is attached.

mod csp;
mod dom;
mod html;
mod selector;

pub use csp::{BlockedKind, ContentSecurityPolicy, CspViolation};
pub use dom::{Document, DomError, DomResult, NodeId, ScriptRuntime};
