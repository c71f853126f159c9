//! impalac-util - Foundation types for the Impala front end.
//!
//! This crate holds the utilities every compiler phase builds on:
//!
//! - [`span`]: source locations ([`Span`], [`FileId`])
//! - [`symbol`]: the global string interner ([`Symbol`])
//! - [`index_vec`]: typed indices ([`Idx`], [`IndexVec`], [`define_idx!`])
//! - [`ids`]: the shared handle types ([`DefId`], [`TypeId`])
//! - [`diagnostic`]: error reporting ([`Handler`], [`DiagnosticBuilder`])
//!
//! Everything here is deliberately free of front-end semantics so that the
//! AST and the semantic analyzer can both depend on it without cycles.

pub mod diagnostic;
pub mod ids;
pub mod index_vec;
pub mod span;
pub mod symbol;

pub use diagnostic::{Diagnostic, DiagnosticBuilder, DiagnosticCode, Handler, Level};
pub use ids::{DefId, TypeId};
pub use index_vec::{Idx, IndexVec};
pub use span::{FileId, Span};
pub use symbol::Symbol;

// Re-export the hash maps used throughout the compiler.
pub use rustc_hash::{FxHashMap, FxHashSet};
