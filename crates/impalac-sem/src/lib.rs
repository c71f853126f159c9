//! impalac-sem - Semantic analysis for the Impala front end.
//!
//! This crate takes the AST the parser produced and makes it mean
//! something: every identifier is resolved to its declaration, every
//! expression gets a type, and every constraint the language imposes is
//! either satisfied or reported.
//!
//! The pieces, leaves first:
//!
//! - [`ty::TypeTable`] - a hash-consing interner of type terms with
//!   unification, beta-reduction of type-level applications, cross-table
//!   rebuilding, and the subtype relation.
//! - [`traits::TraitRegistry`] - trait declarations, their bound variables
//!   and method signatures, canonical trait instances, and recorded impls.
//! - [`scope::ScopeTable`] - the stack of lexical frames behind name
//!   resolution.
//! - [`check::TypeCheck`] - the tree walk that ties the three together,
//!   caching resolved types and declarations on the AST and accumulating
//!   diagnostics.
//!
//! The entry point is [`check_module`]:
//!
//! ```
//! use impalac_ast::Module;
//! use impalac_sem::check_module;
//! use impalac_util::Handler;
//!
//! let module = Module::new(vec![]);
//! let handler = Handler::new();
//! assert!(check_module(&module, &handler));
//! ```
//!
//! Checking never aborts on a recoverable error: offending nodes get the
//! absorbing error type and the walk continues, so one run reports as many
//! independent problems as it can find. A fresh [`ty::TypeTable`] is used
//! per compilation unit; on success it is handed to the emitter together
//! with the typed AST.

pub mod check;
pub mod scope;
pub mod traits;
pub mod ty;

pub use check::{check_module, DefInfo, DefKind, TypeCheck};
pub use scope::ScopeTable;
pub use traits::{TraitError, TraitId, TraitInstanceId, TraitRegistry};
pub use ty::{PrimTy, TypeKind, TypeTable};
