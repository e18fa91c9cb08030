//! Idempotent, introspection-driven helpers for one-time database upgrades.
//!
//! Upgrade steps are written as [`UpgradePlan`]s: ordered lists of typed
//! directives (rename a column, merge two modules, remap values, ...). Each
//! operation re-inspects the catalog before acting, so re-running a step
//! after a partial failure is safe. Operations receive an explicit
//! [`Session`] and never manage transactions; [`run_plan`] wraps a whole
//! plan in one.

pub mod config;
pub mod directive;
pub mod error;
pub mod introspect;
pub mod metadata;
pub mod ops;
pub mod runner;
pub mod session;

pub use directive::{Directive, UpgradePlan};
pub use error::EvolveError;
pub use runner::{apply_plan, run_plan};
pub use session::{LoggedStatement, Session};
