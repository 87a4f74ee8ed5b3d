//! logtrail: retention engine for a persisted application log store.
//!
//! Log records live in a [`store::LogStore`]. The [`retention`] engine
//! decides which of them are past their retention policy, archives them if
//! configured, and deletes them, either on a schedule or when asked through
//! the HTTP control surface in [`routes`].

pub mod config;
pub mod observability;
pub mod retention;
pub mod routes;
pub mod store;
