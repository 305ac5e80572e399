//! Warden - model/policy driven authorization gate
//!
//! The `authz` module is the enforcement engine and has no web dependency
//! beyond its optional `authz::web` gate middleware. `settings` and `web` wire
//! it into a standalone server.

pub mod authz;
pub mod settings;
pub mod web;
