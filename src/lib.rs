//! Bastion - community platform for game servers
//!
//! Wiki, news, a social feed and moderation tooling behind one HTTP API,
//! with per-prefix resource gating.

#[macro_use]
pub mod db;

pub mod api;
pub mod cache;
pub mod config;
pub mod models;
pub mod services;
