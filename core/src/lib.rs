//! Core of `docmigrate`: cost accounting, admission, scheduling, durable
//! checkpoints, and the pipeline that ties them together.
//!
//! Collaborators (the AI service, discovery, retry policies) live in the
//! `docmigrate-plugins` crate and are wired in through [`context::ServicesFactory`].

pub mod api;
pub mod budget;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod lock;
pub mod pipeline;
pub mod planner;
pub mod state;
pub mod util;
