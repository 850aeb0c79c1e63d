//! Core synthesis logic: template model, stack, config, resolution, planning.

pub mod buildspec;
pub mod composer;
pub mod config;
pub mod error;
pub mod hasher;
pub mod parser;
pub mod planner;
pub mod policy;
pub mod resolver;
pub mod stack;
pub mod state;
pub mod template;
