//! gara-synth: the Gara photo platform's AWS infrastructure as typed Rust.
//!
//! Constructs declare networking, storage, registries, IAM, two Fargate
//! services and their CI/CD pipelines into a single stack, which synthesizes
//! to a dependency-ordered CloudFormation template.

pub mod cli;
pub mod constructs;
pub mod core;
