//! Resource constructs. Each declares a group of related resources into a
//! [`Stack`](crate::core::stack::Stack) and hands back typed handles.

pub mod cicd_pipeline;
pub mod cluster;
pub mod fargate_service;
pub mod iam_roles;
pub mod networking;
pub mod registry;
pub mod role;
pub mod secrets;
pub mod storage;
pub mod trigger;
