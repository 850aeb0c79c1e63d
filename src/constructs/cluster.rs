//! ECS cluster hosting both services.

use super::networking::NetworkHandle;
use crate::core::config::EcsClusterConfig;
use crate::core::error::Result;
use crate::core::stack::Stack;
use crate::core::template::{kind, CfnResource, LogicalId, Token};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterHandle {
    pub id: LogicalId,
    pub name: String,
    pub network: NetworkHandle,
}

impl ClusterHandle {
    pub fn reference(&self) -> Token {
        Token::reference(&self.id)
    }
}

pub fn declare(
    stack: &mut Stack,
    config: &EcsClusterConfig,
    network: &NetworkHandle,
) -> Result<ClusterHandle> {
    let insights = if config.enable_container_insights {
        "enabled"
    } else {
        "disabled"
    };
    let id = stack.add_resource(
        "EcsCluster",
        CfnResource::new(
            kind::CLUSTER,
            json!({
                "ClusterName": config.cluster_name,
                "ClusterSettings": [{ "Name": "containerInsights", "Value": insights }],
            }),
        ),
    )?;
    debug!(cluster = %config.cluster_name, insights, "cluster declared");
    Ok(ClusterHandle {
        id,
        name: config.cluster_name.clone(),
        network: network.clone(),
    })
}
