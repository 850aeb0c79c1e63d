//! Load-balanced Fargate service.
//!
//! Declares, per service: log group, task definition, ALB and service
//! security groups, internet-facing ALB, target group, HTTP listener and
//! the ECS service. The container definition is kept as a typed value so
//! environment variables can still be added after the service exists.

use super::cluster::ClusterHandle;
use super::role::Role;
use crate::core::config::ServiceConfig;
use crate::core::error::Result;
use crate::core::stack::Stack;
use crate::core::template::{kind, CfnResource, LogicalId, RemovalPolicy, Token};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use tracing::debug;

/// Placeholder image; the pipeline's first deployment replaces it.
pub const PLACEHOLDER_IMAGE: &str = "nginx:alpine";

/// Reference to a declared ECS service, enough for a deploy action.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceHandle {
    pub id: LogicalId,
    pub cluster_name: String,
    pub service_name: String,
}

/// The single container of a service's task definition.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    pub port: u16,
    pub environment: BTreeMap<String, Token>,
    /// Variable name → secret ARN
    pub secrets: BTreeMap<String, Token>,
    pub log_group: LogicalId,
    pub log_region: Token,
    pub stream_prefix: String,
}

impl ContainerDefinition {
    pub fn render(&self) -> Value {
        let environment: Vec<Value> = self
            .environment
            .iter()
            .map(|(name, value)| json!({ "Name": name, "Value": value }))
            .collect();
        let mut def = json!({
            "Name": self.name,
            "Image": self.image,
            "Essential": true,
            "PortMappings": [{ "ContainerPort": self.port, "Protocol": "tcp" }],
            "Environment": environment,
            "LogConfiguration": {
                "LogDriver": "awslogs",
                "Options": {
                    "awslogs-group": Token::reference(&self.log_group),
                    "awslogs-region": self.log_region,
                    "awslogs-stream-prefix": self.stream_prefix,
                }
            },
        });
        if !self.secrets.is_empty() {
            def["Secrets"] = Value::Array(
                self.secrets
                    .iter()
                    .map(|(name, arn)| json!({ "Name": name, "ValueFrom": arn }))
                    .collect(),
            );
        }
        def
    }
}

pub struct FargateServiceProps<'a> {
    pub cluster: &'a ClusterHandle,
    pub config: &'a ServiceConfig,
    pub task_role: &'a Role,
    pub execution_role: &'a Role,
    /// Layered over the configured environment; these win on conflict
    pub environment: BTreeMap<String, Token>,
    pub secrets: BTreeMap<String, Token>,
    pub log_retention_days: u32,
}

#[derive(Debug, Clone)]
pub struct FargateService {
    handle: ServiceHandle,
    task_definition: LogicalId,
    load_balancer: LogicalId,
    target_group: LogicalId,
    container: ContainerDefinition,
}

impl FargateService {
    /// Declare the service under logical IDs starting with `prefix`.
    pub fn declare(stack: &mut Stack, prefix: &str, props: FargateServiceProps<'_>) -> Result<Self> {
        let config = props.config;
        let network = &props.cluster.network;

        let log_group = stack.add_resource(
            format!("{}LogGroup", prefix),
            CfnResource::new(
                kind::LOG_GROUP,
                json!({
                    "LogGroupName": config.log_group_name,
                    "RetentionInDays": props.log_retention_days,
                }),
            )
            .with_removal(RemovalPolicy::Delete),
        )?;

        let mut environment: BTreeMap<String, Token> = config
            .environment_variables
            .iter()
            .map(|(k, v)| (k.clone(), Token::literal(v.clone())))
            .collect();
        environment.extend(props.environment);

        let container = ContainerDefinition {
            name: config.container_name.clone(),
            image: PLACEHOLDER_IMAGE.to_string(),
            port: config.container_port,
            environment,
            secrets: props.secrets,
            log_group: log_group.clone(),
            log_region: stack.env().region_token(),
            stream_prefix: config.service_name.clone(),
        };

        let task_definition = stack.add_resource(
            format!("{}TaskDefinition", prefix),
            CfnResource::new(
                kind::TASK_DEFINITION,
                json!({
                    "Family": config.family,
                    "Cpu": config.task_definition.cpu.to_string(),
                    "Memory": config.task_definition.memory_limit_mib.to_string(),
                    "NetworkMode": "awsvpc",
                    "RequiresCompatibilities": ["FARGATE"],
                    "TaskRoleArn": props.task_role.handle().arn(),
                    "ExecutionRoleArn": props.execution_role.handle().arn(),
                    "ContainerDefinitions": [container.render()],
                }),
            ),
        )?;

        let lb_sg = stack.add_resource(
            format!("{}LoadBalancerSecurityGroup", prefix),
            CfnResource::new(
                kind::SECURITY_GROUP,
                json!({
                    "GroupDescription": format!("Load balancer for {}", config.service_name),
                    "VpcId": network.vpc_id(),
                    "SecurityGroupIngress": [{
                        "IpProtocol": "tcp",
                        "FromPort": config.listener_port,
                        "ToPort": config.listener_port,
                        "CidrIp": "0.0.0.0/0",
                        "Description": "Allow from anyone on the listener port",
                    }],
                    "SecurityGroupEgress": [{ "IpProtocol": "-1", "CidrIp": "0.0.0.0/0" }],
                }),
            ),
        )?;

        let service_sg = stack.add_resource(
            format!("{}ServiceSecurityGroup", prefix),
            CfnResource::new(
                kind::SECURITY_GROUP,
                json!({
                    "GroupDescription": format!("Tasks of {}", config.service_name),
                    "VpcId": network.vpc_id(),
                    "SecurityGroupIngress": [{
                        "IpProtocol": "tcp",
                        "FromPort": config.container_port,
                        "ToPort": config.container_port,
                        "SourceSecurityGroupId": Token::get_att(&lb_sg, "GroupId"),
                        "Description": "Load balancer to target",
                    }],
                    "SecurityGroupEgress": [{ "IpProtocol": "-1", "CidrIp": "0.0.0.0/0" }],
                }),
            ),
        )?;

        let load_balancer = stack.add_resource(
            format!("{}LoadBalancer", prefix),
            CfnResource::new(
                kind::LOAD_BALANCER,
                json!({
                    "Type": "application",
                    "Scheme": "internet-facing",
                    "Subnets": network.public_subnet_ids(),
                    "SecurityGroups": [Token::get_att(&lb_sg, "GroupId")],
                }),
            ),
        )?;

        let hc = &config.health_check;
        let target_group = stack.add_resource(
            format!("{}TargetGroup", prefix),
            CfnResource::new(
                kind::TARGET_GROUP,
                json!({
                    "Port": config.container_port,
                    "Protocol": "HTTP",
                    "TargetType": "ip",
                    "VpcId": network.vpc_id(),
                    "HealthCheckEnabled": true,
                    "HealthCheckPath": hc.path,
                    "HealthCheckIntervalSeconds": hc.interval_seconds,
                    "HealthCheckTimeoutSeconds": hc.timeout_seconds,
                    "HealthyThresholdCount": hc.healthy_threshold_count,
                    "UnhealthyThresholdCount": hc.unhealthy_threshold_count,
                    "Matcher": { "HttpCode": hc.healthy_http_codes },
                }),
            ),
        )?;

        let listener = stack.add_resource(
            format!("{}Listener", prefix),
            CfnResource::new(
                kind::LISTENER,
                json!({
                    "LoadBalancerArn": Token::reference(&load_balancer),
                    "Port": config.listener_port,
                    "Protocol": "HTTP",
                    "DefaultActions": [{
                        "Type": "forward",
                        "TargetGroupArn": Token::reference(&target_group),
                    }],
                }),
            ),
        )?;

        let service = stack.add_resource(
            format!("{}Service", prefix),
            CfnResource::new(
                kind::SERVICE,
                json!({
                    "ServiceName": config.service_name,
                    "Cluster": props.cluster.reference(),
                    "LaunchType": "FARGATE",
                    "DesiredCount": config.desired_count,
                    "TaskDefinition": Token::reference(&task_definition),
                    "HealthCheckGracePeriodSeconds": hc.grace_period_seconds,
                    "DeploymentConfiguration": {
                        "MaximumPercent": 200,
                        "MinimumHealthyPercent": 50,
                    },
                    "NetworkConfiguration": {
                        "AwsvpcConfiguration": {
                            "AssignPublicIp": "DISABLED",
                            "Subnets": network.private_subnet_ids(),
                            "SecurityGroups": [Token::get_att(&service_sg, "GroupId")],
                        }
                    },
                    "LoadBalancers": [{
                        "ContainerName": config.container_name,
                        "ContainerPort": config.container_port,
                        "TargetGroupArn": Token::reference(&target_group),
                    }],
                }),
            ),
        )?;
        // Target group must be attached to a listener before the service binds to it
        stack.add_dependency(&service, &listener)?;
        // Tasks must not start before their grants are attached
        for role in [props.task_role, props.execution_role] {
            if let Some(policy) = role.policy_id() {
                stack.add_dependency(&service, policy)?;
            }
        }

        debug!(service = %config.service_name, "fargate service declared");
        Ok(Self {
            handle: ServiceHandle {
                id: service,
                cluster_name: props.cluster.name.clone(),
                service_name: config.service_name.clone(),
            },
            task_definition,
            load_balancer,
            target_group,
            container,
        })
    }

    pub fn handle(&self) -> &ServiceHandle {
        &self.handle
    }

    pub fn container(&self) -> &ContainerDefinition {
        &self.container
    }

    pub fn task_definition(&self) -> &LogicalId {
        &self.task_definition
    }

    pub fn target_group(&self) -> &LogicalId {
        &self.target_group
    }

    pub fn load_balancer_dns(&self) -> Token {
        Token::get_att(&self.load_balancer, "DNSName")
    }

    /// `http://<load balancer DNS>`
    pub fn url(&self) -> Token {
        Token::concat([Token::literal("http://"), self.load_balancer_dns()])
    }

    /// Set a container environment variable after declaration and
    /// re-render the task definition.
    pub fn add_environment_variable(
        &mut self,
        stack: &mut Stack,
        name: &str,
        value: Token,
    ) -> Result<()> {
        self.container.environment.insert(name.to_string(), value);
        stack.set_property(
            &self.task_definition,
            "ContainerDefinitions",
            json!([self.container.render()]),
        )?;
        debug!(container = %self.container.name, variable = name, "environment updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::networking::NetworkHandle;
    use crate::core::config::HealthCheckConfig;
    use crate::core::policy::{actions, principal, Statement};
    use crate::core::stack::StackEnv;

    fn cluster() -> ClusterHandle {
        ClusterHandle {
            id: LogicalId::new("Cluster"),
            name: "gara-cluster".to_string(),
            network: NetworkHandle {
                vpc: LogicalId::new("Vpc"),
                public_subnets: vec![LogicalId::new("Pub1")],
                private_subnets: vec![LogicalId::new("Priv1")],
                nat_gateways: vec![],
            },
        }
    }

    fn role(s: &mut Stack, id: &str, statements: &[&[&str]]) -> Role {
        let mut r = Role::new(s, id, principal::ECS_TASKS, None, &[]).unwrap();
        for granted in statements {
            r.add_to_policy(s, Statement::allow_any(granted)).unwrap();
        }
        r
    }

    fn declare_roles(
        config: &ServiceConfig,
        env: BTreeMap<String, Token>,
        task_actions: &[&[&str]],
        exec_actions: &[&[&str]],
    ) -> (Stack, FargateService) {
        let mut s = Stack::new("T", StackEnv::default());
        let c = cluster();
        let task = role(&mut s, "TaskRole", task_actions);
        let exec = role(&mut s, "ExecRole", exec_actions);
        let svc = FargateService::declare(
            &mut s,
            "Web",
            FargateServiceProps {
                cluster: &c,
                config,
                task_role: &task,
                execution_role: &exec,
                environment: env,
                secrets: BTreeMap::new(),
                log_retention_days: 7,
            },
        )
        .unwrap();
        (s, svc)
    }

    fn declare_with(config: &ServiceConfig, env: BTreeMap<String, Token>) -> (Stack, FargateService) {
        declare_roles(config, env, &[], &[])
    }

    fn env_of(s: &Stack, svc: &FargateService) -> BTreeMap<String, Value> {
        let td = s.resource(svc.task_definition()).unwrap();
        td.properties["ContainerDefinitions"][0]["Environment"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| (e["Name"].as_str().unwrap().to_string(), e["Value"].clone()))
            .collect()
    }

    #[test]
    fn test_fargate_task_definition_shape() {
        let config = ServiceConfig::new("fam", "web", 3000, "/ecs/web", "web-svc");
        let (s, svc) = declare_with(&config, BTreeMap::new());
        let td = s.resource(svc.task_definition()).unwrap();
        assert_eq!(td.properties["Cpu"], "512");
        assert_eq!(td.properties["Memory"], "1024");
        assert_eq!(td.properties["NetworkMode"], "awsvpc");
        let c = &td.properties["ContainerDefinitions"][0];
        assert_eq!(c["Image"], PLACEHOLDER_IMAGE);
        assert_eq!(c["PortMappings"][0]["ContainerPort"], 3000);
        assert_eq!(c["LogConfiguration"]["LogDriver"], "awslogs");
        assert!(c.get("Secrets").is_none());
    }

    #[test]
    fn test_fargate_health_check_field_for_field() {
        let mut config = ServiceConfig::new("fam", "web", 3000, "/ecs/web", "web-svc");
        config.health_check = HealthCheckConfig {
            path: "/health".to_string(),
            healthy_http_codes: "200".to_string(),
            interval_seconds: 30,
            timeout_seconds: 5,
            healthy_threshold_count: 3,
            unhealthy_threshold_count: 5,
            grace_period_seconds: 120,
        };
        let (s, svc) = declare_with(&config, BTreeMap::new());
        let tg = s.resource(svc.target_group()).unwrap();
        assert_eq!(tg.properties["HealthCheckPath"], "/health");
        assert_eq!(tg.properties["Matcher"]["HttpCode"], "200");
        assert_eq!(tg.properties["HealthCheckIntervalSeconds"], 30);
        assert_eq!(tg.properties["HealthCheckTimeoutSeconds"], 5);
        assert_eq!(tg.properties["HealthyThresholdCount"], 3);
        assert_eq!(tg.properties["UnhealthyThresholdCount"], 5);
        let service = s.resource(&svc.handle().id).unwrap();
        assert_eq!(service.properties["HealthCheckGracePeriodSeconds"], 120);
    }

    #[test]
    fn test_fargate_environment_layering() {
        let config = ServiceConfig::new("fam", "web", 3000, "/ecs/web", "web-svc")
            .with_env("PORT", "3000")
            .with_env("MODE", "base");
        let mut extra = BTreeMap::new();
        extra.insert("MODE".to_string(), Token::literal("override"));
        let (s, svc) = declare_with(&config, extra);
        let env = env_of(&s, &svc);
        assert_eq!(env["PORT"], "3000");
        assert_eq!(env["MODE"], "override");
    }

    #[test]
    fn test_fargate_late_environment_variable() {
        let config = ServiceConfig::new("fam", "web", 3000, "/ecs/web", "web-svc");
        let (mut s, mut svc) = declare_with(&config, BTreeMap::new());
        let url = svc.url();
        svc.add_environment_variable(&mut s, "PUBLIC_URL", url.clone())
            .unwrap();
        let env = env_of(&s, &svc);
        assert_eq!(&env["PUBLIC_URL"], url.as_value());
        assert_eq!(svc.container().environment["PUBLIC_URL"], url);
    }

    #[test]
    fn test_fargate_service_waits_for_listener() {
        let config = ServiceConfig::new("fam", "web", 3000, "/ecs/web", "web-svc");
        let (s, svc) = declare_with(&config, BTreeMap::new());
        let service = s.resource(&svc.handle().id).unwrap();
        assert_eq!(service.depends_on, vec![LogicalId::new("WebListener")]);
        assert_eq!(service.properties["LaunchType"], "FARGATE");
        assert_eq!(
            service.properties["NetworkConfiguration"]["AwsvpcConfiguration"]["Subnets"],
            json!([{"Ref": "Priv1"}])
        );
    }
    #[test]
    fn test_fargate_service_waits_for_role_policies() {
        let config = ServiceConfig::new("fam", "web", 3000, "/ecs/web", "web-svc");
        let (s, svc) = declare_roles(
            &config,
            BTreeMap::new(),
            &[actions::PUT_METRICS],
            &[actions::ECR_AUTH],
        );
        let service = s.resource(&svc.handle().id).unwrap();
        assert_eq!(
            service.depends_on,
            vec![
                LogicalId::new("WebListener"),
                LogicalId::new("TaskRoleDefaultPolicy"),
                LogicalId::new("ExecRoleDefaultPolicy"),
            ]
        );
    }
}
