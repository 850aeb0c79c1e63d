//! Configuration tree for the Gara infrastructure.
//!
//! Every record carries deployment-meaningful defaults, so
//! `GaraConfig::default()` yields a configuration that synthesizes into a
//! deployable template. Records are plain data: nothing here validates
//! parameter ranges, that is left to CloudFormation at deploy time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Networking
// ============================================================================

/// VPC layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VpcConfig {
    /// Number of availability zones to spread subnets across
    pub max_azs: u32,

    /// NAT gateways for private-subnet egress (capped at `max_azs`)
    pub nat_gateways: u32,

    /// Prefix length of each public subnet
    pub public_subnet_cidr_mask: u8,

    /// Prefix length of each private subnet
    pub private_subnet_cidr_mask: u8,

    /// `Name` tag of the VPC
    pub vpc_name: String,

    /// Address space of the VPC
    pub cidr: String,
}

impl Default for VpcConfig {
    fn default() -> Self {
        Self {
            max_azs: 2,
            nat_gateways: 1,
            public_subnet_cidr_mask: 24,
            private_subnet_cidr_mask: 24,
            vpc_name: "gara-vpc".to_string(),
            cidr: "10.0.0.0/16".to_string(),
        }
    }
}

/// Host bits left by a prefix length.
pub fn host_bits(prefix_len: u8) -> u32 {
    32u32.saturating_sub(u32::from(prefix_len))
}

impl VpcConfig {
    /// Prefix length of `cidr`, if it is a well-formed block.
    pub fn prefix_len(&self) -> Option<u8> {
        let (_, len) = self.cidr.rsplit_once('/')?;
        len.parse().ok().filter(|l| *l <= 32)
    }

    /// Public subnets take the first `max_azs` public-sized blocks. Private
    /// subnets start at this index of a carve of private-sized blocks, the
    /// first one clear of every public subnet.
    pub fn private_block_offset(&self) -> u64 {
        let public_span = u64::from(self.max_azs) << host_bits(self.public_subnet_cidr_mask);
        let block = 1u64 << host_bits(self.private_subnet_cidr_mask);
        public_span.div_ceil(block)
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Image bucket and album table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct StorageConfig {
    /// Bucket name prefix; account and region are appended
    pub s3_bucket_prefix: String,

    /// Table name prefix; account and region are appended
    pub dynamodb_table_prefix: String,

    /// Table partition key (string)
    pub partition_key: String,

    /// Secondary index partition key (string)
    pub gsi_partition_key: String,

    /// Secondary index sort key (number)
    pub gsi_sort_key: String,

    /// Secondary index name
    pub gsi_name: String,

    /// Retention of the service log groups
    pub log_retention_days: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            s3_bucket_prefix: "gara-images".to_string(),
            dynamodb_table_prefix: "gara-albums".to_string(),
            partition_key: "AlbumId".to_string(),
            gsi_partition_key: "Published".to_string(),
            gsi_sort_key: "CreatedAt".to_string(),
            gsi_name: "PublishedIndex".to_string(),
            log_retention_days: 7,
        }
    }
}

/// ECR repository names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ContainerRegistryConfig {
    pub backend_repo_name: String,
    pub frontend_repo_name: String,
}

impl Default for ContainerRegistryConfig {
    fn default() -> Self {
        Self {
            backend_repo_name: "gara-image-app".to_string(),
            frontend_repo_name: "gara-frontend-app".to_string(),
        }
    }
}

// ============================================================================
// Compute
// ============================================================================

/// ECS cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct EcsClusterConfig {
    pub cluster_name: String,

    /// Toggle Container Insights on the cluster
    pub enable_container_insights: bool,
}

impl Default for EcsClusterConfig {
    fn default() -> Self {
        Self {
            cluster_name: "gara-cluster".to_string(),
            enable_container_insights: true,
        }
    }
}

/// Fargate task sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TaskDefinitionConfig {
    /// CPU units (1024 = one vCPU)
    pub cpu: u32,
    pub memory_limit_mib: u32,
}

impl Default for TaskDefinitionConfig {
    fn default() -> Self {
        Self {
            cpu: 512,
            memory_limit_mib: 1024,
        }
    }
}

/// Target-group health check policy, applied verbatim to the load balancer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HealthCheckConfig {
    pub path: String,

    /// Accepted status codes, e.g. `200-399`
    pub healthy_http_codes: String,
    pub interval_seconds: u32,
    pub timeout_seconds: u32,
    pub healthy_threshold_count: u32,
    pub unhealthy_threshold_count: u32,

    /// Seconds after task start before failed checks count against the service
    pub grace_period_seconds: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            healthy_http_codes: "200-399".to_string(),
            interval_seconds: 60,
            timeout_seconds: 10,
            healthy_threshold_count: 2,
            unhealthy_threshold_count: 3,
            grace_period_seconds: 60,
        }
    }
}

/// One load-balanced Fargate service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceConfig {
    pub family: String,
    pub container_name: String,
    pub container_port: u16,
    pub log_group_name: String,
    pub service_name: String,

    #[serde(default = "default_desired_count")]
    pub desired_count: u32,

    #[serde(default = "default_listener_port")]
    pub listener_port: u16,

    #[serde(default)]
    pub task_definition: TaskDefinitionConfig,

    #[serde(default)]
    pub health_check: HealthCheckConfig,

    /// Base container environment; composer-supplied values override these
    #[serde(default)]
    pub environment_variables: BTreeMap<String, String>,
}

fn default_desired_count() -> u32 {
    1
}

fn default_listener_port() -> u16 {
    80
}

impl ServiceConfig {
    /// A service with the given identity and default sizing, health check,
    /// and an empty environment.
    pub fn new(
        family: impl Into<String>,
        container_name: impl Into<String>,
        container_port: u16,
        log_group_name: impl Into<String>,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            family: family.into(),
            container_name: container_name.into(),
            container_port,
            log_group_name: log_group_name.into(),
            service_name: service_name.into(),
            desired_count: default_desired_count(),
            listener_port: default_listener_port(),
            task_definition: TaskDefinitionConfig::default(),
            health_check: HealthCheckConfig::default(),
            environment_variables: BTreeMap::new(),
        }
    }

    /// Add a base environment variable.
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment_variables.insert(name.into(), value.into());
        self
    }
}

// ============================================================================
// CI/CD
// ============================================================================

/// GitHub repository a pipeline pulls from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GitHubSourceConfig {
    pub owner: String,
    pub repo: String,

    #[serde(default = "default_branch")]
    pub branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

impl GitHubSourceConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            branch: default_branch(),
        }
    }
}

/// CodeBuild project settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CodeBuildConfig {
    pub project_name: String,

    #[serde(default = "default_build_image")]
    pub build_image: String,

    /// Docker-in-docker needs privileged mode
    #[serde(default = "default_true")]
    pub privileged: bool,

    #[serde(default = "default_build_timeout")]
    pub timeout_minutes: u32,

    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,

    /// Build environment variable holding the repository URI
    #[serde(default = "default_repository_uri_variable")]
    pub repository_uri_variable: String,
}

fn default_build_image() -> String {
    "aws/codebuild/standard:7.0".to_string()
}

fn default_true() -> bool {
    true
}

fn default_build_timeout() -> u32 {
    30
}

fn default_clone_depth() -> u32 {
    1
}

fn default_repository_uri_variable() -> String {
    "ECR_REPOSITORY_URI".to_string()
}

impl CodeBuildConfig {
    pub fn new(project_name: impl Into<String>) -> Self {
        Self {
            project_name: project_name.into(),
            build_image: default_build_image(),
            privileged: true,
            timeout_minutes: default_build_timeout(),
            clone_depth: default_clone_depth(),
            repository_uri_variable: default_repository_uri_variable(),
        }
    }
}

/// Source → build → deploy pipeline for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    pub pipeline_name: String,
    pub github_source: GitHubSourceConfig,
    pub codebuild: CodeBuildConfig,

    /// Container the deploy stage updates; must match the service's container
    pub container_name: String,

    /// Manifest written by the build and consumed by the deploy stage
    pub image_definitions_file: String,

    #[serde(default = "default_deployment_timeout")]
    pub deployment_timeout_minutes: u32,
}

fn default_deployment_timeout() -> u32 {
    10
}

impl PipelineConfig {
    pub fn new(
        pipeline_name: impl Into<String>,
        github_source: GitHubSourceConfig,
        codebuild: CodeBuildConfig,
        container_name: impl Into<String>,
        image_definitions_file: impl Into<String>,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            github_source,
            codebuild,
            container_name: container_name.into(),
            image_definitions_file: image_definitions_file.into(),
            deployment_timeout_minutes: default_deployment_timeout(),
        }
    }
}

// ============================================================================
// Secrets and IAM
// ============================================================================

/// Names of secrets that must exist before deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SecretsConfig {
    pub github_token_secret_name: String,

    /// JSON key holding the token inside the GitHub secret
    pub github_token_json_key: String,
    pub api_key_secret_name: String,

    /// Environment variable the frontend receives the API key under
    pub api_key_env_name: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            github_token_secret_name: "GithubToken".to_string(),
            github_token_json_key: "github".to_string(),
            api_key_secret_name: "gara-api-key".to_string(),
            api_key_env_name: "GARA_API_KEY".to_string(),
        }
    }
}

/// IAM role names and metric namespaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct IamConfig {
    pub backend_task_role_name: String,
    pub frontend_task_role_name: String,
    pub backend_execution_role_name: String,
    pub frontend_execution_role_name: String,
    pub codebuild_role_name: String,
    pub backend_metrics_namespace: String,
    pub frontend_metrics_namespace: String,
}

impl Default for IamConfig {
    fn default() -> Self {
        Self {
            backend_task_role_name: "gara-backend-task-role".to_string(),
            frontend_task_role_name: "gara-frontend-task-role".to_string(),
            backend_execution_role_name: "gara-backend-task-execution-role".to_string(),
            frontend_execution_role_name: "gara-frontend-task-execution-role".to_string(),
            codebuild_role_name: "gara-codebuild-role".to_string(),
            backend_metrics_namespace: "GaraImage".to_string(),
            frontend_metrics_namespace: "GaraFrontend".to_string(),
        }
    }
}

// ============================================================================
// Root
// ============================================================================

/// Root configuration, one per deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GaraConfig {
    pub vpc: VpcConfig,
    pub storage: StorageConfig,
    pub container_registry: ContainerRegistryConfig,
    pub ecs_cluster: EcsClusterConfig,
    pub backend_service: ServiceConfig,
    pub frontend_service: ServiceConfig,
    pub backend_pipeline: PipelineConfig,
    pub frontend_pipeline: PipelineConfig,
    pub secrets: SecretsConfig,
    pub iam: IamConfig,
}

impl Default for GaraConfig {
    fn default() -> Self {
        let backend_service = ServiceConfig::new(
            "gara-backend-task",
            "gara-image-container",
            8080,
            "/ecs/gara-image",
            "gara-image-service",
        )
        .with_env("PORT", "8080")
        .with_env("LOG_LEVEL", "info")
        .with_env("LOG_FORMAT", "json");

        let frontend_service = ServiceConfig::new(
            "gara-frontend-task",
            "gara-frontend-container",
            80,
            "/ecs/gara-frontend",
            "gara-frontend-service",
        )
        .with_env("NEXTAUTH_SECRET", "change-me-in-production");

        let backend_pipeline = PipelineConfig::new(
            "gara-backend-pipeline",
            GitHubSourceConfig::new("anhydrous99", "gara-image"),
            CodeBuildConfig::new("gara-image-build"),
            "gara-image-container",
            "gara-image-definitions.json",
        );

        let mut frontend_build = CodeBuildConfig::new("gara-frontend-build");
        frontend_build.repository_uri_variable = "FRONTEND_ECR_REPOSITORY_URI".to_string();
        let frontend_pipeline = PipelineConfig::new(
            "gara-frontend-pipeline",
            GitHubSourceConfig::new("anhydrous99", "gara-frontend"),
            frontend_build,
            "gara-frontend-container",
            "gara-frontend-definitions.json",
        );

        Self {
            vpc: VpcConfig::default(),
            storage: StorageConfig::default(),
            container_registry: ContainerRegistryConfig::default(),
            ecs_cluster: EcsClusterConfig::default(),
            backend_service,
            frontend_service,
            backend_pipeline,
            frontend_pipeline,
            secrets: SecretsConfig::default(),
            iam: IamConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_services() {
        let c = GaraConfig::default();
        assert_eq!(c.backend_service.container_name, "gara-image-container");
        assert_eq!(c.backend_service.container_port, 8080);
        assert_eq!(c.backend_service.environment_variables["PORT"], "8080");
        assert_eq!(c.frontend_service.container_port, 80);
        assert_eq!(
            c.frontend_service.environment_variables["NEXTAUTH_SECRET"],
            "change-me-in-production"
        );
    }

    #[test]
    fn test_config_pipelines_target_their_services() {
        let c = GaraConfig::default();
        assert_eq!(c.backend_pipeline.container_name, c.backend_service.container_name);
        assert_eq!(c.frontend_pipeline.container_name, c.frontend_service.container_name);
        assert_ne!(
            c.backend_pipeline.codebuild.project_name,
            c.frontend_pipeline.codebuild.project_name
        );
        assert_eq!(
            c.frontend_pipeline.codebuild.repository_uri_variable,
            "FRONTEND_ECR_REPOSITORY_URI"
        );
    }

    #[test]
    fn test_config_leaf_defaults() {
        let hc = HealthCheckConfig::default();
        assert_eq!(hc.path, "/");
        assert_eq!(hc.healthy_http_codes, "200-399");
        assert_eq!((hc.interval_seconds, hc.timeout_seconds), (60, 10));
        assert_eq!(
            (hc.healthy_threshold_count, hc.unhealthy_threshold_count),
            (2, 3)
        );

        let vpc = VpcConfig::default();
        assert_eq!((vpc.max_azs, vpc.nat_gateways), (2, 1));

        let td = TaskDefinitionConfig::default();
        assert_eq!((td.cpu, td.memory_limit_mib), (512, 1024));
    }

    #[test]
    fn test_config_service_new_defaults() {
        let s = ServiceConfig::new("fam", "c", 3000, "/ecs/x", "svc");
        assert_eq!(s.desired_count, 1);
        assert_eq!(s.listener_port, 80);
        assert!(s.environment_variables.is_empty());
        assert_eq!(s.health_check, HealthCheckConfig::default());
    }

    #[test]
    fn test_config_service_optional_fields_deserialize() {
        let yaml = r#"
family: f
container_name: c
container_port: 3000
log_group_name: /ecs/f
service_name: s
"#;
        let s: ServiceConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(s.listener_port, 80);
        assert_eq!(s.task_definition.cpu, 512);
    }

    #[test]
    fn test_config_yaml_roundtrip() {
        let c = GaraConfig::default();
        let yaml = serde_yaml_ng::to_string(&c).unwrap();
        let back: GaraConfig = serde_yaml_ng::from_str(&yaml).unwrap();
        assert_eq!(back, c);
    }
}
