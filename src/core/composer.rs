//! Gara stack composition.
//!
//! Constructs are instantiated in dependency order. Two steps run after
//! everything is declared:
//! - the build role learns the project ARNs (roles precede projects)
//! - the frontend learns its own load balancer URL (it precedes its service)

use super::config::GaraConfig;
use super::error::Result;
use super::stack::{Stack, StackEnv};
use super::template::{Template, Token};
use crate::constructs::cicd_pipeline::{CicdPipeline, PipelineProps};
use crate::constructs::fargate_service::{FargateService, FargateServiceProps};
use crate::constructs::iam_roles::{IamRoles, RoleTargets};
use crate::constructs::registry::RegistryHandle;
use crate::constructs::storage::StorageHandle;
use crate::constructs::trigger::TriggerProvider;
use crate::constructs::{cluster, networking, registry, secrets, storage};
use std::collections::BTreeMap;
use tracing::info;

pub const DEFAULT_STACK_NAME: &str = "GaraStack";

/// Output names, in the order they are emitted.
pub mod outputs {
    pub const BACKEND_LOAD_BALANCER_DNS: &str = "BackendLoadBalancerDNS";
    pub const FRONTEND_LOAD_BALANCER_DNS: &str = "FrontendLoadBalancerDNS";
    pub const BACKEND_REPOSITORY_URI: &str = "ECRRepositoryURI";
    pub const FRONTEND_REPOSITORY_URI: &str = "FrontendECRRepositoryURI";
    pub const IMAGE_BUCKET_NAME: &str = "ImageBucketName";
    pub const ALBUMS_TABLE_NAME: &str = "AlbumsTableName";
}

/// The composed stack and the construct state later phases need.
#[derive(Debug, Clone)]
pub struct GaraStack {
    stack: Stack,
    storage: StorageHandle,
    registry: RegistryHandle,
    iam: IamRoles,
    backend: FargateService,
    frontend: FargateService,
    backend_pipeline: CicdPipeline,
    frontend_pipeline: CicdPipeline,
}

impl GaraStack {
    pub fn build(name: &str, config: &GaraConfig, env: StackEnv) -> Result<Self> {
        let mut stack = Stack::new(name, env);
        stack.set_description("Gara image service: networking, Fargate services, storage and CI/CD");
        info!(stack = name, "composing");

        let network = networking::declare(&mut stack, &config.vpc)?;
        let storage = storage::declare(&mut stack, &config.storage)?;
        let registry = registry::declare(&mut stack, &config.container_registry)?;
        let secrets = secrets::resolve(&config.secrets);
        let cluster = cluster::declare(&mut stack, &config.ecs_cluster, &network)?;

        let mut iam = IamRoles::declare(
            &mut stack,
            &config.iam,
            &RoleTargets {
                storage: &storage,
                registry: &registry,
                secrets: &secrets,
            },
        )?;

        let mut backend_env = BTreeMap::new();
        backend_env.insert("S3_BUCKET_NAME".to_string(), storage.bucket.name.clone());
        backend_env.insert("AWS_REGION".to_string(), stack.env().region_token());
        backend_env.insert("DYNAMODB_TABLE_NAME".to_string(), storage.table.name.clone());
        let backend = FargateService::declare(
            &mut stack,
            "BackendService",
            FargateServiceProps {
                cluster: &cluster,
                config: &config.backend_service,
                task_role: &iam.backend_task,
                execution_role: &iam.backend_execution,
                environment: backend_env,
                secrets: BTreeMap::new(),
                log_retention_days: config.storage.log_retention_days,
            },
        )?;

        let mut frontend_env = BTreeMap::new();
        frontend_env.insert("NEXT_PUBLIC_API_URL".to_string(), backend.url());
        let mut frontend_secrets = BTreeMap::new();
        frontend_secrets.insert(config.secrets.api_key_env_name.clone(), secrets.api_key.partial_arn());
        let mut frontend = FargateService::declare(
            &mut stack,
            "FrontendService",
            FargateServiceProps {
                cluster: &cluster,
                config: &config.frontend_service,
                task_role: &iam.frontend_task,
                execution_role: &iam.frontend_execution,
                environment: frontend_env,
                secrets: frontend_secrets,
                log_retention_days: config.storage.log_retention_days,
            },
        )?;

        let mut provider = TriggerProvider::declare(&mut stack)?;
        let build_role = iam.codebuild_role().clone();
        let backend_pipeline = CicdPipeline::declare(
            &mut stack,
            "BackendPipeline",
            PipelineProps {
                config: &config.backend_pipeline,
                repository: &registry.backend,
                service: backend.handle(),
                build_role: &build_role,
                github_secret: &secrets.github_token,
            },
            &mut provider,
        )?;
        let frontend_pipeline = CicdPipeline::declare(
            &mut stack,
            "FrontendPipeline",
            PipelineProps {
                config: &config.frontend_pipeline,
                repository: &registry.frontend,
                service: frontend.handle(),
                build_role: &build_role,
                github_secret: &secrets.github_token,
            },
            &mut provider,
        )?;

        info!("applying late bindings");
        iam.add_codebuild_diagnostics_permission(
            &mut stack,
            &backend_pipeline.project,
            &frontend_pipeline.project,
        )?;
        let frontend_url = frontend.url();
        frontend.add_environment_variable(&mut stack, "NEXTAUTH_URL", frontend_url)?;

        let mut composed = Self {
            stack,
            storage,
            registry,
            iam,
            backend,
            frontend,
            backend_pipeline,
            frontend_pipeline,
        };
        composed.add_outputs()?;
        Ok(composed)
    }

    fn add_outputs(&mut self) -> Result<()> {
        let entries: [(&str, &str, Token); 6] = [
            (
                outputs::BACKEND_LOAD_BALANCER_DNS,
                "URL of the Application Load Balancer for gara-image service",
                self.backend.load_balancer_dns(),
            ),
            (
                outputs::FRONTEND_LOAD_BALANCER_DNS,
                "URL of the Application Load Balancer for gara-frontend service",
                self.frontend.load_balancer_dns(),
            ),
            (
                outputs::BACKEND_REPOSITORY_URI,
                "URI of the ECR repository for gara-image",
                self.registry.backend.uri(),
            ),
            (
                outputs::FRONTEND_REPOSITORY_URI,
                "URI of the ECR repository for gara-frontend",
                self.registry.frontend.uri(),
            ),
            (
                outputs::IMAGE_BUCKET_NAME,
                "Name of the S3 bucket for image storage",
                Token::reference(&self.storage.bucket.id),
            ),
            (
                outputs::ALBUMS_TABLE_NAME,
                "DynamoDB table name for albums",
                Token::reference(&self.storage.table.id),
            ),
        ];
        for (name, description, value) in entries {
            self.stack.add_output(name, description, value)?;
        }
        Ok(())
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn iam(&self) -> &IamRoles {
        &self.iam
    }

    pub fn backend(&self) -> &FargateService {
        &self.backend
    }

    pub fn frontend(&self) -> &FargateService {
        &self.frontend
    }

    pub fn pipelines(&self) -> [&CicdPipeline; 2] {
        [&self.backend_pipeline, &self.frontend_pipeline]
    }

    /// Validate references and render the template.
    pub fn synth(&self) -> Result<Template> {
        let template = self.stack.synth()?;
        info!(
            stack = self.stack.name(),
            resources = template.resources.len(),
            outputs = template.outputs.len(),
            "synthesized"
        );
        Ok(template)
    }
}
