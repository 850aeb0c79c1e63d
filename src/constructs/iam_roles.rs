//! Task, execution and build roles.
//!
//! Roles are declared before the build projects exist, so the build role's
//! project-scoped permissions are attached in a second phase by
//! [`IamRoles::add_codebuild_diagnostics_permission`].

use super::cicd_pipeline::ProjectHandle;
use super::registry::RegistryHandle;
use super::role::{Role, RoleHandle};
use super::secrets::SecretsHandle;
use super::storage::StorageHandle;
use crate::core::config::IamConfig;
use crate::core::error::{Result, SynthError};
use crate::core::policy::{actions, principal, Statement};
use crate::core::stack::Stack;
use crate::core::template::Token;
use serde_json::json;
use tracing::{debug, info};

const TASK_EXECUTION_POLICY: &str = "service-role/AmazonECSTaskExecutionRolePolicy";
const REGISTRY_POWER_USER: &str = "AmazonEC2ContainerRegistryPowerUser";

/// Everything the roles are granted access to.
pub struct RoleTargets<'a> {
    pub storage: &'a StorageHandle,
    pub registry: &'a RegistryHandle,
    pub secrets: &'a SecretsHandle,
}

#[derive(Debug, Clone)]
pub struct IamRoles {
    pub backend_task: Role,
    pub frontend_task: Role,
    pub backend_execution: Role,
    pub frontend_execution: Role,
    pub codebuild: Role,
}

fn put_metrics(namespace: &str) -> Statement {
    Statement::allow_any(actions::PUT_METRICS).with_condition(json!({
        "StringEquals": { "cloudwatch:namespace": namespace }
    }))
}

impl IamRoles {
    /// Phase one: declare all five roles with every permission that does not
    /// depend on a build project.
    pub fn declare(stack: &mut Stack, config: &IamConfig, targets: &RoleTargets<'_>) -> Result<Self> {
        let storage = targets.storage;
        let api_key = &targets.secrets.api_key;

        let mut backend_task = Role::new(
            stack,
            "IamRolesBackendTaskRole",
            principal::ECS_TASKS,
            Some(config.backend_task_role_name.as_str()),
            &[],
        )?;
        backend_task.add_statements(
            stack,
            [
                storage.bucket.read_write_statement(),
                storage.table.read_write_statement(),
                api_key.read_statement(),
                put_metrics(&config.backend_metrics_namespace),
            ],
        )?;

        let mut frontend_task = Role::new(
            stack,
            "IamRolesFrontendTaskRole",
            principal::ECS_TASKS,
            Some(config.frontend_task_role_name.as_str()),
            &[],
        )?;
        frontend_task.add_statements(
            stack,
            [
                storage.bucket.read_statement(),
                storage.table.read_statement(),
                api_key.read_statement(),
                put_metrics(&config.frontend_metrics_namespace),
            ],
        )?;

        let mut backend_execution = Role::new(
            stack,
            "IamRolesBackendExecutionRole",
            principal::ECS_TASKS,
            Some(config.backend_execution_role_name.as_str()),
            &[TASK_EXECUTION_POLICY],
        )?;
        backend_execution.add_statements(stack, targets.registry.backend.pull_statements())?;

        // Frontend secrets are injected by the agent, which runs as this role
        let mut frontend_execution = Role::new(
            stack,
            "IamRolesFrontendExecutionRole",
            principal::ECS_TASKS,
            Some(config.frontend_execution_role_name.as_str()),
            &[TASK_EXECUTION_POLICY],
        )?;
        frontend_execution.add_statements(stack, targets.registry.frontend.pull_statements())?;
        frontend_execution.add_to_policy(stack, api_key.read_statement())?;

        let mut codebuild = Role::new(
            stack,
            "IamRolesCodeBuildRole",
            principal::CODEBUILD,
            Some(config.codebuild_role_name.as_str()),
            &[REGISTRY_POWER_USER],
        )?;
        codebuild.add_statements(
            stack,
            [
                Statement::allow(
                    actions::BUILD_LOGS,
                    [
                        Token::literal("arn:aws:logs:*:*:log-group:/aws/codebuild/*"),
                        Token::literal("arn:aws:logs:*:*:log-group:/aws/codebuild/*:log-stream:*"),
                    ],
                ),
                targets.secrets.github_token.read_statement(),
                Statement::allow(
                    actions::PIPELINE_ARTIFACT_OBJECTS,
                    [Token::literal("arn:aws:s3:::codepipeline-*/*")],
                ),
                Statement::allow(
                    actions::PIPELINE_ARTIFACT_BUCKETS,
                    [Token::literal("arn:aws:s3:::codepipeline-*")],
                ),
            ],
        )?;
        codebuild.add_statements(stack, targets.registry.backend.push_pull_statements())?;
        codebuild.add_statements(stack, targets.registry.frontend.push_pull_statements())?;
        codebuild.add_to_policy(stack, Statement::allow_any(actions::BUILD_METRICS))?;

        debug!("iam roles declared");
        Ok(Self {
            backend_task,
            frontend_task,
            backend_execution,
            frontend_execution,
            codebuild,
        })
    }

    pub fn backend_task_role(&self) -> &RoleHandle {
        self.backend_task.handle()
    }

    pub fn frontend_task_role(&self) -> &RoleHandle {
        self.frontend_task.handle()
    }

    pub fn backend_execution_role(&self) -> &RoleHandle {
        self.backend_execution.handle()
    }

    pub fn frontend_execution_role(&self) -> &RoleHandle {
        self.frontend_execution.handle()
    }

    pub fn codebuild_role(&self) -> &RoleHandle {
        self.codebuild.handle()
    }

    /// Phase two: let the build role inspect builds of exactly these two
    /// projects. Repeating the call with the same projects changes nothing;
    /// a different project set is rejected.
    pub fn add_codebuild_diagnostics_permission(
        &mut self,
        stack: &mut Stack,
        backend: &ProjectHandle,
        frontend: &ProjectHandle,
    ) -> Result<bool> {
        let statement = Statement::allow(
            actions::BUILD_DIAGNOSTICS,
            [backend.arn(), frontend.arn()],
        );
        let existing = self
            .codebuild
            .document()
            .statements
            .iter()
            .find(|s| s.actions == statement.actions);
        if let Some(existing) = existing {
            if existing.resources == statement.resources {
                return Ok(false);
            }
            return Err(SynthError::PermissionPatchConflict {
                role: self.codebuild.handle().id.to_string(),
            });
        }
        self.codebuild.add_to_policy(stack, statement)?;
        info!(
            backend = %backend.name,
            frontend = %frontend.name,
            "build role granted project diagnostics"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::{registry, secrets, storage};
    use crate::core::config::{ContainerRegistryConfig, SecretsConfig, StorageConfig};
    use crate::core::stack::StackEnv;
    use crate::core::template::LogicalId;

    fn setup() -> (Stack, IamRoles) {
        let mut s = Stack::new("T", StackEnv::default());
        let st = storage::declare(&mut s, &StorageConfig::default()).unwrap();
        let reg = registry::declare(&mut s, &ContainerRegistryConfig::default()).unwrap();
        let sec = secrets::resolve(&SecretsConfig::default());
        let targets = RoleTargets {
            storage: &st,
            registry: &reg,
            secrets: &sec,
        };
        let roles = IamRoles::declare(&mut s, &IamConfig::default(), &targets).unwrap();
        (s, roles)
    }

    fn project(id: &str, name: &str) -> ProjectHandle {
        ProjectHandle {
            id: LogicalId::new(id),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_iam_trust_principals() {
        let (s, roles) = setup();
        for role in [&roles.backend_task, &roles.frontend_task] {
            let r = s.resource(&role.handle().id).unwrap();
            assert_eq!(
                r.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
                "ecs-tasks.amazonaws.com"
            );
        }
        let build = s.resource(&roles.codebuild.handle().id).unwrap();
        assert_eq!(
            build.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "codebuild.amazonaws.com"
        );
    }

    #[test]
    fn test_iam_frontend_is_read_only_subset() {
        let (_, roles) = setup();
        let bucket = Token::get_att(&LogicalId::new("StorageImageBucket"), "Arn");
        let table = Token::get_att(&LogicalId::new("StorageAlbumsTable"), "Arn");
        for target in [bucket, table] {
            let front = roles.frontend_task.document().actions_on(&target);
            let back = roles.backend_task.document().actions_on(&target);
            assert!(!front.is_empty());
            assert!(front.is_subset(&back));
            assert!(front
                .iter()
                .all(|a| !a.contains("Put") && !a.contains("Delete") && !a.contains("Update")));
        }
    }

    #[test]
    fn test_iam_metrics_namespace_condition() {
        let (_, roles) = setup();
        let metrics = roles
            .backend_task
            .document()
            .statements
            .iter()
            .find(|st| st.actions == vec!["cloudwatch:PutMetricData"])
            .unwrap();
        assert_eq!(
            metrics.condition.as_ref().unwrap()["StringEquals"]["cloudwatch:namespace"],
            "GaraImage"
        );
    }

    #[test]
    fn test_iam_diagnostics_patch_targets_both_projects() {
        let (mut s, mut roles) = setup();
        let b = project("BackendPipelineBuildProject", "gara-image-build");
        let f = project("FrontendPipelineBuildProject", "gara-frontend-build");
        assert!(roles.add_codebuild_diagnostics_permission(&mut s, &b, &f).unwrap());

        let statement = roles
            .codebuild
            .document()
            .statements
            .iter()
            .find(|st| st.actions.contains(&"codebuild:BatchGetBuilds".to_string()))
            .unwrap();
        assert_eq!(statement.resources, vec![b.arn(), f.arn()]);

        let policy = roles.codebuild.policy_id().unwrap();
        let rendered = &s.resource(policy).unwrap().properties["PolicyDocument"];
        assert!(rendered.to_string().contains("codebuild:BatchGetBuildBatches"));
    }

    #[test]
    fn test_iam_diagnostics_patch_idempotent() {
        let (mut s, mut roles) = setup();
        let b = project("B", "b");
        let f = project("F", "f");
        roles.add_codebuild_diagnostics_permission(&mut s, &b, &f).unwrap();
        let before = roles.codebuild.document().statements.len();
        assert!(!roles.add_codebuild_diagnostics_permission(&mut s, &b, &f).unwrap());
        assert_eq!(roles.codebuild.document().statements.len(), before);
    }

    #[test]
    fn test_iam_diagnostics_patch_conflict() {
        let (mut s, mut roles) = setup();
        roles
            .add_codebuild_diagnostics_permission(&mut s, &project("B", "b"), &project("F", "f"))
            .unwrap();
        let err = roles
            .add_codebuild_diagnostics_permission(&mut s, &project("B", "b"), &project("X", "x"))
            .unwrap_err();
        assert!(matches!(err, SynthError::PermissionPatchConflict { .. }));
    }
}
