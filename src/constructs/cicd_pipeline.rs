//! Source → build → deploy pipeline for one service.

use super::fargate_service::ServiceHandle;
use super::registry::RepositoryHandle;
use super::role::{Role, RoleHandle};
use super::secrets::SecretHandle;
use super::trigger::TriggerProvider;
use crate::core::buildspec;
use crate::core::config::PipelineConfig;
use crate::core::error::Result;
use crate::core::policy::{actions, principal, PolicyDocument, Statement};
use crate::core::stack::Stack;
use crate::core::template::{kind, CfnResource, LogicalId, RemovalPolicy, Token};
use serde_json::{json, Value};
use tracing::debug;

pub const SOURCE_ACTION: &str = "GitHub_Source";
const SOURCE_ARTIFACT: &str = "SourceOutput";
const BUILD_ARTIFACT: &str = "BuildOutput";

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectHandle {
    pub id: LogicalId,
    pub name: String,
}

impl ProjectHandle {
    pub fn arn(&self) -> Token {
        Token::get_att(&self.id, "Arn")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineHandle {
    pub id: LogicalId,
    pub name: String,
}

impl PipelineHandle {
    pub fn arn(&self) -> Token {
        Token::sub(format!(
            "arn:${{AWS::Partition}}:codepipeline:${{AWS::Region}}:${{AWS::AccountId}}:${{{}}}",
            self.id
        ))
    }
}

pub struct PipelineProps<'a> {
    pub config: &'a PipelineConfig,
    pub repository: &'a RepositoryHandle,
    pub service: &'a ServiceHandle,
    pub build_role: &'a RoleHandle,
    pub github_secret: &'a SecretHandle,
}

#[derive(Debug, Clone)]
pub struct CicdPipeline {
    pub project: ProjectHandle,
    pub pipeline: PipelineHandle,
    pub artifact_bucket: LogicalId,
    pub webhook: LogicalId,
    pub trigger: LogicalId,
    pipeline_role: Role,
}

fn action_type(category: &str, owner: &str, provider: &str) -> Value {
    json!({ "Category": category, "Owner": owner, "Provider": provider, "Version": "1" })
}

fn plain_env(name: &str, value: Token) -> Value {
    json!({ "Name": name, "Type": "PLAINTEXT", "Value": value })
}

impl CicdPipeline {
    /// Declare the build project, the pipeline and its initial trigger
    /// under logical IDs starting with `prefix`.
    pub fn declare(
        stack: &mut Stack,
        prefix: &str,
        props: PipelineProps<'_>,
        provider: &mut TriggerProvider,
    ) -> Result<Self> {
        let config = props.config;
        let source = &config.github_source;
        let github_token = props.github_secret.value();

        // Build project
        let credential = stack.add_resource(
            format!("{}GitHubCredentials", prefix),
            CfnResource::new(
                kind::SOURCE_CREDENTIAL,
                json!({
                    "ServerType": "GITHUB",
                    "AuthType": "PERSONAL_ACCESS_TOKEN",
                    "Token": github_token,
                }),
            ),
        )?;

        let secret_ref = match &props.github_secret.json_key {
            Some(key) => format!("{}:{}", props.github_secret.name, key),
            None => props.github_secret.name.clone(),
        };
        let build = &config.codebuild;
        let project_id = stack.add_resource(
            format!("{}BuildProject", prefix),
            CfnResource::new(
                kind::BUILD_PROJECT,
                json!({
                    "Name": build.project_name,
                    "ServiceRole": props.build_role.arn(),
                    "Artifacts": { "Type": "NO_ARTIFACTS" },
                    "Environment": {
                        "Type": "LINUX_CONTAINER",
                        "ComputeType": "BUILD_GENERAL1_SMALL",
                        "Image": build.build_image,
                        "PrivilegedMode": build.privileged,
                        "EnvironmentVariables": [
                            plain_env("AWS_ACCOUNT_ID", stack.env().account_token()),
                            plain_env("AWS_DEFAULT_REGION", stack.env().region_token()),
                            plain_env(&build.repository_uri_variable, props.repository.uri()),
                            { "Name": "GITHUB_TOKEN", "Type": "SECRETS_MANAGER", "Value": secret_ref },
                        ],
                    },
                    "Source": {
                        "Type": "GITHUB",
                        "Location": format!("https://github.com/{}/{}.git", source.owner, source.repo),
                        "GitCloneDepth": build.clone_depth,
                        "ReportBuildStatus": true,
                        "BuildSpec": buildspec::build_spec(
                            &config.container_name,
                            &config.image_definitions_file,
                            &build.repository_uri_variable,
                        ),
                    },
                    "SourceVersion": source.branch,
                    "Triggers": {
                        "Webhook": true,
                        "FilterGroups": [[
                            { "Type": "EVENT", "Pattern": "PUSH, PULL_REQUEST_MERGED" },
                            { "Type": "HEAD_REF", "Pattern": format!("^refs/heads/{}$", source.branch) },
                        ]],
                    },
                    "TimeoutInMinutes": build.timeout_minutes,
                }),
            ),
        )?;
        stack.add_dependency(&project_id, &credential)?;
        let project = ProjectHandle {
            id: project_id,
            name: build.project_name.clone(),
        };

        // Artifact store, shared by the pipeline and the build role
        let artifact_bucket = stack.add_resource(
            format!("{}ArtifactsBucket", prefix),
            CfnResource::new(
                kind::BUCKET,
                json!({
                    "BucketEncryption": {
                        "ServerSideEncryptionConfiguration": [{
                            "ServerSideEncryptionByDefault": { "SSEAlgorithm": "AES256" }
                        }]
                    },
                    "PublicAccessBlockConfiguration": {
                        "BlockPublicAcls": true,
                        "BlockPublicPolicy": true,
                        "IgnorePublicAcls": true,
                        "RestrictPublicBuckets": true,
                    },
                }),
            )
            .with_removal(RemovalPolicy::Retain),
        )?;
        let bucket_arn = Token::get_att(&artifact_bucket, "Arn");
        let objects_arn = Token::concat([bucket_arn.clone(), Token::literal("/*")]);
        let artifact_actions: Vec<&str> = actions::S3_READ
            .iter()
            .chain(actions::S3_WRITE)
            .copied()
            .collect();
        let artifact_access =
            Statement::allow(&artifact_actions, [bucket_arn.clone(), objects_arn.clone()]);

        let mut build_artifacts = PolicyDocument::default();
        build_artifacts.add_statement(artifact_access.clone());
        stack.add_resource(
            format!("{}BuildArtifactsPolicy", prefix),
            CfnResource::new(
                kind::POLICY,
                json!({
                    "PolicyName": format!("{}BuildArtifactsPolicy", prefix),
                    "PolicyDocument": build_artifacts,
                    "Roles": [Token::reference(&props.build_role.id)],
                }),
            ),
        )?;

        let mut pipeline_role = Role::new(
            stack,
            &format!("{}PipelineRole", prefix),
            principal::CODEPIPELINE,
            None,
            &[],
        )?;
        pipeline_role.add_statements(
            stack,
            [
                artifact_access,
                Statement::allow(actions::BUILD_START, [project.arn()]),
                Statement::allow_any(actions::ECS_DEPLOY),
                Statement::allow_any(actions::PASS_ROLE).with_condition(json!({
                    "StringEqualsIfExists": { "iam:PassedToService": principal::ECS_TASKS }
                })),
            ],
        )?;

        // Pipeline
        let pipeline_id = stack.add_resource(
            format!("{}Pipeline", prefix),
            CfnResource::new(
                kind::PIPELINE,
                json!({
                    "Name": config.pipeline_name,
                    "RoleArn": pipeline_role.handle().arn(),
                    "RestartExecutionOnUpdate": true,
                    "ArtifactStore": { "Type": "S3", "Location": Token::reference(&artifact_bucket) },
                    "Stages": [
                        {
                            "Name": "Source",
                            "Actions": [{
                                "Name": SOURCE_ACTION,
                                "ActionTypeId": action_type("Source", "ThirdParty", "GitHub"),
                                "Configuration": {
                                    "Owner": source.owner,
                                    "Repo": source.repo,
                                    "Branch": source.branch,
                                    "OAuthToken": github_token,
                                    "PollForSourceChanges": false,
                                },
                                "OutputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                                "RunOrder": 1,
                            }],
                        },
                        {
                            "Name": "Build",
                            "Actions": [{
                                "Name": "Build",
                                "ActionTypeId": action_type("Build", "AWS", "CodeBuild"),
                                "Configuration": { "ProjectName": Token::reference(&project.id) },
                                "InputArtifacts": [{ "Name": SOURCE_ARTIFACT }],
                                "OutputArtifacts": [{ "Name": BUILD_ARTIFACT }],
                                "RunOrder": 1,
                            }],
                        },
                        {
                            "Name": "Deploy",
                            "Actions": [{
                                "Name": "Deploy",
                                "ActionTypeId": action_type("Deploy", "AWS", "ECS"),
                                "Configuration": {
                                    "ClusterName": props.service.cluster_name,
                                    "ServiceName": props.service.service_name,
                                    "FileName": config.image_definitions_file,
                                    "DeploymentTimeout": config.deployment_timeout_minutes.to_string(),
                                },
                                "InputArtifacts": [{ "Name": BUILD_ARTIFACT }],
                                "RunOrder": 1,
                            }],
                        },
                    ],
                }),
            ),
        )?;
        // Deploy stage needs the service to exist
        stack.add_dependency(&pipeline_id, &props.service.id)?;
        if let Some(policy) = pipeline_role.policy_id().cloned() {
            stack.add_dependency(&pipeline_id, &policy)?;
        }
        let pipeline = PipelineHandle {
            id: pipeline_id,
            name: config.pipeline_name.clone(),
        };

        let webhook = stack.add_resource(
            format!("{}Webhook", prefix),
            CfnResource::new(
                kind::WEBHOOK,
                json!({
                    "Authentication": "GITHUB_HMAC",
                    "AuthenticationConfiguration": { "SecretToken": github_token },
                    "Filters": [{ "JsonPath": "$.ref", "MatchEquals": "refs/heads/{Branch}" }],
                    "TargetPipeline": Token::reference(&pipeline.id),
                    "TargetAction": SOURCE_ACTION,
                    "TargetPipelineVersion": Token::get_att(&pipeline.id, "Version"),
                    "RegisterWithThirdParty": true,
                }),
            ),
        )?;

        let trigger = provider.trigger(
            stack,
            &format!("{}Trigger", prefix),
            &pipeline.id,
            &pipeline.name,
            pipeline.arn(),
        )?;

        debug!(pipeline = %pipeline.name, project = %project.name, "pipeline declared");
        Ok(Self {
            project,
            pipeline,
            artifact_bucket,
            webhook,
            trigger,
            pipeline_role,
        })
    }

    pub fn pipeline_role(&self) -> &RoleHandle {
        self.pipeline_role.handle()
    }
}
