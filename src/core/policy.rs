//! IAM policy documents and the grant action sets used by the constructs.

use super::template::Token;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Action sets mirroring the grants the roles need.
pub mod actions {
    pub const S3_READ: &[&str] = &["s3:GetObject*", "s3:GetBucket*", "s3:List*"];
    pub const S3_WRITE: &[&str] = &[
        "s3:DeleteObject*",
        "s3:PutObject",
        "s3:PutObjectLegalHold",
        "s3:PutObjectRetention",
        "s3:PutObjectTagging",
        "s3:PutObjectVersionTagging",
        "s3:Abort*",
    ];
    pub const DYNAMODB_READ: &[&str] = &[
        "dynamodb:BatchGetItem",
        "dynamodb:GetRecords",
        "dynamodb:GetShardIterator",
        "dynamodb:Query",
        "dynamodb:GetItem",
        "dynamodb:Scan",
        "dynamodb:ConditionCheckItem",
        "dynamodb:DescribeTable",
    ];
    pub const DYNAMODB_WRITE: &[&str] = &[
        "dynamodb:BatchWriteItem",
        "dynamodb:PutItem",
        "dynamodb:UpdateItem",
        "dynamodb:DeleteItem",
    ];
    pub const SECRET_READ: &[&str] = &[
        "secretsmanager:GetSecretValue",
        "secretsmanager:DescribeSecret",
    ];
    pub const ECR_PULL: &[&str] = &[
        "ecr:BatchCheckLayerAvailability",
        "ecr:GetDownloadUrlForLayer",
        "ecr:BatchGetImage",
    ];
    pub const ECR_PUSH: &[&str] = &[
        "ecr:PutImage",
        "ecr:InitiateLayerUpload",
        "ecr:UploadLayerPart",
        "ecr:CompleteLayerUpload",
    ];
    pub const ECR_AUTH: &[&str] = &["ecr:GetAuthorizationToken"];
    pub const BUILD_LOGS: &[&str] = &[
        "logs:CreateLogGroup",
        "logs:CreateLogStream",
        "logs:PutLogEvents",
    ];
    pub const PIPELINE_ARTIFACT_OBJECTS: &[&str] = &[
        "s3:GetObject",
        "s3:GetObjectVersion",
        "s3:PutObject",
        "s3:PutObjectAcl",
    ];
    pub const PIPELINE_ARTIFACT_BUCKETS: &[&str] = &["s3:ListBucket", "s3:GetBucketVersioning"];
    pub const BUILD_METRICS: &[&str] = &[
        "cloudwatch:PutMetricData",
        "cloudwatch:GetMetricData",
        "cloudwatch:ListMetrics",
    ];
    pub const PUT_METRICS: &[&str] = &["cloudwatch:PutMetricData"];
    pub const BUILD_DIAGNOSTICS: &[&str] =
        &["codebuild:BatchGetBuilds", "codebuild:BatchGetBuildBatches"];
    pub const BUILD_START: &[&str] = &[
        "codebuild:BatchGetBuilds",
        "codebuild:StartBuild",
        "codebuild:StopBuild",
    ];
    pub const ECS_DEPLOY: &[&str] = &[
        "ecs:DescribeServices",
        "ecs:DescribeTaskDefinition",
        "ecs:DescribeTasks",
        "ecs:ListTasks",
        "ecs:RegisterTaskDefinition",
        "ecs:TagResource",
        "ecs:UpdateService",
    ];
    pub const PASS_ROLE: &[&str] = &["iam:PassRole"];
    pub const START_PIPELINE: &[&str] = &["codepipeline:StartPipelineExecution"];
}

/// Service principals.
pub mod principal {
    pub const ECS_TASKS: &str = "ecs-tasks.amazonaws.com";
    pub const CODEBUILD: &str = "codebuild.amazonaws.com";
    pub const CODEPIPELINE: &str = "codepipeline.amazonaws.com";
    pub const LAMBDA: &str = "lambda.amazonaws.com";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Effect {
    Allow,
}

/// One policy statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "Effect")]
    pub effect: Effect,

    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Value>,

    #[serde(rename = "Action")]
    pub actions: Vec<String>,

    #[serde(rename = "Resource", default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<Token>,

    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Value>,
}

impl Statement {
    pub fn allow(actions: &[&str], resources: impl IntoIterator<Item = Token>) -> Self {
        Self {
            effect: Effect::Allow,
            principal: None,
            actions: actions.iter().map(|a| a.to_string()).collect(),
            resources: resources.into_iter().collect(),
            condition: None,
        }
    }

    /// Allow on `*`.
    pub fn allow_any(actions: &[&str]) -> Self {
        Self::allow(actions, [Token::literal("*")])
    }

    /// Trust statement letting `service` assume the role.
    pub fn assume_role(service: &str) -> Self {
        Self {
            effect: Effect::Allow,
            principal: Some(json!({ "Service": service })),
            actions: vec!["sts:AssumeRole".to_string()],
            resources: Vec::new(),
            condition: None,
        }
    }

    pub fn with_condition(mut self, condition: Value) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn covers(&self, resource: &Token) -> bool {
        self.resources.iter().any(|r| r == resource)
    }
}

/// A versioned list of statements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,

    #[serde(rename = "Statement")]
    pub statements: Vec<Statement>,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            version: "2012-10-17".to_string(),
            statements: Vec::new(),
        }
    }
}

impl PolicyDocument {
    /// Trust policy for a role assumed by a single service.
    pub fn trust(service: &str) -> Self {
        let mut doc = Self::default();
        doc.statements.push(Statement::assume_role(service));
        doc
    }

    /// Append a statement unless an identical one is already present.
    /// Returns whether the document changed.
    pub fn add_statement(&mut self, statement: Statement) -> bool {
        if self.statements.contains(&statement) {
            return false;
        }
        self.statements.push(statement);
        true
    }

    /// Every action granted on `resource` (exact token match).
    pub fn actions_on(&self, resource: &Token) -> BTreeSet<String> {
        self.statements
            .iter()
            .filter(|s| s.effect == Effect::Allow && s.covers(resource))
            .flat_map(|s| s.actions.iter().cloned())
            .collect()
    }

    /// Services named in trust statements.
    pub fn trusted_services(&self) -> BTreeSet<String> {
        self.statements
            .iter()
            .filter_map(|s| s.principal.as_ref())
            .filter_map(|p| p.get("Service"))
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}
