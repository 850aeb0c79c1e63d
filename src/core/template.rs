//! CloudFormation document model: tokens, resources, outputs and the template.
//!
//! A [`Token`] is any value CloudFormation resolves at deploy time: a literal,
//! a `Ref`, an `Fn::GetAtt`, an `Fn::Join`, an `Fn::Sub`, or a dynamic
//! reference string. Constructs never see resolved values, only tokens.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;

/// CloudFormation resource type names used by the constructs.
pub mod kind {
    pub const VPC: &str = "AWS::EC2::VPC";
    pub const SUBNET: &str = "AWS::EC2::Subnet";
    pub const INTERNET_GATEWAY: &str = "AWS::EC2::InternetGateway";
    pub const GATEWAY_ATTACHMENT: &str = "AWS::EC2::VPCGatewayAttachment";
    pub const ROUTE_TABLE: &str = "AWS::EC2::RouteTable";
    pub const ROUTE: &str = "AWS::EC2::Route";
    pub const ROUTE_TABLE_ASSOCIATION: &str = "AWS::EC2::SubnetRouteTableAssociation";
    pub const EIP: &str = "AWS::EC2::EIP";
    pub const NAT_GATEWAY: &str = "AWS::EC2::NatGateway";
    pub const SECURITY_GROUP: &str = "AWS::EC2::SecurityGroup";
    pub const BUCKET: &str = "AWS::S3::Bucket";
    pub const TABLE: &str = "AWS::DynamoDB::Table";
    pub const REPOSITORY: &str = "AWS::ECR::Repository";
    pub const CLUSTER: &str = "AWS::ECS::Cluster";
    pub const TASK_DEFINITION: &str = "AWS::ECS::TaskDefinition";
    pub const SERVICE: &str = "AWS::ECS::Service";
    pub const LOG_GROUP: &str = "AWS::Logs::LogGroup";
    pub const LOAD_BALANCER: &str = "AWS::ElasticLoadBalancingV2::LoadBalancer";
    pub const TARGET_GROUP: &str = "AWS::ElasticLoadBalancingV2::TargetGroup";
    pub const LISTENER: &str = "AWS::ElasticLoadBalancingV2::Listener";
    pub const ROLE: &str = "AWS::IAM::Role";
    pub const POLICY: &str = "AWS::IAM::Policy";
    pub const SOURCE_CREDENTIAL: &str = "AWS::CodeBuild::SourceCredential";
    pub const BUILD_PROJECT: &str = "AWS::CodeBuild::Project";
    pub const PIPELINE: &str = "AWS::CodePipeline::Pipeline";
    pub const WEBHOOK: &str = "AWS::CodePipeline::Webhook";
    pub const FUNCTION: &str = "AWS::Lambda::Function";
    pub const PIPELINE_TRIGGER: &str = "Custom::PipelineTrigger";
}

// ============================================================================
// Logical IDs
// ============================================================================

/// Template-unique resource name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalId(String);

impl LogicalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// CloudFormation accepts only ASCII alphanumerics.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty() && self.0.chars().all(|c| c.is_ascii_alphanumeric())
    }
}

impl fmt::Display for LogicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for LogicalId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// Pseudo parameters CloudFormation supplies for every stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pseudo {
    AccountId,
    Region,
    Partition,
    UrlSuffix,
}

impl Pseudo {
    pub fn name(self) -> &'static str {
        match self {
            Self::AccountId => "AWS::AccountId",
            Self::Region => "AWS::Region",
            Self::Partition => "AWS::Partition",
            Self::UrlSuffix => "AWS::URLSuffix",
        }
    }
}

/// A deploy-time value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Token(Value);

impl Token {
    pub fn literal(s: impl Into<String>) -> Self {
        Self(Value::String(s.into()))
    }

    pub fn reference(id: &LogicalId) -> Self {
        Self(json!({ "Ref": id.as_str() }))
    }

    pub fn pseudo(p: Pseudo) -> Self {
        Self(json!({ "Ref": p.name() }))
    }

    pub fn get_att(id: &LogicalId, attribute: &str) -> Self {
        Self(json!({ "Fn::GetAtt": [id.as_str(), attribute] }))
    }

    /// `Fn::Sub` with `${Name}` / `${Name.Attr}` placeholders.
    pub fn sub(template: impl Into<String>) -> Self {
        Self(json!({ "Fn::Sub": template.into() }))
    }

    /// Join parts with a separator. Adjacent literals are folded, and an
    /// all-literal join collapses into a plain string.
    pub fn join(separator: &str, parts: impl IntoIterator<Item = Token>) -> Self {
        let parts: Vec<Token> = parts.into_iter().collect();
        if parts.iter().all(|p| p.as_literal().is_some()) {
            let joined = parts
                .iter()
                .filter_map(Token::as_literal)
                .collect::<Vec<_>>()
                .join(separator);
            return Self::literal(joined);
        }
        let values: Vec<Value> = parts.into_iter().map(Token::into_value).collect();
        Self(json!({ "Fn::Join": [separator, values] }))
    }

    /// Concatenate without a separator.
    pub fn concat(parts: impl IntoIterator<Item = Token>) -> Self {
        Self::join("", parts)
    }

    /// Dynamic reference to a JSON key of a Secrets Manager secret.
    pub fn secret_json_value(secret_name: &str, json_key: &str) -> Self {
        Self::literal(format!(
            "{{{{resolve:secretsmanager:{}:SecretString:{}}}}}",
            secret_name, json_key
        ))
    }

    pub fn as_literal(&self) -> Option<&str> {
        self.0.as_str()
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// True for the empty literal; intrinsics are never empty.
    pub fn is_empty(&self) -> bool {
        matches!(&self.0, Value::String(s) if s.is_empty()) || self.0.is_null()
    }
}

impl From<&str> for Token {
    fn from(s: &str) -> Self {
        Self::literal(s)
    }
}

impl From<String> for Token {
    fn from(s: String) -> Self {
        Self::literal(s)
    }
}

impl From<Token> for Value {
    fn from(t: Token) -> Self {
        t.0
    }
}

// ============================================================================
// Resources
// ============================================================================

/// What CloudFormation does with a resource when it leaves the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemovalPolicy {
    Delete,
    Retain,
}

/// One entry under `Resources`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CfnResource {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub properties: Map<String, Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<LogicalId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_policy: Option<RemovalPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_replace_policy: Option<RemovalPolicy>,
}

impl CfnResource {
    /// A resource of `resource_type`. Non-object `properties` are dropped.
    pub fn new(resource_type: &str, properties: Value) -> Self {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            resource_type: resource_type.to_string(),
            properties,
            depends_on: Vec::new(),
            deletion_policy: None,
            update_replace_policy: None,
        }
    }

    /// Apply the removal policy on both stack deletion and replacement.
    pub fn with_removal(mut self, policy: RemovalPolicy) -> Self {
        self.deletion_policy = Some(policy);
        self.update_replace_policy = Some(policy);
        self
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }
}

// ============================================================================
// Outputs and template
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Export {
    #[serde(rename = "Name")]
    pub name: String,
}

/// Named value surfaced after deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Output {
    #[serde(rename = "Description")]
    pub description: String,

    #[serde(rename = "Value")]
    pub value: Token,

    #[serde(rename = "Export", default, skip_serializing_if = "Option::is_none")]
    pub export: Option<Export>,
}

/// The synthesized document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,

    #[serde(rename = "Description", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(rename = "Resources", default)]
    pub resources: IndexMap<LogicalId, CfnResource>,

    #[serde(rename = "Outputs", default, skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, Output>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            format_version: "2010-09-09".to_string(),
            description: None,
            resources: IndexMap::new(),
            outputs: IndexMap::new(),
        }
    }
}

impl Template {
    pub fn resource(&self, id: &LogicalId) -> Option<&CfnResource> {
        self.resources.get(id)
    }

    /// Resources of a given type in declaration order.
    pub fn resources_of_type<'a>(
        &'a self,
        resource_type: &'a str,
    ) -> impl Iterator<Item = (&'a LogicalId, &'a CfnResource)> + 'a {
        self.resources
            .iter()
            .filter(move |(_, r)| r.resource_type == resource_type)
    }

    pub fn count_of_type(&self, resource_type: &str) -> usize {
        self.resources_of_type(resource_type).count()
    }

    /// First resource of `resource_type` whose `key` property equals `value`.
    pub fn find_by_property<'a>(
        &'a self,
        resource_type: &'a str,
        key: &str,
        value: &Value,
    ) -> Option<(&'a LogicalId, &'a CfnResource)> {
        self.resources_of_type(resource_type)
            .find(|(_, r)| r.property(key) == Some(value))
    }

    pub fn output(&self, name: &str) -> Option<&Output> {
        self.outputs.get(name)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
