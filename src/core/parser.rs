//! YAML loading and advisory validation of the configuration tree.
//!
//! A configuration file is an overlay: its mapping is deep-merged over the
//! serialized defaults, so a file only names the values it changes.
//! Validation catches configurations that would synthesize incoherently:
//! - Pipeline container names must match their service's container
//! - Build project, pipeline, and role names must be unique
//! - Names must not be empty
//! - At least one availability zone
//! - Subnet masks inside the VPC block, with room for every subnet
//! - Container names ECS accepts
//! - Health-check timeout below the interval

use super::config::{host_bits, GaraConfig, HealthCheckConfig, VpcConfig};
use super::error::{Result, SynthError};
use serde_yaml_ng::Value;
use std::collections::BTreeSet;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a configuration file from disk.
pub fn parse_config_file(path: &Path) -> Result<GaraConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SynthError::io(path, e))?;
    parse_config(&content)
}

/// Parse a configuration overlay. An empty document yields the defaults.
pub fn parse_config(yaml: &str) -> Result<GaraConfig> {
    let blank = yaml
        .lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with('#') || l == "---");
    if blank {
        return Ok(GaraConfig::default());
    }
    let overlay: Value = serde_yaml_ng::from_str(yaml)?;
    if overlay.is_null() {
        return Ok(GaraConfig::default());
    }
    let mut base = serde_yaml_ng::to_value(GaraConfig::default())?;
    merge_yaml(&mut base, overlay);
    Ok(serde_yaml_ng::from_value(base)?)
}

/// Deep-merge `overlay` into `base`. Mappings merge key by key; any other
/// overlay value replaces the base value outright.
pub fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &GaraConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.vpc.max_azs == 0 {
        errors.push(ValidationError::new("vpc.max_azs must be at least 1"));
    } else {
        check_subnets(&mut errors, &config.vpc);
    }

    for (field, name) in [
        ("backend_service.container_name", &config.backend_service.container_name),
        ("frontend_service.container_name", &config.frontend_service.container_name),
    ] {
        if !name.is_empty() && !is_container_name(name) {
            errors.push(ValidationError::new(format!(
                "{} '{}' may only contain letters, digits, '-' and '_' (max 255)",
                field, name
            )));
        }
    }

    // Names CloudFormation would reject as empty
    let names = [
        ("vpc.vpc_name", &config.vpc.vpc_name),
        ("storage.s3_bucket_prefix", &config.storage.s3_bucket_prefix),
        ("storage.dynamodb_table_prefix", &config.storage.dynamodb_table_prefix),
        ("storage.partition_key", &config.storage.partition_key),
        ("container_registry.backend_repo_name", &config.container_registry.backend_repo_name),
        ("container_registry.frontend_repo_name", &config.container_registry.frontend_repo_name),
        ("ecs_cluster.cluster_name", &config.ecs_cluster.cluster_name),
        ("backend_service.container_name", &config.backend_service.container_name),
        ("frontend_service.container_name", &config.frontend_service.container_name),
        ("backend_pipeline.pipeline_name", &config.backend_pipeline.pipeline_name),
        ("frontend_pipeline.pipeline_name", &config.frontend_pipeline.pipeline_name),
        ("backend_pipeline.codebuild.project_name", &config.backend_pipeline.codebuild.project_name),
        ("frontend_pipeline.codebuild.project_name", &config.frontend_pipeline.codebuild.project_name),
        ("secrets.github_token_secret_name", &config.secrets.github_token_secret_name),
        ("secrets.api_key_secret_name", &config.secrets.api_key_secret_name),
    ];
    for (field, value) in names {
        if value.trim().is_empty() {
            errors.push(ValidationError::new(format!("{} must not be empty", field)));
        }
    }

    // Deploy stage targets the container by name
    for (label, pipeline, service) in [
        ("backend", &config.backend_pipeline, &config.backend_service),
        ("frontend", &config.frontend_pipeline, &config.frontend_service),
    ] {
        if pipeline.container_name != service.container_name {
            errors.push(ValidationError::new(format!(
                "{}_pipeline.container_name '{}' does not match {}_service.container_name '{}'",
                label, pipeline.container_name, label, service.container_name
            )));
        }
    }

    check_unique(
        &mut errors,
        "build project name",
        [
            &config.backend_pipeline.codebuild.project_name,
            &config.frontend_pipeline.codebuild.project_name,
        ],
    );
    check_unique(
        &mut errors,
        "pipeline name",
        [
            &config.backend_pipeline.pipeline_name,
            &config.frontend_pipeline.pipeline_name,
        ],
    );
    check_unique(
        &mut errors,
        "IAM role name",
        [
            &config.iam.backend_task_role_name,
            &config.iam.frontend_task_role_name,
            &config.iam.backend_execution_role_name,
            &config.iam.frontend_execution_role_name,
            &config.iam.codebuild_role_name,
        ],
    );

    check_health(&mut errors, "backend_service", &config.backend_service.health_check);
    check_health(&mut errors, "frontend_service", &config.frontend_service.health_check);

    errors
}

fn check_unique<'a>(
    errors: &mut Vec<ValidationError>,
    what: &str,
    names: impl IntoIterator<Item = &'a String>,
) {
    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name.as_str()) {
            errors.push(ValidationError::new(format!("duplicate {} '{}'", what, name)));
        }
    }
}

/// Smallest subnet AWS allows.
const MAX_SUBNET_PREFIX: u8 = 28;

/// `Fn::Cidr` carves at most this many blocks.
const MAX_CIDR_COUNT: u64 = 256;

fn check_subnets(errors: &mut Vec<ValidationError>, vpc: &VpcConfig) {
    let Some(vpc_prefix) = vpc.prefix_len() else {
        errors.push(ValidationError::new(format!(
            "vpc.cidr '{}' is not a CIDR block",
            vpc.cidr
        )));
        return;
    };

    let mut masks_ok = true;
    for (field, mask) in [
        ("vpc.public_subnet_cidr_mask", vpc.public_subnet_cidr_mask),
        ("vpc.private_subnet_cidr_mask", vpc.private_subnet_cidr_mask),
    ] {
        if mask < vpc_prefix || mask > MAX_SUBNET_PREFIX {
            errors.push(ValidationError::new(format!(
                "{} ({}) must be between {} and {}",
                field, mask, vpc_prefix, MAX_SUBNET_PREFIX
            )));
            masks_ok = false;
        }
    }
    if !masks_ok {
        return;
    }

    let azs = u64::from(vpc.max_azs);
    let private_count = vpc.private_block_offset() + azs;
    if azs > MAX_CIDR_COUNT || private_count > MAX_CIDR_COUNT {
        errors.push(ValidationError::new(format!(
            "vpc: {} zones need {} private-sized blocks, more than {} can be carved",
            vpc.max_azs, private_count, MAX_CIDR_COUNT
        )));
        return;
    }
    let needed = private_count << host_bits(vpc.private_subnet_cidr_mask);
    let available = 1u64 << host_bits(vpc_prefix);
    if needed > available {
        errors.push(ValidationError::new(format!(
            "vpc.cidr '{}' holds {} addresses but subnets for {} zones need {}",
            vpc.cidr, available, vpc.max_azs, needed
        )));
    }
}

/// ECS container names: `[A-Za-z0-9_-]{1,255}`.
fn is_container_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 255
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn check_health(errors: &mut Vec<ValidationError>, service: &str, hc: &HealthCheckConfig) {
    if hc.timeout_seconds >= hc.interval_seconds {
        errors.push(ValidationError::new(format!(
            "{}.health_check.timeout_seconds ({}) must be less than interval_seconds ({})",
            service, hc.timeout_seconds, hc.interval_seconds
        )));
    }
}
