//! References to secrets that exist before deployment.
//!
//! Nothing is declared. A missing secret surfaces as a deploy-time failure
//! of the first resource that resolves it.

use crate::core::config::SecretsConfig;
use crate::core::policy::{actions, Statement};
use crate::core::template::Token;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretHandle {
    pub name: String,
    pub json_key: Option<String>,
}

impl SecretHandle {
    pub fn from_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            json_key: None,
        }
    }

    pub fn with_json_key(mut self, key: impl Into<String>) -> Self {
        self.json_key = Some(key.into());
        self
    }

    fn arn_prefix(&self) -> String {
        format!(
            "arn:${{AWS::Partition}}:secretsmanager:${{AWS::Region}}:${{AWS::AccountId}}:secret:{}",
            self.name
        )
    }

    /// ARN without the random suffix. Secrets Manager and ECS resolve it to
    /// the secret by name.
    pub fn partial_arn(&self) -> Token {
        Token::sub(self.arn_prefix())
    }

    /// Policy resource matching any suffix Secrets Manager appended.
    /// `?` is only a wildcard inside IAM policies.
    pub fn policy_arn(&self) -> Token {
        Token::sub(format!("{}-??????", self.arn_prefix()))
    }

    /// Dynamic reference resolving to the secret (or its JSON key) at deploy time.
    pub fn value(&self) -> Token {
        match &self.json_key {
            Some(key) => Token::secret_json_value(&self.name, key),
            None => Token::literal(format!("{{{{resolve:secretsmanager:{}}}}}", self.name)),
        }
    }

    pub fn read_statement(&self) -> Statement {
        Statement::allow(actions::SECRET_READ, [self.policy_arn()])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretsHandle {
    pub github_token: SecretHandle,
    pub api_key: SecretHandle,
}

pub fn resolve(config: &SecretsConfig) -> SecretsHandle {
    debug!(
        github = %config.github_token_secret_name,
        api_key = %config.api_key_secret_name,
        "secrets referenced"
    );
    SecretsHandle {
        github_token: SecretHandle::from_name(&config.github_token_secret_name)
            .with_json_key(&config.github_token_json_key),
        api_key: SecretHandle::from_name(&config.api_key_secret_name),
    }
}
