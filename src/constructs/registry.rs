//! ECR repositories for the two container images.

use crate::core::config::ContainerRegistryConfig;
use crate::core::error::Result;
use crate::core::policy::{actions, Statement};
use crate::core::stack::Stack;
use crate::core::template::{kind, CfnResource, LogicalId, RemovalPolicy, Token};
use serde_json::json;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct RepositoryHandle {
    pub id: LogicalId,
    pub name: String,
}

impl RepositoryHandle {
    pub fn arn(&self) -> Token {
        Token::get_att(&self.id, "Arn")
    }

    /// `<account>.dkr.ecr.<region>.<url-suffix>/<repo>`
    pub fn uri(&self) -> Token {
        Token::sub(format!(
            "${{AWS::AccountId}}.dkr.ecr.${{AWS::Region}}.${{AWS::URLSuffix}}/${{{}}}",
            self.id
        ))
    }

    /// Image pull. Authorization tokens are not resource-scoped.
    pub fn pull_statements(&self) -> Vec<Statement> {
        vec![
            Statement::allow(actions::ECR_PULL, [self.arn()]),
            Statement::allow_any(actions::ECR_AUTH),
        ]
    }

    pub fn push_pull_statements(&self) -> Vec<Statement> {
        let acts: Vec<&str> = actions::ECR_PULL
            .iter()
            .chain(actions::ECR_PUSH)
            .copied()
            .collect();
        vec![
            Statement::allow(&acts, [self.arn()]),
            Statement::allow_any(actions::ECR_AUTH),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegistryHandle {
    pub backend: RepositoryHandle,
    pub frontend: RepositoryHandle,
}

fn repository(stack: &mut Stack, id: &str, name: &str) -> Result<RepositoryHandle> {
    let id = stack.add_resource(
        id,
        CfnResource::new(
            kind::REPOSITORY,
            json!({
                "RepositoryName": name,
                "EmptyOnDelete": true,
            }),
        )
        .with_removal(RemovalPolicy::Delete),
    )?;
    Ok(RepositoryHandle {
        id,
        name: name.to_string(),
    })
}

pub fn declare(stack: &mut Stack, config: &ContainerRegistryConfig) -> Result<RegistryHandle> {
    let backend = repository(stack, "ContainerRegistryBackendRepository", &config.backend_repo_name)?;
    let frontend = repository(stack, "ContainerRegistryFrontendRepository", &config.frontend_repo_name)?;
    debug!(backend = %backend.name, frontend = %frontend.name, "repositories declared");
    Ok(RegistryHandle { backend, frontend })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::references;
    use crate::core::stack::StackEnv;

    #[test]
    fn test_registry_repositories() {
        let mut s = Stack::new("T", StackEnv::default());
        let h = declare(&mut s, &ContainerRegistryConfig::default()).unwrap();
        assert_eq!(s.template().count_of_type(kind::REPOSITORY), 2);
        let r = s.resource(&h.frontend.id).unwrap();
        assert_eq!(r.property("RepositoryName"), Some(&json!("gara-frontend-app")));
        assert_eq!(r.property("EmptyOnDelete"), Some(&json!(true)));
        assert_eq!(r.deletion_policy, Some(RemovalPolicy::Delete));
    }

    #[test]
    fn test_registry_uri_references_repository() {
        let mut s = Stack::new("T", StackEnv::default());
        let h = declare(&mut s, &ContainerRegistryConfig::default()).unwrap();
        let uri = h.backend.uri();
        assert_eq!(
            uri.as_value()["Fn::Sub"],
            "${AWS::AccountId}.dkr.ecr.${AWS::Region}.${AWS::URLSuffix}/${ContainerRegistryBackendRepository}"
        );
        let refs: Vec<String> = references(uri.as_value()).into_iter().collect();
        assert_eq!(refs, vec!["ContainerRegistryBackendRepository"]);
    }

    #[test]
    fn test_registry_push_includes_pull() {
        let mut s = Stack::new("T", StackEnv::default());
        let h = declare(&mut s, &ContainerRegistryConfig::default()).unwrap();
        let push = h.backend.push_pull_statements();
        assert!(push[0].actions.contains(&"ecr:PutImage".to_string()));
        assert!(push[0].actions.contains(&"ecr:BatchGetImage".to_string()));
        assert_eq!(push[1].resources, vec![Token::literal("*")]);
    }
}
