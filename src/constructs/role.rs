//! IAM role with an inline default policy that can grow after declaration.

use crate::core::error::Result;
use crate::core::policy::{PolicyDocument, Statement};
use crate::core::stack::Stack;
use crate::core::template::{kind, CfnResource, LogicalId, Token};
use serde_json::json;
use tracing::debug;

/// Reference to a declared role.
#[derive(Debug, Clone, PartialEq)]
pub struct RoleHandle {
    pub id: LogicalId,
    pub name: Option<String>,
}

impl RoleHandle {
    pub fn arn(&self) -> Token {
        Token::get_att(&self.id, "Arn")
    }
}

/// A role plus its default policy. The policy resource is declared on the
/// first statement and re-rendered on every later one.
#[derive(Debug, Clone)]
pub struct Role {
    handle: RoleHandle,
    policy_id: LogicalId,
    document: PolicyDocument,
    declared: bool,
}

/// AWS-managed policy ARN.
pub fn managed_policy_arn(name: &str) -> Token {
    Token::sub(format!("arn:${{AWS::Partition}}:iam::aws:policy/{}", name))
}

impl Role {
    /// Declare a role assumable by `service`.
    pub fn new(
        stack: &mut Stack,
        id: &str,
        service: &str,
        role_name: Option<&str>,
        managed_policies: &[&str],
    ) -> Result<Self> {
        let mut props = json!({
            "AssumeRolePolicyDocument": PolicyDocument::trust(service),
        });
        if let Some(name) = role_name {
            props["RoleName"] = json!(name);
        }
        if !managed_policies.is_empty() {
            let arns: Vec<Token> = managed_policies.iter().map(|p| managed_policy_arn(p)).collect();
            props["ManagedPolicyArns"] = json!(arns);
        }
        let role_id = stack.add_resource(id, CfnResource::new(kind::ROLE, props))?;
        Ok(Self {
            handle: RoleHandle {
                id: role_id,
                name: role_name.map(str::to_string),
            },
            policy_id: LogicalId::new(format!("{}DefaultPolicy", id)),
            document: PolicyDocument::default(),
            declared: false,
        })
    }

    pub fn handle(&self) -> &RoleHandle {
        &self.handle
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    /// The default policy, once it has at least one statement.
    pub fn policy_id(&self) -> Option<&LogicalId> {
        self.declared.then_some(&self.policy_id)
    }

    /// Append a statement. Returns false (and leaves the template untouched)
    /// when an identical statement is already present.
    pub fn add_to_policy(&mut self, stack: &mut Stack, statement: Statement) -> Result<bool> {
        if !self.document.add_statement(statement) {
            return Ok(false);
        }
        let document = self.document.to_value();
        if self.declared {
            stack.set_property(&self.policy_id, "PolicyDocument", document)?;
        } else {
            let props = json!({
                "PolicyName": self.policy_id.as_str(),
                "PolicyDocument": document,
                "Roles": [Token::reference(&self.handle.id)],
            });
            stack.add_resource(self.policy_id.clone(), CfnResource::new(kind::POLICY, props))?;
            self.declared = true;
        }
        debug!(role = %self.handle.id, statements = self.document.statements.len(), "policy updated");
        Ok(true)
    }

    pub fn add_statements(
        &mut self,
        stack: &mut Stack,
        statements: impl IntoIterator<Item = Statement>,
    ) -> Result<()> {
        for s in statements {
            self.add_to_policy(stack, s)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::policy::{actions, principal};
    use crate::core::stack::StackEnv;

    fn stack() -> Stack {
        Stack::new("T", StackEnv::default())
    }

    #[test]
    fn test_role_declares_trust_and_managed() {
        let mut s = stack();
        let role = Role::new(
            &mut s,
            "BuildRole",
            principal::CODEBUILD,
            Some("gara-codebuild-role"),
            &["AmazonEC2ContainerRegistryPowerUser"],
        )
        .unwrap();
        let r = s.resource(&role.handle().id).unwrap();
        assert_eq!(r.property("RoleName"), Some(&json!("gara-codebuild-role")));
        assert_eq!(
            r.properties["AssumeRolePolicyDocument"]["Statement"][0]["Principal"]["Service"],
            "codebuild.amazonaws.com"
        );
        assert_eq!(
            r.properties["ManagedPolicyArns"][0]["Fn::Sub"],
            "arn:${AWS::Partition}:iam::aws:policy/AmazonEC2ContainerRegistryPowerUser"
        );
        assert!(role.policy_id().is_none());
    }

    #[test]
    fn test_role_policy_declared_lazily_and_rerendered() {
        let mut s = stack();
        let mut role = Role::new(&mut s, "TaskRole", principal::ECS_TASKS, None, &[]).unwrap();
        assert!(role
            .add_to_policy(&mut s, Statement::allow_any(actions::PUT_METRICS))
            .unwrap());
        let policy_id = role.policy_id().cloned().unwrap();
        assert_eq!(policy_id.as_str(), "TaskRoleDefaultPolicy");

        let bucket = Token::literal("arn:aws:s3:::b");
        role.add_to_policy(&mut s, Statement::allow(actions::S3_READ, [bucket]))
            .unwrap();
        let doc = &s.resource(&policy_id).unwrap().properties["PolicyDocument"];
        assert_eq!(doc["Statement"].as_array().unwrap().len(), 2);
        assert_eq!(
            s.resource(&policy_id).unwrap().properties["Roles"][0],
            json!({"Ref": "TaskRole"})
        );
    }

    #[test]
    fn test_role_duplicate_statement_is_noop() {
        let mut s = stack();
        let mut role = Role::new(&mut s, "R", principal::ECS_TASKS, None, &[]).unwrap();
        let st = Statement::allow_any(actions::PUT_METRICS);
        assert!(role.add_to_policy(&mut s, st.clone()).unwrap());
        assert!(!role.add_to_policy(&mut s, st).unwrap());
        assert_eq!(role.document().statements.len(), 1);
    }
}
