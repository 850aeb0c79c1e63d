//! One-shot pipeline start on stack creation.
//!
//! A single Lambda-backed provider serves every `Custom::PipelineTrigger`
//! in the stack. On create it starts the named pipeline; update and delete
//! are acknowledged without side effects.

use super::role::Role;
use crate::core::error::Result;
use crate::core::policy::{actions, principal, Statement};
use crate::core::stack::Stack;
use crate::core::template::{kind, CfnResource, LogicalId, Token};
use serde_json::json;
use tracing::debug;

const HANDLER_SOURCE: &str = r#"import boto3
import cfnresponse


def handler(event, context):
    props = event["ResourceProperties"]
    physical_id = props.get("PhysicalResourceId", event.get("PhysicalResourceId"))
    try:
        if event["RequestType"] == "Create":
            boto3.client("codepipeline").start_pipeline_execution(name=props["PipelineName"])
        cfnresponse.send(event, context, cfnresponse.SUCCESS, {}, physical_id)
    except Exception as exc:
        print(exc)
        cfnresponse.send(event, context, cfnresponse.FAILED, {"Error": str(exc)}, physical_id)
"#;

const BASIC_EXECUTION_POLICY: &str = "service-role/AWSLambdaBasicExecutionRole";

#[derive(Debug, Clone)]
pub struct TriggerProvider {
    function: LogicalId,
    role: Role,
}

impl TriggerProvider {
    pub fn declare(stack: &mut Stack) -> Result<Self> {
        let role = Role::new(
            stack,
            "PipelineTriggerProviderRole",
            principal::LAMBDA,
            None,
            &[BASIC_EXECUTION_POLICY],
        )?;
        let function = stack.add_resource(
            "PipelineTriggerProviderFunction",
            CfnResource::new(
                kind::FUNCTION,
                json!({
                    "Runtime": "python3.12",
                    "Handler": "index.handler",
                    "Timeout": 60,
                    "Role": role.handle().arn(),
                    "Code": { "ZipFile": HANDLER_SOURCE },
                }),
            ),
        )?;
        debug!("pipeline trigger provider declared");
        Ok(Self { function, role })
    }

    pub fn service_token(&self) -> Token {
        Token::get_att(&self.function, "Arn")
    }

    /// Declare a trigger for `pipeline` and let the provider start it.
    pub fn trigger(
        &mut self,
        stack: &mut Stack,
        id: &str,
        pipeline: &LogicalId,
        pipeline_name: &str,
        pipeline_arn: Token,
    ) -> Result<LogicalId> {
        self.role.add_to_policy(
            stack,
            Statement::allow(actions::START_PIPELINE, [pipeline_arn]),
        )?;
        if let Some(policy) = self.role.policy_id().cloned() {
            stack.add_dependency(&self.function, &policy)?;
        }
        let trigger = stack.add_resource(
            id,
            CfnResource::new(
                kind::PIPELINE_TRIGGER,
                json!({
                    "ServiceToken": self.service_token(),
                    "PipelineName": Token::reference(pipeline),
                    "PhysicalResourceId": format!("trigger-{}-initial", pipeline_name),
                }),
            ),
        )?;
        stack.add_dependency(&trigger, pipeline)?;
        Ok(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::stack::StackEnv;

    #[test]
    fn test_trigger_provider_shared() {
        let mut s = Stack::new("T", StackEnv::default());
        let mut provider = TriggerProvider::declare(&mut s).unwrap();
        for name in ["a", "b"] {
            let id = LogicalId::new(format!("Pipeline{}", name.to_uppercase()));
            s.add_resource(id.clone(), CfnResource::new(kind::PIPELINE, json!({ "Name": name })))
                .unwrap();
            let arn = Token::literal(format!("arn:aws:codepipeline:us-east-1:1:{}", name));
            let trigger = provider
                .trigger(&mut s, &format!("Trigger{}", name.to_uppercase()), &id, name, arn)
                .unwrap();
            let r = s.resource(&trigger).unwrap();
            assert_eq!(r.depends_on, vec![id]);
            assert_eq!(
                r.properties["PhysicalResourceId"],
                format!("trigger-{}-initial", name)
            );
        }
        assert_eq!(s.template().count_of_type(kind::FUNCTION), 1);
        assert_eq!(s.template().count_of_type(kind::PIPELINE_TRIGGER), 2);
        assert_eq!(provider.role.document().statements.len(), 2);
        s.synth().unwrap();
    }
}
