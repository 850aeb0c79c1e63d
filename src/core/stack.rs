//! Synthesis context shared by every construct.
//!
//! A [`Stack`] owns the template under construction. Constructs declare
//! resources through it, mutate them later through [`Stack::set_property`],
//! and record explicit ordering with [`Stack::add_dependency`].

use super::error::{Result, SynthError};
use super::resolver;
use super::template::{CfnResource, Export, LogicalId, Output, Pseudo, Template, Token};
use indexmap::IndexMap;
use serde_json::Value;
use tracing::debug;

/// Deployment target. Unset fields fall back to the stack's pseudo
/// parameters, so the template stays environment-agnostic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackEnv {
    pub account: Option<String>,
    pub region: Option<String>,
}

impl StackEnv {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Self { account, region }
    }

    pub fn account_token(&self) -> Token {
        match &self.account {
            Some(a) => Token::literal(a.clone()),
            None => Token::pseudo(Pseudo::AccountId),
        }
    }

    pub fn region_token(&self) -> Token {
        match &self.region {
            Some(r) => Token::literal(r.clone()),
            None => Token::pseudo(Pseudo::Region),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stack {
    name: String,
    env: StackEnv,
    template: Template,
}

impl Stack {
    pub fn new(name: impl Into<String>, env: StackEnv) -> Self {
        Self {
            name: name.into(),
            env,
            template: Template::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn env(&self) -> &StackEnv {
        &self.env
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.template.description = Some(description.into());
    }

    /// Declare a resource under a template-unique logical ID.
    pub fn add_resource(
        &mut self,
        id: impl Into<LogicalId>,
        resource: CfnResource,
    ) -> Result<LogicalId> {
        let id = id.into();
        if !id.is_valid() {
            return Err(SynthError::InvalidLogicalId(id.to_string()));
        }
        if self.template.resources.contains_key(&id) {
            return Err(SynthError::DuplicateLogicalId(id.to_string()));
        }
        debug!(id = %id, kind = %resource.resource_type, "declare");
        self.template.resources.insert(id.clone(), resource);
        Ok(id)
    }

    /// Record that `from` must be created after `on`. Repeated edges collapse.
    pub fn add_dependency(&mut self, from: &LogicalId, on: &LogicalId) -> Result<()> {
        if !self.template.resources.contains_key(on) {
            return Err(SynthError::UnknownResource(on.to_string()));
        }
        let resource = self.resource_mut(from)?;
        if !resource.depends_on.contains(on) {
            resource.depends_on.push(on.clone());
        }
        Ok(())
    }

    /// Replace one property of an already-declared resource.
    pub fn set_property(&mut self, id: &LogicalId, key: &str, value: Value) -> Result<()> {
        let resource = self.resource_mut(id)?;
        resource.properties.insert(key.to_string(), value);
        Ok(())
    }

    pub fn resource(&self, id: &LogicalId) -> Option<&CfnResource> {
        self.template.resource(id)
    }

    fn resource_mut(&mut self, id: &LogicalId) -> Result<&mut CfnResource> {
        self.template
            .resources
            .get_mut(id)
            .ok_or_else(|| SynthError::UnknownResource(id.to_string()))
    }

    /// Add a named output exported as `<stack>-<name>`.
    pub fn add_output(&mut self, name: &str, description: &str, value: Token) -> Result<()> {
        if !LogicalId::new(name).is_valid() {
            return Err(SynthError::InvalidLogicalId(name.to_string()));
        }
        if self.template.outputs.contains_key(name) {
            return Err(SynthError::DuplicateLogicalId(name.to_string()));
        }
        self.template.outputs.insert(
            name.to_string(),
            Output {
                description: description.to_string(),
                value,
                export: Some(Export {
                    name: format!("{}-{}", self.name, name),
                }),
            },
        );
        Ok(())
    }

    /// The template as declared so far, unvalidated.
    pub fn template(&self) -> &Template {
        &self.template
    }

    /// Validate the reference graph and render the template with resources
    /// in deploy order.
    pub fn synth(&self) -> Result<Template> {
        let order = resolver::build_deploy_order(&self.template)?;
        let mut resources = IndexMap::with_capacity(order.len());
        for id in order {
            if let Some(r) = self.template.resources.get(&id) {
                resources.insert(id, r.clone());
            }
        }
        Ok(Template {
            format_version: self.template.format_version.clone(),
            description: self.template.description.clone(),
            resources,
            outputs: self.template.outputs.clone(),
        })
    }
}
