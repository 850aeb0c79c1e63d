//! Change planning: diff a fresh synthesis against the persisted template.

use super::hasher;
use super::template::{CfnResource, LogicalId, Template};
use serde::Serialize;
use std::fmt;

/// What deploying the new template does to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlannedChange {
    pub logical_id: LogicalId,
    pub resource_type: String,
    pub action: PlanAction,
    pub description: String,
}

/// Per-resource actions plus summary counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChangeSet {
    pub stack: String,
    pub changes: Vec<PlannedChange>,
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

impl ChangeSet {
    pub fn has_changes(&self) -> bool {
        self.to_create + self.to_update + self.to_destroy > 0
    }
}

/// Compare `next` to `previous` (None = nothing deployed yet). Changes come
/// in `next`'s resource order, followed by removed resources.
pub fn plan(stack: &str, previous: Option<&Template>, next: &Template) -> ChangeSet {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    for (id, resource) in &next.resources {
        let old = previous.and_then(|p| p.resource(id));
        let action = determine_action(old, resource);
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::NoOp => unchanged += 1,
            PlanAction::Destroy => to_destroy += 1,
        }
        changes.push(PlannedChange {
            logical_id: id.clone(),
            resource_type: resource.resource_type.clone(),
            action,
            description: describe_action(id, resource, old, action),
        });
    }

    if let Some(prev) = previous {
        for (id, resource) in &prev.resources {
            if next.resources.contains_key(id) {
                continue;
            }
            to_destroy += 1;
            changes.push(PlannedChange {
                logical_id: id.clone(),
                resource_type: resource.resource_type.clone(),
                action: PlanAction::Destroy,
                description: describe_action(id, resource, None, PlanAction::Destroy),
            });
        }
    }

    ChangeSet {
        stack: stack.to_string(),
        changes,
        to_create,
        to_update,
        to_destroy,
        unchanged,
    }
}

fn determine_action(old: Option<&CfnResource>, new: &CfnResource) -> PlanAction {
    match old {
        None => PlanAction::Create,
        Some(old) if hasher::hash_resource(old) == hasher::hash_resource(new) => PlanAction::NoOp,
        Some(_) => PlanAction::Update,
    }
}

fn describe_action(
    id: &LogicalId,
    resource: &CfnResource,
    old: Option<&CfnResource>,
    action: PlanAction,
) -> String {
    match action {
        PlanAction::Create => format!("{}: create {}", id, resource.resource_type),
        PlanAction::Update => match old {
            Some(o) if o.resource_type != resource.resource_type => format!(
                "{}: replace {} with {}",
                id, o.resource_type, resource.resource_type
            ),
            Some(o) => {
                let mut keys: Vec<&str> = resource
                    .properties
                    .iter()
                    .filter(|(k, v)| o.properties.get(*k) != Some(*v))
                    .map(|(k, _)| k.as_str())
                    .chain(
                        o.properties
                            .keys()
                            .filter(|k| !resource.properties.contains_key(*k))
                            .map(String::as_str),
                    )
                    .collect();
                keys.sort_unstable();
                if keys.is_empty() {
                    format!("{}: update (attributes changed)", id)
                } else {
                    format!("{}: update {}", id, keys.join(", "))
                }
            }
            None => format!("{}: update", id),
        },
        PlanAction::Destroy => format!("{}: destroy {}", id, resource.resource_type),
        PlanAction::NoOp => format!("{}: no changes", id),
    }
}
