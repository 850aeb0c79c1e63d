//! Reference extraction and dependency DAG construction.
//!
//! Every `Ref`, `Fn::GetAtt`, and `${Name}` placeholder inside `Fn::Sub`
//! names a resource the referencing resource depends on; explicit
//! `DependsOn` edges are added on top. The deploy order is a topological sort
//! computed with Kahn's algorithm and deterministic (alphabetical)
//! tie-breaking.

use super::error::{Result, SynthError};
use super::template::{LogicalId, Template};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

/// Collect every resource name a JSON value refers to. Pseudo parameters
/// (`AWS::*`) are not resources and are skipped.
pub fn references(value: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect(value, &mut out);
    out
}

fn collect(value: &Value, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) if map.len() == 1 => {
            if let Some(Value::String(target)) = map.get("Ref") {
                if !target.starts_with("AWS::") {
                    out.insert(target.clone());
                }
                return;
            }
            if let Some(att) = map.get("Fn::GetAtt") {
                match att {
                    Value::Array(parts) => {
                        if let Some(Value::String(target)) = parts.first() {
                            out.insert(target.clone());
                        }
                    }
                    Value::String(dotted) => {
                        if let Some(target) = dotted.split('.').next() {
                            out.insert(target.to_string());
                        }
                    }
                    _ => {}
                }
                return;
            }
            if let Some(sub) = map.get("Fn::Sub") {
                collect_sub(sub, out);
                return;
            }
            for v in map.values() {
                collect(v, out);
            }
        }
        Value::Object(map) => {
            for v in map.values() {
                collect(v, out);
            }
        }
        Value::Array(items) => {
            for v in items {
                collect(v, out);
            }
        }
        _ => {}
    }
}

fn collect_sub(sub: &Value, out: &mut BTreeSet<String>) {
    let (template, locals) = match sub {
        Value::String(s) => (s.as_str(), None),
        Value::Array(parts) => match (parts.first(), parts.get(1)) {
            (Some(Value::String(s)), Some(Value::Object(vars))) => (s.as_str(), Some(vars)),
            (Some(Value::String(s)), None) => (s.as_str(), None),
            _ => return,
        },
        _ => return,
    };

    if let Some(vars) = locals {
        for v in vars.values() {
            collect(v, out);
        }
    }

    let mut rest = template;
    while let Some(open) = rest.find("${") {
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            break;
        };
        let placeholder = &after[..close];
        rest = &after[close + 1..];

        // `${!Literal}` is an escaped placeholder
        if placeholder.starts_with('!') || placeholder.starts_with("AWS::") {
            continue;
        }
        let target = placeholder.split('.').next().unwrap_or(placeholder);
        if locals.is_some_and(|vars| vars.contains_key(target)) {
            continue;
        }
        out.insert(target.to_string());
    }
}

/// Direct dependencies of a resource: implicit references plus `DependsOn`.
pub fn dependencies_of(template: &Template, id: &LogicalId) -> BTreeSet<String> {
    let Some(resource) = template.resource(id) else {
        return BTreeSet::new();
    };
    let mut deps = BTreeSet::new();
    for v in resource.properties.values() {
        collect(v, &mut deps);
    }
    deps.extend(resource.depends_on.iter().map(|d| d.as_str().to_string()));
    deps
}

/// Check that every reference (resources and outputs) names a declared
/// resource, then return a topological deploy order.
pub fn build_deploy_order(template: &Template) -> Result<Vec<LogicalId>> {
    let ids: Vec<&LogicalId> = template.resources.keys().collect();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();

    for id in &ids {
        in_degree.insert(id.as_str(), 0);
        adjacency.insert(id.as_str(), Vec::new());
    }

    for id in &ids {
        for dep in dependencies_of(template, id) {
            if dep == id.as_str() {
                return Err(SynthError::DependencyCycle(vec![dep]));
            }
            let Some((dep_key, _)) = in_degree.get_key_value(dep.as_str()) else {
                return Err(SynthError::UnknownReference {
                    from: id.to_string(),
                    target: dep,
                });
            };
            let dep_key: &str = *dep_key;
            if let Some(neighbors) = adjacency.get_mut(dep_key) {
                neighbors.push(id.as_str());
            }
            if let Some(degree) = in_degree.get_mut(id.as_str()) {
                *degree += 1;
            }
        }
    }

    for (name, output) in &template.outputs {
        for target in references(output.value.as_value()) {
            if !in_degree.contains_key(target.as_str()) {
                return Err(SynthError::UnknownReference {
                    from: format!("Outputs.{}", name),
                    target,
                });
            }
        }
    }

    // Kahn's algorithm with sorted tie-breaking
    let mut zero_degree: Vec<&str> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    zero_degree.sort_unstable();
    let mut queue: VecDeque<&str> = zero_degree.into_iter().collect();

    let mut order = Vec::with_capacity(ids.len());
    while let Some(current) = queue.pop_front() {
        order.push(LogicalId::new(current));

        let mut next_ready: Vec<&str> = Vec::new();
        if let Some(neighbors) = adjacency.get(current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(*neighbor);
                    }
                }
            }
        }
        next_ready.sort_unstable();
        queue.extend(next_ready);
    }

    if order.len() != ids.len() {
        let ordered: HashSet<&str> = order.iter().map(LogicalId::as_str).collect();
        let mut cycle_members: Vec<String> = ids
            .iter()
            .map(|id| id.as_str())
            .filter(|id| !ordered.contains(id))
            .map(str::to_string)
            .collect();
        cycle_members.sort();
        return Err(SynthError::DependencyCycle(cycle_members));
    }

    Ok(order)
}
