//! The stack's declaration graph.
//!
//! Node ids are `<scope>/<name>`. Resources appear in the synthesized
//! declaration unit by unit (identity, function, URL), followed by the
//! monitoring policy.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::build::{build_plan, PackagedArtifact, UpstreamBindings};
use crate::config::{StackContext, StackSettings};
use crate::error::{DeclarationError, NodeError, ReferenceError};
use crate::graph::{DeclarationGraph, Environment, Node};
use crate::naming::{unit_resource_name, ComputeUnit, UnitResource};
use crate::outputs::{function_arn, role_arn, strip_trailing_slash, OutputKey, StackOutputs};
use crate::reference::{resolve_output, OutputStore, StackReference};
use crate::resources::{
    function, function_url, transaction_search_access_policy, unit_identity, Resource,
};

pub const DECLARATION_SCHEMA_VERSION: &str = "v1";

const ACCOUNT_NODE: &str = "context/account_id";
const REGION_NODE: &str = "context/region";
const UPSTREAM_NODE: &str = "api-lambda/upstream";
const TRANSACTION_SEARCH_NODE: &str = "monitoring/transaction_search_policy";

/// Inputs shared by every declaration of one stack.
#[derive(Debug, Clone, PartialEq)]
pub struct StackDefinition {
    pub context: StackContext,
    pub settings: StackSettings,
    pub workspace_root: PathBuf,
    /// Stack whose outputs feed the primary unit's build.
    pub upstream: StackReference,
    /// Units declared by this definition, in declaration order.
    pub units: Vec<ComputeUnit>,
}

impl StackDefinition {
    /// Definition whose primary unit consumes its own stack's last published
    /// outputs.
    pub fn new(context: StackContext, settings: StackSettings, workspace_root: PathBuf) -> Self {
        let upstream = StackReference::to_self(&context);
        Self {
            context,
            settings,
            workspace_root,
            upstream,
            units: ComputeUnit::ALL.to_vec(),
        }
    }

    /// Restricts the declaration to one unit. Scoping to the remote unit
    /// skips the upstream lookup, which lets a fresh stack be bootstrapped
    /// before it has published a remote endpoint.
    pub fn scoped_to(mut self, unit: ComputeUnit) -> Self {
        self.units = vec![unit];
        self
    }

    fn declares(&self, unit: ComputeUnit) -> bool {
        self.units.contains(&unit)
    }
}

/// Fully resolved declaration handed to the apply engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackDeclaration {
    pub schema_version: String,
    pub context: StackContext,
    pub account_id: String,
    pub region: String,
    pub resources: Vec<Resource>,
    pub artifacts: Vec<PackagedArtifact>,
    /// Outputs known before apply; function URLs are provider-assigned and
    /// published separately.
    pub outputs: StackOutputs,
}

fn unit_node(unit: ComputeUnit, name: &str) -> String {
    format!("{}/{name}", unit.as_str())
}

fn resource_nodes(units: &[ComputeUnit]) -> Vec<String> {
    let mut nodes = Vec::new();
    for &unit in units {
        nodes.push(unit_node(unit, "identity"));
        nodes.push(unit_node(unit, "function"));
        nodes.push(unit_node(unit, "function_url"));
    }
    nodes.push(TRANSACTION_SEARCH_NODE.to_string());
    nodes
}

fn to_value(value: impl Serialize) -> Result<Value, NodeError> {
    Ok(serde_json::to_value(value)?)
}

pub fn declaration_graph(
    definition: &StackDefinition,
) -> Result<DeclarationGraph, DeclarationError> {
    let mut graph = DeclarationGraph::new();

    graph.add(Node::source(ACCOUNT_NODE, |environment| {
        environment
            .account_id()
            .map(Value::from)
            .map_err(NodeError::Provider)
    }))?;
    graph.add(Node::source(REGION_NODE, |environment| {
        environment
            .region()
            .map(Value::from)
            .map_err(NodeError::Provider)
    }))?;

    if definition.declares(ComputeUnit::ApiLambda) {
        let upstream = definition.upstream.clone();
        graph.add(Node::source(UPSTREAM_NODE, move |environment| {
            to_value(resolve_upstream(environment.output_store(), &upstream)?)
        }))?;
    }

    for &unit in &definition.units {
        add_unit(&mut graph, definition, unit)?;
    }

    let context = definition.context.clone();
    graph.add(Node::derive(
        TRANSACTION_SEARCH_NODE,
        &[ACCOUNT_NODE, REGION_NODE],
        move |inputs| {
            let policy = transaction_search_access_policy(
                &context,
                inputs.str(ACCOUNT_NODE)?,
                inputs.str(REGION_NODE)?,
            )?;
            to_value(Resource::LogResourcePolicy(policy))
        },
    ))?;

    Ok(graph)
}

fn add_unit(
    graph: &mut DeclarationGraph,
    definition: &StackDefinition,
    unit: ComputeUnit,
) -> Result<(), DeclarationError> {
    let identity_node = unit_node(unit, "identity");
    let role_arn_node = unit_node(unit, "role_arn");
    let artifact_node = unit_node(unit, "artifact");
    let function_node = unit_node(unit, "function");
    let function_arn_node = unit_node(unit, "function_arn");
    let url_node = unit_node(unit, "function_url");

    let context = definition.context.clone();
    graph.add(Node::derive(identity_node.clone(), &[ACCOUNT_NODE], move |inputs| {
        to_value(unit_identity(&context, unit, inputs.str(ACCOUNT_NODE)?)?)
    }))?;

    let context = definition.context.clone();
    graph.add(Node::derive(role_arn_node.clone(), &[ACCOUNT_NODE], move |inputs| {
        let role_name = unit_resource_name(&context, unit, UnitResource::Role);
        to_value(role_arn(inputs.str(ACCOUNT_NODE)?, &role_name))
    }))?;

    let context = definition.context.clone();
    let settings = definition.settings.clone();
    let workspace_root = definition.workspace_root.clone();
    let artifact_dependencies: &[&str] = match unit {
        ComputeUnit::ApiLambda => &[UPSTREAM_NODE],
        ComputeUnit::ApiLambdaRemote => &[],
    };
    graph.add(Node::effect(
        artifact_node.clone(),
        artifact_dependencies,
        move |inputs, environment| {
            let upstream = match unit {
                ComputeUnit::ApiLambda => Some(inputs.decode::<UpstreamBindings>(UPSTREAM_NODE)?),
                ComputeUnit::ApiLambdaRemote => None,
            };
            let plan = build_plan(&context, &settings, unit, &workspace_root, upstream.as_ref());
            let artifact = environment.ensure_artifact(&plan)?;
            to_value(artifact)
        },
    ))?;

    let context = definition.context.clone();
    let settings = definition.settings.clone();
    let (role_dep, artifact_dep, identity_dep) = (
        role_arn_node.clone(),
        artifact_node.clone(),
        identity_node.clone(),
    );
    graph.add(Node::derive(
        function_node.clone(),
        &[
            role_arn_node.as_str(),
            artifact_node.as_str(),
            identity_node.as_str(),
        ],
        move |inputs| {
            // The identity node is a dependency so the role exists first.
            inputs.get(&identity_dep)?;
            let artifact: PackagedArtifact = inputs.decode(&artifact_dep)?;
            let spec = function(&context, &settings, unit, inputs.str(&role_dep)?, &artifact);
            to_value(Resource::Function(Box::new(spec)))
        },
    ))?;

    let context = definition.context.clone();
    graph.add(Node::derive(
        function_arn_node,
        &[ACCOUNT_NODE, REGION_NODE, function_node.as_str()],
        move |inputs| {
            let name = unit_resource_name(&context, unit, UnitResource::Function);
            to_value(function_arn(
                inputs.str(REGION_NODE)?,
                inputs.str(ACCOUNT_NODE)?,
                &name,
            ))
        },
    ))?;

    let context = definition.context.clone();
    let settings = definition.settings.clone();
    graph.add(Node::derive(url_node, &[function_node.as_str()], move |_| {
        to_value(Resource::FunctionUrl(function_url(&context, &settings, unit)))
    }))?;

    Ok(())
}

/// Values the primary unit's build reads from the referenced stack.
pub fn resolve_upstream(
    store: &dyn OutputStore,
    upstream: &StackReference,
) -> Result<UpstreamBindings, ReferenceError> {
    Ok(UpstreamBindings {
        api_lambda_arn: resolve_output(
            store,
            upstream,
            OutputKey::FunctionArn(ComputeUnit::ApiLambda).name(),
        )?,
        remote_endpoint: resolve_output(
            store,
            upstream,
            OutputKey::FunctionUrl(ComputeUnit::ApiLambdaRemote).name(),
        )?,
    })
}

/// Evaluates the stack graph and assembles the declaration document.
pub fn synthesize(
    definition: &StackDefinition,
    environment: &dyn Environment,
) -> Result<StackDeclaration, DeclarationError> {
    let graph = declaration_graph(definition)?;
    let resolved = graph.evaluate(environment)?;

    let mut resources = Vec::new();
    for node in resource_nodes(&definition.units) {
        match decode_node::<Value>(&resolved, &node)? {
            Value::Array(items) => {
                for item in items {
                    resources.push(decode_value(&node, item)?);
                }
            }
            value => resources.push(decode_value(&node, value)?),
        }
    }

    let mut artifacts = Vec::new();
    let mut outputs = StackOutputs::new();
    for &unit in &definition.units {
        artifacts.push(decode_node(&resolved, &unit_node(unit, "artifact"))?);
        outputs.insert(
            OutputKey::RoleArn(unit),
            decode_node::<String>(&resolved, &unit_node(unit, "role_arn"))?,
        );
    }
    if definition.declares(ComputeUnit::ApiLambda) {
        let arn_node = unit_node(ComputeUnit::ApiLambda, "function_arn");
        outputs.insert(
            OutputKey::FunctionArn(ComputeUnit::ApiLambda),
            decode_node::<String>(&resolved, &arn_node)?,
        );
    }

    Ok(StackDeclaration {
        schema_version: DECLARATION_SCHEMA_VERSION.to_string(),
        context: definition.context.clone(),
        account_id: decode_node(&resolved, ACCOUNT_NODE)?,
        region: decode_node(&resolved, REGION_NODE)?,
        resources,
        artifacts,
        outputs,
    })
}

fn decode_node<T: serde::de::DeserializeOwned>(
    resolved: &BTreeMap<String, Value>,
    node: &str,
) -> Result<T, DeclarationError> {
    let value = resolved.get(node).cloned().ok_or_else(|| DeclarationError::NodeFailed {
        node: node.to_string(),
        source: Box::new(NodeError::MissingInput(node.to_string())),
    })?;
    decode_value(node, value)
}

fn decode_value<T: serde::de::DeserializeOwned>(
    node: &str,
    value: Value,
) -> Result<T, DeclarationError> {
    serde_json::from_value(value).map_err(|error| DeclarationError::NodeFailed {
        node: node.to_string(),
        source: Box::new(NodeError::Serialization(error)),
    })
}

/// Outputs a stack publishes once the provider has assigned function URLs.
pub fn published_outputs(
    context: &StackContext,
    account_id: &str,
    region: &str,
    function_urls: &BTreeMap<ComputeUnit, String>,
) -> StackOutputs {
    let mut outputs = StackOutputs::new();
    for key in OutputKey::PUBLISHED {
        match key {
            OutputKey::FunctionUrl(unit) => {
                if let Some(url) = function_urls.get(&unit) {
                    outputs.insert(key, strip_trailing_slash(url));
                }
            }
            OutputKey::RoleArn(unit) => {
                let role_name = unit_resource_name(context, unit, UnitResource::Role);
                outputs.insert(key, role_arn(account_id, &role_name));
            }
            OutputKey::FunctionArn(unit) => {
                let name = unit_resource_name(context, unit, UnitResource::Function);
                outputs.insert(key, function_arn(region, account_id, &name));
            }
        }
    }
    outputs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> StackContext {
        StackContext::new("organization", "hello-api", "dev").expect("valid context")
    }

    #[test]
    fn graph_declares_every_unit_and_monitoring_policy() {
        let definition = StackDefinition::new(context(), StackSettings::default(), ".".into());
        let graph = declaration_graph(&definition).expect("graph builds");
        let order = graph.topological_order().expect("acyclic");

        assert_eq!(order.len(), graph.len());
        let position = |id: &str| {
            order
                .iter()
                .position(|node| node == id)
                .unwrap_or_else(|| panic!("missing node {id}"))
        };
        assert!(position("api-lambda/upstream") < position("api-lambda/artifact"));
        assert!(position("api-lambda/identity") < position("api-lambda/function"));
        assert!(position("api-lambda/function") < position("api-lambda/function_url"));
        assert!(
            position("api-lambda-remote/role_arn") < position("api-lambda-remote/function")
        );
        assert!(position("context/account_id") < position(TRANSACTION_SEARCH_NODE));
    }

    #[test]
    fn remote_scope_leaves_out_primary_and_upstream_nodes() {
        let definition = StackDefinition::new(context(), StackSettings::default(), ".".into())
            .scoped_to(ComputeUnit::ApiLambdaRemote);
        let graph = declaration_graph(&definition).expect("graph builds");
        let order = graph.topological_order().expect("acyclic");

        assert!(order.iter().all(|node| !node.starts_with("api-lambda/")));
        assert!(order.iter().any(|node| node == "api-lambda-remote/artifact"));
        assert!(order.iter().any(|node| node == TRANSACTION_SEARCH_NODE));
    }

    #[test]
    fn published_outputs_strip_trailing_slash_and_derive_arns() {
        let urls = BTreeMap::from([
            (
                ComputeUnit::ApiLambda,
                "https://primary.lambda-url.ap-northeast-1.on.aws/".to_string(),
            ),
            (
                ComputeUnit::ApiLambdaRemote,
                "https://remote.lambda-url.ap-northeast-1.on.aws/".to_string(),
            ),
        ]);
        let outputs = published_outputs(&context(), "123456789012", "ap-northeast-1", &urls);

        assert_eq!(
            outputs.get("API_LAMBDA_FUNCTION_URL"),
            Some("https://primary.lambda-url.ap-northeast-1.on.aws")
        );
        assert_eq!(
            outputs.get("API_LAMBDA_REMOTE_FUNCTION_URL"),
            Some("https://remote.lambda-url.ap-northeast-1.on.aws")
        );
        assert_eq!(
            outputs.get("API_LAMBDA_ARN"),
            Some("arn:aws:lambda:ap-northeast-1:123456789012:function:dev-hello-api-api-lambda")
        );
        assert_eq!(
            outputs.get("API_LAMBDA_REMOTE_ROLE_ARN"),
            Some("arn:aws:iam::123456789012:role/dev-hello-api-api-lambda-remote-role")
        );
        assert_eq!(outputs.values.len(), 5);
    }

    #[test]
    fn unassigned_urls_are_left_out_of_outputs() {
        let outputs = published_outputs(
            &context(),
            "123456789012",
            "ap-northeast-1",
            &BTreeMap::new(),
        );
        assert_eq!(outputs.get("API_LAMBDA_FUNCTION_URL"), None);
        assert_eq!(outputs.values.len(), 3);
    }
}
