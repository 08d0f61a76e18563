//! Declaration graph and its topological evaluator.
//!
//! Every declaration is a node whose value is a function of its resolved
//! dependencies. Source and effect nodes are the only ones handed the
//! [`Environment`]; derived nodes see nothing but their inputs. Evaluation
//! order is a deterministic topological sort, and the first failing node
//! aborts the whole evaluation.

use std::collections::{BTreeMap, BTreeSet};

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::build::{BuildPlan, PackagedArtifact};
use crate::error::{BuildError, DeclarationError, NodeError};
use crate::reference::OutputStore;

/// Everything a declaration may need from outside the graph.
pub trait Environment {
    fn account_id(&self) -> Result<String, String>;

    fn region(&self) -> Result<String, String>;

    fn output_store(&self) -> &dyn OutputStore;

    /// Returns a packaged, up-to-date artifact for the plan, building it
    /// inline when the cache is stale.
    fn ensure_artifact(&self, plan: &BuildPlan) -> Result<PackagedArtifact, BuildError>;
}

type Evaluator = Box<dyn Fn(&Inputs<'_>, &dyn Environment) -> Result<Value, NodeError>>;

pub struct Node {
    id: String,
    dependencies: Vec<String>,
    evaluate: Evaluator,
}

impl Node {
    /// Node resolved from the environment alone.
    pub fn source<F>(id: impl Into<String>, evaluate: F) -> Self
    where
        F: Fn(&dyn Environment) -> Result<Value, NodeError> + 'static,
    {
        Self {
            id: id.into(),
            dependencies: Vec::new(),
            evaluate: Box::new(move |_, environment| evaluate(environment)),
        }
    }

    /// Pure node computed from its dependencies.
    pub fn derive<F>(id: impl Into<String>, dependencies: &[&str], evaluate: F) -> Self
    where
        F: Fn(&Inputs<'_>) -> Result<Value, NodeError> + 'static,
    {
        Self {
            id: id.into(),
            dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
            evaluate: Box::new(move |inputs, _| evaluate(inputs)),
        }
    }

    /// Node that needs both resolved dependencies and the environment.
    pub fn effect<F>(id: impl Into<String>, dependencies: &[&str], evaluate: F) -> Self
    where
        F: Fn(&Inputs<'_>, &dyn Environment) -> Result<Value, NodeError> + 'static,
    {
        Self {
            id: id.into(),
            dependencies: dependencies.iter().map(|dep| dep.to_string()).collect(),
            evaluate: Box::new(evaluate),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Resolved values of a node's declared dependencies.
pub struct Inputs<'a> {
    allowed: &'a [String],
    values: &'a BTreeMap<String, Value>,
}

impl<'a> Inputs<'a> {
    pub fn get(&self, id: &str) -> Result<&'a Value, NodeError> {
        if !self.allowed.iter().any(|dep| dep == id) {
            return Err(NodeError::MissingInput(id.to_string()));
        }
        self.values
            .get(id)
            .ok_or_else(|| NodeError::MissingInput(id.to_string()))
    }

    pub fn str(&self, id: &str) -> Result<&'a str, NodeError> {
        self.get(id)?
            .as_str()
            .ok_or_else(|| NodeError::InvalidInput {
                input: id.to_string(),
                message: "expected a string".to_string(),
            })
    }

    pub fn decode<T: DeserializeOwned>(&self, id: &str) -> Result<T, NodeError> {
        serde_json::from_value(self.get(id)?.clone()).map_err(|error| NodeError::InvalidInput {
            input: id.to_string(),
            message: error.to_string(),
        })
    }
}

#[derive(Default)]
pub struct DeclarationGraph {
    nodes: BTreeMap<String, Node>,
}

impl DeclarationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, node: Node) -> Result<(), DeclarationError> {
        if self.nodes.contains_key(&node.id) {
            return Err(DeclarationError::DuplicateNode(node.id));
        }
        self.nodes.insert(node.id.clone(), node);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Kahn's algorithm; ties are broken by node id so the order is stable.
    pub fn topological_order(&self) -> Result<Vec<String>, DeclarationError> {
        let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (id, node) in &self.nodes {
            in_degree.entry(id.as_str()).or_insert(0);
            for dependency in &node.dependencies {
                if !self.nodes.contains_key(dependency) {
                    return Err(DeclarationError::UnknownDependency {
                        node: id.clone(),
                        dependency: dependency.clone(),
                    });
                }
                *in_degree.entry(id.as_str()).or_insert(0) += 1;
                dependents
                    .entry(dependency.as_str())
                    .or_default()
                    .push(id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != self.nodes.len() {
            let cyclic = in_degree
                .into_iter()
                .filter(|(_, degree)| *degree > 0)
                .map(|(id, _)| id.to_string())
                .collect();
            return Err(DeclarationError::Cycle(cyclic));
        }

        Ok(order)
    }

    pub fn evaluate(
        &self,
        environment: &dyn Environment,
    ) -> Result<BTreeMap<String, Value>, DeclarationError> {
        let order = self.topological_order()?;
        let mut resolved = BTreeMap::new();

        for id in order {
            let node = &self.nodes[&id];
            tracing::debug!(
                node = %id,
                dependencies = node.dependencies.len(),
                "evaluating declaration"
            );
            let inputs = Inputs {
                allowed: &node.dependencies,
                values: &resolved,
            };
            let value = (node.evaluate)(&inputs, environment).map_err(|source| {
                tracing::error!(node = %id, error = %source, "declaration failed");
                DeclarationError::NodeFailed {
                    node: id.clone(),
                    source: Box::new(source),
                }
            })?;
            resolved.insert(id, value);
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::path::PathBuf;

    use serde_json::json;

    use super::*;
    use crate::outputs::StackOutputs;
    use crate::reference::StackReference;

    struct NoStore;

    impl OutputStore for NoStore {
        fn read_outputs(&self, _: &StackReference) -> Result<Option<StackOutputs>, String> {
            Ok(None)
        }

        fn write_outputs(&self, _: &StackReference, _: &StackOutputs) -> Result<(), String> {
            Ok(())
        }
    }

    struct StaticEnvironment {
        account_lookups: RefCell<usize>,
    }

    impl StaticEnvironment {
        fn new() -> Self {
            Self {
                account_lookups: RefCell::new(0),
            }
        }
    }

    impl Environment for StaticEnvironment {
        fn account_id(&self) -> Result<String, String> {
            *self.account_lookups.borrow_mut() += 1;
            Ok("123456789012".to_string())
        }

        fn region(&self) -> Result<String, String> {
            Ok("ap-northeast-1".to_string())
        }

        fn output_store(&self) -> &dyn OutputStore {
            &NoStore
        }

        fn ensure_artifact(&self, plan: &BuildPlan) -> Result<PackagedArtifact, BuildError> {
            Ok(PackagedArtifact {
                unit: plan.unit,
                directory: plan.output_path(),
                archive: PathBuf::from("dist").join(format!("{}.zip", plan.unit)),
                fingerprint: "0".repeat(64),
                rebuilt: false,
            })
        }
    }

    fn constant(id: &str, value: Value) -> Node {
        Node::source(id, move |_| Ok(value.clone()))
    }

    #[test]
    fn evaluates_dependencies_before_dependents() {
        let mut graph = DeclarationGraph::new();
        graph
            .add(Node::derive("arn", &["account", "region"], |inputs| {
                Ok(json!(format!(
                    "arn:aws:lambda:{}:{}:function:f",
                    inputs.str("region")?,
                    inputs.str("account")?
                )))
            }))
            .expect("add");
        graph
            .add(Node::source("account", |env| {
                env.account_id().map(Value::from).map_err(NodeError::Provider)
            }))
            .expect("add");
        graph
            .add(Node::source("region", |env| {
                env.region().map(Value::from).map_err(NodeError::Provider)
            }))
            .expect("add");

        let environment = StaticEnvironment::new();
        let resolved = graph.evaluate(&environment).expect("evaluates");

        assert_eq!(
            resolved["arn"],
            json!("arn:aws:lambda:ap-northeast-1:123456789012:function:f")
        );
        assert_eq!(*environment.account_lookups.borrow(), 1);
    }

    #[test]
    fn topological_order_is_deterministic() {
        let mut graph = DeclarationGraph::new();
        for id in ["c", "a", "b"] {
            graph.add(constant(id, json!(id))).expect("add");
        }
        graph
            .add(Node::derive("z", &["c", "a"], |_| Ok(Value::Null)))
            .expect("add");

        assert_eq!(
            graph.topological_order().expect("acyclic"),
            vec!["a", "b", "c", "z"]
        );
    }

    #[test]
    fn rejects_duplicate_nodes() {
        let mut graph = DeclarationGraph::new();
        graph.add(constant("role", Value::Null)).expect("add");
        let error = graph.add(constant("role", Value::Null)).expect_err("dup");
        assert!(matches!(error, DeclarationError::DuplicateNode(id) if id == "role"));
    }

    #[test]
    fn rejects_unknown_dependencies() {
        let mut graph = DeclarationGraph::new();
        graph
            .add(Node::derive("function", &["role"], |_| Ok(Value::Null)))
            .expect("add");
        let error = graph.topological_order().expect_err("unknown");
        assert_eq!(
            error.to_string(),
            "declaration node 'function' depends on unknown node 'role'"
        );
    }

    #[test]
    fn detects_cycles() {
        let mut graph = DeclarationGraph::new();
        graph
            .add(Node::derive("a", &["b"], |_| Ok(Value::Null)))
            .expect("add");
        graph
            .add(Node::derive("b", &["a"], |_| Ok(Value::Null)))
            .expect("add");
        graph.add(constant("c", Value::Null)).expect("add");

        match graph.topological_order() {
            Err(DeclarationError::Cycle(nodes)) => assert_eq!(nodes, vec!["a", "b"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn failing_node_aborts_evaluation() {
        let mut graph = DeclarationGraph::new();
        graph
            .add(Node::source("lookup", |_| {
                Err(NodeError::Provider("no credentials".to_string()))
            }))
            .expect("add");
        graph
            .add(Node::derive("dependent", &["lookup"], |_| {
                panic!("dependent must not run")
            }))
            .expect("add");

        let error = graph
            .evaluate(&StaticEnvironment::new())
            .expect_err("lookup fails");
        assert_eq!(
            error.to_string(),
            "declaration node 'lookup' failed: provider lookup failed: no credentials"
        );
    }

    #[test]
    fn inputs_are_limited_to_declared_dependencies() {
        let mut graph = DeclarationGraph::new();
        graph.add(constant("a", json!("x"))).expect("add");
        graph.add(constant("b", json!("y"))).expect("add");
        graph
            .add(Node::derive("c", &["b"], |inputs| inputs.get("a").cloned()))
            .expect("add");

        let error = graph
            .evaluate(&StaticEnvironment::new())
            .expect_err("undeclared input");
        assert!(error.to_string().contains("input 'a' was not resolved"));
    }
}
