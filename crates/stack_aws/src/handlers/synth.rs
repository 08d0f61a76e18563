use std::fs;
use std::path::{Path, PathBuf};

use stack_core::build::{BuildPlan, PackagedArtifact};
use stack_core::error::{BuildError, DeclarationError};
use stack_core::graph::Environment;
use stack_core::reference::OutputStore;
use stack_core::stack::{synthesize, StackDeclaration, StackDefinition};

use crate::adapters::command::CommandRunner;
use crate::adapters::identity::CallerIdentity;
use crate::handlers::build::BuildHandler;

/// Provider-facing side of declaration: identity lookups, the output store
/// for stack references and the inline build step.
pub struct StackEnvironment<'a, R> {
    identity: &'a dyn CallerIdentity,
    store: &'a dyn OutputStore,
    builds: &'a BuildHandler<R>,
}

impl<'a, R: CommandRunner> StackEnvironment<'a, R> {
    pub fn new(
        identity: &'a dyn CallerIdentity,
        store: &'a dyn OutputStore,
        builds: &'a BuildHandler<R>,
    ) -> Self {
        Self {
            identity,
            store,
            builds,
        }
    }
}

impl<R: CommandRunner> Environment for StackEnvironment<'_, R> {
    fn account_id(&self) -> Result<String, String> {
        self.identity.account_id()
    }

    fn region(&self) -> Result<String, String> {
        self.identity.region()
    }

    fn output_store(&self) -> &dyn OutputStore {
        self.store
    }

    fn ensure_artifact(&self, plan: &BuildPlan) -> Result<PackagedArtifact, BuildError> {
        self.builds.ensure_artifact(plan)
    }
}

pub fn declaration_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join("declarations").join(format!("{stack}.json"))
}

pub fn handle_synth(
    definition: &StackDefinition,
    environment: &dyn Environment,
) -> Result<StackDeclaration, DeclarationError> {
    let declaration = synthesize(definition, environment)?;
    tracing::info!(
        stack = %definition.context.stack,
        resources = declaration.resources.len(),
        rebuilt = declaration.artifacts.iter().filter(|artifact| artifact.rebuilt).count(),
        "stack declaration synthesized"
    );
    Ok(declaration)
}

pub fn write_declaration(path: &Path, declaration: &StackDeclaration) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(declaration)?;
    fs::write(path, body)
}
