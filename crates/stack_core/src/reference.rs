use serde::{Deserialize, Serialize};

use crate::config::{validate_segment, StackContext};
use crate::error::ReferenceError;
use crate::outputs::StackOutputs;

/// Fully-qualified pointer to another deployment's published outputs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StackReference {
    pub organization: String,
    pub project: String,
    pub stack: String,
}

impl StackReference {
    /// Parses `organization/project/stack`. Segments follow the same rules
    /// as stack context names, so a reference always maps to a single key
    /// under the output store's root.
    pub fn parse(path: &str) -> Result<Self, ReferenceError> {
        let malformed = || ReferenceError::MalformedPath(path.to_string());
        let segments: Vec<&str> = path.trim().split('/').collect();
        let [organization, project, stack] = segments.as_slice() else {
            return Err(malformed());
        };
        for (field, value) in [
            ("organization", organization),
            ("project", project),
            ("stack", stack),
        ] {
            validate_segment(field, value).map_err(|_| malformed())?;
        }
        Ok(Self {
            organization: (*organization).to_string(),
            project: (*project).to_string(),
            stack: (*stack).to_string(),
        })
    }

    /// Reference to the previously published outputs of the given stack.
    pub fn to_self(context: &StackContext) -> Self {
        Self {
            organization: context.organization.clone(),
            project: context.project.clone(),
            stack: context.stack.clone(),
        }
    }

    pub fn path(&self) -> String {
        format!("{}/{}/{}", self.organization, self.project, self.stack)
    }
}

impl std::fmt::Display for StackReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path())
    }
}

/// Backing storage for published stack outputs.
pub trait OutputStore {
    /// Returns `Ok(None)` when the referenced stack has never published.
    fn read_outputs(&self, reference: &StackReference) -> Result<Option<StackOutputs>, String>;

    fn write_outputs(&self, reference: &StackReference, outputs: &StackOutputs)
        -> Result<(), String>;
}

/// Resolves a single named output. Missing stacks and keys are errors, never
/// defaulted.
pub fn resolve_output(
    store: &dyn OutputStore,
    reference: &StackReference,
    key: &str,
) -> Result<String, ReferenceError> {
    let outputs = store
        .read_outputs(reference)
        .map_err(|message| ReferenceError::Store {
            reference: reference.path(),
            message,
        })?
        .ok_or_else(|| ReferenceError::MissingStack(reference.path()))?;

    outputs
        .get(key)
        .map(str::to_string)
        .ok_or_else(|| ReferenceError::MissingOutput {
            reference: reference.path(),
            key: key.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::naming::ComputeUnit;
    use crate::outputs::OutputKey;

    struct MemoryStore {
        stacks: Mutex<HashMap<String, StackOutputs>>,
    }

    impl OutputStore for MemoryStore {
        fn read_outputs(
            &self,
            reference: &StackReference,
        ) -> Result<Option<StackOutputs>, String> {
            Ok(self
                .stacks
                .lock()
                .expect("poisoned mutex")
                .get(&reference.path())
                .cloned())
        }

        fn write_outputs(
            &self,
            reference: &StackReference,
            outputs: &StackOutputs,
        ) -> Result<(), String> {
            self.stacks
                .lock()
                .expect("poisoned mutex")
                .insert(reference.path(), outputs.clone());
            Ok(())
        }
    }

    struct FailingStore;

    impl OutputStore for FailingStore {
        fn read_outputs(&self, _: &StackReference) -> Result<Option<StackOutputs>, String> {
            Err("access denied".to_string())
        }

        fn write_outputs(&self, _: &StackReference, _: &StackOutputs) -> Result<(), String> {
            Err("access denied".to_string())
        }
    }

    fn seeded_store() -> MemoryStore {
        let store = MemoryStore {
            stacks: Mutex::new(HashMap::new()),
        };
        let mut outputs = StackOutputs::new();
        outputs.insert(
            OutputKey::FunctionArn(ComputeUnit::ApiLambda),
            "arn:aws:lambda:ap-northeast-1:123456789012:function:dev-hello-api-api-lambda",
        );
        store
            .write_outputs(
                &StackReference::parse("organization/hello-api/dev").expect("valid"),
                &outputs,
            )
            .expect("write succeeds");
        store
    }

    #[test]
    fn parses_fully_qualified_paths() {
        let reference = StackReference::parse("organization/hello-api/dev").expect("valid");
        assert_eq!(reference.project, "hello-api");
        assert_eq!(reference.to_string(), "organization/hello-api/dev");
    }

    #[test]
    fn rejects_partial_paths() {
        for path in ["hello-api/dev", "organization//dev", "a/b/c/d", ""] {
            assert_eq!(
                StackReference::parse(path),
                Err(ReferenceError::MalformedPath(path.to_string()))
            );
        }
    }

    #[test]
    fn rejects_segments_that_escape_the_store_root() {
        for path in ["../../x", "organization/../dev", "organization/hello-api/.", "a/b c/d"] {
            assert_eq!(
                StackReference::parse(path),
                Err(ReferenceError::MalformedPath(path.to_string()))
            );
        }
    }

    #[test]
    fn self_reference_follows_context() {
        let context = StackContext::new("organization", "hello-api", "dev").expect("valid");
        assert_eq!(
            StackReference::to_self(&context).path(),
            "organization/hello-api/dev"
        );
    }

    #[test]
    fn resolves_published_output() {
        let store = seeded_store();
        let reference = StackReference::parse("organization/hello-api/dev").expect("valid");
        let value = resolve_output(&store, &reference, "API_LAMBDA_ARN").expect("resolves");
        assert!(value.ends_with(":function:dev-hello-api-api-lambda"));
    }

    #[test]
    fn missing_output_key_is_an_error() {
        let store = seeded_store();
        let reference = StackReference::parse("organization/hello-api/dev").expect("valid");
        let error = resolve_output(&store, &reference, "API_LAMBDA_REMOTE_FUNCTION_URL")
            .expect_err("missing key");
        assert_eq!(
            error,
            ReferenceError::MissingOutput {
                reference: "organization/hello-api/dev".to_string(),
                key: "API_LAMBDA_REMOTE_FUNCTION_URL".to_string(),
            }
        );
    }

    #[test]
    fn missing_stack_is_an_error() {
        let store = seeded_store();
        let reference = StackReference::parse("organization/hello-api/prod").expect("valid");
        let error = resolve_output(&store, &reference, "API_LAMBDA_ARN").expect_err("missing");
        assert_eq!(
            error,
            ReferenceError::MissingStack("organization/hello-api/prod".to_string())
        );
    }

    #[test]
    fn store_failures_carry_reference_path() {
        let reference = StackReference::parse("organization/hello-api/dev").expect("valid");
        let error =
            resolve_output(&FailingStore, &reference, "API_LAMBDA_ARN").expect_err("fails");
        assert_eq!(
            error.to_string(),
            "output store failure for 'organization/hello-api/dev': access denied"
        );
    }
}
