use std::collections::BTreeMap;

use stack_core::config::StackContext;
use stack_core::naming::{unit_resource_name, ComputeUnit, UnitResource};
use stack_core::outputs::StackOutputs;
use stack_core::reference::{OutputStore, StackReference};
use stack_core::stack::published_outputs;
use thiserror::Error;

use crate::adapters::function_url::FunctionUrlLookup;
use crate::adapters::identity::CallerIdentity;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("identity lookup failed: {0}")]
    Identity(String),

    #[error("function url lookup for '{function}' failed: {message}")]
    FunctionUrl { function: String, message: String },

    #[error("failed to publish outputs for '{reference}': {message}")]
    Store { reference: String, message: String },
}

/// Collects the applied stack's outputs and writes them where stack
/// references read them from.
pub fn handle_publish(
    context: &StackContext,
    identity: &dyn CallerIdentity,
    function_urls: &dyn FunctionUrlLookup,
    store: &dyn OutputStore,
) -> Result<StackOutputs, PublishError> {
    let account_id = identity.account_id().map_err(PublishError::Identity)?;
    let region = identity.region().map_err(PublishError::Identity)?;

    let mut urls = BTreeMap::new();
    for unit in ComputeUnit::ALL {
        let function = unit_resource_name(context, unit, UnitResource::Function);
        match function_urls
            .function_url(&function)
            .map_err(|message| PublishError::FunctionUrl {
                function: function.clone(),
                message,
            })? {
            Some(url) => {
                urls.insert(unit, url);
            }
            None => tracing::warn!(
                unit = %unit,
                function = %function,
                "function url not found, output left unpublished"
            ),
        }
    }

    let outputs = published_outputs(context, &account_id, &region, &urls);
    let reference = StackReference::to_self(context);
    store
        .write_outputs(&reference, &outputs)
        .map_err(|message| PublishError::Store {
            reference: reference.path(),
            message,
        })?;

    tracing::info!(
        reference = %reference,
        outputs = outputs.values.len(),
        "stack outputs published"
    );
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::adapters::identity::StaticIdentity;

    use super::*;

    struct RecordingStore {
        writes: Mutex<HashMap<String, StackOutputs>>,
    }

    impl RecordingStore {
        fn new() -> Self {
            Self {
                writes: Mutex::new(HashMap::new()),
            }
        }

        fn written(&self, path: &str) -> Option<StackOutputs> {
            self.writes
                .lock()
                .expect("poisoned mutex")
                .get(path)
                .cloned()
        }
    }

    impl OutputStore for RecordingStore {
        fn read_outputs(&self, reference: &StackReference) -> Result<Option<StackOutputs>, String> {
            Ok(self.written(&reference.path()))
        }

        fn write_outputs(
            &self,
            reference: &StackReference,
            outputs: &StackOutputs,
        ) -> Result<(), String> {
            self.writes
                .lock()
                .expect("poisoned mutex")
                .insert(reference.path(), outputs.clone());
            Ok(())
        }
    }

    struct FixedUrls(HashMap<String, String>);

    impl FunctionUrlLookup for FixedUrls {
        fn function_url(&self, function_name: &str) -> Result<Option<String>, String> {
            Ok(self.0.get(function_name).cloned())
        }
    }

    struct BrokenUrls;

    impl FunctionUrlLookup for BrokenUrls {
        fn function_url(&self, _function_name: &str) -> Result<Option<String>, String> {
            Err("AccessDeniedException".to_string())
        }
    }

    fn context() -> StackContext {
        StackContext::new("organization", "hello-api", "dev").expect("valid context")
    }

    fn identity() -> StaticIdentity {
        StaticIdentity {
            account_id: "123456789012".to_string(),
            region: "ap-northeast-1".to_string(),
        }
    }

    #[test]
    fn publishes_stripped_urls_and_arns_to_own_reference() {
        let store = RecordingStore::new();
        let urls = FixedUrls(HashMap::from([
            (
                "dev-hello-api-api-lambda".to_string(),
                "https://primary.lambda-url.ap-northeast-1.on.aws/".to_string(),
            ),
            (
                "dev-hello-api-api-lambda-remote".to_string(),
                "https://remote.lambda-url.ap-northeast-1.on.aws/".to_string(),
            ),
        ]));

        handle_publish(&context(), &identity(), &urls, &store).expect("published");

        let outputs = store
            .written("organization/hello-api/dev")
            .expect("outputs written");
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
    }

    #[test]
    fn missing_function_url_is_left_out() {
        let store = RecordingStore::new();
        let urls = FixedUrls(HashMap::new());

        let outputs = handle_publish(&context(), &identity(), &urls, &store).expect("published");

        assert_eq!(outputs.get("API_LAMBDA_FUNCTION_URL"), None);
        assert!(outputs.get("API_LAMBDA_ROLE_ARN").is_some());
    }

    #[test]
    fn lookup_failure_publishes_nothing() {
        let store = RecordingStore::new();

        let error =
            handle_publish(&context(), &identity(), &BrokenUrls, &store).expect_err("lookup fails");

        assert_eq!(
            error,
            PublishError::FunctionUrl {
                function: "dev-hello-api-api-lambda".to_string(),
                message: "AccessDeniedException".to_string(),
            }
        );
        assert_eq!(store.written("organization/hello-api/dev"), None);
    }
}
