use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::naming::ComputeUnit;

pub const OUTPUTS_SCHEMA_VERSION: &str = "v1";

/// Named output a stack publishes for consumption by other stacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputKey {
    FunctionUrl(ComputeUnit),
    RoleArn(ComputeUnit),
    FunctionArn(ComputeUnit),
}

impl OutputKey {
    /// Outputs published by a stack, in export order.
    pub const PUBLISHED: [OutputKey; 5] = [
        Self::FunctionUrl(ComputeUnit::ApiLambda),
        Self::RoleArn(ComputeUnit::ApiLambda),
        Self::FunctionArn(ComputeUnit::ApiLambda),
        Self::FunctionUrl(ComputeUnit::ApiLambdaRemote),
        Self::RoleArn(ComputeUnit::ApiLambdaRemote),
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::FunctionUrl(ComputeUnit::ApiLambda) => "API_LAMBDA_FUNCTION_URL",
            Self::RoleArn(ComputeUnit::ApiLambda) => "API_LAMBDA_ROLE_ARN",
            Self::FunctionArn(ComputeUnit::ApiLambda) => "API_LAMBDA_ARN",
            Self::FunctionUrl(ComputeUnit::ApiLambdaRemote) => "API_LAMBDA_REMOTE_FUNCTION_URL",
            Self::RoleArn(ComputeUnit::ApiLambdaRemote) => "API_LAMBDA_REMOTE_ROLE_ARN",
            Self::FunctionArn(ComputeUnit::ApiLambdaRemote) => "API_LAMBDA_REMOTE_ARN",
        }
    }
}

/// Published outputs of one stack, keyed by output name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StackOutputs {
    pub schema_version: String,
    pub values: BTreeMap<String, String>,
}

impl StackOutputs {
    pub fn new() -> Self {
        Self {
            schema_version: OUTPUTS_SCHEMA_VERSION.to_string(),
            values: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, key: OutputKey, value: impl Into<String>) {
        self.values.insert(key.name().to_string(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// Removes exactly one trailing `/` from a provider-assigned URL.
pub fn strip_trailing_slash(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}

pub fn role_arn(account_id: &str, role_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:role/{role_name}")
}

pub fn function_arn(region: &str, account_id: &str, function_name: &str) -> String {
    format!("arn:aws:lambda:{region}:{account_id}:function:{function_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_trailing_slash() {
        assert_eq!(
            strip_trailing_slash("https://example.com/"),
            "https://example.com"
        );
        assert_eq!(
            strip_trailing_slash("https://example.com"),
            "https://example.com"
        );
        assert_eq!(
            strip_trailing_slash("https://example.com//"),
            "https://example.com/"
        );
        assert_eq!(strip_trailing_slash(""), "");
    }

    #[test]
    fn published_output_names_are_distinct() {
        let mut names: Vec<_> = OutputKey::PUBLISHED.iter().map(|key| key.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), OutputKey::PUBLISHED.len());
    }

    #[test]
    fn builds_deterministic_arns() {
        assert_eq!(
            role_arn("123456789012", "dev-hello-api-api-lambda-role"),
            "arn:aws:iam::123456789012:role/dev-hello-api-api-lambda-role"
        );
        assert_eq!(
            function_arn("ap-northeast-1", "123456789012", "dev-hello-api-api-lambda"),
            "arn:aws:lambda:ap-northeast-1:123456789012:function:dev-hello-api-api-lambda"
        );
    }

    #[test]
    fn outputs_round_trip_through_store_json() {
        let mut outputs = StackOutputs::new();
        outputs.insert(
            OutputKey::FunctionUrl(ComputeUnit::ApiLambdaRemote),
            "https://abc.lambda-url.ap-northeast-1.on.aws",
        );
        let raw = serde_json::to_string(&outputs).expect("serializes");
        let parsed: StackOutputs = serde_json::from_str(&raw).expect("parses");
        assert_eq!(
            parsed.get("API_LAMBDA_REMOTE_FUNCTION_URL"),
            Some("https://abc.lambda-url.ap-northeast-1.on.aws")
        );
        assert_eq!(parsed.schema_version, "v1");
    }
}
