//! IAM and resource policy documents in the AWS policy language.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const LAMBDA_SERVICE_PRINCIPAL: &str = "lambda.amazonaws.com";
pub const XRAY_SERVICE_PRINCIPAL: &str = "xray.amazonaws.com";
pub const BASIC_EXECUTION_POLICY_ARN: &str =
    "arn:aws:iam::aws:policy/service-role/AWSLambdaBasicExecutionRole";
pub const XRAY_MONITORING_DESCRIPTION: &str = "Policy for Lambda to access X-Ray";
pub const XRAY_MONITORING_ACTIONS: [&str; 3] = [
    "xray:PutTraceSegments",
    "xray:PutSpans",
    "xray:PutSpansForIndexing",
];
pub const SPANS_LOG_GROUP: &str = "aws/spans";
pub const APPLICATION_SIGNALS_LOG_GROUP: &str = "/aws/application-signals/data";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PolicyDocument {
    #[serde(rename = "Version")]
    pub version: String,
    #[serde(rename = "Statement")]
    pub statement: Vec<Statement>,
}

impl PolicyDocument {
    pub fn new(statement: Vec<Statement>) -> Self {
        Self {
            version: POLICY_VERSION.to_string(),
            statement,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Effect {
    Allow,
    Deny,
}

/// A policy field that AWS accepts either as a scalar or as a list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn many<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Many(values.into_iter().map(Into::into).collect())
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::One(value) => vec![value.as_str()],
            Self::Many(values) => values.iter().map(String::as_str).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    #[serde(rename = "Service")]
    pub service: String,
}

pub type Condition = BTreeMap<String, BTreeMap<String, String>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statement {
    #[serde(rename = "Action")]
    pub action: OneOrMany,
    #[serde(rename = "Principal", default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    #[serde(rename = "Effect")]
    pub effect: Effect,
    #[serde(rename = "Resource", default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
    #[serde(rename = "Condition", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<Condition>,
}

/// Trust policy letting the Lambda service assume a role.
pub fn lambda_assume_role_policy() -> PolicyDocument {
    PolicyDocument::new(vec![Statement {
        action: OneOrMany::One("sts:AssumeRole".to_string()),
        principal: Some(Principal {
            service: LAMBDA_SERVICE_PRINCIPAL.to_string(),
        }),
        effect: Effect::Allow,
        resource: None,
        condition: None,
    }])
}

/// Minimal permission set for shipping traces and spans to X-Ray.
pub fn xray_monitoring_policy() -> PolicyDocument {
    PolicyDocument::new(vec![Statement {
        action: OneOrMany::many(XRAY_MONITORING_ACTIONS),
        principal: None,
        effect: Effect::Allow,
        resource: Some(OneOrMany::many(["*"])),
        condition: None,
    }])
}

/// Resource policy letting X-Ray transaction search write spans into the
/// account's span and application-signals log groups.
pub fn transaction_search_policy(account_id: &str, region: &str) -> PolicyDocument {
    let condition = BTreeMap::from([
        (
            "ArnLike".to_string(),
            BTreeMap::from([(
                "aws:SourceArn".to_string(),
                format!("arn:aws:xray:{region}:{account_id}:*"),
            )]),
        ),
        (
            "StringEquals".to_string(),
            BTreeMap::from([("aws:SourceAccount".to_string(), account_id.to_string())]),
        ),
    ]);

    PolicyDocument::new(vec![Statement {
        action: OneOrMany::many(["logs:PutLogEvents"]),
        principal: Some(Principal {
            service: XRAY_SERVICE_PRINCIPAL.to_string(),
        }),
        effect: Effect::Allow,
        resource: Some(OneOrMany::many([
            log_group_arn(region, account_id, SPANS_LOG_GROUP),
            log_group_arn(region, account_id, APPLICATION_SIGNALS_LOG_GROUP),
        ])),
        condition: Some(condition),
    }])
}

fn log_group_arn(region: &str, account_id: &str, log_group: &str) -> String {
    format!("arn:aws:logs:{region}:{account_id}:log-group:{log_group}:*")
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    #[test]
    fn trust_policy_uses_scalar_action() {
        let value = serde_json::to_value(lambda_assume_role_policy()).expect("serializes");
        assert_eq!(
            value,
            json!({
                "Version": "2012-10-17",
                "Statement": [{
                    "Action": "sts:AssumeRole",
                    "Principal": {"Service": "lambda.amazonaws.com"},
                    "Effect": "Allow"
                }]
            })
        );
    }

    #[test]
    fn xray_policy_grants_exactly_three_actions_on_any_resource() {
        let document = xray_monitoring_policy();
        let statement = &document.statement[0];
        assert_eq!(
            statement.action.values(),
            vec![
                "xray:PutTraceSegments",
                "xray:PutSpans",
                "xray:PutSpansForIndexing"
            ]
        );
        assert_eq!(
            statement.resource.as_ref().map(OneOrMany::values),
            Some(vec!["*"])
        );
        assert!(statement.principal.is_none());
    }

    #[test]
    fn transaction_search_policy_embeds_account_and_region() {
        let document = transaction_search_policy("123456789012", "ap-northeast-1");
        let statement = &document.statement[0];
        let resources = statement.resource.as_ref().expect("resources").values();

        assert_eq!(resources.len(), 2);
        for arn in &resources {
            assert!(arn.contains("123456789012"), "{arn}");
            assert!(arn.contains("ap-northeast-1"), "{arn}");
        }
        assert_eq!(
            resources,
            vec![
                "arn:aws:logs:ap-northeast-1:123456789012:log-group:aws/spans:*",
                concat!(
                    "arn:aws:logs:ap-northeast-1:123456789012:",
                    "log-group:/aws/application-signals/data:*"
                ),
            ]
        );
    }

    #[test]
    fn transaction_search_policy_conditions_on_source() {
        let value: Value = serde_json::to_value(transaction_search_policy(
            "123456789012",
            "ap-northeast-1",
        ))
        .expect("serializes");
        let statement = &value["Statement"][0];

        assert_eq!(statement["Principal"]["Service"], "xray.amazonaws.com");
        assert_eq!(statement["Action"], json!(["logs:PutLogEvents"]));
        assert_eq!(
            statement["Condition"]["ArnLike"]["aws:SourceArn"],
            "arn:aws:xray:ap-northeast-1:123456789012:*"
        );
        assert_eq!(
            statement["Condition"]["StringEquals"]["aws:SourceAccount"],
            "123456789012"
        );
    }

    #[test]
    fn policy_documents_parse_back_from_provider_json() {
        let raw = r#"{
            "Version": "2012-10-17",
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Principal": {"Service": "lambda.amazonaws.com"},
                "Effect": "Allow"
            }]
        }"#;
        let parsed: PolicyDocument = serde_json::from_str(raw).expect("parses");
        assert_eq!(parsed, lambda_assume_role_policy());
    }
}
