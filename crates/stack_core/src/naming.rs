use serde::{Deserialize, Serialize};

use crate::config::StackContext;

/// A compute unit declared by the stack.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ComputeUnit {
    ApiLambda,
    ApiLambdaRemote,
}

impl ComputeUnit {
    pub const ALL: [ComputeUnit; 2] = [Self::ApiLambda, Self::ApiLambdaRemote];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiLambda => "api-lambda",
            Self::ApiLambdaRemote => "api-lambda-remote",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|unit| unit.as_str() == raw.trim())
    }
}

impl std::fmt::Display for ComputeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitResource {
    Function,
    Role,
    BasicExecutionAttachment,
    XrayMonitoringPolicy,
    XrayMonitoringAttachment,
    Build,
    FunctionUrl,
}

impl UnitResource {
    pub const ALL: [UnitResource; 7] = [
        Self::Function,
        Self::Role,
        Self::BasicExecutionAttachment,
        Self::XrayMonitoringPolicy,
        Self::XrayMonitoringAttachment,
        Self::Build,
        Self::FunctionUrl,
    ];

    fn suffix(self) -> Option<&'static str> {
        match self {
            Self::Function => None,
            Self::Role => Some("role"),
            Self::BasicExecutionAttachment => Some("basic-execution-policy-attachment"),
            Self::XrayMonitoringPolicy => Some("xray-monitoring-policy"),
            Self::XrayMonitoringAttachment => Some("xray-monitoring-policy-attachment"),
            Self::Build => Some("build"),
            Self::FunctionUrl => Some("url"),
        }
    }
}

pub fn name_prefix(context: &StackContext) -> String {
    format!("{}-{}", context.stack, context.project)
}

pub fn unit_id(context: &StackContext, unit: ComputeUnit) -> String {
    format!("{}-{}", name_prefix(context), unit.as_str())
}

pub fn unit_resource_name(
    context: &StackContext,
    unit: ComputeUnit,
    resource: UnitResource,
) -> String {
    let id = unit_id(context, unit);
    match resource.suffix() {
        Some(suffix) => format!("{id}-{suffix}"),
        None => id,
    }
}

pub fn log_group_name(context: &StackContext, unit: ComputeUnit) -> String {
    format!("/aws/lambda/{}", unit_id(context, unit))
}

pub fn transaction_search_policy_name(context: &StackContext) -> String {
    format!("{}-transaction-search-access-policy", name_prefix(context))
}

/// Every provider-side resource name the stack declares, in declaration order.
pub fn all_resource_names(context: &StackContext) -> Vec<String> {
    let mut names = Vec::with_capacity(ComputeUnit::ALL.len() * UnitResource::ALL.len() + 1);
    for unit in ComputeUnit::ALL {
        for resource in UnitResource::ALL {
            names.push(unit_resource_name(context, unit, resource));
        }
    }
    names.push(transaction_search_policy_name(context));
    names
}
