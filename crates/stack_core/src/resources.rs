//! Provider resource descriptors emitted by the stack.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::build::PackagedArtifact;
use crate::config::{StackContext, StackSettings, UrlAuthType};
use crate::naming::{
    log_group_name, transaction_search_policy_name, unit_resource_name, ComputeUnit, UnitResource,
};
use crate::policy::{
    lambda_assume_role_policy, transaction_search_policy, xray_monitoring_policy,
    BASIC_EXECUTION_POLICY_ARN, XRAY_MONITORING_DESCRIPTION,
};

pub const INVOKE_MODE_BUFFERED: &str = "BUFFERED";
pub const PACKAGE_TYPE_ZIP: &str = "Zip";
pub const LOG_FORMAT_JSON: &str = "JSON";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resource {
    Role(RoleSpec),
    Policy(PolicySpec),
    RolePolicyAttachment(RolePolicyAttachmentSpec),
    Function(Box<FunctionSpec>),
    FunctionUrl(FunctionUrlSpec),
    LogResourcePolicy(LogResourcePolicySpec),
}

impl Resource {
    pub fn name(&self) -> &str {
        match self {
            Self::Role(spec) => &spec.name,
            Self::Policy(spec) => &spec.name,
            Self::RolePolicyAttachment(spec) => &spec.name,
            Self::Function(spec) => &spec.name,
            Self::FunctionUrl(spec) => &spec.name,
            Self::LogResourcePolicy(spec) => &spec.name,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    pub name: String,
    /// Trust policy as the JSON string the provider expects.
    pub assume_role_policy: String,
    pub managed_policy_arns: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    pub name: String,
    pub description: String,
    pub policy: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicyAttachmentSpec {
    pub name: String,
    pub role: String,
    pub policy_arn: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    pub application_log_level: String,
    pub log_format: String,
    pub log_group: String,
    pub system_log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    pub name: String,
    pub architectures: Vec<String>,
    pub environment: BTreeMap<String, String>,
    /// Zip archive of the packaged artifact directory.
    pub code: PathBuf,
    pub code_fingerprint: String,
    pub ephemeral_storage_mb: u32,
    pub memory_size_mb: u32,
    pub handler: String,
    pub layers: Vec<String>,
    pub logging_config: LoggingConfig,
    pub package_type: String,
    pub role: String,
    pub runtime: String,
    pub timeout_seconds: u32,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionUrlSpec {
    pub name: String,
    pub authorization_type: UrlAuthType,
    pub function_name: String,
    pub invoke_mode: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogResourcePolicySpec {
    pub name: String,
    pub policy_name: String,
    pub policy_document: String,
}

pub fn policy_arn(account_id: &str, policy_name: &str) -> String {
    format!("arn:aws:iam::{account_id}:policy/{policy_name}")
}

/// Role, baseline execution attachment and X-Ray policy for one unit.
pub fn unit_identity(
    context: &StackContext,
    unit: ComputeUnit,
    account_id: &str,
) -> Result<Vec<Resource>, serde_json::Error> {
    let role_name = unit_resource_name(context, unit, UnitResource::Role);
    let xray_policy_name = unit_resource_name(context, unit, UnitResource::XrayMonitoringPolicy);

    Ok(vec![
        Resource::Role(RoleSpec {
            name: role_name.clone(),
            assume_role_policy: lambda_assume_role_policy().to_json()?,
            managed_policy_arns: Vec::new(),
            tags: context.tags(&role_name),
        }),
        Resource::RolePolicyAttachment(RolePolicyAttachmentSpec {
            name: unit_resource_name(context, unit, UnitResource::BasicExecutionAttachment),
            role: role_name.clone(),
            policy_arn: BASIC_EXECUTION_POLICY_ARN.to_string(),
        }),
        Resource::Policy(PolicySpec {
            name: xray_policy_name.clone(),
            description: XRAY_MONITORING_DESCRIPTION.to_string(),
            policy: xray_monitoring_policy().to_json()?,
        }),
        Resource::RolePolicyAttachment(RolePolicyAttachmentSpec {
            name: unit_resource_name(context, unit, UnitResource::XrayMonitoringAttachment),
            role: role_name,
            policy_arn: policy_arn(account_id, &xray_policy_name),
        }),
    ])
}

pub fn function(
    context: &StackContext,
    settings: &StackSettings,
    unit: ComputeUnit,
    role_arn: &str,
    artifact: &PackagedArtifact,
) -> FunctionSpec {
    let name = unit_resource_name(context, unit, UnitResource::Function);
    let environment = BTreeMap::from([
        ("TZ".to_string(), settings.timezone.clone()),
        (
            "OPENTELEMETRY_COLLECTOR_CONFIG_URI".to_string(),
            settings.collector_config_uri(),
        ),
        ("RUST_LOG".to_string(), settings.rust_log.clone()),
    ]);

    FunctionSpec {
        architectures: vec![settings.architecture.as_str().to_string()],
        environment,
        code: artifact.archive.clone(),
        code_fingerprint: artifact.fingerprint.clone(),
        ephemeral_storage_mb: settings.ephemeral_storage_mb,
        memory_size_mb: settings.memory_size_mb,
        handler: settings.handler.clone(),
        layers: settings.layers.clone(),
        logging_config: LoggingConfig {
            application_log_level: settings.application_log_level.as_str().to_string(),
            log_format: LOG_FORMAT_JSON.to_string(),
            log_group: log_group_name(context, unit),
            system_log_level: settings.system_log_level.as_str().to_string(),
        },
        package_type: PACKAGE_TYPE_ZIP.to_string(),
        role: role_arn.to_string(),
        runtime: settings.runtime.clone(),
        timeout_seconds: settings.timeout_seconds,
        tags: context.tags(&name),
        name,
    }
}

pub fn function_url(
    context: &StackContext,
    settings: &StackSettings,
    unit: ComputeUnit,
) -> FunctionUrlSpec {
    FunctionUrlSpec {
        name: unit_resource_name(context, unit, UnitResource::FunctionUrl),
        authorization_type: settings.url_auth_type,
        function_name: unit_resource_name(context, unit, UnitResource::Function),
        invoke_mode: INVOKE_MODE_BUFFERED.to_string(),
    }
}

pub fn transaction_search_access_policy(
    context: &StackContext,
    account_id: &str,
    region: &str,
) -> Result<LogResourcePolicySpec, serde_json::Error> {
    let name = transaction_search_policy_name(context);
    Ok(LogResourcePolicySpec {
        policy_name: name.clone(),
        policy_document: transaction_search_policy(account_id, region).to_json()?,
        name,
    })
}
