/// Account and region the stack is declared into.
pub trait CallerIdentity {
    fn account_id(&self) -> Result<String, String>;
    fn region(&self) -> Result<String, String>;
}

/// Resolves the account through STS and the region from the loaded SDK config.
pub struct AwsIdentity {
    sts_client: aws_sdk_sts::Client,
    region: Option<String>,
}

impl AwsIdentity {
    pub fn from_config(config: &aws_config::SdkConfig) -> Self {
        Self {
            sts_client: aws_sdk_sts::Client::new(config),
            region: config.region().map(|region| region.as_ref().to_string()),
        }
    }
}

impl CallerIdentity for AwsIdentity {
    fn account_id(&self) -> Result<String, String> {
        let client = self.sts_client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = client
                    .get_caller_identity()
                    .send()
                    .await
                    .map_err(|error| format!("failed to resolve caller identity: {error}"))?;
                output
                    .account()
                    .map(str::to_string)
                    .ok_or_else(|| "caller identity response carried no account".to_string())
            })
        })
    }

    fn region(&self) -> Result<String, String> {
        self.region
            .clone()
            .ok_or_else(|| {
                "no AWS region configured (set AWS_REGION or a profile region)".to_string()
            })
    }
}

/// Fixed account and region, for offline synthesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticIdentity {
    pub account_id: String,
    pub region: String,
}

impl CallerIdentity for StaticIdentity {
    fn account_id(&self) -> Result<String, String> {
        Ok(self.account_id.clone())
    }

    fn region(&self) -> Result<String, String> {
        Ok(self.region.clone())
    }
}
