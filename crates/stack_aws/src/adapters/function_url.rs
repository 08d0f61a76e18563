/// Looks up provider-assigned function URLs after the stack is applied.
pub trait FunctionUrlLookup {
    /// Returns `Ok(None)` when the function or its URL does not exist yet.
    fn function_url(&self, function_name: &str) -> Result<Option<String>, String>;
}

pub struct LambdaFunctionUrls {
    lambda_client: aws_sdk_lambda::Client,
}

impl LambdaFunctionUrls {
    pub fn new(lambda_client: aws_sdk_lambda::Client) -> Self {
        Self { lambda_client }
    }
}

impl FunctionUrlLookup for LambdaFunctionUrls {
    fn function_url(&self, function_name: &str) -> Result<Option<String>, String> {
        let client = self.lambda_client.clone();
        let name = function_name.to_string();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                match client.get_function_url_config().function_name(&name).send().await {
                    Ok(output) => Ok(Some(output.function_url().to_string())),
                    Err(error) => {
                        let service_error = error.into_service_error();
                        if service_error.is_resource_not_found_exception() {
                            Ok(None)
                        } else {
                            Err(format!(
                                "failed to read function url config for {name}: {service_error}"
                            ))
                        }
                    }
                }
            })
        })
    }
}
