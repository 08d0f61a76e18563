use std::path::PathBuf;
use std::process::exit;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use stack_aws::adapters::command::ProcessRunner;
use stack_aws::adapters::function_url::LambdaFunctionUrls;
use stack_aws::adapters::identity::{AwsIdentity, CallerIdentity, StaticIdentity};
use stack_aws::adapters::output_store::{FileOutputStore, S3OutputStore};
use stack_aws::handlers::build::{BuildHandler, BuildHandlerConfig};
use stack_aws::handlers::publish::handle_publish;
use stack_aws::handlers::synth::{
    declaration_path, handle_synth, write_declaration, StackEnvironment,
};
use stack_core::build::build_plan;
use stack_core::config::{StackContext, StackSettings, DEFAULT_ORGANIZATION};
use stack_core::error::{BuildError, DeclarationError, NodeError};
use stack_core::naming::{all_resource_names, ComputeUnit};
use stack_core::reference::{OutputStore, StackReference};
use stack_core::stack::{resolve_upstream, StackDefinition};

// ── CLI definition ─────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "stackctl",
    about = "Declares, builds and publishes the API lambda stack",
    long_about = "Synthesizes the declaration of the API lambda stack (roles, policies,\n\
                  functions, function URLs and the tracing ingestion policy), builds\n\
                  and packages the function artifacts, and publishes stack outputs\n\
                  for other stacks to reference."
)]
struct Cli {
    /// Organization owning the stack outputs
    #[arg(long, env = "STACK_ORGANIZATION", default_value = DEFAULT_ORGANIZATION, global = true)]
    organization: String,
    /// Project name, second segment of every resource name
    #[arg(long, env = "STACK_PROJECT", global = true)]
    project: Option<String>,
    /// Stack (environment) name, first segment of every resource name
    #[arg(long, env = "STACK_NAME", global = true)]
    stack: Option<String>,
    /// JSON settings file overriding function and build defaults
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Directory holding the `api` source tree
    #[arg(long, default_value = ".", global = true)]
    workspace_root: PathBuf,
    /// Local state directory: build records, archives, declarations
    #[arg(long, default_value = ".stack", global = true)]
    state_dir: PathBuf,
    /// Keep stack outputs in this S3 bucket instead of the state directory
    #[arg(long, env = "STACK_STATE_BUCKET", global = true)]
    state_bucket: Option<String>,
    /// Key prefix for stack outputs in the state bucket
    #[arg(long, default_value = "", global = true)]
    state_prefix: String,
    /// Stack whose outputs feed the primary build (defaults to this stack)
    #[arg(long, global = true)]
    upstream: Option<String>,
    /// Account id to declare into, skipping the STS lookup
    #[arg(long, requires = "region", global = true)]
    account_id: Option<String>,
    /// Region to declare into, skipping the SDK config lookup
    #[arg(long, requires = "account_id", global = true)]
    region: Option<String>,
    #[arg(value_enum, long, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and package compute unit artifacts, skipping unchanged ones
    Build {
        /// Only build this unit
        #[arg(long, value_parser = parse_unit)]
        unit: Option<ComputeUnit>,
    },
    /// Resolve the stack declaration and write it as JSON
    Synth {
        /// Only declare this unit (api-lambda-remote bootstraps a fresh stack)
        #[arg(long, value_parser = parse_unit)]
        unit: Option<ComputeUnit>,
        /// Output file (defaults to <state-dir>/declarations/<stack>.json)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Look up applied function URLs and publish the stack outputs
    Publish,
    /// Print the published outputs of a stack
    Outputs {
        /// organization/project/stack (defaults to this stack)
        #[arg(long)]
        reference: Option<String>,
    },
    /// Print every resource name derived for this stack
    Names,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

fn parse_unit(raw: &str) -> Result<ComputeUnit, String> {
    ComputeUnit::parse(raw).ok_or_else(|| {
        let known: Vec<_> = ComputeUnit::ALL.iter().map(|unit| unit.as_str()).collect();
        format!("unknown compute unit '{raw}' (expected one of: {})", known.join(", "))
    })
}

// ── helpers ────────────────────────────────────────────────────────

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    match format {
        LogFormat::Text => builder.compact().init(),
        LogFormat::Json => builder.json().flatten_event(true).init(),
    }
}

/// Exit code for a failed run: a failed build stage propagates its own code.
fn exit_code(error: &anyhow::Error) -> i32 {
    if let Some(build) = error.downcast_ref::<BuildError>() {
        return build.exit_code();
    }
    if let Some(DeclarationError::NodeFailed { source, .. }) =
        error.downcast_ref::<DeclarationError>()
    {
        if let NodeError::Build(build) = source.as_ref() {
            return build.exit_code();
        }
    }
    1
}

impl Cli {
    fn context(&self) -> Result<StackContext> {
        let project = self
            .project
            .as_deref()
            .ok_or_else(|| anyhow!("--project (or STACK_PROJECT) is required"))?;
        let stack = self
            .stack
            .as_deref()
            .ok_or_else(|| anyhow!("--stack (or STACK_NAME) is required"))?;
        Ok(StackContext::new(&self.organization, project, stack)?)
    }

    fn stack_settings(&self) -> Result<StackSettings> {
        match &self.settings {
            Some(path) => Ok(StackSettings::load(path)?),
            None => Ok(StackSettings::default()),
        }
    }

    fn definition(&self) -> Result<StackDefinition> {
        let mut definition = StackDefinition::new(
            self.context()?,
            self.stack_settings()?,
            self.workspace_root.clone(),
        );
        if let Some(upstream) = &self.upstream {
            definition.upstream = StackReference::parse(upstream)?;
        }
        Ok(definition)
    }

    fn build_handler(&self, context: &StackContext) -> BuildHandler<ProcessRunner> {
        BuildHandler::new(
            BuildHandlerConfig {
                state_dir: self.state_dir.clone(),
                stack: context.stack.clone(),
            },
            ProcessRunner,
        )
    }

    async fn output_store(&self, aws: &AwsSession) -> Box<dyn OutputStore> {
        match &self.state_bucket {
            Some(bucket) => Box::new(S3OutputStore::new(
                bucket.clone(),
                self.state_prefix.clone(),
                aws_sdk_s3::Client::new(aws.config().await),
            )),
            None => Box::new(FileOutputStore::new(&self.state_dir)),
        }
    }

    async fn identity(&self, aws: &AwsSession) -> Box<dyn CallerIdentity> {
        match (&self.account_id, &self.region) {
            (Some(account_id), Some(region)) => Box::new(StaticIdentity {
                account_id: account_id.clone(),
                region: region.clone(),
            }),
            _ => Box::new(AwsIdentity::from_config(aws.config().await)),
        }
    }
}

/// SDK configuration, loaded on first use so offline commands never touch
/// the credential chain.
struct AwsSession {
    config: tokio::sync::OnceCell<aws_config::SdkConfig>,
}

impl AwsSession {
    fn new() -> Self {
        Self {
            config: tokio::sync::OnceCell::new(),
        }
    }

    async fn config(&self) -> &aws_config::SdkConfig {
        self.config
            .get_or_init(|| aws_config::load_defaults(aws_config::BehaviorVersion::latest()))
            .await
    }
}

// ── commands ───────────────────────────────────────────────────────

async fn run(cli: Cli) -> Result<()> {
    let aws = AwsSession::new();

    match &cli.command {
        Commands::Build { unit } => {
            let definition = cli.definition()?;
            let builds = cli.build_handler(&definition.context);
            // The remote unit needs no upstream outputs, so it is built first.
            let units = match unit {
                Some(unit) => vec![*unit],
                None => vec![ComputeUnit::ApiLambdaRemote, ComputeUnit::ApiLambda],
            };
            for unit in units {
                let upstream = match unit {
                    ComputeUnit::ApiLambda => {
                        let store = cli.output_store(&aws).await;
                        Some(
                            resolve_upstream(store.as_ref(), &definition.upstream)
                                .context("resolving build inputs for api-lambda")?,
                        )
                    }
                    ComputeUnit::ApiLambdaRemote => None,
                };
                let plan = build_plan(
                    &definition.context,
                    &definition.settings,
                    unit,
                    &definition.workspace_root,
                    upstream.as_ref(),
                );
                let artifact = builds.ensure_artifact(&plan)?;
                println!("{}", serde_json::to_string(&artifact)?);
            }
        }
        Commands::Synth { unit, out } => {
            let mut definition = cli.definition()?;
            if let Some(unit) = unit {
                definition = definition.scoped_to(*unit);
            }
            let builds = cli.build_handler(&definition.context);
            let identity = cli.identity(&aws).await;
            let store = cli.output_store(&aws).await;
            let environment = StackEnvironment::new(identity.as_ref(), store.as_ref(), &builds);

            let declaration = handle_synth(&definition, &environment)?;
            let path = out
                .clone()
                .unwrap_or_else(|| declaration_path(&cli.state_dir, &definition.context.stack));
            write_declaration(&path, &declaration)
                .with_context(|| format!("writing declaration to {}", path.display()))?;
            println!("{}", path.display());
        }
        Commands::Publish => {
            let context = cli.context()?;
            let identity = cli.identity(&aws).await;
            let store = cli.output_store(&aws).await;
            let function_urls =
                LambdaFunctionUrls::new(aws_sdk_lambda::Client::new(aws.config().await));

            let outputs = handle_publish(
                &context,
                identity.as_ref(),
                &function_urls,
                store.as_ref(),
            )?;
            println!("{}", serde_json::to_string_pretty(&outputs)?);
        }
        Commands::Outputs { reference } => {
            let reference = match reference {
                Some(raw) => StackReference::parse(raw)?,
                None => StackReference::to_self(&cli.context()?),
            };
            let store = cli.output_store(&aws).await;
            let Some(outputs) = store
                .read_outputs(&reference)
                .map_err(|message| anyhow!(message))
                .with_context(|| format!("reading outputs of {reference}"))?
            else {
                bail!("stack '{reference}' has no published outputs");
            };
            println!("{}", serde_json::to_string_pretty(&outputs)?);
        }
        Commands::Names => {
            for name in all_resource_names(&cli.context()?) {
                println!("{name}");
            }
        }
    }
    Ok(())
}

// ── main ───────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    if let Err(error) = run(cli).await {
        eprintln!("error: {error:#}");
        exit(exit_code(&error));
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_unit_names() {
        assert_eq!(parse_unit("api-lambda-remote"), Ok(ComputeUnit::ApiLambdaRemote));
        assert!(parse_unit("worker")
            .expect_err("unknown unit")
            .contains("api-lambda, api-lambda-remote"));
    }

    #[test]
    fn context_comes_from_flags() {
        let cli =
            Cli::parse_from(["stackctl", "--project", "hello-api", "--stack", "dev", "names"]);
        let context = cli.context().expect("context");
        assert_eq!(context.organization, "organization");
        assert_eq!(context.project, "hello-api");
        assert_eq!(context.stack, "dev");
    }

    #[test]
    fn synth_can_be_scoped_to_the_remote_unit() {
        let cli = Cli::parse_from([
            "stackctl",
            "--project",
            "hello-api",
            "--stack",
            "dev",
            "synth",
            "--unit",
            "api-lambda-remote",
        ]);
        assert!(matches!(
            cli.command,
            Commands::Synth {
                unit: Some(ComputeUnit::ApiLambdaRemote),
                out: None,
            }
        ));
    }

    #[test]
    fn failed_stage_exit_code_survives_declaration_wrapping() {
        let error = anyhow::Error::new(DeclarationError::NodeFailed {
            node: "api-lambda-remote/artifact".to_string(),
            source: Box::new(NodeError::Build(BuildError::StageFailed {
                stage: "cargo zigbuild".to_string(),
                code: 101,
            })),
        });
        assert_eq!(exit_code(&error), 101);
    }

    #[test]
    fn direct_build_failure_exit_code_survives_context() {
        let error = anyhow::Error::new(BuildError::StageFailed {
            stage: "cargo zigbuild".to_string(),
            code: 2,
        })
        .context("building api-lambda-remote");
        assert_eq!(exit_code(&error), 2);
    }

    #[test]
    fn other_failures_exit_with_one() {
        assert_eq!(exit_code(&anyhow!("store unavailable")), 1);
    }
}
