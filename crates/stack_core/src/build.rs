//! Build-and-package planning and the rebuild decision.
//!
//! The build pipeline itself is executed by `stack_aws::handlers::build`;
//! this module only describes it and decides whether it needs to run.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{StackContext, StackSettings};
use crate::error::BuildError;
use crate::naming::{unit_resource_name, ComputeUnit, UnitResource};

pub const BUILD_RECORD_SCHEMA_VERSION: &str = "v1";
pub const ENTRY_POINT_NAME: &str = "bootstrap";

pub const STACK_ENV: &str = "PULUMI_STACK";
pub const PROJECT_NAME_ENV: &str = "PROJECT_NAME";
pub const API_LAMBDA_ARN_ENV: &str = "API_LAMBDA_ARN";
pub const REMOTE_ENDPOINT_ENV: &str = "REMOTE_ENDPOINT";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Reuse only when the artifact exists and the trigger fingerprint matches
    /// the last recorded build.
    ContentHash,
    /// Reuse whenever the artifact exists on disk.
    Presence,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    File,
    Tree,
}

/// An input whose content change forces the build to re-run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Trigger {
    pub kind: TriggerKind,
    /// Relative to the build working directory.
    pub path: PathBuf,
}

impl Trigger {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: TriggerKind::File,
            path: path.into(),
        }
    }

    pub fn tree(path: impl Into<PathBuf>) -> Self {
        Self {
            kind: TriggerKind::Tree,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum BuildStage {
    /// External program run in the working directory.
    Command { program: String, args: Vec<String> },
    CreateOutputDir,
    /// Copies a file from the working directory into the output directory.
    CopyIntoOutput { from: PathBuf, file_name: String },
}

impl BuildStage {
    pub fn label(&self) -> String {
        match self {
            Self::Command { program, args } => {
                let mut label = program.clone();
                for arg in args {
                    label.push(' ');
                    label.push_str(arg);
                }
                label
            }
            Self::CreateOutputDir => "mkdir -p <output>".to_string(),
            Self::CopyIntoOutput { from, file_name } => {
                format!("cp {} <output>/{file_name}", from.display())
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildPlan {
    pub unit: ComputeUnit,
    pub name: String,
    pub working_dir: PathBuf,
    /// Relative to `working_dir`.
    pub output_dir: PathBuf,
    pub stages: Vec<BuildStage>,
    pub triggers: Vec<Trigger>,
    pub environment: BTreeMap<String, String>,
    pub cache_policy: CachePolicy,
}

impl BuildPlan {
    pub fn output_path(&self) -> PathBuf {
        self.working_dir.join(&self.output_dir)
    }

    /// Digest of every trigger plus the build environment. The environment is
    /// compiled into the binary, so a changed binding is a changed input.
    pub fn fingerprint(&self) -> Result<String, BuildError> {
        let triggers = fingerprint_triggers(&self.working_dir, &self.triggers)?;
        let mut hasher = Sha256::new();
        hasher.update(triggers.as_bytes());
        for (key, value) in &self.environment {
            hasher.update(format!("\nenv:{key}={value}"));
        }
        for stage in &self.stages {
            hasher.update(format!("\nstage:{}", stage.label()));
        }
        Ok(format!("{:x}", hasher.finalize()))
    }
}

/// Values the primary unit's build consumes from a stack reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamBindings {
    pub api_lambda_arn: String,
    pub remote_endpoint: String,
}

pub fn build_environment(
    context: &StackContext,
    upstream: Option<&UpstreamBindings>,
) -> BTreeMap<String, String> {
    let mut environment = BTreeMap::from([(STACK_ENV.to_string(), context.stack.clone())]);
    if let Some(bindings) = upstream {
        environment.insert(
            API_LAMBDA_ARN_ENV.to_string(),
            bindings.api_lambda_arn.clone(),
        );
        environment.insert(PROJECT_NAME_ENV.to_string(), context.project.clone());
        environment.insert(
            REMOTE_ENDPOINT_ENV.to_string(),
            bindings.remote_endpoint.clone(),
        );
    }
    environment
}

pub fn build_plan(
    context: &StackContext,
    settings: &StackSettings,
    unit: ComputeUnit,
    workspace_root: &Path,
    upstream: Option<&UpstreamBindings>,
) -> BuildPlan {
    let build = &settings.build;
    let collector_config = PathBuf::from(&build.collector_config);
    let collector_file_name = collector_config
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| build.collector_config.clone());

    let mut cargo_args = vec![
        "zigbuild".to_string(),
        "--release".to_string(),
        "--target".to_string(),
        build.target_triple.clone(),
    ];
    if !build.cargo_features.is_empty() {
        cargo_args.push("--features".to_string());
        cargo_args.push(build.cargo_features.join(","));
    }

    let stages = vec![
        BuildStage::Command {
            program: "cargo".to_string(),
            args: cargo_args,
        },
        BuildStage::CreateOutputDir,
        BuildStage::CopyIntoOutput {
            from: Path::new("target")
                .join(&build.target_triple)
                .join("release")
                .join(&build.binary_name),
            file_name: ENTRY_POINT_NAME.to_string(),
        },
        BuildStage::CopyIntoOutput {
            from: collector_config.clone(),
            file_name: collector_file_name,
        },
    ];

    BuildPlan {
        unit,
        name: unit_resource_name(context, unit, UnitResource::Build),
        working_dir: workspace_root.join(&build.source_dir),
        output_dir: PathBuf::from(&build.output_dir),
        stages,
        triggers: vec![
            Trigger::tree("src"),
            Trigger::file("Cargo.toml"),
            Trigger::file("build.rs"),
            Trigger::file(collector_config),
        ],
        environment: build_environment(context, upstream),
        cache_policy: build.cache_policy,
    }
}

/// Last successful build of a unit, persisted between invocations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BuildRecord {
    pub schema_version: String,
    pub unit: ComputeUnit,
    pub fingerprint: String,
    pub artifact_dir: PathBuf,
    pub archive: PathBuf,
    pub recorded_at: String,
}

impl BuildRecord {
    pub fn new(
        unit: ComputeUnit,
        fingerprint: String,
        artifact_dir: PathBuf,
        archive: PathBuf,
        recorded_at: String,
    ) -> Self {
        Self {
            schema_version: BUILD_RECORD_SCHEMA_VERSION.to_string(),
            unit,
            fingerprint,
            artifact_dir,
            archive,
            recorded_at,
        }
    }
}

/// Deployable output of the build step for one unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub unit: ComputeUnit,
    /// Directory holding `bootstrap` and the sidecar config.
    pub directory: PathBuf,
    /// Zip of `directory`, the unit's deployment package.
    pub archive: PathBuf,
    pub fingerprint: String,
    pub rebuilt: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    ArtifactMissing,
    NoRecord,
    TriggersChanged { previous: String, current: String },
}

impl StaleReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ArtifactMissing => "artifact_missing",
            Self::NoRecord => "no_record",
            Self::TriggersChanged { .. } => "triggers_changed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildCache {
    Stale(StaleReason),
    Fresh(PathBuf),
}

/// Decides whether the recorded artifact can be reused.
///
/// A missing artifact is always stale. Under `ContentHash` a present artifact
/// is fresh only if the last recorded build saw the same trigger fingerprint.
pub fn decide(
    policy: CachePolicy,
    record: Option<&BuildRecord>,
    current_fingerprint: &str,
    artifact_dir: &Path,
    artifact_present: bool,
) -> BuildCache {
    if !artifact_present {
        return BuildCache::Stale(StaleReason::ArtifactMissing);
    }

    match policy {
        CachePolicy::Presence => BuildCache::Fresh(artifact_dir.to_path_buf()),
        CachePolicy::ContentHash => match record {
            None => BuildCache::Stale(StaleReason::NoRecord),
            Some(record) if record.fingerprint != current_fingerprint => {
                BuildCache::Stale(StaleReason::TriggersChanged {
                    previous: record.fingerprint.clone(),
                    current: current_fingerprint.to_string(),
                })
            }
            Some(_) => BuildCache::Fresh(artifact_dir.to_path_buf()),
        },
    }
}

pub fn artifact_is_present(output_dir: &Path) -> bool {
    output_dir.join(ENTRY_POINT_NAME).is_file()
}

/// SHA-256 over every trigger's relative path and content. Trees are walked in
/// sorted order so the digest is independent of directory iteration order.
pub fn fingerprint_triggers(
    working_dir: &Path,
    triggers: &[Trigger],
) -> Result<String, BuildError> {
    let mut hasher = Sha256::new();
    for trigger in triggers {
        let absolute = working_dir.join(&trigger.path);
        match trigger.kind {
            TriggerKind::File => hash_file(&mut hasher, &trigger.path, &absolute)?,
            TriggerKind::Tree => {
                hasher.update(format!("tree:{}\n", trigger.path.display()));
                let mut files = Vec::new();
                collect_files(&absolute, &mut files)?;
                files.sort();
                for file in files {
                    let relative = file.strip_prefix(working_dir).unwrap_or(&file);
                    hash_file(&mut hasher, relative, &file)?;
                }
            }
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn hash_file(hasher: &mut Sha256, relative: &Path, absolute: &Path) -> Result<(), BuildError> {
    let contents = fs::read(absolute).map_err(|source| BuildError::Fingerprint {
        path: absolute.display().to_string(),
        source,
    })?;
    hasher.update(format!("file:{}:{}\n", relative.display(), contents.len()));
    hasher.update(&contents);
    Ok(())
}

fn collect_files(dir: &Path, files: &mut Vec<PathBuf>) -> Result<(), BuildError> {
    let entries = fs::read_dir(dir).map_err(|source| BuildError::Fingerprint {
        path: dir.display().to_string(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| BuildError::Fingerprint {
            path: dir.display().to_string(),
            source,
        })?;
        let file_type = entry.file_type().map_err(|source| BuildError::Fingerprint {
            path: entry.path().display().to_string(),
            source,
        })?;
        let path = entry.path();
        if file_type.is_dir() {
            collect_files(&path, files)?;
        } else if file_type.is_file() || path.is_file() {
            // Symlinked directories are not followed.
            files.push(path);
        }
    }
    Ok(())
}
