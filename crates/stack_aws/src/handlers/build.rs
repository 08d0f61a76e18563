use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use stack_core::build::{
    artifact_is_present, decide, BuildCache, BuildPlan, BuildRecord, BuildStage, CachePolicy,
    PackagedArtifact, ENTRY_POINT_NAME,
};
use stack_core::error::BuildError;
use stack_core::naming::ComputeUnit;

use crate::adapters::archive::package_directory;
use crate::adapters::command::{CommandRunner, Invocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildHandlerConfig {
    /// Root of local state: build records and deployment archives.
    pub state_dir: PathBuf,
    pub stack: String,
}

impl BuildHandlerConfig {
    pub fn record_path(&self, unit: ComputeUnit) -> PathBuf {
        self.state_dir
            .join("builds")
            .join(&self.stack)
            .join(format!("{unit}.json"))
    }

    pub fn archive_path(&self, unit: ComputeUnit) -> PathBuf {
        self.state_dir
            .join("dist")
            .join(&self.stack)
            .join(format!("{unit}.zip"))
    }
}

/// Runs build plans, reusing the previous artifact when the cache allows it.
pub struct BuildHandler<R> {
    config: BuildHandlerConfig,
    runner: R,
}

impl<R: CommandRunner> BuildHandler<R> {
    pub fn new(config: BuildHandlerConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &BuildHandlerConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Returns the unit's packaged artifact, running the plan first if the
    /// cache decides it is stale.
    pub fn ensure_artifact(&self, plan: &BuildPlan) -> Result<PackagedArtifact, BuildError> {
        let fingerprint = plan.fingerprint()?;
        let record_path = self.config.record_path(plan.unit);
        let archive = self.config.archive_path(plan.unit);
        let output_dir = plan.output_path();

        let record = load_record(&record_path)?;
        // Presence only asks for a built entry point; the archive can be
        // repackaged from it.
        let present = match plan.cache_policy {
            CachePolicy::Presence => artifact_is_present(&output_dir),
            CachePolicy::ContentHash => artifact_is_present(&output_dir) && archive.is_file(),
        };

        match decide(
            plan.cache_policy,
            record.as_ref(),
            &fingerprint,
            &output_dir,
            present,
        ) {
            BuildCache::Fresh(directory) => {
                tracing::info!(
                    unit = %plan.unit,
                    fingerprint = %fingerprint,
                    "artifact up to date, skipping build"
                );
                if !archive.is_file() {
                    package_directory(&directory, &archive)?;
                    tracing::info!(
                        unit = %plan.unit,
                        archive = %archive.display(),
                        "archive repackaged from existing artifact"
                    );
                }
                Ok(PackagedArtifact {
                    unit: plan.unit,
                    directory,
                    archive,
                    fingerprint,
                    rebuilt: false,
                })
            }
            BuildCache::Stale(reason) => {
                tracing::info!(
                    unit = %plan.unit,
                    fingerprint = %fingerprint,
                    reason = reason.as_str(),
                    "building artifact"
                );
                self.run_stages(plan)?;
                package_directory(&output_dir, &archive)?;

                let record = BuildRecord::new(
                    plan.unit,
                    fingerprint.clone(),
                    output_dir.clone(),
                    archive.clone(),
                    chrono::Utc::now().to_rfc3339(),
                );
                write_record(&record_path, &record)?;

                tracing::info!(
                    unit = %plan.unit,
                    archive = %archive.display(),
                    "artifact packaged"
                );
                Ok(PackagedArtifact {
                    unit: plan.unit,
                    directory: output_dir,
                    archive,
                    fingerprint,
                    rebuilt: true,
                })
            }
        }
    }

    /// Runs every stage against a staging directory and swaps it over the
    /// output directory only once all of them succeed.
    fn run_stages(&self, plan: &BuildPlan) -> Result<(), BuildError> {
        let output_dir = plan.output_path();
        let staging_dir = staging_path(&output_dir);
        remove_dir_if_exists(&staging_dir)?;

        let result = self.run_into(plan, &staging_dir).and_then(|()| {
            if artifact_is_present(&staging_dir) {
                Ok(())
            } else {
                Err(BuildError::MissingOutput(
                    output_dir.join(ENTRY_POINT_NAME).display().to_string(),
                ))
            }
        });
        if let Err(error) = result {
            let _ = remove_dir_if_exists(&staging_dir);
            return Err(error);
        }

        remove_dir_if_exists(&output_dir)?;
        fs::rename(&staging_dir, &output_dir)?;
        Ok(())
    }

    fn run_into(&self, plan: &BuildPlan, staging_dir: &Path) -> Result<(), BuildError> {
        for stage in &plan.stages {
            let label = stage.label();
            tracing::info!(unit = %plan.unit, stage = %label, "running build stage");

            match stage {
                BuildStage::Command { program, args } => {
                    let code = self
                        .runner
                        .run(&Invocation {
                            program,
                            args,
                            dir: &plan.working_dir,
                            environment: &plan.environment,
                        })
                        .map_err(|message| BuildError::Spawn {
                            stage: label.clone(),
                            message,
                        })?;
                    if code != 0 {
                        tracing::error!(
                            unit = %plan.unit,
                            stage = %label,
                            code,
                            "build stage failed"
                        );
                        return Err(BuildError::StageFailed { stage: label, code });
                    }
                }
                BuildStage::CreateOutputDir => fs::create_dir_all(staging_dir)?,
                BuildStage::CopyIntoOutput { from, file_name } => {
                    let source = plan.working_dir.join(from);
                    if !source.is_file() {
                        return Err(BuildError::MissingOutput(source.display().to_string()));
                    }
                    fs::create_dir_all(staging_dir)?;
                    fs::copy(&source, staging_dir.join(file_name))?;
                }
            }
        }
        Ok(())
    }
}

fn staging_path(output_dir: &Path) -> PathBuf {
    let mut name = output_dir
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".staging");
    output_dir.with_file_name(name)
}

fn remove_dir_if_exists(path: &Path) -> Result<(), BuildError> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error.into()),
    }
}

/// A corrupt record is treated as absent so the next build rewrites it.
fn load_record(path: &Path) -> Result<Option<BuildRecord>, BuildError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(BuildError::Record(format!(
                "failed to read {}: {error}",
                path.display()
            )))
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(record) => Ok(Some(record)),
        Err(error) => {
            tracing::warn!(record = %path.display(), %error, "ignoring unreadable build record");
            Ok(None)
        }
    }
}

fn write_record(path: &Path, record: &BuildRecord) -> Result<(), BuildError> {
    let body = serde_json::to_vec_pretty(record)
        .map_err(|error| BuildError::Record(error.to_string()))?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("json.partial");
    fs::write(&partial, body)?;
    fs::rename(&partial, path)?;
    Ok(())
}
