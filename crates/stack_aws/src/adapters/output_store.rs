use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use aws_sdk_s3::primitives::ByteStream;
use stack_core::outputs::StackOutputs;
use stack_core::reference::{OutputStore, StackReference};

/// Relative location of a stack's published outputs inside a store.
pub fn outputs_key(reference: &StackReference) -> String {
    format!(
        "outputs/{}/{}/{}.json",
        reference.organization, reference.project, reference.stack
    )
}

/// Outputs kept as JSON files under a local state directory.
pub struct FileOutputStore {
    root: PathBuf,
}

impl FileOutputStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, reference: &StackReference) -> PathBuf {
        self.root.join(outputs_key(reference))
    }
}

impl OutputStore for FileOutputStore {
    fn read_outputs(&self, reference: &StackReference) -> Result<Option<StackOutputs>, String> {
        let path = self.path_for(reference);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(format!("failed to read {}: {error}", path.display())),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|error| format!("failed to decode {}: {error}", path.display()))
    }

    fn write_outputs(
        &self,
        reference: &StackReference,
        outputs: &StackOutputs,
    ) -> Result<(), String> {
        let path = self.path_for(reference);
        let body = serde_json::to_vec_pretty(outputs)
            .map_err(|error| format!("failed to encode outputs: {error}"))?;
        write_atomically(&path, &body)
            .map_err(|error| format!("failed to write {}: {error}", path.display()))
    }
}

fn write_atomically(path: &Path, body: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("json.partial");
    fs::write(&partial, body)?;
    fs::rename(&partial, path)
}

/// Outputs kept as JSON objects in an S3 bucket, shared between machines.
pub struct S3OutputStore {
    bucket: String,
    prefix: String,
    s3_client: aws_sdk_s3::Client,
}

impl S3OutputStore {
    pub fn new(
        bucket: impl Into<String>,
        prefix: impl Into<String>,
        s3_client: aws_sdk_s3::Client,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            s3_client,
        }
    }

    fn object_key(&self, reference: &StackReference) -> String {
        if self.prefix.is_empty() {
            outputs_key(reference)
        } else {
            format!("{}/{}", self.prefix, outputs_key(reference))
        }
    }
}

impl OutputStore for S3OutputStore {
    fn read_outputs(&self, reference: &StackReference) -> Result<Option<StackOutputs>, String> {
        let bucket = self.bucket.clone();
        let object_key = self.object_key(reference);
        let client = self.s3_client.clone();

        let bytes = tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let output = match client.get_object().bucket(bucket).key(object_key).send().await {
                    Ok(output) => output,
                    Err(error) => {
                        let service_error = error.into_service_error();
                        if service_error.is_no_such_key() {
                            return Ok(None);
                        }
                        return Err(format!("failed to read outputs from s3: {service_error}"));
                    }
                };
                output
                    .body
                    .collect()
                    .await
                    .map(|data| Some(data.into_bytes()))
                    .map_err(|error| format!("failed to read outputs body from s3: {error}"))
            })
        })?;

        match bytes {
            None => Ok(None),
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|error| format!("failed to decode outputs from s3: {error}")),
        }
    }

    fn write_outputs(
        &self,
        reference: &StackReference,
        outputs: &StackOutputs,
    ) -> Result<(), String> {
        let bucket = self.bucket.clone();
        let object_key = self.object_key(reference);
        let body_bytes = serde_json::to_vec_pretty(outputs)
            .map_err(|error| format!("failed to encode outputs: {error}"))?;
        let client = self.s3_client.clone();

        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                client
                    .put_object()
                    .bucket(bucket)
                    .key(object_key)
                    .content_type("application/json")
                    .body(ByteStream::from(body_bytes))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|error| format!("failed to write outputs to s3: {error}"))
            })
        })
    }
}
