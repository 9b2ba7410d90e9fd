//! File intake: shape checks on an uploaded bundle, then staging to durable
//! storage. Nothing here touches the task table; a task row is only created
//! after [`stage_bundle`] succeeds.

mod stager;

pub use stager::{FileStager, LocalFileStager};

use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::IntakeLimits;
use crate::error::{CoreError, ValidationError};
use crate::types::NewTask;

const PRIMARY_EXTENSIONS: &[&str] = &["pdf"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Stored name of the contract document inside a staging directory.
pub const PRIMARY_STORED_NAME: &str = "contract.pdf";

/// One file as received from the client.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, content_type: Option<String>, bytes: Bytes) -> Self {
        Self {
            file_name: file_name.into(),
            content_type,
            bytes,
        }
    }

    pub fn size_bytes(&self) -> u64 {
        self.bytes.len() as u64
    }
}

/// Everything a client sends in one submission.
#[derive(Debug, Clone, Default)]
pub struct SubmissionBundle {
    pub task_name: String,
    pub company: String,
    pub scene: String,
    /// Contract documents. Exactly one is accepted.
    pub primary: Vec<UploadedFile>,
    /// Quotation images.
    pub supplementary: Vec<UploadedFile>,
}

impl SubmissionBundle {
    pub fn new_task(&self) -> NewTask {
        NewTask::new(
            self.task_name.trim(),
            self.company.trim(),
            self.scene.trim(),
        )
    }
}

/// Stable reference to a staged file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileHandle {
    pub path: PathBuf,
    pub original_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size_bytes: u64,
}

/// The staged files of one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandleSet {
    pub primary: FileHandle,
    pub supplementary: Vec<FileHandle>,
}

impl HandleSet {
    /// Re-check count, size and type on already-staged handles.
    pub fn validate(&self, limits: &IntakeLimits) -> Result<(), ValidationError> {
        check_extension(&self.primary.original_name, PRIMARY_EXTENSIONS, "PDF")?;
        for handle in &self.supplementary {
            check_extension(&handle.original_name, IMAGE_EXTENSIONS, "PNG/JPG")?;
        }
        check_count(self.supplementary.len(), limits)?;
        for handle in self.iter() {
            check_size(&handle.original_name, handle.size_bytes, limits)?;
        }
        Ok(())
    }

    /// Primary first, then supplementary files in upload order.
    pub fn iter(&self) -> impl Iterator<Item = &FileHandle> {
        std::iter::once(&self.primary).chain(self.supplementary.iter())
    }

    pub fn len(&self) -> usize {
        1 + self.supplementary.len()
    }

    /// A handle set always holds the primary document.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Reject a malformed bundle before anything is written. Checks run in a fixed
/// order and the first failure wins.
pub fn validate_bundle(
    bundle: &SubmissionBundle,
    limits: &IntakeLimits,
) -> Result<(), ValidationError> {
    for (field, value) in [
        ("task_name", &bundle.task_name),
        ("company", &bundle.company),
        ("scene", &bundle.scene),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::MissingField(field));
        }
    }

    let primary = match bundle.primary.as_slice() {
        [] => return Err(ValidationError::MissingPrimaryDocument),
        [one] => one,
        many => {
            return Err(ValidationError::MultiplePrimaryDocuments { count: many.len() });
        }
    };

    check_extension(&primary.file_name, PRIMARY_EXTENSIONS, "PDF")?;
    for file in &bundle.supplementary {
        check_extension(&file.file_name, IMAGE_EXTENSIONS, "PNG/JPG")?;
    }

    check_count(bundle.supplementary.len(), limits)?;

    let files = || std::iter::once(primary).chain(bundle.supplementary.iter());
    for file in files() {
        check_size(&file.file_name, file.size_bytes(), limits)?;
    }
    for file in files() {
        if file.bytes.is_empty() {
            return Err(ValidationError::EmptyFile {
                file_name: file.file_name.clone(),
            });
        }
    }
    Ok(())
}

/// Write every file of `bundle` under `staging_key`.
///
/// The contract becomes `contract.pdf` and images `quote_<n>.<ext>` (1-based,
/// upload order). If any write fails the partially staged directory is
/// discarded.
pub async fn stage_bundle(
    stager: &dyn FileStager,
    staging_key: &str,
    bundle: &SubmissionBundle,
) -> Result<HandleSet, CoreError> {
    let Some(primary) = bundle.primary.first() else {
        return Err(ValidationError::MissingPrimaryDocument.into());
    };

    let staged = async {
        let primary = stager.stage(staging_key, PRIMARY_STORED_NAME, primary).await?;
        let mut supplementary = Vec::with_capacity(bundle.supplementary.len());
        for (i, file) in bundle.supplementary.iter().enumerate() {
            let ext = extension(&file.file_name).unwrap_or_else(|| "png".to_owned());
            let stored_name = format!("quote_{}.{ext}", i + 1);
            supplementary.push(stager.stage(staging_key, &stored_name, file).await?);
        }
        Ok::<_, std::io::Error>(HandleSet {
            primary,
            supplementary,
        })
    }
    .await;

    match staged {
        Ok(handles) => {
            debug!(staging_key, files = handles.len(), "bundle staged");
            Ok(handles)
        }
        Err(e) => {
            warn!(staging_key, error = %e, "staging failed; discarding partial upload");
            if let Err(discard_err) = stager.discard(staging_key).await {
                warn!(staging_key, error = %discard_err, "failed to discard partial upload");
            }
            Err(CoreError::Staging(e))
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn extension(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn check_extension(
    file_name: &str,
    allowed: &[&str],
    expected: &'static str,
) -> Result<(), ValidationError> {
    match extension(file_name) {
        Some(ext) if allowed.contains(&ext.as_str()) => Ok(()),
        _ => Err(ValidationError::WrongType {
            file_name: file_name.to_owned(),
            expected,
        }),
    }
}

fn check_count(count: usize, limits: &IntakeLimits) -> Result<(), ValidationError> {
    if count > limits.max_supplementary_files {
        return Err(ValidationError::TooManySupplementaryFiles {
            count,
            max: limits.max_supplementary_files,
        });
    }
    Ok(())
}

fn check_size(file_name: &str, size_bytes: u64, limits: &IntakeLimits) -> Result<(), ValidationError> {
    if size_bytes > limits.max_file_size_bytes {
        return Err(ValidationError::FileTooLarge {
            file_name: file_name.to_owned(),
            size_bytes,
            max_bytes: limits.max_file_size_bytes,
        });
    }
    Ok(())
}
