//! Staging directory shared with the sandbox.
//!
//! Files the sandbox needs but must not reach through their original host
//! location (the SSH agent socket, the build script, the known-hosts file)
//! are moved or copied into a private temporary directory. That directory is
//! bind-mounted into the sandbox, by default at `/tmp`, so a staged file
//! `name` shows up as `/tmp/name` inside.
//!
//! The directory is deleted when the [`StagingArea`] is dropped unless
//! [`StagingArea::keep`] was called.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, instrument};

use crate::error::StagingError;

/// Prefix of staging directory names.
const STAGING_PREFIX: &str = "jenkins_docker_wrapper";

/// The staging directory is shared with users inside the sandbox whose ids
/// are only known after bootstrap.
const STAGING_PERMISSIONS: u32 = 0o777;

/// A file placed in the staging directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    /// Where the file came from on the host.
    pub original: PathBuf,
    /// Where it lives now on the host.
    pub staged: PathBuf,
}

impl StagedFile {
    /// File name inside the staging directory.
    #[must_use]
    pub fn file_name(&self) -> &std::ffi::OsStr {
        self.staged.file_name().unwrap_or_default()
    }

    /// Location of the file inside the sandbox when the staging directory is
    /// mounted at `mount_point`.
    #[must_use]
    pub fn sandbox_path(&self, mount_point: &Path) -> PathBuf {
        mount_point.join(self.file_name())
    }
}

/// Private temporary directory holding staged files.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
    relocated: Vec<StagedFile>,
    trust_files: Vec<StagedFile>,
}

impl StagingArea {
    /// Creates a staging directory under the system temporary directory.
    pub fn create() -> Result<Self, StagingError> {
        Self::create_in(std::env::temp_dir())
    }

    /// Creates a staging directory under `parent`.
    #[instrument(skip_all, fields(parent = %parent.as_ref().display()))]
    pub fn create_in(parent: impl AsRef<Path>) -> Result<Self, StagingError> {
        let dir = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(parent)
            .map_err(|source| StagingError::Io {
                context: "create staging directory".to_string(),
                source,
            })?;

        fs::set_permissions(dir.path(), fs::Permissions::from_mode(STAGING_PERMISSIONS))
            .map_err(|source| StagingError::Io {
                context: format!("set permissions on {}", dir.path().display()),
                source,
            })?;

        debug!(path = %dir.path().display(), "Created container temp dir");
        Ok(Self {
            dir,
            relocated: Vec::new(),
            trust_files: Vec::new(),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    fn target_for(&self, source: &Path) -> Result<PathBuf, StagingError> {
        let name = source.file_name().ok_or_else(|| StagingError::Io {
            context: format!("stage {}", source.display()),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
        })?;
        Ok(self.dir.path().join(name))
    }

    /// Moves `source` into the staging directory, keeping its file name.
    pub fn relocate(&mut self, source: &Path) -> Result<&StagedFile, StagingError> {
        let target = self.target_for(source)?;
        debug!(from = %source.display(), to = %target.display(), "Moving");

        fs::rename(source, &target).map_err(|e| StagingError::Io {
            context: format!("move {} to {}", source.display(), target.display()),
            source: e,
        })?;

        self.relocated.push(StagedFile {
            original: source.to_path_buf(),
            staged: target,
        });
        Ok(&self.relocated[self.relocated.len() - 1])
    }

    /// Copies the regular file `source` into the staging directory as a trust
    /// file to be installed during bootstrap.
    pub fn stage_trust_file(&mut self, source: &Path) -> Result<&StagedFile, StagingError> {
        let metadata = fs::metadata(source).map_err(|e| StagingError::Io {
            context: format!("read {}", source.display()),
            source: e,
        })?;
        if !metadata.is_file() {
            return Err(StagingError::NotRegularFile {
                path: source.to_path_buf(),
            });
        }

        let target = self.target_for(source)?;
        debug!(from = %source.display(), to = %target.display(), "Copy trust file");
        fs::copy(source, &target).map_err(|e| StagingError::Io {
            context: format!("copy {} to {}", source.display(), target.display()),
            source: e,
        })?;

        self.trust_files.push(StagedFile {
            original: source.to_path_buf(),
            staged: target,
        });
        Ok(&self.trust_files[self.trust_files.len() - 1])
    }

    /// Files moved in with [`relocate`](Self::relocate).
    #[must_use]
    pub fn relocated(&self) -> &[StagedFile] {
        &self.relocated
    }

    /// Files copied in with [`stage_trust_file`](Self::stage_trust_file).
    #[must_use]
    pub fn trust_files(&self) -> &[StagedFile] {
        &self.trust_files
    }

    /// Leaves the directory on disk and returns its path.
    pub fn keep(self) -> PathBuf {
        self.dir.keep()
    }
}
