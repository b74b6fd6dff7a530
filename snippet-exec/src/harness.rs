use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, error};

use crate::{error::Error, executor::GuestLanguage, types::ExecutionRequest};

/// Allocates work directories and materializes guest programs in them.
#[derive(Debug, Clone, Default)]
pub struct Harness {
    /// Parent of the per-request directories, the system temp dir when unset
    work_root: Option<PathBuf>,
}

impl Harness {
    pub fn new(work_root: Option<PathBuf>) -> Self {
        Self { work_root }
    }

    /// Render the request's snippet and tests into a guest file inside a
    /// fresh directory owned by the returned program.
    pub async fn build(
        &self,
        language: &dyn GuestLanguage,
        request: &ExecutionRequest,
    ) -> Result<GuestProgram, Error> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("sandbox-");
        // Random name with exclusive create.
        let dir = match &self.work_root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| Error::Sandbox(format!("Failed to create sandbox directory: {}", e)))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o700)).map_err(|e| {
                Error::Sandbox(format!("Failed to restrict sandbox directory: {}", e))
            })?;
        }

        let program = language.render(&request.source_code, &request.test_code, request.harness);
        let entry = language.write_program(dir.path(), &program).await?;

        debug!(
            "Materialized {} guest at {} ({} bytes)",
            request.harness,
            entry.display(),
            program.len()
        );

        Ok(GuestProgram {
            dir: Some(dir),
            entry,
        })
    }
}

/// A guest file in its exclusively owned directory. Dropping it removes the
/// directory and everything the guest left inside it.
#[derive(Debug)]
pub struct GuestProgram {
    dir: Option<TempDir>,
    entry: PathBuf,
}

impl GuestProgram {
    pub fn root_dir(&self) -> &Path {
        match &self.dir {
            Some(dir) => dir.path(),
            None => self.entry.parent().unwrap_or(Path::new("/")),
        }
    }

    pub fn entry(&self) -> &Path {
        &self.entry
    }
}

impl Drop for GuestProgram {
    fn drop(&mut self) {
        let Some(dir) = self.dir.take() else {
            return;
        };
        let path = dir.path().to_path_buf();
        if let Err(e) = dir.close() {
            // The guest may have stripped permissions off what it created.
            if let Err(retry) = restore_permissions(&path).and_then(|_| fs::remove_dir_all(&path))
            {
                error!(
                    "Failed to clean up sandbox directory {}: {} ({})",
                    path.display(),
                    e,
                    retry
                );
            }
        }
    }
}

#[cfg(unix)]
fn restore_permissions(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = fs::symlink_metadata(path)?;
    if !metadata.is_dir() {
        return Ok(());
    }
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))?;
    for entry in fs::read_dir(path)? {
        restore_permissions(&entry?.path())?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_permissions(_path: &Path) -> io::Result<()> {
    Ok(())
}
