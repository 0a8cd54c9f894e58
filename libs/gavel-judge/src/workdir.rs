use crate::error::ExecError;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, warn};

/// Length of the random part of a working directory name
const RANDOM_NAME_LEN: usize = 12;

/// Private scratch directory of one submission.
///
/// Holds the staged source, the compiled artifact and the per-test capture
/// files. `cleanup` removes it off the runtime's worker threads; a value
/// dropped without it is removed synchronously, whichever way the
/// submission ends.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    removed: bool,
}

impl WorkDir {
    /// Create `<base>/<random><submission id>`. Creation fails rather than
    /// reusing a directory that already exists.
    pub async fn create(base: &Path, submission_id: &str) -> io::Result<Self> {
        let random = uuid::Uuid::new_v4().simple().to_string();
        let name = format!("{}{}", &random[..RANDOM_NAME_LEN], sanitize(submission_id));
        let path = base.join(name);

        fs::create_dir_all(base).await?;
        fs::create_dir(&path).await?;
        debug!(path = %path.display(), "Created working directory");
        Ok(Self { path, removed: false })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn cleanup(mut self) {
        log_removal(&self.path, fs::remove_dir_all(&self.path).await);
        self.removed = true;
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        // Must finish before the submission's result stream closes
        if !self.removed {
            log_removal(&self.path, std::fs::remove_dir_all(&self.path));
        }
    }
}

fn log_removal(path: &Path, result: io::Result<()>) {
    match result {
        Ok(()) => debug!(path = %path.display(), "Removed working directory"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove working directory"),
    }
}

/// Keep only characters that are safe in a single path component.
fn sanitize(submission_id: &str) -> String {
    submission_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Read a file the judger wrote for us.
pub(crate) async fn read_capture(path: &Path) -> Result<Vec<u8>, ExecError> {
    fs::read(path).await.map_err(|source| ExecError::Read {
        path: path.display().to_string(),
        source,
    })
}

/// Read at most the last `limit` bytes of a file, lossily decoded.
pub(crate) async fn read_tail(path: &Path, limit: usize) -> Result<String, ExecError> {
    let bytes = read_capture(path).await?;
    let start = bytes.len().saturating_sub(limit);
    Ok(String::from_utf8_lossy(&bytes[start..]).into_owned())
}
