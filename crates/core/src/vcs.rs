//! Version-control collaborators.
//!
//! The merge engine needs two things from the container repository: the
//! content of a file as of the recorded unmodified baseline ref, and a
//! way to stage written results. Both are traits so tests can inject
//! in-memory doubles; [`ContainerRepo`] is the `git2`-backed production
//! implementation.

use std::path::{Path, PathBuf};

use git2::Repository;
use tracing::{debug, info};

use crate::errors::VcsError;

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// Provides file content as of the unmodified baseline revision.
pub trait AncestorSource {
    /// Content of `rel_path` (relative to the container root, forward
    /// slashes) at the baseline ref.
    fn ancestor_content(&self, rel_path: &str) -> Result<String, VcsError>;
}

/// Stages merged or copied files for later committing.
pub trait Workspace {
    /// Add `rel_path` to the container's index.
    fn stage(&self, rel_path: &str) -> Result<(), VcsError>;
}

// ---------------------------------------------------------------------------
// git2-backed implementation
// ---------------------------------------------------------------------------

/// The container repository, opened once per run.
pub struct ContainerRepo {
    repo: Repository,
    root: PathBuf,
    baseline_ref: String,
}

impl std::fmt::Debug for ContainerRepo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerRepo")
            .field("root", &self.root)
            .field("baseline_ref", &self.baseline_ref)
            .finish_non_exhaustive()
    }
}

impl ContainerRepo {
    /// Open the container repository at `root` and verify the baseline
    /// ref resolves, so a bad config fails at startup rather than on the
    /// first entry.
    pub fn open<P: AsRef<Path>>(root: P, baseline_ref: &str) -> Result<Self, VcsError> {
        let root = root.as_ref();
        info!(path = %root.display(), baseline_ref, "opening container repository");
        let repo = Repository::open(root)
            .map_err(|_| VcsError::RepositoryNotFound(root.display().to_string()))?;
        repo.revparse_single(baseline_ref)
            .map_err(|_| VcsError::RefNotFound(baseline_ref.to_string()))?;
        Ok(Self {
            repo,
            root: root.to_path_buf(),
            baseline_ref: baseline_ref.to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AncestorSource for ContainerRepo {
    fn ancestor_content(&self, rel_path: &str) -> Result<String, VcsError> {
        let spec = format!("{}:{}", self.baseline_ref, rel_path);
        debug!(%spec, "reading baseline blob");
        let object = self
            .repo
            .revparse_single(&spec)
            .map_err(|_| VcsError::PathNotFound {
                reference: self.baseline_ref.clone(),
                path: rel_path.to_string(),
            })?;
        let blob = object.peel_to_blob().map_err(|_| VcsError::PathNotFound {
            reference: self.baseline_ref.clone(),
            path: rel_path.to_string(),
        })?;
        String::from_utf8(blob.content().to_vec())
            .map_err(|_| VcsError::NotText(rel_path.to_string()))
    }
}

impl Workspace for ContainerRepo {
    fn stage(&self, rel_path: &str) -> Result<(), VcsError> {
        let mut index = self.repo.index()?;
        index.add_path(Path::new(rel_path))?;
        index.write()?;
        debug!(path = rel_path, "staged");
        Ok(())
    }
}
