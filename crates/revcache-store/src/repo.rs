use std::fs;
use std::path::{Path, PathBuf};

use crate::{LooseStore, RefStore, StoreError};

/// A discovered repository, identified by its `.git` directory.
///
/// The cache directory lives under it as `rev-cache/`.
pub struct Repository {
    git_dir: PathBuf,
}

impl Repository {
    /// Discover a repository by walking up from `start`.
    ///
    /// Accepts a `.git` directory, a `.git` file containing a
    /// `gitdir:` redirect (worktrees, submodules), or a bare layout
    /// (`HEAD` plus `objects/` in the directory itself).
    pub fn discover(start: impl AsRef<Path>) -> Result<Self, StoreError> {
        let start = fs::canonicalize(start.as_ref())
            .map_err(|_| StoreError::RepoNotFound(start.as_ref().to_path_buf()))?;

        let mut current = start.clone();
        loop {
            let dot_git = current.join(".git");
            if dot_git.is_dir() {
                return Ok(Self { git_dir: dot_git });
            }
            if dot_git.is_file() {
                let content = fs::read_to_string(&dot_git)?;
                if let Some(target) = content.trim().strip_prefix("gitdir:") {
                    let target = target.trim();
                    let path = if Path::new(target).is_absolute() {
                        PathBuf::from(target)
                    } else {
                        current.join(target)
                    };
                    return Ok(Self { git_dir: fs::canonicalize(path)? });
                }
            }
            // Bare repository?
            if current.join("HEAD").is_file() && current.join("objects").is_dir() {
                return Ok(Self { git_dir: current });
            }

            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => return Err(StoreError::RepoNotFound(start)),
            }
        }
    }

    /// Open a repository whose `.git` directory is known.
    pub fn open_git_dir(git_dir: impl Into<PathBuf>) -> Self {
        Self { git_dir: git_dir.into() }
    }

    pub fn git_dir(&self) -> &Path {
        &self.git_dir
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.git_dir.join("objects")
    }

    /// Where cache slices and the index live.
    pub fn rev_cache_dir(&self) -> PathBuf {
        self.git_dir.join("rev-cache")
    }

    pub fn odb(&self) -> LooseStore {
        LooseStore::new(self.objects_dir())
    }

    pub fn refs(&self) -> RefStore {
        RefStore::new(&self.git_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discover_from_subdirectory() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::create_dir_all(dir.path().join("src/deep")).unwrap();

        let repo = Repository::discover(dir.path().join("src/deep")).unwrap();
        assert!(repo.git_dir().ends_with(".git"));
        assert!(repo.rev_cache_dir().ends_with("rev-cache"));
    }

    #[test]
    fn discover_gitdir_file() {
        let dir = tempfile::tempdir().unwrap();
        let real = dir.path().join("real-git");
        fs::create_dir_all(&real).unwrap();
        let work = dir.path().join("work");
        fs::create_dir_all(&work).unwrap();
        fs::write(work.join(".git"), "gitdir: ../real-git\n").unwrap();

        let repo = Repository::discover(&work).unwrap();
        assert_eq!(repo.git_dir(), fs::canonicalize(&real).unwrap());
    }

    #[test]
    fn discover_bare() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::create_dir_all(dir.path().join("objects")).unwrap();

        let repo = Repository::discover(dir.path()).unwrap();
        assert_eq!(repo.git_dir(), fs::canonicalize(dir.path()).unwrap());
    }

    #[test]
    fn missing_repo_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Repository::discover(dir.path()),
            Err(StoreError::RepoNotFound(_))
        ));
    }
}
