use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::errors::WorkTreeInitError;
use crate::project::Project;
use crate::refs::HEAD;

/// The pieces of the bare repository a worktree shares through relative
/// symlinks; object store and ref store included, so both views see one
/// repository.
const SHARED_ENTRIES: [&str; 10] = [
    "config",
    "description",
    "hooks",
    "info",
    "logs",
    "objects",
    "packed-refs",
    "refs",
    "rr-cache",
    "svn",
];

impl Project {
    /// Create `worktree/.git` as a farm of relative symlinks into the
    /// bare repository, write the initial detached HEAD, and populate the
    /// tree. A worktree that already has a `.git` is left untouched.
    pub fn init_work_tree(&self) -> Result<()> {
        let dotgit = self.worktree.join(".git");
        if dotgit.exists() {
            return Ok(());
        }
        self.init_work_tree_inner(&dotgit)
            .context(WorkTreeInitError(self.worktree.clone()))
    }

    fn init_work_tree_inner(&self, dotgit: &Path) -> Result<()> {
        fs::create_dir_all(dotgit)?;

        let relgit = relative_path(&self.gitdir, dotgit);
        for name in SHARED_ENTRIES {
            symlink(&relgit.join(name), &dotgit.join(name))?;
        }

        let rev = self
            .get_remote(&self.remote.name)?
            .to_local(&self.revision)?;
        let rev = self.bare_git.rev_parse(&format!("{rev}^0"))?;
        fs::write(dotgit.join(HEAD), format!("{rev}\n"))?;

        self.work_git.run(&["read-tree", "--reset", "-u", "-v", HEAD])?;
        Ok(())
    }
}

/// Relative path from the directory `from_dir` to `to`: up to their
/// common ancestor, then down into `to`.
pub(crate) fn relative_path(to: &Path, from_dir: &Path) -> PathBuf {
    pathdiff::diff_paths(to, from_dir).unwrap_or_else(|| to.to_path_buf())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::other(
        "shared worktrees require symlink support",
    ))
}
