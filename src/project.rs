use std::collections::BTreeMap;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::warn;

use crate::cmd::GitView;
use crate::config::{Branch, GitConfig, Remote};
use crate::errors::GitError;
use crate::refs::{HEAD, R_HEADS};
use crate::review::ReviewableBranch;

/// The slice of the external manifest the core consumes: the manifest
/// branch name (anchor for the `refs/remotes/m/` pointer) and the
/// identity seeded into freshly initialized repositories.
#[derive(Debug, Clone, Default)]
pub struct ManifestContext {
    pub branch: Option<String>,
    pub user_name: Option<String>,
    pub user_email: Option<String>,
}

/// A manifest-declared remote: where project history is fetched from and
/// where reviews are posted.
#[derive(Debug, Clone)]
pub struct RemoteBinding {
    pub name: String,
    pub fetch_url: Option<String>,
    pub review_url: Option<String>,
}

/// A file mirrored out of the worktree after every successful local sync.
/// The destination is left read-only.
#[derive(Debug, Clone)]
pub struct CopyFile {
    pub src: PathBuf,
    pub dest: PathBuf,
}

impl CopyFile {
    /// Install the destination if it is missing or stale. Failure is
    /// reported, not fatal; the sync result does not depend on it.
    pub(crate) fn install(&self) {
        match self.install_inner() {
            Ok(()) => {}
            Err(err) => warn!(
                src = %self.src.display(),
                dest = %self.dest.display(),
                error = %err,
                "cannot copy file"
            ),
        }
    }

    fn install_inner(&self) -> std::io::Result<()> {
        if self.dest.exists() && same_contents(&self.src, &self.dest)? {
            return Ok(());
        }
        if self.dest.exists() {
            // the previous installation is read-only
            fs::remove_file(&self.dest)?;
        }
        fs::copy(&self.src, &self.dest)?;

        let mut perms = fs::metadata(&self.dest)?.permissions();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            perms.set_mode(perms.mode() & !0o222);
        }
        #[cfg(not(unix))]
        perms.set_readonly(true);
        fs::set_permissions(&self.dest, perms)
    }
}

fn same_contents(a: &Path, b: &Path) -> std::io::Result<bool> {
    if fs::metadata(a)?.len() != fs::metadata(b)?.len() {
        return Ok(false);
    }
    let mut fa = fs::File::open(a)?;
    let mut fb = fs::File::open(b)?;
    let mut ba = [0u8; 8192];
    let mut bb = [0u8; 8192];
    loop {
        let na = fa.read(&mut ba)?;
        let nb = fb.read(&mut bb)?;
        if na != nb || ba[..na] != bb[..nb] {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
    }
}

pub(crate) fn parse_committer_ident(raw: &str) -> (String, String) {
    let re = Regex::new(r"^(.*) <([^>]*)> ").expect("static regex");
    match re.captures(raw) {
        Some(caps) => (caps[1].to_string(), caps[2].to_string()),
        None => (String::new(), String::new()),
    }
}

/// One independently-hosted repository of the workspace, reconciling the
/// manifest-declared revision, upstream history, and the local worktree.
///
/// Identity is fixed at construction; the copy-file list and extra
/// remotes accumulate while the manifest is being applied.
#[derive(Debug)]
pub struct Project {
    pub name: String,
    pub remote: RemoteBinding,
    pub gitdir: PathBuf,
    pub worktree: PathBuf,
    pub relpath: String,
    pub revision: String,
    pub manifest: ManifestContext,

    pub(crate) extra_remotes: BTreeMap<String, RemoteBinding>,
    pub(crate) copyfiles: Vec<CopyFile>,
    user_ident: OnceLock<(String, String)>,

    pub(crate) bare_git: GitView,
    pub(crate) work_git: GitView,
    pub(crate) config: GitConfig,
}

impl Project {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        remote: RemoteBinding,
        gitdir: impl Into<PathBuf>,
        worktree: impl Into<PathBuf>,
        relpath: impl Into<String>,
        revision: impl Into<String>,
        manifest: ManifestContext,
    ) -> Self {
        let gitdir = gitdir.into();
        let worktree = worktree.into();
        let bare_git = GitView::bare(&gitdir);
        let work_git = GitView::work(&gitdir, &worktree);
        let config = GitConfig::new(bare_git.clone());
        Self {
            name: name.into(),
            remote,
            gitdir,
            worktree,
            relpath: relpath.into(),
            revision: revision.into(),
            manifest,
            extra_remotes: BTreeMap::new(),
            copyfiles: Vec::new(),
            user_ident: OnceLock::new(),
            bare_git,
            work_git,
            config,
        }
    }

    /// Has the bare repository been created yet?
    pub fn exists(&self) -> bool {
        self.gitdir.is_dir()
    }

    /// Short name of the currently checked out branch, or `None` on a
    /// detached HEAD.
    pub fn current_branch(&self) -> Option<String> {
        let head = self.work_git.get_head().ok()?;
        head.strip_prefix(R_HEADS).map(str::to_string)
    }

    /// Is the working directory modified in some way? Refreshes the index
    /// first so stat-only differences do not count.
    pub fn is_dirty(&self, consider_untracked: bool) -> Result<bool, GitError> {
        self.work_git.git(
            "update-index",
            &["-q", "--unmerged", "--ignore-missing", "--refresh"],
        )?;
        if !self
            .work_git
            .diff_z("diff-index", &["-M", "--cached", HEAD])?
            .is_empty()
        {
            return Ok(true);
        }
        if !self.work_git.diff_z("diff-files", &[])?.is_empty() {
            return Ok(true);
        }
        if consider_untracked && !self.work_git.ls_others()?.is_empty() {
            return Ok(true);
        }
        Ok(false)
    }

    fn user_identity(&self) -> Result<&(String, String), GitError> {
        if let Some(ident) = self.user_ident.get() {
            return Ok(ident);
        }
        let raw = self.bare_git.var("GIT_COMMITTER_IDENT")?;
        let parsed = parse_committer_ident(&raw);
        Ok(self.user_ident.get_or_init(|| parsed))
    }

    /// The user's personal name, from the committer ident.
    pub fn user_name(&self) -> Result<&str, GitError> {
        Ok(&self.user_identity()?.0)
    }

    /// The user's email address; very likely their review-server login.
    pub fn user_email(&self) -> Result<&str, GitError> {
        Ok(&self.user_identity()?.1)
    }

    /// Configuration for a single remote.
    pub fn get_remote(&self, name: &str) -> Result<Remote, GitError> {
        self.config.get_remote(name)
    }

    /// Configuration for a single branch.
    pub fn get_branch(&self, name: &str) -> Result<Branch, GitError> {
        self.config.get_branch(name)
    }

    /// Register an additional remote to install and fetch during the
    /// network half.
    pub fn add_extra_remote(&mut self, binding: RemoteBinding) {
        self.extra_remotes.insert(binding.name.clone(), binding);
    }

    /// Register a copy-file rule. `src` is relative to the worktree;
    /// `dest` is already absolute.
    pub fn add_copy_file(&mut self, src: impl AsRef<Path>, dest: impl Into<PathBuf>) {
        self.copyfiles.push(CopyFile {
            src: self.worktree.join(src),
            dest: dest.into(),
        });
    }

    pub(crate) fn install_copy_files(&self) {
        for file in &self.copyfiles {
            file.install();
        }
    }

    pub(crate) fn all_refs(&self) -> Result<BTreeMap<String, String>, GitError> {
        self.bare_git.list_refs()
    }

    // ── Branch management ────────────────────────────────────────────

    /// Create a new topic branch off the manifest's revision and make it
    /// track the primary remote.
    pub fn start_branch(&self, name: &str) -> Result<()> {
        let mut branch = self.get_branch(name)?;
        branch.remote = Some(self.get_remote(&self.remote.name)?);
        branch.merge = Some(self.revision.clone());

        let rev = branch
            .local_merge()?
            .with_context(|| format!("branch {name} has no local merge point"))?;
        self.work_git
            .run(&["checkout", "-b", name, &rev])
            .with_context(|| format!("{}: checkout {rev}", self.name))?;
        branch.save()?;
        Ok(())
    }

    /// Delete every topic branch already merged into upstream, including
    /// the current one when it is clean and fully merged. Returns a
    /// reviewable-branch record for each branch that was kept.
    pub fn prune_heads(&self) -> Result<Vec<ReviewableBranch<'_>>> {
        let cb = self.current_branch();
        let mut kill: Vec<String> = self
            .all_refs()?
            .keys()
            .filter_map(|name| name.strip_prefix(R_HEADS))
            .filter(|name| cb.as_deref() != Some(*name))
            .map(str::to_string)
            .collect();

        let rev = self
            .get_remote(&self.remote.name)?
            .to_local(&self.revision)?;

        if let Some(cb) = &cb {
            let range = format!("{HEAD}...{rev}");
            if self.work_git.rev_list(&[&range])?.is_empty() && !self.is_dirty(false)? {
                self.work_git.detach_head(HEAD, None)?;
                kill.push(cb.clone());
            }
        }

        let mut deleted: Vec<String> = Vec::new();
        if !kill.is_empty() {
            let old = self
                .bare_git
                .get_head()
                .unwrap_or_else(|_| "refs/heads/please_never_use_this_as_a_branch_name".to_string());

            self.bare_git.detach_head(&rev, None)?;
            let mut args = vec!["branch".to_string(), "-d".to_string()];
            args.extend(kill.iter().cloned());
            let argv: Vec<&str> = args.iter().map(String::as_str).collect();
            // deletion refusals ("not fully merged") are expected; the
            // stdout tells us which branches actually went away
            let result = self.bare_git.try_run(&argv);
            self.bare_git.set_head(&old, None)?;
            let output = result?;

            let stdout = String::from_utf8_lossy(&output.stdout);
            deleted = parse_deleted_branches(&stdout);

            if !deleted.is_empty() {
                self.clean_published_cache()?;
            }
        }

        if let Some(cb) = &cb
            && !kill.contains(cb)
        {
            kill.push(cb.clone());
            kill.sort();
        }

        let mut kept = Vec::new();
        for name in &kill {
            if deleted.iter().any(|d| d == name) {
                continue;
            }
            let branch = self.get_branch(name)?;
            let base = branch.local_merge()?.unwrap_or_else(|| rev.clone());
            kept.push(ReviewableBranch::new(self, branch, base));
        }
        Ok(kept)
    }
}

pub(crate) fn parse_deleted_branches(stdout: &str) -> Vec<String> {
    let re = Regex::new(r"^Deleted branch (.*)\.$").expect("static regex");
    stdout
        .lines()
        .filter_map(|line| re.captures(line))
        .map(|caps| caps[1].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_committer_ident() {
        let (name, email) =
            parse_committer_ident("A U Thor <author@example.com> 1718000000 +0200");
        assert_eq!(name, "A U Thor");
        assert_eq!(email, "author@example.com");
    }

    #[test]
    fn test_parse_committer_ident_empty_email() {
        let (name, email) = parse_committer_ident("Nobody <> 1718000000 +0200");
        assert_eq!(name, "Nobody");
        assert_eq!(email, "");
    }

    #[test]
    fn test_parse_committer_ident_garbage() {
        let (name, email) = parse_committer_ident("not an ident");
        assert_eq!(name, "");
        assert_eq!(email, "");
    }

    #[test]
    fn test_parse_deleted_branches() {
        let stdout = "Deleted branch done.\nerror: The branch 'topic' is not fully merged.\nDeleted branch also-done.\n";
        assert_eq!(parse_deleted_branches(stdout), vec!["done", "also-done"]);
    }

    #[test]
    fn test_parse_deleted_branches_none() {
        assert!(parse_deleted_branches("error: nothing deleted\n").is_empty());
    }

    #[test]
    fn test_copy_file_installs_and_marks_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("dest.txt");
        fs::write(&src, b"contents\n").unwrap();

        let copy = CopyFile {
            src: src.clone(),
            dest: dest.clone(),
        };
        copy.install();

        assert_eq!(fs::read(&dest).unwrap(), b"contents\n");
        assert!(fs::metadata(&dest).unwrap().permissions().readonly());
    }

    #[test]
    fn test_copy_file_refreshes_stale_destination() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src.txt");
        let dest = dir.path().join("dest.txt");
        fs::write(&src, b"new").unwrap();
        fs::write(&dest, b"old").unwrap();

        let copy = CopyFile {
            src: src.clone(),
            dest: dest.clone(),
        };
        copy.install();
        assert_eq!(fs::read(&dest).unwrap(), b"new");

        // and a second install over the now read-only destination is a no-op
        copy.install();
        assert_eq!(fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn test_same_contents() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        fs::write(&a, b"same").unwrap();
        fs::write(&b, b"same").unwrap();
        assert!(same_contents(&a, &b).unwrap());
        fs::write(&b, b"diff").unwrap();
        assert!(!same_contents(&a, &b).unwrap());
    }

    #[test]
    fn test_add_copy_file_joins_worktree() {
        let mut project = Project::new(
            "platform/build",
            RemoteBinding {
                name: "origin".to_string(),
                fetch_url: Some("git://example.com".to_string()),
                review_url: None,
            },
            "/ws/.repo/projects/platform/build.git",
            "/ws/build",
            "build",
            "refs/heads/master",
            ManifestContext::default(),
        );
        project.add_copy_file("envsetup.sh", "/ws/envsetup.sh");
        assert_eq!(
            project.copyfiles[0].src,
            PathBuf::from("/ws/build/envsetup.sh")
        );
        assert_eq!(project.copyfiles[0].dest, PathBuf::from("/ws/envsetup.sh"));
    }
}
