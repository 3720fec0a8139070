use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{Command, Output};

use tracing::{debug, trace};

use crate::diff::{self, DiffEntry};
use crate::errors::GitError;
use crate::refs;

/// A view onto one project's repository for running git subcommands.
///
/// Every git invocation in the crate goes through here. A `bare` view
/// addresses the bare repository directly (`GIT_DIR` set, cwd inside the
/// gitdir); a work view runs from the worktree so index and checkout
/// operations see the user's files.
///
/// Cloning is cheap; a [`crate::project::Project`] owns one of each.
#[derive(Debug, Clone)]
pub struct GitView {
    gitdir: PathBuf,
    workdir: PathBuf,
    bare: bool,
}

impl GitView {
    /// View addressing the bare repository.
    pub fn bare(gitdir: impl Into<PathBuf>) -> Self {
        let gitdir = gitdir.into();
        Self {
            workdir: gitdir.clone(),
            gitdir,
            bare: true,
        }
    }

    /// View addressing the work tree (index, checkout, diffs).
    pub fn work(gitdir: impl Into<PathBuf>, worktree: impl Into<PathBuf>) -> Self {
        Self {
            gitdir: gitdir.into(),
            workdir: worktree.into(),
            bare: false,
        }
    }

    fn argv_display(args: &[&str]) -> String {
        args.join(" ")
    }

    fn spawn(&self, args: &[&str], no_editor: bool) -> Result<Output, GitError> {
        let pretty = Self::argv_display(args);
        trace!(git = %pretty, bare = self.bare, "git:spawn");

        let mut cmd = Command::new("git");
        cmd.args(args);
        if self.bare {
            cmd.current_dir(&self.gitdir);
            cmd.env("GIT_DIR", &self.gitdir);
        } else {
            cmd.current_dir(&self.workdir);
        }
        if no_editor {
            cmd.env("GIT_EDITOR", ":");
        }

        cmd.output().map_err(|source| GitError::Spawn {
            argv: pretty,
            source,
        })
    }

    fn failure(args: &[&str], output: &Output) -> GitError {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        debug!(
            git = %Self::argv_display(args),
            code = ?output.status.code(),
            stderr = %stderr,
            "git:failure"
        );
        GitError::Command {
            argv: Self::argv_display(args),
            code: output.status.code(),
            stderr,
        }
    }

    /// Run a subcommand, capturing stdout/stderr. Non-zero exit is an error.
    pub fn run(&self, args: &[&str]) -> Result<Output, GitError> {
        let output = self.spawn(args, false)?;
        if !output.status.success() {
            return Err(Self::failure(args, &output));
        }
        Ok(output)
    }

    /// Like [`run`](Self::run) but with the interactive editor suppressed
    /// (`GIT_EDITOR=:`), for commands that would otherwise open one.
    pub fn run_no_editor(&self, args: &[&str]) -> Result<Output, GitError> {
        let output = self.spawn(args, true)?;
        if !output.status.success() {
            return Err(Self::failure(args, &output));
        }
        Ok(output)
    }

    /// Run a subcommand and hand back the raw output whatever the exit
    /// code. Only a spawn failure is an error. For callers that treat the
    /// exit status as data (fetch retries, branch deletion refusals).
    pub fn try_run(&self, args: &[&str]) -> Result<Output, GitError> {
        self.spawn(args, false)
    }

    /// Run a subcommand used as a boolean check.
    pub fn check(&self, args: &[&str]) -> Result<bool, GitError> {
        Ok(self.spawn(args, false)?.status.success())
    }

    /// Generic escape hatch: run any subcommand and return its stdout.
    ///
    /// A single trailing newline is stripped so one-line answers come back
    /// bare; multi-line output is returned verbatim.
    pub fn git(&self, subcommand: &str, args: &[&str]) -> Result<String, GitError> {
        let mut argv = Vec::with_capacity(args.len() + 1);
        argv.push(subcommand);
        argv.extend_from_slice(args);
        let output = self.run(&argv)?;
        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.ends_with('\n') && text.matches('\n').count() == 1 {
            text.pop();
        }
        Ok(text)
    }

    // ── Typed entry points ───────────────────────────────────────────

    /// Enumerate all refs as an ordered name → object-id map.
    ///
    /// Always a fresh listing; nothing here is cached.
    pub fn list_refs(&self) -> Result<BTreeMap<String, String>, GitError> {
        let args = ["for-each-ref", "--format=%(objectname) %(refname)"];
        let output = self.run(&args)?;
        let text = String::from_utf8_lossy(&output.stdout);
        refs::parse_ref_lines(&text)
            .map_err(|message| GitError::parse(Self::argv_display(&args), message))
    }

    /// List untracked, non-ignored paths in the work tree.
    pub fn ls_others(&self) -> Result<Vec<String>, GitError> {
        let args = ["ls-files", "-z", "--others", "--exclude-standard"];
        let output = self.try_run(&args)?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text
            .split('\0')
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// NUL-delimited diff (`diff-index` or `diff-files`) as path → entry.
    pub fn diff_z(
        &self,
        kind: &str,
        args: &[&str],
    ) -> Result<BTreeMap<String, DiffEntry>, GitError> {
        let mut argv = vec![kind, "-z"];
        argv.extend_from_slice(args);
        let output = self.run(&argv)?;
        let text = String::from_utf8_lossy(&output.stdout);
        diff::parse_diff_z(&text)
            .map_err(|message| GitError::parse(Self::argv_display(&argv), message))
    }

    /// `rev-list` with the arguments passed through untouched; one commit
    /// id per returned line.
    pub fn rev_list(&self, args: &[&str]) -> Result<Vec<String>, GitError> {
        let mut argv = vec!["rev-list"];
        argv.extend_from_slice(args);
        let output = self.run(&argv)?;
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Resolve a rev to its object id.
    pub fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        self.git("rev-parse", &[rev])
    }

    /// Atomically update a ref, optionally guarded by its expected old
    /// value, with an optional reflog message. `detach` writes the ref
    /// itself rather than following a symbolic ref.
    pub fn update_ref(
        &self,
        name: &str,
        new: &str,
        old: Option<&str>,
        message: Option<&str>,
        detach: bool,
    ) -> Result<(), GitError> {
        let mut args = vec!["update-ref"];
        if let Some(msg) = message {
            args.extend_from_slice(&["-m", msg]);
        }
        if detach {
            args.push("--no-deref");
        }
        args.push(name);
        args.push(new);
        if let Some(old) = old {
            args.push(old);
        }
        self.run(&args)?;
        Ok(())
    }

    /// Delete a ref, guarded by its observed value (resolved first when
    /// the caller did not supply one).
    pub fn delete_ref(&self, name: &str, old: Option<&str>) -> Result<(), GitError> {
        let resolved;
        let old = match old {
            Some(old) if !old.is_empty() => old,
            _ => {
                resolved = self.rev_parse(name)?;
                resolved.as_str()
            }
        };
        self.run(&["update-ref", "-d", name, old])?;
        Ok(())
    }

    /// `symbolic-ref` passthrough; returns trimmed stdout.
    pub fn symbolic_ref(&self, args: &[&str]) -> Result<String, GitError> {
        self.git("symbolic-ref", args)
    }

    /// Read HEAD symbolically. Errors when HEAD is detached.
    pub fn get_head(&self) -> Result<String, GitError> {
        self.symbolic_ref(&[refs::HEAD])
    }

    /// Point HEAD at a ref (symbolically).
    pub fn set_head(&self, target: &str, message: Option<&str>) -> Result<(), GitError> {
        let mut args = Vec::new();
        if let Some(msg) = message {
            args.extend_from_slice(&["-m", msg]);
        }
        args.push(refs::HEAD);
        args.push(target);
        self.symbolic_ref(&args)?;
        Ok(())
    }

    /// Detach HEAD at the given rev without moving the branch it was on.
    pub fn detach_head(&self, new: &str, message: Option<&str>) -> Result<(), GitError> {
        self.update_ref(refs::HEAD, new, None, message, true)
    }

    /// `git var` lookup (e.g. `GIT_COMMITTER_IDENT`).
    pub fn var(&self, name: &str) -> Result<String, GitError> {
        self.git("var", &[name])
    }
}
