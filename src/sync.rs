use std::fs;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::errors::{GitError, ImportError};
use crate::project::Project;
use crate::refs::{self, HEAD, NULL_OID, R_HEADS, R_M, R_TAGS};

/// Projects whose initial import was shipped and then rewritten upstream.
/// Their `android-1.0` tag may still point at the pre-rewrite history and
/// has to be dropped and fetched again. Fixed list; do not extend.
const REWRITTEN_IMPORTS: [&str; 5] = [
    "platform/external/iptables",
    "platform/external/libpcap",
    "platform/external/tcpdump",
    "platform/external/webkit",
    "platform/system/wlan/ti",
];
const REWRITTEN_RELEASE_BRANCH: &str = "release-1.0";
const REWRITTEN_TAG: &str = "android-1.0";

pub(crate) fn not_rev(rev: &str) -> String {
    format!("^{rev}")
}

/// Facts about a tracked branch, gathered read-only before any decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SyncFacts {
    /// Commits newly arrived on the upstream (`^HEAD rev` non-empty).
    pub upstream_gain: bool,
    /// The branch was uploaded for review and its published tip is not
    /// contained in the new upstream.
    pub published_not_merged: bool,
    /// Commits the upstream dropped (`^rev old_merge` non-empty).
    pub upstream_lost: bool,
    /// Uncommitted tracked changes in the worktree.
    pub dirty: bool,
    /// The user's own commits on top of the previous upstream.
    pub my_changes: bool,
}

/// How to reconcile a tracked branch with its new upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SyncStep {
    /// Published history would have to be rewritten; report and leave
    /// HEAD where it is.
    KeepPublished,
    /// Upstream did not move; nothing to do.
    UpToDate,
    /// A tree change is required but the worktree is dirty; the user has
    /// to commit or discard first.
    RefuseDirty,
    /// Replay the user's commits from the previous upstream onto the new
    /// one.
    Rebase,
    /// Upstream rewrote history and the user has no commits of their
    /// own; adopt upstream's view.
    Reset,
    /// Plain descent; advance the branch.
    FastForward,
}

/// The reconciliation decision. Fast-forward is preferred over rebase,
/// rebase over reset; published history is never rewritten; dirty trees
/// block any tree change.
pub(crate) fn plan_sync(facts: &SyncFacts) -> SyncStep {
    if facts.published_not_merged && facts.upstream_gain {
        return SyncStep::KeepPublished;
    }
    if !facts.upstream_gain && !facts.upstream_lost {
        return SyncStep::UpToDate;
    }
    if facts.dirty {
        return SyncStep::RefuseDirty;
    }
    if facts.my_changes {
        SyncStep::Rebase
    } else if facts.upstream_lost {
        SyncStep::Reset
    } else {
        SyncStep::FastForward
    }
}

impl Project {
    // ── Network half ─────────────────────────────────────────────────

    /// Perform only the network I/O portion of the sync process: make
    /// sure the bare repository exists, its remotes are installed, all
    /// required history is fetched, and the manifest-mirror ref points at
    /// the declared revision. Local branch and worktree state is not
    /// touched.
    ///
    /// Returns `Ok(false)` on fetch failure; the local half must not run.
    pub fn sync_network_half(&self) -> Result<bool> {
        if !self.exists() {
            if self.remote.fetch_url.is_none() {
                return Err(ImportError {
                    project: self.name.clone(),
                    remote: self.remote.name.clone(),
                }
                .into());
            }
            info!(project = %self.name, "initializing project");
            self.init_git_dir()?;
        }
        self.init_remotes()?;
        for binding in self.extra_remotes.values() {
            if !self.remote_fetch(&binding.name)? {
                return Ok(false);
            }
        }
        if !self.remote_fetch(&self.remote.name)? {
            return Ok(false);
        }
        self.repair_rewritten_imports();
        self.init_manifest_ref()?;
        Ok(true)
    }

    fn init_git_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.gitdir)
            .with_context(|| format!("creating {}", self.gitdir.display()))?;
        self.bare_git.git("init", &[])?;
        self.config.set("core.bare", None)?;

        // drop the stock sample hooks
        if let Ok(entries) = fs::read_dir(self.gitdir.join("hooks")) {
            for entry in entries.flatten() {
                let _ = fs::remove_file(entry.path());
            }
        }

        if let Some(name) = &self.manifest.user_name {
            self.config.set("user.name", Some(name))?;
        }
        if let Some(email) = &self.manifest.user_email {
            self.config.set("user.email", Some(email))?;
        }
        Ok(())
    }

    fn init_remotes(&self) -> Result<()> {
        if let Some(fetch_url) = &self.remote.fetch_url {
            let mut remote = self.get_remote(&self.remote.name)?;
            remote.url = Some(project_fetch_url(fetch_url, &self.name));
            remote.review = self.remote.review_url.clone();
            remote.reset_fetch();
            remote.save()?;
        }
        for binding in self.extra_remotes.values() {
            let mut remote = self.get_remote(&binding.name)?;
            remote.url = binding.fetch_url.clone();
            remote.review = binding.review_url.clone();
            remote.reset_fetch();
            remote.save()?;
        }
        Ok(())
    }

    fn remote_fetch(&self, name: &str) -> Result<bool, GitError> {
        self.bare_git.check(&["fetch", name])
    }

    fn repair_rewritten_imports(&self) {
        if !REWRITTEN_IMPORTS.contains(&self.name.as_str()) {
            return;
        }
        // best effort; a failure here just leaves the stale tag in place
        let _ = self.try_repair_rewritten_imports();
    }

    fn try_repair_rewritten_imports(&self) -> Result<(), GitError> {
        let remote = self.get_remote(&self.remote.name)?;
        let release = remote.to_local(&format!("{R_HEADS}{REWRITTEN_RELEASE_BRANCH}"))?;
        let tag = format!("{R_TAGS}{REWRITTEN_TAG}");
        if !self.work_git.rev_list(&[&not_rev(&release), &tag])?.is_empty() {
            let spec = format!("+{tag}:{tag}");
            self.bare_git.try_run(&["fetch", &remote.name, &spec])?;
        }
        Ok(())
    }

    /// Point `refs/remotes/m/<manifest-branch>` at the declared revision:
    /// detached for an object id, symbolic to the remote tracking ref for
    /// a branch name.
    fn init_manifest_ref(&self) -> Result<()> {
        let Some(manifest_branch) = &self.manifest.branch else {
            return Ok(());
        };
        let msg = format!("manifest set to {}", self.revision);
        let m_ref = format!("{R_M}{manifest_branch}");

        if refs::is_id(&self.revision) {
            let dst = format!("{}^0", self.revision);
            self.bare_git
                .update_ref(&m_ref, &dst, None, Some(&msg), true)?;
        } else {
            let remote = self.get_remote(&self.remote.name)?;
            let dst = remote.to_local(&self.revision)?;
            self.bare_git.symbolic_ref(&["-m", &msg, &m_ref, &dst])?;
        }
        Ok(())
    }

    // ── Local half ───────────────────────────────────────────────────

    /// Perform only the local I/O portion of the sync process; no network
    /// access. Returns `Ok(true)` when the worktree now matches the
    /// manifest's intent (preserving the user's work where possible),
    /// `Ok(false)` when the user must intervene first.
    pub fn sync_local_half(&self) -> Result<bool> {
        self.init_work_tree()?;
        self.clean_published_cache()?;

        let remote = self.get_remote(&self.remote.name)?;
        let rev = remote.to_local(&self.revision)?;

        let Some(branch_name) = self.current_branch() else {
            // Detached HEAD; the user is assumed to have no local
            // modifications worth worrying about.
            let lost = self.work_git.rev_list(&[&not_rev(&rev), HEAD])?;
            if !lost.is_empty() {
                info!(project = %self.name, commits = lost.len(), "discarding commits");
            }
            if self.checkout_rev(&rev).is_err() {
                return Ok(false);
            }
            self.install_copy_files();
            return Ok(true);
        };

        let mut branch = self.get_branch(&branch_name)?;
        let Some(merge) = branch.local_merge()? else {
            // No tracking configuration; jump off to a detached HEAD and
            // leave the branch alone.
            info!(
                project = %self.name,
                branch = %branch_name,
                "leaving branch; it does not track any upstream"
            );
            if self.checkout_rev(&rev).is_err() {
                return Ok(false);
            }
            self.install_copy_files();
            return Ok(true);
        };

        let upstream_gain = self.work_git.rev_list(&[&not_rev(HEAD), &rev])?;

        let published_not_merged = match self.was_published(&branch_name) {
            Some(published) => !self
                .work_git
                .rev_list(&[&not_rev(&rev), &published])?
                .is_empty(),
            None => false,
        };

        let old_merge = if merge == rev {
            match self.bare_git.rev_parse(&format!("{merge}@{{1}}")) {
                // an unreadable, empty, or null prior value means the
                // tracking ref was only just created, not rebased
                Ok(prior) if prior != NULL_OID && !prior.is_empty() => prior,
                _ => merge.clone(),
            }
        } else {
            // The upstream switched on us. Cross fingers that the old
            // upstream was not in the habit of rebasing itself.
            info!(
                project = %self.name,
                from = %merge,
                to = %rev,
                "manifest switched upstream"
            );
            merge.clone()
        };

        let upstream_lost = if rev == old_merge {
            Vec::new()
        } else {
            self.work_git.rev_list(&[&not_rev(&rev), &old_merge])?
        };

        let my_changes = self.work_git.rev_list(&[&not_rev(&old_merge), HEAD])?;

        let facts = SyncFacts {
            upstream_gain: !upstream_gain.is_empty(),
            published_not_merged,
            upstream_lost: !upstream_lost.is_empty(),
            dirty: self.is_dirty(false)?,
            my_changes: !my_changes.is_empty(),
        };

        match plan_sync(&facts) {
            SyncStep::KeepPublished => {
                info!(
                    project = %self.name,
                    branch = %branch_name,
                    behind = upstream_gain.len(),
                    "branch is published but is now behind upstream"
                );
                info!(
                    project = %self.name,
                    "consider merging or rebasing the unpublished commits"
                );
                Ok(true)
            }
            SyncStep::UpToDate => Ok(true),
            SyncStep::RefuseDirty => {
                warn!(
                    project = %self.name,
                    "commit (or discard) uncommitted changes before sync"
                );
                Ok(false)
            }
            step @ (SyncStep::Rebase | SyncStep::Reset | SyncStep::FastForward) => {
                if !upstream_lost.is_empty() {
                    info!(
                        project = %self.name,
                        commits = upstream_lost.len(),
                        "discarding commits removed from upstream"
                    );
                }

                branch.remote = Some(remote);
                branch.merge = Some(self.revision.clone());
                branch.save()?;

                let moved = match step {
                    SyncStep::Rebase => self.rebase_branch(&old_merge, &rev),
                    SyncStep::Reset => self.reset_hard(&rev),
                    _ => self.fast_forward(&rev),
                };
                if moved.is_err() {
                    return Ok(false);
                }
                self.install_copy_files();
                Ok(true)
            }
        }
    }

    // ── Tree-moving primitives ───────────────────────────────────────

    pub(crate) fn checkout_rev(&self, rev: &str) -> Result<(), GitError> {
        match self.work_git.run(&["checkout", "-q", rev, "--"]) {
            Ok(_) => Ok(()),
            Err(err) => {
                // a repository with no refs yet has nothing to check out
                if self.all_refs()?.is_empty() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    fn reset_hard(&self, rev: &str) -> Result<(), GitError> {
        self.work_git.run(&["reset", "--hard", "-q", rev])?;
        Ok(())
    }

    fn rebase_branch(&self, upstream: &str, onto: &str) -> Result<(), GitError> {
        self.work_git
            .run_no_editor(&["rebase", "-i", "--onto", onto, upstream])?;
        Ok(())
    }

    fn fast_forward(&self, head: &str) -> Result<(), GitError> {
        self.work_git.run(&["merge", head])?;
        Ok(())
    }
}

pub(crate) fn project_fetch_url(base: &str, name: &str) -> String {
    format!("{}/{name}.git", base.trim_end_matches('/'))
}
