use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result, bail};
use tracing::info;

use crate::config::Branch;
use crate::errors::GitError;
use crate::project::Project;
use crate::refs::{R_HEADS, R_PUB};

/// Everything the external review transport needs to ship one branch.
#[derive(Debug)]
pub struct BundleUpload<'a> {
    pub gitdir: &'a Path,
    pub server: &'a str,
    pub email: &'a str,
    pub dest_project: &'a str,
    pub dest_branch: &'a str,
    pub src_branch: &'a str,
    /// Negated refs (`^<name>`) already present on the server.
    pub bases: &'a [String],
}

/// Seam to the review-server transport (an external collaborator).
///
/// Implementations report login failures and HTTP failures through
/// [`crate::errors::UploadError`]; any other outcome is success.
pub trait BundleUploader {
    fn upload_bundle(&self, upload: &BundleUpload<'_>) -> Result<(), crate::errors::UploadError>;
}

/// A local branch whose tip differs from its published tip and carries
/// commits its upstream does not have.
///
/// The commit listing is memoized; a record is only valid for the sync
/// decision it was computed in.
pub struct ReviewableBranch<'a> {
    project: &'a Project,
    pub branch: Branch,
    pub base: String,
    commit_cache: OnceLock<Vec<String>>,
}

impl<'a> ReviewableBranch<'a> {
    pub(crate) fn new(project: &'a Project, branch: Branch, base: String) -> Self {
        Self {
            project,
            branch,
            base,
            commit_cache: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.branch.name
    }

    /// Oneline listing of the commits this branch would put up for
    /// review, oldest first.
    pub fn commits(&self) -> Result<&[String], GitError> {
        if let Some(commits) = self.commit_cache.get() {
            return Ok(commits);
        }
        let not_base = format!("^{}", self.base);
        let head = format!("{R_HEADS}{}", self.name());
        let commits = self.project.bare_git.rev_list(&[
            "--abbrev=8",
            "--abbrev-commit",
            "--pretty=oneline",
            "--reverse",
            "--date-order",
            &not_base,
            &head,
            "--",
        ])?;
        Ok(self.commit_cache.get_or_init(|| commits))
    }

    /// Commit date of the branch tip.
    pub fn date(&self) -> Result<String, GitError> {
        let head = format!("{R_HEADS}{}", self.name());
        self.project
            .bare_git
            .git("log", &["--pretty=format:%cd", "-n", "1", &head, "--"])
    }

    /// Web address of the branch tip on the review server.
    pub fn tip_url(&self) -> Result<String> {
        let branch = self.project.get_branch(self.name())?;
        let review = branch
            .remote
            .as_ref()
            .and_then(|r| r.review.as_deref())
            .with_context(|| format!("branch {} has no review server", self.name()))?;
        let commit = self
            .project
            .bare_git
            .rev_parse(&format!("{R_HEADS}{}", self.name()))?;
        Ok(format!("http://{review}/r/{}", &commit[..12]))
    }

    pub fn owner_email(&self) -> Result<&str, GitError> {
        self.project.user_email()
    }

    /// Upload this branch for review.
    pub fn upload_for_review(&self, uploader: &dyn BundleUploader) -> Result<()> {
        self.project
            .upload_for_review(Some(self.name()), uploader)
    }
}

/// A single patch set fetched from the review server to `FETCH_HEAD`.
pub struct DownloadedChange<'a> {
    project: &'a Project,
    pub base: String,
    pub change_id: u32,
    pub patch_id: u32,
    pub commit: String,
    commit_cache: OnceLock<Vec<String>>,
}

impl DownloadedChange<'_> {
    /// Oneline listing of the commits the change adds over its base,
    /// oldest first.
    pub fn commits(&self) -> Result<&[String], GitError> {
        if let Some(commits) = self.commit_cache.get() {
            return Ok(commits);
        }
        let not_base = format!("^{}", self.base);
        let commits = self.project.bare_git.rev_list(&[
            "--abbrev=8",
            "--abbrev-commit",
            "--pretty=oneline",
            "--reverse",
            "--date-order",
            &not_base,
            &self.commit,
            "--",
        ])?;
        Ok(self.commit_cache.get_or_init(|| commits))
    }
}

/// Split one ref listing into branch heads and published snapshots, both
/// keyed by short name.
pub(crate) fn partition_heads(
    refs: &BTreeMap<String, String>,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut heads = BTreeMap::new();
    let mut published = BTreeMap::new();
    for (name, id) in refs {
        if let Some(short) = name.strip_prefix(R_HEADS) {
            heads.insert(short.to_string(), id.clone());
        } else if let Some(short) = name.strip_prefix(R_PUB) {
            published.insert(short.to_string(), id.clone());
        }
    }
    (heads, published)
}

/// Destination branch on the server: the tracked upstream name, fully
/// qualified under `refs/heads/`.
pub(crate) fn destination_branch(merge: &str) -> String {
    if merge.starts_with(R_HEADS) {
        merge.to_string()
    } else {
        format!("{R_HEADS}{merge}")
    }
}

/// Gerrit-style change ref: `refs/changes/<cid mod 100, two digits>/<cid>/<pid>`.
pub(crate) fn change_ref(change_id: u32, patch_id: u32) -> String {
    format!(
        "refs/changes/{:02}/{}/{}",
        change_id % 100,
        change_id,
        patch_id
    )
}

impl Project {
    /// The object id the branch was last uploaded at, if it has been
    /// uploaded and not since rewritten.
    pub fn was_published(&self, branch: &str) -> Option<String> {
        self.bare_git.rev_parse(&format!("{R_PUB}{branch}")).ok()
    }

    /// Drop published snapshots whose branch no longer exists.
    pub fn clean_published_cache(&self) -> Result<(), GitError> {
        let refs = self.all_refs()?;
        for (name, id) in &refs {
            if let Some(short) = name.strip_prefix(R_PUB)
                && !refs.contains_key(&format!("{R_HEADS}{short}"))
            {
                self.bare_git.delete_ref(name, Some(id))?;
            }
        }
        Ok(())
    }

    /// List the branches currently eligible for review upload.
    pub fn uploadable_branches(&self) -> Result<Vec<ReviewableBranch<'_>>> {
        let refs = self.all_refs()?;
        let (heads, published) = partition_heads(&refs);

        let mut ready = Vec::new();
        for (name, id) in &heads {
            if published.get(name) == Some(id) {
                continue;
            }
            let branch = self.get_branch(name)?;
            let Some(base) = branch.local_merge()? else {
                continue;
            };
            let rb = ReviewableBranch::new(self, branch, base);
            if !rb.commits()?.is_empty() {
                ready.push(rb);
            }
        }
        Ok(ready)
    }

    /// Upload the named branch (or the current one) for code review.
    ///
    /// On success the published snapshot `refs/published/<branch>` is
    /// advanced to the branch tip. Transport failures surface as
    /// [`crate::errors::UploadError`] (downcastable) and leave the
    /// snapshot untouched.
    pub fn upload_for_review(
        &self,
        branch: Option<&str>,
        uploader: &dyn BundleUploader,
    ) -> Result<()> {
        let name = match branch {
            Some(name) => name.to_string(),
            None => self
                .current_branch()
                .with_context(|| format!("{}: not currently on a branch", self.name))?,
        };

        let branch = self.get_branch(&name)?;
        let (Some(remote), Some(merge)) = (branch.remote.as_ref(), branch.merge.as_deref())
        else {
            bail!("branch {name} does not track a remote");
        };
        let Some(review) = remote.review.as_deref() else {
            bail!("remote {} has no review url", remote.name);
        };
        let dest_branch = destination_branch(merge);

        let mut bases = Vec::new();
        for ref_name in self.all_refs()?.keys() {
            if remote.writes_to(ref_name) {
                bases.push(format!("^{ref_name}"));
            }
        }
        if bases.is_empty() {
            bail!("no base refs, cannot upload {name}");
        }

        info!(project = %self.name, branch = %name, "uploading for review");
        let src_branch = format!("{R_HEADS}{name}");
        let upload = BundleUpload {
            gitdir: &self.gitdir,
            server: review,
            email: self.user_email()?,
            dest_project: &self.name,
            dest_branch: &dest_branch,
            src_branch: &src_branch,
            bases: &bases,
        };
        uploader.upload_bundle(&upload)?;

        let msg = format!("posted to {review} for {dest_branch}");
        self.bare_git.update_ref(
            &format!("{R_PUB}{name}"),
            &src_branch,
            None,
            Some(&msg),
            false,
        )?;
        Ok(())
    }

    /// Download a single patch set of a single change to `FETCH_HEAD`.
    /// Returns `None` when the change ref cannot be fetched.
    pub fn download_patch_set(
        &self,
        change_id: u32,
        patch_id: u32,
    ) -> Result<Option<DownloadedChange<'_>>> {
        let remote = self.get_remote(&self.remote.name)?;

        let mut args = vec!["fetch".to_string(), remote.name.clone()];
        args.push(change_ref(change_id, patch_id));
        args.extend(remote.fetch.iter().map(|spec| spec.to_string()));
        let argv: Vec<&str> = args.iter().map(String::as_str).collect();

        let output = self.bare_git.try_run(&argv)?;
        if !output.status.success() {
            return Ok(None);
        }

        Ok(Some(DownloadedChange {
            project: self,
            base: remote.to_local(&self.revision)?,
            change_id,
            patch_id,
            commit: self.bare_git.rev_parse("FETCH_HEAD")?,
            commit_cache: OnceLock::new(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_ref_layout() {
        assert_eq!(change_ref(1234, 1), "refs/changes/34/1234/1");
        assert_eq!(change_ref(5, 2), "refs/changes/05/5/2");
        assert_eq!(change_ref(100, 3), "refs/changes/00/100/3");
    }

    #[test]
    fn test_destination_branch_qualification() {
        assert_eq!(destination_branch("master"), "refs/heads/master");
        assert_eq!(destination_branch("refs/heads/master"), "refs/heads/master");
    }

    #[test]
    fn test_partition_heads() {
        let mut refs = BTreeMap::new();
        refs.insert("refs/heads/topic".to_string(), "a".repeat(40));
        refs.insert("refs/heads/other".to_string(), "b".repeat(40));
        refs.insert("refs/published/topic".to_string(), "c".repeat(40));
        refs.insert("refs/tags/v1".to_string(), "d".repeat(40));
        refs.insert("refs/remotes/origin/master".to_string(), "e".repeat(40));

        let (heads, published) = partition_heads(&refs);
        assert_eq!(heads.len(), 2);
        assert_eq!(heads["topic"], "a".repeat(40));
        assert_eq!(published.len(), 1);
        assert_eq!(published["topic"], "c".repeat(40));
    }

    #[test]
    fn test_partition_heads_unchanged_published_tip_detection() {
        // a branch whose head equals its published snapshot is not
        // reviewable; the enumeration relies on this comparison
        let mut refs = BTreeMap::new();
        refs.insert("refs/heads/topic".to_string(), "a".repeat(40));
        refs.insert("refs/published/topic".to_string(), "a".repeat(40));
        let (heads, published) = partition_heads(&refs);
        assert_eq!(heads.get("topic"), published.get("topic"));
    }
}
