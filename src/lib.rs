//! Per-project reconciliation engine for manifest-driven multi-repository
//! workspaces.
//!
//! A workspace is a forest of independently-hosted git repositories that
//! together form one logical checkout. For each project this crate
//! reconciles three states: the revision an external manifest declares,
//! the upstream history, and the user's worktree and topic branches. It
//! decides when to fast-forward, rebase, hard-reset, or refuse, without
//! ever rewriting published history or discarding uncommitted work, and
//! it backs the upload-for-review and patchset-download workflows.
//!
//! The sync process is split into a network half (fetching into the bare
//! repository) and a local half (moving the worktree); a host can run the
//! network half of many projects concurrently and serialize per project.
//! The workspace CLI, manifest parser, and review transport are external
//! collaborators; see [`project::Project`], [`review::BundleUploader`].

pub mod cmd;
pub mod config;
pub mod diff;
pub mod errors;
pub mod logger;
pub mod project;
pub mod refs;
pub mod review;
pub mod status;
mod sync;
mod worktree;

pub use cmd::GitView;
pub use config::{Branch, GitConfig, RefSpec, Remote};
pub use diff::DiffEntry;
pub use errors::{GitError, ImportError, UploadError};
pub use project::{CopyFile, ManifestContext, Project, RemoteBinding};
pub use review::{BundleUpload, BundleUploader, DownloadedChange, ReviewableBranch};
pub use status::{StatusClass, StatusEntry, WorkTreeState, WorkTreeStatus};
