use std::path::PathBuf;

/// A git subcommand failed or produced output we could not use.
///
/// `Command` carries the argv and captured stderr so callers can surface
/// exactly what git was asked to do. `Parse` covers required output that
/// did not match the expected shape.
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("git {argv} failed: {stderr}")]
    Command {
        argv: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("git {argv}: {message}")]
    Parse { argv: String, message: String },

    #[error("failed to run git {argv}: {source}")]
    Spawn {
        argv: String,
        #[source]
        source: std::io::Error,
    },

    #[error("remote {remote} does not fetch {rev}")]
    UnmappedRef { remote: String, rev: String },
}

impl GitError {
    pub(crate) fn parse(argv: impl Into<String>, message: impl Into<String>) -> Self {
        GitError::Parse {
            argv: argv.into(),
            message: message.into(),
        }
    }
}

/// A fetch prerequisite is missing; there is nothing to retry.
#[derive(Debug, thiserror::Error)]
#[error("project {project}: remote {remote} has no fetch url")]
pub struct ImportError {
    pub project: String,
    pub remote: String,
}

/// Review upload failed. The two variants are the only failure modes the
/// transport reports in a recoverable way; the published ref must not be
/// updated on either.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("login failure")]
    Login,

    #[error("HTTP error {0}")]
    Http(u16),
}

/// A worktree could not be initialized from its bare repository.
#[derive(Debug, thiserror::Error)]
#[error("cannot initialize work tree at {0}")]
pub struct WorkTreeInitError(pub PathBuf);
