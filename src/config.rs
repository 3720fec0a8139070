use std::fmt;

use crate::cmd::GitView;
use crate::errors::GitError;
use crate::refs::{self, R_HEADS, R_TAGS};

/// Handle on a repository's persistent configuration, backed by
/// `git config` against the bare repository.
#[derive(Debug, Clone)]
pub struct GitConfig {
    view: GitView,
}

impl GitConfig {
    pub fn new(view: GitView) -> Self {
        Self { view }
    }

    /// Read a single-valued key. Missing keys are `None`.
    pub fn get(&self, key: &str) -> Result<Option<String>, GitError> {
        let output = self.view.try_run(&["config", "--get", key])?;
        if !output.status.success() {
            return Ok(None);
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok(Some(value))
    }

    /// Read every value of a multi-valued key, in file order.
    pub fn get_all(&self, key: &str) -> Result<Vec<String>, GitError> {
        let output = self.view.try_run(&["config", "--get-all", key])?;
        if !output.status.success() {
            return Ok(Vec::new());
        }
        let text = String::from_utf8_lossy(&output.stdout);
        Ok(text.lines().map(str::to_string).collect())
    }

    /// Write a single-valued key; `None` removes it.
    pub fn set(&self, key: &str, value: Option<&str>) -> Result<(), GitError> {
        match value {
            Some(value) => {
                self.view.run(&["config", key, value])?;
            }
            None => self.unset_all(key)?,
        }
        Ok(())
    }

    /// Replace every value of a multi-valued key.
    pub fn set_all(&self, key: &str, values: &[String]) -> Result<(), GitError> {
        self.unset_all(key)?;
        for value in values {
            self.view.run(&["config", "--add", key, value])?;
        }
        Ok(())
    }

    fn unset_all(&self, key: &str) -> Result<(), GitError> {
        let args = ["config", "--unset-all", key];
        let output = self.view.try_run(&args)?;
        // exit code 5: the key was not set to begin with
        if !output.status.success() && output.status.code() != Some(5) {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GitError::Command {
                argv: args.join(" "),
                code: output.status.code(),
                stderr,
            });
        }
        Ok(())
    }

    /// Load the configuration of one remote.
    pub fn get_remote(&self, name: &str) -> Result<Remote, GitError> {
        let url = self.get(&format!("remote.{name}.url"))?;
        let review = self.get(&format!("remote.{name}.review"))?;
        let fetch = self
            .get_all(&format!("remote.{name}.fetch"))?
            .iter()
            .map(|spec| {
                RefSpec::parse(spec)
                    .map_err(|message| GitError::parse(format!("remote.{name}.fetch"), message))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Remote {
            name: name.to_string(),
            url,
            review,
            fetch,
            config: self.clone(),
        })
    }

    /// Load the tracking configuration of one local branch.
    pub fn get_branch(&self, name: &str) -> Result<Branch, GitError> {
        let remote = match self.get(&format!("branch.{name}.remote"))? {
            Some(remote_name) => Some(self.get_remote(&remote_name)?),
            None => None,
        };
        let merge = self.get(&format!("branch.{name}.merge"))?;
        Ok(Branch {
            name: name.to_string(),
            remote,
            merge,
            config: self.clone(),
        })
    }
}

/// One fetchspec: `[+]<src>:<dst>`, with trailing-`/*` wildcards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefSpec {
    pub forced: bool,
    pub src: String,
    pub dst: String,
}

impl RefSpec {
    pub fn new(forced: bool, src: impl Into<String>, dst: impl Into<String>) -> Self {
        Self {
            forced,
            src: src.into(),
            dst: dst.into(),
        }
    }

    pub fn parse(spec: &str) -> Result<Self, String> {
        let (lhs, rhs) = spec
            .split_once(':')
            .ok_or_else(|| format!("malformed refspec: {spec:?}"))?;
        let (forced, src) = match lhs.strip_prefix('+') {
            Some(src) => (true, src),
            None => (false, lhs),
        };
        Ok(Self::new(forced, src, rhs))
    }

    pub fn source_matches(&self, rev: &str) -> bool {
        Self::side_matches(&self.src, rev)
    }

    pub fn dest_matches(&self, name: &str) -> bool {
        Self::side_matches(&self.dst, name)
    }

    fn side_matches(side: &str, name: &str) -> bool {
        if side.is_empty() {
            return false;
        }
        if side == name {
            return true;
        }
        if let Some(prefix) = side.strip_suffix("/*") {
            // keep the trailing slash in the prefix test
            return name.starts_with(&side[..prefix.len() + 1]);
        }
        false
    }

    /// Map a matching source ref to its destination name.
    pub fn map_source(&self, rev: &str) -> String {
        if self.src.ends_with("/*") {
            let mut mapped = self.dst[..self.dst.len() - 1].to_string();
            mapped.push_str(&rev[self.src.len() - 1..]);
            mapped
        } else {
            self.dst.clone()
        }
    }
}

impl fmt::Display for RefSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.forced {
            write!(f, "+")?;
        }
        write!(f, "{}:{}", self.src, self.dst)
    }
}

/// The persisted configuration of one remote: fetch URL, review server,
/// and fetchspecs.
#[derive(Debug, Clone)]
pub struct Remote {
    pub name: String,
    pub url: Option<String>,
    pub review: Option<String>,
    pub fetch: Vec<RefSpec>,
    config: GitConfig,
}

impl Remote {
    /// Map a remote-side name to the local tracking name this remote
    /// fetches it into. Object ids and tags pass through untouched; bare
    /// names are taken as branch names.
    pub fn to_local(&self, rev: &str) -> Result<String, GitError> {
        if refs::is_id(rev) {
            return Ok(rev.to_string());
        }
        if rev.starts_with(R_TAGS) {
            return Ok(rev.to_string());
        }
        let qualified;
        let rev = if rev.starts_with("refs/") {
            rev
        } else {
            qualified = format!("{R_HEADS}{rev}");
            &qualified
        };
        for spec in &self.fetch {
            if spec.source_matches(rev) {
                return Ok(spec.map_source(rev));
            }
        }
        Err(GitError::UnmappedRef {
            remote: self.name.clone(),
            rev: rev.to_string(),
        })
    }

    /// Does any of this remote's fetchspecs write to the given ref?
    pub fn writes_to(&self, name: &str) -> bool {
        self.fetch.iter().any(|spec| spec.dest_matches(name))
    }

    /// Restore the canonical single fetchspec for this remote.
    pub fn reset_fetch(&mut self) {
        self.fetch = vec![RefSpec::new(
            true,
            "refs/heads/*",
            format!("refs/remotes/{}/*", self.name),
        )];
    }

    /// Persist url, review server, and fetchspecs.
    pub fn save(&self) -> Result<(), GitError> {
        let name = &self.name;
        self.config
            .set(&format!("remote.{name}.url"), self.url.as_deref())?;
        self.config
            .set(&format!("remote.{name}.review"), self.review.as_deref())?;
        let specs: Vec<String> = self.fetch.iter().map(|s| s.to_string()).collect();
        self.config.set_all(&format!("remote.{name}.fetch"), &specs)
    }
}

/// The tracking configuration of one local branch.
#[derive(Debug, Clone)]
pub struct Branch {
    pub name: String,
    pub remote: Option<Remote>,
    pub merge: Option<String>,
    config: GitConfig,
}

impl Branch {
    /// The local tracking ref this branch's upstream resolves to, or
    /// `None` when the branch has no tracking configuration.
    pub fn local_merge(&self) -> Result<Option<String>, GitError> {
        match (&self.remote, &self.merge) {
            (Some(remote), Some(merge)) => Ok(Some(remote.to_local(merge)?)),
            _ => Ok(None),
        }
    }

    /// Persist the tracking configuration.
    pub fn save(&self) -> Result<(), GitError> {
        let name = &self.name;
        let remote_name = self.remote.as_ref().map(|r| r.name.as_str());
        self.config
            .set(&format!("branch.{name}.remote"), remote_name)?;
        self.config
            .set(&format!("branch.{name}.merge"), self.merge.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> GitConfig {
        GitConfig::new(GitView::bare("/nonexistent/test.git"))
    }

    fn origin() -> Remote {
        Remote {
            name: "origin".to_string(),
            url: Some("git://example.com/platform/build.git".to_string()),
            review: Some("review.example.com".to_string()),
            fetch: vec![RefSpec::new(true, "refs/heads/*", "refs/remotes/origin/*")],
            config: test_config(),
        }
    }

    #[test]
    fn test_refspec_parse_forced() {
        let spec = RefSpec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();
        assert!(spec.forced);
        assert_eq!(spec.src, "refs/heads/*");
        assert_eq!(spec.dst, "refs/remotes/origin/*");
    }

    #[test]
    fn test_refspec_parse_plain() {
        let spec = RefSpec::parse("refs/heads/master:refs/remotes/origin/master").unwrap();
        assert!(!spec.forced);
    }

    #[test]
    fn test_refspec_parse_rejects_missing_colon() {
        assert!(RefSpec::parse("refs/heads/master").is_err());
    }

    #[test]
    fn test_refspec_display_round_trip() {
        for text in [
            "+refs/heads/*:refs/remotes/origin/*",
            "refs/heads/master:refs/remotes/origin/master",
        ] {
            assert_eq!(RefSpec::parse(text).unwrap().to_string(), text);
        }
    }

    #[test]
    fn test_refspec_wildcard_matching() {
        let spec = RefSpec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();
        assert!(spec.source_matches("refs/heads/master"));
        assert!(spec.source_matches("refs/heads/feature/deep"));
        assert!(!spec.source_matches("refs/tags/v1"));
        assert!(!spec.source_matches("refs/heads"));
        assert!(spec.dest_matches("refs/remotes/origin/master"));
        assert!(!spec.dest_matches("refs/remotes/other/master"));
    }

    #[test]
    fn test_refspec_exact_matching() {
        let spec = RefSpec::parse("refs/heads/master:refs/remotes/origin/master").unwrap();
        assert!(spec.source_matches("refs/heads/master"));
        assert!(!spec.source_matches("refs/heads/master2"));
    }

    #[test]
    fn test_refspec_map_source_wildcard() {
        let spec = RefSpec::parse("+refs/heads/*:refs/remotes/origin/*").unwrap();
        assert_eq!(
            spec.map_source("refs/heads/master"),
            "refs/remotes/origin/master"
        );
        assert_eq!(
            spec.map_source("refs/heads/feature/x"),
            "refs/remotes/origin/feature/x"
        );
    }

    #[test]
    fn test_refspec_map_source_exact() {
        let spec = RefSpec::parse("refs/heads/master:refs/remotes/origin/master").unwrap();
        assert_eq!(
            spec.map_source("refs/heads/master"),
            "refs/remotes/origin/master"
        );
    }

    #[test]
    fn test_to_local_branch_name() {
        let remote = origin();
        assert_eq!(
            remote.to_local("refs/heads/master").unwrap(),
            "refs/remotes/origin/master"
        );
        // bare names are branch names
        assert_eq!(
            remote.to_local("master").unwrap(),
            "refs/remotes/origin/master"
        );
    }

    #[test]
    fn test_to_local_id_and_tag_pass_through() {
        let remote = origin();
        let id = "0123456789abcdef0123456789abcdef01234567";
        assert_eq!(remote.to_local(id).unwrap(), id);
        assert_eq!(
            remote.to_local("refs/tags/android-1.0").unwrap(),
            "refs/tags/android-1.0"
        );
    }

    #[test]
    fn test_to_local_unmapped_is_error() {
        let remote = origin();
        let err = remote.to_local("refs/changes/34/1234/1").unwrap_err();
        assert!(matches!(err, GitError::UnmappedRef { .. }));
    }

    #[test]
    fn test_writes_to() {
        let remote = origin();
        assert!(remote.writes_to("refs/remotes/origin/master"));
        assert!(!remote.writes_to("refs/heads/master"));
        assert!(!remote.writes_to("refs/published/topic"));
    }

    #[test]
    fn test_reset_fetch() {
        let mut remote = origin();
        remote.fetch.clear();
        remote.reset_fetch();
        assert_eq!(remote.fetch.len(), 1);
        assert_eq!(
            remote.fetch[0].to_string(),
            "+refs/heads/*:refs/remotes/origin/*"
        );
    }

    #[test]
    fn test_local_merge_requires_tracking() {
        let branch = Branch {
            name: "topic".to_string(),
            remote: None,
            merge: Some("refs/heads/master".to_string()),
            config: test_config(),
        };
        assert_eq!(branch.local_merge().unwrap(), None);

        let branch = Branch {
            name: "topic".to_string(),
            remote: Some(origin()),
            merge: Some("refs/heads/master".to_string()),
            config: test_config(),
        };
        assert_eq!(
            branch.local_merge().unwrap().as_deref(),
            Some("refs/remotes/origin/master")
        );
    }
}
