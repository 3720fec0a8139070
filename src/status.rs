use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use crate::diff::DiffEntry;
use crate::project::Project;
use crate::refs::HEAD;

/// How a path shows up in the status listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusClass {
    /// Staged only; nothing further in the worktree.
    Added,
    /// Modified in the worktree (possibly on top of a staged change).
    Changed,
    /// Known to neither the index nor HEAD.
    Untracked,
}

/// One line of a worktree status report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEntry {
    pub path: String,
    /// Uppercase index status, `-` when the index has no entry.
    pub index_status: char,
    /// Lowercase worktree status, `-` when the worktree matches the index.
    pub worktree_status: char,
    pub src_path: Option<String>,
    pub level: Option<String>,
    pub class: StatusClass,
}

impl StatusEntry {
    /// Plain one-line rendering; renames and copies show
    /// `src => dest (NN%)`.
    pub fn render(&self) -> String {
        match &self.src_path {
            Some(src) => format!(
                " {}{}\t{} => {} ({}%)",
                self.index_status,
                self.worktree_status,
                src,
                self.path,
                self.level.as_deref().unwrap_or(""),
            ),
            None => format!(
                " {}{}\t{}",
                self.index_status, self.worktree_status, self.path
            ),
        }
    }
}

/// Status of one project's worktree.
#[derive(Debug, Clone, Serialize)]
pub enum WorkTreeState {
    /// The worktree directory does not exist yet.
    Missing,
    /// Index, worktree, and untracked sets are all empty.
    Clean,
    /// Something to report.
    Dirty(WorkTreeStatus),
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkTreeStatus {
    /// Current branch, `None` on a detached HEAD.
    pub branch: Option<String>,
    /// Sorted by path.
    pub entries: Vec<StatusEntry>,
}

pub(crate) fn classify(in_index: bool, in_worktree: bool) -> StatusClass {
    match (in_index, in_worktree) {
        (true, false) => StatusClass::Added,
        (false, false) => StatusClass::Untracked,
        _ => StatusClass::Changed,
    }
}

/// Merge the three views (staged, unstaged, untracked) into sorted
/// status lines.
pub(crate) fn build_entries(
    di: &BTreeMap<String, DiffEntry>,
    df: &BTreeMap<String, DiffEntry>,
    others: &[String],
) -> Vec<StatusEntry> {
    let mut paths: BTreeSet<&str> = BTreeSet::new();
    paths.extend(di.keys().map(String::as_str));
    paths.extend(df.keys().map(String::as_str));
    paths.extend(others.iter().map(String::as_str));

    paths
        .into_iter()
        .map(|path| {
            let i = di.get(path);
            let f = df.get(path);
            StatusEntry {
                path: path.to_string(),
                index_status: i.map(|e| e.status.to_ascii_uppercase()).unwrap_or('-'),
                worktree_status: f.map(|e| e.status.to_ascii_lowercase()).unwrap_or('-'),
                src_path: i.and_then(|e| e.src_path.clone()),
                level: i.and_then(|e| e.level.clone()),
                class: classify(i.is_some(), f.is_some()),
            }
        })
        .collect()
}

impl Project {
    /// Classify the worktree: missing, clean, or a sorted list of status
    /// lines.
    pub fn work_tree_status(&self) -> Result<WorkTreeState> {
        if !self.worktree.is_dir() {
            return Ok(WorkTreeState::Missing);
        }

        self.work_git.git(
            "update-index",
            &["-q", "--unmerged", "--ignore-missing", "--refresh"],
        )?;
        let di = self.work_git.diff_z("diff-index", &["-M", "--cached", HEAD])?;
        let df = self.work_git.diff_z("diff-files", &[])?;
        let others = self.work_git.ls_others()?;

        if di.is_empty() && df.is_empty() && others.is_empty() {
            return Ok(WorkTreeState::Clean);
        }

        Ok(WorkTreeState::Dirty(WorkTreeStatus {
            branch: self.current_branch(),
            entries: build_entries(&di, &df, &others),
        }))
    }

    /// Write a human-readable status report. Clean projects emit nothing.
    pub fn print_work_tree_status(&self, out: &mut impl Write) -> Result<()> {
        match self.work_tree_status()? {
            WorkTreeState::Clean => {}
            WorkTreeState::Missing => {
                writeln!(out)?;
                writeln!(out, "project {}/", self.relpath)?;
                writeln!(out, "  missing (run a sync first)")?;
            }
            WorkTreeState::Dirty(status) => {
                write!(out, "project {:<40}", format!("{}/", self.relpath))?;
                match &status.branch {
                    Some(branch) => writeln!(out, "branch {branch}")?,
                    None => writeln!(out, "(*** NO BRANCH ***)")?,
                }
                for entry in &status.entries {
                    writeln!(out, "{}", entry.render())?;
                }
            }
        }
        Ok(())
    }

    /// The worktree's diff against HEAD, or `None` when there is none.
    pub fn work_tree_diff(&self) -> Result<Option<String>> {
        let output = self.work_git.run(&["diff", HEAD, "--"])?;
        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        if text.is_empty() {
            Ok(None)
        } else {
            Ok(Some(text))
        }
    }

    /// Write the worktree diff with a project header, as one report.
    pub fn print_work_tree_diff(&self, out: &mut impl Write) -> Result<()> {
        if let Some(diff) = self.work_tree_diff()? {
            writeln!(out)?;
            writeln!(out, "project {}/", self.relpath)?;
            writeln!(out)?;
            out.write_all(diff.as_bytes())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(path: &str, status: char) -> DiffEntry {
        DiffEntry {
            path: path.to_string(),
            src_path: None,
            old_mode: "100644".to_string(),
            new_mode: "100644".to_string(),
            old_id: "a".repeat(40),
            new_id: "b".repeat(40),
            status,
            level: None,
        }
    }

    #[test]
    fn test_classify_table() {
        assert_eq!(classify(true, false), StatusClass::Added);
        assert_eq!(classify(true, true), StatusClass::Changed);
        assert_eq!(classify(false, true), StatusClass::Changed);
        assert_eq!(classify(false, false), StatusClass::Untracked);
    }

    #[test]
    fn test_build_entries_classification_and_order() {
        // a.c staged-modified, b.c unstaged-modified, c.c untracked
        let mut di = BTreeMap::new();
        di.insert("a.c".to_string(), entry("a.c", 'M'));
        let mut df = BTreeMap::new();
        df.insert("b.c".to_string(), entry("b.c", 'M'));
        let others = vec!["c.c".to_string()];

        let entries = build_entries(&di, &df, &others);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].path, "a.c");
        assert_eq!(entries[0].index_status, 'M');
        assert_eq!(entries[0].worktree_status, '-');
        assert_eq!(entries[0].class, StatusClass::Added);

        assert_eq!(entries[1].path, "b.c");
        assert_eq!(entries[1].index_status, '-');
        assert_eq!(entries[1].worktree_status, 'm');
        assert_eq!(entries[1].class, StatusClass::Changed);

        assert_eq!(entries[2].path, "c.c");
        assert_eq!(entries[2].index_status, '-');
        assert_eq!(entries[2].worktree_status, '-');
        assert_eq!(entries[2].class, StatusClass::Untracked);
    }

    #[test]
    fn test_build_entries_staged_and_unstaged_is_changed() {
        let mut di = BTreeMap::new();
        di.insert("a.c".to_string(), entry("a.c", 'M'));
        let mut df = BTreeMap::new();
        df.insert("a.c".to_string(), entry("a.c", 'M'));

        let entries = build_entries(&di, &df, &[]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].index_status, 'M');
        assert_eq!(entries[0].worktree_status, 'm');
        assert_eq!(entries[0].class, StatusClass::Changed);
    }

    #[test]
    fn test_render_rename_entry() {
        let mut renamed = entry("new.c", 'R');
        renamed.src_path = Some("old.c".to_string());
        renamed.level = Some("86".to_string());
        let mut di = BTreeMap::new();
        di.insert("new.c".to_string(), renamed);

        let entries = build_entries(&di, &BTreeMap::new(), &[]);
        assert_eq!(entries[0].render(), " R-\told.c => new.c (86%)");
    }

    #[test]
    fn test_render_plain_entry() {
        let mut di = BTreeMap::new();
        di.insert("a.c".to_string(), entry("a.c", 'A'));
        let entries = build_entries(&di, &BTreeMap::new(), &[]);
        assert_eq!(entries[0].render(), " A-\ta.c");
    }
}
