//! Commit history extraction using libgit2
//!
//! Walks the repository from the requested head and returns commits with
//! parents before children, ready for the planner.

use super::RepositoryHandle;
use crate::core::commit::{Commit, CommitId, Signature};
use anyhow::{Context, Result};
use git2::Sort;
use tracing::debug;

/// Which part of the history to load
#[derive(Debug, Clone, Default)]
pub struct HistoryOptions {
    /// Revision to start from; HEAD when unset
    pub head: Option<String>,
    /// Follow only the first parent of every commit
    pub first_parent: bool,
    /// Keep only the most recent N commits
    pub max_commits: Option<usize>,
}

/// Resolve a revision (HEAD when `None`) to a commit id
pub fn resolve_head(handle: &RepositoryHandle, head: Option<&str>) -> Result<CommitId> {
    let repo = handle.git()?;
    let rev = head.unwrap_or("HEAD");
    let commit = repo
        .revparse_single(rev)
        .and_then(|object| object.peel_to_commit())
        .with_context(|| format!("Failed to resolve revision {}", rev))?;
    Ok(commit.id().into())
}

/// Load the commits reachable from the head, parents first.
pub fn load_commits(handle: &RepositoryHandle, options: &HistoryOptions) -> Result<Vec<Commit>> {
    let repo = handle.git()?;
    let head = resolve_head(handle, options.head.as_deref())?;

    // Newest first, so that a limit keeps the most recent commits
    let mut revwalk = repo.revwalk()?;
    revwalk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;
    revwalk.push(git2::Oid::from_str(head.as_str())?)?;
    if options.first_parent {
        revwalk.simplify_first_parent()?;
    }

    let limit = options.max_commits.unwrap_or(usize::MAX);
    let mut commits = Vec::new();
    for oid_result in revwalk {
        if commits.len() >= limit {
            break;
        }
        let oid = oid_result?;
        let commit = repo.find_commit(oid)?;
        commits.push(to_commit(&commit));
    }
    commits.reverse();

    debug!(
        "Loaded {} commits from {} (first parent: {})",
        commits.len(),
        handle.uri(),
        options.first_parent
    );
    Ok(commits)
}

fn to_commit(commit: &git2::Commit) -> Commit {
    let author = commit.author();
    let summary = commit
        .message()
        .unwrap_or("")
        .lines()
        .next()
        .unwrap_or("")
        .to_string();
    Commit {
        id: commit.id().into(),
        parents: commit.parent_ids().map(CommitId::from).collect(),
        author: Signature::new(
            author.name().unwrap_or("Unknown"),
            author.email().unwrap_or(""),
        ),
        time: commit.time().seconds(),
        summary,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use git2::{Oid, Repository};
    use std::path::Path;
    use tempfile::tempdir;

    /// Write `files`, stage them and commit with the given parents
    pub(crate) fn commit_files(
        repo: &Repository,
        files: &[(&str, &str)],
        author: (&str, &str),
        time: i64,
        message: &str,
        parents: &[Oid],
    ) -> Result<Oid> {
        let workdir = repo.workdir().context("bare repository")?;
        let mut index = repo.index()?;
        if let Some(first) = parents.first() {
            // Start from the first parent's tree so that branches do not leak
            index.read_tree(&repo.find_commit(*first)?.tree()?)?;
        } else {
            index.clear()?;
        }
        for (path, content) in files {
            let full = workdir.join(path);
            if let Some(dir) = full.parent() {
                std::fs::create_dir_all(dir)?;
            }
            std::fs::write(&full, content)?;
            index.add_path(Path::new(path))?;
        }
        index.write()?;
        let tree = repo.find_tree(index.write_tree()?)?;
        let sig = git2::Signature::new(author.0, author.1, &git2::Time::new(time, 0))?;
        let parent_commits = parents
            .iter()
            .map(|p| repo.find_commit(*p))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let parent_refs: Vec<&git2::Commit> = parent_commits.iter().collect();
        Ok(repo.commit(None, &sig, &sig, message, &tree, &parent_refs)?)
    }

    /// root -> left ----> merge
    ///      \-> right --/
    pub(crate) fn create_test_repo() -> Result<(tempfile::TempDir, Repository, Vec<Oid>)> {
        let dir = tempdir()?;
        let repo = Repository::init(dir.path())?;
        let alice = ("Alice", "alice@example.com");
        let bob = ("Bob", "bob@example.com");

        let root = commit_files(&repo, &[("a.txt", "one\ntwo\n")], alice, 1_000_000, "Initial commit", &[])?;
        let left = commit_files(&repo, &[("a.txt", "one\ntwo\nthree\n")], alice, 1_000_100, "Left", &[root])?;
        let right = commit_files(&repo, &[("b.txt", "bee\n")], bob, 1_086_400, "Right", &[root])?;
        let merge = commit_files(
            &repo,
            &[("b.txt", "bee\n")],
            alice,
            1_172_800,
            "Merge right",
            &[left, right],
        )?;
        repo.reference("refs/heads/main", merge, true, "test")?;
        repo.set_head("refs/heads/main")?;
        Ok((dir, repo, vec![root, left, right, merge]))
    }

    #[test]
    fn test_open_repo() -> Result<()> {
        let (dir, _repo, _) = create_test_repo()?;
        let handle = RepositoryHandle::open(dir.path())?;
        assert!(!handle.is_detached());
        assert!(RepositoryHandle::is_git_repo(dir.path()));

        let non_repo = tempdir()?;
        assert!(!RepositoryHandle::is_git_repo(non_repo.path()));
        Ok(())
    }

    #[test]
    fn test_load_commits_parents_first() -> Result<()> {
        let (dir, _repo, oids) = create_test_repo()?;
        let handle = RepositoryHandle::open(dir.path())?;
        let commits = load_commits(&handle, &HistoryOptions::default())?;

        assert_eq!(commits.len(), 4);
        assert_eq!(commits[0].id, CommitId::from(oids[0]));
        assert_eq!(commits[3].id, CommitId::from(oids[3]));
        assert!(commits[3].is_merge());
        assert_eq!(commits[3].summary, "Merge right");
        assert_eq!(commits[0].author.email, "alice@example.com");
        Ok(())
    }

    #[test]
    fn test_first_parent_and_limit() -> Result<()> {
        let (dir, _repo, oids) = create_test_repo()?;
        let handle = RepositoryHandle::open(dir.path())?;

        let linear = load_commits(
            &handle,
            &HistoryOptions {
                first_parent: true,
                ..Default::default()
            },
        )?;
        let ids: Vec<CommitId> = linear.iter().map(|c| c.id.clone()).collect();
        let expected: Vec<CommitId> = [oids[0], oids[1], oids[3]]
            .into_iter()
            .map(CommitId::from)
            .collect();
        assert_eq!(ids, expected);

        let recent = load_commits(
            &handle,
            &HistoryOptions {
                max_commits: Some(2),
                ..Default::default()
            },
        )?;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].id, CommitId::from(oids[3]));
        Ok(())
    }

    #[test]
    fn test_detached_handle_has_no_git() {
        let handle = RepositoryHandle::detached("synthetic");
        assert!(handle.git().is_err());
        assert!(load_commits(&handle, &HistoryOptions::default()).is_err());
    }
}
