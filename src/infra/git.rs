//! Bare tap repository
//!
//! The Homebrew tap is a bare git repository served over dumb HTTP. Trees
//! and commits are written directly with gix; there is no worktree and no
//! `git` binary involved.

use gix::bstr::ByteSlice;
use gix::objs::tree::{Entry, EntryKind};
use gix::ObjectId;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Repository could not be created or opened
    #[error("Invalid repository at '{path}': {error}")]
    InvalidRepository { path: PathBuf, error: String },

    /// Object could not be read or written
    #[error("Object error in '{path}': {error}")]
    Object { path: PathBuf, error: String },

    /// Commit or ref update failed
    #[error("Failed to commit in '{path}': {error}")]
    CommitFailed { path: PathBuf, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },
}

/// A file to place in the tap tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeFile {
    /// File name inside the directory
    pub name: String,
    /// File contents
    pub content: Vec<u8>,
}

/// Bare repository holding the tap
pub struct TapRepository {
    repo: gix::Repository,
    path: PathBuf,
}

impl std::fmt::Debug for TapRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapRepository")
            .field("path", &self.path)
            .finish()
    }
}

impl TapRepository {
    /// Open the bare repository at `path`, creating it if needed
    pub fn open_or_init(path: &Path) -> Result<Self, GitError> {
        let invalid = |e: String| GitError::InvalidRepository {
            path: path.to_path_buf(),
            error: e,
        };
        let repo = if path.join("HEAD").exists() {
            gix::open(path).map_err(|e| invalid(e.to_string()))?
        } else {
            tracing::info!("Initializing tap repository at {}", path.display());
            gix::init_bare(path).map_err(|e| invalid(e.to_string()))?
        };
        Ok(Self {
            repo,
            path: path.to_path_buf(),
        })
    }

    fn object_error(&self, e: impl std::fmt::Display) -> GitError {
        GitError::Object {
            path: self.path.clone(),
            error: e.to_string(),
        }
    }

    /// Tree of the current HEAD commit, `None` while HEAD is unborn
    pub fn head_tree(&self) -> Result<Option<ObjectId>, GitError> {
        let Ok(commit) = self.repo.head_commit() else {
            return Ok(None);
        };
        let tree = commit.tree_id().map_err(|e| self.object_error(e))?;
        Ok(Some(tree.detach()))
    }

    /// Number of commits reachable from HEAD through first parents
    pub fn history_len(&self) -> Result<usize, GitError> {
        let Ok(mut commit) = self.repo.head_commit() else {
            return Ok(0);
        };
        let mut count = 1;
        loop {
            let parent = commit.parent_ids().next().map(|id| id.detach());
            let Some(parent) = parent else {
                break;
            };
            commit = self
                .repo
                .find_object(parent)
                .map_err(|e| self.object_error(e))?
                .try_into_commit()
                .map_err(|e| self.object_error(e))?;
            count += 1;
        }
        Ok(count)
    }

    /// Entries of a tree object as `(name, id)` pairs
    pub fn tree_entries(&self, tree: ObjectId) -> Result<Vec<(String, ObjectId)>, GitError> {
        let object = self
            .repo
            .find_object(tree)
            .map_err(|e| self.object_error(e))?
            .try_into_tree()
            .map_err(|e| self.object_error(e))?;
        let decoded = object.decode().map_err(|e| self.object_error(e))?;
        Ok(decoded
            .entries
            .iter()
            .map(|e| (e.filename.to_str_lossy().into_owned(), e.oid.to_owned()))
            .collect())
    }

    /// Contents of `dir/name` in the HEAD tree
    pub fn read_head_file(&self, dir: &str, name: &str) -> Result<Option<Vec<u8>>, GitError> {
        let Some(root) = self.head_tree()? else {
            return Ok(None);
        };
        let Some((_, sub)) = self.tree_entries(root)?.into_iter().find(|(n, _)| n == dir) else {
            return Ok(None);
        };
        let Some((_, blob)) = self.tree_entries(sub)?.into_iter().find(|(n, _)| n == name) else {
            return Ok(None);
        };
        let object = self.repo.find_object(blob).map_err(|e| self.object_error(e))?;
        Ok(Some(object.data.clone()))
    }

    /// Write a root tree holding exactly `files` under `dir`
    fn write_tree(&self, dir: &str, files: &[TreeFile]) -> Result<ObjectId, GitError> {
        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let oid = self
                .repo
                .write_blob(&file.content)
                .map_err(|e| self.object_error(e))?
                .detach();
            entries.push(Entry {
                mode: EntryKind::Blob.into(),
                filename: file.name.as_str().into(),
                oid,
            });
        }
        entries.sort_by(|a, b| a.filename.cmp(&b.filename));

        let sub = self
            .repo
            .write_object(&gix::objs::Tree { entries })
            .map_err(|e| self.object_error(e))?
            .detach();

        let root = gix::objs::Tree {
            entries: vec![Entry {
                mode: EntryKind::Tree.into(),
                filename: dir.into(),
                oid: sub,
            }],
        };
        Ok(self
            .repo
            .write_object(&root)
            .map_err(|e| self.object_error(e))?
            .detach())
    }

    /// Commit `files` as the full contents of `dir`
    ///
    /// Returns the new commit id, or `None` when the tree is unchanged and
    /// nothing was committed.
    pub fn commit_files(
        &self,
        dir: &str,
        files: &[TreeFile],
        message: &str,
    ) -> Result<Option<ObjectId>, GitError> {
        let tree = self.write_tree(dir, files)?;
        let previous = self.head_tree()?;
        if previous == Some(tree) {
            tracing::debug!("Tap tree unchanged, nothing to commit");
            return Ok(None);
        }

        let parents: Vec<ObjectId> = self
            .repo
            .head_commit()
            .ok()
            .map(|c| c.id)
            .into_iter()
            .collect();

        let signature = gix::actor::Signature {
            name: "reposmith".into(),
            email: "reposmith@localhost".into(),
            time: gix::date::Time::now_local_or_utc(),
        };
        let id = self
            .repo
            .commit_as(
                signature.to_ref(),
                signature.to_ref(),
                "HEAD",
                message,
                tree,
                parents,
            )
            .map_err(|e| GitError::CommitFailed {
                path: self.path.clone(),
                error: e.to_string(),
            })?
            .detach();

        tracing::info!("Committed {} to tap", id);
        Ok(Some(id))
    }

    /// Refresh `info/refs` and `objects/info/packs` for dumb HTTP clients
    pub fn update_server_info(&self) -> Result<(), GitError> {
        let mut refs = String::new();
        if let (Ok(commit), Ok(Some(name))) = (self.repo.head_commit(), self.repo.head_name()) {
            refs.push_str(&format!("{}\t{}\n", commit.id, name.as_bstr()));
        }

        let write = |rel: &str, content: &str| {
            let target = self.path.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(|e| GitError::IoError {
                    path: parent.to_path_buf(),
                    error: e.to_string(),
                })?;
            }
            std::fs::write(&target, content).map_err(|e| GitError::IoError {
                path: target,
                error: e.to_string(),
            })
        };
        write("info/refs", &refs)?;
        write("objects/info/packs", "")
    }
}
