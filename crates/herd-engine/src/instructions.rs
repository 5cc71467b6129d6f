// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Custodian of the filesystem-visible CLI instruction files.
//!
//! Backend CLIs read a user-level and a project-level instruction file at
//! startup.  For a launch with custom instructions the handler backs both
//! files up, blanks the user-level file (so it cannot override the
//! injected instructions) and writes the instructions to the project file.
//! Restore runs on every exit path of the launch — the CLI reads the files
//! once at startup and caches them.
//!
//! The handler holds no lock: the launch queue guarantees no overlapping
//! acquisition.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info};

use herd_model::{Error, Result};

/// Captured file state, returned by [`InstructionHandler::prepare_environment`].
#[derive(Debug, Clone)]
pub struct InstructionBackup {
    /// `None` when the file did not exist before the launch.
    pub user_content: Option<String>,
    pub project_content: Option<String>,
    pub user_path: PathBuf,
    pub project_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

pub struct InstructionHandler {
    user_path: PathBuf,
    project_path: PathBuf,
}

impl InstructionHandler {
    pub fn new(user_path: impl Into<PathBuf>, project_path: impl Into<PathBuf>) -> Self {
        Self {
            user_path: user_path.into(),
            project_path: project_path.into(),
        }
    }

    /// The claude CLI's instruction files: `~/.claude/CLAUDE.md` and
    /// `<working dir>/CLAUDE.md`.
    pub fn for_claude(working_dir: &Path) -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(
            home.join(".claude").join("CLAUDE.md"),
            working_dir.join("CLAUDE.md"),
        )
    }

    /// Back up and substitute the instruction files.
    /// Empty or absent instructions perform no I/O and return `None`.
    pub async fn prepare_environment(
        &self,
        instructions: Option<&str>,
    ) -> Result<Option<InstructionBackup>> {
        let instructions = match instructions {
            Some(text) if !text.is_empty() => text,
            _ => return Ok(None),
        };

        let user_content = read_if_present(&self.user_path).await?;
        let project_content = read_if_present(&self.project_path).await?;
        let backup = InstructionBackup {
            user_content,
            project_content,
            user_path: self.user_path.clone(),
            project_path: self.project_path.clone(),
            timestamp: Utc::now(),
        };

        // The user-level file is blanked, not deleted: the CLI treats a
        // missing file and an empty file the same, and writing keeps the
        // restore path symmetric.
        write_creating_parents(&self.user_path, "").await?;
        write_creating_parents(&self.project_path, instructions).await?;
        info!(
            project = %self.project_path.display(),
            bytes = instructions.len(),
            "instruction files substituted"
        );
        Ok(Some(backup))
    }

    /// Put every captured file back.  Idempotent on `None`; files that did
    /// not exist before the launch are removed again.
    pub async fn restore_environment(&self, backup: Option<InstructionBackup>) -> Result<()> {
        let Some(backup) = backup else {
            return Ok(());
        };
        restore_one(&backup.user_path, backup.user_content.as_deref()).await?;
        restore_one(&backup.project_path, backup.project_content.as_deref()).await?;
        debug!("instruction files restored");
        Ok(())
    }
}

async fn read_if_present(path: &Path) -> Result<Option<String>> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::io(path, e)),
    }
}

async fn write_creating_parents(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .await
            .map_err(|e| Error::io(parent, e))?;
    }
    fs::write(path, content).await.map_err(|e| Error::io(path, e))
}

async fn restore_one(path: &Path, content: Option<&str>) -> Result<()> {
    match content {
        Some(content) => write_creating_parents(path, content).await,
        None => match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io(path, e)),
        },
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(dir: &Path) -> InstructionHandler {
        InstructionHandler::new(dir.join("user/CLAUDE.md"), dir.join("project/CLAUDE.md"))
    }

    #[tokio::test]
    async fn empty_instructions_do_no_io() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        assert!(h.prepare_environment(None).await.unwrap().is_none());
        assert!(h.prepare_environment(Some("")).await.unwrap().is_none());
        assert!(!dir.path().join("user").exists());
    }

    #[tokio::test]
    async fn substitution_blanks_user_and_writes_project() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        std::fs::create_dir_all(dir.path().join("user")).unwrap();
        std::fs::write(dir.path().join("user/CLAUDE.md"), "user rules").unwrap();

        let backup = h
            .prepare_environment(Some("be brief"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(backup.user_content.as_deref(), Some("user rules"));
        assert!(backup.project_content.is_none());

        let user = std::fs::read_to_string(dir.path().join("user/CLAUDE.md")).unwrap();
        let project = std::fs::read_to_string(dir.path().join("project/CLAUDE.md")).unwrap();
        assert_eq!(user, "");
        assert_eq!(project, "be brief");
    }

    #[tokio::test]
    async fn restore_puts_original_content_back() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        std::fs::create_dir_all(dir.path().join("project")).unwrap();
        std::fs::write(dir.path().join("project/CLAUDE.md"), "project rules").unwrap();

        let backup = h.prepare_environment(Some("injected")).await.unwrap();
        h.restore_environment(backup).await.unwrap();

        let project = std::fs::read_to_string(dir.path().join("project/CLAUDE.md")).unwrap();
        assert_eq!(project, "project rules");
        // The user file did not exist before, so it is gone again.
        assert!(!dir.path().join("user/CLAUDE.md").exists());
    }

    #[tokio::test]
    async fn restore_none_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        h.restore_environment(None).await.unwrap();
    }

    #[tokio::test]
    async fn parent_directories_are_created_lazily() {
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        let backup = h.prepare_environment(Some("x")).await.unwrap();
        assert!(dir.path().join("project/CLAUDE.md").exists());
        h.restore_environment(backup).await.unwrap();
    }

    #[tokio::test]
    async fn back_to_back_launches_round_trip() {
        // The serialized-launch discipline: prepare/restore pairs never
        // overlap, and each restore returns the world to its prior state.
        let dir = tempfile::tempdir().unwrap();
        let h = handler(dir.path());
        std::fs::create_dir_all(dir.path().join("project")).unwrap();
        std::fs::write(dir.path().join("project/CLAUDE.md"), "original").unwrap();

        for round in 0..3 {
            let text = format!("round {round}");
            let backup = h.prepare_environment(Some(&text)).await.unwrap();
            let during = std::fs::read_to_string(dir.path().join("project/CLAUDE.md")).unwrap();
            assert_eq!(during, text);
            h.restore_environment(backup).await.unwrap();
        }
        let after = std::fs::read_to_string(dir.path().join("project/CLAUDE.md")).unwrap();
        assert_eq!(after, "original");
    }
}
