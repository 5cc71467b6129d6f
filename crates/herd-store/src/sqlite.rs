// Copyright (c) 2024-2026 The herd project developers
//
// SPDX-License-Identifier: Apache-2.0
//!
//! SQLite persistence.
//!
//! One connection guarded by a tokio mutex.  The journal mode is `DELETE`
//! with `synchronous=FULL`: every committed INSERT is durable on its own,
//! with no checkpoint step that could be skipped by a non-graceful exit.
//!
//! Sequence allocation happens inside the INSERT itself via a
//! `COALESCE(MAX(sequence_number), 0) + 1` subselect, so the dense-sequence
//! invariant holds under any interleaving.  A UNIQUE collision (another
//! writer on the same database file) is retried a bounded number of times;
//! a foreign-key failure maps to [`Error::AgentMissing`] by extended result
//! code, not by message sniffing.

use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use async_trait::async_trait;
use herd_model::message::{content_from_text, metadata_from_text};
use herd_model::{
    Agent, AgentConfig, AgentError, AgentId, AgentMessage, AgentStatus, AgentType, Error,
    MessageType, NewMessage, Result,
};

use crate::{AgentRepository, MessageStore};

/// Retry budget for UNIQUE collisions on `(agent_id, sequence_number)`.
const APPEND_RETRIES: usize = 5;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS agents (
    id            TEXT PRIMARY KEY,
    type          TEXT NOT NULL,
    status        TEXT NOT NULL,
    prompt        TEXT NOT NULL,
    configuration TEXT NOT NULL,
    created_at    TEXT NOT NULL,
    started_at    TEXT,
    completed_at  TEXT,
    error_message TEXT,
    error_name    TEXT
);

CREATE TABLE IF NOT EXISTS agent_messages (
    id              TEXT PRIMARY KEY,
    agent_id        TEXT NOT NULL REFERENCES agents(id) ON DELETE CASCADE,
    sequence_number INTEGER NOT NULL,
    type            TEXT NOT NULL,
    role            TEXT,
    content         TEXT NOT NULL,
    raw             TEXT,
    metadata        TEXT,
    created_at      TEXT NOT NULL,
    UNIQUE (agent_id, sequence_number)
);

CREATE INDEX IF NOT EXISTS idx_messages_agent ON agent_messages(agent_id, sequence_number);
CREATE INDEX IF NOT EXISTS idx_agents_status  ON agents(status);
CREATE INDEX IF NOT EXISTS idx_agents_created ON agents(created_at DESC);
"#;

/// Durable store backed by a single SQLite database file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Storage(format!("open {}: {e}", db_path.display())))?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().map_err(|e| Error::Storage(format!("open memory: {e}")))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "DELETE")
            .map_err(storage_err)?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(storage_err)?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .map_err(storage_err)?;
        conn.execute_batch(SCHEMA).map_err(storage_err)?;
        debug!("sqlite schema ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn storage_err(e: rusqlite::Error) -> Error {
    Error::Storage(e.to_string())
}

/// Classify constraint failures by extended result code.
fn map_append_err(agent_id: AgentId, e: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(ffi_err, _) = &e {
        match ffi_err.extended_code {
            rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => {
                return Error::AgentMissing(agent_id);
            }
            rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
            | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return Error::Conflict(format!(
                    "sequence collision while appending for agent {agent_id}"
                ));
            }
            _ => {}
        }
    }
    storage_err(e)
}

fn parse_timestamp(text: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::Storage(format!("bad timestamp {text:?}: {e}")))
}

fn parse_opt_timestamp(text: Option<String>) -> Result<Option<DateTime<Utc>>> {
    text.as_deref().map(parse_timestamp).transpose()
}

fn status_from_str(s: &str) -> Result<AgentStatus> {
    match s {
        "initializing" => Ok(AgentStatus::Initializing),
        "running" => Ok(AgentStatus::Running),
        "completed" => Ok(AgentStatus::Completed),
        "failed" => Ok(AgentStatus::Failed),
        "terminated" => Ok(AgentStatus::Terminated),
        other => Err(Error::Storage(format!("unknown agent status {other:?}"))),
    }
}

/// Row → entity.  Reconstruction bypasses the transition validator: the row
/// is the truth about where the lifecycle got to.
fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawAgentRow> {
    Ok(RawAgentRow {
        id: row.get(0)?,
        agent_type: row.get(1)?,
        status: row.get(2)?,
        prompt: row.get(3)?,
        configuration: row.get(4)?,
        created_at: row.get(5)?,
        started_at: row.get(6)?,
        completed_at: row.get(7)?,
        error_message: row.get(8)?,
        error_name: row.get(9)?,
    })
}

struct RawAgentRow {
    id: String,
    agent_type: String,
    status: String,
    prompt: String,
    configuration: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    error_message: Option<String>,
    error_name: Option<String>,
}

impl RawAgentRow {
    fn into_agent(self) -> Result<Agent> {
        let config: AgentConfig = serde_json::from_str(&self.configuration)
            .map_err(|e| Error::Storage(format!("bad stored configuration: {e}")))?;
        let error = match (self.error_name, self.error_message) {
            (Some(name), Some(message)) => Some(AgentError { name, message }),
            (None, Some(message)) => Some(AgentError::new("Error", message)),
            _ => None,
        };
        Ok(Agent {
            id: AgentId::parse(&self.id)?,
            agent_type: self.agent_type.parse::<AgentType>()?,
            status: status_from_str(&self.status)?,
            prompt: self.prompt,
            config,
            created_at: parse_timestamp(&self.created_at)?,
            started_at: parse_opt_timestamp(self.started_at)?,
            completed_at: parse_opt_timestamp(self.completed_at)?,
            error,
        })
    }
}

const AGENT_COLUMNS: &str = "id, type, status, prompt, configuration, created_at, started_at, \
                             completed_at, error_message, error_name";

#[async_trait]
impl AgentRepository for SqliteStore {
    async fn save(&self, agent: &Agent) -> Result<()> {
        let configuration = serde_json::to_string(&agent.config)
            .map_err(|e| Error::Storage(format!("serialize configuration: {e}")))?;
        let conn = self.conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO agents (id, type, status, prompt, configuration, created_at,
                                started_at, completed_at, error_message, error_name)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                status        = ?3,
                prompt        = ?4,
                configuration = ?5,
                started_at    = ?7,
                completed_at  = ?8,
                error_message = ?9,
                error_name    = ?10
            "#,
            params![
                agent.id.to_string(),
                agent.agent_type.as_str(),
                agent.status.as_str(),
                agent.prompt,
                configuration,
                agent.created_at.to_rfc3339(),
                agent.started_at.map(|t| t.to_rfc3339()),
                agent.completed_at.map(|t| t.to_rfc3339()),
                agent.error.as_ref().map(|e| e.message.clone()),
                agent.error.as_ref().map(|e| e.name.clone()),
            ],
        )
        .map_err(storage_err)?;
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!("SELECT {AGENT_COLUMNS} FROM agents WHERE id = ?1"),
                [id.to_string()],
                row_to_agent,
            )
            .optional()
            .map_err(storage_err)?;
        row.map(RawAgentRow::into_agent).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Agent>> {
        self.select_agents("ORDER BY created_at DESC", &[]).await
    }

    async fn find_by_status(&self, status: AgentStatus) -> Result<Vec<Agent>> {
        self.select_agents(
            "WHERE status = ?1 ORDER BY created_at DESC",
            &[status.as_str()],
        )
        .await
    }

    async fn find_by_type(&self, agent_type: AgentType) -> Result<Vec<Agent>> {
        self.select_agents(
            "WHERE type = ?1 ORDER BY created_at DESC",
            &[agent_type.as_str()],
        )
        .await
    }

    async fn delete(&self, id: AgentId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let removed = conn
            .execute("DELETE FROM agents WHERE id = ?1", [id.to_string()])
            .map_err(storage_err)?;
        Ok(removed > 0)
    }

    async fn exists(&self, id: AgentId) -> Result<bool> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM agents WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )
            .map_err(storage_err)?;
        Ok(count > 0)
    }
}

impl SqliteStore {
    async fn select_agents(&self, suffix: &str, args: &[&str]) -> Result<Vec<Agent>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!("SELECT {AGENT_COLUMNS} FROM agents {suffix}"))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), row_to_agent)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(RawAgentRow::into_agent).collect()
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawMessageRow> {
    Ok(RawMessageRow {
        id: row.get(0)?,
        agent_id: row.get(1)?,
        sequence_number: row.get(2)?,
        message_type: row.get(3)?,
        role: row.get(4)?,
        content: row.get(5)?,
        raw: row.get(6)?,
        metadata: row.get(7)?,
        created_at: row.get(8)?,
    })
}

struct RawMessageRow {
    id: String,
    agent_id: String,
    sequence_number: i64,
    message_type: String,
    role: Option<String>,
    content: String,
    raw: Option<String>,
    metadata: Option<String>,
    created_at: String,
}

impl RawMessageRow {
    fn into_message(self) -> Result<AgentMessage> {
        let message_type = MessageType::parse(&self.message_type)
            .ok_or_else(|| Error::Storage(format!("unknown message type {:?}", self.message_type)))?;
        Ok(AgentMessage {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| Error::Storage(format!("bad message id: {e}")))?,
            agent_id: AgentId::parse(&self.agent_id)?,
            sequence_number: self.sequence_number as u64,
            message_type,
            role: self.role,
            content: content_from_text(&self.content),
            raw: self.raw.as_deref().map(content_from_text),
            metadata: metadata_from_text(self.metadata.as_deref()),
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

const MESSAGE_COLUMNS: &str =
    "id, agent_id, sequence_number, type, role, content, raw, metadata, created_at";

#[async_trait]
impl MessageStore for SqliteStore {
    async fn append(&self, message: NewMessage) -> Result<AgentMessage> {
        let agent_id = message.agent_id;
        let content = message.content_text();
        let raw = message.raw.as_ref().map(|v| v.to_string());
        let metadata = message.metadata.as_ref().map(|v| v.to_string());
        let conn = self.conn.lock().await;

        for attempt in 0..APPEND_RETRIES {
            let id = Uuid::new_v4();
            let created_at = Utc::now();
            let inserted = conn.execute(
                r#"
                INSERT INTO agent_messages
                    (id, agent_id, sequence_number, type, role, content, raw, metadata, created_at)
                VALUES
                    (?1, ?2,
                     (SELECT COALESCE(MAX(sequence_number), 0) + 1
                        FROM agent_messages WHERE agent_id = ?2),
                     ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    id.to_string(),
                    agent_id.to_string(),
                    message.message_type.as_str(),
                    message.role,
                    content,
                    raw,
                    metadata,
                    created_at.to_rfc3339(),
                ],
            );
            match inserted {
                Ok(_) => {
                    let row = conn
                        .query_row(
                            &format!(
                                "SELECT {MESSAGE_COLUMNS} FROM agent_messages WHERE id = ?1"
                            ),
                            [id.to_string()],
                            row_to_message,
                        )
                        .map_err(storage_err)?;
                    return row.into_message();
                }
                Err(e) => {
                    let mapped = map_append_err(agent_id, e);
                    match mapped {
                        Error::Conflict(_) if attempt + 1 < APPEND_RETRIES => {
                            debug!(agent = %agent_id, attempt, "sequence collision, retrying");
                            continue;
                        }
                        other => return Err(other),
                    }
                }
            }
        }
        Err(Error::Conflict(format!(
            "could not allocate a sequence number for agent {agent_id} after {APPEND_RETRIES} attempts"
        )))
    }

    async fn list_by_agent(&self, agent_id: AgentId) -> Result<Vec<AgentMessage>> {
        self.select_messages(
            "WHERE agent_id = ?1 ORDER BY sequence_number ASC",
            vec![rusqlite::types::Value::from(agent_id.to_string())],
        )
        .await
    }

    async fn list_since(&self, agent_id: AgentId, since: u64) -> Result<Vec<AgentMessage>> {
        self.select_messages(
            "WHERE agent_id = ?1 AND sequence_number > ?2 ORDER BY sequence_number ASC",
            vec![
                rusqlite::types::Value::from(agent_id.to_string()),
                rusqlite::types::Value::from(since as i64),
            ],
        )
        .await
    }
}

impl SqliteStore {
    async fn select_messages(
        &self,
        suffix: &str,
        args: Vec<rusqlite::types::Value>,
    ) -> Result<Vec<AgentMessage>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM agent_messages {suffix}"
            ))
            .map_err(storage_err)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(args), row_to_message)
            .map_err(storage_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err)?;
        rows.into_iter().map(RawMessageRow::into_message).collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use herd_model::AgentConfig;
    use serde_json::json;
    use std::sync::Arc;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    async fn saved_agent(store: &SqliteStore) -> Agent {
        let agent = Agent::new(
            AgentId::new(),
            AgentType::Synthetic,
            "prompt".into(),
            AgentConfig::default(),
        );
        store.save(&agent).await.unwrap();
        agent
    }

    // ── Agent repository ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn save_and_find_round_trip() {
        let store = store();
        let agent = saved_agent(&store).await;
        let found = store.find_by_id(agent.id).await.unwrap().unwrap();
        assert_eq!(found.id, agent.id);
        assert_eq!(found.status, AgentStatus::Initializing);
        assert_eq!(found.prompt, "prompt");
    }

    #[tokio::test]
    async fn save_is_an_upsert_not_a_reinsert() {
        let store = store();
        let mut agent = saved_agent(&store).await;
        store
            .append(NewMessage::text(agent.id, MessageType::Assistant, "m1"))
            .await
            .unwrap();

        agent.mark_running().unwrap();
        store.save(&agent).await.unwrap();

        // The message child survived the update.
        let messages = store.list_by_agent(agent.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        let found = store.find_by_id(agent.id).await.unwrap().unwrap();
        assert_eq!(found.status, AgentStatus::Running);
        assert!(found.started_at.is_some());
    }

    #[tokio::test]
    async fn failed_agent_error_is_reconstructed() {
        let store = store();
        let mut agent = saved_agent(&store).await;
        agent.mark_running().unwrap();
        agent
            .mark_failed(AgentError::new("BackendError", "exit 2"))
            .unwrap();
        store.save(&agent).await.unwrap();

        let found = store.find_by_id(agent.id).await.unwrap().unwrap();
        assert_eq!(found.status, AgentStatus::Failed);
        let err = found.error.unwrap();
        assert_eq!(err.name, "BackendError");
        assert_eq!(err.message, "exit 2");
    }

    #[tokio::test]
    async fn find_all_is_newest_first() {
        let store = store();
        let first = saved_agent(&store).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = saved_agent(&store).await;

        let all = store.find_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, second.id);
        assert_eq!(all[1].id, first.id);
    }

    #[tokio::test]
    async fn find_by_status_filters() {
        let store = store();
        let mut running = saved_agent(&store).await;
        running.mark_running().unwrap();
        store.save(&running).await.unwrap();
        let _idle = saved_agent(&store).await;

        let found = store.find_by_status(AgentStatus::Running).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, running.id);
    }

    #[tokio::test]
    async fn delete_cascades_to_messages() {
        let store = store();
        let agent = saved_agent(&store).await;
        store
            .append(NewMessage::text(agent.id, MessageType::Assistant, "m"))
            .await
            .unwrap();

        assert!(store.delete(agent.id).await.unwrap());
        assert!(!store.exists(agent.id).await.unwrap());
        assert!(store.list_by_agent(agent.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn delete_missing_returns_false() {
        let store = store();
        assert!(!store.delete(AgentId::new()).await.unwrap());
    }

    // ── Message store ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn sequences_are_dense_from_one() {
        let store = store();
        let agent = saved_agent(&store).await;
        for i in 0..5 {
            let m = store
                .append(NewMessage::text(
                    agent.id,
                    MessageType::Assistant,
                    format!("m{i}"),
                ))
                .await
                .unwrap();
            assert_eq!(m.sequence_number, i + 1);
        }
        let seqs: Vec<u64> = store
            .list_by_agent(agent.id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.sequence_number)
            .collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn sequences_are_per_agent() {
        let store = store();
        let a = saved_agent(&store).await;
        let b = saved_agent(&store).await;
        store
            .append(NewMessage::text(a.id, MessageType::Assistant, "a1"))
            .await
            .unwrap();
        let first_for_b = store
            .append(NewMessage::text(b.id, MessageType::Assistant, "b1"))
            .await
            .unwrap();
        assert_eq!(first_for_b.sequence_number, 1);
    }

    #[tokio::test]
    async fn append_against_missing_agent_is_fk_violation() {
        let store = store();
        let err = store
            .append(NewMessage::text(AgentId::new(), MessageType::Assistant, "x"))
            .await
            .unwrap_err();
        assert!(err.is_agent_missing(), "got {err:?}");
    }

    #[tokio::test]
    async fn fk_violation_inserts_no_row() {
        let store = store();
        let ghost = AgentId::new();
        let _ = store
            .append(NewMessage::text(ghost, MessageType::Assistant, "x"))
            .await;
        assert!(store.list_by_agent(ghost).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_since_returns_strictly_later_sequences() {
        let store = store();
        let agent = saved_agent(&store).await;
        for i in 1..=10 {
            store
                .append(NewMessage::text(
                    agent.id,
                    MessageType::Assistant,
                    format!("m{i}"),
                ))
                .await
                .unwrap();
        }
        let tail = store.list_since(agent.id, 4).await.unwrap();
        let seqs: Vec<u64> = tail.iter().map(|m| m.sequence_number).collect();
        assert_eq!(seqs, vec![5, 6, 7, 8, 9, 10]);
    }

    #[tokio::test]
    async fn structured_content_round_trips() {
        let store = store();
        let agent = saved_agent(&store).await;
        let message = NewMessage {
            content: json!({"text": "hello", "blocks": [1, 2]}),
            metadata: Some(json!({"model": "claude-sonnet-4-5"})),
            raw: Some(json!({"type": "assistant"})),
            ..NewMessage::text(agent.id, MessageType::Assistant, "")
        };
        let saved = store.append(message).await.unwrap();
        assert_eq!(saved.content["text"], "hello");
        assert_eq!(saved.metadata.as_ref().unwrap()["model"], "claude-sonnet-4-5");
        assert_eq!(saved.raw.as_ref().unwrap()["type"], "assistant");

        let read_back = &store.list_by_agent(agent.id).await.unwrap()[0];
        assert_eq!(read_back.content["blocks"][1], 2);
    }

    #[tokio::test]
    async fn plain_text_content_stays_a_string() {
        let store = store();
        let agent = saved_agent(&store).await;
        let saved = store
            .append(NewMessage::text(agent.id, MessageType::System, "booting"))
            .await
            .unwrap();
        assert_eq!(saved.content, serde_json::Value::String("booting".into()));
    }

    #[tokio::test]
    async fn concurrent_appends_stay_dense() {
        let store = Arc::new(store());
        let agent = saved_agent(&store).await;

        let mut handles = Vec::new();
        for task in 0..4 {
            let store = store.clone();
            let agent_id = agent.id;
            handles.push(tokio::spawn(async move {
                for i in 0..5 {
                    store
                        .append(NewMessage::text(
                            agent_id,
                            MessageType::Assistant,
                            format!("t{task}-m{i}"),
                        ))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // Whatever the interleaving, sequences are exactly 1..=20.
        let seqs: Vec<u64> = store
            .list_by_agent(agent.id)
            .await
            .unwrap()
            .iter()
            .map(|m| m.sequence_number)
            .collect();
        assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn survives_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("herd.db");
        let agent = {
            let store = SqliteStore::open(&path).unwrap();
            let agent = saved_agent(&store).await;
            store
                .append(NewMessage::text(agent.id, MessageType::Assistant, "kept"))
                .await
                .unwrap();
            agent
        };
        let store = SqliteStore::open(&path).unwrap();
        let messages = store.list_by_agent(agent.id).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, serde_json::Value::String("kept".into()));
    }
}
