use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::MemoryError;
use crate::message::{validate_roles, Message};

const SESSION_FILE: &str = "session.yaml";

/// Cumulative usage counters, persisted with the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub compression_count: u32,
    pub compression_savings: u64,
    pub compression_cost: u64,
    pub total_cost: f64,
}

impl UsageStats {
    /// Tokens removed by compression, net of what the summaries cost.
    pub fn net_savings(&self) -> i64 {
        self.compression_savings as i64 - self.compression_cost as i64
    }
}

/// Everything a coordinator needs to resume a session.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: Uuid,
    pub system_messages: Vec<Message>,
    pub messages: Vec<Message>,
    pub stats: UsageStats,
}

/// Listing entry for session browsing.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub message_count: usize,
    pub summary_count: u32,
}

/// The on-disk document. Field order is the on-disk order.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionDocument {
    session_id: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(default)]
    stats: UsageStats,
    #[serde(default)]
    system_messages: Vec<Message>,
    #[serde(default)]
    messages: Vec<Message>,
}

/// Keyed directory store: one directory per session UUID, one YAML document
/// inside. Writes go through a temp file and rename so a crash mid-write
/// never corrupts the previous state.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_file(&self, session_id: Uuid) -> PathBuf {
        self.root.join(session_id.to_string()).join(SESSION_FILE)
    }

    /// Create a new session directory with an empty document. Called lazily
    /// by the coordinator — an unused coordinator never touches disk.
    pub async fn create_session(&self) -> Result<Uuid, MemoryError> {
        let session_id = Uuid::new_v4();
        let dir = self.root.join(session_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MemoryError::Persistence(e.to_string()))?;

        let now = Utc::now();
        let doc = SessionDocument {
            session_id,
            created_at: now,
            updated_at: now,
            stats: UsageStats::default(),
            system_messages: Vec::new(),
            messages: Vec::new(),
        };
        self.write_document(&dir, &doc).await?;
        debug!(%session_id, "created session");
        Ok(session_id)
    }

    /// Persist the full session state. `created_at` is carried over from the
    /// existing document; `updated_at` is stamped now.
    pub async fn save_session(
        &self,
        session_id: Uuid,
        system_messages: &[Message],
        messages: &[Message],
        stats: &UsageStats,
    ) -> Result<(), MemoryError> {
        let dir = self.root.join(session_id.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| MemoryError::Persistence(e.to_string()))?;

        let created_at = self
            .read_document(session_id)
            .await
            .map(|doc| doc.created_at)
            .unwrap_or_else(Utc::now);

        let doc = SessionDocument {
            session_id,
            created_at,
            updated_at: Utc::now(),
            stats: stats.clone(),
            system_messages: system_messages.to_vec(),
            messages: messages.to_vec(),
        };
        self.write_document(&dir, &doc).await
    }

    /// Load a session, or `None` if it is missing, unparseable, or violates
    /// the message schema. A partial or corrupt file never raises.
    pub async fn load_session(
        &self,
        session_id: Uuid,
    ) -> Result<Option<SessionState>, MemoryError> {
        let Some(doc) = self.read_document(session_id).await else {
            return Ok(None);
        };
        if doc.session_id != session_id {
            warn!(%session_id, file_id = %doc.session_id, "session file id mismatch, ignoring");
            return Ok(None);
        }
        if let Err(reason) = validate_roles(&doc.system_messages)
            .and_then(|()| validate_roles(&doc.messages))
        {
            warn!(%session_id, reason, "session file violates message schema, ignoring");
            return Ok(None);
        }
        Ok(Some(SessionState {
            session_id: doc.session_id,
            system_messages: doc.system_messages,
            messages: doc.messages,
            stats: doc.stats,
        }))
    }

    /// Sessions sorted by `updated_at`, most recent first.
    pub async fn list_sessions(&self, limit: usize) -> Result<Vec<SessionSummary>, MemoryError> {
        let mut summaries = Vec::new();
        for session_id in self.session_ids().await? {
            if let Some(doc) = self.read_document(session_id).await {
                summaries.push(SessionSummary {
                    session_id: doc.session_id,
                    created_at: doc.created_at,
                    updated_at: doc.updated_at,
                    message_count: doc.messages.len(),
                    summary_count: doc.stats.compression_count,
                });
            }
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries.truncate(limit);
        Ok(summaries)
    }

    /// Most recently updated session, if any.
    pub async fn find_latest_session(&self) -> Result<Option<Uuid>, MemoryError> {
        Ok(self
            .list_sessions(1)
            .await?
            .first()
            .map(|s| s.session_id))
    }

    /// Resolve a UUID prefix to the full id — only when exactly one session
    /// matches.
    pub async fn find_session_by_prefix(
        &self,
        prefix: &str,
    ) -> Result<Option<Uuid>, MemoryError> {
        let matches: Vec<Uuid> = self
            .session_ids()
            .await?
            .into_iter()
            .filter(|id| id.to_string().starts_with(prefix))
            .collect();
        match matches.as_slice() {
            [only] => Ok(Some(*only)),
            _ => Ok(None),
        }
    }

    async fn session_ids(&self) -> Result<Vec<Uuid>, MemoryError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MemoryError::Persistence(e.to_string())),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::Persistence(e.to_string()))?
        {
            if let Ok(id) = entry.file_name().to_string_lossy().parse::<Uuid>() {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    async fn read_document(&self, session_id: Uuid) -> Option<SessionDocument> {
        let path = self.session_file(session_id);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(%session_id, error = %e, "failed to read session file");
                }
                return None;
            }
        };
        match serde_yaml::from_str(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!(%session_id, error = %e, "malformed session file, ignoring");
                None
            }
        }
    }

    async fn write_document(&self, dir: &Path, doc: &SessionDocument) -> Result<(), MemoryError> {
        let yaml =
            serde_yaml::to_string(doc).map_err(|e| MemoryError::Persistence(e.to_string()))?;
        let path = dir.join(SESSION_FILE);
        let tmp = dir.join(format!("{SESSION_FILE}.tmp"));
        tokio::fs::write(&tmp, yaml)
            .await
            .map_err(|e| MemoryError::Persistence(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| MemoryError::Persistence(e.to_string()))?;
        Ok(())
    }
}
