//! In-process credential store: users plus speech-practice and chat documents.
//!
//! Stores are keyed by id and guarded by a per-store RwLock; each operation is
//! atomic per document. A SQL/document database is an external collaborator
//! and is not wired into this build.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Store operation failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
}

/// Kind of account using the app; drives post-login routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Adult,
    Child,
    Guardian,
}

/// A resolved, authenticated user record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: UserType,
    pub language: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted on signup/upsert. Id is kept when the caller supplies one
/// (e.g. an identity-provider subject), otherwise generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpsertUser {
    #[serde(default)]
    pub id: Option<String>,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub user_type: UserType,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    "en".to_string()
}

/// User records keyed by id, with an email lookup for local login.
pub struct UserStore {
    inner: RwLock<HashMap<String, User>>,
}

impl Default for UserStore {
    fn default() -> Self {
        Self::new()
    }
}

impl UserStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Create or update a user. Matches by id when given, else by email.
    /// Returns the stored record.
    pub async fn upsert(&self, fields: UpsertUser) -> User {
        let now = Utc::now();
        let mut g = self.inner.write().await;
        let existing_id = match &fields.id {
            Some(id) if g.contains_key(id) => Some(id.clone()),
            _ => g
                .values()
                .find(|u| u.email == fields.email)
                .map(|u| u.id.clone()),
        };
        if let Some(u) = existing_id.and_then(|id| g.get_mut(&id)) {
            u.email = fields.email;
            u.first_name = fields.first_name;
            u.last_name = fields.last_name;
            u.user_type = fields.user_type;
            u.language = fields.language;
            u.updated_at = now;
            return u.clone();
        }
        let id = fields
            .id
            .unwrap_or_else(|| format!("user-{}", uuid::Uuid::new_v4()));
        let user = User {
            id: id.clone(),
            email: fields.email,
            first_name: fields.first_name,
            last_name: fields.last_name,
            user_type: fields.user_type,
            language: fields.language,
            created_at: now,
            updated_at: now,
        };
        g.insert(id, user.clone());
        user
    }

    /// Return a clone of the user if it exists.
    pub async fn get(&self, id: &str) -> Option<User> {
        self.inner.read().await.get(id).cloned()
    }

    /// Look up by email (local login).
    pub async fn get_by_email(&self, email: &str) -> Option<User> {
        self.inner
            .read()
            .await
            .values()
            .find(|u| u.email == email)
            .cloned()
    }
}

/// One speech-practice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechSession {
    pub id: String,
    pub user_id: String,
    pub exercise_type: String,
    pub created_at: DateTime<Utc>,
}

/// One recording within a practice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechRecording {
    pub id: String,
    pub session_id: String,
    pub user_id: String,
    pub transcript: String,
    pub accuracy: f64,
    pub created_at: DateTime<Utc>,
}

/// A therapist-style assessment entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub user_id: String,
    pub level: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// Per-day practice summary for a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEntry {
    pub user_id: String,
    pub date: NaiveDate,
    pub sessions_completed: u32,
    pub average_accuracy: f64,
}

/// Speech-practice documents: sessions, recordings, assessments, progress.
pub struct SpeechStore {
    sessions: RwLock<HashMap<String, SpeechSession>>,
    recordings: RwLock<Vec<SpeechRecording>>,
    assessments: RwLock<Vec<Assessment>>,
    progress: RwLock<HashMap<(String, NaiveDate), ProgressEntry>>,
}

impl Default for SpeechStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SpeechStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            recordings: RwLock::new(Vec::new()),
            assessments: RwLock::new(Vec::new()),
            progress: RwLock::new(HashMap::new()),
        }
    }

    /// Create a practice session for the user.
    pub async fn create_session(&self, user_id: &str, exercise_type: &str) -> SpeechSession {
        let session = SpeechSession {
            id: format!("speech-{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            exercise_type: exercise_type.to_string(),
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    /// Store a recording against an existing session and fold it into the
    /// user's daily progress entry.
    pub async fn add_recording(
        &self,
        session_id: &str,
        user_id: &str,
        transcript: &str,
        accuracy: f64,
    ) -> Result<SpeechRecording, StoreError> {
        if !self.sessions.read().await.contains_key(session_id) {
            return Err(StoreError::NotFound("speech session"));
        }
        let recording = SpeechRecording {
            id: format!("rec-{}", uuid::Uuid::new_v4()),
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            transcript: transcript.to_string(),
            accuracy,
            created_at: Utc::now(),
        };
        self.recordings.write().await.push(recording.clone());

        let today = Utc::now().date_naive();
        let mut g = self.progress.write().await;
        let entry = g
            .entry((user_id.to_string(), today))
            .or_insert_with(|| ProgressEntry {
                user_id: user_id.to_string(),
                date: today,
                sessions_completed: 0,
                average_accuracy: 0.0,
            });
        let n = f64::from(entry.sessions_completed);
        entry.average_accuracy = (entry.average_accuracy * n + accuracy) / (n + 1.0);
        entry.sessions_completed += 1;
        Ok(recording)
    }

    /// Store an assessment for the user.
    pub async fn add_assessment(&self, user_id: &str, level: &str, notes: &str) -> Assessment {
        let assessment = Assessment {
            id: format!("assess-{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            level: level.to_string(),
            notes: notes.to_string(),
            created_at: Utc::now(),
        };
        self.assessments.write().await.push(assessment.clone());
        assessment
    }

    /// Daily progress entries for the user, most recent first.
    pub async fn progress(&self, user_id: &str) -> Vec<ProgressEntry> {
        let mut entries: Vec<ProgressEntry> = self
            .progress
            .read()
            .await
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.date.cmp(&a.date));
        entries
    }
}

/// One chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// One message in a chat conversation. Assistant messages carry the emotion
/// and support classification from the support collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub session_id: String,
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub support_type: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Chat sessions and their ordered message history.
pub struct ChatStore {
    sessions: RwLock<HashMap<String, ChatSession>>,
    messages: RwLock<HashMap<String, Vec<ChatMessage>>>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            messages: RwLock::new(HashMap::new()),
        }
    }

    /// Create a chat session for the user.
    pub async fn create_session(&self, user_id: &str) -> ChatSession {
        let session = ChatSession {
            id: format!("chat-{}", uuid::Uuid::new_v4()),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
        };
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        self.messages
            .write()
            .await
            .insert(session.id.clone(), Vec::new());
        session
    }

    /// Return a clone of the session if it exists.
    pub async fn get_session(&self, id: &str) -> Option<ChatSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Append a message to the session; errors if the session is unknown.
    pub async fn append_message(
        &self,
        session_id: &str,
        role: &str,
        content: &str,
        emotion: Option<String>,
        support_type: Option<String>,
    ) -> Result<ChatMessage, StoreError> {
        let mut g = self.messages.write().await;
        let list = g
            .get_mut(session_id)
            .ok_or(StoreError::NotFound("chat session"))?;
        let message = ChatMessage {
            id: format!("msg-{}", uuid::Uuid::new_v4()),
            session_id: session_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            emotion,
            support_type,
            created_at: Utc::now(),
        };
        list.push(message.clone());
        Ok(message)
    }

    /// Messages for a session in arrival order; errors if the session is unknown.
    pub async fn messages(&self, session_id: &str) -> Result<Vec<ChatMessage>, StoreError> {
        self.messages
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or(StoreError::NotFound("chat session"))
    }
}
