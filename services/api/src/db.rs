//! Data Access Layer
//!
//! Sessions and their serialized conversation state live in SQLite. Queries
//! are plain runtime `sqlx` queries mapped through `FromRow`.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::SqlitePool;
use tutor_core::ConversationState;
use uuid::Uuid;

use crate::models::Session;

/// A wrapper around the `SqlitePool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: SqlitePool,
}

impl Db {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Creates a session holding `initial_state`.
    pub async fn create_session(
        &self,
        user_id: &str,
        lesson_id: &str,
        initial_state: &ConversationState,
    ) -> Result<Session> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        let state_json = serde_json::to_string(initial_state)?;

        let session = sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, lesson_id, state_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, user_id, lesson_id, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(lesson_id)
        .bind(state_json)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }

    /// Retrieves a single session by its ID, scoped to a specific user.
    pub async fn get_session(&self, session_id: Uuid, user_id: &str) -> Result<Option<Session>> {
        let session = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, lesson_id, created_at, updated_at
            FROM sessions
            WHERE id = ? AND user_id = ?
            "#,
        )
        .bind(session_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Lists all sessions for a given user, ordered by most recent.
    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let sessions = sqlx::query_as::<_, Session>(
            r#"
            SELECT id, user_id, lesson_id, created_at, updated_at
            FROM sessions
            WHERE user_id = ?
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    /// Loads the persisted conversation state of a session.
    pub async fn load_state(&self, session_id: Uuid) -> Result<Option<ConversationState>> {
        let json: Option<String> =
            sqlx::query_scalar("SELECT state_json FROM sessions WHERE id = ?")
                .bind(session_id)
                .fetch_optional(&self.pool)
                .await?;

        json.map(|json| {
            serde_json::from_str(&json)
                .with_context(|| format!("Corrupt state for session {}", session_id))
        })
        .transpose()
    }

    /// Replaces the conversation state of a session and bumps `updated_at`.
    pub async fn save_state(&self, session_id: Uuid, state: &ConversationState) -> Result<Session> {
        let state_json = serde_json::to_string(state)?;
        let session = sqlx::query_as::<_, Session>(
            r#"
            UPDATE sessions
            SET state_json = ?, updated_at = ?
            WHERE id = ?
            RETURNING id, user_id, lesson_id, created_at, updated_at
            "#,
        )
        .bind(state_json)
        .bind(Utc::now())
        .bind(session_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(session)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    /// A migrated in-memory database. One connection, so every query sees
    /// the same memory database.
    pub(crate) async fn memory_db() -> Db {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let db = Db::new(pool);
        db.run_migrations().await.unwrap();
        db
    }

    fn state(step_index: usize) -> ConversationState {
        let mut state: ConversationState = serde_json::from_value(serde_json::json!({
            "lesson_id": "number_systems_intro",
            "step_index": 0,
            "messages": [],
            "progress": {
                "current_step_index": 0,
                "completed_steps": [],
                "answers": [],
                "reflections": [],
                "start_time": "2024-01-15T10:30:00Z",
                "last_update_time": "2024-01-15T10:30:00Z"
            }
        }))
        .unwrap();
        state.step_index = step_index;
        state
    }

    #[tokio::test]
    async fn test_sessions_are_scoped_to_users() {
        let db = memory_db().await;
        let first = db
            .create_session("alice", "number_systems_intro", &state(0))
            .await
            .unwrap();
        let second = db
            .create_session("alice", "number_systems_intro", &state(0))
            .await
            .unwrap();
        db.create_session("bob", "number_systems_intro", &state(0))
            .await
            .unwrap();

        let alice = db.list_sessions("alice").await.unwrap();
        assert_eq!(alice.len(), 2);
        let ids: Vec<Uuid> = alice.iter().map(|s| s.id).collect();
        assert!(ids.contains(&first.id) && ids.contains(&second.id));

        assert!(db.get_session(first.id, "alice").await.unwrap().is_some());
        assert!(db.get_session(first.id, "bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_state_round_trips_and_bumps_updated_at() {
        let db = memory_db().await;
        let session = db
            .create_session("alice", "number_systems_intro", &state(0))
            .await
            .unwrap();

        let saved = db.save_state(session.id, &state(4)).await.unwrap();
        assert!(saved.updated_at >= session.updated_at);
        assert_eq!(saved.created_at, session.created_at);

        let loaded = db.load_state(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.step_index, 4);
        assert!(db.load_state(Uuid::new_v4()).await.unwrap().is_none());
    }
}
