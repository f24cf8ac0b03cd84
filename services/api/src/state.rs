//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the database, the tutor client and the lessons.

use crate::config::Config;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tutor_core::{AiGateway, LessonConfig, StoreConfig, TutorClient};
use uuid::Uuid;

/// One async lock per session, so operations on a session never interleave.
#[derive(Clone, Default)]
pub struct SessionLocks {
    locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
}

impl SessionLocks {
    pub fn lock_for(&self, session_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(session_id).or_default().clone()
    }

    /// Forgets the lock of `session_id` once no caller holds it any more.
    pub fn release(&self, session_id: Uuid) {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if locks
            .get(&session_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&session_id);
        }
    }

    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<crate::db::Db>,
    pub gateway: Arc<dyn AiGateway>,
    pub tutor: TutorClient,
    /// Lessons served by this instance, in listing order.
    pub lessons: Arc<Vec<Arc<LessonConfig>>>,
    pub store_config: StoreConfig,
    pub session_locks: SessionLocks,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn lesson(&self, id: &str) -> Option<Arc<LessonConfig>> {
        self.lessons.iter().find(|l| l.id == id).cloned()
    }
}
