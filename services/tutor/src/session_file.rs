//! On-disk persistence of a terminal session.
//!
//! The conversation state is written as JSON to a sibling temp file and
//! renamed over the target, so an interrupted save never leaves a truncated
//! file behind.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tutor_core::{ConversationState, ConversationStore, LessonConfig, StoreConfig, TutorClient};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Reads a saved state. A missing file is not an error.
pub fn load(path: &Path) -> Result<Option<ConversationState>> {
    let json = match std::fs::read_to_string(path) {
        Ok(json) => json,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(e).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    let state = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse saved session {}", path.display()))?;
    Ok(Some(state))
}

pub fn save(path: &Path, state: &ConversationState) -> Result<()> {
    let json = serde_json::to_string_pretty(state)?;
    let temp = temp_path(path);
    std::fs::write(&temp, json).with_context(|| format!("Failed to write {}", temp.display()))?;
    std::fs::rename(&temp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}

/// Resumes the session saved at `path`, or starts the lesson afresh when
/// there is none, `fresh` is set, or the saved state does not fit `lesson`.
/// Returns the store and whether it was resumed.
pub fn open_store(
    path: &Path,
    lesson: Arc<LessonConfig>,
    tutor: TutorClient,
    config: StoreConfig,
    fresh: bool,
) -> Result<(ConversationStore, bool)> {
    if !fresh {
        if let Some(saved) = load(path)? {
            match ConversationStore::restore(lesson.clone(), tutor.clone(), config.clone(), saved) {
                Ok(store) => {
                    info!(path = %path.display(), "Resumed saved session");
                    return Ok((store, true));
                }
                Err(e) => warn!(path = %path.display(), "Ignoring saved session: {}", e),
            }
        }
    }

    let mut store = ConversationStore::new(lesson, tutor, config);
    store.initialize_lesson();
    Ok((store, false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tutor_core::{Pacing, PromptLibrary, gateway::ScriptedGateway, lesson::number_systems};

    fn tutor() -> TutorClient {
        TutorClient::new(Arc::new(ScriptedGateway::new()), PromptLibrary::builtin())
    }

    fn config() -> StoreConfig {
        StoreConfig {
            pacing: Pacing::immediate(),
            summary_every: 0,
            ..StoreConfig::default()
        }
    }

    #[test]
    fn test_missing_file_loads_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("nope.json")).unwrap().is_none());
    }

    #[test]
    fn test_save_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let lesson = Arc::new(number_systems());

        let (mut store, resumed) =
            open_store(&path, lesson.clone(), tutor(), config(), false).unwrap();
        assert!(!resumed);
        save(&path, store.state()).unwrap();
        store.next_step();
        save(&path, store.state()).unwrap();

        assert!(!temp_path(&path).exists());
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded.step_index, 1);
        assert_eq!(loaded.messages.len(), 2);
    }

    #[test]
    fn test_open_store_resumes_unless_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let lesson = Arc::new(number_systems());

        let (mut store, _) = open_store(&path, lesson.clone(), tutor(), config(), false).unwrap();
        store.jump_to_step(4);
        save(&path, store.state()).unwrap();

        let (resumed, was_resumed) =
            open_store(&path, lesson.clone(), tutor(), config(), false).unwrap();
        assert!(was_resumed);
        assert_eq!(resumed.state().step_index, 4);

        let (fresh, was_resumed) = open_store(&path, lesson, tutor(), config(), true).unwrap();
        assert!(!was_resumed);
        assert_eq!(fresh.state().step_index, 0);
    }

    #[test]
    fn test_state_of_another_lesson_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let lesson = Arc::new(number_systems());
        let (store, _) = open_store(&path, lesson.clone(), tutor(), config(), false).unwrap();
        let mut state = store.into_state();
        state.lesson_id = "knitting_101".to_string();
        save(&path, &state).unwrap();

        let (store, resumed) = open_store(&path, lesson, tutor(), config(), false).unwrap();
        assert!(!resumed);
        assert_eq!(store.state().lesson_id, "number_systems_intro");
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load(&path).is_err());
    }
}
