//! The interactive loop: read a line, drive the store, print what changed,
//! save.

use anyhow::Result;
use std::collections::HashSet;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::debug;
use tutor_core::{ConversationStore, LessonStep, types::Role};

use crate::command::{self, Command, HELP};
use crate::session_file;

pub struct Repl<W: Write> {
    store: ConversationStore,
    state_file: PathBuf,
    out: W,
    shown_messages: HashSet<String>,
    shown_step: Option<usize>,
}

/// Maps a typed option number ("2") to the option's text on steps that offer
/// choices. Anything else is passed through.
pub fn resolve_choice(step: Option<&LessonStep>, text: &str) -> String {
    let options = step.and_then(|s| s.options.as_deref()).unwrap_or_default();
    match text.trim().parse::<usize>() {
        Ok(n) if (1..=options.len()).contains(&n) => options[n - 1].clone(),
        _ => text.to_string(),
    }
}

impl<W: Write> Repl<W> {
    pub fn new(store: ConversationStore, state_file: PathBuf, out: W) -> Self {
        Self {
            store,
            state_file,
            out,
            shown_messages: HashSet::new(),
            shown_step: None,
        }
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn into_output(self) -> W {
        self.out
    }

    /// Runs until `/quit` or end of input.
    pub async fn run<R: AsyncBufRead + Unpin>(&mut self, input: R) -> Result<()> {
        writeln!(self.out, "📘 {}", self.store.lesson().title)?;
        writeln!(self.out, "Type /help for commands.\n")?;
        self.render()?;

        let mut lines = input.lines();
        loop {
            write!(self.out, "> ")?;
            self.out.flush()?;
            let Some(line) = lines.next_line().await? else {
                break;
            };
            match command::parse(&line) {
                Ok(None) => continue,
                Ok(Some(Command::Quit)) => break,
                Ok(Some(command)) => self.execute(command).await?,
                Err(e) => writeln!(self.out, "{}", e)?,
            }
        }

        session_file::save(&self.state_file, self.store.state())?;
        writeln!(self.out, "\nProgress saved to {}. See you soon! 👋", self.state_file.display())?;
        Ok(())
    }

    pub async fn execute(&mut self, command: Command) -> Result<()> {
        debug!(?command, "Executing");
        match command {
            Command::Say(text) => {
                let text = resolve_choice(self.store.current_step(), &text);
                self.store.handle_student_message(&text).await;
            }
            Command::Next => {
                if !self.store.can_go_next() {
                    writeln!(self.out, "This is the last step.")?;
                }
                self.store.next_step();
            }
            Command::Previous => {
                if !self.store.can_go_previous() {
                    writeln!(self.out, "This is the first step.")?;
                }
                self.store.previous_step();
            }
            Command::Jump(index) => {
                let total = self.store.lesson().total_steps();
                if index >= total {
                    writeln!(self.out, "This lesson has {} steps.", total)?;
                } else {
                    self.store.jump_to_step(index);
                }
            }
            Command::Reset => {
                self.store.reset_lesson();
                self.shown_step = None;
            }
            Command::Back => self.store.return_to_lesson(),
            Command::Hint => self.store.request_hint().await,
            Command::Explain(concept) => self.store.explain_concept(&concept).await,
            Command::Encourage => self.store.encourage().await,
            Command::Progress => self.print_progress()?,
            Command::Help => writeln!(self.out, "{}", HELP)?,
            Command::Quit => {}
        }
        self.store.settle().await;

        if let Some(error) = self.store.error() {
            writeln!(self.out, "⚠️  {}", error)?;
        }
        session_file::save(&self.state_file, self.store.state())?;
        self.render()
    }

    /// Prints tutor messages not shown yet and, when the step changed, the
    /// step's question and options.
    fn render(&mut self) -> Result<()> {
        let step_index = self.store.state().step_index;
        let step = self.store.current_step().cloned();
        let step_changed = self.shown_step != Some(step_index);

        let mut announced = false;
        for message in &self.store.state().messages {
            if !self.shown_messages.insert(message.id.clone()) {
                continue;
            }
            if message.role == Role::Student {
                continue;
            }
            if step.as_ref().is_some_and(|s| message.step_id.as_deref() == Some(s.id.as_str())) {
                announced = true;
            }
            writeln!(self.out, "🤖 {}\n", message.text)?;
        }
        // Forget ids the store has trimmed from the transcript.
        let live: HashSet<&str> =
            self.store.state().messages.iter().map(|m| m.id.as_str()).collect();
        self.shown_messages.retain(|id| live.contains(id.as_str()));

        if step_changed {
            self.shown_step = Some(step_index);
            if let Some(step) = step {
                if !announced {
                    writeln!(self.out, "🤖 {}\n", step.content)?;
                }
                if let Some(prompt) = &step.prompt {
                    writeln!(self.out, "❓ {}", prompt)?;
                }
                for (i, option) in step.options.iter().flatten().enumerate() {
                    writeln!(self.out, "   {}. {}", i + 1, option)?;
                }
            }
        }
        Ok(())
    }

    fn print_progress(&mut self) -> Result<()> {
        let state = self.store.state();
        writeln!(
            self.out,
            "Step {} of {} · {}% complete · {} answers · {} reflections",
            state.step_index + 1,
            self.store.lesson().total_steps(),
            self.store.progress_percentage(),
            state.progress.answers.len(),
            state.progress.reflections.len(),
        )?;
        if self.store.is_in_tutoring_mode() {
            writeln!(self.out, "Currently working through some extra practice.")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tutor_core::{
        Pacing, PromptLibrary, StoreConfig, TutorClient, gateway::ScriptedGateway,
        lesson::number_systems,
    };

    fn repl(gateway: Arc<ScriptedGateway>, state_file: PathBuf) -> Repl<Vec<u8>> {
        repl_with_limit(gateway, state_file, 50)
    }

    fn repl_with_limit(
        gateway: Arc<ScriptedGateway>,
        state_file: PathBuf,
        transcript_limit: usize,
    ) -> Repl<Vec<u8>> {
        let tutor = TutorClient::new(gateway, PromptLibrary::builtin());
        let config = StoreConfig {
            pacing: Pacing::immediate(),
            summary_every: 0,
            transcript_limit,
            ..StoreConfig::default()
        };
        let (store, _) =
            session_file::open_store(&state_file, Arc::new(number_systems()), tutor, config, false)
                .unwrap();
        Repl::new(store, state_file, Vec::new())
    }

    #[test]
    fn test_resolve_choice() {
        let lesson = number_systems();
        let question = &lesson.steps[1];
        assert_eq!(resolve_choice(Some(question), "4"), "All of the above");
        assert_eq!(resolve_choice(Some(question), "5"), "5");
        assert_eq!(resolve_choice(Some(&lesson.steps[0]), "1"), "1");
        assert_eq!(resolve_choice(None, "sticks"), "sticks");
    }

    #[tokio::test]
    async fn test_session_walkthrough_is_printed_and_saved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let mut repl = repl(Arc::new(ScriptedGateway::new()), path.clone());

        repl.run(&b"continue\n/progress\n/jump 99\n/quit\n/next\n"[..])
            .await
            .unwrap();
        assert_eq!(repl.store().state().step_index, 1);

        let output = String::from_utf8(repl.into_output()).unwrap();
        assert!(output.contains("Journey Through Number Systems"));
        assert!(output.contains("Namaste, learner!"));
        assert!(output.contains("❓ How would ancient people count without written numbers?"));
        assert!(output.contains("   4. All of the above"));
        assert!(output.contains("Step 2 of 13"));
        assert!(output.contains("This lesson has 13 steps."));
        assert!(output.contains("Progress saved"));

        let saved = session_file::load(&path).unwrap().unwrap();
        assert_eq!(saved.step_index, 1);
    }

    #[tokio::test]
    async fn test_resumed_session_continues_where_it_left_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");

        let mut first = repl(Arc::new(ScriptedGateway::new()), path.clone());
        first.run(&b"/jump 4\n"[..]).await.unwrap();

        let mut second = repl(Arc::new(ScriptedGateway::new()), path);
        assert_eq!(second.store().state().step_index, 3);
        second.run(&b"/prev\n"[..]).await.unwrap();
        assert_eq!(second.store().state().step_index, 2);
    }

    #[tokio::test]
    async fn test_hint_and_backend_errors_are_shown() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_reply("Think about what you carry everywhere.");
        let mut repl = repl(gateway.clone(), dir.path().join("session.json"));

        repl.execute(Command::Next).await.unwrap();
        repl.execute(Command::Hint).await.unwrap();
        repl.execute(Command::Hint).await.unwrap();

        let output = String::from_utf8(repl.into_output()).unwrap();
        assert!(output.contains("🤖 Think about what you carry everywhere."));
        assert!(output.contains("⚠️  Sorry, I couldn't come up with a hint right now."));
        assert_eq!(gateway.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_shown_ids_follow_the_trimmed_transcript() {
        let dir = tempfile::tempdir().unwrap();
        let mut repl = repl_with_limit(
            Arc::new(ScriptedGateway::new()),
            dir.path().join("session.json"),
            5,
        );

        for _ in 0..12 {
            repl.execute(Command::Next).await.unwrap();
        }
        for _ in 0..12 {
            repl.execute(Command::Previous).await.unwrap();
        }

        let live = repl.store().messages().len();
        assert!(live <= 5);
        assert_eq!(repl.shown_messages.len(), live);
        assert!(
            repl.store()
                .messages()
                .iter()
                .all(|m| repl.shown_messages.contains(&m.id))
        );
    }
}
