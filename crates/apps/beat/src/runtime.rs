//! Async runtime
//!
//! Event loop that reads typed commands from stdin and runs one poll timer
//! for the selected conversation. Backend calls are synchronous and run on
//! blocking worker threads; the chat state decides whether their results
//! still apply when they finish.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use chat::{
    ActionHandler, Attachment, ChatConfig, ConversationRef, MessageId, MessageKind, PollOutcome,
    filter_conversations, sorted_by_recent, total_unread,
};
use chrono::Utc;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use crate::input::{self, Command, HELP};
use crate::render::{Screen, composer_status, conversation_line};

pub struct Runtime {
    handler: Arc<ActionHandler>,
    config: ChatConfig,
    screen: Arc<Mutex<Screen>>,
    /// Conversations as last listed; `/open n` indexes into this
    listing: Vec<ConversationRef>,
    poller: Option<JoinHandle<()>>,
}

impl Runtime {
    pub fn new(handler: ActionHandler, config: ChatConfig) -> Self {
        Self {
            handler: Arc::new(handler),
            config,
            screen: Arc::new(Mutex::new(Screen::default())),
            listing: Vec::new(),
            poller: None,
        }
    }

    /// Log in, then process commands until `/quit`, EOF or Ctrl-C
    pub async fn run(mut self, username: String, password: String) -> Result<()> {
        let identity = self
            .blocking(move |h| h.login(&username, &password))
            .await?
            .context("Login failed")?;
        println!("Signed in as {} ({})", identity.display_name, identity.username);
        println!("{HELP}");
        self.show_list(None).await?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line? else { break };
                    match input::parse(&line) {
                        Ok(Command::Quit) => break,
                        Ok(command) => {
                            if let Err(err) = self.execute(command).await {
                                println!("! {err:#}");
                            }
                            self.redraw(false);
                        }
                        Err(err) => println!("! {err:#}"),
                    }
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        self.stop_poller();
        self.handler.logout();
        Ok(())
    }

    async fn execute(&mut self, command: Command) -> Result<()> {
        match command {
            Command::Say(text) => {
                if text.is_empty() {
                    return Ok(());
                }
                self.handler.with_state(|s| s.set_draft(&text))?;
                self.blocking(|h| h.submit_draft()).await??;
            }
            Command::List(filter) => self.show_list(filter.as_deref()).await?,
            Command::Open(n) => {
                let conversation = self
                    .listing
                    .get(n)
                    .cloned()
                    .with_context(|| format!("no conversation {}", n + 1))?;
                let changed = self.handler.select(conversation);
                if changed {
                    self.restart_poller();
                }
                self.blocking(|h| h.poll()).await?;
                self.redraw(true);
            }
            Command::Reply(n) => {
                let id = self.message_id(n)?;
                self.handler.with_state(|s| s.start_reply(&id))?;
            }
            Command::Edit(n) => {
                let id = self.message_id(n)?;
                self.handler.with_state(|s| s.start_edit(&id))?;
            }
            Command::Delete { index, for_everyone } => {
                let id = self.message_id(index)?;
                self.blocking(move |h| h.delete(&id, for_everyone)).await??;
            }
            Command::React { index, kind } => {
                let id = self.message_id(index)?;
                self.blocking(move |h| h.react(&id, &kind)).await??;
            }
            Command::Select(n) => {
                let id = self.message_id(n)?;
                self.handler.with_state(|s| s.toggle_forward(&id))?;
            }
            Command::Forward(targets) => {
                let report = self.blocking(move |h| h.forward_selected(&targets)).await??;
                for outcome in &report.outcomes {
                    match &outcome.result {
                        Ok(()) => println!("forwarded to {}", outcome.target),
                        Err(err) => println!("! forward to {} failed: {err}", outcome.target),
                    }
                }
            }
            Command::SendFile(path) => {
                let attachment = read_attachment(Path::new(&path)).await?;
                self.blocking(move |h| h.upload_media(attachment)).await??;
            }
            Command::Retry(n) => {
                let id = self.message_id(n)?;
                let (local_id, op_seq) = self.handler.with_state(|s| {
                    let local_id = s.message(&id).and_then(|m| m.local_id);
                    (local_id, s.failed_op(&id))
                });
                match (op_seq, local_id) {
                    (Some(op_seq), _) => self.blocking(move |h| h.retry_op(op_seq)).await??,
                    (None, Some(local_id)) => self.blocking(move |h| h.retry_send(local_id)).await??,
                    (None, None) => bail!("nothing failed on message {}", n + 1),
                }
            }
            Command::Discard(n) => {
                let id = self.message_id(n)?;
                let op_seq = self
                    .handler
                    .with_state(|s| s.failed_op(&id))
                    .with_context(|| format!("no failed change on message {}", n + 1))?;
                self.handler.with_state(|s| s.discard_op(op_seq))?;
            }
            Command::Cancel => self.handler.with_state(|s| s.cancel_compose()),
            Command::Help => println!("{HELP}"),
            Command::Quit => {}
        }

        if let Some(status) = self.handler.with_state(|s| composer_status(s)) {
            println!("({status})");
        }
        Ok(())
    }

    async fn show_list(&mut self, filter: Option<&str>) -> Result<()> {
        if let Err(err) = self.blocking(|h| h.refresh_conversations()).await? {
            warn!("Conversation list refresh failed: {err}");
        }

        let (listing, unread) = self.handler.with_state(|s| {
            let sorted: Vec<ConversationRef> = sorted_by_recent(s.conversations())
                .into_iter()
                .cloned()
                .collect();
            let listing = filter_conversations(&sorted, filter.unwrap_or_default())
                .into_iter()
                .cloned()
                .collect::<Vec<_>>();
            (listing, total_unread(s.conversations()))
        });

        let now = Utc::now();
        println!("Conversations ({unread} unread):");
        for (i, conversation) in listing.iter().enumerate() {
            println!("{}", conversation_line(i + 1, conversation, now));
        }
        self.listing = listing;
        Ok(())
    }

    fn message_id(&self, n: usize) -> Result<MessageId> {
        self.handler
            .with_state(|s| s.messages().get(n).map(|m| m.id.clone()))
            .with_context(|| format!("no message {}", n + 1))
    }

    fn redraw(&self, force: bool) {
        let screen = &self.screen;
        let out = self.handler.with_state(|s| {
            let mut screen = screen.lock().unwrap_or_else(PoisonError::into_inner);
            if force {
                Some(screen.force(s))
            } else {
                screen.render(s)
            }
        });
        if let Some(out) = out {
            print!("{out}");
        }
    }

    /// Replace the poll timer for a new selection
    ///
    /// Polls still running for the old selection finish on their own; their
    /// results are dropped as out of scope.
    fn restart_poller(&mut self) {
        self.stop_poller();

        let handler = self.handler.clone();
        let screen = self.screen.clone();
        let interval = self.config.poll_interval();
        let list_cooldown = self.config.poll_interval_secs;

        self.poller = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let handler = handler.clone();
                let screen = screen.clone();
                tokio::spawn(async move {
                    let worker = handler.clone();
                    match tokio::task::spawn_blocking(move || worker.tick(list_cooldown)).await {
                        Ok(Some(PollOutcome::Applied(_))) => {
                            let out = handler.with_state(|s| {
                                screen
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .render(s)
                            });
                            if let Some(out) = out {
                                print!("{out}");
                            }
                        }
                        Ok(outcome) => debug!("Poll finished: {outcome:?}"),
                        Err(err) => warn!("Poll worker failed: {err}"),
                    }
                });
            }
        }));
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
    }

    /// Run a backend-bound handler call on a blocking worker
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&ActionHandler) -> T + Send + 'static,
    {
        let handler = self.handler.clone();
        tokio::task::spawn_blocking(move || f(&handler))
            .await
            .context("Worker thread failed")
    }
}

fn kind_for(path: &Path) -> MessageKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" | "jpg" | "jpeg" | "gif" | "webp" => MessageKind::Image,
        "mp4" | "mov" | "webm" => MessageKind::Video,
        "mp3" | "ogg" | "wav" | "m4a" => MessageKind::Audio,
        _ => MessageKind::Document,
    }
}

async fn read_attachment(path: &Path) -> Result<Attachment> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("File name is not valid UTF-8")?;
    Ok(Attachment::new(file_name, kind_for(path), bytes))
}
