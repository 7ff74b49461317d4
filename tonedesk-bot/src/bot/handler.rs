//! Chat event handling
//!
//! Turns commands, uploads and button presses into orchestrator calls and
//! renders the outcome back through the [`ChatTransport`].

use async_trait::async_trait;
use std::sync::Arc;
use tonedesk_common::session::{Session, SessionPhase, UserId};
use tracing::{debug, info, warn};

use super::actions::{Action, HelpTopic, Menu};
use super::eq_command::{parse_eq_args, parse_spatial_args};
use super::{keyboards, texts};
use crate::error::BotError;
use crate::orchestrator::{output_filename, CancelOutcome, ConfigAction, Orchestrator, ProcessOutcome};
use crate::transfer::FileRef;
use crate::transport::{
    ChatEvent, ChatEventKind, ChatId, ChatProgress, ChatTransport, ChoiceGrid, MessageRef,
};

/// Consumer of inbound chat events
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: ChatEvent);
}

/// Where a reply goes: the pressed menu message when there is one, else a
/// new message
#[derive(Debug, Clone, Copy)]
struct Reply {
    user_id: UserId,
    chat_id: ChatId,
    message: Option<MessageRef>,
}

pub struct Handler {
    orchestrator: Arc<Orchestrator>,
    transport: Arc<dyn ChatTransport>,
}

impl Handler {
    pub fn new(orchestrator: Arc<Orchestrator>, transport: Arc<dyn ChatTransport>) -> Self {
        Self {
            orchestrator,
            transport,
        }
    }

    async fn show(&self, reply: Reply, text: &str, choices: Option<&ChoiceGrid>) {
        if let Some(message) = reply.message {
            match self.transport.edit_message(message, text, choices).await {
                Ok(()) => return,
                Err(e) => debug!(chat_id = reply.chat_id, error = %e, "Edit failed, sending new message"),
            }
        }
        if let Err(e) = self.transport.send_message(reply.chat_id, text, choices).await {
            warn!(chat_id = reply.chat_id, error = %e, "Failed to send reply");
        }
    }

    async fn acknowledge(&self, callback_id: &str, toast: Option<&str>) {
        if let Err(e) = self.transport.acknowledge(callback_id, toast).await {
            debug!(callback_id, error = %e, "Callback acknowledgement failed");
        }
    }

    /// Render an error with the menu that fits the session's current phase
    async fn report(&self, reply: Reply, err: &BotError) {
        match err {
            BotError::Validation(_) | BotError::StateConflict(_) | BotError::NoSession => {
                debug!(user_id = reply.user_id, error = %err, "Request rejected")
            }
            _ => warn!(user_id = reply.user_id, error = %err, "Request failed"),
        }

        let choices = match self.orchestrator.state_of(reply.user_id).await {
            Ok(Some(SessionPhase::AwaitingConfiguration)) => Some(keyboards::processing_options()),
            Ok(Some(SessionPhase::AwaitingContinuation)) => Some(keyboards::continue_or_finish()),
            _ => None,
        };
        self.show(reply, &err.user_message(), choices.as_ref()).await;
    }

    async fn show_options(&self, reply: Reply, session: &Session) {
        let grid = keyboards::processing_options();
        self.show(reply, &texts::options_prompt(&session.settings), Some(&grid))
            .await;
    }

    async fn require_session(&self, user_id: UserId) -> Result<Session, BotError> {
        self.orchestrator
            .session(user_id)
            .await?
            .ok_or(BotError::NoSession)
    }

    async fn configure(&self, reply: Reply, action: ConfigAction) -> Result<Session, BotError> {
        self.orchestrator.configure(reply.user_id, action).await
    }

    async fn on_command(&self, reply: Reply, name: &str, args: &str) -> Result<(), BotError> {
        match name {
            "start" => {
                let grid = keyboards::start();
                self.show(reply, texts::WELCOME, Some(&grid)).await;
            }
            "help" => {
                let grid = keyboards::help();
                self.show(reply, &texts::help(HelpTopic::Main), Some(&grid))
                    .await;
            }
            "cancel" => self.cancel(reply).await?,
            "eq" => {
                let bands = parse_eq_args(args)?;
                let session = self.configure(reply, ConfigAction::SetEq(bands)).await?;
                self.show_options(reply, &session).await;
            }
            "3d" => {
                let position = parse_spatial_args(args)?;
                let session = self.configure(reply, ConfigAction::SetSpatial(position)).await?;
                self.show_options(reply, &session).await;
            }
            "info" => {
                let session = self.require_session(reply.user_id).await?;
                let grid = keyboards::processing_options();
                let text = texts::file_info(&session.metadata, &session.original_filename);
                self.show(reply, &text, Some(&grid)).await;
            }
            other => {
                debug!(user_id = reply.user_id, command = other, "Unknown command");
                self.show(reply, texts::PLAIN_TEXT_HINT, None).await;
            }
        }
        Ok(())
    }

    async fn on_file(&self, reply: Reply, file: FileRef) {
        let filename = file.file_name.clone().unwrap_or_else(|| "audio".to_string());
        let status = match self
            .transport
            .send_message(reply.chat_id, &texts::download_started(&filename), None)
            .await
        {
            Ok(message) => message,
            Err(e) => {
                warn!(user_id = reply.user_id, error = %e, "Cannot post download status");
                return;
            }
        };
        let status_reply = Reply {
            message: Some(status),
            ..reply
        };

        let progress = ChatProgress::new(self.transport.clone(), status, "📥 Downloading");
        match self.orchestrator.ingest(reply.user_id, &file, &progress).await {
            Ok(session) => {
                let text = format!(
                    "{}\n\n{}",
                    texts::file_info(&session.metadata, &session.original_filename),
                    texts::options_prompt(&session.settings)
                );
                let grid = keyboards::processing_options();
                self.show(status_reply, &text, Some(&grid)).await;
            }
            Err(e) => self.report(status_reply, &e).await,
        }
    }

    async fn cancel(&self, reply: Reply) -> Result<(), BotError> {
        let text = match self.orchestrator.cancel(reply.user_id).await? {
            CancelOutcome::Cancelled => texts::CANCELLED,
            CancelOutcome::CancelledDuringProcessing => texts::CANCELLED_DURING_PROCESSING,
            CancelOutcome::NothingToCancel => texts::NOTHING_TO_CANCEL,
        };
        self.show(reply, text, None).await;
        Ok(())
    }

    async fn open_menu(&self, reply: Reply, menu: Menu) -> Result<(), BotError> {
        let session = self.require_session(reply.user_id).await?;
        let (text, grid) = match menu {
            Menu::Options => {
                self.show_options(reply, &session).await;
                return Ok(());
            }
            Menu::Convert => (texts::CHOOSE_FORMAT.to_string(), keyboards::formats()),
            Menu::Bitrate => (texts::CHOOSE_BITRATE.to_string(), keyboards::bitrates()),
            Menu::SampleRate => (texts::CHOOSE_SAMPLE_RATE.to_string(), keyboards::sample_rates()),
            Menu::Channels => (texts::CHOOSE_CHANNELS.to_string(), keyboards::channels()),
            Menu::Effects => (effects_text(&session), keyboards::effects()),
            Menu::Spatial => (texts::CHOOSE_POSITION.to_string(), keyboards::spatial()),
            Menu::Normalize => (texts::CHOOSE_NORMALIZE.to_string(), keyboards::normalize()),
            Menu::Bass => (texts::CHOOSE_BASS.to_string(), keyboards::bass_boost()),
            Menu::Info => (
                texts::file_info(&session.metadata, &session.original_filename),
                keyboards::processing_options(),
            ),
        };
        self.show(reply, &text, Some(&grid)).await;
        Ok(())
    }

    async fn run_processing(&self, reply: Reply) -> Result<(), BotError> {
        let cancel = keyboards::cancel_only();
        self.show(reply, texts::PROCESSING, Some(&cancel)).await;

        let session = match self.orchestrator.process(reply.user_id).await? {
            ProcessOutcome::Completed(session) => session,
            ProcessOutcome::Discarded => {
                debug!(user_id = reply.user_id, "Result discarded, nothing to deliver");
                return Ok(());
            }
            ProcessOutcome::Expired => {
                self.show(reply, texts::SESSION_EXPIRED_DURING_PROCESSING, None)
                    .await;
                return Ok(());
            }
        };
        let Some(result) = session.result.as_ref() else {
            return Err(BotError::StateConflict("The result went missing.".into()));
        };

        let caption = texts::result_caption(&result.metadata, &session.settings);
        self.transport
            .send_file(reply.chat_id, &result.path, &output_filename(&session), &caption)
            .await?;
        info!(user_id = reply.user_id, session_id = %session.id, "Result delivered");
        self.show(reply, texts::PROCESSING_DONE, None).await;

        let grid = keyboards::continue_or_finish();
        if let Err(e) = self
            .transport
            .send_choices(reply.chat_id, "What next?", &grid)
            .await
        {
            warn!(user_id = reply.user_id, error = %e, "Failed to send follow-up menu");
        }
        Ok(())
    }

    /// Carry out a parsed button action; the returned text is shown as a
    /// short toast
    async fn on_action(&self, reply: Reply, action: Action) -> Result<Option<String>, BotError> {
        match action {
            Action::Format(format) => {
                let session = self.configure(reply, ConfigAction::SetFormat(format)).await?;
                if format.is_lossless() {
                    self.show_options(reply, &session).await;
                } else {
                    let grid = keyboards::bitrates();
                    self.show(reply, texts::CHOOSE_BITRATE, Some(&grid)).await;
                }
                return Ok(Some(format!("Format: {}", format.display_name())));
            }
            Action::MoreFormats => {
                self.require_session(reply.user_id).await?;
                let grid = keyboards::more_formats();
                self.show(reply, texts::CHOOSE_FORMAT, Some(&grid)).await;
            }
            Action::Bitrate(bitrate) => {
                let session = self.configure(reply, ConfigAction::SetBitrate(bitrate)).await?;
                self.show_options(reply, &session).await;
                return Ok(Some(format!("Bitrate: {}", bitrate)));
            }
            Action::SampleRate(rate) => {
                let session = self.configure(reply, ConfigAction::SetSampleRate(rate)).await?;
                self.show_options(reply, &session).await;
            }
            Action::Channels(channels) => {
                let session = self.configure(reply, ConfigAction::SetChannels(channels)).await?;
                self.show_options(reply, &session).await;
            }
            Action::BassBoost(db) => {
                let session = self.configure(reply, ConfigAction::SetBassBoost(db)).await?;
                self.show_options(reply, &session).await;
            }
            Action::Effect(name) => {
                let session = self.require_session(reply.user_id).await?;
                if session.settings.effects.iter().any(|e| e == &name) {
                    return Ok(Some(format!("{} is already added", name)));
                }
                let session = self.configure(reply, ConfigAction::AddEffect(name.clone())).await?;
                let grid = keyboards::effects();
                self.show(reply, &effects_text(&session), Some(&grid)).await;
                return Ok(Some(format!("Added {}", name)));
            }
            Action::ClearEffects => {
                let session = self.configure(reply, ConfigAction::ClearEffects).await?;
                let grid = keyboards::effects();
                self.show(reply, &effects_text(&session), Some(&grid)).await;
            }
            Action::Spatial(position) => {
                let session = self.configure(reply, ConfigAction::SetSpatial(position)).await?;
                self.show_options(reply, &session).await;
            }
            Action::SpatialCustom => {
                self.require_session(reply.user_id).await?;
                let grid = keyboards::spatial();
                self.show(reply, texts::CUSTOM_POSITION, Some(&grid)).await;
            }
            Action::Normalize(on) => {
                let session = self.configure(reply, ConfigAction::SetNormalize(on)).await?;
                self.show_options(reply, &session).await;
            }
            Action::Open(menu) => self.open_menu(reply, menu).await?,
            Action::EqHelp => {
                let grid = keyboards::processing_options();
                self.show(reply, &texts::help(HelpTopic::Eq), Some(&grid)).await;
            }
            Action::ConfirmProcess => self.run_processing(reply).await?,
            Action::ContinueEditing => {
                let session = self.orchestrator.continue_editing(reply.user_id).await?;
                self.show_options(reply, &session).await;
            }
            Action::Finish => {
                self.orchestrator.finalize(reply.user_id).await?;
                self.show(reply, texts::SESSION_ENDED, None).await;
            }
            Action::Cancel => self.cancel(reply).await?,
            Action::Help(topic) => {
                let grid = match topic {
                    HelpTopic::Main => keyboards::help(),
                    _ => keyboards::back_to_help(),
                };
                self.show(reply, &texts::help(topic), Some(&grid)).await;
            }
            Action::MainMenu => {
                let grid = keyboards::start();
                self.show(reply, texts::WELCOME, Some(&grid)).await;
            }
        }
        Ok(None)
    }

    async fn on_button(&self, reply: Reply, token: &str, callback_id: &str) {
        let action = match Action::parse(token) {
            Ok(action) => action,
            Err(e) => {
                debug!(user_id = reply.user_id, token, "Unrecognised action token");
                self.acknowledge(callback_id, Some(&e.to_string())).await;
                return;
            }
        };

        // A run can take minutes; release the button spinner first
        let early_ack = action == Action::ConfirmProcess;
        if early_ack {
            self.acknowledge(callback_id, None).await;
        }

        let result = self.on_action(reply, action).await;
        if !early_ack {
            let toast = result.as_ref().ok().and_then(|t| t.as_deref());
            self.acknowledge(callback_id, toast).await;
        }
        if let Err(e) = result {
            self.report(reply, &e).await;
        }
    }
}

fn effects_text(session: &Session) -> String {
    if session.settings.effects.is_empty() {
        texts::CHOOSE_EFFECTS.to_string()
    } else {
        format!(
            "Effects: {}\n\n{}",
            session.settings.effects.join(" → "),
            texts::CHOOSE_EFFECTS
        )
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn handle(&self, event: ChatEvent) {
        let mut reply = Reply {
            user_id: event.user_id,
            chat_id: event.chat_id,
            message: None,
        };
        match event.kind {
            ChatEventKind::FileUpload(file) => self.on_file(reply, file).await,
            ChatEventKind::Command { name, args } => {
                if let Err(e) = self.on_command(reply, &name, &args).await {
                    self.report(reply, &e).await;
                }
            }
            ChatEventKind::Action {
                token,
                callback_id,
                message,
            } => {
                reply.message = message;
                self.on_button(reply, &token, &callback_id).await;
            }
        }
    }
}
