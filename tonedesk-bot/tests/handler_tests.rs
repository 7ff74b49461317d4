//! Chat handler flows against a recording transport

mod common;

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use tonedesk_bot::bot::{EventHandler, Handler};
use tonedesk_bot::transport::{
    ChatEvent, ChatEventKind, ChatId, ChatTransport, ChoiceGrid, MessageRef, TransportError,
};
use tonedesk_bot::orchestrator::ConfigAction;
use tonedesk_common::session::{EqBand, SessionPhase};
use tonedesk_common::time::ManualClock;

use common::{file_ref, Harness};

const USER: i64 = 7;

#[derive(Debug, Clone, PartialEq)]
enum Outbound {
    Sent { text: String, tokens: Vec<String> },
    Edited { message_id: i64, text: String, tokens: Vec<String> },
    File { name: String, caption: String, bytes: u64 },
    Ack { toast: Option<String> },
}

impl Outbound {
    fn text(&self) -> &str {
        match self {
            Outbound::Sent { text, .. } | Outbound::Edited { text, .. } => text,
            Outbound::File { caption, .. } => caption,
            Outbound::Ack { toast } => toast.as_deref().unwrap_or(""),
        }
    }

    fn tokens(&self) -> &[String] {
        match self {
            Outbound::Sent { tokens, .. } | Outbound::Edited { tokens, .. } => tokens,
            _ => &[],
        }
    }
}

#[derive(Default)]
struct RecordingTransport {
    log: Mutex<Vec<Outbound>>,
    next_id: Mutex<i64>,
}

fn tokens_of(choices: Option<&ChoiceGrid>) -> Vec<String> {
    choices
        .map(|grid| grid.iter().flatten().map(|c| c.token.clone()).collect())
        .unwrap_or_default()
}

impl RecordingTransport {
    fn take(&self) -> Vec<Outbound> {
        std::mem::take(&mut *self.log.lock().unwrap())
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_message(
        &self,
        chat_id: ChatId,
        text: &str,
        choices: Option<&ChoiceGrid>,
    ) -> Result<MessageRef, TransportError> {
        self.log.lock().unwrap().push(Outbound::Sent {
            text: text.to_string(),
            tokens: tokens_of(choices),
        });
        let mut id = self.next_id.lock().unwrap();
        *id += 1;
        Ok(MessageRef {
            chat_id,
            message_id: *id,
        })
    }

    async fn edit_message(
        &self,
        message: MessageRef,
        text: &str,
        choices: Option<&ChoiceGrid>,
    ) -> Result<(), TransportError> {
        self.log.lock().unwrap().push(Outbound::Edited {
            message_id: message.message_id,
            text: text.to_string(),
            tokens: tokens_of(choices),
        });
        Ok(())
    }

    async fn send_file(
        &self,
        chat_id: ChatId,
        path: &Path,
        file_name: &str,
        caption: &str,
    ) -> Result<MessageRef, TransportError> {
        let bytes = std::fs::metadata(path)?.len();
        self.log.lock().unwrap().push(Outbound::File {
            name: file_name.to_string(),
            caption: caption.to_string(),
            bytes,
        });
        Ok(MessageRef {
            chat_id,
            message_id: 999,
        })
    }

    async fn acknowledge(&self, _callback_id: &str, text: Option<&str>) -> Result<(), TransportError> {
        self.log.lock().unwrap().push(Outbound::Ack {
            toast: text.map(str::to_string),
        });
        Ok(())
    }
}

struct Bot {
    harness: Harness,
    transport: Arc<RecordingTransport>,
    handler: Handler,
}

impl Bot {
    fn new() -> Self {
        Self::with_harness(Harness::new())
    }

    fn with_harness(harness: Harness) -> Self {
        let transport = Arc::new(RecordingTransport::default());
        let handler = Handler::new(harness.orchestrator.clone(), transport.clone());
        Self {
            harness,
            transport,
            handler,
        }
    }

    async fn command(&self, name: &str, args: &str) -> Vec<Outbound> {
        self.handler
            .handle(ChatEvent {
                user_id: USER,
                chat_id: USER,
                kind: ChatEventKind::Command {
                    name: name.to_string(),
                    args: args.to_string(),
                },
            })
            .await;
        self.transport.take()
    }

    async fn press(&self, token: &str) -> Vec<Outbound> {
        self.handler
            .handle(ChatEvent {
                user_id: USER,
                chat_id: USER,
                kind: ChatEventKind::Action {
                    token: token.to_string(),
                    callback_id: "cb".to_string(),
                    message: Some(MessageRef {
                        chat_id: USER,
                        message_id: 500,
                    }),
                },
            })
            .await;
        self.transport.take()
    }

    async fn upload(&self) -> Vec<Outbound> {
        self.harness.serve_tone("song");
        self.handler
            .handle(ChatEvent {
                user_id: USER,
                chat_id: USER,
                kind: ChatEventKind::FileUpload(file_ref("song", "My Song.wav")),
            })
            .await;
        self.transport.take()
    }
}

fn has_token(out: &Outbound, token: &str) -> bool {
    out.tokens().iter().any(|t| t == token)
}

#[tokio::test]
async fn test_start_shows_welcome() {
    let bot = Bot::new();
    let out = bot.command("start", "").await;
    assert_eq!(out.len(), 1);
    assert!(out[0].text().contains("Welcome"));
    assert!(has_token(&out[0], "help_main"));
}

#[tokio::test]
async fn test_upload_shows_file_info_and_options() {
    let bot = Bot::new();
    let out = bot.upload().await;

    assert!(matches!(&out[0], Outbound::Sent { text, .. } if text.contains("My Song.wav")));
    let last = out.last().unwrap();
    assert!(matches!(last, Outbound::Edited { message_id: 1, .. }));
    assert!(last.text().contains("8000 Hz"));
    assert!(has_token(last, "confirm_process"));
    assert!(has_token(last, "process_convert"));
}

#[tokio::test]
async fn test_eq_command_feedback() {
    let bot = Bot::new();
    let out = bot.command("eq", "--100hz +3db").await;
    assert!(out[0].text().contains("No active file"));

    bot.upload().await;
    let out = bot.command("eq", "louder").await;
    assert!(out[0].text().contains("/eq --100hz"));

    let out = bot.command("eq", "--100hz +3db --1khz -2db").await;
    assert!(out[0].text().contains("100 Hz +3.0 dB"));
    assert!(out[0].text().contains("1000 Hz -2.0 dB"));
    assert!(has_token(&out[0], "confirm_process"));
}

#[tokio::test]
async fn test_duplicate_effect_gets_a_toast() {
    let bot = Bot::new();
    bot.upload().await;

    let out = bot.press("effect_reverb").await;
    assert!(out.iter().any(|o| o.text().contains("reverb")));
    let out = bot.press("effect_reverb").await;
    assert_eq!(
        out,
        vec![Outbound::Ack {
            toast: Some("reverb is already added".to_string())
        }]
    );

    let session = bot.harness.orchestrator.session(USER).await.unwrap().unwrap();
    assert_eq!(session.settings.effects, vec!["reverb".to_string()]);
}

#[tokio::test]
async fn test_lossy_format_asks_for_bitrate() {
    let bot = Bot::new();
    bot.upload().await;

    let out = bot.press("format_ogg").await;
    assert!(out.iter().any(|o| has_token(o, "bitrate_320k")));
    let out = bot.press("format_flac").await;
    assert!(out.iter().any(|o| has_token(o, "confirm_process")));
    let out = bot.press("format_ape").await;
    assert!(matches!(&out[0], Outbound::Ack { toast: Some(t) } if t.contains("ape")));
}

#[tokio::test]
async fn test_process_delivers_and_offers_continuation() {
    let bot = Bot::new();
    bot.upload().await;
    bot.press("format_flac").await;

    let out = bot.press("confirm_process").await;
    assert_eq!(out[0], Outbound::Ack { toast: None });
    assert!(out[1].text().contains("Processing"));

    let file = out
        .iter()
        .find_map(|o| match o {
            Outbound::File { name, bytes, .. } => Some((name.clone(), *bytes)),
            _ => None,
        })
        .unwrap();
    assert_eq!(file.0, "My Song_processed.flac");
    assert!(file.1 > 0);

    let follow_up = out.last().unwrap();
    assert!(has_token(follow_up, "continue_editing"));
    assert!(has_token(follow_up, "finish"));
    assert_eq!(
        bot.harness.orchestrator.state_of(USER).await.unwrap(),
        Some(SessionPhase::AwaitingContinuation)
    );

    bot.press("continue_editing").await;
    assert_eq!(
        bot.harness.orchestrator.state_of(USER).await.unwrap(),
        Some(SessionPhase::AwaitingConfiguration)
    );
    let out = bot.press("process_options").await;
    assert!(out.iter().any(|o| o.text().contains("FLAC")));

    bot.press("confirm_process").await;
    let out = bot.press("finish").await;
    assert!(out.iter().any(|o| o.text().contains("Session ended")));
    assert!(bot.harness.orchestrator.state_of(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_failed_processing_shows_options_again() {
    let bot = Bot::new();
    bot.upload().await;
    bot.harness
        .toolkit
        .fail_encode
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let out = bot.press("confirm_process").await;
    let last = out.last().unwrap();
    assert!(last.text().contains("Processing failed"));
    assert!(has_token(last, "confirm_process"));
}

#[tokio::test]
async fn test_cancel_command_clears_session() {
    let bot = Bot::new();
    let out = bot.command("cancel", "").await;
    assert!(out[0].text().contains("Nothing to cancel"));

    bot.upload().await;
    let out = bot.command("cancel", "").await;
    assert!(out[0].text().contains("Cancelled"));
    assert!(bot.harness.orchestrator.state_of(USER).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unknown_token_is_acknowledged() {
    let bot = Bot::new();
    let out = bot.press("self_destruct").await;
    assert_eq!(out.len(), 1);
    assert!(matches!(&out[0], Outbound::Ack { toast: Some(_) }));
}

#[tokio::test]
async fn test_custom_position_command() {
    let bot = Bot::new();
    bot.upload().await;

    let out = bot.command("3d", "-45 10").await;
    assert!(out[0].text().contains("azimuth -45°, elevation 10°"));

    let out = bot.command("3d", "400").await;
    assert!(out[0].text().contains("Azimuth 400°"));
}

#[tokio::test]
async fn test_expiry_during_processing_is_reported() {
    let clock = Arc::new(ManualClock::new(chrono::Utc::now()));
    let bot = Bot::with_harness(Harness::with_clock(clock.clone()));
    bot.upload().await;
    let orchestrator = &bot.harness.orchestrator;
    orchestrator
        .configure(USER, ConfigAction::AddEqBand(EqBand::new(1000.0, 3.0)))
        .await
        .unwrap();
    orchestrator
        .configure(USER, ConfigAction::AddEffect("delay".into()))
        .await
        .unwrap();
    bot.harness.toolkit.hold_render.store(true, Ordering::SeqCst);

    let (out, _) = tokio::join!(bot.press("confirm_process"), async {
        bot.harness.toolkit.entered.notified().await;
        clock.advance(chrono::Duration::minutes(6));
        bot.harness.store.sweep_expired().await.unwrap();
        bot.harness.toolkit.release.notify_one();
    });

    assert!(out.last().unwrap().text().contains("session expired"));
    assert!(!out.iter().any(|o| matches!(o, Outbound::File { .. })));
    assert!(bot.harness.orchestrator.state_of(USER).await.unwrap().is_none());
}
