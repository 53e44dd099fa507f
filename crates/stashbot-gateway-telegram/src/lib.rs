//! Telegram gateway for Stashbot.
//!
//! Bridges the Telegram Bot API to the gateway protocol:
//!
//! - [`TelegramGateway`] long-polls for updates and hands each message to an
//!   [`EventHandler`] on its own task.
//! - [`TelegramReplySink`] sends and edits messages.
//! - [`TelegramMediaSource`] resolves a file id to its download path and
//!   streams the bytes from the Bot API file endpoint.
//!
//! Telegram flood control (`429 retry after N`) is reported as the protocol's
//! `RateLimited` errors.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use stashbot_gateway_protocol::{
    Attachment, Attachments, ByteStream, EventHandler, FetchError, InboundEvent, MediaSource,
    MessageHandle, ReplySink, SendError,
};
use teloxide::prelude::*;
use teloxide::types::{FileId, MessageId};
use teloxide::{ApiError, RequestError};
use tracing::{debug, info, warn};

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct TelegramGatewayConfig {
    pub token: String,
    /// Users allowed to talk to the bot. Empty means everyone.
    pub allowed_user_ids: Vec<u64>,
    /// Bot API base URL, without a trailing slash.
    pub api_url: String,
}

impl TelegramGatewayConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            allowed_user_ids: Vec::new(),
            api_url: "https://api.telegram.org".to_string(),
        }
    }

    fn is_allowed(&self, user_id: Option<u64>) -> bool {
        if self.allowed_user_ids.is_empty() {
            return true;
        }
        user_id.is_some_and(|id| self.allowed_user_ids.contains(&id))
    }

    fn file_url(&self, file_path: &str) -> String {
        format!(
            "{}/file/bot{}/{}",
            self.api_url.trim_end_matches('/'),
            self.token,
            file_path.trim_start_matches('/')
        )
    }
}

fn build_bot(config: &TelegramGatewayConfig) -> Result<Bot> {
    let bot = Bot::new(&config.token);
    if config.api_url == "https://api.telegram.org" {
        return Ok(bot);
    }
    let api_url = reqwest::Url::parse(&config.api_url)
        .with_context(|| format!("invalid Telegram API url {}", config.api_url))?;
    Ok(bot.set_api_url(api_url))
}

// ============================================================================
// Gateway
// ============================================================================

pub struct TelegramGateway {
    config: TelegramGatewayConfig,
    bot: Bot,
}

impl TelegramGateway {
    pub fn new(config: TelegramGatewayConfig) -> Result<Self> {
        let bot = build_bot(&config)?;
        Ok(Self { config, bot })
    }

    pub fn reply_sink(&self) -> TelegramReplySink {
        TelegramReplySink {
            bot: self.bot.clone(),
        }
    }

    pub fn media_source(&self) -> TelegramMediaSource {
        TelegramMediaSource::new(self.bot.clone(), self.config.clone())
    }

    /// Poll for updates until Ctrl-C.
    pub async fn run(self, handler: Arc<dyn EventHandler>) {
        info!(
            allowed_users = self.config.allowed_user_ids.len(),
            "Starting Telegram gateway"
        );
        let gateway = Arc::new(self);

        let endpoint = Update::filter_message().endpoint({
            let gateway = Arc::clone(&gateway);
            move |msg: Message| {
                let gateway = Arc::clone(&gateway);
                let handler = Arc::clone(&handler);
                async move {
                    gateway.dispatch(msg, handler);
                    respond(())
                }
            }
        });

        Dispatcher::builder(gateway.bot.clone(), endpoint)
            .enable_ctrlc_handler()
            .build()
            .dispatch()
            .await;
        info!("Telegram gateway stopped");
    }

    fn dispatch(&self, msg: Message, handler: Arc<dyn EventHandler>) {
        let sender = msg.from.as_ref().map(|user| user.id.0);
        if !self.config.is_allowed(sender) {
            warn!(chat = msg.chat.id.0, sender = ?sender, "Ignoring message from unlisted user");
            return;
        }

        let event = to_inbound_event(&msg);
        debug!(
            conversation = %event.conversation_id,
            message = %event.message_id,
            has_media = !event.attachments.is_empty(),
            "Telegram message received"
        );
        // Long transfers must not hold up the next update in the same chat.
        tokio::spawn(async move {
            handler.handle(event).await;
        });
    }
}

// ============================================================================
// Message conversion
// ============================================================================

fn to_inbound_event(msg: &Message) -> InboundEvent {
    let mut event = InboundEvent::new(msg.chat.id.0.to_string(), msg.id.0.to_string())
        .with_attachments(attachments(msg));
    event.sender_id = msg.from.as_ref().map(|user| user.id.0.to_string());
    event.forwarded = msg.forward_origin().is_some();
    event.text = msg.text().or_else(|| msg.caption()).map(str::to_string);
    event
}

fn attachments(msg: &Message) -> Attachments {
    let mut attachments = Attachments::default();

    if let Some(video) = msg.video() {
        let mut a = file_attachment(&video.file.id, &video.file.unique_id.0, video.file.size);
        a.declared_name = video.file_name.clone();
        a.mime_type = video.mime_type.as_ref().map(|m| m.to_string());
        attachments.video = Some(a);
    }
    if let Some(photos) = msg.photo() {
        attachments.photo = photos
            .iter()
            .map(|p| file_attachment(&p.file.id, &p.file.unique_id.0, p.file.size))
            .collect();
    }
    if let Some(doc) = msg.document() {
        let mut a = file_attachment(&doc.file.id, &doc.file.unique_id.0, doc.file.size);
        a.declared_name = doc.file_name.clone();
        a.mime_type = doc.mime_type.as_ref().map(|m| m.to_string());
        attachments.document = Some(a);
    }
    if let Some(animation) = msg.animation() {
        let mut a = file_attachment(
            &animation.file.id,
            &animation.file.unique_id.0,
            animation.file.size,
        );
        a.declared_name = animation.file_name.clone();
        a.mime_type = animation.mime_type.as_ref().map(|m| m.to_string());
        attachments.animation = Some(a);
    }
    attachments
}

fn file_attachment(id: &FileId, unique_id: &str, size: u32) -> Attachment {
    let mut attachment = Attachment::new(id.0.clone(), (size > 0).then_some(u64::from(size)));
    attachment.unique_id = Some(unique_id.to_string());
    attachment
}

// ============================================================================
// Reply sink
// ============================================================================

#[derive(Clone)]
pub struct TelegramReplySink {
    bot: Bot,
}

#[async_trait]
impl ReplySink for TelegramReplySink {
    async fn reply(&self, conversation_id: &str, text: &str) -> Result<MessageHandle, SendError> {
        let chat = parse_chat_id(conversation_id)?;
        let sent = self
            .bot
            .send_message(chat, text)
            .await
            .map_err(send_error)?;
        Ok(MessageHandle {
            conversation_id: conversation_id.to_string(),
            message_id: sent.id.0.to_string(),
        })
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), SendError> {
        let chat = parse_chat_id(&handle.conversation_id)?;
        let message = handle
            .message_id
            .parse::<i32>()
            .map(MessageId)
            .map_err(|_| SendError::Platform(format!("bad message id {}", handle.message_id)))?;

        match self.bot.edit_message_text(chat, message, text).await {
            Ok(_) => Ok(()),
            // Same text as before; nothing to do.
            Err(RequestError::Api(ApiError::MessageNotModified)) => Ok(()),
            Err(e) => Err(send_error(e)),
        }
    }
}

fn parse_chat_id(conversation_id: &str) -> Result<ChatId, SendError> {
    conversation_id
        .parse::<i64>()
        .map(ChatId)
        .map_err(|_| SendError::Platform(format!("bad chat id {}", conversation_id)))
}

fn send_error(e: RequestError) -> SendError {
    match e {
        RequestError::RetryAfter(wait) => SendError::RateLimited(wait.duration()),
        other => SendError::Platform(other.to_string()),
    }
}

// ============================================================================
// Media source
// ============================================================================

pub struct TelegramMediaSource {
    bot: Bot,
    config: TelegramGatewayConfig,
    http: reqwest::Client,
}

impl TelegramMediaSource {
    pub fn new(bot: Bot, config: TelegramGatewayConfig) -> Self {
        Self {
            bot,
            config,
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl MediaSource for TelegramMediaSource {
    async fn open(&self, file_identifier: &str) -> Result<ByteStream, FetchError> {
        let file = self
            .bot
            .get_file(FileId(file_identifier.to_string()))
            .await
            .map_err(fetch_error)?;

        let response = self
            .http
            .get(self.config.file_url(&file.path))
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(FetchError::Server(status.as_u16()));
        }
        if status.as_u16() == 429 {
            return Err(FetchError::RateLimited(std::time::Duration::from_secs(1)));
        }
        if !status.is_success() {
            return Err(FetchError::Unavailable(format!("file endpoint returned {}", status)));
        }

        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| FetchError::Transport(e.to_string())))
            .boxed())
    }
}

fn fetch_error(e: RequestError) -> FetchError {
    match e {
        RequestError::RetryAfter(wait) => FetchError::RateLimited(wait.duration()),
        RequestError::Api(api) => FetchError::Unavailable(api.to_string()),
        other => FetchError::Transport(other.to_string()),
    }
}

// ============================================================================
// Tests
// ============================================================================
