//! Operator commands.

use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    /// `/download` alone switches download mode on; with a URL it fetches
    /// that URL right away.
    Download(Option<String>),
    Stop,
    Upload,
    RetryUpload,
    RetryDownload,
    Status,
    Stats,
    Unknown(String),
}

impl Command {
    /// Parse a `/command` message. Returns `None` for plain text.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        // `/cmd@botname` is how group chats address one bot.
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

        let command = match name.as_str() {
            "start" | "help" => Command::Start,
            "download" => Command::Download((!args.is_empty()).then(|| args.to_string())),
            "stop" => Command::Stop,
            "upload" => Command::Upload,
            "retry_upload" => Command::RetryUpload,
            "retry_download" => Command::RetryDownload,
            "status" => Command::Status,
            "stats" => Command::Stats,
            _ => Command::Unknown(name),
        };
        Some(command)
    }
}

/// A plain-text http(s) URL, if the message is one.
pub fn parse_url(text: &str) -> Option<Url> {
    let text = text.trim();
    if !(text.starts_with("http://") || text.starts_with("https://")) {
        return None;
    }
    let first = text.split_whitespace().next()?;
    Url::parse(first).ok()
}

pub const HELP: &str = "👋 Stashbot saves forwarded media and links.\n\n\
/download - start saving forwarded media\n\
/download <url> - save a link now\n\
/stop - stop saving media\n\
/upload - sync downloads to the cloud\n\
/retry_upload - retry failed syncs\n\
/retry_download - retry failed downloads\n\
/status - show current state\n\
/stats - show download statistics";
