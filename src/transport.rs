//! Transport boundary between the relay core and the MTProto client.
//!
//! The core only ever talks to [`Transport`]: one method to fetch a history
//! page older than a cursor, one to forward a message to the target bot.
//! `ChannelTransport` is the grammers-backed implementation; tests substitute
//! scripted mocks.

use std::time::Duration;

use async_trait::async_trait;
use grammers_client::types::peer::Peer;
use grammers_client::types::Message;
use grammers_client::InvocationError;
use regex::Regex;

use crate::session::TelegramClient;

/// Fallback flood wait when the error carries no usable duration.
pub const DEFAULT_FLOOD_WAIT_SECS: u64 = 30;

/// Audio attributes attached to a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioAttrs {
    /// Voice-note flag; voice notes are never music.
    pub voice: bool,
    pub duration: i32,
    pub title: Option<String>,
    pub performer: Option<String>,
}

/// Generic document attachment, possibly carrying audio attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAttrs {
    pub audio: Option<AudioAttrs>,
    pub mime_type: String,
    pub size: i64,
}

/// Snapshot of one channel message, reduced to what classification and
/// forwarding need. Built once from the raw TL message and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    /// Message id within the channel; ids decrease as pagination walks back.
    pub id: i32,
    /// Dedicated audio attachment (audio/* mime with audio attributes).
    pub audio: Option<AudioAttrs>,
    /// Set when the message is a voice note.
    pub voice: bool,
    /// Any document attachment, audio or not.
    pub document: Option<DocumentAttrs>,
}

impl ChannelMessage {
    /// Message with no media at all (plain text, photo, ...).
    pub fn bare(id: i32) -> Self {
        Self {
            id,
            audio: None,
            voice: false,
            document: None,
        }
    }
}

/// Errors surfaced by transport operations, already classified for the
/// retry policies in the paginator and forward session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Flood control; wait at least `retry_after` before the next call.
    RateLimited { retry_after: Duration },
    /// Retryable network or server failure.
    Transient(String),
    /// Session is not authorized; fatal for the whole run.
    Auth,
    /// Entity could not be resolved.
    NotFound(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::RateLimited { retry_after } => {
                write!(f, "rate limited, retry after {}s", retry_after.as_secs())
            }
            TransportError::Transient(msg) => write!(f, "transient transport error: {}", msg),
            TransportError::Auth => write!(f, "authorization required"),
            TransportError::NotFound(what) => write!(f, "not found: {}", what),
        }
    }
}

/// Platform operations the relay core depends on. One implementor instance
/// is bound to a single source channel and target bot, and owns one MTProto
/// connection; calls on the same instance must not overlap.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch up to `page_size` messages strictly older than `before_id`
    /// (0 = newest), newest-first. An empty page means the history is
    /// exhausted.
    async fn fetch_history_page(
        &self,
        before_id: i32,
        page_size: usize,
    ) -> Result<Vec<ChannelMessage>, TransportError>;

    /// Forward one source-channel message to the target bot.
    async fn forward(&self, message_id: i32) -> Result<(), TransportError>;
}

/// grammers-backed transport bound to a resolved source channel and target
/// bot. Owns its `TelegramClient`; dropping the transport tears down the
/// connection (one connection per user session).
pub struct ChannelTransport {
    client: TelegramClient,
    source: Peer,
    target: Peer,
}

impl ChannelTransport {
    pub fn new(client: TelegramClient, source: Peer, target: Peer) -> Self {
        Self {
            client,
            source,
            target,
        }
    }

    pub fn source(&self) -> &Peer {
        &self.source
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn fetch_history_page(
        &self,
        before_id: i32,
        page_size: usize,
    ) -> Result<Vec<ChannelMessage>, TransportError> {
        let mut iter = self.client.iter_messages(&self.source).limit(page_size);
        if before_id > 0 {
            iter = iter.offset_id(before_id);
        }

        let mut page = Vec::with_capacity(page_size);
        loop {
            match iter.next().await {
                Ok(Some(msg)) => {
                    page.push(channel_message(&msg));
                    if page.len() >= page_size {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => return Err(classify_error(&err)),
            }
        }
        Ok(page)
    }

    async fn forward(&self, message_id: i32) -> Result<(), TransportError> {
        self.client
            .forward_messages(&self.target, &[message_id], &self.source)
            .await
            .map_err(|err| classify_error(&err))?;
        Ok(())
    }
}

/// Reduce a grammers message to the relay's snapshot form.
pub fn channel_message(msg: &Message) -> ChannelMessage {
    use grammers_tl_types::enums::{Document, DocumentAttribute, MessageMedia};

    let mut snapshot = ChannelMessage::bare(msg.raw.id());

    let grammers_tl_types::enums::Message::Message(raw) = &msg.raw else {
        return snapshot;
    };
    let Some(MessageMedia::Document(media)) = &raw.media else {
        return snapshot;
    };
    let Some(Document::Document(doc)) = &media.document else {
        return snapshot;
    };

    let mut audio_attr = None;
    for attribute in &doc.attributes {
        if let DocumentAttribute::Audio(audio) = attribute {
            audio_attr = Some(AudioAttrs {
                voice: audio.voice,
                duration: audio.duration,
                title: audio.title.clone(),
                performer: audio.performer.clone(),
            });
        }
    }

    if let Some(attrs) = &audio_attr {
        if attrs.voice {
            snapshot.voice = true;
        } else if doc.mime_type.starts_with("audio/") {
            snapshot.audio = Some(attrs.clone());
        }
    }

    snapshot.document = Some(DocumentAttrs {
        audio: audio_attr,
        mime_type: doc.mime_type.clone(),
        size: doc.size,
    });

    snapshot
}

/// Map an invocation error onto the transport taxonomy. Flood waits carry
/// the server-suggested duration when present; otherwise it is scraped from
/// the error text, falling back to [`DEFAULT_FLOOD_WAIT_SECS`].
pub fn classify_error(err: &InvocationError) -> TransportError {
    if let InvocationError::Rpc(rpc) = err {
        if rpc.name.contains("FLOOD") {
            let secs = rpc
                .value
                .map(u64::from)
                .or_else(|| parse_retry_after(&err.to_string()))
                .unwrap_or(DEFAULT_FLOOD_WAIT_SECS);
            return TransportError::RateLimited {
                retry_after: Duration::from_secs(secs),
            };
        }
        if rpc.code == 401 || rpc.name.contains("AUTH_KEY") || rpc.name.contains("SESSION") {
            return TransportError::Auth;
        }
    }

    let text = err.to_string();
    if text.contains("FLOOD") || text.contains("RetryAfter") {
        let secs = parse_retry_after(&text).unwrap_or(DEFAULT_FLOOD_WAIT_SECS);
        return TransportError::RateLimited {
            retry_after: Duration::from_secs(secs),
        };
    }
    TransportError::Transient(text)
}

/// Extract a wait duration (seconds) from an error message such as
/// "FLOOD_WAIT_42" or "RetryAfter: 12.5". Fractional seconds round up.
pub fn parse_retry_after(text: &str) -> Option<u64> {
    let re = Regex::new(r"(\d+(?:\.\d+)?)").ok()?;
    let captured = re.captures(text)?.get(1)?.as_str();
    let secs: f64 = captured.parse().ok()?;
    Some(secs.ceil() as u64)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// A genuine music file.
    pub fn music(id: i32) -> ChannelMessage {
        let attrs = AudioAttrs {
            voice: false,
            duration: 180,
            title: Some(format!("track {}", id)),
            performer: Some("artist".to_string()),
        };
        ChannelMessage {
            id,
            audio: Some(attrs.clone()),
            voice: false,
            document: Some(DocumentAttrs {
                audio: Some(attrs),
                mime_type: "audio/mpeg".to_string(),
                size: 4_000_000,
            }),
        }
    }

    /// A voice note (excluded from classification).
    pub fn voice_note(id: i32) -> ChannelMessage {
        ChannelMessage {
            id,
            audio: None,
            voice: true,
            document: Some(DocumentAttrs {
                audio: Some(AudioAttrs {
                    voice: true,
                    duration: 12,
                    title: None,
                    performer: None,
                }),
                mime_type: "audio/ogg".to_string(),
                size: 80_000,
            }),
        }
    }

    /// A plain text message.
    pub fn text(id: i32) -> ChannelMessage {
        ChannelMessage::bare(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_retry_after_integer() {
        assert_eq!(parse_retry_after("FLOOD_WAIT_42"), Some(42));
    }

    #[test]
    fn parse_retry_after_fractional_rounds_up() {
        assert_eq!(parse_retry_after("RetryAfter: 12.3 seconds"), Some(13));
    }

    #[test]
    fn parse_retry_after_without_number() {
        assert_eq!(parse_retry_after("Flood control exceeded"), None);
    }

    #[test]
    fn transport_error_display() {
        let err = TransportError::RateLimited {
            retry_after: Duration::from_secs(30),
        };
        assert!(err.to_string().contains("30"));

        let err = TransportError::Transient("connection reset".to_string());
        assert!(err.to_string().contains("connection reset"));

        assert!(TransportError::Auth.to_string().contains("authorization"));
    }

    #[test]
    fn bare_message_has_no_media() {
        let msg = ChannelMessage::bare(5);
        assert_eq!(msg.id, 5);
        assert!(msg.audio.is_none());
        assert!(!msg.voice);
        assert!(msg.document.is_none());
    }

    #[test]
    fn testing_fixtures_are_consistent() {
        let music = testing::music(1);
        assert!(music.audio.is_some());
        assert!(!music.voice);

        let voice = testing::voice_note(2);
        assert!(voice.audio.is_none());
        assert!(voice.voice);

        let text = testing::text(3);
        assert!(text.document.is_none());
    }
}
