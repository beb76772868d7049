//! Channel reference parsing and entity resolution

use grammers_client::types::peer::Peer;
use grammers_client::Client;

use crate::error::{Error, Result};

/// Reduce a user-submitted channel reference to a bare username or id.
/// Accepts `@name`, `name`, `https://t.me/name` and `t.me/name` forms.
pub fn normalize_channel_ref(input: &str) -> String {
    let trimmed = input.trim();
    let without_scheme = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .unwrap_or(trimmed);
    let without_host = without_scheme
        .strip_prefix("t.me/")
        .or_else(|| without_scheme.strip_prefix("telegram.me/"))
        .unwrap_or(without_scheme);
    let name = without_host.trim_start_matches('@');
    // Drop anything after the username (trailing slash, query string).
    name.split(['/', '?']).next().unwrap_or(name).to_string()
}

/// Resolve a channel or group reference to a Peer. Usernames and links go
/// through username resolution; numeric ids are searched in dialogs.
pub async fn resolve_channel(client: &Client, reference: &str) -> Result<Peer> {
    let normalized = normalize_channel_ref(reference);

    if let Ok(target_id) = normalized.parse::<i64>() {
        return resolve_by_id(client, target_id).await;
    }

    client
        .resolve_username(&normalized)
        .await
        .map_err(|e| Error::TelegramError(e.to_string()))?
        .ok_or_else(|| Error::ChannelNotFound(reference.to_string()))
}

/// Find a channel or group by id among the account's dialogs.
async fn resolve_by_id(client: &Client, target_id: i64) -> Result<Peer> {
    let mut dialogs = client.iter_dialogs();

    while let Some(dialog) = dialogs
        .next()
        .await
        .map_err(|e| Error::TelegramError(e.to_string()))?
    {
        match &dialog.peer {
            Peer::Channel(channel) => {
                if channel.raw.id == target_id {
                    return Ok(Peer::Channel(channel.clone()));
                }
            }
            Peer::Group(group) => {
                let group_id = match &group.raw {
                    grammers_tl_types::enums::Chat::Empty(c) => c.id,
                    grammers_tl_types::enums::Chat::Chat(c) => c.id,
                    grammers_tl_types::enums::Chat::Forbidden(c) => c.id,
                    grammers_tl_types::enums::Chat::Channel(c) => c.id,
                    grammers_tl_types::enums::Chat::ChannelForbidden(c) => c.id,
                };
                if group_id == target_id {
                    return Ok(Peer::Group(group.clone()));
                }
            }
            Peer::User(_) => {}
        }
    }

    Err(Error::ChannelNotFound(format!(
        "Channel {} not found in dialogs",
        target_id
    )))
}

/// Get the display name for a peer
pub fn peer_name(peer: &Peer) -> String {
    peer.name()
        .map(|s| s.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_plain_username() {
        assert_eq!(normalize_channel_ref("music_channel"), "music_channel");
    }

    #[test]
    fn normalize_at_prefix() {
        assert_eq!(normalize_channel_ref("@music_channel"), "music_channel");
    }

    #[test]
    fn normalize_https_link() {
        assert_eq!(
            normalize_channel_ref("https://t.me/music_channel"),
            "music_channel"
        );
    }

    #[test]
    fn normalize_link_without_scheme() {
        assert_eq!(normalize_channel_ref("t.me/music_channel"), "music_channel");
    }

    #[test]
    fn normalize_link_with_trailing_slash() {
        assert_eq!(
            normalize_channel_ref("https://t.me/music_channel/"),
            "music_channel"
        );
    }

    #[test]
    fn normalize_strips_whitespace() {
        assert_eq!(normalize_channel_ref("  @music_channel "), "music_channel");
    }

    #[test]
    fn normalize_keeps_numeric_id() {
        assert_eq!(normalize_channel_ref("123456789"), "123456789");
    }
}
