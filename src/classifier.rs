//! Audio classification predicate.
//!
//! Decides whether a message is a genuine music file. Voice notes are never
//! music, even when they carry audio attributes.

use crate::transport::ChannelMessage;

/// Pure predicate over a message snapshot; no I/O, deterministic.
///
/// A message is music when it carries a dedicated audio attachment, or a
/// generic document whose audio attributes are not flagged as voice. The
/// voice flag always wins.
pub fn is_music(message: &ChannelMessage) -> bool {
    // Voice exclusion takes precedence over any audio attribute.
    if message.voice {
        return false;
    }

    if let Some(audio) = &message.audio {
        if !audio.voice {
            return true;
        }
        return false;
    }

    if let Some(document) = &message.document {
        if let Some(audio) = &document.audio {
            return !audio.voice;
        }
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{music, text, voice_note};
    use crate::transport::{AudioAttrs, DocumentAttrs};

    #[test]
    fn music_file_is_classified() {
        assert!(is_music(&music(1)));
    }

    #[test]
    fn voice_note_is_excluded() {
        assert!(!is_music(&voice_note(2)));
    }

    #[test]
    fn plain_text_is_excluded() {
        assert!(!is_music(&text(3)));
    }

    #[test]
    fn voice_flag_wins_over_audio_attachment() {
        // Contradictory message: dedicated audio attachment plus voice flag.
        let mut msg = music(4);
        msg.voice = true;
        assert!(!is_music(&msg));
    }

    #[test]
    fn voice_flag_on_audio_attrs_wins() {
        let mut msg = music(5);
        if let Some(audio) = &mut msg.audio {
            audio.voice = true;
        }
        msg.voice = false;
        assert!(!is_music(&msg));
    }

    #[test]
    fn generic_document_with_audio_attrs_is_music() {
        let msg = ChannelMessage {
            id: 6,
            audio: None,
            voice: false,
            document: Some(DocumentAttrs {
                audio: Some(AudioAttrs {
                    voice: false,
                    duration: 240,
                    title: Some("hidden track".to_string()),
                    performer: None,
                }),
                mime_type: "application/octet-stream".to_string(),
                size: 6_000_000,
            }),
        };
        assert!(is_music(&msg));
    }

    #[test]
    fn document_without_audio_attrs_is_excluded() {
        let msg = ChannelMessage {
            id: 7,
            audio: None,
            voice: false,
            document: Some(DocumentAttrs {
                audio: None,
                mime_type: "application/pdf".to_string(),
                size: 100_000,
            }),
        };
        assert!(!is_music(&msg));
    }

    #[test]
    fn classification_is_deterministic() {
        let msg = music(8);
        let first = is_music(&msg);
        for _ in 0..10 {
            assert_eq!(is_music(&msg), first);
        }
    }
}
