use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Message text is truncated (not rejected) beyond this many characters.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Attached file names are truncated beyond this many characters.
pub const MAX_FILE_NAME_CHARS: usize = 255;

/// Longest accepted reaction emoji, in characters.
pub const MAX_EMOJI_CHARS: usize = 12;

/// Voice-message waveforms are capped at this many samples.
pub const MAX_WAVEFORM_SAMPLES: usize = 80;

/// Conversation page size bounds.
pub const DEFAULT_PAGE_LIMIT: u32 = 30;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Delivery state of a message. The derived ordering is the lifecycle order:
/// a message only ever advances `Sent -> Delivered -> Seen`, never backwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Seen,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "sent",
            Self::Delivered => "delivered",
            Self::Seen => "seen",
        }
    }
}

impl FromStr for MessageStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(Self::Sent),
            "delivered" => Ok(Self::Delivered),
            "seen" => Ok(Self::Seen),
            _ => Err(UnknownVariant),
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The five recognized media attachment kinds. Classification happens in the
/// external upload service; the core only validates and relays the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Document,
    Audio,
    Voice,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Audio => "audio",
            Self::Voice => "voice",
        }
    }
}

impl FromStr for MediaKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            "document" => Ok(Self::Document),
            "audio" => Ok(Self::Audio),
            "voice" => Ok(Self::Voice),
            _ => Err(UnknownVariant),
        }
    }
}

/// Scope of a message deletion: hide from the acting user only, or tombstone
/// the row for both participants.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteMode {
    Me,
    #[default]
    Everyone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownVariant;

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("unknown variant")
    }
}

impl std::error::Error for UnknownVariant {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ordering_matches_lifecycle() {
        assert!(MessageStatus::Sent < MessageStatus::Delivered);
        assert!(MessageStatus::Delivered < MessageStatus::Seen);
    }

    #[test]
    fn status_round_trips_through_str() {
        for s in [MessageStatus::Sent, MessageStatus::Delivered, MessageStatus::Seen] {
            assert_eq!(s.as_str().parse::<MessageStatus>().unwrap(), s);
        }
        assert!("read".parse::<MessageStatus>().is_err());
    }

    #[test]
    fn media_kind_rejects_unknown() {
        assert_eq!("voice".parse::<MediaKind>().unwrap(), MediaKind::Voice);
        assert!("sticker".parse::<MediaKind>().is_err());
    }

    #[test]
    fn delete_mode_defaults_to_everyone() {
        assert_eq!(DeleteMode::default(), DeleteMode::Everyone);
    }
}
