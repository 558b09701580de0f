//! # Topic Contract
//!
//! The fixed set of bus channels, their wire names, and the flag tokens
//! carried on the flag channels.
//!
//! ## Channel Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Bus Channels                                    │
//! │                                                                         │
//! │  Channel        Default topic     Direction            Payload         │
//! │  ─────────────  ────────────────  ───────────────────  ─────────────── │
//! │  RequestFlag    pc-to-rpi-flag    terminal → companion send/pull flag  │
//! │  RequestData    pc-to-rpi-data    terminal → companion document        │
//! │  ResponseData   rpi-to-pc-data    companion → terminal document        │
//! │  ResponseFlag   rpi-to-pc-flag    companion → terminal pull-end flag   │
//! │  Presence       rfid              reader → companion   card UID (hex)  │
//! │  Pin            pin               keypad → companion   4-digit PIN     │
//! │                                                                         │
//! │  PUSH:  RequestData(doc) ──► RequestFlag("send_start_flag")            │
//! │  PULL:  RequestFlag("pull-start-flag") ──► card tap ──► PIN            │
//! │         ──► ResponseData({uid: entry}) ──► ResponseFlag("pull-end-flag")│
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Topic names are agreed out-of-band; both nodes load the same
//! [`TopicMap`] from configuration and nothing on the bus negotiates them.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult, ValidationError};

// =============================================================================
// Channels
// =============================================================================

/// A logical bus channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    RequestFlag,
    RequestData,
    ResponseData,
    ResponseFlag,
    Presence,
    Pin,
}

impl Channel {
    /// Every channel, in contract order.
    pub const ALL: [Channel; 6] = [
        Channel::RequestFlag,
        Channel::RequestData,
        Channel::ResponseData,
        Channel::ResponseFlag,
        Channel::Presence,
        Channel::Pin,
    ];

    /// Stable logical name (used in logs and errors).
    pub fn logical_name(&self) -> &'static str {
        match self {
            Channel::RequestFlag => "request-flag",
            Channel::RequestData => "request-data",
            Channel::ResponseData => "response-data",
            Channel::ResponseFlag => "response-flag",
            Channel::Presence => "presence",
            Channel::Pin => "pin",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.logical_name())
    }
}

// =============================================================================
// Topic Map
// =============================================================================

/// Wire topic names for every channel.
///
/// ## Example Config Section
/// ```toml
/// [topics]
/// request_flag = "pc-to-rpi-flag"
/// request_data = "pc-to-rpi-data"
/// response_data = "rpi-to-pc-data"
/// response_flag = "rpi-to-pc-flag"
/// presence = "rfid"
/// pin = "pin"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicMap {
    pub request_flag: String,
    pub request_data: String,
    pub response_data: String,
    pub response_flag: String,
    pub presence: String,
    pub pin: String,
}

impl Default for TopicMap {
    fn default() -> Self {
        TopicMap {
            request_flag: "pc-to-rpi-flag".to_string(),
            request_data: "pc-to-rpi-data".to_string(),
            response_data: "rpi-to-pc-data".to_string(),
            response_flag: "rpi-to-pc-flag".to_string(),
            presence: "rfid".to_string(),
            pin: "pin".to_string(),
        }
    }
}

impl TopicMap {
    /// Returns the wire topic for a channel.
    pub fn name(&self, channel: Channel) -> &str {
        match channel {
            Channel::RequestFlag => &self.request_flag,
            Channel::RequestData => &self.request_data,
            Channel::ResponseData => &self.response_data,
            Channel::ResponseFlag => &self.response_flag,
            Channel::Presence => &self.presence,
            Channel::Pin => &self.pin,
        }
    }

    /// Resolves an inbound wire topic back to its channel.
    pub fn channel_of(&self, topic: &str) -> Option<Channel> {
        Channel::ALL
            .into_iter()
            .find(|channel| self.name(*channel) == topic)
    }

    /// Checks that every topic is a concrete, distinct MQTT topic name.
    pub fn validate(&self) -> CoreResult<()> {
        for (i, channel) in Channel::ALL.iter().enumerate() {
            let topic = self.name(*channel);
            if topic.is_empty() {
                return Err(ValidationError::Required {
                    field: format!("topics.{}", channel.logical_name()),
                }
                .into());
            }
            if topic.contains(|c: char| c == '+' || c == '#') {
                return Err(ValidationError::InvalidFormat {
                    field: format!("topics.{}", channel.logical_name()),
                    reason: "wildcards are not allowed in a fixed topic".to_string(),
                }
                .into());
            }
            if let Some(other) = Channel::ALL[..i]
                .iter()
                .find(|other| self.name(**other) == topic)
            {
                return Err(CoreError::DuplicateTopic {
                    topic: topic.to_string(),
                    first: other.logical_name(),
                    second: channel.logical_name(),
                });
            }
        }
        Ok(())
    }
}

// =============================================================================
// Flags
// =============================================================================

/// Content-free sentinel tokens carried on the flag channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flag {
    /// Sent on `request-flag` right after a pushed document.
    SendStart,

    /// Sent on `request-flag` to ask the companion for a document.
    PullStart,

    /// Sent on `response-flag` once the companion has replied to a pull.
    PullEnd,
}

impl Flag {
    /// The literal token on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::SendStart => "send_start_flag",
            Flag::PullStart => "pull-start-flag",
            Flag::PullEnd => "pull-end-flag",
        }
    }

    /// Parses a flag payload. Surrounding whitespace is ignored.
    pub fn parse(payload: &[u8]) -> CoreResult<Self> {
        let text = String::from_utf8_lossy(payload);
        match text.trim() {
            "send_start_flag" => Ok(Flag::SendStart),
            "pull-start-flag" => Ok(Flag::PullStart),
            "pull-end-flag" => Ok(Flag::PullEnd),
            other => Err(CoreError::UnknownFlag(other.to_string())),
        }
    }
}

impl std::fmt::Display for Flag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Node Role
// =============================================================================

/// Which side of the handshake this process plays.
///
/// ```text
/// TERMINAL (desk)                     COMPANION (embedded)
/// ─────────────────                   ────────────────────
/// • Issues upload / download / save   • Holds the canonical remote copy
/// • Awaits response-data on pull      • Gates pulls on card tap + PIN
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    #[default]
    Terminal,
    Companion,
}

impl NodeRole {
    /// Channels this role subscribes to after every connect.
    ///
    /// A node never subscribes to its own outbound channels: the broker
    /// would echo every published document back to it.
    pub fn inbound_channels(&self) -> &'static [Channel] {
        match self {
            NodeRole::Terminal => &[Channel::ResponseData, Channel::ResponseFlag],
            NodeRole::Companion => &[
                Channel::RequestFlag,
                Channel::RequestData,
                Channel::Presence,
                Channel::Pin,
            ],
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Terminal => write!(f, "terminal"),
            NodeRole::Companion => write!(f, "companion"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "terminal" | "pc" | "desk" => Ok(NodeRole::Terminal),
            "companion" | "rpi" | "device" => Ok(NodeRole::Companion),
            other => Err(CoreError::UnknownRole(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_topics_are_valid() {
        let topics = TopicMap::default();
        assert!(topics.validate().is_ok());
        assert_eq!(topics.name(Channel::ResponseData), "rpi-to-pc-data");
    }

    #[test]
    fn test_channel_lookup() {
        let topics = TopicMap::default();
        assert_eq!(topics.channel_of("pc-to-rpi-flag"), Some(Channel::RequestFlag));
        assert_eq!(topics.channel_of("rfid"), Some(Channel::Presence));
        assert_eq!(topics.channel_of("weather"), None);
    }

    #[test]
    fn test_duplicate_topic_rejected() {
        let topics = TopicMap {
            response_data: "pc-to-rpi-data".to_string(),
            ..Default::default()
        };
        match topics.validate() {
            Err(CoreError::DuplicateTopic { first, second, .. }) => {
                assert_eq!(first, "request-data");
                assert_eq!(second, "response-data");
            }
            other => panic!("expected DuplicateTopic, got {:?}", other),
        }
    }

    #[test]
    fn test_wildcard_and_empty_topic_rejected() {
        let wildcard = TopicMap {
            presence: "rfid/#".to_string(),
            ..Default::default()
        };
        assert!(wildcard.validate().is_err());

        let empty = TopicMap {
            pin: String::new(),
            ..Default::default()
        };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_flag_tokens() {
        assert_eq!(Flag::SendStart.as_str(), "send_start_flag");
        assert_eq!(Flag::parse(b"pull-start-flag").unwrap(), Flag::PullStart);
        assert_eq!(Flag::parse(b"pull-end-flag\n").unwrap(), Flag::PullEnd);
        assert!(Flag::parse(b"send-start-flag").is_err());
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!("terminal".parse::<NodeRole>().unwrap(), NodeRole::Terminal);
        assert_eq!("RPI".parse::<NodeRole>().unwrap(), NodeRole::Companion);
        assert!("router".parse::<NodeRole>().is_err());
    }

    #[test]
    fn test_role_subscriptions() {
        let terminal = NodeRole::Terminal.inbound_channels();
        assert_eq!(terminal, &[Channel::ResponseData, Channel::ResponseFlag]);
        assert!(!terminal.contains(&Channel::RequestData));
        assert!(!terminal.contains(&Channel::RequestFlag));

        let companion = NodeRole::Companion.inbound_channels();
        assert!(companion.contains(&Channel::Presence));
        assert!(!companion.contains(&Channel::ResponseData));
    }
}
