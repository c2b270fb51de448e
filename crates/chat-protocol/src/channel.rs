//! The fixed, closed set of chat channels.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;
use crate::names::{StreamName, SubjectName};

/// Prefix of every channel stream name (`AGENT_CHAT_ROADMAP`, ...).
pub const STREAM_PREFIX: &str = "AGENT_CHAT_";

/// Prefix of every channel subject (`agent.chat.roadmap`, ...).
pub const SUBJECT_PREFIX: &str = "agent.chat.";

/// A topic agents publish to and read from.
///
/// The set is closed: an unknown identifier is rejected when parsed, never
/// discovered later as a missing registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Roadmap,
    Coordination,
    Errors,
}

impl Channel {
    /// Every channel, in registry order.
    pub const ALL: [Channel; 3] = [Channel::Roadmap, Channel::Coordination, Channel::Errors];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Roadmap => "roadmap",
            Channel::Coordination => "coordination",
            Channel::Errors => "errors",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Channel::Roadmap => "Agent roadmap discussions and planning",
            Channel::Coordination => "Parallel work coordination and task distribution",
            Channel::Errors => "Error reporting and debugging discussions",
        }
    }

    /// Name of the durable stream backing this channel.
    pub fn stream_name(self) -> StreamName {
        StreamName::from_string(format!(
            "{STREAM_PREFIX}{}",
            self.as_str().to_ascii_uppercase()
        ))
    }

    /// The single wildcard-free subject whose messages enter this channel's stream.
    pub fn subject(self) -> SubjectName {
        SubjectName::from_string(format!("{SUBJECT_PREFIX}{}", self.as_str()))
    }

    pub fn info(self) -> ChannelInfo {
        ChannelInfo {
            channel: self,
            description: self.description().to_owned(),
        }
    }

    /// Registry snapshot, in registry order.
    pub fn registry() -> Vec<ChannelInfo> {
        Self::ALL.iter().map(|channel| channel.info()).collect()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| ChatError::UnknownChannel(s.to_owned()))
    }
}

/// A channel together with its human-readable description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub channel: Channel,
    pub description: String,
}
