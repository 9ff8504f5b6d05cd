//! Speaker channels and the layouts that order them

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown channel: {0}")]
pub struct ChannelParseError(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Channel {
    FrontLeft,
    FrontRight,
    Center,
    CenterBack,
    LowFrequency,
    BackLeft,
    BackRight,
    SideLeft,
    SideRight,
    /// Mix of the front pair, or the best available stand-in
    Auto,
}

impl Channel {
    pub const ALL: [Channel; 10] = [
        Channel::FrontLeft,
        Channel::FrontRight,
        Channel::Center,
        Channel::CenterBack,
        Channel::LowFrequency,
        Channel::BackLeft,
        Channel::BackRight,
        Channel::SideLeft,
        Channel::SideRight,
        Channel::Auto,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::FrontLeft => "FrontLeft",
            Self::FrontRight => "FrontRight",
            Self::Center => "Center",
            Self::CenterBack => "CenterBack",
            Self::LowFrequency => "LowFrequency",
            Self::BackLeft => "BackLeft",
            Self::BackRight => "BackRight",
            Self::SideLeft => "SideLeft",
            Self::SideRight => "SideRight",
            Self::Auto => "Auto",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Channel {
    type Err = ChannelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let channel = match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Self::Auto,
            "left" | "frontleft" | "fl" => Self::FrontLeft,
            "right" | "frontright" | "fr" => Self::FrontRight,
            "center" | "c" => Self::Center,
            "centerback" | "backcenter" | "cb" => Self::CenterBack,
            "lowfrequency" | "lfe" => Self::LowFrequency,
            "backleft" | "bl" => Self::BackLeft,
            "backright" | "br" => Self::BackRight,
            "sideleft" | "sl" => Self::SideLeft,
            "sideright" | "sr" => Self::SideRight,
            _ => return Err(ChannelParseError(s.to_string())),
        };
        Ok(channel)
    }
}

impl TryFrom<String> for Channel {
    type Error = ChannelParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.name().to_string()
    }
}

/// Ordered set of channels as they appear in an interleaved frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelLayout {
    name: &'static str,
    channels: Vec<Channel>,
}

impl ChannelLayout {
    pub fn new(name: &'static str, channels: Vec<Channel>) -> Self {
        Self { name, channels }
    }

    pub fn mono() -> Self {
        Self::new("1.0 mono", vec![Channel::Center])
    }

    pub fn stereo() -> Self {
        Self::new("2.0 stereo", vec![Channel::FrontLeft, Channel::FrontRight])
    }

    pub fn surround_5_1() -> Self {
        Self::new(
            "5.1",
            vec![
                Channel::FrontLeft,
                Channel::FrontRight,
                Channel::Center,
                Channel::LowFrequency,
                Channel::BackLeft,
                Channel::BackRight,
            ],
        )
    }

    pub fn surround_7_1() -> Self {
        Self::new(
            "7.1 surround",
            vec![
                Channel::FrontLeft,
                Channel::FrontRight,
                Channel::Center,
                Channel::LowFrequency,
                Channel::BackLeft,
                Channel::BackRight,
                Channel::SideLeft,
                Channel::SideRight,
            ],
        )
    }

    /// Default layout for a device reporting `count` channels
    pub fn from_channel_count(count: usize) -> Option<Self> {
        match count {
            1 => Some(Self::mono()),
            2 => Some(Self::stereo()),
            6 => Some(Self::surround_5_1()),
            8 => Some(Self::surround_7_1()),
            _ => None,
        }
    }

    pub fn name(&self) -> &str {
        self.name
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Position of `channel` inside a frame
    pub fn index_of(&self, channel: Channel) -> Option<usize> {
        self.channels.iter().position(|&c| c == channel)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.index_of(channel).is_some()
    }

    /// The channel `Auto` resolves to; `Auto` itself means a mix of the front pair
    pub fn auto_alias(&self) -> Option<Channel> {
        let left = self.contains(Channel::FrontLeft);
        let right = self.contains(Channel::FrontRight);
        if left && right {
            Some(Channel::Auto)
        } else if left {
            Some(Channel::FrontLeft)
        } else if right {
            Some(Channel::FrontRight)
        } else if self.contains(Channel::Center) {
            Some(Channel::Center)
        } else {
            self.channels.first().copied()
        }
    }
}
