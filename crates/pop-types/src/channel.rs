//! Channel types and path helpers.
//!
//! Channel paths form a tree under `/root`:
//! `/root/<lao>`, `/root/<lao>/<election>`, `/root/<lao>/social/chirps`,
//! `/root/<lao>/social/reactions`, `/root/<lao>/social/<pop-token>`,
//! `/root/<lao>/consensus`, `/root/<lao>/coin`,
//! `/root/<lao>/authentication` and `/root/<lao>/federation`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Path of the root channel.
pub const ROOT_CHANNEL: &str = "/root";

/// Declared type of a channel, selecting the handler for its messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Root,
    Lao,
    Election,
    Chirp,
    Reaction,
    Coin,
    Consensus,
    Authentication,
    Federation,
}

impl ChannelType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Root => "root",
            Self::Lao => "lao",
            Self::Election => "election",
            Self::Chirp => "chirp",
            Self::Reaction => "reaction",
            Self::Coin => "coin",
            Self::Consensus => "consensus",
            Self::Authentication => "authentication",
            Self::Federation => "federation",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "root" => Ok(Self::Root),
            "lao" => Ok(Self::Lao),
            "election" => Ok(Self::Election),
            "chirp" => Ok(Self::Chirp),
            "reaction" => Ok(Self::Reaction),
            "coin" => Ok(Self::Coin),
            "consensus" => Ok(Self::Consensus),
            "authentication" => Ok(Self::Authentication),
            "federation" => Ok(Self::Federation),
            _ => Err(format!("unknown channel type: {}", s)),
        }
    }
}

/// Borrowed view over a channel path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPath<'a>(&'a str);

impl<'a> ChannelPath<'a> {
    pub fn new(path: &'a str) -> Self {
        Self(path)
    }

    pub fn as_str(&self) -> &'a str {
        self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == ROOT_CHANNEL
    }

    /// Path segments after the leading slash (`/root/a/b` -> `[root, a, b]`).
    pub fn segments(&self) -> impl Iterator<Item = &'a str> {
        self.0.trim_start_matches('/').split('/')
    }

    /// Number of segments; the convergence loop orders channels by it.
    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// The LAO id for any path below `/root/<lao>`.
    pub fn lao_id(&self) -> Option<&'a str> {
        let mut segments = self.segments();
        match (segments.next(), segments.next()) {
            (Some("root"), Some(lao)) if !lao.is_empty() => Some(lao),
            _ => None,
        }
    }

    /// The `/root/<lao>` prefix of this path.
    pub fn lao_path(&self) -> Option<String> {
        self.lao_id().map(lao_channel)
    }

    pub fn last_segment(&self) -> &'a str {
        self.0.rsplit('/').next().unwrap_or_default()
    }

    /// Whether the path has the shape `/root/<lao>/federation`.
    pub fn is_federation(&self) -> bool {
        let segments: Vec<&str> = self.segments().collect();
        segments.len() == 3 && segments[0] == "root" && segments[2] == "federation"
    }
}

impl fmt::Display for ChannelPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub fn lao_channel(lao_id: &str) -> String {
    format!("{ROOT_CHANNEL}/{lao_id}")
}

pub fn election_channel(lao_id: &str, election_id: &str) -> String {
    format!("{ROOT_CHANNEL}/{lao_id}/{election_id}")
}

pub fn social_channel(lao_id: &str, name: &str) -> String {
    format!("{ROOT_CHANNEL}/{lao_id}/social/{name}")
}

pub fn chirps_channel(lao_id: &str) -> String {
    social_channel(lao_id, "chirps")
}

pub fn reactions_channel(lao_id: &str) -> String {
    social_channel(lao_id, "reactions")
}

pub fn federation_channel(lao_id: &str) -> String {
    format!("{ROOT_CHANNEL}/{lao_id}/federation")
}

/// The fixed sub-channels created together with a LAO, with their types.
pub fn lao_sub_channels(lao_id: &str) -> [(String, ChannelType); 5] {
    [
        (chirps_channel(lao_id), ChannelType::Chirp),
        (reactions_channel(lao_id), ChannelType::Reaction),
        (format!("{ROOT_CHANNEL}/{lao_id}/consensus"), ChannelType::Consensus),
        (format!("{ROOT_CHANNEL}/{lao_id}/coin"), ChannelType::Coin),
        (
            format!("{ROOT_CHANNEL}/{lao_id}/authentication"),
            ChannelType::Authentication,
        ),
    ]
}
