//! Per-entity, per-channel enrichment watermarks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Enrichment channel. Each keeps its own cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Twitter,
    Linkedin,
    Github,
    Arxiv,
    /// Open web search.
    General,
}

impl Channel {
    pub const ALL: [Channel; 5] = [
        Channel::Twitter,
        Channel::Linkedin,
        Channel::Github,
        Channel::Arxiv,
        Channel::General,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Twitter => "twitter",
            Channel::Linkedin => "linkedin",
            Channel::Github => "github",
            Channel::Arxiv => "arxiv",
            Channel::General => "general",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown channel '{s}'"))
    }
}

/// "Scanned up to `cutoff`" for one entity on one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelWatermark {
    pub entity_id: String,
    pub channel: Channel,
    pub cutoff: DateTime<Utc>,
}
