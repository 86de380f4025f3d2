use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The three engagement actions a tracking URL can carry. Serializes as the
/// single-character code the link codec's JSON uses (`act`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Click,
    Open,
    InitialOpen,
}

impl Action {
    /// The single character used on the wire (`c`, `o`, `i`).
    pub fn code(self) -> char {
        match self {
            Action::Click => 'c',
            Action::Open => 'o',
            Action::InitialOpen => 'i',
        }
    }

    /// The event type name the remote ingest API expects
    /// (`click` / `open` / `initial_open`).
    pub fn type_name(self) -> &'static str {
        match self {
            Action::Click => "click",
            Action::Open => "open",
            Action::InitialOpen => "initial_open",
        }
    }

    /// Parses one of the three long-form action names accepted by
    /// `build_url` (spec §4.1): `click`, `open`, `initial_open`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "click" => Some(Action::Click),
            "open" => Some(Action::Open),
            "initial_open" => Some(Action::InitialOpen),
            _ => None,
        }
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "c" => Ok(Action::Click),
            "o" => Ok(Action::Open),
            "i" => Ok(Action::InitialOpen),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name())
    }
}

impl Serialize for Action {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.code().to_string())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|_| {
            serde::de::Error::custom(format!("unrecognized tracking action {s:?}"))
        })
    }
}

/// The state embedded in a tracking URL (spec §3). Field names match the
/// compact JSON keys the link codec serializes (`act`, `t_url`, `msg_id`,
/// `rcpt`) so that `#[derive(Serialize, Deserialize)]` is the whole codec
/// contract for this struct's shape; the encoding/compression/base64
/// wrapping lives in `sp-linkcodec`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingPayload {
    #[serde(rename = "act")]
    pub action: Action,
    #[serde(rename = "t_url")]
    pub target_link_url: String,
    #[serde(rename = "msg_id")]
    pub message_id: String,
    #[serde(rename = "rcpt")]
    pub recipient: String,
}
