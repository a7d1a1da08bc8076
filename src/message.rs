use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Inbound signaling message from a remote viewer.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub r#type: String,
    pub sdp: Option<String>,
}

impl Message {
    /// Parse one text frame. Anything that is not an object with string `id`
    /// and `type` fields is an error.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn kind(&self) -> Kind {
        match self.r#type.as_str() {
            "request" => Kind::Request,
            "answer" => Kind::Answer,
            _ => Kind::Other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Answer,
    Other,
}

/// Local description sent back to the remote viewer once gathering completes.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Description<'a> {
    pub id: &'a str,
    pub r#type: &'a str,
    pub sdp: &'a str,
}

impl Description<'_> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Item in a session's outbound mailbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized signaling payload, relayed verbatim.
    Signal(String),
    /// The session reached a terminal state and wants to be torn down.
    Quit,
}
