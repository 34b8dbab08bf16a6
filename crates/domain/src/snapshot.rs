use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::message::Content;
use crate::session::SessionState;
use crate::timer::TimerState;
use crate::value_objects::Fingerprint;

/// 已识别身份的会话成员
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub fingerprint: Fingerprint,
    pub name: String,
}

/// STATE_SYNC 消息携带的完整会话快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub votes: BTreeMap<Fingerprint, Option<Content>>,
    #[serde(default)]
    pub votes_revealed: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerState>,
}

impl SessionSnapshot {
    pub fn capture(session: &SessionState, participants: Vec<Participant>) -> Self {
        Self {
            votes: session.votes().clone(),
            votes_revealed: session.votes_revealed(),
            description: session.description().to_string(),
            participants,
            timer: Some(session.timer().clone()),
        }
    }

    /// 快照以 JSON 字符串的形式放进消息的 content
    pub fn to_content(&self) -> DomainResult<Content> {
        serde_json::to_string(self)
            .map(Content::Text)
            .map_err(|err| DomainError::serialization(err.to_string()))
    }

    pub fn from_content(content: Option<&Content>) -> DomainResult<Self> {
        let text = content
            .and_then(Content::as_text)
            .ok_or_else(|| DomainError::snapshot_decode("state sync content must be a JSON string"))?;
        serde_json::from_str(text).map_err(|err| DomainError::snapshot_decode(err.to_string()))
    }

    pub fn participant(&self, fingerprint: &Fingerprint) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|participant| &participant.fingerprint == fingerprint)
    }
}
