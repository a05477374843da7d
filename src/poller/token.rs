use reqwest::Url;
use serde::{Deserialize, Serialize};

use super::signal::{FinalStateVia, PollingSignal};
use crate::{ClientError, OperationStatus};

/// Schema version written into new tokens.
///
/// Readers accept every version up to this one; fields added later must be
/// optional so older tokens keep parsing.
pub(crate) const TOKEN_VERSION: u32 = 1;

/// Serialized poller state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResumeToken {
    pub(crate) version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) operation: Option<String>,
    pub(crate) method: String,
    pub(crate) initial_url: String,
    pub(crate) polling_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) result_url: Option<String>,
    pub(crate) signal: PollingSignal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) final_state_via: Option<FinalStateVia>,
    pub(crate) status: OperationStatus,
}

impl ResumeToken {
    pub(crate) fn encode(&self) -> Result<String, ClientError> {
        Ok(serde_json::to_string(self)?)
    }

    pub(crate) fn decode(token: &str) -> Result<Self, ClientError> {
        let decoded: Self =
            serde_json::from_str(token).map_err(|e| ClientError::MalformedToken(e.to_string()))?;
        if decoded.version == 0 || decoded.version > TOKEN_VERSION {
            return Err(ClientError::MalformedToken(format!(
                "unsupported token version {}",
                decoded.version
            )));
        }
        Ok(decoded)
    }
}

/// Parses a URL stored in a token.
pub(crate) fn token_url(field: &str, value: &str) -> Result<Url, ClientError> {
    Url::parse(value)
        .map_err(|e| ClientError::MalformedToken(format!("invalid {field} '{value}': {e}")))
}
