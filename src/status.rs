use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ClientError;

/// Millisecond retry hints, consulted before `Retry-After`.
const RETRY_AFTER_MS_HEADERS: [&str; 2] = ["retry-after-ms", "x-ms-retry-after-ms"];

/// Canonical state of a long-running operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationStatus {
    NotStarted,
    InProgress,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Canceled)
    }

    pub fn is_success(self) -> bool {
        self == Self::Succeeded
    }

    /// `true` for the failed terminal states, `Failed` and `Canceled`.
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Canceled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "NotStarted",
            Self::InProgress => "InProgress",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps service status strings onto [`OperationStatus`].
///
/// Lookups are case-insensitive. Strings missing from the table are rejected
/// instead of being treated as in progress, so an unexpected vocabulary fails
/// fast rather than polling forever.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusTable {
    entries: Vec<(String, OperationStatus)>,
}

impl Default for StatusTable {
    fn default() -> Self {
        Self::empty()
            .with_alias("NotStarted", OperationStatus::NotStarted)
            .with_alias("Running", OperationStatus::InProgress)
            .with_alias("InProgress", OperationStatus::InProgress)
            .with_alias("Succeeded", OperationStatus::Succeeded)
            .with_alias("Failed", OperationStatus::Failed)
            .with_alias("Canceled", OperationStatus::Canceled)
            .with_alias("Cancelled", OperationStatus::Canceled)
    }
}

impl StatusTable {
    /// A table that recognizes nothing.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Default vocabulary plus the transitional `provisioningState` values
    /// resource providers report while a resource is being changed.
    pub fn resource_manager() -> Self {
        ["Accepted", "Creating", "Updating", "Deleting", "Provisioning"]
            .into_iter()
            .fold(Self::default(), |table, name| {
                table.with_alias(name, OperationStatus::InProgress)
            })
    }

    /// Adds or replaces the mapping for `name`.
    #[must_use]
    pub fn with_alias(mut self, name: impl Into<String>, status: OperationStatus) -> Self {
        let name = name.into();
        self.entries
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.entries.push((name, status));
        self
    }

    pub fn lookup(&self, value: &str) -> Option<OperationStatus> {
        self.entries
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(value))
            .map(|(_, status)| *status)
    }
}

/// JSON location of a status string inside a response body.
pub(crate) type StatusField = &'static [&'static str];

/// `status` on an async-operation status resource.
pub(crate) const STATUS: StatusField = &["status"];
/// `properties.provisioningState` on a resource body.
pub(crate) const PROVISIONING_STATE: StatusField = &["properties", "provisioningState"];

/// Statuses a long-running operation response may carry without being an error.
pub(crate) fn is_polling_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED | StatusCode::NO_CONTENT
    )
}

/// Computes the operation status of a response.
///
/// `202 Accepted` is always in progress. Otherwise a status string found at
/// one of `fields` decides, and only a bodiless `200`/`201`/`204` counts as
/// success.
pub(crate) fn classify(
    status: StatusCode,
    body: Option<&Value>,
    fields: &[StatusField],
    table: &StatusTable,
) -> Result<OperationStatus, ClientError> {
    if status == StatusCode::ACCEPTED {
        return Ok(OperationStatus::InProgress);
    }

    if let Some(value) = body.and_then(|body| find_field(body, fields)) {
        let text = value.as_str().ok_or_else(|| {
            ClientError::InvalidResponse(format!("status field is not a string: {value}"))
        })?;
        return table.lookup(text).ok_or_else(|| {
            ClientError::InvalidResponse(format!("unrecognized operation status '{text}'"))
        });
    }

    match status {
        StatusCode::OK | StatusCode::CREATED | StatusCode::NO_CONTENT => {
            Ok(OperationStatus::Succeeded)
        }
        other => Err(ClientError::InvalidResponse(format!(
            "unexpected status code {other}"
        ))),
    }
}

fn find_field<'a>(body: &'a Value, fields: &[StatusField]) -> Option<&'a Value> {
    fields.iter().find_map(|path| {
        path.iter()
            .try_fold(body, |value, segment| value.get(segment))
            .filter(|value| !value.is_null())
    })
}

/// Server-suggested delay before the next request, if any.
///
/// Millisecond headers win over `Retry-After`, which may hold either a
/// number of seconds or an HTTP date. Zero and past values are ignored.
pub fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    for name in RETRY_AFTER_MS_HEADERS {
        if let Some(millis) = header_number(headers, name) {
            return Some(Duration::from_millis(millis)).filter(|delay| !delay.is_zero());
        }
    }

    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds)).filter(|delay| !delay.is_zero());
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?;
    (at.with_timezone(&Utc) - Utc::now())
        .to_std()
        .ok()
        .filter(|delay| !delay.is_zero())
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.trim().parse().ok()
}
