//! Human-readable per-build summaries.
//!
//! Maps an inspect response onto the compact shape surfaced in CI
//! output and `summary.json` files.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::buildx::InspectResponse;

/// Compact digest of one build record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub name: String,
    pub status: String,
    pub duration: String,
    #[serde(rename = "numCachedSteps")]
    pub num_cached_steps: u64,
    #[serde(rename = "numTotalSteps")]
    pub num_total_steps: u64,
    #[serde(rename = "numCompletedSteps")]
    pub num_completed_steps: u64,
    #[serde(
        rename = "defaultPlatform",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub default_platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Condense an inspect response into a [`Summary`].
///
/// A canceled build surfaces no error text: cancellation is a user
/// action, not a failure.
pub fn summarize(response: &InspectResponse) -> Summary {
    let duration = match (response.created_at, response.completed_at) {
        (Some(created), Some(completed)) => format_duration(completed - created),
        _ => String::new(),
    };

    let error = if response.status == "canceled" {
        None
    } else {
        response.error.as_ref().and_then(|e| {
            if !e.message.is_empty() {
                Some(e.message.clone())
            } else if !e.name.is_empty() {
                let mut text = e.name.clone();
                if !e.logs.is_empty() {
                    text.push('\n');
                    text.push_str(&e.logs.join("\n"));
                }
                Some(text)
            } else {
                None
            }
        })
    };

    Summary {
        name: response.name.clone(),
        status: response.status.clone(),
        duration,
        num_cached_steps: response.num_cached_steps,
        num_total_steps: response.num_total_steps,
        num_completed_steps: response.num_completed_steps,
        default_platform: response.platform.first().cloned(),
        error,
    }
}

/// Format a duration as `2h 3m 4s` / `3m 4s` / `4s`.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
