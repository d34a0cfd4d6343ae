//! Endpoint log retrieval

use crate::error::{DeployerError, Result};
use crate::remote::LogsApi;
use chrono::{DateTime, SecondsFormat, Utc};
use tracing::debug;

/// Options of a log fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LogOptions {
    /// Stream new lines as they arrive. Not supported.
    pub follow: bool,
    /// Keep only the last `n` lines; `Some(0)` keeps everything
    pub tail: Option<usize>,
}

impl LogOptions {
    pub fn tail(lines: usize) -> Self {
        Self {
            follow: false,
            tail: Some(lines),
        }
    }
}

/// Finite, sorted log lines of one fetch
#[derive(Debug)]
pub struct LogLines {
    lines: std::vec::IntoIter<String>,
}

impl Iterator for LogLines {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.lines.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.lines.size_hint()
    }
}

impl ExactSizeIterator for LogLines {}

/// Log group of a service
pub fn log_group(prefix: &str, service_name: &str) -> String {
    format!("{}/{}/service", prefix.trim_end_matches('/'), service_name)
}

/// `[timestamp] message` with a fixed-width UTC timestamp, so that string
/// order is time order.
pub fn format_line(timestamp_ms: i64, message: &str) -> String {
    let at = DateTime::<Utc>::from_timestamp_millis(timestamp_ms).unwrap_or_default();
    format!(
        "[{}] {}",
        at.to_rfc3339_opts(SecondsFormat::Millis, true),
        message
    )
}

/// Read every stream of `group`, oldest line first.
pub(crate) async fn read_group(
    logs: &dyn LogsApi,
    endpoint: &str,
    group: &str,
    options: LogOptions,
) -> Result<LogLines> {
    if options.follow {
        return Err(DeployerError::Unsupported(
            "following logs is not implemented".into(),
        ));
    }

    let streams = logs.list_streams(group).await.map_err(|e| {
        let reason = if e.is_not_found() {
            format!("log group {} does not exist", group)
        } else {
            e.to_string()
        };
        DeployerError::LogsNotFound {
            endpoint: endpoint.to_string(),
            reason,
        }
    })?;

    let mut lines = Vec::new();
    for stream in &streams {
        match logs.get_events(group, &stream.name).await {
            Ok(events) => lines.extend(
                events
                    .iter()
                    .map(|event| format_line(event.timestamp_ms, &event.message)),
            ),
            Err(e) if e.is_not_found() => {
                debug!(stream = %stream.name, "Log stream vanished while reading");
            }
            Err(e) => {
                return Err(DeployerError::LogsNotFound {
                    endpoint: endpoint.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    lines.sort();
    if let Some(tail) = options.tail.filter(|&n| n > 0) {
        let skip = lines.len().saturating_sub(tail);
        lines.drain(..skip);
    }

    Ok(LogLines {
        lines: lines.into_iter(),
    })
}
