//! Stored history for streams opened with `since`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use hubcast_core::EventId;
use hubcast_events::matches_topic;

use super::frames::StreamFrame;
use crate::event_service::{EventService, ReplayQuery, ServiceError};
use crate::event_store::MAX_LIMIT;
use crate::fanout::FanoutBridge;

pub const CATCH_UP_TRUNCATED: &str =
    "catch-up incomplete: more stored events share one timestamp than a replay page holds; use /events/replay";

/// Replay every event in `[since, until]` through the bridge's rules and keep
/// the topics matching `patterns`, oldest first.
///
/// The log is read in pages of [`MAX_LIMIT`]. Each page starts at the last
/// timestamp already seen; events on that boundary are skipped by id. If a
/// full page brings nothing new the frames end with an `error` frame instead
/// of leaving a silent gap.
pub async fn catch_up(
    service: &EventService,
    bridge: &FanoutBridge,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    patterns: &[String],
) -> Result<Vec<StreamFrame>, ServiceError> {
    let mut frames = Vec::new();
    if since > until {
        return Ok(frames);
    }

    let mut cursor = since;
    let mut boundary: HashSet<EventId> = HashSet::new();
    loop {
        let page = service
            .replay(ReplayQuery {
                since: Some(cursor),
                until: Some(until),
                limit: Some(i64::from(MAX_LIMIT)),
                ..Default::default()
            })
            .await?;
        let Some(last) = page.last().map(|e| e.timestamp()) else {
            break;
        };

        let mut fresh = 0usize;
        let mut at_last = HashSet::new();
        for event in &page {
            if event.timestamp() == last {
                at_last.insert(event.id());
            }
            if boundary.contains(&event.id()) {
                continue;
            }
            fresh += 1;
            frames.extend(
                bridge
                    .topics_for(event.subject(), event.payload())
                    .into_iter()
                    .filter(|topic| patterns.iter().any(|p| matches_topic(topic, p)))
                    .map(|topic| StreamFrame::Event {
                        topic,
                        data: event.payload().clone(),
                    }),
            );
        }

        if page.len() < MAX_LIMIT as usize {
            break;
        }
        if fresh == 0 {
            tracing::warn!(%cursor, "catch-up stalled on a crowded timestamp");
            frames.push(StreamFrame::Error {
                message: CATCH_UP_TRUNCATED.to_string(),
            });
            break;
        }

        if last == cursor {
            boundary.extend(at_last);
        } else {
            boundary = at_last;
        }
        cursor = last;
    }
    Ok(frames)
}
