//! Live change feed over server-sent events

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{AppError, AppState};
use slipdesk_core::{ChangeFilter, ChangeOp, ChangeTable, Subscription};

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    /// Comma-separated table names
    pub table: Option<String>,
    /// Comma-separated operations
    pub op: Option<String>,
}

fn parse_list<T: std::str::FromStr<Err = String>>(input: Option<&str>) -> Result<Vec<T>, AppError> {
    input
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|e| AppError::bad_request(&e)))
        .collect()
}

impl EventsQuery {
    fn into_filter(self) -> Result<ChangeFilter, AppError> {
        Ok(ChangeFilter {
            tables: parse_list::<ChangeTable>(self.table.as_deref())?,
            ops: parse_list::<ChangeOp>(self.op.as_deref())?,
        })
    }
}

/// GET /api/events - Stream committed row changes
///
/// Each event is named after its table and carries the `ChangeEvent` as JSON.
pub async fn change_events(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EventsQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let filter = params.into_filter()?;
    debug!(?filter, "Change feed subscriber connected");
    let subscription = state.pipeline.db().subscribe(filter);

    let events = stream::unfold(subscription, |mut sub: Subscription| async move {
        let change = sub.recv().await?;
        let event = match Event::default().event(change.table.as_str()).json_data(change) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Failed to encode change event");
                Event::default().comment("encode error")
            }
        };
        Some((Ok(event), sub))
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}
