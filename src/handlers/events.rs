use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use serde::Deserialize;
use tokio_stream::wrappers::{BroadcastStream, IntervalStream};
use tokio_stream::StreamExt;

use crate::db::queries;
use crate::errors::{AppError, AppResult};
use crate::models::EventEnvelope;
use crate::state::AppState;

const CATCH_UP_LIMIT: i64 = 500;

fn to_sse(envelope: &EventEnvelope) -> Event {
    let data = serde_json::to_string(envelope).unwrap_or_default();
    Event::default()
        .id(envelope.seq.to_string())
        .event(envelope.event.kind())
        .data(data)
}

// GET /api/events/stream (SSE)
#[derive(Deserialize)]
pub struct StreamQuery {
    pub token: Option<String>,
    pub last_id: Option<i64>,
}

pub async fn events_stream(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StreamQuery>,
) -> AppResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    // EventSource can't set headers
    let token = query.token.as_deref().unwrap_or("");
    if token.is_empty() || token != state.config.api_token {
        return Err(AppError::Unauthenticated);
    }

    let last_id = query.last_id.unwrap_or(0);

    // Subscribe before reading the backlog so nothing falls in between.
    let rx = state.events_tx.subscribe();
    let backlog = {
        let db = state.conn()?;
        queries::get_events_since(&db, last_id, CATCH_UP_LIMIT).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to load event backlog");
            vec![]
        })
    };
    let newest_sent = backlog.last().map(|e| e.seq).unwrap_or(last_id);

    let catch_up = tokio_stream::iter(backlog.into_iter().map(|e| Ok::<_, Infallible>(to_sse(&e))));

    let live = BroadcastStream::new(rx).filter_map(move |result| match result {
        // already delivered from the backlog
        Ok(envelope) if envelope.seq != 0 && envelope.seq <= newest_sent => None,
        Ok(envelope) => Some(Ok(to_sse(&envelope))),
        Err(tokio_stream::wrappers::errors::BroadcastStreamRecvError::Lagged(skipped)) => {
            tracing::warn!(skipped, "event stream subscriber lagged");
            None
        }
    });

    let keepalive = StreamExt::map(
        IntervalStream::new(tokio::time::interval(Duration::from_secs(30))),
        |_| Ok(Event::default().comment("keepalive")),
    );

    Ok(Sse::new(StreamExt::merge(catch_up.chain(live), keepalive)))
}
