//! Escalation streaming and manual sweep handlers

use crate::api::rest::state::AppState;
use crate::error::ApiResult;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use verification_engine::SweepReport;

/// Stream escalation events via SSE
pub async fn stream_escalations(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = state.escalation_tx.subscribe();

    let stream = stream::unfold(rx, |mut rx| async move {
        match rx.recv().await {
            Ok(event) => {
                let sse_event = Event::default()
                    .event("escalation")
                    .json_data(&event)
                    .unwrap_or_else(|_| Event::default().comment("unserializable event"));
                Some((Ok(sse_event), rx))
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Escalation stream subscriber lagged");
                Some((Ok(Event::default().comment("lagged")), rx))
            }
            Err(RecvError::Closed) => None,
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

/// Run an SLA sweep now and return its counters
pub async fn run_sweep(State(state): State<AppState>) -> ApiResult<Json<SweepReport>> {
    let report = state.scheduler.run_once().await?;
    Ok(Json(report))
}
