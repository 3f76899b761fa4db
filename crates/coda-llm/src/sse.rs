//! Server-sent event plumbing shared by the HTTP adapters.
//!
//! Providers differ in what their `data:` payloads mean but not in how the
//! bytes are framed. Framing is left to `eventsource-stream`; each adapter
//! supplies a [`FrameHandler`] that turns decoded events into
//! [`ProviderEvent`]s.

use std::collections::VecDeque;
use std::pin::Pin;

use bytes::Bytes;
use eventsource_stream::{Event, EventStreamError, Eventsource};
use futures::{Stream, StreamExt};

use crate::backend::{ProviderEvent, ResponseStream};
use crate::error::LlmError;

/// What the stream should do after an event.
pub(crate) enum Flow {
    Continue,
    /// The provider signalled a clean end of the response.
    Stop,
    Fail(LlmError),
}

/// Provider-specific interpretation of decoded events.
///
/// Events without an `event:` field arrive named `message`.
pub(crate) trait FrameHandler: Send + 'static {
    fn on_frame(&mut self, event: Event, out: &mut VecDeque<ProviderEvent>) -> Flow;

    /// Called once when the response ends without a failure.
    fn on_end(&mut self, _out: &mut VecDeque<ProviderEvent>) {}
}

type Events = Pin<Box<dyn Stream<Item = Result<Event, EventStreamError<reqwest::Error>>> + Send>>;

struct StreamState<H> {
    events: Events,
    handler: H,
    pending: VecDeque<ProviderEvent>,
    failure: Option<LlmError>,
    finished: bool,
}

impl<H: FrameHandler> StreamState<H> {
    fn apply(&mut self, event: Event) {
        match self.handler.on_frame(event, &mut self.pending) {
            Flow::Continue => {}
            Flow::Stop => self.close(),
            Flow::Fail(err) => self.fail(err),
        }
    }

    fn fail(&mut self, err: LlmError) {
        self.failure = Some(err);
        self.finished = true;
    }

    fn close(&mut self) {
        if !self.finished {
            self.handler.on_end(&mut self.pending);
            self.finished = true;
        }
    }
}

fn stream_error(err: EventStreamError<reqwest::Error>) -> LlmError {
    match err {
        EventStreamError::Transport(e) => LlmError::from(e),
        other => LlmError::Backend(format!("malformed event stream: {other}")),
    }
}

/// Drive `handler` over an HTTP body and expose the result as a
/// [`ResponseStream`]. Events produced before a failure are yielded first,
/// then the failure, then nothing.
pub(crate) fn event_stream<H: FrameHandler>(
    body: impl Stream<Item = reqwest::Result<Bytes>> + Send + 'static,
    handler: H,
) -> ResponseStream {
    let state = StreamState {
        events: Box::pin(body.eventsource()),
        handler,
        pending: VecDeque::new(),
        failure: None,
        finished: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if let Some(err) = state.failure.take() {
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            match state.events.next().await {
                Some(Ok(event)) => state.apply(event),
                Some(Err(e)) => state.fail(stream_error(e)),
                None => state.close(),
            }
        }
    }))
}

/// Feed literal chunks through `handler`, for adapter tests.
#[cfg(test)]
pub(crate) async fn collect_chunks<H: FrameHandler>(
    chunks: &[&str],
    handler: H,
) -> Vec<crate::error::Result<ProviderEvent>> {
    let body: Vec<reqwest::Result<Bytes>> = chunks
        .iter()
        .map(|c| Ok(Bytes::from(c.to_string())))
        .collect();
    event_stream(futures::stream::iter(body), handler)
        .collect()
        .await
}
