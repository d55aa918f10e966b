//! Thin SSE embedding layer: a single `POST /analyze` route that spawns the
//! engine's Plan-Execute-Observe-Replan loop and streams its tape back as
//! Server-Sent Events.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use async_trait::async_trait;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use dataloom_engine::{EngineConfig, EngineEvent, EngineSettings, EventObserver, Message, PlanCache};
use dataloom_llm::ChatProvider;

/// Lower bound on the producer/consumer channel between the orchestrator
/// task and this route's SSE writer.
pub const EVENT_CHANNEL_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct AppState {
    llm: Arc<dyn ChatProvider>,
    cache: Arc<PlanCache>,
    config: EngineConfig,
}

impl AppState {
    pub fn new(llm: Arc<dyn ChatProvider>, config: EngineConfig) -> Self {
        let cache = Arc::new(PlanCache::new(config.cache_max_size, config.cache_ttl));
        AppState { llm, cache, config }
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct AnalyzeRequest {
    pub request: String,
    #[serde(default)]
    pub document: String,
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub settings: Option<EngineSettings>,
}

struct ChannelObserver {
    tx: mpsc::Sender<EngineEvent>,
}

#[async_trait]
impl EventObserver for ChannelObserver {
    async fn on_event(&self, event: EngineEvent) -> bool {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("sse receiver dropped before the tape finished");
            return false;
        }
        true
    }
}

/// Wraps the event stream together with the orchestrator task's
/// `JoinHandle`. Spec §5 requires that closing the tape from the consumer
/// side aborts the in-flight C1 call: axum drops this stream as soon as
/// the client disconnects, and that drop aborts the still-running task —
/// cancelling whatever `reqwest` call it's awaiting.
struct CancelOnDrop<S> {
    inner: S,
    handle: Option<JoinHandle<()>>,
}

impl<S: Stream + Unpin> Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.inner).poll_next(cx)
    }
}

impl<S> Drop for CancelOnDrop<S> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

async fn analyze(State(state): State<AppState>, Json(req): Json<AnalyzeRequest>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let config = match &req.settings {
        Some(settings) => state.config.with_settings(settings),
        None => state.config.clone(),
    };
    let llm = state.llm.clone();
    let cache = state.cache.clone();

    let handle = tokio::spawn(async move {
        let observer = ChannelObserver { tx };
        dataloom_engine::run(req.request, req.document, req.history, config, llm.as_ref(), cache.as_ref(), &observer).await;
    });

    let guarded_rx = CancelOnDrop { inner: ReceiverStream::new(rx), handle: Some(handle) };

    let events = guarded_rx
        .map(|event| Event::default().data(serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string())))
        .map(Ok::<_, Infallible>)
        .chain(futures_util::stream::once(async { Ok(Event::default().data("[DONE]")) }));

    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keep-alive"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait as at;
    use dataloom_llm::{ChatParams, ChatStream, LLMError};

    struct EchoLlm;

    #[at]
    impl ChatProvider for EchoLlm {
        async fn complete(&self, _query: &str, _params: ChatParams) -> Result<String, LLMError> {
            Ok("{}".to_string())
        }

        async fn stream(&self, _query: &str, _params: ChatParams) -> Result<ChatStream, LLMError> {
            Ok(Box::pin(futures_util::stream::iter(vec![Ok("hi".to_string())])))
        }

        async fn embed(&self, _text: &str, _params: ChatParams) -> Result<Vec<f32>, LLMError> {
            Ok(vec![0.0])
        }
    }

    #[test]
    fn app_state_builds_a_cache_sized_from_config() {
        let llm: Arc<dyn ChatProvider> = Arc::new(EchoLlm);
        let config = EngineConfig::default();
        let state = AppState::new(llm, config.clone());
        assert_eq!(state.config.cache_max_size, config.cache_max_size);
    }

    #[tokio::test]
    async fn event_channel_drains_events_sent_by_a_scripted_observer() {
        let (tx, rx) = mpsc::channel::<EngineEvent>(EVENT_CHANNEL_CAPACITY);
        let observer = ChannelObserver { tx };
        assert!(observer.on_event(EngineEvent::reply("hi".to_string())).await);
        drop(observer);

        let mut stream = ReceiverStream::new(rx);
        let first = stream.next().await;
        assert!(matches!(first, Some(EngineEvent::Reply { .. })));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn on_event_reports_false_once_the_receiver_is_dropped() {
        let (tx, rx) = mpsc::channel::<EngineEvent>(EVENT_CHANNEL_CAPACITY);
        let observer = ChannelObserver { tx };
        drop(rx);
        assert!(!observer.on_event(EngineEvent::reply("hi".to_string())).await);
    }

    #[tokio::test]
    async fn dropping_the_guarded_stream_aborts_the_orchestrator_task() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            let _ = done_tx.send(());
        });
        let (_tx, rx) = mpsc::channel::<EngineEvent>(EVENT_CHANNEL_CAPACITY);
        let guarded = CancelOnDrop { inner: ReceiverStream::new(rx), handle: Some(handle) };
        drop(guarded);

        // Aborting a sleeping task drops it (and `done_tx`) immediately,
        // without waiting out the sleep.
        assert!(done_rx.await.is_err());
    }
}
