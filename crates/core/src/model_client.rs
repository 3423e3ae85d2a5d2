use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::future::retry;
use tagcall_model::{
    ModelFinishReason, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent,
};
use tracing::Instrument;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type OnReadyFn = Box<dyn FnOnce() + Send + 'static>;
type OnDeltaFn = Box<dyn Fn(String) + Send + 'static>;
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, OnReadyFn, OnDeltaFn) -> BoxedSendRequestFuture
        + Send + Sync
>;

/// How requests failing with a transient error are sent again.
///
/// Only failures before the reply starts streaming are retried. The
/// delay between attempts grows exponentially from `initial_interval`
/// until `max_elapsed` has passed since the first attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Total time after which no retry is attempted.
    pub max_elapsed: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[inline]
    pub fn none() -> Self {
        Self {
            initial_interval: Duration::ZERO,
            max_elapsed: Duration::ZERO,
        }
    }
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            max_elapsed: Duration::from_secs(30),
        }
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    pub fn new<P: ModelProvider + 'static>(
        provider: P,
        retry_policy: RetryPolicy,
    ) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let provider = Arc::new(provider);
        let handler_fn: HandlerFn = Arc::new(move |req, on_ready, on_delta| {
            let provider = Arc::clone(&provider);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err =
                        connect(provider.as_ref(), &req, retry_policy).await;
                    handle_response::<P>(resp_or_err, on_ready, on_delta)
                        .await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and returns the response.
    ///
    /// `on_ready` is called once the engine accepted the request, right
    /// before the first event is polled. `on_delta` receives every text
    /// delta as it streams in.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(
        &self,
        req: ModelRequest,
        on_ready: impl FnOnce() + Send + 'static,
        on_delta: impl Fn(String) + Send + 'static,
    ) -> SendRequestResult {
        (self.handler_fn)(req, Box::new(on_ready), Box::new(on_delta)).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub struct ModelClientResponse {
    pub transcript: String,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn connect<P: ModelProvider>(
    provider: &P,
    req: &ModelRequest,
    policy: RetryPolicy,
) -> Result<P::Response, P::Error> {
    let backoff = ExponentialBackoffBuilder::new()
        .with_initial_interval(policy.initial_interval)
        .with_max_elapsed_time(Some(policy.max_elapsed))
        .build();
    retry(backoff, || {
        let fut = provider.send_request(req);
        async move {
            fut.await.map_err(|err| {
                if err.kind().is_transient() {
                    warn!("transient model error, may retry: {err}");
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                }
            })
        }
    })
    .await
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_ready: OnReadyFn,
    on_delta: OnDeltaFn,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            error!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };
    on_ready();

    let mut transcript = String::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                error!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                transcript.push_str(&msg);
                on_delta(msg);
            }
            ModelResponseEvent::Completed(reason) => {
                if reason == ModelFinishReason::Length {
                    warn!("reply was cut at the token limit");
                }
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        finish_reason,
    })
}
