use super::{CallError, ResponseMessage, StructuralParseError, types::RequestMessage};
use futures_util::{
    FutureExt, Stream, StreamExt,
    future::{self, Either},
    stream::{BoxStream, FusedStream},
};
use prost_reflect::{DynamicMessage, MessageDescriptor};
use std::{
    fmt,
    future::Future,
    pin::{Pin, pin},
    task::{Context, Poll, ready},
};
use tokio::sync::oneshot;
use tonic::Streaming;

/// Converts each request element only when the transport pulls it.
///
/// The first element that does not match `descriptor` is sent to the returned [`EncodeAbort`]
/// and the stream never yields again: it is not half-closed, so the server cannot mistake the
/// truncated input for a complete request. The caller cancels the call instead.
pub(crate) fn encode_lazily(
    requests: BoxStream<'static, RequestMessage>,
    descriptor: MessageDescriptor,
) -> (EncodeRequests, EncodeAbort) {
    let (abort, failure) = oneshot::channel();
    let requests = EncodeRequests {
        requests,
        descriptor,
        abort: Some(abort),
    };
    (requests, EncodeAbort(Some(failure)))
}

/// The outgoing side of a streaming call, see [`encode_lazily`].
pub(crate) struct EncodeRequests {
    requests: BoxStream<'static, RequestMessage>,
    descriptor: MessageDescriptor,
    abort: Option<oneshot::Sender<StructuralParseError>>,
}

impl Stream for EncodeRequests {
    type Item = DynamicMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        // A rejected element stalls the stream until the call is dropped.
        if this.abort.is_none() {
            return Poll::Pending;
        }

        match ready!(this.requests.poll_next_unpin(cx)) {
            Some(request) => match request.into_message(&this.descriptor) {
                Ok(message) => Poll::Ready(Some(message)),
                Err(error) => {
                    tracing::debug!(%error, "request stream element rejected, cancelling call");
                    if let Some(abort) = this.abort.take() {
                        let _ = abort.send(error);
                    }
                    Poll::Pending
                }
            },
            None => Poll::Ready(None),
        }
    }
}

/// Resolves with the error of the first rejected request element.
///
/// Stays pending forever when every element was accepted.
#[derive(Debug, Default)]
pub(crate) struct EncodeAbort(Option<oneshot::Receiver<StructuralParseError>>);

impl EncodeAbort {
    /// Runs `call` until it completes or the request stream rejects an element.
    ///
    /// On a rejection `call` is dropped, which resets the underlying HTTP/2 stream.
    pub(crate) async fn cancel_on_failure<F: Future>(
        &mut self,
        call: F,
    ) -> Result<F::Output, StructuralParseError> {
        match future::select(pin!(call), self).await {
            Either::Left((output, _)) => Ok(output),
            Either::Right((error, _)) => Err(error),
        }
    }
}

impl Future for EncodeAbort {
    type Output = StructuralParseError;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let Some(failure) = this.0.as_mut() else {
            return Poll::Pending;
        };

        let received = ready!(Pin::new(failure).poll(cx));
        this.0 = None;
        match received {
            Ok(error) => Poll::Ready(error),
            // The request stream finished or was dropped without a rejection.
            Err(_) => Poll::Pending,
        }
    }
}

/// The replies of a server-streaming or bidirectional call.
///
/// Single pass and forward only: each reply is decoded when polled, in arrival order. The
/// underlying HTTP/2 stream is released as soon as the stream ends or fails, when
/// [`ResponseStream::close`] is called, or when the value is dropped.
pub struct ResponseStream {
    inner: Option<BoxStream<'static, Result<DynamicMessage, tonic::Status>>>,
    raw_output: bool,
    abort: EncodeAbort,
}

impl ResponseStream {
    pub(crate) fn new(
        inner: Streaming<DynamicMessage>,
        raw_output: bool,
        abort: EncodeAbort,
    ) -> Self {
        Self {
            inner: Some(inner.boxed()),
            raw_output,
            abort,
        }
    }

    /// Stops the call and releases its transport resources. Later polls yield `None`.
    pub fn close(&mut self) {
        if self.inner.take().is_some() {
            tracing::debug!("response stream released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn fail(&mut self, error: CallError) -> Poll<Option<Result<ResponseMessage, CallError>>> {
        self.close();
        Poll::Ready(Some(Err(error)))
    }
}

impl Stream for ResponseStream {
    type Item = Result<ResponseMessage, CallError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        let Some(inner) = this.inner.as_mut() else {
            return Poll::Ready(None);
        };

        match inner.poll_next_unpin(cx) {
            Poll::Ready(Some(Ok(message))) => {
                match ResponseMessage::decode(message, this.raw_output) {
                    Ok(response) => Poll::Ready(Some(Ok(response))),
                    Err(error) => this.fail(error.into()),
                }
            }
            Poll::Ready(Some(Err(status))) => this.fail(CallError::Status(status)),
            Poll::Ready(None) => {
                let failure = this.abort.poll_unpin(cx);
                this.close();
                match failure {
                    Poll::Ready(error) => Poll::Ready(Some(Err(error.into()))),
                    Poll::Pending => Poll::Ready(None),
                }
            }
            // Replies already received are yielded before a request failure.
            Poll::Pending => match this.abort.poll_unpin(cx) {
                Poll::Ready(error) => this.fail(error.into()),
                Poll::Pending => Poll::Pending,
            },
        }
    }
}

impl FusedStream for ResponseStream {
    fn is_terminated(&self) -> bool {
        self.is_closed()
    }
}

impl fmt::Debug for ResponseStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseStream")
            .field("closed", &self.is_closed())
            .field("raw_output", &self.raw_output)
            .finish()
    }
}
