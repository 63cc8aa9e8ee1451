//! Response capture
//!
//! Wraps a response body so the status, header flush and number of body bytes
//! can be observed once the response is actually delivered. The wrapped body
//! yields exactly the same frames as the original.

use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use bytes::Buf;
use http_body::{Frame, SizeHint};
use pin_project_lite::pin_project;

/// What the client was sent for one response.
#[derive(Debug, Clone)]
pub struct ResponseCapture {
    status: StatusCode,
    headers: HeaderMap,
    bytes_written: u64,
    headers_flushed: bool,
}

impl ResponseCapture {
    pub fn new(status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            status,
            headers,
            bytes_written: 0,
            headers_flushed: false,
        }
    }

    /// Record the intended status. Once headers are flushed the status is
    /// final and this returns `false`.
    pub fn set_status(&mut self, status: StatusCode) -> bool {
        if self.headers_flushed {
            return false;
        }
        self.status = status;
        true
    }

    /// Account for `len` body bytes. Returns `true` when this write flushed
    /// the headers.
    pub fn write(&mut self, len: usize) -> bool {
        let flushed = self.force_flush();
        self.bytes_written += len as u64;
        flushed
    }

    /// Flush headers if that has not happened yet.
    pub fn force_flush(&mut self) -> bool {
        if self.headers_flushed {
            return false;
        }
        self.headers_flushed = true;
        true
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn headers_flushed(&self) -> bool {
        self.headers_flushed
    }
}

type OnFinish = Box<dyn FnOnce(&ResponseCapture) + Send>;

struct Finalizer {
    capture: ResponseCapture,
    on_finish: Option<OnFinish>,
}

impl Finalizer {
    fn finish(&mut self) {
        if let Some(on_finish) = self.on_finish.take() {
            self.capture.force_flush();
            on_finish(&self.capture);
        }
    }
}

impl Drop for Finalizer {
    fn drop(&mut self) {
        self.finish();
    }
}

pin_project! {
    /// Body wrapper that feeds a [`ResponseCapture`] and runs a callback
    /// exactly once: at end of stream, on a body error, or when dropped.
    pub struct CaptureBody<B> {
        #[pin]
        inner: B,
        finalizer: Finalizer,
    }
}

impl<B> CaptureBody<B> {
    pub fn new<F>(inner: B, capture: ResponseCapture, on_finish: F) -> Self
    where
        F: FnOnce(&ResponseCapture) + Send + 'static,
    {
        Self {
            inner,
            finalizer: Finalizer {
                capture,
                on_finish: Some(Box::new(on_finish)),
            },
        }
    }
}

impl<B> http_body::Body for CaptureBody<B>
where
    B: http_body::Body,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.project();
        let frame = ready!(this.inner.poll_frame(cx));

        match &frame {
            Some(Ok(frame)) => {
                if let Some(data) = frame.data_ref() {
                    this.finalizer.capture.write(data.remaining());
                }
            }
            Some(Err(_)) | None => this.finalizer.finish(),
        }

        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Wrap `response` so `on_finish` sees what was delivered to the client.
pub fn capture_response<F>(response: Response, on_finish: F) -> Response
where
    F: FnOnce(&ResponseCapture) + Send + 'static,
{
    let (parts, body) = response.into_parts();
    let capture = ResponseCapture::new(parts.status, parts.headers.clone());
    let body = CaptureBody::new(body, capture, on_finish);

    Response::from_parts(parts, Body::new(body))
}
