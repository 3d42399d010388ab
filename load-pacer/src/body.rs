use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
};

use bytes::{Buf, Bytes};
use http_body::{Body, Frame, SizeHint};
use tokio_util::sync::CancellationToken;

use super::meter::IntervalMeter;

pub const BLOCK_SIZE: usize = 0x8000;

static BLOCK: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

/// Passes the frames of `inner` through, counting the data bytes.
/// Cancellation looks like the end of the stream.
pub struct CountingBody<B> {
    inner: B,
    meter: Arc<IntervalMeter>,
    token: CancellationToken,
    total: u64,
}

impl<B> CountingBody<B> {
    pub fn new(inner: B, meter: Arc<IntervalMeter>, token: CancellationToken) -> Self {
        CountingBody {
            inner,
            meter,
            token,
            total: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.total
    }
}

impl<B> Body for CountingBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(None);
        }
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        if let Some(data) = frame.as_ref().and_then(|f| f.as_ref().ok()?.data_ref()) {
            let len = data.remaining() as u64;
            this.total += len;
            this.meter.add(len);
        }
        Poll::Ready(frame)
    }

    fn is_end_stream(&self) -> bool {
        self.token.is_cancelled() || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

/// Fabricates zeroed blocks for as long as it is polled, counting each one.
///
/// It ends on cancellation, or once `limit` bytes were produced if a limit is set.
/// Uncapped and without a cancellation deadline, the transfer never ends.
pub struct SyntheticBody {
    meter: Arc<IntervalMeter>,
    token: CancellationToken,
    remaining: Option<u64>,
}

impl SyntheticBody {
    pub fn new(meter: Arc<IntervalMeter>, token: CancellationToken) -> Self {
        SyntheticBody {
            meter,
            token,
            remaining: None,
        }
    }

    pub fn with_limit(self, limit: Option<u64>) -> Self {
        SyntheticBody {
            remaining: limit,
            ..self
        }
    }
}

impl Body for SyntheticBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.token.is_cancelled() {
            return Poll::Ready(None);
        }
        let block = match &mut this.remaining {
            None => Bytes::from_static(&BLOCK),
            Some(0) => return Poll::Ready(None),
            Some(remaining) => {
                let len = (*remaining).min(BLOCK_SIZE as u64);
                *remaining -= len;
                Bytes::from_static(&BLOCK[..len as usize])
            }
        };
        this.meter.add(block.len() as u64);
        Poll::Ready(Some(Ok(Frame::data(block))))
    }

    fn is_end_stream(&self) -> bool {
        self.token.is_cancelled() || self.remaining == Some(0)
    }
}
