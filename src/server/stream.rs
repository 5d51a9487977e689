//! Subscriber event stream
//!
//! Turns a [`Subscription`] into the body of an event stream response.
//! Frames are passed through unchanged and a comment frame is emitted
//! whenever the stream has been quiet for the keepalive interval. The
//! stream owns the subscription, so dropping the response body (client
//! gone, server shutting down) unregisters it.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures::Stream;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

use crate::hub::{Subscription, KEEPALIVE_FRAME};

/// Frames of one subscriber, with keepalives
pub struct EventStream {
    sub: Subscription,
    keepalive: Interval,
    hub_closed: bool,
}

impl EventStream {
    pub fn new(sub: Subscription, keepalive: Duration) -> Self {
        let period = keepalive.max(Duration::from_millis(1));
        let mut keepalive = time::interval_at(Instant::now() + period, period);
        keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            sub,
            keepalive,
            hub_closed: false,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.hub_closed {
            return Poll::Ready(None);
        }

        match this.sub.poll_recv(cx) {
            Poll::Ready(Some(frame)) => {
                this.keepalive.reset();
                return Poll::Ready(Some(Ok(frame)));
            }
            Poll::Ready(None) => {
                this.hub_closed = true;
                return Poll::Ready(None);
            }
            Poll::Pending => {}
        }

        match this.keepalive.poll_tick(cx) {
            Poll::Ready(_) => Poll::Ready(Some(Ok(Bytes::from_static(KEEPALIVE_FRAME)))),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        tracing::debug!(
            connection = %self.sub.id(),
            hub_closed = self.hub_closed,
            "Subscriber detached"
        );
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;
    use crate::hub::{Hub, HubConfig, LifecycleHooks, SseMessage};

    async fn wait_for_active(hub: &Hub, expected: usize) {
        time::timeout(Duration::from_secs(3), async {
            while hub.active_connection_count() != expected {
                time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("active count not reached in time");
    }

    async fn next(stream: &mut EventStream) -> Option<Bytes> {
        time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out waiting for frame")
            .map(|frame| match frame {
                Ok(frame) => frame,
                Err(never) => match never {},
            })
    }

    async fn started() -> Hub {
        let hub = Hub::new(HubConfig::default(), LifecycleHooks::new());
        hub.start();
        hub
    }

    #[tokio::test]
    async fn test_frames_pass_through() {
        let hub = started().await;
        let sub = hub.subscribe("/news").await.unwrap();
        wait_for_active(&hub, 1).await;
        let mut stream = EventStream::new(sub, Duration::from_secs(30));

        hub.broadcast(SseMessage::new("n", "headline", "/news/world"))
            .await
            .unwrap();

        let frame = next(&mut stream).await.unwrap();
        assert_eq!(&frame[..], b"event:n\nnamespace:/news/world\ndata:headline\n\n");
    }

    #[tokio::test]
    async fn test_keepalive_on_quiet_stream() {
        let hub = started().await;
        let sub = hub.subscribe("").await.unwrap();
        let mut stream = EventStream::new(sub, Duration::from_millis(20));

        let frame = next(&mut stream).await.unwrap();
        assert_eq!(&frame[..], KEEPALIVE_FRAME);
    }

    #[tokio::test]
    async fn test_hub_stop_ends_stream() {
        let hub = started().await;
        let sub = hub.subscribe("").await.unwrap();
        wait_for_active(&hub, 1).await;
        let mut stream = EventStream::new(sub, Duration::from_secs(30));

        hub.shutdown().await;

        assert_eq!(next(&mut stream).await, None);
        assert_eq!(next(&mut stream).await, None);
    }

    #[tokio::test]
    async fn test_drop_unregisters() {
        let hub = started().await;
        let sub = hub.subscribe("").await.unwrap();
        wait_for_active(&hub, 1).await;

        drop(EventStream::new(sub, Duration::from_secs(30)));

        wait_for_active(&hub, 0).await;
        hub.shutdown().await;
    }
}
