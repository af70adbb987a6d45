//! Per-stage I/O deadlines.
//!
//! A read or write that stays pending longer than the configured timeout
//! fails with [`io::ErrorKind::TimedOut`]. The read deadline also restarts
//! whenever a write completes, so a slow response does not eat into the
//! idle wait for the next request.
//!
//! While a request is being handled the read deadline is suspended through
//! [`DeadlineControl`]: only waiting for a request is bounded, not the work
//! done for it.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::Sleep;

use crate::error::Stage;

/// Inner error of the `io::Error` raised when a deadline fires
#[derive(Debug, Error)]
#[error("{0} timed out")]
pub struct StageTimeout(pub Stage);

impl StageTimeout {
    /// Find a deadline expiry anywhere in an error's source chain
    pub fn find(err: &(dyn std::error::Error + 'static)) -> Option<Stage> {
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(timeout) = e.downcast_ref::<StageTimeout>() {
                return Some(timeout.0);
            }
            if let Some(timeout) = e
                .downcast_ref::<io::Error>()
                .and_then(|io| io.get_ref())
                .and_then(|inner| inner.downcast_ref::<StageTimeout>())
            {
                return Some(timeout.0);
            }
            current = e.source();
        }
        None
    }
}

#[derive(Debug, Default)]
struct Suspension {
    suspended: bool,
    /// Reader parked while suspended, woken when the suspension ends
    waker: Option<Waker>,
}

/// Handle for suspending a [`TimedStream`]'s read deadline
#[derive(Debug, Clone, Default)]
pub struct DeadlineControl {
    state: Arc<Mutex<Suspension>>,
}

impl DeadlineControl {
    /// Suspend the read deadline until the returned guard is dropped
    pub fn suspend_reads(&self) -> SuspendedReads {
        self.state.lock().suspended = true;
        SuspendedReads {
            state: Arc::clone(&self.state),
        }
    }

    /// Whether reads are suspended; if so, park `cx` until they resume
    fn park_if_suspended(&self, cx: &Context<'_>) -> bool {
        let mut state = self.state.lock();
        if state.suspended {
            state.waker = Some(cx.waker().clone());
        }
        state.suspended
    }
}

/// Keeps the read deadline suspended while alive
#[derive(Debug)]
pub struct SuspendedReads {
    state: Arc<Mutex<Suspension>>,
}

impl Drop for SuspendedReads {
    fn drop(&mut self) {
        let waker = {
            let mut state = self.state.lock();
            state.suspended = false;
            state.waker.take()
        };
        // Re-poll the reader so it arms a fresh deadline
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Stream wrapper enforcing read and write deadlines
pub struct TimedStream<S> {
    inner: S,
    timeout: Duration,
    control: DeadlineControl,
    read_deadline: Option<Pin<Box<Sleep>>>,
    write_deadline: Option<Pin<Box<Sleep>>>,
}

impl<S> TimedStream<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            control: DeadlineControl::default(),
            read_deadline: None,
            write_deadline: None,
        }
    }

    /// Handle for suspending this stream's read deadline from elsewhere
    pub fn control(&self) -> DeadlineControl {
        self.control.clone()
    }
}

/// Arm the deadline if needed and report whether it has fired
fn expired(slot: &mut Option<Pin<Box<Sleep>>>, timeout: Duration, cx: &mut Context<'_>) -> bool {
    let deadline = slot.get_or_insert_with(|| Box::pin(tokio::time::sleep(timeout)));
    if deadline.as_mut().poll(cx).is_ready() {
        *slot = None;
        true
    } else {
        false
    }
}

fn timed_out(stage: Stage) -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, StageTimeout(stage))
}

impl<S: AsyncRead + Unpin> AsyncRead for TimedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(result) => {
                this.read_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending if this.control.park_if_suspended(cx) => {
                this.read_deadline = None;
                Poll::Pending
            }
            Poll::Pending if expired(&mut this.read_deadline, this.timeout, cx) => {
                Poll::Ready(Err(timed_out(Stage::Read)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                this.read_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending if expired(&mut this.write_deadline, this.timeout, cx) => {
                Poll::Ready(Err(timed_out(Stage::Write)))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(result) => {
                this.write_deadline = None;
                Poll::Ready(result)
            }
            Poll::Pending if expired(&mut this.write_deadline, this.timeout, cx) => {
                Poll::Ready(Err(timed_out(Stage::Write)))
            }
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test(start_paused = true)]
    async fn test_idle_read_times_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut stream = TimedStream::new(client, Duration::from_secs(30));

        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(StageTimeout::find(&err), Some(Stage::Read));
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_resets_deadline() {
        let (client, mut server) = tokio::io::duplex(64);
        let mut stream = TimedStream::new(client, Duration::from_secs(30));

        let feeder = tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_secs(20)).await;
                server.write_all(b"x").await.unwrap();
            }
            server
        });

        let mut buf = [0u8; 1];
        for _ in 0..3 {
            stream.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"x");
        }
        let _server = feeder.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_reads_do_not_time_out() {
        let (client, _server) = tokio::io::duplex(64);
        let mut stream = TimedStream::new(client, Duration::from_secs(30));
        let control = stream.control();
        let mut buf = [0u8; 8];

        let suspended = control.suspend_reads();
        let waited = tokio::time::timeout(Duration::from_secs(90), stream.read(&mut buf)).await;
        assert!(waited.is_err(), "read finished while suspended");
        drop(suspended);

        let resumed = tokio::time::Instant::now();
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(StageTimeout::find(&err), Some(Stage::Read));
        assert!(resumed.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_rearms_pending_read() {
        let (client, _server) = tokio::io::duplex(64);
        let mut stream = TimedStream::new(client, Duration::from_secs(30));
        let control = stream.control();

        let suspended = control.suspend_reads();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(suspended);
        });

        // One read spans the suspension and times out only after it ends
        let started = tokio::time::Instant::now();
        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() >= Duration::from_secs(90));
        release.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_blocked_write_times_out() {
        // Tiny pipe that nobody drains
        let (client, _server) = tokio::io::duplex(4);
        let mut stream = TimedStream::new(client, Duration::from_secs(30));

        let err = stream.write_all(b"more than four bytes").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert_eq!(StageTimeout::find(&err), Some(Stage::Write));
    }
}
