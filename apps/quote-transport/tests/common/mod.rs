//! Shared fixtures for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::sink;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use quote_transport::application::ports::{WireSink, WireSource};
use quote_transport::{StreamConnector, StreamError, TransportEvent};

/// Test side of one fake streaming session.
pub struct FakeSession {
    /// URL the connector was asked to dial.
    pub url: String,
    /// Frames written by the client.
    pub outbound: mpsc::UnboundedReceiver<String>,
    /// Push frames to the client. Dropping it closes the channel.
    pub inbound: mpsc::UnboundedSender<Result<String, StreamError>>,
}

impl FakeSession {
    /// Push one inbound text frame.
    pub fn push(&self, frame: &str) {
        self.inbound.send(Ok(frame.to_string())).unwrap();
    }

    /// Next outbound frame, failing the test after `wait`.
    pub async fn next_frame(&mut self, wait: Duration) -> String {
        tokio::time::timeout(wait, self.outbound.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("client dropped the sink")
    }

    /// Drain outbound frames until `count` frames matching `pred` were seen.
    pub async fn collect_matching(
        &mut self,
        count: usize,
        wait: Duration,
        pred: impl Fn(&str) -> bool,
    ) -> Vec<String> {
        let mut seen = Vec::new();
        while seen.len() < count {
            let frame = self.next_frame(wait).await;
            if pred(&frame) {
                seen.push(frame);
            }
        }
        seen
    }
}

enum Script {
    Fail(StreamError),
}

/// Scripted in-memory `StreamConnector`.
///
/// Each `connect` pops the next scripted outcome; once the script is empty it
/// either keeps opening sessions or keeps failing, depending on construction.
pub struct FakeConnector {
    script: Mutex<VecDeque<Script>>,
    fail_forever: bool,
    attempts: Mutex<u32>,
    sessions_tx: mpsc::UnboundedSender<FakeSession>,
    sessions_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<FakeSession>>,
}

impl FakeConnector {
    fn build(script: VecDeque<Script>, fail_forever: bool) -> Self {
        let (sessions_tx, sessions_rx) = mpsc::unbounded_channel();
        Self {
            script: Mutex::new(script),
            fail_forever,
            attempts: Mutex::new(0),
            sessions_tx,
            sessions_rx: tokio::sync::Mutex::new(sessions_rx),
        }
    }

    /// Every attempt opens a session.
    pub fn healthy() -> Self {
        Self::build(VecDeque::new(), false)
    }

    /// The first `n` attempts fail, later ones succeed.
    pub fn failing_first(n: usize) -> Self {
        let script = (0..n)
            .map(|_| Script::Fail(StreamError::ConnectFailed("connection refused".into())))
            .collect();
        Self::build(script, false)
    }

    /// Every attempt fails.
    pub fn always_failing() -> Self {
        Self::build(VecDeque::new(), true)
    }

    /// First attempt is rejected with an auth error.
    pub fn auth_rejecting() -> Self {
        Self::build(
            VecDeque::from([Script::Fail(StreamError::AuthRejected("HTTP 401".into()))]),
            false,
        )
    }

    /// Open attempts seen so far.
    pub fn attempts(&self) -> u32 {
        *self.attempts.lock()
    }

    /// Wait for the next opened session.
    pub async fn next_session(&self, wait: Duration) -> FakeSession {
        tokio::time::timeout(wait, async { self.sessions_rx.lock().await.recv().await })
            .await
            .expect("timed out waiting for a session")
            .expect("connector dropped")
    }
}

#[async_trait]
impl StreamConnector for FakeConnector {
    async fn connect(&self, url: &str) -> Result<(WireSink, WireSource), StreamError> {
        *self.attempts.lock() += 1;

        let next = self.script.lock().pop_front();
        match next {
            Some(Script::Fail(e)) => return Err(e),
            None if self.fail_forever => {
                return Err(StreamError::ConnectFailed("connection refused".into()));
            }
            None => {}
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let sink = sink::unfold(out_tx, |tx, frame: String| async move {
            tx.send(frame).map_err(|_| StreamError::Closed)?;
            Ok::<_, StreamError>(tx)
        });
        let source = UnboundedReceiverStream::new(in_rx);

        let _ = self.sessions_tx.send(FakeSession {
            url: url.to_string(),
            outbound: out_rx,
            inbound: in_tx,
        });

        Ok((Box::pin(sink), Box::pin(source)))
    }
}

/// Wait until an event satisfying `pred` arrives on `rx`.
pub async fn wait_for_event(
    rx: &mut tokio::sync::broadcast::Receiver<TransportEvent>,
    wait: Duration,
    pred: impl Fn(&TransportEvent) -> bool,
) -> TransportEvent {
    tokio::time::timeout(wait, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                    panic!("event bus closed")
                }
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Drain every event currently queued on `rx`.
pub fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<TransportEvent>) -> Vec<TransportEvent> {
    let mut events = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(event) => events.push(event),
            Err(tokio::sync::broadcast::error::TryRecvError::Lagged(_)) => {}
            Err(_) => return events,
        }
    }
}
