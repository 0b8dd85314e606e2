//! Scripted transport used to drive the session and supervisor state
//! machines deterministically: writability is gated by an explicit capacity
//! budget and inbound events are injected by the test.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flood_gen::engine::transport::{TargetEndpoint, Transport, TransportFactory};
use tokio::sync::Notify;

pub enum ReadEvent {
    Data(Vec<u8>),
    Eof,
    Error(io::ErrorKind),
}

struct MockState {
    write_capacity: Mutex<usize>,
    write_error: Mutex<Option<io::ErrorKind>>,
    written: AtomicU64,
    read_events: Mutex<VecDeque<ReadEvent>>,
    hang_on_close: AtomicBool,
    write_notify: Notify,
    read_notify: Notify,
}

pub struct MockTransport {
    state: Arc<MockState>,
}

/// Test-side handle onto a transport produced by the connector.
#[derive(Clone)]
pub struct MockHandle {
    state: Arc<MockState>,
}

pub fn mock_pair(initial_capacity: usize) -> (MockTransport, MockHandle) {
    let state = Arc::new(MockState {
        write_capacity: Mutex::new(initial_capacity),
        write_error: Mutex::new(None),
        written: AtomicU64::new(0),
        read_events: Mutex::new(VecDeque::new()),
        hang_on_close: AtomicBool::new(false),
        write_notify: Notify::new(),
        read_notify: Notify::new(),
    });
    (
        MockTransport {
            state: Arc::clone(&state),
        },
        MockHandle { state },
    )
}

impl MockHandle {
    /// Grants the transport capacity for `n` more outbound bytes and fires
    /// the writability-changed notification.
    pub fn add_capacity(&self, n: usize) {
        *lock(&self.state.write_capacity) += n;
        self.state.write_notify.notify_one();
    }

    pub fn written(&self) -> u64 {
        self.state.written.load(Ordering::SeqCst)
    }

    pub fn push_read(&self, event: ReadEvent) {
        lock(&self.state.read_events).push_back(event);
        self.state.read_notify.notify_one();
    }

    /// Injects the benign forcible-close error the next read will surface.
    pub fn peer_reset(&self) {
        self.push_read(ReadEvent::Error(io::ErrorKind::ConnectionReset));
    }

    pub fn peer_close(&self) {
        self.push_read(ReadEvent::Eof);
    }

    /// The next write attempt fails with `kind`.
    pub fn fail_writes(&self, kind: io::ErrorKind) {
        *lock(&self.state.write_error) = Some(kind);
        self.state.write_notify.notify_one();
    }

    /// Makes `close` hang forever, for exercising forced termination.
    pub fn hang_on_close(&self) {
        self.state.hang_on_close.store(true, Ordering::SeqCst);
    }
}

impl Transport for MockTransport {
    fn writable(&self) -> impl Future<Output = io::Result<()>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            loop {
                if *lock(&state.write_capacity) > 0 || lock(&state.write_error).is_some() {
                    return Ok(());
                }
                state.write_notify.notified().await;
            }
        }
    }

    fn readable(&self) -> impl Future<Output = io::Result<()>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            loop {
                if !lock(&state.read_events).is_empty() {
                    return Ok(());
                }
                state.read_notify.notified().await;
            }
        }
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        if let Some(kind) = lock(&self.state.write_error).take() {
            return Err(io::Error::new(kind, "injected write error"));
        }
        let mut capacity = lock(&self.state.write_capacity);
        if *capacity == 0 {
            return Err(io::Error::new(io::ErrorKind::WouldBlock, "no capacity"));
        }
        let n = buf.len().min(*capacity);
        *capacity -= n;
        self.state.written.fetch_add(n as u64, Ordering::SeqCst);
        Ok(n)
    }

    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match lock(&self.state.read_events).pop_front() {
            Some(ReadEvent::Data(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(ReadEvent::Eof) => Ok(0),
            Some(ReadEvent::Error(kind)) => Err(io::Error::new(kind, "injected read error")),
            None => Err(io::Error::new(io::ErrorKind::WouldBlock, "no inbound data")),
        }
    }

    fn close(&mut self) -> impl Future<Output = io::Result<()>> + Send {
        let state = Arc::clone(&self.state);
        async move {
            if state.hang_on_close.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ConnectScript {
    /// Yield a transport with this initial write capacity.
    Accept(usize),
    Refused,
}

/// Factory whose connect outcomes follow a script, falling back to a default
/// once the script is exhausted.
pub struct MockConnector {
    scripts: Mutex<VecDeque<ConnectScript>>,
    fallback: ConnectScript,
    attempts: AtomicU64,
    handles: Mutex<Vec<MockHandle>>,
}

impl MockConnector {
    pub fn new(fallback: ConnectScript) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            attempts: AtomicU64::new(0),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_scripts(
        fallback: ConnectScript,
        scripts: impl IntoIterator<Item = ConnectScript>,
    ) -> Self {
        let connector = Self::new(fallback);
        *lock(&connector.scripts) = scripts.into_iter().collect();
        connector
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn handle_count(&self) -> usize {
        lock(&self.handles).len()
    }

    pub fn handle(&self, index: usize) -> MockHandle {
        lock(&self.handles)[index].clone()
    }
}

impl TransportFactory for MockConnector {
    type Conn = MockTransport;

    fn connect(
        &self,
        _endpoint: &TargetEndpoint,
    ) -> impl Future<Output = io::Result<MockTransport>> + Send {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let script = lock(&self.scripts).pop_front().unwrap_or(self.fallback);
        let result = match script {
            ConnectScript::Accept(capacity) => {
                let (transport, handle) = mock_pair(capacity);
                lock(&self.handles).push(handle);
                Ok(transport)
            }
            ConnectScript::Refused => Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "connection refused",
            )),
        };
        async move {
            // Refused connects resolve instantly; keep a little latency so
            // the immediate-reconnect loop stays cooperative on a
            // single-threaded test runtime.
            if result.is_err() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
            result
        }
    }
}

pub async fn endpoint() -> TargetEndpoint {
    TargetEndpoint::resolve("127.0.0.1", 9)
        .await
        .expect("loopback endpoint resolves")
}

/// Polls `cond` until it holds or the timeout elapses.
pub async fn wait_for(what: &str, timeout: Duration, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {}",
            what
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().expect("mock state lock")
}
