//! WebSocket transport: one active connection to a prioritized server set
//!
//! The pool dials the highest-weight reachable server, delivers received
//! frames upward through an event channel and recovers from failures with
//! randomized exponential backoff. Frames sent while a connect is in
//! flight are queued and flushed on success; after a disconnect sending
//! fails immediately, retransmission is owned by the layers above.

use bytes::Bytes;
use bytesstr::BytesStr;
use parking_lot::Mutex;
use rand::Rng;
use sip_types::host::HostPort;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

#[cfg(feature = "websocket")]
pub mod ws;

/// A configured signaling server
#[derive(Debug, Clone)]
pub struct ServerDesc {
    pub ws_uri: BytesStr,
    pub weight: u32,
}

/// Backoff bounds of the connection recovery
#[derive(Debug, Clone, Copy)]
pub struct RecoveryConfig {
    pub min_interval: Duration,
    pub max_interval: Duration,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
        }
    }
}

/// Transport state reported to the owner of the pool
#[derive(Debug)]
pub enum TransportEvent {
    /// A connection to `server` is open
    Connected { server: BytesStr },
    /// The active connection is gone
    Closed { error: Option<String> },
    /// A connect attempt failed
    Error { server: BytesStr, error: String },
    /// One SIP message, as received in a single frame
    Message(Bytes),
}

/// A byte-framed duplex channel, one SIP message per frame
#[async_trait::async_trait]
pub trait Socket: Send + 'static {
    async fn send(&mut self, frame: Bytes) -> io::Result<()>;

    /// Receive the next frame; `None` once the peer closed the channel
    async fn recv(&mut self) -> Option<io::Result<Bytes>>;
}

/// Creates sockets from `ws://`/`wss://` URIs
#[async_trait::async_trait]
pub trait Factory: Send + Sync + 'static {
    async fn connect(&self, ws_uri: &str) -> io::Result<Box<dyn Socket>>;
}

#[derive(Debug)]
enum SendState {
    /// No connection and none in progress
    Down,
    /// Connect in flight, frames queue until it finishes
    Connecting(Vec<Bytes>),
    /// Connected, frames go to the writer task
    Up(mpsc::UnboundedSender<Bytes>),
}

struct Shared {
    state: Mutex<SendState>,
    via_host: HostPort,
    via_transport: Mutex<BytesStr>,
    secure: Mutex<bool>,
}

/// Handle used by the endpoint to reach the active connection
#[derive(Clone)]
pub struct TransportHandle {
    shared: Arc<Shared>,
}

impl TransportHandle {
    /// Handle that is never connected, only useful in tests
    pub fn detached() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SendState::Down),
                via_host: random_via_host(),
                via_transport: Mutex::new(BytesStr::from_static("WS")),
                secure: Mutex::new(false),
            }),
        }
    }

    pub fn send(&self, frame: Bytes) -> io::Result<()> {
        let mut state = self.shared.state.lock();

        match &mut *state {
            SendState::Down => Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "transport is down",
            )),
            SendState::Connecting(queue) => {
                queue.push(frame);
                Ok(())
            }
            SendState::Up(tx) => tx
                .send(frame)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "writer task gone")),
        }
    }

    pub fn is_up(&self) -> bool {
        matches!(&*self.shared.state.lock(), SendState::Up(_))
    }

    /// The host placed into Via headers, a random `.invalid` name as
    /// WebSocket clients have no routable sent-by address
    pub fn via_host(&self) -> HostPort {
        self.shared.via_host.clone()
    }

    pub fn via_transport(&self) -> BytesStr {
        self.shared.via_transport.lock().clone()
    }

    /// Was the active connection established over `wss://`
    pub fn secure(&self) -> bool {
        *self.shared.secure.lock()
    }
}

fn random_via_host() -> HostPort {
    use rand::distributions::Alphanumeric;

    let name: String = rand::thread_rng()
        .sample_iter(Alphanumeric)
        .take(12)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect();

    HostPort::host_name(format!("{}.invalid", name))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerStatus {
    Ready,
    Error,
}

struct Server {
    desc: ServerDesc,
    status: ServerStatus,
}

/// Drives the connection to the configured server set.
///
/// Constructed together with its [`TransportHandle`]; [`TransportPool::run`]
/// must be spawned to make the transport live.
pub struct TransportPool {
    servers: Vec<Server>,
    recovery: RecoveryConfig,
    factory: Arc<dyn Factory>,
    events: mpsc::UnboundedSender<TransportEvent>,
    shared: Arc<Shared>,
    closed: watch::Receiver<bool>,
    attempts: u32,
}

/// Closes the transport for good when asked to
pub struct TransportShutdown {
    tx: watch::Sender<bool>,
}

impl TransportShutdown {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl TransportPool {
    pub fn new(
        servers: Vec<ServerDesc>,
        recovery: RecoveryConfig,
        factory: Arc<dyn Factory>,
    ) -> (
        Self,
        TransportHandle,
        TransportShutdown,
        mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        assert!(!servers.is_empty(), "at least one server is required");

        let shared = Arc::new(Shared {
            state: Mutex::new(SendState::Down),
            via_host: random_via_host(),
            via_transport: Mutex::new(BytesStr::from_static("WS")),
            secure: Mutex::new(false),
        });

        let (events, events_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let pool = Self {
            servers: servers
                .into_iter()
                .map(|desc| Server {
                    desc,
                    status: ServerStatus::Ready,
                })
                .collect(),
            recovery,
            factory,
            events: events,
            shared: shared.clone(),
            closed: closed_rx,
            attempts: 0,
        };

        (
            pool,
            TransportHandle { shared },
            TransportShutdown { tx: closed_tx },
            events_rx,
        )
    }

    /// Report `TCP` instead of `WS` in Via headers
    pub fn set_via_transport(&self, transport: BytesStr) {
        *self.shared.via_transport.lock() = transport;
    }

    /// Connect and keep connected until shut down
    pub async fn run(mut self) {
        loop {
            if *self.closed.borrow() {
                break;
            }

            let Some(idx) = self.select_server(&mut rand::thread_rng()) else {
                // every server errored out, wait and retry with a reset pool
                let (delay, next_attempts) =
                    next_retry(self.attempts, self.recovery, &mut rand::thread_rng());
                self.attempts = next_attempts;

                log::info!("all signaling servers failed, retrying in {:?}", delay);

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = self.closed.changed() => break,
                }

                for server in &mut self.servers {
                    server.status = ServerStatus::Ready;
                }

                continue;
            };

            let ws_uri = self.servers[idx].desc.ws_uri.clone();

            *self.shared.state.lock() = SendState::Connecting(Vec::new());

            let connect = self.factory.connect(&ws_uri);

            let socket = tokio::select! {
                result = connect => result,
                _ = self.closed.changed() => break,
            };

            let mut socket = match socket {
                Ok(socket) => socket,
                Err(e) => {
                    self.servers[idx].status = ServerStatus::Error;
                    *self.shared.state.lock() = SendState::Down;

                    let _ = self.events.send(TransportEvent::Error {
                        server: ws_uri,
                        error: e.to_string(),
                    });

                    continue;
                }
            };

            self.attempts = 0;
            *self.shared.secure.lock() = ws_uri.starts_with("wss:");

            let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Bytes>();

            // promote queued frames collected while connecting
            {
                let mut state = self.shared.state.lock();

                if let SendState::Connecting(queue) =
                    std::mem::replace(&mut *state, SendState::Up(writer_tx))
                {
                    for frame in queue {
                        if let SendState::Up(tx) = &*state {
                            let _ = tx.send(frame);
                        }
                    }
                }
            }

            let _ = self.events.send(TransportEvent::Connected {
                server: ws_uri.clone(),
            });

            let error = loop {
                tokio::select! {
                    frame = writer_rx.recv() => {
                        match frame {
                            Some(frame) => {
                                if let Err(e) = socket.send(frame).await {
                                    break Some(e.to_string());
                                }
                            }
                            None => break None,
                        }
                    }
                    received = socket.recv() => {
                        match received {
                            Some(Ok(frame)) => {
                                let _ = self.events.send(TransportEvent::Message(frame));
                            }
                            Some(Err(e)) => break Some(e.to_string()),
                            None => break None,
                        }
                    }
                    _ = self.closed.changed() => break None,
                }
            };

            *self.shared.state.lock() = SendState::Down;

            // any close that was not requested counts against the server
            if !*self.closed.borrow() {
                self.servers[idx].status = ServerStatus::Error;
            }

            let _ = self.events.send(TransportEvent::Closed { error });
        }

        *self.shared.state.lock() = SendState::Down;
    }

    /// Pick among the ready servers with the highest weight, uniformly
    /// at random within that bucket
    fn select_server(&self, rng: &mut impl Rng) -> Option<usize> {
        let max_weight = self
            .servers
            .iter()
            .filter(|s| s.status == ServerStatus::Ready)
            .map(|s| s.desc.weight)
            .max()?;

        let bucket: Vec<usize> = self
            .servers
            .iter()
            .enumerate()
            .filter(|(_, s)| s.status == ServerStatus::Ready && s.desc.weight == max_weight)
            .map(|(idx, _)| idx)
            .collect();

        Some(bucket[rng.gen_range(0..bucket.len())])
    }
}

/// Compute the next recovery delay.
///
/// The delay is `k * min_interval` with `k` drawn uniformly from
/// `[1, 2^attempt]`, capped at `max_interval`. Reaching the cap resets
/// the attempt counter.
fn next_retry(attempts: u32, recovery: RecoveryConfig, rng: &mut impl Rng) -> (Duration, u32) {
    let spread = 2f64.powi(attempts.min(16) as i32);
    let k = rng.gen_range(1.0..=spread);

    let delay = recovery.min_interval.mul_f64(k);

    if delay >= recovery.max_interval {
        (recovery.max_interval, 0)
    } else {
        (delay, attempts + 1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::mock::StepRng;
    use rand::SeedableRng;

    fn pool(servers: Vec<(u32, ServerStatus)>) -> TransportPool {
        struct NoFactory;

        #[async_trait::async_trait]
        impl Factory for NoFactory {
            async fn connect(&self, _: &str) -> io::Result<Box<dyn Socket>> {
                Err(io::Error::new(io::ErrorKind::Other, "unused"))
            }
        }

        let descs = servers
            .iter()
            .enumerate()
            .map(|(idx, (weight, _))| ServerDesc {
                ws_uri: BytesStr::from(format!("wss://srv{}.example.com", idx)),
                weight: *weight,
            })
            .collect();

        let (mut pool, _, _, _) = TransportPool::new(descs, Default::default(), Arc::new(NoFactory));

        for (server, (_, status)) in pool.servers.iter_mut().zip(servers) {
            server.status = status;
        }

        pool
    }

    #[test]
    fn highest_weight_bucket_wins() {
        let pool = pool(vec![
            (2, ServerStatus::Ready),
            (1, ServerStatus::Ready),
            (2, ServerStatus::Ready),
        ]);

        let mut rng = rand::rngs::StdRng::seed_from_u64(7);

        for _ in 0..50 {
            let idx = pool.select_server(&mut rng).unwrap();
            assert!(idx == 0 || idx == 2);
        }
    }

    #[test]
    fn errored_servers_are_skipped() {
        let pool = pool(vec![(2, ServerStatus::Error), (1, ServerStatus::Ready)]);

        let mut rng = StepRng::new(0, 1);
        assert_eq!(pool.select_server(&mut rng), Some(1));
    }

    #[test]
    fn empty_pool_when_all_errored() {
        let pool = pool(vec![(2, ServerStatus::Error), (1, ServerStatus::Error)]);

        let mut rng = StepRng::new(0, 1);
        assert_eq!(pool.select_server(&mut rng), None);
    }

    #[test]
    fn retry_delay_within_bounds() {
        let recovery = RecoveryConfig {
            min_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
        };

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);

        // first attempt: k in [1, 2]
        let (delay, attempts) = next_retry(1, recovery, &mut rng);
        assert!(delay >= Duration::from_secs(2) && delay <= Duration::from_secs(4));
        assert_eq!(attempts, 2);
    }

    #[test]
    fn retry_cap_resets_attempts() {
        let recovery = RecoveryConfig {
            min_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(4),
        };

        let mut rng = rand::rngs::StdRng::seed_from_u64(3);

        let mut saw_reset = false;

        let mut attempts = 4;
        for _ in 0..16 {
            let (delay, next) = next_retry(attempts, recovery, &mut rng);
            assert!(delay <= recovery.max_interval);

            if next == 0 {
                assert_eq!(delay, recovery.max_interval);
                saw_reset = true;
                break;
            }

            attempts = next;
        }

        assert!(saw_reset);
    }
}
