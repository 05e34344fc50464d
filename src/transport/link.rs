use super::message::{timestamp_ms, OutboundMessage};
use super::{lock, ConnectionState, OutboundQueues, Shared};
use crate::debug::drain_rt_log;
use anyhow::{anyhow, bail, Context};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tungstenite::client::IntoClientRequest;
use tungstenite::{Message, WebSocket};

/// How long the worker sleeps when both queues are empty.
const IDLE_POLL: Duration = Duration::from_millis(2);

struct Worker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Non-realtime half of the transport channel: connection management.
///
/// Cheap to clone. Never use it from the audio thread; `attempt_connect` can
/// take up to the configured connect timeout and `disconnect` joins a thread.
#[derive(Clone)]
pub struct TransportLink {
    shared: Arc<Shared>,
    worker: Arc<Mutex<Option<Worker>>>,
}

impl TransportLink {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self {
            shared,
            worker: Arc::new(Mutex::new(None)),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.load()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> &str {
        &self.shared.config.endpoint
    }

    /// Connects to the configured endpoint.
    pub fn connect_default(&self) -> ConnectionState {
        let endpoint = self.shared.config.endpoint.clone();
        self.attempt_connect(&endpoint)
    }

    /// Opens the socket, performs the WebSocket handshake and starts the
    /// outbound worker. Failures are logged and reported as `Disconnected`.
    pub fn attempt_connect(&self, endpoint: &str) -> ConnectionState {
        let mut worker = lock(&self.worker);

        if self.is_connected() && worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return ConnectionState::Connected;
        }
        // A finished worker has already parked the queues; collect it.
        Self::stop_worker(&mut worker);

        self.shared.state.store(ConnectionState::Connecting);
        log::info!("Connecting to Stage-Life app at {}", endpoint);

        let socket = match open_socket(endpoint, &self.shared) {
            Ok(socket) => socket,
            Err(e) => {
                log::warn!(
                    "Could not connect to Stage-Life app ({:#}), running in standalone mode",
                    e
                );
                self.shared.state.store(ConnectionState::Disconnected);
                return ConnectionState::Disconnected;
            }
        };

        // Nothing can be queued while Connecting, so after this everything in
        // the rings belongs to the new connection.
        match lock(&self.shared.queues).as_mut() {
            Some(queues) => {
                let mut scratch = Vec::with_capacity(self.shared.config.audio_queue_samples);
                let stale = queues.discard(&mut scratch);
                if stale > 0 {
                    log::debug!("Discarded {} stale audio chunks", stale);
                }
            }
            None => {
                log::error!("Outbound queues are missing, cannot start link worker");
                self.shared.state.store(ConnectionState::Disconnected);
                return ConnectionState::Disconnected;
            }
        }
        self.shared.epoch.fetch_add(1, Ordering::AcqRel);

        let stop = Arc::new(AtomicBool::new(false));
        let shared = self.shared.clone();
        let worker_stop = stop.clone();

        // Connected before the worker starts so a fast failure inside the
        // worker cannot be overwritten.
        if !self
            .shared
            .state
            .transition(ConnectionState::Connecting, ConnectionState::Connected)
        {
            return self.state();
        }

        let spawned = thread::Builder::new()
            .name("stagelife-link".into())
            .spawn(move || run_worker(shared, worker_stop, socket));

        match spawned {
            Ok(handle) => {
                *worker = Some(Worker { stop, handle });
                log::info!("Connected to Stage-Life app at {}", endpoint);
                ConnectionState::Connected
            }
            Err(e) => {
                log::error!("Failed to start link worker: {}", e);
                self.shared.state.store(ConnectionState::Disconnected);
                ConnectionState::Disconnected
            }
        }
    }

    /// Idempotent; safe when no connection was ever made.
    pub fn disconnect(&self) {
        let mut worker = lock(&self.worker);
        let was_connected = self.is_connected();
        Self::stop_worker(&mut worker);
        self.shared.state.store(ConnectionState::Disconnected);
        if was_connected {
            log::info!("Disconnected from Stage-Life app");
        }
    }

    fn stop_worker(worker: &mut Option<Worker>) {
        if let Some(w) = worker.take() {
            w.stop.store(true, Ordering::Release);
            w.handle.thread().unpark();
            if w.handle.join().is_err() {
                log::error!("Link worker panicked");
            }
        }
    }
}

fn open_socket(endpoint: &str, shared: &Shared) -> anyhow::Result<WebSocket<TcpStream>> {
    let config = &shared.config;
    let request = endpoint
        .into_client_request()
        .with_context(|| format!("invalid endpoint {:?}", endpoint))?;

    let uri = request.uri();
    match uri.scheme_str() {
        Some("ws") => {}
        other => bail!("unsupported scheme {:?}, only ws:// is supported", other),
    }
    let host = uri
        .host()
        .context("endpoint has no host")?
        .trim_matches(&['[', ']'][..])
        .to_string();
    let port = uri.port_u16().unwrap_or(80);

    let addrs = (host.as_str(), port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {}:{}", host, port))?;

    let mut last_err = None;
    let mut stream = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.connect_timeout()) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let stream = match (stream, last_err) {
        (Some(s), _) => s,
        (None, Some(e)) => return Err(e).with_context(|| format!("connecting to {}:{}", host, port)),
        (None, None) => bail!("{} resolved to no addresses", host),
    };

    // The handshake shares the connect budget; afterwards only writes matter.
    stream.set_read_timeout(Some(config.connect_timeout()))?;
    stream.set_write_timeout(Some(config.write_timeout()))?;
    stream.set_nodelay(true)?;

    let (socket, _response) = tungstenite::client(request, stream)
        .map_err(|e| anyhow!("websocket handshake failed: {}", e))?;
    Ok(socket)
}

fn run_worker(shared: Arc<Shared>, stop: Arc<AtomicBool>, mut socket: WebSocket<TcpStream>) {
    let Some(mut queues) = lock(&shared.queues).take() else {
        log::error!("Link worker started without outbound queues");
        shared.state.store(ConnectionState::Disconnected);
        return;
    };

    let mut scratch = Vec::with_capacity(shared.config.audio_queue_samples);

    match pump(&shared, &stop, &mut queues, &mut socket, &mut scratch) {
        Ok(()) => {
            let _ = socket.close(None);
            let _ = socket.flush();
        }
        Err(e) => log::warn!("Lost connection to Stage-Life app: {:#}", e),
    }

    shared.state.store(ConnectionState::Disconnected);
    *lock(&shared.queues) = Some(queues);
    drain_rt_log();
}

fn pump(
    shared: &Shared,
    stop: &AtomicBool,
    queues: &mut OutboundQueues,
    socket: &mut WebSocket<TcpStream>,
    scratch: &mut Vec<f32>,
) -> anyhow::Result<()> {
    while !stop.load(Ordering::Acquire) {
        let mut sent_any = false;

        while let Some(param) = queues.params.pop() {
            let json = OutboundMessage::ParameterUpdate {
                name: param.name.as_str(),
                value: param.value,
                timestamp: timestamp_ms(),
            }
            .to_json()?;
            socket
                .send(Message::Text(json))
                .context("sending parameter update")?;
            shared.meters.add_parameter_sent();
            sent_any = true;
        }

        while let Some(header) = queues.chunks.pop() {
            scratch.resize(header.len, 0.0);
            let got = queues.samples.pop_slice(&mut scratch[..header.len]);
            let json = OutboundMessage::AudioChunk {
                samples: &scratch[..got],
                sample_rate: header.sample_rate as f64,
                channels: 1,
                timestamp: timestamp_ms(),
            }
            .to_json()?;
            socket
                .send(Message::Text(json))
                .context("sending audio chunk")?;
            shared.meters.add_audio_sent();
            sent_any = true;

            if stop.load(Ordering::Acquire) {
                break;
            }
        }

        drain_rt_log();

        if !sent_any {
            thread::park_timeout(IDLE_POLL);
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
