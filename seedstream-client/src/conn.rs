use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use seedstream_protocol::frame::HEADER_LEN;
use seedstream_protocol::mseed::{self, RecordCheck, RecordSummary};
use seedstream_protocol::response::{self, Response};
use seedstream_protocol::{Command, FrameHeader, InfoLevel, SequenceNumber};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, info, trace, warn};

use crate::buffer::RecvBuffer;
use crate::config::ConnConfig;
use crate::error::{ClientError, Result};
use crate::registry::StreamRegistry;
use crate::statefile;

/// Upper bound on one socket readiness wait in the blocking collect variant.
const SOCKET_WAIT: Duration = Duration::from_millis(500);
/// Throttle while waiting out the reconnect delay.
const RECONNECT_TICK: Duration = Duration::from_millis(500);

/// Connection lifecycle state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ConnState {
    /// No socket.
    Down,
    /// Socket open, negotiating.
    Up,
    /// Subscriptions configured, binary frames flowing.
    DataFlow,
}

/// Batch mode progression. The server may refuse the request, in which case
/// per-command acknowledgements keep flowing.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BatchMode {
    Off,
    Requested,
    Activated,
}

/// What the engine is currently expecting INFO frames for.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum QueryMode {
    Idle,
    Info(InfoLevel),
    KeepAlive,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TimerState {
    Idle,
    Running(Instant),
    Expired,
}

/// Tri-state interval timer: idle until first evaluated, then running until
/// the interval elapses, then expired until restarted.
#[derive(Debug)]
struct Timer {
    state: TimerState,
    interval: Duration,
}

impl Timer {
    fn new(interval: Duration) -> Self {
        Self {
            state: TimerState::Idle,
            interval,
        }
    }

    /// A timer that is already expired, so the first evaluation fires.
    fn expired(interval: Duration) -> Self {
        Self {
            state: TimerState::Expired,
            interval,
        }
    }

    fn restart(&mut self) {
        self.state = TimerState::Idle;
    }

    /// Advance the state against `now`; returns true once expired.
    fn evaluate(&mut self, now: Instant) -> bool {
        match self.state {
            TimerState::Idle => {
                self.state = TimerState::Running(now);
                false
            }
            TimerState::Running(start) => {
                if now.duration_since(start) >= self.interval {
                    self.state = TimerState::Expired;
                    true
                } else {
                    false
                }
            }
            TimerState::Expired => true,
        }
    }
}

/// Server identification from the HELLO exchange.
#[derive(Clone, Debug)]
pub struct ServerIdent {
    /// Software name, e.g. `"SeedLink"`.
    pub software: String,
    /// Version token, e.g. `"v3.1"`.
    pub version: String,
    /// Organization line.
    pub organization: String,
    /// Numeric protocol version parsed from the version token; `0.0` when
    /// the server did not advertise one.
    pub protocol_version: f32,
}

/// One delivered miniSEED record with its SeedLink sequence number.
#[derive(Clone, Debug)]
pub struct Packet {
    pub sequence: SequenceNumber,
    /// Parsed header fields (stream identity, start time, type).
    pub summary: RecordSummary,
    /// The raw record exactly as received.
    pub record: Vec<u8>,
}

impl Packet {
    /// Decode the record with the external miniSEED decoder.
    pub fn decode(&self) -> Result<miniseed_rs::MseedRecord> {
        Ok(miniseed_rs::decode(&self.record)?)
    }
}

/// A reassembled INFO response.
#[derive(Clone, Debug)]
pub struct InfoResponse {
    pub level: InfoLevel,
    /// The concatenated XML document from all response frames.
    pub xml: String,
}

/// Result of one [`SlConnection::collect`] call.
#[derive(Debug)]
pub enum Collected {
    /// A data packet was delivered.
    Packet(Packet),
    /// An INFO response completed.
    Info(InfoResponse),
    /// Nothing available right now (non-blocking variant only).
    NoPacket,
    /// The connection has shut down.
    Terminated,
}

/// Cloneable handle that requests cooperative shutdown, safe to trigger
/// from a signal task.
#[derive(Clone, Debug)]
pub struct TerminateHandle {
    flag: Arc<AtomicBool>,
}

impl TerminateHandle {
    pub fn terminate(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }
}

/// Internal outcome of one state-machine step.
enum Step {
    Yield(Collected),
    Continue,
    Idle,
}

/// A SeedLink connection: negotiation, streaming, keepalive, and reconnect
/// with sequence-numbered resume.
///
/// Drive it by calling [`collect`](Self::collect) in a loop from a single
/// task. All network failures are handled internally by reconnecting after
/// the configured delay; only non-recoverable conditions surface as errors.
///
/// # Example
///
/// ```no_run
/// # async fn example() -> seedstream_client::Result<()> {
/// use seedstream_client::{Collected, ConnConfig, SlConnection};
///
/// let mut conn = SlConnection::new(ConnConfig::new("geofon.gfz.de:18000"))?;
/// conn.add_stream("GE", "WLF", vec!["BHZ".into()])?;
///
/// loop {
///     match conn.collect().await? {
///         Collected::Packet(packet) => println!("seq {}", packet.sequence),
///         Collected::Terminated => break,
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct SlConnection {
    config: ConnConfig,
    registry: StreamRegistry,
    stream: Option<TcpStream>,
    buffer: RecvBuffer,
    state: ConnState,
    batch: BatchMode,
    server: Option<ServerIdent>,
    query: QueryMode,
    expect_info: bool,
    pending_info: Option<InfoLevel>,
    info_buf: Vec<u8>,
    end_seen: bool,
    terminate_flag: Arc<AtomicBool>,
    netto: Timer,
    netdly: Timer,
    keepalive: Timer,
}

impl SlConnection {
    pub fn new(config: ConnConfig) -> Result<Self> {
        config.validate()?;
        let batch = if config.batch {
            BatchMode::Requested
        } else {
            BatchMode::Off
        };
        Ok(Self {
            netto: Timer::new(config.network_timeout),
            // The first connection attempt happens immediately.
            netdly: Timer::expired(config.reconnect_delay),
            keepalive: Timer::new(config.keepalive),
            batch,
            config,
            registry: StreamRegistry::new(),
            stream: None,
            buffer: RecvBuffer::new(),
            state: ConnState::Down,
            server: None,
            query: QueryMode::Idle,
            expect_info: false,
            pending_info: None,
            info_buf: Vec::new(),
            end_seen: false,
            terminate_flag: Arc::new(AtomicBool::new(false)),
        })
    }

    // -- Configuration (before the first collect) --

    /// Subscribe to one station. See [`StreamRegistry::add`].
    pub fn add_stream(
        &mut self,
        network: &str,
        station: &str,
        selectors: Vec<String>,
    ) -> Result<()> {
        self.registry.add(network, station, selectors)
    }

    /// Subscribe to all stations the server carries (uni-station mode).
    pub fn set_uni_station(&mut self, selectors: Vec<String>) -> Result<()> {
        self.registry.set_uni(selectors)
    }

    /// Queue an INFO request; it is sent once streaming with no other INFO
    /// exchange in flight.
    pub fn request_info(&mut self, level: InfoLevel) -> Result<()> {
        if self.pending_info.is_some() || matches!(self.query, QueryMode::Info(_)) {
            return Err(ClientError::InfoPending);
        }
        self.pending_info = Some(level);
        Ok(())
    }

    // -- Accessors --

    pub fn config(&self) -> &ConnConfig {
        &self.config
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    /// Server identification, available once connected.
    pub fn server(&self) -> Option<&ServerIdent> {
        self.server.as_ref()
    }

    pub fn batch_mode(&self) -> BatchMode {
        self.batch
    }

    // -- State persistence --

    /// Restore resume points from a state file. Missing files are not an
    /// error on a first run.
    pub async fn load_state(&mut self, path: &Path) -> Result<usize> {
        statefile::load(path, &mut self.registry).await
    }

    /// Write the registry's resume points to a state file.
    pub async fn save_state(&self, path: &Path) -> Result<()> {
        statefile::save(path, &self.registry).await
    }

    // -- Termination --

    /// Request cooperative shutdown; the next collect step sends `BYE` and
    /// returns [`Collected::Terminated`] once the buffer is drained.
    pub fn terminate(&self) {
        self.terminate_flag.store(true, Ordering::Relaxed);
    }

    pub fn terminate_handle(&self) -> TerminateHandle {
        TerminateHandle {
            flag: Arc::clone(&self.terminate_flag),
        }
    }

    // -- Collecting --

    /// Drive the connection until a packet, a completed INFO response, or
    /// termination. Blocks in ticks of at most ~500 ms on socket readiness.
    pub async fn collect(&mut self) -> Result<Collected> {
        loop {
            match self.step(true).await? {
                Step::Yield(collected) => return Ok(collected),
                Step::Continue | Step::Idle => {}
            }
        }
    }

    /// Non-blocking variant: one pass over the state machine with a single
    /// non-blocking read attempt, returning [`Collected::NoPacket`] when
    /// nothing is available.
    pub async fn collect_nb(&mut self) -> Result<Collected> {
        loop {
            match self.step(false).await? {
                Step::Yield(collected) => return Ok(collected),
                Step::Continue => {}
                Step::Idle => return Ok(Collected::NoPacket),
            }
        }
    }

    // -- State machine --

    async fn step(&mut self, blocking: bool) -> Result<Step> {
        if self.terminate_flag.load(Ordering::Relaxed) {
            return self.shutdown().await;
        }

        let now = Instant::now();
        let netto_expired = self.netto.evaluate(now);
        let netdly_expired = self.netdly.evaluate(now);
        let keepalive_expired = self.keepalive.evaluate(now);

        match self.state {
            ConnState::Down => {
                if !netdly_expired {
                    if !blocking {
                        return Ok(Step::Idle);
                    }
                    tokio::time::sleep(RECONNECT_TICK).await;
                    return Ok(Step::Continue);
                }
                match self.open_connection().await {
                    Ok(()) => {
                        self.state = ConnState::Up;
                        self.netdly.restart();
                        self.netto.restart();
                        Ok(Step::Continue)
                    }
                    Err(e) if e.is_recoverable() => {
                        warn!(addr = %self.config.address, error = %e, "connection failed");
                        self.disconnect();
                        Ok(Step::Continue)
                    }
                    Err(e) => Err(e),
                }
            }

            ConnState::Up => match self.negotiate().await {
                Ok(()) => {
                    self.state = ConnState::DataFlow;
                    self.netto.restart();
                    self.keepalive.restart();
                    debug!("streaming");
                    Ok(Step::Continue)
                }
                Err(e) if e.is_recoverable() => {
                    warn!(error = %e, "negotiation failed");
                    self.disconnect();
                    Ok(Step::Continue)
                }
                Err(e) => Err(e),
            },

            ConnState::DataFlow => {
                if netto_expired && !self.config.network_timeout.is_zero() {
                    warn!(
                        timeout = ?self.config.network_timeout,
                        "no data within network timeout, reconnecting"
                    );
                    self.disconnect();
                    return Ok(Step::Continue);
                }

                if keepalive_expired && !self.config.keepalive.is_zero() && !self.expect_info {
                    trace!("sending keepalive");
                    if let Err(e) = self.send(&Command::Info { level: InfoLevel::Id }).await {
                        warn!(error = %e, "keepalive failed");
                        self.disconnect();
                        return Ok(Step::Continue);
                    }
                    self.query = QueryMode::KeepAlive;
                    self.expect_info = true;
                    self.keepalive.restart();
                }

                if self.pending_info.is_some() && !self.expect_info {
                    let level = self.pending_info.take().unwrap_or(InfoLevel::Id);
                    debug!(%level, "requesting info");
                    if let Err(e) = self.send(&Command::Info { level }).await {
                        warn!(error = %e, "info request failed");
                        self.pending_info = Some(level);
                        self.disconnect();
                        return Ok(Step::Continue);
                    }
                    self.query = QueryMode::Info(level);
                    self.expect_info = true;
                }

                // Deliver anything already buffered before touching the socket.
                if let Some(collected) = self.advance()? {
                    return Ok(Step::Yield(collected));
                }

                self.read_socket(blocking).await
            }
        }
    }

    /// Graceful shutdown: drain buffered frames, send `BYE` where the
    /// protocol allows a farewell, close the socket.
    async fn shutdown(&mut self) -> Result<Step> {
        if self.state == ConnState::DataFlow {
            match self.advance() {
                Ok(Some(collected)) => return Ok(Step::Yield(collected)),
                Ok(None) => {}
                Err(e) => debug!(error = %e, "ignoring decode error during shutdown"),
            }
        }
        if let Some(mut stream) = self.stream.take() {
            if !self.config.dialup && !self.end_seen && self.batch != BatchMode::Activated {
                let _ = stream.write_all(&Command::Bye.to_wire()).await;
            }
            let _ = stream.shutdown().await;
        }
        self.state = ConnState::Down;
        self.buffer.clear();
        info!("terminated");
        Ok(Step::Yield(Collected::Terminated))
    }

    /// Drop the socket and reset per-connection state; the reconnect delay
    /// starts counting from here.
    fn disconnect(&mut self) {
        self.stream = None;
        self.state = ConnState::Down;
        self.buffer.clear();
        self.expect_info = false;
        self.info_buf.clear();
        // An interrupted INFO exchange is re-requested after reconnect.
        if let QueryMode::Info(level) = self.query {
            self.pending_info = Some(level);
        }
        self.query = QueryMode::Idle;
        self.batch = if self.config.batch {
            BatchMode::Requested
        } else {
            BatchMode::Off
        };
        self.netdly.restart();
        self.netto.restart();
        self.keepalive.restart();
    }

    async fn open_connection(&mut self) -> Result<()> {
        debug!(addr = %self.config.address, "connecting");
        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(&self.config.address),
        )
        .await
        .map_err(|_| ClientError::Timeout(self.config.connect_timeout))??;
        stream.set_nodelay(true).ok();
        self.stream = Some(stream);

        self.send(&Command::Hello).await?;
        let line1 = self.read_line().await?;
        let line2 = self.read_line().await?;
        let (software, version, organization) = match Response::parse_hello(&line1, &line2) {
            Ok(Response::Hello {
                software,
                version,
                organization,
                ..
            }) => (software, version, organization),
            _ => {
                return Err(ClientError::Negotiation(format!(
                    "malformed HELLO response: {line1:?}"
                )));
            }
        };
        let protocol_version = response::version_number(&version).unwrap_or(0.0);
        info!(%software, %version, %organization, "connected");
        self.server = Some(ServerIdent {
            software,
            version,
            organization,
            protocol_version,
        });
        Ok(())
    }

    /// Configure the just-opened connection: batch request, subscription
    /// commands per registry entry, then `END`.
    async fn negotiate(&mut self) -> Result<()> {
        let version = self
            .server
            .as_ref()
            .map(|s| s.protocol_version)
            .unwrap_or(0.0);

        if self.batch == BatchMode::Requested {
            if version >= 3.0 {
                self.send(&Command::Batch).await?;
                if self.read_ok_error("BATCH").await? {
                    self.batch = BatchMode::Activated;
                    debug!("batch mode activated");
                } else {
                    warn!("server refused batch mode");
                }
            } else {
                debug!(%version, "server too old for batch mode");
            }
        }

        if self.registry.is_empty() {
            debug!("no subscriptions configured");
            return Ok(());
        }

        if self.registry.is_uni() {
            let entry = self.registry.iter().next().cloned();
            if let Some(entry) = entry {
                for selector in entry.selectors.clone() {
                    self.send(&Command::Select {
                        pattern: Some(selector),
                    })
                    .await?;
                    self.await_ack("SELECT").await?;
                }
                let flow = self.flow_command(&entry);
                self.send(&flow).await?;
                self.await_ack("DATA").await?;
            }
        } else {
            if version > 0.0 && version < 2.5 {
                return Err(ClientError::Negotiation(format!(
                    "server protocol {version} predates multi-station mode"
                )));
            }
            let entries: Vec<_> = self.registry.iter().cloned().collect();
            for entry in entries {
                self.send(&Command::Station {
                    station: entry.station.clone(),
                    network: entry.network.clone(),
                })
                .await?;
                self.await_ack("STATION").await?;
                for selector in entry.selectors.clone() {
                    self.send(&Command::Select {
                        pattern: Some(selector),
                    })
                    .await?;
                    self.await_ack("SELECT").await?;
                }
                let flow = self.flow_command(&entry);
                self.send(&flow).await?;
                self.await_ack("DATA").await?;
            }
        }

        self.send(&Command::End).await?;
        Ok(())
    }

    /// The per-entry streaming command: a user time window overrides the
    /// stored resume point; dial-up mode uses `FETCH` instead of `DATA`.
    fn flow_command(&self, entry: &crate::registry::StreamEntry) -> Command {
        if let Some(ref start) = self.config.start_time {
            return Command::Time {
                start: start.clone(),
                end: self.config.end_time.clone(),
            };
        }
        let sequence = if self.config.resume && entry.seqnum.is_set() {
            Some(entry.seqnum)
        } else {
            None
        };
        let start = if sequence.is_some() && !entry.timestamp.is_empty() {
            Some(entry.timestamp.clone())
        } else {
            None
        };
        if self.config.dialup {
            Command::Fetch { sequence, start }
        } else {
            Command::Data { sequence, start }
        }
    }

    /// Read an OK/ERROR acknowledgement unless batch mode suppressed it.
    async fn await_ack(&mut self, what: &str) -> Result<()> {
        if self.batch == BatchMode::Activated {
            return Ok(());
        }
        if self.read_ok_error(what).await? {
            Ok(())
        } else {
            Err(ClientError::Negotiation(format!("{what} refused by server")))
        }
    }

    /// Read one reply line; true for OK, false for ERROR.
    async fn read_ok_error(&mut self, what: &str) -> Result<bool> {
        let line = self.read_line().await?;
        match Response::parse_line(&line) {
            Ok(Response::Ok) => Ok(true),
            Ok(Response::Error { description }) => {
                if !description.is_empty() {
                    debug!(%description, "server error reply");
                }
                Ok(false)
            }
            _ => Err(ClientError::Negotiation(format!(
                "unexpected reply to {what}: {line:?}"
            ))),
        }
    }

    async fn send(&mut self, cmd: &Command) -> Result<()> {
        trace!(%cmd, "send");
        let stream = self.stream.as_mut().ok_or(ClientError::Disconnected)?;
        stream.write_all(&cmd.to_wire()).await?;
        Ok(())
    }

    /// Read one `\r\n` line during the text phase of the protocol.
    async fn read_line(&mut self) -> Result<String> {
        let deadline = Instant::now() + self.config.read_timeout;
        loop {
            if let Some(line) = self.buffer.take_line() {
                trace!(%line, "recv");
                return Ok(line);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Timeout(self.config.read_timeout));
            }
            let stream = self.stream.as_mut().ok_or(ClientError::Disconnected)?;
            let space = self.buffer.writable();
            let n = tokio::time::timeout(remaining, stream.read(space))
                .await
                .map_err(|_| ClientError::Timeout(self.config.read_timeout))??;
            if n == 0 {
                return Err(ClientError::Disconnected);
            }
            self.buffer.commit(n);
        }
    }

    /// One socket read: blocking waits up to [`SOCKET_WAIT`], non-blocking
    /// attempts a single `try_read`.
    async fn read_socket(&mut self, blocking: bool) -> Result<Step> {
        if self.stream.is_none() {
            return Ok(Step::Continue);
        }
        if self.buffer.writable().is_empty() {
            // Records larger than the buffer do not exist in the protocol.
            return Err(self.fail_stream("receive buffer overflow"));
        }
        let stream = self.stream.as_mut().ok_or(ClientError::Disconnected)?;
        let space = self.buffer.writable();

        let result = if blocking {
            match tokio::time::timeout(SOCKET_WAIT, stream.read(space)).await {
                Err(_) => return Ok(Step::Idle),
                Ok(r) => r,
            }
        } else {
            match stream.try_read(space) {
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return Ok(Step::Idle);
                }
                r => r,
            }
        };

        match result {
            Ok(0) => {
                info!("server closed connection");
                self.disconnect();
                Ok(Step::Continue)
            }
            Ok(n) => {
                self.buffer.commit(n);
                self.netto.restart();
                self.keepalive.restart();
                Ok(Step::Continue)
            }
            Err(e) => {
                warn!(error = %e, "socket error");
                self.disconnect();
                Ok(Step::Continue)
            }
        }
    }

    /// Peel completed frames off the buffer head until one yields something
    /// for the caller or more bytes are needed.
    fn advance(&mut self) -> Result<Option<Collected>> {
        loop {
            if self.buffer.is_empty() {
                return Ok(None);
            }

            // End-of-stream sentinels arrive in place of a frame header.
            let avail = self.buffer.available();
            if avail == b"END".as_slice() {
                info!("end of buffered data");
                self.end_seen = true;
                self.terminate_flag.store(true, Ordering::Relaxed);
                self.stream = None;
                self.state = ConnState::Down;
                self.buffer.clear();
                return Ok(Some(Collected::Terminated));
            }
            if avail == b"ERROR\r\n".as_slice() {
                error!("server reported an error condition");
                self.terminate_flag.store(true, Ordering::Relaxed);
                self.stream = None;
                self.state = ConnState::Down;
                self.buffer.clear();
                return Err(ClientError::ServerError);
            }

            if avail.len() < HEADER_LEN + mseed::MIN_RECLEN {
                return Ok(None);
            }

            let head: [u8; HEADER_LEN] = avail[..HEADER_LEN].try_into().unwrap();
            let header = match FrameHeader::parse(&head) {
                Ok(header) => header,
                Err(e) => return Err(self.fail_stream(&format!("bad frame header: {e}"))),
            };

            let reclen = match mseed::detect(&avail[HEADER_LEN..]) {
                RecordCheck::Incomplete => return Ok(None),
                RecordCheck::Invalid => {
                    return Err(self.fail_stream("unrecognized miniSEED record"));
                }
                RecordCheck::Complete(len) => len,
            };
            if avail.len() < HEADER_LEN + reclen {
                return Ok(None);
            }

            let record = avail[HEADER_LEN..HEADER_LEN + reclen].to_vec();
            self.buffer.consume(HEADER_LEN + reclen);

            match header {
                FrameHeader::Info { terminated } => {
                    if let Some(collected) = self.ingest_info(&record, terminated) {
                        return Ok(Some(collected));
                    }
                }
                FrameHeader::Data { sequence } => {
                    if let Some(packet) = self.ingest_data(sequence, record) {
                        return Ok(Some(Collected::Packet(packet)));
                    }
                }
            }
        }
    }

    /// Accumulate one INFO record; on the terminator, resolve the exchange.
    fn ingest_info(&mut self, record: &[u8], terminated: bool) -> Option<Collected> {
        let payload = mseed::data_payload(record);
        let text_end = payload.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        self.info_buf.extend_from_slice(&payload[..text_end]);

        if !terminated {
            if self.query == QueryMode::KeepAlive {
                warn!("unterminated keepalive response");
            }
            return None;
        }

        let xml = String::from_utf8_lossy(&self.info_buf).into_owned();
        self.info_buf.clear();
        self.expect_info = false;
        match std::mem::replace(&mut self.query, QueryMode::Idle) {
            QueryMode::KeepAlive => {
                trace!("keepalive acknowledged");
                None
            }
            QueryMode::Info(level) => Some(Collected::Info(InfoResponse { level, xml })),
            QueryMode::Idle => {
                warn!("unsolicited info response discarded");
                None
            }
        }
    }

    /// Update the registry for one data record; unmatched records are
    /// logged and dropped.
    fn ingest_data(&mut self, sequence: SequenceNumber, record: Vec<u8>) -> Option<Packet> {
        let summary = match RecordSummary::parse(&record) {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, %sequence, "skipping record with unreadable header");
                return None;
            }
        };
        let timestamp = summary.start_time();
        let updated = self.registry.match_and_update(
            &summary.network,
            &summary.station,
            sequence,
            &timestamp,
        );
        if updated == 0 && !self.registry.is_empty() {
            warn!(
                network = %summary.network,
                station = %summary.station,
                %sequence,
                "packet for unexpected stream"
            );
            return None;
        }
        trace!(
            network = %summary.network,
            station = %summary.station,
            %sequence,
            "packet"
        );
        Some(Packet {
            sequence,
            summary,
            record,
        })
    }

    /// Non-recoverable stream corruption: close and return the error.
    fn fail_stream(&mut self, reason: &str) -> ClientError {
        error!(reason, "terminating connection");
        self.terminate_flag.store(true, Ordering::Relaxed);
        self.stream = None;
        self.state = ConnState::Down;
        self.buffer.clear();
        ClientError::BadStream(reason.to_owned())
    }
}

/// Connect, exchange HELLO, and return the two server identification lines.
pub async fn ping(addr: &str, timeout: Duration) -> Result<(String, String)> {
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| ClientError::Timeout(timeout))??;
    stream.write_all(&Command::Hello.to_wire()).await?;

    let mut collected = Vec::new();
    let mut chunk = [0u8; 256];
    while collected.iter().filter(|&&b| b == b'\n').count() < 2 {
        let n = tokio::time::timeout(timeout, stream.read(&mut chunk))
            .await
            .map_err(|_| ClientError::Timeout(timeout))??;
        if n == 0 {
            return Err(ClientError::Disconnected);
        }
        collected.extend_from_slice(&chunk[..n]);
    }
    let _ = stream.write_all(&Command::Bye.to_wire()).await;

    let text = String::from_utf8_lossy(&collected);
    let mut lines = text.lines();
    let ident = lines.next().unwrap_or("").to_owned();
    let organization = lines.next().unwrap_or("").to_owned();
    Ok((ident, organization))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StreamEntry;

    fn running_after(timer: &mut Timer, start: Instant) {
        assert!(!timer.evaluate(start));
        assert!(matches!(timer.state, TimerState::Running(_)));
    }

    #[test]
    fn timer_idle_to_running_to_expired() {
        let mut timer = Timer::new(Duration::from_secs(10));
        let start = Instant::now();
        running_after(&mut timer, start);
        assert!(!timer.evaluate(start + Duration::from_secs(9)));
        assert!(timer.evaluate(start + Duration::from_secs(10)));
        assert!(timer.evaluate(start + Duration::from_secs(11)));
    }

    #[test]
    fn timer_restart_rearms() {
        let mut timer = Timer::new(Duration::from_secs(1));
        let start = Instant::now();
        running_after(&mut timer, start);
        assert!(timer.evaluate(start + Duration::from_secs(2)));
        timer.restart();
        running_after(&mut timer, start + Duration::from_secs(2));
    }

    #[test]
    fn timer_expired_constructor_fires_immediately() {
        let mut timer = Timer::expired(Duration::from_secs(30));
        assert!(timer.evaluate(Instant::now()));
    }

    fn entry_with(seqnum: SequenceNumber, timestamp: &str) -> StreamEntry {
        StreamEntry {
            network: "IU".into(),
            station: "ANMO".into(),
            selectors: vec![],
            seqnum,
            timestamp: timestamp.into(),
        }
    }

    fn conn(config: ConnConfig) -> SlConnection {
        SlConnection::new(config).unwrap()
    }

    #[test]
    fn flow_command_without_resume_point() {
        let conn = conn(ConnConfig::new("h:18000"));
        let cmd = conn.flow_command(&entry_with(SequenceNumber::UNSET, ""));
        assert_eq!(
            cmd,
            Command::Data {
                sequence: None,
                start: None
            }
        );
    }

    #[test]
    fn flow_command_with_resume_point() {
        let conn = conn(ConnConfig::new("h:18000"));
        let cmd = conn.flow_command(&entry_with(
            SequenceNumber::new(0x00ABCD),
            "2024,05,01,10,30,45",
        ));
        assert_eq!(
            cmd,
            Command::Data {
                sequence: Some(SequenceNumber::new(0x00ABCD)),
                start: Some("2024,05,01,10,30,45".into()),
            }
        );
    }

    #[test]
    fn flow_command_resume_disabled() {
        let config = ConnConfig {
            resume: false,
            ..ConnConfig::new("h:18000")
        };
        let conn = conn(config);
        let cmd = conn.flow_command(&entry_with(SequenceNumber::new(7), "t"));
        assert_eq!(
            cmd,
            Command::Data {
                sequence: None,
                start: None
            }
        );
    }

    #[test]
    fn flow_command_dialup_uses_fetch() {
        let config = ConnConfig {
            dialup: true,
            ..ConnConfig::new("h:18000")
        };
        let conn = conn(config);
        let cmd = conn.flow_command(&entry_with(SequenceNumber::UNSET, ""));
        assert!(matches!(cmd, Command::Fetch { .. }));
    }

    #[test]
    fn flow_command_time_window_overrides_resume() {
        let config = ConnConfig {
            start_time: Some("2024,01,01,00,00,00".into()),
            end_time: Some("2024,01,02,00,00,00".into()),
            ..ConnConfig::new("h:18000")
        };
        let conn = conn(config);
        let cmd = conn.flow_command(&entry_with(SequenceNumber::new(9), "t"));
        assert_eq!(
            cmd,
            Command::Time {
                start: "2024,01,01,00,00,00".into(),
                end: Some("2024,01,02,00,00,00".into()),
            }
        );
    }

    #[test]
    fn request_info_rejects_second_request() {
        let mut conn = conn(ConnConfig::new("h:18000"));
        conn.request_info(InfoLevel::Id).unwrap();
        assert!(matches!(
            conn.request_info(InfoLevel::Streams),
            Err(ClientError::InfoPending)
        ));
    }
}
