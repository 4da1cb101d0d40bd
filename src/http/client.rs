//! Asynchronous HTTP/WebSocket client
//!
//! A [`Client`] owns one connection and drives it from reactor events:
//!
//! ```text
//! (Resolving) -> Connecting -> (TlsHandshaking) -> Connected -> RequestSent
//!     -> ReadingHeader -> ReadingBody -> ExchangeFinished -> Idle | Closed
//!
//! Connected -> WsHandshakeSent -> WsHandshakeVerified -> WsFrameReceiving -> Closed
//! ```
//!
//! Progress is reported to a [`ClientHandler`]. Inside a callback the
//! handler gets the live [`Connection`] and uses it to send requests or
//! WebSocket frames; from elsewhere on the reactor thread the same is done
//! through [`Client::with_conn`].
//!
//! A host name is resolved on a helper thread (see [`dns`](super::dns)) and
//! the answer comes back through the reactor, so `open` never blocks.
//!
//! When the connection reaches `Closed` it leaves the reactor and releases
//! the [`ShutdownCoordinator`] it was given, exactly once.

use super::body::{BodyDecoder, Framing};
use super::dns::{self, DnsConfig};
use super::handler::ClientHandler;
use super::session::{FdSessionOps, Handshake, SessionOps};
use super::tls::{TlsConfig, TlsSessionOps};
use super::ws::{handshake, FrameEvent, OpCode, WsSession};
use super::{
    Error, Method, RequestHeader, ResponseHeader, ResponseParser, Result, Status,
    DEFAULT_HTTPS_PORT, DEFAULT_HTTP_PORT,
};
use crate::reactor::{Handle, Interest, Ready, TimerId, Token};
use crate::reader::{spawn_reader, ReadHandler};
use crate::shutdown::ShutdownCoordinator;
use bytes::{Buf, BytesMut};
use std::cell::RefCell;
use std::fmt;
use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::os::unix::net::UnixStream;
use std::rc::{Rc, Weak};
use std::thread;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Size of the stack buffer used for each read
const READ_CHUNK: usize = 16 * 1024;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Resolving,
    Connecting,
    TlsHandshaking,
    Connected,
    RequestSent,
    ReadingHeader,
    ReadingBody,
    ExchangeFinished,
    Idle,
    WsHandshakeSent,
    WsHandshakeVerified,
    WsFrameReceiving,
    Closed,
}

impl State {
    fn in_exchange(&self) -> bool {
        matches!(
            self,
            State::RequestSent | State::ReadingHeader | State::ReadingBody
        )
    }

    fn is_ws_open(&self) -> bool {
        matches!(self, State::WsHandshakeVerified | State::WsFrameReceiving)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Report a connect error detected while opening
    ConnectError,
    Resolve,
    Connect,
    ReadWrite,
    Idle,
    WsRead,
}

/// The live connection, as seen by handler callbacks
pub struct Connection {
    handle: Handle,
    /// Address as given to `open`
    target: String,
    remote: Option<SocketAddr>,
    dns: DnsConfig,
    resolver: Option<Token>,
    state: State,
    tls: Option<TlsConfig>,
    pending: Option<FdSessionOps>,
    connect_error: Option<Error>,
    transport: Option<Box<dyn SessionOps>>,
    token: Option<Token>,
    interest: Interest,
    handshake_wants: Interest,
    timer: Option<(TimerId, TimerKind)>,
    rearm: bool,
    connect_timeout: Duration,
    rw_timeout: Duration,
    ws_timeout: Option<Duration>,
    request: RequestHeader,
    request_method: Method,
    unzip: bool,
    outbuf: BytesMut,
    inbuf: BytesMut,
    parser: ResponseParser,
    response: Option<ResponseHeader>,
    body: Option<BodyDecoder>,
    ws: Option<WsSession>,
    close_sent: bool,
    peer_closed: bool,
    connected: bool,
    close_requested: bool,
    last_error: Option<Error>,
    coordinator: Option<ShutdownCoordinator>,
}

impl Connection {
    pub fn state(&self) -> State {
        self.state
    }

    /// Address the client was opened with
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Remote address; `None` until the host name is resolved
    pub fn addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }

    /// The request header used for the next request
    pub fn request_header(&mut self) -> &mut RequestHeader {
        &mut self.request
    }

    /// Header of the current (or last) response
    pub fn response_header(&self) -> Option<&ResponseHeader> {
        self.response.as_ref()
    }

    /// Enable or disable inflating gzip bodies for the next responses
    pub fn unzip_body(&mut self, on: bool) -> &mut Self {
        self.unzip = on;
        self
    }

    /// Whether the body of the current response is being inflated
    ///
    /// False for a gzip body while unzipping is disabled: the consumer then
    /// receives the compressed bytes.
    pub fn is_unzip_body(&self) -> bool {
        self.body.as_ref().is_some_and(|b| b.is_unzip())
    }

    /// Both sides want the connection kept after this exchange
    pub fn keep_alive(&self) -> bool {
        self.request.is_keep_alive()
            && self.response.as_ref().is_some_and(|r| r.keep_alive())
    }

    /// The error that ended the last exchange, if any
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Close the connection once the current callback returns
    pub fn close(&mut self) {
        self.close_requested = true;
    }

    /// Queue the request header, plus an optional body, for sending
    ///
    /// `Content-Length` is set from `body` when one is given.
    pub fn send_request(&mut self, body: Option<&[u8]>) -> Result<()> {
        match self.state {
            State::Connected | State::Idle | State::ExchangeFinished => {}
            state => return Err(Error::InvalidState(state)),
        }

        if let Some(body) = body {
            self.request.set_content_length(body.len() as u64);
        }
        self.outbuf.extend_from_slice(&self.request.build_request());
        if let Some(body) = body {
            self.outbuf.extend_from_slice(body);
        }

        self.begin_exchange();
        self.set_state(State::RequestSent);
        Ok(())
    }

    /// Queue a WebSocket upgrade request built from the request header
    pub fn ws_handshake(&mut self) -> Result<()> {
        match self.state {
            State::Connected | State::Idle => {}
            state => return Err(Error::InvalidState(state)),
        }

        let ws = WsSession::new();
        handshake::prepare_request(&mut self.request, ws.key());
        self.outbuf.extend_from_slice(&self.request.build_request());
        self.ws = Some(ws);

        self.begin_exchange();
        self.set_state(State::WsHandshakeSent);
        Ok(())
    }

    /// Start waiting for frames; `None` waits forever
    pub fn ws_read_wait(&mut self, timeout: Option<Duration>) -> Result<()> {
        if !self.state.is_ws_open() {
            return Err(Error::InvalidState(self.state));
        }
        self.ws_timeout = timeout;
        self.rearm = true;
        self.set_state(State::WsFrameReceiving);
        Ok(())
    }

    pub fn ws_send_text(&mut self, text: &str) -> Result<()> {
        self.ws_send(OpCode::Text, text.as_bytes())
    }

    pub fn ws_send_binary(&mut self, data: &[u8]) -> Result<()> {
        self.ws_send(OpCode::Binary, data)
    }

    pub fn ws_send_ping(&mut self, data: &[u8]) -> Result<()> {
        self.ws_send(OpCode::Ping, data)
    }

    /// Send a close frame; the server's close reply ends the connection
    pub fn ws_send_close(&mut self, code: Option<u16>) -> Result<()> {
        let payload = code.map(u16::to_be_bytes);
        self.ws_send(OpCode::Close, payload.as_ref().map_or(&[][..], |p| &p[..]))?;
        self.close_sent = true;
        Ok(())
    }

    fn ws_send(&mut self, opcode: OpCode, payload: &[u8]) -> Result<()> {
        if !self.state.is_ws_open() {
            return Err(Error::InvalidState(self.state));
        }
        if self.close_sent {
            return Err(Error::Protocol("WebSocket close already sent".to_string()));
        }
        if opcode.is_control() && payload.len() > 125 {
            return Err(Error::Protocol(format!(
                "WebSocket control payload too long: {}",
                payload.len()
            )));
        }
        self.outbuf.extend_from_slice(&WsSession::encode(opcode, payload));
        Ok(())
    }

    fn begin_exchange(&mut self) {
        self.request_method = self.request.method();
        self.response = None;
        self.body = None;
        self.last_error = None;
        self.parser.reset();
        self.rearm = true;
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            debug!("{} {:?} -> {:?}", self.target, self.state, state);
            self.state = state;
        }
    }

    fn halted(&self) -> bool {
        self.state == State::Closed || self.close_requested
    }

    fn desired_interest(&self) -> Interest {
        match self.state {
            State::Closed | State::Resolving => Interest::NONE,
            State::Connecting => Interest::WRITABLE,
            State::TlsHandshaking => self.handshake_wants,
            _ if self.outbuf.is_empty() => Interest::READABLE,
            _ => Interest::BOTH,
        }
    }

    fn desired_timer(&self) -> Option<(TimerKind, Duration)> {
        let rw = Some(self.rw_timeout).filter(|d| !d.is_zero());
        match self.state {
            State::Resolving | State::Connecting if self.connect_error.is_some() => {
                Some((TimerKind::ConnectError, Duration::ZERO))
            }
            State::Resolving => Some(self.dns.timeout)
                .filter(|d| !d.is_zero())
                .map(|d| (TimerKind::Resolve, d)),
            State::Connecting | State::TlsHandshaking => {
                Some((TimerKind::Connect, self.connect_timeout))
            }
            State::Connected | State::Idle | State::ExchangeFinished => {
                rw.map(|d| (TimerKind::Idle, d))
            }
            State::RequestSent
            | State::ReadingHeader
            | State::ReadingBody
            | State::WsHandshakeSent => rw.map(|d| (TimerKind::ReadWrite, d)),
            State::WsFrameReceiving => self
                .ws_timeout
                .filter(|d| !d.is_zero())
                .map(|d| (TimerKind::WsRead, d)),
            State::WsHandshakeVerified | State::Closed => None,
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("target", &self.target)
            .field("remote", &self.remote)
            .field("state", &self.state)
            .field("tls", &self.tls.is_some())
            .field("outbuf", &self.outbuf.len())
            .field("inbuf", &self.inbuf.len())
            .finish_non_exhaustive()
    }
}

/// Connection plus handler, shared between the client and its reactor
/// callbacks
struct Shared {
    conn: Connection,
    handler: Box<dyn ClientHandler>,
    this: Weak<RefCell<Shared>>,
}

impl Shared {
    fn on_ready(&mut self, ready: Ready) {
        match self.conn.state {
            State::Closed | State::Resolving => return,
            State::Connecting => self.on_connecting(),
            State::TlsHandshaking => self.drive_tls(),
            _ => self.on_io(ready),
        }
        self.after_callback();
    }

    fn on_timer(&mut self, kind: TimerKind) {
        if self.conn.timer.map(|(_, k)| k) != Some(kind) {
            return;
        }
        self.conn.timer = None;

        match kind {
            TimerKind::ConnectError => self.on_connecting(),
            TimerKind::Resolve => {
                let err = Error::Dns(format!(
                    "{}: no answer within {:?}",
                    self.conn.target, self.conn.dns.timeout
                ));
                self.connect_failed(err);
            }
            TimerKind::Connect => {
                warn!("{} connect timeout", self.conn.target);
                self.handler.on_connect_timeout();
                self.conn.last_error = Some(Error::ConnectTimeout);
                self.terminate();
            }
            TimerKind::Idle => {
                debug!("{} idle timeout", self.conn.target);
                self.terminate();
            }
            TimerKind::ReadWrite | TimerKind::WsRead => {
                if self.handler.on_read_timeout(&mut self.conn) {
                    self.conn.rearm = true;
                } else {
                    self.fail(Error::Timeout);
                }
            }
        }
        self.after_callback();
    }

    /// Apply consumer requests and reconcile reactor interest and timers
    fn after_callback(&mut self) {
        if self.conn.close_requested && self.conn.state != State::Closed {
            debug!("{} closed by consumer", self.conn.target);
            self.terminate();
        }
        self.sync();
    }

    fn sync(&mut self) {
        if self.conn.state == State::Closed {
            return;
        }

        let interest = self.conn.desired_interest();
        if interest != self.conn.interest {
            if let Some(token) = self.conn.token {
                self.conn.handle.reregister(token, interest);
            }
            self.conn.interest = interest;
        }

        let wanted = self.conn.desired_timer();
        let keep = matches!(
            (self.conn.timer, wanted),
            (Some((_, current)), Some((kind, _))) if current == kind && !self.conn.rearm
        );
        if !keep {
            if let Some((id, _)) = self.conn.timer.take() {
                self.conn.handle.cancel_timer(id);
            }
            self.conn.timer = wanted.map(|(kind, delay)| (self.arm(kind, delay), kind));
        }
        self.conn.rearm = false;
    }

    fn arm(&self, kind: TimerKind, delay: Duration) -> TimerId {
        // A connection that failed before registering has no I/O source
        // holding it; the error report must still run.
        let pinned = match kind {
            TimerKind::ConnectError => self.this.upgrade(),
            _ => None,
        };
        let this = self.this.clone();
        self.conn.handle.add_timer(delay, move |_| {
            if let Some(shared) = pinned.or_else(|| this.upgrade()) {
                shared.borrow_mut().on_timer(kind);
            }
        })
    }

    /// Progress was made; restart the current timeout
    fn touch(&mut self) {
        self.conn.rearm = true;
    }

    /// Look `host` up on a helper thread; the answer arrives as
    /// [`Shared::on_resolved`]
    fn start_resolve(&mut self, host: String, port: u16) -> Result<()> {
        let (ours, mut theirs) = UnixStream::pair()?;
        let config = self.conn.dns.clone();
        debug!("{} resolving {}", self.conn.target, host);

        thread::Builder::new()
            .name("aioclient-dns".to_string())
            .spawn(move || {
                let reply = match dns::resolve(&host, port, &config) {
                    Ok(addr) => addr.to_string(),
                    Err(Error::Dns(msg)) => format!("!{}", msg),
                    Err(err) => format!("!{}: {}", host, err),
                };
                // The client may have given up already.
                if let Err(err) = theirs.write_all(reply.as_bytes()) {
                    trace!("resolver reply for {} dropped: {}", host, err);
                }
            })?;

        let reply = ResolveReply {
            owner: self.this.upgrade(),
            reply: Vec::new(),
        };
        self.conn.resolver = Some(spawn_reader(&self.conn.handle, ours, reply, None)?);
        Ok(())
    }

    fn on_resolved(&mut self, result: Result<SocketAddr>) {
        // The reply reader leaves the reactor on its own.
        self.conn.resolver = None;
        if self.conn.state != State::Resolving {
            return;
        }
        match result {
            Ok(remote) => {
                debug!("{} resolved to {}", self.conn.target, remote);
                self.connect(remote);
            }
            Err(err) => self.connect_failed(err),
        }
        self.after_callback();
    }

    /// Start a non-blocking connect to `remote`
    ///
    /// An immediate failure is kept and reported from a zero-delay timer.
    fn connect(&mut self, remote: SocketAddr) {
        self.conn.remote = Some(remote);
        self.conn.set_state(State::Connecting);
        debug!(
            "{} connecting to {} (tls={})",
            self.conn.target,
            remote,
            self.conn.tls.is_some()
        );

        let pending = match FdSessionOps::connect(remote) {
            Ok(pending) => pending,
            Err(err) => {
                self.conn.connect_error = Some(err);
                return;
            }
        };
        let fd = pending.fd();
        self.conn.pending = Some(pending);
        if let Some(owner) = self.this.upgrade() {
            let token = self.conn.handle.register(fd, Interest::NONE, move |_, ready| {
                owner.borrow_mut().on_ready(ready);
            });
            self.conn.token = Some(token);
        }
    }

    fn on_connecting(&mut self) {
        let checked = match (self.conn.connect_error.take(), self.conn.pending.as_ref()) {
            (Some(err), _) => Err(err),
            (None, Some(pending)) => pending.check_connected(),
            (None, None) => Err(Error::ConnectFailed("no socket".to_string())),
        };
        if let Err(err) = checked {
            self.connect_failed(err);
            return;
        }

        let Some(pending) = self.conn.pending.take() else {
            return;
        };
        match self.conn.tls.clone() {
            Some(config) => match TlsSessionOps::new(pending.into_stream(), &config) {
                Ok(tls) => {
                    self.conn.transport = Some(Box::new(tls));
                    self.conn.set_state(State::TlsHandshaking);
                    self.drive_tls();
                }
                Err(err) => self.connect_failed(Error::Tls(err)),
            },
            None => {
                self.conn.transport = Some(Box::new(pending));
                self.on_connected();
            }
        }
    }

    fn drive_tls(&mut self) {
        let Some(transport) = self.conn.transport.as_mut() else {
            return;
        };
        match transport.handshake() {
            Ok(Handshake::Done) => self.on_connected(),
            Ok(Handshake::WantRead) => self.conn.handshake_wants = Interest::READABLE,
            Ok(Handshake::WantWrite) => self.conn.handshake_wants = Interest::WRITABLE,
            Err(err) => self.connect_failed(err),
        }
    }

    fn connect_failed(&mut self, err: Error) {
        warn!("{} connect failed: {}", self.conn.target, err);
        self.handler.on_connect_failed(&err);
        self.conn.last_error = Some(err);
        self.terminate();
    }

    fn on_connected(&mut self) {
        self.conn.connected = true;
        self.conn.set_state(State::Connected);
        if !self.handler.on_connect(&mut self.conn) {
            self.terminate();
        }
    }

    fn on_io(&mut self, ready: Ready) {
        if ready.writable && !self.conn.outbuf.is_empty() && !self.flush() {
            return;
        }
        if ready.readable {
            self.read_input();
        }
    }

    /// Write as much of the outbound buffer as the transport takes
    ///
    /// Returns false if the connection failed.
    fn flush(&mut self) -> bool {
        let mut written = 0;
        while !self.conn.outbuf.is_empty() {
            let Some(transport) = self.conn.transport.as_mut() else {
                return false;
            };
            match transport.write(&self.conn.outbuf) {
                Ok(0) => {
                    self.fail(Error::ConnectionClosed);
                    return false;
                }
                Ok(n) => {
                    self.conn.outbuf.advance(n);
                    written += n;
                }
                Err(e) if e.is_would_block() => break,
                Err(e) => {
                    self.fail(e);
                    return false;
                }
            }
        }

        if written > 0 {
            trace!("{} wrote {} bytes", self.conn.target, written);
            self.touch();
        }
        if self.conn.outbuf.is_empty() && self.conn.state == State::RequestSent {
            self.conn.set_state(State::ReadingHeader);
        }
        true
    }

    fn read_input(&mut self) {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if self.conn.halted() {
                return;
            }
            let Some(transport) = self.conn.transport.as_mut() else {
                return;
            };
            match transport.read(&mut buf) {
                Ok(0) => {
                    self.conn.peer_closed = true;
                    break;
                }
                Ok(n) => {
                    trace!("{} read {} bytes", self.conn.target, n);
                    self.conn.inbuf.extend_from_slice(&buf[..n]);
                    self.touch();
                    self.process_input();
                }
                Err(e) if e.is_would_block() => break,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }

        if self.conn.peer_closed && !self.conn.halted() {
            self.on_eof();
        }
    }

    fn process_input(&mut self) {
        loop {
            if self.conn.halted() {
                return;
            }
            let progressed = match self.conn.state {
                State::RequestSent | State::ReadingHeader | State::WsHandshakeSent => {
                    self.read_header()
                }
                State::ReadingBody => self.read_body(),
                State::WsFrameReceiving => self.read_frames(),
                State::Connected | State::Idle if !self.conn.inbuf.is_empty() => {
                    self.fail(Error::Protocol("Unsolicited data from server".to_string()));
                    false
                }
                _ => false,
            };
            if !progressed {
                return;
            }
        }
    }

    fn read_header(&mut self) -> bool {
        let header = match self.conn.parser.parse(&self.conn.inbuf) {
            Ok(Some((header, consumed))) => {
                self.conn.inbuf.advance(consumed);
                header
            }
            Ok(None) => return false,
            Err(err) => {
                self.fail(err);
                return false;
            }
        };

        let status = header.status();
        if status.is_informational() && status != Status::SWITCHING_PROTOCOLS {
            debug!("{} skipping interim response {}", self.conn.target, status);
            return true;
        }

        if self.conn.state == State::WsHandshakeSent {
            self.finish_ws_handshake(header);
        } else {
            self.begin_body(header);
        }
        true
    }

    fn begin_body(&mut self, header: ResponseHeader) {
        let framing = match Framing::for_response(self.conn.request_method, &header) {
            Ok(framing) => framing,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        let unzip = self.conn.unzip && header.is_transfer_gzip();
        debug!(
            "{} response {} framing={:?} unzip={}",
            self.conn.target,
            header.status(),
            framing,
            unzip
        );

        self.conn.body = Some(BodyDecoder::new(framing, unzip));
        self.conn.response = Some(header.clone());
        self.conn.set_state(State::ReadingBody);

        if !self.handler.on_header(&mut self.conn, &header) {
            debug!("{} header rejected by consumer", self.conn.target);
            self.terminate();
        }
    }

    fn read_body(&mut self) -> bool {
        let Some(body) = self.conn.body.as_mut() else {
            return false;
        };
        let mut out = Vec::new();
        let (consumed, complete) = match body.decode(&self.conn.inbuf, &mut out) {
            Ok(result) => result,
            Err(err) => {
                self.fail(err);
                return false;
            }
        };
        self.conn.inbuf.advance(consumed);

        if !self.deliver(&out) {
            return false;
        }
        if complete {
            self.finish_exchange();
            return true;
        }
        false
    }

    /// Hand decoded body bytes to the consumer
    fn deliver(&mut self, data: &[u8]) -> bool {
        if data.is_empty() {
            return true;
        }
        if !self.handler.on_body_chunk(&mut self.conn, data) {
            debug!("{} body rejected by consumer", self.conn.target);
            self.terminate();
            return false;
        }
        true
    }

    fn finish_exchange(&mut self) {
        let until_close = self
            .conn
            .body
            .as_ref()
            .is_some_and(|b| b.framing() == Framing::UntilClose);
        if let Some(body) = self.conn.body.as_ref() {
            debug!("{} exchange done, {} bytes", self.conn.target, body.delivered());
        }

        self.conn.set_state(State::ExchangeFinished);
        let reuse = self.handler.on_finish(&mut self.conn, true);

        if self.conn.state == State::Closed {
            return;
        }
        if !reuse || self.conn.peer_closed || until_close {
            self.terminate();
            return;
        }
        if self.conn.state == State::ExchangeFinished {
            self.conn.set_state(State::Idle);
        }
    }

    fn finish_ws_handshake(&mut self, header: ResponseHeader) {
        let verdict = match self.conn.ws.as_ref() {
            Some(ws) => handshake::verify(ws.key(), &header),
            None => Err(Error::Protocol("No WebSocket handshake pending".to_string())),
        };
        self.conn.response = Some(header);

        if let Err(err) = verdict {
            self.fail(err);
            return;
        }

        if let Some(ws) = self.conn.ws.as_mut() {
            ws.set_verified();
        }
        self.conn.set_state(State::WsHandshakeVerified);

        if !self.handler.on_handshake_ok(&mut self.conn) {
            self.terminate();
            return;
        }
        if self.conn.state == State::WsHandshakeVerified {
            self.conn.rearm = true;
            self.conn.set_state(State::WsFrameReceiving);
        }
    }

    fn read_frames(&mut self) -> bool {
        loop {
            let Some(ws) = self.conn.ws.as_mut() else {
                return false;
            };
            let event = match ws.receiver().poll(&mut self.conn.inbuf) {
                Ok(Some(event)) => event,
                Ok(None) => return false,
                Err(err) => {
                    self.fail(err);
                    return false;
                }
            };
            if !self.on_frame_event(event) {
                return false;
            }
        }
    }

    fn on_frame_event(&mut self, event: FrameEvent) -> bool {
        let conn = &mut self.conn;
        let keep = match event {
            FrameEvent::Begin(OpCode::Text) => self.handler.on_frame_text(conn),
            FrameEvent::Begin(OpCode::Binary) => self.handler.on_frame_binary(conn),
            FrameEvent::Begin(_) => true,
            FrameEvent::Data(data) => self.handler.on_frame_data(conn, &data),
            FrameEvent::Finish => self.handler.on_frame_finish(conn),
            FrameEvent::Ping(payload) => {
                trace!("{} ping, {} bytes", conn.target, payload.len());
                if !conn.close_sent {
                    conn.outbuf
                        .extend_from_slice(&WsSession::encode(OpCode::Pong, &payload));
                }
                true
            }
            FrameEvent::Pong(_) => true,
            FrameEvent::Close(code) => {
                debug!("{} close frame {:?}", conn.target, code);
                if !conn.close_sent {
                    let payload = code.map(u16::to_be_bytes);
                    conn.outbuf.extend_from_slice(&WsSession::encode(
                        OpCode::Close,
                        payload.as_ref().map_or(&[][..], |p| &p[..]),
                    ));
                    conn.close_sent = true;
                }
                self.handler.on_frame_closed(code);
                self.flush_best_effort();
                self.terminate();
                return false;
            }
        };

        if !keep {
            self.terminate();
            return false;
        }
        !self.conn.halted()
    }

    /// One write attempt, ignoring failures; used right before closing
    fn flush_best_effort(&mut self) {
        if let Some(transport) = self.conn.transport.as_mut() {
            if let Ok(n) = transport.write(&self.conn.outbuf) {
                self.conn.outbuf.advance(n);
            }
        }
    }

    fn on_eof(&mut self) {
        debug!("{} peer closed in {:?}", self.conn.target, self.conn.state);
        match self.conn.state {
            State::ReadingBody => {
                let mut out = Vec::new();
                let finished = match self.conn.body.as_mut() {
                    Some(body) => body.finish_eof(&mut out),
                    None => Err(Error::ConnectionClosed),
                };
                match finished {
                    Ok(()) => {
                        if self.deliver(&out) {
                            self.finish_exchange();
                        }
                    }
                    Err(err) => self.fail(err),
                }
            }
            State::RequestSent | State::ReadingHeader | State::WsHandshakeSent => {
                self.fail(Error::ConnectionClosed)
            }
            _ => self.terminate(),
        }
    }

    /// End the current operation with an error, then close
    fn fail(&mut self, err: Error) {
        if self.conn.state == State::Closed {
            return;
        }
        warn!("{} failed in {:?}: {}", self.conn.target, self.conn.state, err);

        match self.conn.state {
            State::Resolving | State::Connecting | State::TlsHandshaking => {
                self.connect_failed(err);
                return;
            }
            state if state.in_exchange() => {
                self.conn.last_error = Some(err);
                self.conn.set_state(State::ExchangeFinished);
                self.handler.on_finish(&mut self.conn, false);
            }
            State::WsHandshakeSent => {
                let status = match &err {
                    Error::HandshakeRejected { status } => *status,
                    _ => 0,
                };
                self.conn.last_error = Some(err);
                self.handler.on_handshake_failed(status);
            }
            _ => self.conn.last_error = Some(err),
        }
        self.terminate();
    }

    /// Enter the terminal state: leave the reactor, close the transport,
    /// notify the consumer and release the coordinator
    fn terminate(&mut self) {
        if self.conn.state == State::Closed {
            return;
        }
        self.conn.set_state(State::Closed);

        if let Some((id, _)) = self.conn.timer.take() {
            self.conn.handle.cancel_timer(id);
        }
        if let Some(token) = self.conn.token.take() {
            self.conn.handle.deregister(token);
        }
        if let Some(token) = self.conn.resolver.take() {
            self.conn.handle.deregister(token);
        }
        if let Some(mut transport) = self.conn.transport.take() {
            if let Err(err) = transport.close() {
                debug!("{} close: {}", self.conn.target, err);
            }
        }
        self.conn.pending = None;
        self.conn.interest = Interest::NONE;

        if self.conn.connected {
            self.handler.on_disconnect();
        }
        self.handler.on_destroy();

        if let Some(coordinator) = self.conn.coordinator.take() {
            coordinator.release();
        }
    }
}

/// Collects the helper thread's answer: the address, or `!` and a message
struct ResolveReply {
    owner: Option<Rc<RefCell<Shared>>>,
    reply: Vec<u8>,
}

impl ReadHandler for ResolveReply {
    fn on_read(&mut self, data: &[u8]) -> bool {
        self.reply.extend_from_slice(data);
        true
    }

    fn on_close(&mut self) {
        let Some(owner) = self.owner.take() else {
            return;
        };
        let reply = String::from_utf8_lossy(&self.reply);
        let result = match reply.strip_prefix('!') {
            Some(msg) => Err(Error::Dns(msg.to_string())),
            None => reply
                .parse::<SocketAddr>()
                .map_err(|_| Error::Dns(format!("resolver gave no address: {:?}", reply))),
        };
        owner.borrow_mut().on_resolved(result);
    }
}

/// Handle to a client connection
///
/// Cloning gives another handle to the same connection. The connection
/// stays alive while it is registered with the reactor, even if every
/// handle is dropped.
#[derive(Clone)]
pub struct Client {
    shared: Rc<RefCell<Shared>>,
}

impl Client {
    /// Start configuring a client on a reactor
    pub fn builder(handle: &Handle) -> ClientBuilder {
        ClientBuilder::new(handle)
    }

    /// Run `f` on the connection from outside a handler callback
    ///
    /// Sends queued by `f` are flushed by the reactor. Must not be called
    /// from inside this client's own handler.
    pub fn with_conn<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> R {
        let mut shared = self.shared.borrow_mut();
        let result = f(&mut shared.conn);
        shared.after_callback();
        result
    }

    pub fn state(&self) -> State {
        self.shared.borrow().conn.state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == State::Closed
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.shared.try_borrow() {
            Ok(shared) => f.debug_struct("Client").field("conn", &shared.conn).finish(),
            Err(_) => f.debug_struct("Client").finish_non_exhaustive(),
        }
    }
}

/// Client configuration
pub struct ClientBuilder {
    handle: Handle,
    tls: Option<TlsConfig>,
    unzip: bool,
    dns: DnsConfig,
    request: RequestHeader,
    coordinator: Option<ShutdownCoordinator>,
}

impl ClientBuilder {
    fn new(handle: &Handle) -> Self {
        ClientBuilder {
            handle: handle.clone(),
            tls: None,
            unzip: false,
            dns: DnsConfig::default(),
            request: RequestHeader::new(),
            coordinator: None,
        }
    }

    /// Run the connection over TLS
    pub fn tls(mut self, config: TlsConfig) -> Self {
        self.tls = Some(config);
        self
    }

    /// How to resolve a host name given to `open`
    pub fn dns(mut self, config: DnsConfig) -> Self {
        self.dns = config;
        self
    }

    /// Inflate gzip response bodies before delivery
    pub fn unzip_body(mut self, on: bool) -> Self {
        self.unzip = on;
        self
    }

    /// Release `coordinator` when the connection closes
    ///
    /// The caller accounts for the client when attaching actors.
    pub fn coordinator(mut self, coordinator: ShutdownCoordinator) -> Self {
        self.coordinator = Some(coordinator);
        self
    }

    /// Request header for the first request
    pub fn request_header(&mut self) -> &mut RequestHeader {
        &mut self.request
    }

    /// Start connecting to `addr`
    ///
    /// `addr` is `host:port` or a bare host, which gets the default port of
    /// the scheme. A host name is resolved without blocking the reactor,
    /// under the DNS timeout; the connect timeout starts once the address
    /// is known. Resolve and connect results are reported to `handler` from
    /// the reactor. A zero `rw_timeout` disables the read/write and idle
    /// timeouts.
    ///
    /// Only a malformed `addr` fails here, after releasing the coordinator.
    pub fn open<H>(
        mut self,
        handler: H,
        addr: &str,
        connect_timeout: Duration,
        rw_timeout: Duration,
    ) -> Result<Client>
    where
        H: ClientHandler + 'static,
    {
        let default_port = if self.tls.is_some() {
            DEFAULT_HTTPS_PORT
        } else {
            DEFAULT_HTTP_PORT
        };
        let target = match Target::parse(addr, default_port) {
            Ok(target) => target,
            Err(err) => {
                warn!("open {} failed: {}", addr, err);
                if let Some(coordinator) = self.coordinator.take() {
                    coordinator.release();
                }
                return Err(err);
            }
        };

        let conn = Connection {
            handle: self.handle.clone(),
            target: addr.to_string(),
            remote: None,
            dns: self.dns,
            resolver: None,
            state: State::Resolving,
            tls: self.tls,
            pending: None,
            connect_error: None,
            transport: None,
            token: None,
            interest: Interest::NONE,
            handshake_wants: Interest::BOTH,
            timer: None,
            rearm: false,
            connect_timeout,
            rw_timeout,
            ws_timeout: None,
            request: self.request,
            request_method: Method::Get,
            unzip: self.unzip,
            outbuf: BytesMut::new(),
            inbuf: BytesMut::with_capacity(READ_CHUNK),
            parser: ResponseParser::new(),
            response: None,
            body: None,
            ws: None,
            close_sent: false,
            peer_closed: false,
            connected: false,
            close_requested: false,
            last_error: None,
            coordinator: self.coordinator,
        };

        let shared = Rc::new_cyclic(|this| {
            RefCell::new(Shared {
                conn,
                handler: Box::new(handler),
                this: this.clone(),
            })
        });

        {
            let mut inner = shared.borrow_mut();
            match target {
                Target::Addr(remote) => inner.connect(remote),
                Target::Name(host, port) => {
                    if let Err(err) = inner.start_resolve(host, port) {
                        inner.conn.connect_error = Some(err);
                    }
                }
            }
            inner.sync();
        }

        Ok(Client { shared })
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("tls", &self.tls.is_some())
            .field("unzip", &self.unzip)
            .field("dns", &self.dns)
            .field("request", &self.request)
            .finish_non_exhaustive()
    }
}

/// Where `open` connects to
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Addr(SocketAddr),
    Name(String, u16),
}

impl Target {
    /// Split `host[:port]`; IP literals need no lookup
    fn parse(addr: &str, default_port: u16) -> Result<Target> {
        if let Ok(remote) = addr.parse::<SocketAddr>() {
            return Ok(Target::Addr(remote));
        }

        let (host, port) = match addr.rsplit_once(':') {
            Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::ConnectFailed(format!("invalid port in {}", addr)))?;
                (host, port)
            }
            _ => (addr, default_port),
        };
        let host = host.trim_matches(|c| c == '[' || c == ']');
        if host.is_empty() {
            return Err(Error::ConnectFailed(format!("no host in {:?}", addr)));
        }

        match host.parse::<IpAddr>() {
            Ok(ip) => Ok(Target::Addr(SocketAddr::new(ip, port))),
            Err(_) => Ok(Target::Name(host.to_string(), port)),
        }
    }
}
