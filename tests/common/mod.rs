//! Helpers shared by the integration tests

#![allow(dead_code)]

use std::cell::RefCell;
use std::io::Read;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use aioclient::http::{ClientHandler, Connection, Error, ResponseHeader};
use aioclient::reactor::{Reactor, Stopper};
use aioclient::shutdown::{ShutdownCoordinator, Stop};

/// Everything a handler can observe
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    Disconnect,
    ConnectTimeout,
    ConnectFailed,
    ReadTimeout,
    /// Status code and whether the body is being inflated
    Header(u16, bool),
    Body(Vec<u8>),
    Finish(bool),
    HandshakeOk,
    HandshakeFailed(u16),
    Text,
    Binary,
    FrameData(Vec<u8>),
    FrameFinish,
    Closed(Option<u16>),
    Destroy,
}

pub type Log = Rc<RefCell<Vec<Event>>>;

type ConnHook = Box<dyn FnMut(&mut Connection) -> bool>;
type FinishHook = Box<dyn FnMut(&mut Connection, bool) -> bool>;

/// Handler that records every callback and delegates decisions to hooks
pub struct Recorder {
    log: Log,
    connect: ConnHook,
    finish: FinishHook,
    handshake_ok: ConnHook,
    read_timeouts_allowed: usize,
}

impl Recorder {
    /// Sends one request on connect and closes after it
    pub fn http(log: &Log) -> Self {
        Recorder {
            log: log.clone(),
            connect: Box::new(|conn| conn.send_request(None).is_ok()),
            finish: Box::new(|_, _| false),
            handshake_ok: Box::new(|_| true),
            read_timeouts_allowed: 0,
        }
    }

    /// Performs the WebSocket handshake on connect
    pub fn websocket(log: &Log) -> Self {
        let mut recorder = Self::http(log);
        recorder.connect = Box::new(|conn| conn.ws_handshake().is_ok());
        recorder
    }

    pub fn on_connect(mut self, f: impl FnMut(&mut Connection) -> bool + 'static) -> Self {
        self.connect = Box::new(f);
        self
    }

    pub fn on_finish(mut self, f: impl FnMut(&mut Connection, bool) -> bool + 'static) -> Self {
        self.finish = Box::new(f);
        self
    }

    pub fn on_handshake_ok(mut self, f: impl FnMut(&mut Connection) -> bool + 'static) -> Self {
        self.handshake_ok = Box::new(f);
        self
    }

    pub fn allow_read_timeouts(mut self, n: usize) -> Self {
        self.read_timeouts_allowed = n;
        self
    }

    fn push(&self, event: Event) {
        self.log.borrow_mut().push(event);
    }
}

impl ClientHandler for Recorder {
    fn on_connect(&mut self, conn: &mut Connection) -> bool {
        self.push(Event::Connect);
        (self.connect)(conn)
    }

    fn on_disconnect(&mut self) {
        self.push(Event::Disconnect);
    }

    fn on_connect_timeout(&mut self) {
        self.push(Event::ConnectTimeout);
    }

    fn on_connect_failed(&mut self, _err: &Error) {
        self.push(Event::ConnectFailed);
    }

    fn on_read_timeout(&mut self, _conn: &mut Connection) -> bool {
        self.push(Event::ReadTimeout);
        if self.read_timeouts_allowed > 0 {
            self.read_timeouts_allowed -= 1;
            return true;
        }
        false
    }

    fn on_header(&mut self, conn: &mut Connection, header: &ResponseHeader) -> bool {
        self.push(Event::Header(header.status().code(), conn.is_unzip_body()));
        true
    }

    fn on_body_chunk(&mut self, _conn: &mut Connection, data: &[u8]) -> bool {
        self.push(Event::Body(data.to_vec()));
        true
    }

    fn on_finish(&mut self, conn: &mut Connection, success: bool) -> bool {
        self.push(Event::Finish(success));
        (self.finish)(conn, success)
    }

    fn on_handshake_ok(&mut self, conn: &mut Connection) -> bool {
        self.push(Event::HandshakeOk);
        (self.handshake_ok)(conn)
    }

    fn on_handshake_failed(&mut self, status: u16) {
        self.push(Event::HandshakeFailed(status));
    }

    fn on_frame_text(&mut self, _conn: &mut Connection) -> bool {
        self.push(Event::Text);
        true
    }

    fn on_frame_binary(&mut self, _conn: &mut Connection) -> bool {
        self.push(Event::Binary);
        true
    }

    fn on_frame_data(&mut self, _conn: &mut Connection, data: &[u8]) -> bool {
        self.push(Event::FrameData(data.to_vec()));
        true
    }

    fn on_frame_finish(&mut self, _conn: &mut Connection) -> bool {
        self.push(Event::FrameFinish);
        true
    }

    fn on_frame_closed(&mut self, code: Option<u16>) {
        self.push(Event::Closed(code));
    }

    fn on_destroy(&mut self) {
        self.push(Event::Destroy);
    }
}

pub fn new_log() -> Log {
    Rc::new(RefCell::new(Vec::new()))
}

/// Concatenated body chunks
pub fn body(log: &Log) -> Vec<u8> {
    log.borrow()
        .iter()
        .filter_map(|e| match e {
            Event::Body(data) => Some(data.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// Events other than body and frame payload chunks
pub fn milestones(log: &Log) -> Vec<Event> {
    log.borrow()
        .iter()
        .filter(|e| !matches!(e, Event::Body(_) | Event::FrameData(_)))
        .cloned()
        .collect()
}

pub fn count(log: &Log, event: &Event) -> usize {
    log.borrow().iter().filter(|e| *e == event).count()
}

/// Stop target that counts stops and stops a reactor
#[derive(Clone)]
pub struct CountingStop {
    stopper: Stopper,
    count: Arc<AtomicUsize>,
}

impl CountingStop {
    pub fn new(reactor: &Reactor) -> Self {
        CountingStop {
            stopper: reactor.handle().stopper(),
            count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

impl Stop for CountingStop {
    fn stop(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        self.stopper.stop();
    }
}

/// Coordinator for `actors` actors that stops `reactor`
pub fn coordinator(reactor: &Reactor, actors: usize) -> (ShutdownCoordinator, CountingStop) {
    let stop = CountingStop::new(reactor);
    (ShutdownCoordinator::new(stop.clone(), actors), stop)
}

/// Turn the reactor until it stops; panics after `limit`
pub fn run_until_stopped(reactor: &mut Reactor, limit: Duration) {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if !reactor.turn(Some(Duration::from_millis(20))).unwrap() {
            return;
        }
    }
    panic!("reactor still running after {:?}", limit);
}

/// Read a request or response head up to the blank line
///
/// Returns `None` if the peer closed first.
pub fn read_head(stream: &mut impl Read) -> Option<String> {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        match stream.read(&mut byte) {
            Ok(1) => head.push(byte[0]),
            _ => return None,
        }
    }
    Some(String::from_utf8_lossy(&head).into_owned())
}

/// Block until the peer closes
pub fn wait_eof(stream: &mut impl Read) {
    let mut buf = [0u8; 1024];
    while let Ok(n) = stream.read(&mut buf) {
        if n == 0 {
            break;
        }
    }
}
