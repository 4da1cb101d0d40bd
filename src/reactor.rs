//! Single-threaded event reactor
//!
//! The reactor multiplexes readiness of registered file descriptors and a set
//! of one-shot timers with `poll(2)`, and invokes the callbacks registered for
//! them. Everything runs on the thread that calls [`Reactor::run`]; callbacks
//! must not block.
//!
//! # Architecture
//!
//! - [`Reactor`] owns the poll loop and the self-pipe used to interrupt it.
//! - [`Handle`] is a cheap, cloneable (but `!Send`) view used from callbacks
//!   to register sources, arm timers and request a stop.
//! - [`Stopper`] is the `Send + Sync` part of a handle: it can stop the
//!   reactor from any thread.
//!
//! A callback is taken out of the registry while it runs, so it may freely
//! register, re-register or deregister sources (including its own) and arm
//! or cancel timers.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::shutdown::Stop;

/// Identifies a registered I/O source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u64);

/// Identifies an armed timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Readiness a source is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interest {
    readable: bool,
    writable: bool,
}

impl Interest {
    pub const NONE: Interest = Interest { readable: false, writable: false };
    pub const READABLE: Interest = Interest { readable: true, writable: false };
    pub const WRITABLE: Interest = Interest { readable: false, writable: true };
    pub const BOTH: Interest = Interest { readable: true, writable: true };

    pub fn is_readable(&self) -> bool {
        self.readable
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn is_empty(&self) -> bool {
        !self.readable && !self.writable
    }

    /// Union of two interests
    pub fn add(self, other: Interest) -> Interest {
        Interest {
            readable: self.readable || other.readable,
            writable: self.writable || other.writable,
        }
    }

    fn poll_events(&self) -> libc::c_short {
        let mut events = 0;
        if self.readable {
            events |= libc::POLLIN;
        }
        if self.writable {
            events |= libc::POLLOUT;
        }
        events
    }
}

/// Readiness reported for a source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Ready {
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the descriptor is in an error state
    pub hangup: bool,
}

impl Ready {
    fn from_revents(revents: libc::c_short) -> Self {
        let hangup = revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0;
        Ready {
            // An error or hangup is reported to both directions so the owner
            // discovers it through its next read or write.
            readable: hangup || revents & libc::POLLIN != 0,
            writable: hangup || revents & libc::POLLOUT != 0,
            hangup,
        }
    }
}

/// Callback invoked when a registered source becomes ready
pub type IoCallback = Box<dyn FnMut(&Handle, Ready)>;

/// Callback invoked once when a timer expires
pub type TimerCallback = Box<dyn FnOnce(&Handle)>;

struct Source {
    fd: RawFd,
    interest: Interest,
    callback: Option<IoCallback>,
}

#[derive(Default)]
struct Registry {
    sources: HashMap<Token, Source>,
    timers: BTreeMap<(Instant, TimerId), TimerCallback>,
    deadlines: HashMap<TimerId, Instant>,
    next_token: u64,
    next_timer: u64,
}

/// Thread-safe stop switch for a reactor
#[derive(Clone)]
pub struct Stopper {
    stopped: Arc<AtomicBool>,
    waker: Arc<UnixStream>,
}

impl Stopper {
    /// Request the reactor to stop; wakes it if it is blocked in `poll`
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("reactor stop requested");
            // A full pipe already guarantees a wakeup.
            let _ = (&*self.waker).write(&[1]);
        }
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl Stop for Stopper {
    fn stop(&self) {
        Stopper::stop(self)
    }
}

impl std::fmt::Debug for Stopper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stopper")
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Handle used to interact with a reactor from the reactor thread
#[derive(Clone)]
pub struct Handle {
    registry: Rc<RefCell<Registry>>,
    stopper: Stopper,
}

impl Handle {
    /// Register a file descriptor with the given interest
    ///
    /// The descriptor must stay open until it is deregistered.
    pub fn register<F>(&self, fd: RawFd, interest: Interest, callback: F) -> Token
    where
        F: FnMut(&Handle, Ready) + 'static,
    {
        let mut reg = self.registry.borrow_mut();
        let token = Token(reg.next_token);
        reg.next_token += 1;
        reg.sources.insert(
            token,
            Source {
                fd,
                interest,
                callback: Some(Box::new(callback)),
            },
        );
        trace!(?token, fd, ?interest, "source registered");
        token
    }

    /// Change the interest of a registered source
    ///
    /// Returns false if the token is not registered.
    pub fn reregister(&self, token: Token, interest: Interest) -> bool {
        match self.registry.borrow_mut().sources.get_mut(&token) {
            Some(source) => {
                source.interest = interest;
                true
            }
            None => false,
        }
    }

    /// Remove a source; its callback is dropped once it is no longer running
    pub fn deregister(&self, token: Token) -> bool {
        let removed = self.registry.borrow_mut().sources.remove(&token);
        trace!(?token, "source deregistered");
        // Dropped outside the registry borrow: the callback may own handles.
        removed.is_some()
    }

    /// Arm a one-shot timer
    pub fn add_timer<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce(&Handle) + 'static,
    {
        let deadline = Instant::now() + delay;
        let mut reg = self.registry.borrow_mut();
        let id = TimerId(reg.next_timer);
        reg.next_timer += 1;
        reg.timers.insert((deadline, id), Box::new(callback));
        reg.deadlines.insert(id, deadline);
        id
    }

    /// Cancel a timer that has not fired yet
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let removed = {
            let mut reg = self.registry.borrow_mut();
            match reg.deadlines.remove(&id) {
                Some(deadline) => reg.timers.remove(&(deadline, id)),
                None => None,
            }
        };
        removed.is_some()
    }

    /// Request the reactor to stop after the current turn
    pub fn stop(&self) {
        self.stopper.stop();
    }

    /// Whether a stop was requested
    pub fn is_stopped(&self) -> bool {
        self.stopper.is_stopped()
    }

    /// Get a thread-safe stop switch for this reactor
    pub fn stopper(&self) -> Stopper {
        self.stopper.clone()
    }

    /// Number of registered sources
    pub fn sources(&self) -> usize {
        self.registry.borrow().sources.len()
    }

    /// Number of pending timers
    pub fn timers(&self) -> usize {
        self.registry.borrow().timers.len()
    }
}

/// `poll(2)` based event loop
pub struct Reactor {
    handle: Handle,
    waker: UnixStream,
}

impl Reactor {
    /// Create a new reactor
    pub fn new() -> io::Result<Self> {
        let (waker, notify) = UnixStream::pair()?;
        waker.set_nonblocking(true)?;
        notify.set_nonblocking(true)?;

        let stopper = Stopper {
            stopped: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(notify),
        };

        Ok(Reactor {
            handle: Handle {
                registry: Rc::new(RefCell::new(Registry::default())),
                stopper,
            },
            waker,
        })
    }

    /// Get a handle to this reactor
    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    /// Run until a stop is requested
    pub fn run(&mut self) -> io::Result<()> {
        while self.turn(None)? {}
        debug!("reactor stopped");
        Ok(())
    }

    /// Run a single iteration, waiting at most `max_wait` for events
    ///
    /// Expired timers are dispatched before I/O readiness. Returns false once
    /// a stop has been requested.
    pub fn turn(&mut self, max_wait: Option<Duration>) -> io::Result<bool> {
        if self.handle.is_stopped() {
            return Ok(false);
        }

        let (mut fds, tokens) = {
            let reg = self.handle.registry.borrow();
            let mut fds = Vec::with_capacity(reg.sources.len() + 1);
            let mut tokens = Vec::with_capacity(reg.sources.len());

            fds.push(libc::pollfd {
                fd: self.waker.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            });

            for (token, source) in reg.sources.iter() {
                if source.interest.is_empty() {
                    continue;
                }
                fds.push(libc::pollfd {
                    fd: source.fd,
                    events: source.interest.poll_events(),
                    revents: 0,
                });
                tokens.push(*token);
            }
            (fds, tokens)
        };

        let timeout = self.poll_timeout(max_wait);
        let result = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };

        if result < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(!self.handle.is_stopped());
            }
            return Err(err);
        }

        if fds[0].revents != 0 {
            self.drain_waker();
        }

        self.fire_timers();

        for (pfd, token) in fds[1..].iter().zip(tokens) {
            if pfd.revents == 0 {
                continue;
            }
            self.dispatch(token, Ready::from_revents(pfd.revents));
        }

        Ok(!self.handle.is_stopped())
    }

    fn poll_timeout(&self, max_wait: Option<Duration>) -> libc::c_int {
        let next_timer = self
            .handle
            .registry
            .borrow()
            .timers
            .keys()
            .next()
            .map(|(deadline, _)| deadline.saturating_duration_since(Instant::now()));

        let wait = match (next_timer, max_wait) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        match wait {
            // Round up so a pending timer is never polled for in a busy loop.
            Some(d) => {
                let mut ms = d.as_millis();
                if d.subsec_nanos() % 1_000_000 != 0 {
                    ms += 1;
                }
                ms.min(libc::c_int::MAX as u128) as libc::c_int
            }
            None => -1,
        }
    }

    fn drain_waker(&mut self) {
        let mut buf = [0u8; 64];
        while let Ok(n) = self.waker.read(&mut buf) {
            if n == 0 {
                break;
            }
        }
    }

    fn fire_timers(&mut self) {
        let now = Instant::now();
        loop {
            let callback = {
                let mut reg = self.handle.registry.borrow_mut();
                let key = reg
                    .timers
                    .keys()
                    .next()
                    .copied()
                    .filter(|(deadline, _)| *deadline <= now);
                match key {
                    Some(key) => {
                        reg.deadlines.remove(&key.1);
                        reg.timers.remove(&key)
                    }
                    None => None,
                }
            };

            match callback {
                Some(callback) => callback(&self.handle),
                None => break,
            }
        }
    }

    fn dispatch(&mut self, token: Token, ready: Ready) {
        let callback = self
            .handle
            .registry
            .borrow_mut()
            .sources
            .get_mut(&token)
            .and_then(|source| source.callback.take());

        let Some(mut callback) = callback else {
            return;
        };

        callback(&self.handle, ready);

        let leftover = {
            let mut reg = self.handle.registry.borrow_mut();
            match reg.sources.get_mut(&token) {
                Some(source) if source.callback.is_none() => {
                    source.callback = Some(callback);
                    None
                }
                _ => Some(callback),
            }
        };
        // A callback that deregistered itself is dropped here, after the
        // registry borrow is released.
        drop(leftover);
    }
}
