use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use slab::Slab;

use crate::error::Result;
use crate::handshake::Protocol;
use crate::relay::{Session, SessionControl};
use crate::Config;


/// Pause after an accept error that will likely repeat at once, such as
/// running out of file descriptors.
const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);


struct Registry {
    protocol: Protocol,
    closed: AtomicBool,
    sessions: Mutex<Slab<Arc<SessionControl>>>,
}

impl Registry {
    fn new(protocol: Protocol) -> Registry {
        Registry{ protocol, closed: AtomicBool::new(false),
                  sessions: Mutex::new(Slab::new()) }
    }

    fn sessions(&self) -> MutexGuard<Slab<Arc<SessionControl>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn spawn_session(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let control = match SessionControl::new(&stream) {
            Ok(control) => Arc::new(control),
            Err(err) => {
                debug!("dropping connection from {}: {}", addr, err);
                return;
            }
        };

        // Checked under the lock so that terminate() either sees this
        // session when it drains the registry or we see the flag.
        let id = {
            let mut sessions = self.sessions();
            if self.is_closed() {
                debug!("refusing connection from {} during shutdown", addr);
                return;
            }
            sessions.insert(control.clone())
        };

        let session = Session::new(id, self.protocol, stream, addr,
                                   control.clone());
        let registry = Arc::clone(self);
        let registered = control.clone();
        let spawned = thread::Builder::new()
            .name(format!("netproxy-session-{}", id))
            .spawn(move || {
                session.run();
                registry.release(id, &registered);
            });

        if let Err(err) = spawned {
            warn!("failed to start session for {}: {}", addr, err);
            let _ = control.close();
            self.release(id, &control);
        }
    }

    /// Slab keys are reused, so only remove the slot if it still holds
    /// this session.
    fn release(&self, id: usize, control: &Arc<SessionControl>) {
        let mut sessions = self.sessions();
        let owned = match sessions.get(id) {
            Some(entry) => Arc::ptr_eq(entry, control),
            None => false,
        };
        if owned {
            sessions.remove(id);
        }
    }
}


fn accept_loop(registry: Arc<Registry>, listener: TcpListener) {
    loop {
        let accepted = listener.accept();
        if registry.is_closed() {
            break;
        }
        match accepted {
            Ok((stream, addr)) => registry.spawn_session(stream, addr),
            Err(err) => {
                warn!("accept failed: {}", err);
                if let Some(pause) = accept_error_pause(&err) {
                    thread::sleep(pause);
                }
            },
        }
    }
    debug!("accept loop exited");
}


/// Errors tied to one aborted connection are not worth waiting on.
fn accept_error_pause(err: &io::Error) -> Option<Duration> {
    match err.kind() {
        io::ErrorKind::Interrupted
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::WouldBlock => None,
        _ => Some(ACCEPT_ERROR_PAUSE),
    }
}


/// A running relay bound to `127.0.0.1`. Dropping it terminates it.
pub struct Proxy {
    addr: SocketAddr,
    registry: Arc<Registry>,
    acceptor: Mutex<Option<JoinHandle<()>>>,
}

impl Proxy {
    /// Binds and starts accepting right away.
    pub fn start(cfg: Config) -> Result<Proxy> {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, cfg.port))?;
        let addr = listener.local_addr()?;
        let registry = Arc::new(Registry::new(cfg.protocol));

        let acceptor = {
            let registry = registry.clone();
            thread::Builder::new()
                .name(format!("netproxy-listener-{}", addr.port()))
                .spawn(move || accept_loop(registry, listener))?
        };

        info!("{} proxy listening on {}", cfg.protocol, addr);
        Ok(Proxy{ addr, registry, acceptor: Mutex::new(Some(acceptor)) })
    }

    pub fn socks4(port: u16) -> Result<Proxy> {
        Proxy::start(Config{ port, protocol: Protocol::Socks4 })
    }

    pub fn http(port: u16) -> Result<Proxy> {
        Proxy::start(Config{ port, protocol: Protocol::HttpConnect })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn protocol(&self) -> Protocol {
        self.registry.protocol
    }

    /// Sessions that have been accepted and not yet closed.
    pub fn active_sessions(&self) -> usize {
        self.registry.sessions().len()
    }

    pub fn is_terminated(&self) -> bool {
        self.registry.is_closed()
    }

    /// Closes every session and stops the accept loop. Failures are
    /// logged, never returned; later calls do nothing.
    pub fn terminate(&self) {
        if self.registry.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("terminating {} proxy on {}", self.registry.protocol, self.addr);

        let sessions: Vec<_> = self.registry.sessions().drain().collect();
        for control in sessions {
            if let Err(err) = control.close() {
                warn!("failed to close session: {}", err);
            }
        }

        // The accept loop only notices the flag once accept() returns.
        match TcpStream::connect(self.addr) {
            Ok(stream) => drop(stream),
            Err(err) => {
                warn!("self-connect to {} failed: {}", self.addr, err);
                return;
            }
        }

        let acceptor = self.acceptor.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(acceptor) = acceptor {
            if acceptor.join().is_err() {
                warn!("accept loop on {} panicked", self.addr);
            }
        }
    }
}

impl Drop for Proxy {
    fn drop(&mut self) {
        self.terminate();
    }
}
