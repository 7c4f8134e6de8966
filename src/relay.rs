use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mio::{Events, Poll, Ready, Token};

use crate::conn::Connection;
use crate::error::{ProxyError, Result};
use crate::handshake::Protocol;


const CLIENT: Token = Token(0);
const REMOTE: Token = Token(1);

const BUFFER_SIZE: usize = 4096;


#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SessionState {
    Accepted,
    Handshaking,
    Connecting,
    Relaying,
    Closed,
}


#[derive(Default)]
struct Sockets {
    closed: bool,
    client: Option<TcpStream>,
    remote: Option<TcpStream>,
}

/// Handle through which a session's sockets are closed from outside the
/// session thread. Holds duplicates of the session's sockets; shutting
/// them down wakes any read or poll blocked on the originals.
pub struct SessionControl {
    sockets: Mutex<Sockets>,
}

impl SessionControl {
    pub fn new(client: &TcpStream) -> io::Result<SessionControl> {
        let sockets = Sockets{ client: Some(client.try_clone()?),
                               ..Sockets::default() };
        Ok(SessionControl{ sockets: Mutex::new(sockets) })
    }

    fn sockets(&self) -> MutexGuard<Sockets> {
        self.sockets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_closed(&self) -> bool {
        self.sockets().closed
    }

    /// Fails once the session has been closed, so a connect that
    /// completes during shutdown is dropped instead of relayed.
    pub fn attach_remote(&self, remote: &TcpStream) -> Result<()> {
        let remote = remote.try_clone()?;
        let mut sockets = self.sockets();
        if sockets.closed {
            return Err(ProxyError::ShutdownRequested);
        }
        sockets.remote = Some(remote);
        Ok(())
    }

    /// Shuts down both sockets. Calling it again is a no-op.
    pub fn close(&self) -> io::Result<()> {
        let (client, remote) = {
            let mut sockets = self.sockets();
            if sockets.closed {
                return Ok(());
            }
            sockets.closed = true;
            (sockets.client.take(), sockets.remote.take())
        };

        let mut result = Ok(());
        for stream in client.iter().chain(remote.iter()) {
            match stream.shutdown(Shutdown::Both) {
                Err(ref err) if err.kind() == io::ErrorKind::NotConnected => {},
                Err(err) => if result.is_ok() { result = Err(err) },
                Ok(()) => {},
            }
        }
        result
    }
}


/// One accepted connection, from handshake to close.
pub struct Session {
    id: usize,
    protocol: Protocol,
    state: SessionState,
    addr: SocketAddr,
    client: TcpStream,
    control: Arc<SessionControl>,
}

impl Session {
    pub fn new(id: usize, protocol: Protocol, client: TcpStream,
               addr: SocketAddr, control: Arc<SessionControl>) -> Session
    {
        debug!("session {}: accepted {} connection from {}", id, protocol, addr);
        Session{ id, protocol, state: SessionState::Accepted, addr, client,
                 control }
    }

    /// Runs the session to completion. Nothing escapes: every failure
    /// ends up as a closed client connection.
    pub fn run(mut self) {
        match self.serve() {
            Ok(()) => {},
            Err(ref err) if err.is_termination() =>
                debug!("session {}: {}", self.id, err),
            Err(ProxyError::InvalidRequest(reason)) =>
                debug!("session {}: invalid request from {}: {}",
                       self.id, self.addr, reason),
            Err(err) => debug!("session {} failed: {}", self.id, err),
        }

        self.set_state(SessionState::Closed);
        if let Err(err) = self.control.close() {
            debug!("session {}: close failed: {}", self.id, err);
        }
    }

    fn set_state(&mut self, state: SessionState) {
        trace!("session {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }

    fn reply_failure(&mut self) {
        if let Err(err) = self.client.write_all(&self.protocol.response(false)) {
            debug!("session {}: failed to send failure reply: {}", self.id, err);
        }
    }

    fn serve(&mut self) -> Result<()> {
        self.set_state(SessionState::Handshaking);
        let target = match self.protocol.read_request(&mut self.client) {
            Ok(target) => target,
            Err(err @ ProxyError::UnreachableDestination(_)) => {
                self.reply_failure();
                return Err(err);
            },
            Err(err) => return Err(err),
        };
        debug!("session {}: {} requested {}", self.id, self.addr, target);

        self.set_state(SessionState::Connecting);
        let remote = match TcpStream::connect((target.host.as_str(), target.port)) {
            Ok(remote) => remote,
            Err(source) => {
                self.reply_failure();
                return Err(ProxyError::ConnectFailure{ target, source });
            }
        };
        self.control.attach_remote(&remote)?;
        self.client.write_all(&self.protocol.response(true))?;
        debug!("session {}: relaying {} <-> {}", self.id, self.addr, target);

        self.set_state(SessionState::Relaying);
        let client = Connection::new(CLIENT, self.client.try_clone()?)?;
        let remote = Connection::new(REMOTE, remote)?;
        Relay::new(client, remote, &self.control)?.run()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        trace!("session {}: dropped", self.id);
    }
}


/// Bytes read from one side that the other side has not taken yet.
/// A direction stops reading while its pipe is non-empty.
struct Pipe {
    buffer: [u8; BUFFER_SIZE],
    start: usize,
    end: usize,
}

impl Pipe {
    fn new() -> Pipe {
        Pipe{ buffer: [0; BUFFER_SIZE], start: 0, end: 0 }
    }

    fn is_empty(&self) -> bool {
        self.start == self.end
    }

    fn fill(&mut self, src: &mut Connection) -> io::Result<usize> {
        let len = src.read(&mut self.buffer)?;
        self.start = 0;
        self.end = len;
        Ok(len)
    }

    fn drain(&mut self, dst: &mut Connection) -> io::Result<()> {
        while !self.is_empty() {
            match dst.write(&self.buffer[self.start .. self.end]) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(len) => self.start += len,
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock =>
                    return Ok(()),
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {},
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }
}


struct Relay<'a> {
    poll: Poll,
    client: Connection,
    remote: Connection,
    upstream: Pipe,
    downstream: Pipe,
    control: &'a SessionControl,
}

impl<'a> Relay<'a> {
    fn new(client: Connection, remote: Connection,
           control: &'a SessionControl) -> io::Result<Relay<'a>>
    {
        let poll = Poll::new()?;
        Ok(Relay{ poll, client, remote, upstream: Pipe::new(),
                  downstream: Pipe::new(), control })
    }

    /// Forwards until one side reaches end of stream or the session is
    /// closed from outside. Always returns an error saying which.
    fn run(&mut self) -> Result<()> {
        let mut events = Events::with_capacity(16);
        loop {
            self.update_interest()?;

            match self.poll.poll(&mut events, None) {
                Ok(_) => {},
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }

            if self.control.is_closed() {
                return Err(ProxyError::ShutdownRequested);
            }

            self.forward(CLIENT)?;
            self.forward(REMOTE)?;
        }
    }

    // Each side waits for reads only while nothing of its own is
    // pending, and for writes only while the other side's data is.
    fn update_interest(&mut self) -> io::Result<()> {
        let client = interest(self.upstream.is_empty(), !self.downstream.is_empty());
        let remote = interest(self.downstream.is_empty(), !self.upstream.is_empty());
        self.client.set_interest(&self.poll, client)?;
        self.remote.set_interest(&self.poll, remote)
    }

    /// Moves at most one chunk from the `from` side to the other one.
    fn forward(&mut self, from: Token) -> Result<()> {
        let (pipe, src, dst) = if from == CLIENT {
            (&mut self.upstream, &mut self.client, &mut self.remote)
        } else {
            (&mut self.downstream, &mut self.remote, &mut self.client)
        };

        if pipe.is_empty() {
            match pipe.fill(src) {
                Ok(0) => {
                    if self.control.is_closed() {
                        return Err(ProxyError::ShutdownRequested);
                    }
                    debug!("{} closed the connection", src.addr());
                    return Err(ProxyError::PeerClosed);
                },
                Ok(len) => trace!("{} bytes {} -> {}", len, src.addr(), dst.addr()),
                Err(ref err) if err.kind() == io::ErrorKind::WouldBlock
                             || err.kind() == io::ErrorKind::Interrupted =>
                    return Ok(()),
                Err(err) => return Err(err.into()),
            }
        }

        pipe.drain(dst)?;
        Ok(())
    }
}

fn interest(readable: bool, writable: bool) -> Ready {
    let mut interest = Ready::empty();
    if readable {
        interest = interest | Ready::readable();
    }
    if writable {
        interest = interest | Ready::writable();
    }
    interest
}


#[cfg(test)]
mod tests {
    use super::*;

    use std::net::TcpListener;
    use std::thread;
    use std::time::Duration;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn close_is_idempotent() {
        let (_client, server) = pair();
        let control = SessionControl::new(&server).unwrap();
        assert!(!control.is_closed());
        control.close().unwrap();
        assert!(control.is_closed());
        control.close().unwrap();
        assert!(control.is_closed());
    }

    #[test]
    fn close_unblocks_pending_read() {
        let (_client, mut server) = pair();
        let control = Arc::new(SessionControl::new(&server).unwrap());

        let reader = thread::spawn(move || {
            let mut buf = [0; 16];
            server.read(&mut buf).unwrap_or(0)
        });

        thread::sleep(Duration::from_millis(50));
        control.close().unwrap();
        assert_eq!(reader.join().unwrap(), 0);
    }

    #[test]
    fn attach_after_close_is_refused() {
        let (_client, server) = pair();
        let (_remote_peer, remote) = pair();
        let control = SessionControl::new(&server).unwrap();
        control.close().unwrap();
        match control.attach_remote(&remote) {
            Err(ProxyError::ShutdownRequested) => {},
            _ => panic!("remote attached to closed session"),
        }
    }

    #[test]
    fn close_shuts_down_attached_remote() {
        let (_client, server) = pair();
        let (mut remote_peer, remote) = pair();
        let control = SessionControl::new(&server).unwrap();
        control.attach_remote(&remote).unwrap();
        control.close().unwrap();

        remote_peer.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let mut buf = [0; 16];
        assert_eq!(remote_peer.read(&mut buf).unwrap(), 0);
    }
}
