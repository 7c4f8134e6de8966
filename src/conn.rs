use std::io::{self, Read, Write};
use std::net::{self, SocketAddr};

use mio::{Evented, Token, Poll, PollOpt, Ready};
use mio::net::TcpStream;

/// One side of a relay once the handshake is over: a non-blocking
/// stream that can be registered with a `Poll`.
pub struct Connection {
    token: Token,
    addr: SocketAddr,
    stream: TcpStream,
    interest: Ready,
}

impl Connection {
    pub fn new(token: Token, stream: net::TcpStream) -> io::Result<Connection> {
        let addr = stream.peer_addr()?;
        let stream = TcpStream::from_stream(stream)?;
        Ok(Connection{ token, addr, stream, interest: Ready::empty() })
    }

    pub fn addr(&self) -> &SocketAddr {
        &self.addr
    }

    /// Registers, reregisters or deregisters the connection so that
    /// `poll` reports exactly `interest`.
    pub fn set_interest(&mut self, poll: &Poll, interest: Ready)
        -> io::Result<()>
    {
        if interest == self.interest {
            return Ok(());
        }

        if interest.is_empty() {
            poll.deregister(self)?;
        } else if self.interest.is_empty() {
            poll.register(self, self.token, interest, PollOpt::level())?;
        } else {
            poll.reregister(self, self.token, interest, PollOpt::level())?;
        }
        self.interest = interest;
        Ok(())
    }
}

impl io::Write for Connection {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl io::Read for Connection {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Evented for Connection {
    fn register(&self, poll: &Poll, token: Token, interest: Ready,
                opts: PollOpt) -> io::Result<()>
    {
        self.stream.register(poll, token, interest, opts)
    }

    fn reregister(&self, poll: &Poll, token: Token, interest: Ready,
                opts: PollOpt) -> io::Result<()>
    {
        self.stream.reregister(poll, token, interest, opts)
    }

    fn deregister(&self, poll: &Poll) -> io::Result<()> {
        self.stream.deregister(poll)
    }
}
