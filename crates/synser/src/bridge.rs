//! The event loop: one socket, one timer, nothing else.
//!
//! A single blocking `poll` multiplexes the Synergy socket against the
//! motion-flush tick. Packets are handled to completion in receive order;
//! the tick drains whatever mouse motion accumulated since the last one.

use std::{
    io::{self, Read, Write},
    net::{self, SocketAddr},
    thread,
    time::Duration,
};

use mio::{Events, Interest, Poll, Token, net::TcpStream};
use synser_proto::{Connection, Framer, ProtoError};
use synser_serial::SerialLink;
use tracing::info;

use crate::timer::Repeater;

const SERVER: Token = Token(0);

/// Rest after each flush tick, matching the original bridge's cadence.
const POST_FLUSH_DELAY: Duration = Duration::from_millis(16);

pub struct Bridge<P> {
    poll: Poll,
    events: Events,
    socket: TcpStream,
    framer: Framer,
    conn: Connection,
    link: SerialLink<P>,
    flusher: Repeater,
}

impl<P: Read + Write> Bridge<P> {
    /// Connect blocking, then switch to readiness-driven operation. A
    /// refused or unreachable server fails here, before the loop starts.
    pub fn connect(
        addr: SocketAddr,
        conn: Connection,
        link: SerialLink<P>,
        flush_interval: Duration,
    ) -> io::Result<Self> {
        let stream = net::TcpStream::connect(addr)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;
        let mut socket = TcpStream::from_std(stream);

        let poll = Poll::new()?;
        poll.registry().register(&mut socket, SERVER, Interest::READABLE)?;
        info!(%addr, "connected to synergy server");

        Ok(Self {
            poll,
            events: Events::with_capacity(16),
            socket,
            framer: Framer::new(),
            conn,
            link,
            flusher: Repeater::every(flush_interval),
        })
    }

    /// Run until the connection dies. There is no reconnect: any protocol
    /// or transport failure surfaces here and ends the process.
    pub fn run(&mut self) -> Result<(), ProtoError> {
        loop {
            let timeout = self.flusher.until_next();
            match self.poll.poll(&mut self.events, Some(timeout)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }

            if self.events.iter().any(|ev| ev.token() == SERVER) {
                // The handler replies on the same socket the framer reads
                // from; both sides go through shared reborrows.
                let Self { framer, conn, link, socket, .. } = self;
                framer.drain(&mut &*socket, |payload| {
                    conn.handle_packet(payload, link, &mut &*socket)
                })?;
            }

            if self.flusher.fired() {
                self.link.flush_motion();
                thread::sleep(POST_FLUSH_DELAY);
            }
        }
    }
}
