//! Packet reassembly: turns the TCP byte stream into discrete
//! length-prefixed payloads, surviving arbitrary fragmentation.

use std::io::{self, Read};

use tracing::{debug, warn};

use crate::ProtoError;

/// Payloads this size or larger never belong to a message we handle
/// (clipboard contents, mostly) and are drained without buffering.
pub const SKIP_THRESHOLD: usize = 2048;

/// Payloads this size or larger mean we lost framing sync; the connection
/// cannot be trusted afterwards.
pub const FATAL_THRESHOLD: usize = 64 * 1024;

const LEN_PREFIX: usize = 4;

#[derive(Clone, Copy)]
enum RxState {
    /// Collecting the 4-byte length prefix.
    Header { buf: [u8; LEN_PREFIX], have: usize },
    /// Collecting a payload of `len` bytes.
    Payload { len: usize, have: usize },
    /// Draining an oversize payload without keeping it.
    Skip { remaining: usize },
}

/// Incremental packet reassembler over a nonblocking reader.
///
/// Carry-over needs no copying: the state machine simply resumes mid-header
/// or mid-payload on the next readable event, however the kernel split the
/// stream.
pub struct Framer {
    state: RxState,
    payload: Vec<u8>,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self {
            state: RxState::Header { buf: [0; LEN_PREFIX], have: 0 },
            payload: vec![0; SKIP_THRESHOLD],
        }
    }

    /// Pull everything currently readable out of `src`, handing each
    /// complete payload to `on_packet`. Returns once the source would
    /// block; EOF and handler errors are fatal.
    pub fn drain<R, F>(&mut self, src: &mut R, mut on_packet: F) -> Result<(), ProtoError>
    where
        R: Read,
        F: FnMut(&[u8]) -> Result<(), ProtoError>,
    {
        loop {
            match self.state {
                RxState::Header { mut buf, mut have } => {
                    while have < LEN_PREFIX {
                        match src.read(&mut buf[have..]) {
                            Ok(0) => return Err(ProtoError::Disconnected),
                            Ok(n) => have += n,
                            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                                self.state = RxState::Header { buf, have };
                                return Ok(());
                            }
                            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                            Err(err) => return Err(err.into()),
                        }
                    }

                    let len = u32::from_be_bytes(buf) as usize;
                    if len >= FATAL_THRESHOLD {
                        return Err(ProtoError::Oversize { len });
                    }
                    self.state = if len >= SKIP_THRESHOLD {
                        warn!(len, "skipping oversize packet");
                        RxState::Skip { remaining: len }
                    } else {
                        RxState::Payload { len, have: 0 }
                    };
                }

                RxState::Payload { len, mut have } => {
                    while have < len {
                        match src.read(&mut self.payload[have..len]) {
                            Ok(0) => return Err(ProtoError::Disconnected),
                            Ok(n) => have += n,
                            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                                self.state = RxState::Payload { len, have };
                                return Ok(());
                            }
                            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                            Err(err) => return Err(err.into()),
                        }
                    }

                    on_packet(&self.payload[..len])?;
                    self.state = RxState::Header { buf: [0; LEN_PREFIX], have: 0 };
                }

                RxState::Skip { mut remaining } => {
                    while remaining > 0 {
                        let chunk = remaining.min(self.payload.len());
                        match src.read(&mut self.payload[..chunk]) {
                            Ok(0) => return Err(ProtoError::Disconnected),
                            Ok(n) => remaining -= n,
                            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                                self.state = RxState::Skip { remaining };
                                return Ok(());
                            }
                            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                            Err(err) => return Err(err.into()),
                        }
                    }

                    debug!("oversize packet drained");
                    self.state = RxState::Header { buf: [0; LEN_PREFIX], have: 0 };
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Reader that serves scripted chunks, then reports `WouldBlock` (the
    /// shape of a drained nonblocking socket).
    struct ChunkedSource {
        chunks: VecDeque<Vec<u8>>,
    }

    impl ChunkedSource {
        fn new(chunks: &[&[u8]]) -> Self {
            Self { chunks: chunks.iter().map(|c| c.to_vec()).collect() }
        }

        fn of_bytes(data: &[u8], chunk_size: usize) -> Self {
            Self { chunks: data.chunks(chunk_size).map(<[u8]>::to_vec).collect() }
        }
    }

    impl Read for ChunkedSource {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let Some(front) = self.chunks.front_mut() else {
                return Err(io::ErrorKind::WouldBlock.into());
            };
            let n = front.len().min(buf.len());
            buf[..n].copy_from_slice(&front[..n]);
            front.drain(..n);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            Ok(n)
        }
    }

    fn collect(src: &mut ChunkedSource) -> Result<Vec<Vec<u8>>, ProtoError> {
        let mut framer = Framer::new();
        let mut packets = Vec::new();
        framer.drain(src, |p| {
            packets.push(p.to_vec());
            Ok(())
        })?;
        Ok(packets)
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        let mut f = (payload.len() as u32).to_be_bytes().to_vec();
        f.extend_from_slice(payload);
        f
    }

    #[test]
    fn whole_packet_in_one_read() {
        let mut src = ChunkedSource::new(&[&frame(b"CALV")]);
        assert_eq!(collect(&mut src).unwrap(), [b"CALV".to_vec()]);
    }

    #[test]
    fn several_packets_in_one_read() {
        let mut data = frame(b"CALV");
        data.extend_from_slice(&frame(b"QINF"));
        let mut src = ChunkedSource::new(&[&data]);
        assert_eq!(collect(&mut src).unwrap(), [b"CALV".to_vec(), b"QINF".to_vec()]);
    }

    #[test]
    fn split_inside_the_length_prefix() {
        let data = frame(b"QINF");
        let mut src = ChunkedSource::new(&[&data[..2], &data[2..]]);
        assert_eq!(collect(&mut src).unwrap(), [b"QINF".to_vec()]);
    }

    #[test]
    fn split_inside_the_payload() {
        let data = frame(b"QINF");
        let mut src = ChunkedSource::new(&[&data[..5], &data[5..]]);
        assert_eq!(collect(&mut src).unwrap(), [b"QINF".to_vec()]);
    }

    #[test]
    fn reassembles_for_every_split_size() {
        let mut stream = Vec::new();
        for payload in [&b"DMMV\x00\x10\x00\x20"[..], b"CALV", b"COUT"] {
            stream.extend_from_slice(&frame(payload));
        }
        for chunk_size in 1..stream.len() {
            let mut src = ChunkedSource::of_bytes(&stream, chunk_size);
            let packets = collect(&mut src).unwrap();
            assert_eq!(packets.len(), 3, "chunk_size {chunk_size}");
            assert_eq!(packets[0], b"DMMV\x00\x10\x00\x20");
            assert_eq!(packets[1], b"CALV");
            assert_eq!(packets[2], b"COUT");
        }
    }

    #[test]
    fn carry_over_survives_separate_drain_calls() {
        let data = frame(b"QINF");
        let mut framer = Framer::new();
        let mut packets = Vec::new();

        let mut first = ChunkedSource::new(&[&data[..3]]);
        framer
            .drain(&mut first, |p| {
                packets.push(p.to_vec());
                Ok(())
            })
            .unwrap();
        assert!(packets.is_empty());

        let mut second = ChunkedSource::new(&[&data[3..]]);
        framer
            .drain(&mut second, |p| {
                packets.push(p.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(packets, [b"QINF".to_vec()]);
    }

    #[test]
    fn oversize_payload_is_drained_not_delivered() {
        let big = vec![0xAB; 4096];
        let mut stream = frame(&big);
        stream.extend_from_slice(&frame(b"CALV"));
        // Three reads for the big one, like a clipboard crossing recv calls.
        let mut src = ChunkedSource::of_bytes(&stream, 1500);
        let packets = collect(&mut src).unwrap();
        assert_eq!(packets, [b"CALV".to_vec()]);
    }

    #[test]
    fn giant_length_prefix_is_fatal() {
        let mut src = ChunkedSource::new(&[&frame(&vec![0; FATAL_THRESHOLD])]);
        assert!(matches!(collect(&mut src), Err(ProtoError::Oversize { .. })));
    }

    #[test]
    fn eof_is_a_disconnect() {
        struct Eof;
        impl Read for Eof {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Ok(0)
            }
        }
        let mut framer = Framer::new();
        let res = framer.drain(&mut Eof, |_| Ok(()));
        assert!(matches!(res, Err(ProtoError::Disconnected)));
    }

    #[test]
    fn handler_errors_propagate() {
        let mut src = ChunkedSource::new(&[&frame(b"CALV")]);
        let mut framer = Framer::new();
        let res = framer.drain(&mut src, |_| Err(ProtoError::Disconnected));
        assert!(res.is_err());
    }
}
