//! The Synergy client state machine: one greeting exchange, then per-packet
//! dispatch on the leading 4-byte tag.
//!
//! The server drives everything. We answer the handful of queries a screen
//! must answer (`DINF`, keepalives), track the cursor position it believes
//! we have, and forward input events to the serial link. Messages a minimal
//! screen has no use for are acknowledged by ignoring them; real servers
//! send plenty of those.

use std::{
    fmt,
    io::{Read, Write},
};

use synser_serial::SerialLink;
use tracing::{debug, info, warn};

use crate::{
    ProtoError,
    codec::{PacketReader, ResponseWriter},
    keymap,
};

const MAGIC: &[u8] = b"Synergy";

/// A 4-byte ASCII packet tag, kept as the big-endian u32 it decodes to.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(pub u32);

impl Tag {
    pub const fn new(bytes: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*bytes))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0.to_be_bytes() {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02X}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

const QINF: Tag = Tag::new(b"QINF");
const CIAK: Tag = Tag::new(b"CIAK");
const CROP: Tag = Tag::new(b"CROP");
const DSOP: Tag = Tag::new(b"DSOP");
const CALV: Tag = Tag::new(b"CALV");
const CINN: Tag = Tag::new(b"CINN");
const COUT: Tag = Tag::new(b"COUT");
const DCLP: Tag = Tag::new(b"DCLP");
const DMMV: Tag = Tag::new(b"DMMV");
const DMRM: Tag = Tag::new(b"DMRM");
const DMDN: Tag = Tag::new(b"DMDN");
const DMUP: Tag = Tag::new(b"DMUP");
const DMWM: Tag = Tag::new(b"DMWM");
const DKDN: Tag = Tag::new(b"DKDN");
const DKRP: Tag = Tag::new(b"DKRP");
const DKUP: Tag = Tag::new(b"DKUP");

/// Virtual screen geometry reported to the server.
#[derive(Clone, Copy, Debug)]
pub struct ScreenInfo {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    /// Waiting for the server's hello.
    Greeting,
    /// Greeted; operational packets flow.
    Steady,
}

/// Per-connection protocol state.
pub struct Connection {
    phase: Phase,
    hostname: &'static str,
    screen: ScreenInfo,
    /// Cursor position as the server believes it to be.
    mouse_x: u16,
    mouse_y: u16,
    /// One-shot: the absolute move the server sends right after a screen
    /// enter duplicates the enter position and must not be forwarded.
    skip_next_move: bool,
    resp: ResponseWriter,
}

impl Connection {
    pub fn new(hostname: &'static str, screen: ScreenInfo) -> Self {
        Self {
            phase: Phase::Greeting,
            hostname,
            screen,
            mouse_x: 0,
            mouse_y: 0,
            skip_next_move: false,
            resp: ResponseWriter::new(),
        }
    }

    /// Handle one complete packet payload (length prefix already stripped).
    ///
    /// `out` receives any reply; `link` receives translated input events.
    /// An error means the connection is no longer coherent and must be torn
    /// down.
    pub fn handle_packet<P, W>(
        &mut self,
        payload: &[u8],
        link: &mut SerialLink<P>,
        out: &mut W,
    ) -> Result<(), ProtoError>
    where
        P: Read + Write,
        W: Write,
    {
        match self.phase {
            Phase::Greeting => self.greeting(payload, out),
            Phase::Steady => {
                let result = self.dispatch(payload, link, out);
                if result.is_err() {
                    // Never let half a reply escape after a bad packet.
                    self.resp.clear();
                }
                result
            }
        }
    }

    /// `"Synergy" ++ u16 major ++ u16 minor`, answered with the same magic
    /// and version plus our hostname.
    fn greeting<W: Write>(&mut self, payload: &[u8], out: &mut W) -> Result<(), ProtoError> {
        if payload.len() != MAGIC.len() + 4 {
            return Err(ProtoError::BadGreeting("unexpected length"));
        }
        if &payload[..MAGIC.len()] != MAGIC {
            return Err(ProtoError::BadGreeting("wrong magic"));
        }

        let mut rd = PacketReader::new(&payload[MAGIC.len()..]);
        let major = rd.read_u16();
        let minor = rd.read_u16();
        info!(major, minor, "greeted by server");

        self.resp.write_raw(MAGIC);
        self.resp.write_u16(major);
        self.resp.write_u16(minor);
        self.resp.write_str(self.hostname);
        self.resp.flush(out);

        self.phase = Phase::Steady;
        Ok(())
    }

    fn dispatch<P, W>(
        &mut self,
        payload: &[u8],
        link: &mut SerialLink<P>,
        out: &mut W,
    ) -> Result<(), ProtoError>
    where
        P: Read + Write,
        W: Write,
    {
        let mut rd = PacketReader::new(payload);
        let tag = Tag(rd.read_u32());
        if rd.short() {
            return Err(ProtoError::Malformed { tag });
        }

        match tag {
            QINF => self.query_info(rd, out),
            CIAK | CROP => rd.finish(tag),
            DSOP => Self::set_options(rd),
            CALV => self.keep_alive(rd, out),
            CINN => self.screen_enter(rd, link),
            COUT => Self::screen_leave(rd, link),
            DCLP => Self::clipboard(rd),
            DMMV => self.mouse_abs(rd, link),
            DMRM => self.mouse_rel(rd, link),
            DMDN => Self::mouse_button(rd, link, true),
            DMUP => Self::mouse_button(rd, link, false),
            DMWM => Self::mouse_wheel(rd, link),
            DKDN => Self::key(rd, link, true),
            DKRP => Self::key_repeat(rd),
            DKUP => Self::key(rd, link, false),
            _ => {
                info!(%tag, len = payload.len(), "ignoring unknown packet");
                Ok(())
            }
        }
    }

    /// `QINF` → `DINF` with our geometry. Warp zone and reported mouse
    /// position are always zero.
    fn query_info<W: Write>(
        &mut self,
        rd: PacketReader<'_>,
        out: &mut W,
    ) -> Result<(), ProtoError> {
        rd.finish(QINF)?;

        self.resp.write_raw(b"DINF");
        self.resp.write_u16(self.screen.x);
        self.resp.write_u16(self.screen.y);
        self.resp.write_u16(self.screen.width);
        self.resp.write_u16(self.screen.height);
        self.resp.write_u16(0); // warp zone size
        self.resp.write_u16(0); // mouse x
        self.resp.write_u16(0); // mouse y
        self.resp.flush(out);
        Ok(())
    }

    /// Keepalive: echo a bare `CALV`.
    fn keep_alive<W: Write>(
        &mut self,
        rd: PacketReader<'_>,
        out: &mut W,
    ) -> Result<(), ProtoError> {
        rd.finish(CALV)?;
        self.resp.write_raw(b"CALV");
        self.resp.flush(out);
        Ok(())
    }

    /// Option dump: `u32 n` then `n/2` (key, value) pairs. We have no
    /// options to apply; log them and move on.
    fn set_options(mut rd: PacketReader<'_>) -> Result<(), ProtoError> {
        let n = rd.read_u32();
        if n % 2 != 0 {
            return Err(ProtoError::Malformed { tag: DSOP });
        }
        for _ in 0..n / 2 {
            let opt = Tag(rd.read_u32());
            let val = rd.read_u32();
            debug!(%opt, val, "server option");
        }
        rd.finish(DSOP)
    }

    /// Cursor entered our screen: sync the absolute position and arm the
    /// skip for the duplicate `DMMV` that follows.
    fn screen_enter<P>(
        &mut self,
        mut rd: PacketReader<'_>,
        link: &mut SerialLink<P>,
    ) -> Result<(), ProtoError>
    where
        P: Read + Write,
    {
        let x = rd.read_u16();
        let y = rd.read_u16();
        let seq = rd.read_u32();
        let mods = rd.read_u16();
        rd.finish(CINN)?;

        debug!(x, y, seq, mods, "screen enter");
        self.mouse_x = x;
        self.mouse_y = y;
        self.skip_next_move = true;
        link.set_position(x, y);
        Ok(())
    }

    /// Cursor left our screen: release everything so nothing stays held on
    /// the target.
    fn screen_leave<P>(rd: PacketReader<'_>, link: &mut SerialLink<P>) -> Result<(), ProtoError>
    where
        P: Read + Write,
    {
        rd.finish(COUT)?;
        debug!("screen leave");
        link.release_all();
        Ok(())
    }

    /// Clipboard data fits in a regular packet only when small; either way
    /// we do not forward clipboards.
    fn clipboard(mut rd: PacketReader<'_>) -> Result<(), ProtoError> {
        let id = rd.read_u8();
        let seq = rd.read_u32();
        let mark = rd.read_u8();
        let len = rd.read_u32();
        rd.skip(len as usize);
        rd.finish(DCLP)?;
        debug!(id, seq, mark, len, "clipboard ignored");
        Ok(())
    }

    fn mouse_abs<P>(
        &mut self,
        mut rd: PacketReader<'_>,
        link: &mut SerialLink<P>,
    ) -> Result<(), ProtoError>
    where
        P: Read + Write,
    {
        let x = rd.read_u16();
        let y = rd.read_u16();
        rd.finish(DMMV)?;

        if self.skip_next_move {
            self.skip_next_move = false;
            debug!(x, y, "dropping post-enter mouse move");
            return Ok(());
        }

        self.mouse_x = x;
        self.mouse_y = y;
        link.set_position(x, y);
        Ok(())
    }

    fn mouse_rel<P>(
        &mut self,
        mut rd: PacketReader<'_>,
        link: &mut SerialLink<P>,
    ) -> Result<(), ProtoError>
    where
        P: Read + Write,
    {
        let dx = rd.read_i16();
        let dy = rd.read_i16();
        rd.finish(DMRM)?;

        link.move_by(dx, dy);
        // Track where the server thinks we are, pinned to the screen.
        self.mouse_x = clamp_axis(self.mouse_x, dx, self.screen.width);
        self.mouse_y = clamp_axis(self.mouse_y, dy, self.screen.height);
        Ok(())
    }

    fn mouse_button<P>(
        mut rd: PacketReader<'_>,
        link: &mut SerialLink<P>,
        down: bool,
    ) -> Result<(), ProtoError>
    where
        P: Read + Write,
    {
        let id = rd.read_u8();
        rd.finish(if down { DMDN } else { DMUP })?;

        let mask = keymap::button_mask(id);
        if mask == 0 {
            warn!(id, "unmapped mouse button");
        }
        debug!(id, mask, down, "mouse button");
        if down {
            link.button_down(mask);
        } else {
            link.button_up(mask);
        }
        Ok(())
    }

    /// Wheel deltas arrive in scroll units; the injector wants tick signs.
    fn mouse_wheel<P>(mut rd: PacketReader<'_>, link: &mut SerialLink<P>) -> Result<(), ProtoError>
    where
        P: Read + Write,
    {
        let dx = rd.read_i16();
        let dy = rd.read_i16();
        rd.finish(DMWM)?;

        debug!(dx, dy, "mouse wheel");
        link.wheel(dx.signum(), dy.signum());
        Ok(())
    }

    fn key<P>(
        mut rd: PacketReader<'_>,
        link: &mut SerialLink<P>,
        down: bool,
    ) -> Result<(), ProtoError>
    where
        P: Read + Write,
    {
        let id = rd.read_u16();
        let mods = rd.read_u16();
        let phys = rd.read_u16();
        rd.finish(if down { DKDN } else { DKUP })?;

        let code = keymap::to_hid(phys, id);
        debug!(id, mods, phys, code, down, "key");
        if down {
            link.key_down(code);
        } else {
            link.key_up(code);
        }
        Ok(())
    }

    /// Key auto-repeat. The injector's host applies its own repeat, so this
    /// only needs validating.
    fn key_repeat(mut rd: PacketReader<'_>) -> Result<(), ProtoError> {
        let id = rd.read_u16();
        let mods = rd.read_u16();
        let count = rd.read_u16();
        let phys = rd.read_u16();
        rd.finish(DKRP)?;
        debug!(id, mods, count, phys, "key repeat");
        Ok(())
    }
}

fn clamp_axis(pos: u16, delta: i16, size: u16) -> u16 {
    (i32::from(pos) + i32::from(delta)).clamp(0, i32::from(size) - 1) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_displays_as_ascii() {
        assert_eq!(format!("{}", Tag::new(b"QINF")), "QINF");
        assert_eq!(format!("{}", Tag(0x0001_4243)), "\\x00\\x01BC");
    }

    #[test]
    fn clamp_pins_to_screen() {
        assert_eq!(clamp_axis(0, -5, 1920), 0);
        assert_eq!(clamp_axis(10, -5, 1920), 5);
        assert_eq!(clamp_axis(1918, 5, 1920), 1919);
        assert_eq!(clamp_axis(500, 5, 1920), 505);
    }
}
