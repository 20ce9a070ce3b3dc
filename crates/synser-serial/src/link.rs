use std::{
    io::{self, Read, Write},
    thread,
    time::Duration,
};

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, warn};

use crate::command::Command;

/// Pacing delay after every frame, matched to the injector's USB HID polling
/// cadence. The MCU consumes at most one frame per poll interval.
const FRAME_DELAY: Duration = Duration::from_micros(1600);

/// Read timeout on the port. Credit refills keep retrying past it.
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// Ack token: the injector consumed one frame from its queue.
const TOKEN_CONSUMED: u8 = 0x01;
/// Ack token: the injector (re)booted and its queue is empty.
const TOKEN_RESET: u8 = 0xFF;

/// Open and configure the UART: 8 data bits, no parity, one stop bit, no
/// flow control. A raw byte pipe.
pub fn open_port(path: &str, baud_rate: u32) -> serialport::Result<Box<dyn SerialPort>> {
    serialport::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()
}

#[derive(Clone, Copy, Debug)]
pub struct LinkConfig {
    /// Virtual screen size announced in `SCFG`.
    pub screen_w: u16,
    pub screen_h: u16,
    /// Frames the injector can queue before it must ack one.
    pub tx_window: u32,
}

/// The downstream half of the bridge: one open UART plus the state needed to
/// not overrun the injector.
///
/// Flow control: the injector queues up to `tx_window` frames and sends one
/// `0x01` byte per frame it drains, or a single `0xFF` after a reset. The
/// link spends one credit per frame and blocks on the port once the window
/// is exhausted.
///
/// Motion events coalesce between flushes: relative deltas accumulate, an
/// absolute set is held pending, and `flush_motion` emits at most one frame
/// per call, deltas first.
///
/// Write failures are logged and dropped, never propagated: a wedged
/// injector must not take the upstream session down with it.
pub struct SerialLink<P> {
    port: P,
    cfg: LinkConfig,
    credits: u32,
    dx: i16,
    dy: i16,
    pending_set: Option<(u16, u16)>,
}

impl<P: Read + Write> SerialLink<P> {
    pub fn new(port: P, cfg: LinkConfig) -> Self {
        Self { port, cfg, credits: cfg.tx_window, dx: 0, dy: 0, pending_set: None }
    }

    /// Borrow the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Announce the virtual screen size to the injector.
    pub fn announce(&mut self) {
        self.send(Command::ScreenConfig { width: self.cfg.screen_w, height: self.cfg.screen_h });
    }

    /// Stage an absolute cursor set for the next flush. Replaces any
    /// previously pending set.
    pub fn set_position(&mut self, x: u16, y: u16) {
        self.pending_set = Some((x, y));
    }

    /// Accumulate relative motion for the next flush.
    pub fn move_by(&mut self, dx: i16, dy: i16) {
        self.dx = self.dx.saturating_add(dx);
        self.dy = self.dy.saturating_add(dy);
    }

    /// Emit at most one motion frame: accumulated deltas win over a pending
    /// absolute set, and only the emitted slot is cleared.
    pub fn flush_motion(&mut self) {
        if self.dx != 0 || self.dy != 0 {
            let (dx, dy) = (self.dx, self.dy);
            self.dx = 0;
            self.dy = 0;
            self.send(Command::MouseMove { dx, dy });
        } else if let Some((x, y)) = self.pending_set.take() {
            self.send(Command::MouseSet { x, y });
        }
    }

    pub fn button_down(&mut self, mask: u8) {
        self.send(Command::ButtonDown { mask });
    }

    pub fn button_up(&mut self, mask: u8) {
        self.send(Command::ButtonUp { mask });
    }

    pub fn wheel(&mut self, dx: i16, dy: i16) {
        self.send(Command::Wheel { dx, dy });
    }

    pub fn key_down(&mut self, code: u16) {
        self.send(Command::KeyDown { code });
    }

    pub fn key_up(&mut self, code: u16) {
        self.send(Command::KeyUp { code });
    }

    /// Release everything currently held. Sent when the cursor leaves our
    /// screen so no key stays stuck on the target.
    pub fn release_all(&mut self) {
        self.send(Command::ReleaseAll);
    }

    fn send(&mut self, cmd: Command) {
        self.acquire_credit();
        if let Err(err) = self.port.write_all(&cmd.encode()) {
            warn!(?err, ?cmd, "serial write failed, frame dropped");
            return;
        }
        thread::sleep(FRAME_DELAY);
    }

    /// Take one TX credit, blocking on the port for acks once the window is
    /// spent. A reset token re-announces the screen config and leaves the
    /// pending frame pre-counted in the fresh window.
    fn acquire_credit(&mut self) {
        if self.credits > 0 {
            self.credits -= 1;
            return;
        }

        let mut acks = [0u8; 8];
        loop {
            let n = match self.port.read(&mut acks) {
                Ok(0) => continue,
                Ok(n) => n,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(err) => {
                    warn!(?err, "serial ack read failed");
                    return;
                }
            };

            if acks[..n].contains(&TOKEN_RESET) {
                debug!("injector reset, renegotiating");
                self.credits = self.cfg.tx_window - 1;
                self.announce();
                return;
            }

            for &token in &acks[..n] {
                if token != TOKEN_CONSUMED {
                    warn!(token, "unexpected ack token");
                }
            }

            // One of the fresh credits goes to the frame waiting on us.
            self.credits = (self.credits + n as u32 - 1).min(self.cfg.tx_window);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// In-memory stand-in for the UART: scripted ack reads, captured writes.
    struct MockPort {
        acks: VecDeque<Vec<u8>>,
        written: Vec<u8>,
    }

    impl MockPort {
        fn new() -> Self {
            Self { acks: VecDeque::new(), written: Vec::new() }
        }

        fn with_acks(acks: &[&[u8]]) -> Self {
            Self { acks: acks.iter().map(|a| a.to_vec()).collect(), written: Vec::new() }
        }

        fn frames(&self) -> Vec<&[u8]> {
            self.written.chunks(Command::SIZE).collect()
        }
    }

    impl Read for MockPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.acks.pop_front() {
                Some(ack) => {
                    buf[..ack.len()].copy_from_slice(&ack);
                    Ok(ack.len())
                }
                None => Err(io::ErrorKind::BrokenPipe.into()),
            }
        }
    }

    impl Write for MockPort {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn link(port: MockPort, tx_window: u32) -> SerialLink<MockPort> {
        SerialLink::new(port, LinkConfig { screen_w: 1920, screen_h: 1080, tx_window })
    }

    #[test]
    fn deltas_accumulate_into_one_move() {
        let mut l = link(MockPort::new(), 4);
        l.move_by(3, -1);
        l.move_by(2, 2);
        l.flush_motion();
        assert_eq!(l.port.frames(), [&Command::MouseMove { dx: 5, dy: 1 }.encode()[..]]);
    }

    #[test]
    fn deltas_win_over_pending_set() {
        let mut l = link(MockPort::new(), 4);
        l.set_position(100, 200);
        l.move_by(1, 0);
        l.flush_motion();
        // The set was not consumed; it goes out on the next flush.
        l.flush_motion();
        assert_eq!(
            l.port.frames(),
            [
                &Command::MouseMove { dx: 1, dy: 0 }.encode()[..],
                &Command::MouseSet { x: 100, y: 200 }.encode()[..],
            ]
        );
    }

    #[test]
    fn origin_set_is_representable() {
        let mut l = link(MockPort::new(), 4);
        l.set_position(0, 0);
        l.flush_motion();
        assert_eq!(l.port.frames(), [&Command::MouseSet { x: 0, y: 0 }.encode()[..]]);
    }

    #[test]
    fn idle_flush_emits_nothing() {
        let mut l = link(MockPort::new(), 4);
        l.flush_motion();
        l.flush_motion();
        assert!(l.port.written.is_empty());
    }

    #[test]
    fn window_exhaustion_blocks_on_acks() {
        // Window of 2: the third frame must wait for a consumed token.
        let mut l = link(MockPort::with_acks(&[&[TOKEN_CONSUMED]]), 2);
        l.key_down(4);
        l.key_up(4);
        assert_eq!(l.credits, 0);
        l.key_down(5);
        assert_eq!(l.credits, 0);
        assert_eq!(l.port.frames().len(), 3);
        assert!(l.port.acks.is_empty(), "third frame consumed the scripted ack");
    }

    #[test]
    fn credits_never_exceed_the_window() {
        // Device acks more than the window in one read; counter clamps.
        let mut l = link(MockPort::with_acks(&[&[TOKEN_CONSUMED; 6]]), 2);
        l.key_down(4);
        l.key_up(4);
        l.key_down(5);
        assert!(l.credits <= l.cfg.tx_window);
        assert_eq!(l.credits, 2);
    }

    #[test]
    fn reset_token_reannounces_screen_config() {
        let mut l = link(MockPort::with_acks(&[&[TOKEN_RESET]]), 2);
        l.key_down(4);
        l.key_up(4);
        // Window spent; this send hits the reset path.
        l.key_down(5);
        let frames = l.port.frames();
        assert_eq!(frames.len(), 4);
        // SCFG goes out before the frame that was waiting for credit.
        assert_eq!(frames[2], &Command::ScreenConfig { width: 1920, height: 1080 }.encode()[..]);
        assert_eq!(frames[3], &Command::KeyDown { code: 5 }.encode()[..]);
        // window - 1, minus the SCFG itself; the pending frame rode for free.
        assert_eq!(l.credits, 0);
    }

    #[test]
    fn timeouts_keep_waiting_for_acks() {
        struct TimeoutOnce {
            inner: MockPort,
            timed_out: bool,
        }
        impl Read for TimeoutOnce {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if !self.timed_out {
                    self.timed_out = true;
                    return Err(io::ErrorKind::TimedOut.into());
                }
                self.inner.read(buf)
            }
        }
        impl Write for TimeoutOnce {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.inner.write(buf)
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let port =
            TimeoutOnce { inner: MockPort::with_acks(&[&[TOKEN_CONSUMED]]), timed_out: false };
        let mut l = SerialLink::new(port, LinkConfig { screen_w: 10, screen_h: 10, tx_window: 1 });
        l.key_down(4);
        l.key_up(4);
        assert_eq!(l.port.inner.frames().len(), 2);
    }
}
