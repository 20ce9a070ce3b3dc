/// One command frame for the HID injector.
///
/// The wire form is fixed at 8 bytes: a 4-byte ASCII tag followed by two
/// 16-bit arguments. Args are little-endian; the injector MCU is
/// little-endian and the UART is a point-to-point link, so there is no
/// network byte order here. Unused args are zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Announce the virtual screen size. Sent once after open and again
    /// whenever the injector reports a reset.
    ScreenConfig { width: u16, height: u16 },
    /// Absolute cursor position.
    MouseSet { x: u16, y: u16 },
    /// Relative cursor motion.
    MouseMove { dx: i16, dy: i16 },
    /// Press the buttons in `mask` (bit 0 = left, 1 = right, 2 = middle,
    /// 3 = back, 4 = forward).
    ButtonDown { mask: u8 },
    ButtonUp { mask: u8 },
    /// Wheel ticks, normally ±1 per event.
    Wheel { dx: i16, dy: i16 },
    /// Press/release one HID keycode.
    KeyDown { code: u16 },
    KeyUp { code: u16 },
    /// Release every held key and button.
    ReleaseAll,
}

impl Command {
    pub const SIZE: usize = 8;

    fn parts(self) -> (&'static [u8; 4], u16, u16) {
        match self {
            Self::ScreenConfig { width, height } => (b"SCFG", width, height),
            Self::MouseSet { x, y } => (b"MSET", x, y),
            Self::MouseMove { dx, dy } => (b"MMOV", dx as u16, dy as u16),
            Self::ButtonDown { mask } => (b"MBDN", mask as u16, 0),
            Self::ButtonUp { mask } => (b"MBUP", mask as u16, 0),
            Self::Wheel { dx, dy } => (b"MWHL", dx as u16, dy as u16),
            Self::KeyDown { code } => (b"KBDN", code, 0),
            Self::KeyUp { code } => (b"KBUP", code, 0),
            Self::ReleaseAll => (b"LEAV", 0, 0),
        }
    }

    pub fn encode(self) -> [u8; Self::SIZE] {
        let (tag, arg1, arg2) = self.parts();
        let mut frame = [0u8; Self::SIZE];
        frame[..4].copy_from_slice(tag);
        frame[4..6].copy_from_slice(&arg1.to_le_bytes());
        frame[6..8].copy_from_slice(&arg2.to_le_bytes());
        frame
    }
}
