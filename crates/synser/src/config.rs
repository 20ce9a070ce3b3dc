//! Compile-time bridge configuration. There is deliberately no config file:
//! one bridge, one screen, one injector.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

/// Name announced to the Synergy server in the greeting; must match a
/// screen name in the server's layout.
pub const HOSTNAME: &str = "PC";

/// Virtual screen geometry reported in `DINF`.
pub const SCREEN_X: u16 = 0;
pub const SCREEN_Y: u16 = 0;
pub const SCREEN_W: u16 = 1920;
pub const SCREEN_H: u16 = 1080;

/// Frames the injector can queue before acking (its receive buffer depth).
pub const SERIAL_TX_WINDOW: u32 = 4;

/// Cadence of coalesced mouse-motion flushes.
pub const SERIAL_MOUSE_INTERVAL: Duration = Duration::from_millis(16);

/// Largest server-to-client cursor jump still treated as in-sync. Retained
/// for a relative-fallback absolute-move policy; the current policy always
/// issues absolute sets.
#[allow(dead_code)]
pub const MOUSE_SYNC_MARGIN: u16 = 100;

/// The Synergy server. Default port, local host only.
pub const SERVER_ADDR: SocketAddr =
    SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 24800);

/// Baud rates the injector's UART can actually run at.
pub const SUPPORTED_BAUD_RATES: &[u32] = &[
    57_600, 115_200, 230_400, 460_800, 500_000, 576_000, 921_600, 1_000_000, 1_152_000, 2_000_000,
    2_500_000, 3_000_000, 3_500_000, 4_000_000,
];
