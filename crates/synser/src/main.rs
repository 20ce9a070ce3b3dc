mod bridge;
mod config;
mod timer;

use clap::Parser;
use synser_proto::{Connection, ScreenInfo};
use synser_serial::{LinkConfig, SerialLink, open_port};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::bridge::Bridge;

#[derive(Parser, Debug)]
#[command(version, about = "Synergy client that forwards input to a serial HID injector")]
struct Cli {
    /// Serial device the injector is attached to
    #[arg(short, long)]
    device: String,

    /// UART baud rate
    #[arg(short, long)]
    baudrate: u32,
}

fn main() {
    init_tracing();
    let cli = Cli::parse();

    if !config::SUPPORTED_BAUD_RATES.contains(&cli.baudrate) {
        error!(baudrate = cli.baudrate, "unsupported baud rate");
        std::process::exit(1);
    }

    let port = match open_port(&cli.device, cli.baudrate) {
        Ok(port) => port,
        Err(err) => {
            error!(%err, device = %cli.device, "couldn't open the serial device");
            std::process::exit(1);
        }
    };
    info!(device = %cli.device, baudrate = cli.baudrate, "serial device ready");

    let mut link = SerialLink::new(
        port,
        LinkConfig {
            screen_w: config::SCREEN_W,
            screen_h: config::SCREEN_H,
            tx_window: config::SERIAL_TX_WINDOW,
        },
    );
    link.announce();

    let conn = Connection::new(
        config::HOSTNAME,
        ScreenInfo {
            x: config::SCREEN_X,
            y: config::SCREEN_Y,
            width: config::SCREEN_W,
            height: config::SCREEN_H,
        },
    );

    let mut bridge =
        match Bridge::connect(config::SERVER_ADDR, conn, link, config::SERIAL_MOUSE_INTERVAL) {
            Ok(bridge) => bridge,
            Err(err) => {
                error!(%err, addr = %config::SERVER_ADDR, "couldn't reach the synergy server");
                std::process::exit(1);
            }
        };

    if let Err(err) = bridge.run() {
        error!(%err, "session ended");
        std::process::exit(1);
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).with_target(false).init();
}
