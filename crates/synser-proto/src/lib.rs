pub mod codec;
mod error;
pub mod framer;
pub mod handler;
pub mod keymap;

pub use error::ProtoError;
pub use framer::Framer;
pub use handler::{Connection, ScreenInfo, Tag};
