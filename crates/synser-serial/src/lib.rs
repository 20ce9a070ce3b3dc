mod command;
mod link;

pub use command::Command;
pub use link::{LinkConfig, SerialLink, open_port};
