//! Delivery collaborators
//!
//! Contains LogDeliver, FileDeliver, TcpDeliver, and HttpDeliver.

mod file;
mod http;
mod log;
mod tcp;

pub use self::file::{FileDeliver, FileDeliverConfig};
pub use self::http::{HttpDeliver, HttpDeliverConfig};
pub use self::log::LogDeliver;
pub use self::tcp::{TcpDeliver, TcpDeliverConfig};
