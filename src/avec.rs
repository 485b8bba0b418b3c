//! Drivers for the transport boundaries.
//!
//! The machines in [`crate::sans`] never touch a radio or a socket. The
//! modules here connect them to the outside world through small traits:
//!
//! - [`ble::Central`] executes the commands of the connection manager;
//! - [`nfc::Iso15693`] answers the exchanges of an NFC session;
//! - [`oop::Transport`] posts forms to the remote calibration service.
//!
//! [`engine::Engine`] ties these together in a single event loop.

pub mod ble;
pub mod engine;
pub mod nfc;
pub mod oop;
