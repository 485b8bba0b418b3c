//! Transport-independent state machines and decoders.
//!
//! Nothing in this module performs I/O. Decoders take byte slices and return
//! values; state machines take events and return the commands to perform. See
//! [`crate::avec`] for drivers covering the common transports.
//!
//! # Architecture
//!
//! A sensor is reached through one of two paths:
//!
//! - **BLE**: the [`connection::ConnectionManager`] walks a peripheral from
//! discovery to streaming, instantiates the matching [`vendor::Adapter`] and
//! routes notifications to it. Adapters update transmitter and sensor fields
//! from metadata responses and feed data packets to a
//! [`reassembly::Reassembler`]. A completed packet yields a [`fram::Fram`].
//!
//! - **NFC**: a [`nfc::Session`] is advanced one state token at a time, from
//! system information through patch information to block reads, producing an
//! [`nfc::Acquisition`] carrying the same [`fram::Fram`].
//!
//! Either way the snapshot is decoded by [`fram::decode`], which applies the
//! [`check`] integrity checks, and its raw measurements are converted by the
//! [`glucose`] calibration transform. Serial numbers come from [`serial`].

pub mod check;
pub mod connection;
pub mod fram;
pub mod glucose;
pub mod nfc;
pub mod reassembly;
pub mod sensor;
pub mod serial;
pub mod vendor;
