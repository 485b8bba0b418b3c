//! Acquisition and decoding of continuous glucose sensor telemetry.
//!
//! Lancet reads the 344-byte FRAM image of a glucose sensor, either streamed by
//! a BLE transmitter clipped onto the sensor (Bubble, MiaoMiao, Droplet,
//! LimiTTer) or read directly over NFC, and turns it into a validated,
//! calibrated glucose history.
//!
//! The crate is split in two halves. The [`sans`] module holds the protocol
//! machinery without any I/O: the CRC and serial number algorithms, the FRAM
//! decoder, the calibration transform, fragment reassembly, the vendor
//! protocol adapters, the BLE connection state machine and the NFC session
//! states. The [`avec`] module drives those machines against BLE, NFC and
//! HTTP boundaries expressed as traits, and hosts the engine event loop.
//!
//! Most users should begin with [`avec::engine::Engine`]. Applications with
//! their own event loop can drive [`sans::connection::ConnectionManager`]
//! directly.
//!
//! ## Cargo Features
//!
//! The following crate feature flags are available:
//!
//! - `http`: enable the blocking HTTP transport for the remote calibration
//!   service (default).

pub mod avec;
pub mod config;
pub mod sans;
