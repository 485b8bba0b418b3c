//! BLE central boundary.

use thiserror::Error;

use crate::sans::{connection::Command, vendor::PeripheralId};

/// An error reported by the BLE central.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The radio is off or not authorized.
    #[error("Bluetooth unavailable.")]
    Unavailable,
    /// The command names a peripheral the central does not know.
    #[error("Unknown peripheral {0}.")]
    UnknownPeripheral(PeripheralId),
    /// Any other platform error.
    #[error("{0}")]
    Platform(String),
}

/// A BLE central able to carry out connection commands.
///
/// Commands are fire-and-forget: their outcomes come back later as
/// [`crate::sans::connection::Event`]s. An error returned here means the
/// command could not be issued at all.
pub trait Central {
    fn execute(&mut self, command: &Command) -> Result<(), Error>;
}

impl<C: Central + ?Sized> Central for &mut C {
    fn execute(&mut self, command: &Command) -> Result<(), Error> {
        (**self).execute(command)
    }
}
