use async_trait::async_trait;

use crate::{error::LinkError, protocol::Register};

/// Minimal register transport for one thermostat
///
/// A link is created fresh for every session, connected once, used for a
/// handful of register reads and writes, and disconnected. Register payloads
/// are opaque to the link.
#[async_trait]
pub trait Link: Send {
    /// Open the connection to the device at `address`
    async fn connect(&mut self, address: &str) -> Result<(), LinkError>;

    /// Read the full contents of a register
    async fn read_register(&mut self, register: Register) -> Result<Vec<u8>, LinkError>;

    /// Write the full contents of a register
    ///
    /// With `with_response` set the write waits for the device's acknowledgment.
    async fn write_register(
        &mut self,
        register: Register,
        data: &[u8],
        with_response: bool,
    ) -> Result<(), LinkError>;

    /// Close the connection
    ///
    /// Must be idempotent and safe to call on a link that never connected.
    async fn disconnect(&mut self);
}

/// Creates a fresh [`Link`] for each session
pub trait LinkProvider: Send + Sync {
    /// The link type handed out
    type Link: Link;

    /// Create an unconnected link
    fn create_link(&self) -> Self::Link;
}

impl<F, L> LinkProvider for F
where
    F: Fn() -> L + Send + Sync,
    L: Link,
{
    type Link = L;

    fn create_link(&self) -> L {
        self()
    }
}
