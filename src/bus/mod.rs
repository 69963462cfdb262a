//! # Radio Bus Abstraction
//!
//! Trait abstraction for the SPI link to the transceiver to enable testing.
//!
//! Board pin mapping and bus bring-up are done by the board support code;
//! the driver only needs full-duplex exchanges and the CCA input line.

use async_trait::async_trait;
use std::io;

pub mod sim;

pub use sim::SimulatedChip;

/// Trait for transceiver bus operations
#[async_trait]
pub trait SpiBus: Send {
    /// Full-duplex transfer of `tx.len()` bytes into `rx`
    ///
    /// `rx` is at least as long as `tx`.
    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()>;

    /// Sample the clear channel assessment line (true = carrier detected)
    async fn read_cca(&mut self) -> io::Result<bool>;
}

#[async_trait]
impl<B: SpiBus + ?Sized> SpiBus for Box<B> {
    async fn exchange(&mut self, tx: &[u8], rx: &mut [u8]) -> io::Result<()> {
        (**self).exchange(tx, rx).await
    }

    async fn read_cca(&mut self) -> io::Result<bool> {
        (**self).read_cca().await
    }
}
