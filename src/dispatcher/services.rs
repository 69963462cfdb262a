//! Collaborators owned by the dispatcher: the packet services that hold
//! receive buffers and callbacks, and the software AFSK decoder.

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::Result;

/// Events published by a decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecoderEvent {
    /// A frame passed its FCS check
    Packet(Bytes),
    /// The decoder has finished closing down
    CloseAck,
}

/// Software demodulator attached to a receiving radio
#[cfg_attr(test, mockall::automock)]
pub trait Decoder: Send {
    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Ignore the radio while it transmits
    fn pause(&mut self);

    fn resume(&mut self);

    fn subscribe(&self) -> broadcast::Receiver<DecoderEvent>;

    /// Ask the decoder to shut down; it answers with `CloseAck`
    fn signal_close(&mut self);

    /// Background worker to join after close, if any
    fn take_worker(&mut self) -> Option<JoinHandle<()>>;
}

/// Per-radio resources created at OPEN and released at CLOSE
#[cfg_attr(test, mockall::automock)]
pub trait PacketServices: Send {
    fn create_buffers(&mut self, unit: u8) -> Result<()>;

    fn release_buffers(&mut self, unit: u8);

    fn create_callbacks(&mut self, unit: u8) -> Result<()>;

    fn release_callbacks(&mut self, unit: u8);

    fn create_decoder(&mut self, unit: u8) -> Result<Box<dyn Decoder>>;
}

/// Services for a radio with no software demodulator behind it
///
/// Decoders it creates follow the lifecycle but never report packets.
#[derive(Debug, Default)]
pub struct NoDecoderServices;

impl PacketServices for NoDecoderServices {
    fn create_buffers(&mut self, unit: u8) -> Result<()> {
        debug!("Radio {} buffers ready", unit);
        Ok(())
    }

    fn release_buffers(&mut self, unit: u8) {
        debug!("Radio {} buffers released", unit);
    }

    fn create_callbacks(&mut self, _unit: u8) -> Result<()> {
        Ok(())
    }

    fn release_callbacks(&mut self, _unit: u8) {}

    fn create_decoder(&mut self, _unit: u8) -> Result<Box<dyn Decoder>> {
        Ok(Box::new(IdleDecoder::new()))
    }
}

/// Decoder that tracks its run state and acknowledges close
#[derive(Debug)]
pub struct IdleDecoder {
    events: broadcast::Sender<DecoderEvent>,
    running: bool,
    paused: bool,
}

impl IdleDecoder {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(8);
        Self {
            events,
            running: false,
            paused: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running && !self.paused
    }
}

impl Default for IdleDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for IdleDecoder {
    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) {
        self.paused = false;
    }

    fn subscribe(&self) -> broadcast::Receiver<DecoderEvent> {
        self.events.subscribe()
    }

    fn signal_close(&mut self) {
        self.running = false;
        // No subscribers is fine
        let _ = self.events.send(DecoderEvent::CloseAck);
    }

    fn take_worker(&mut self) -> Option<JoinHandle<()>> {
        None
    }
}
