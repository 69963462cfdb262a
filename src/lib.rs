//! # APRS Radio Library
//!
//! Radio task dispatcher and Si446x transceiver engine for APRS trackers.
//!
//! This library multiplexes a single half-duplex Si446x transceiver between
//! continuous AFSK packet reception and on-demand AFSK/2FSK transmission.
//! All radio operations are serialized through one dispatcher per radio unit,
//! and each transmission is fed into the chip's small hardware FIFO by a
//! dedicated feeder task.

pub mod bus;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod feeder;
pub mod modem;
pub mod packet;
pub mod si446x;
pub mod telemetry;
