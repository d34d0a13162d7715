//! Core module containing the main functionality of NavLink
//!
//! This module provides:
//! - Transport layer for sensor byte streams (serial, file replay)
//! - Bounded receive buffer and packet value model
//! - Framing protocol grammars (ASCII, primary binary, bridge)
//! - Packet dispatchers with filtered subscriber fan-out
//! - Packet synchronizer driving the dispatchers over the stream
//! - Shared decoded-measurement sink
//! - Command/response matching
//! - Exporters consuming subscriber queues

pub mod buffer;
pub mod command;
pub mod dispatch;
pub mod export;
pub mod measurement;
pub mod packet;
pub mod protocol;
pub mod queue;
pub mod sensor;
pub mod transport;
