// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Configuration and utilities

use core::fmt;

/// Wire protocol spoken by the trace source
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Protocol {
    /// Embedded Trace Macrocell v3.5 byte stream
    #[default]
    Etm35,
    /// Micro Trace Buffer (source, destination) word pairs
    Mtb,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Etm35 => write!(f, "ETM35"),
            Protocol::Mtb => write!(f, "MTB"),
        }
    }
}

/// Width of context-ID fields in the ETM stream
///
/// The trace unit is configured with a context-ID size at trace time; the
/// decoder must be told the same size, as context-ID and I-Sync packets
/// carry exactly that many bytes without any in-band length marker.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ContextIdSize {
    /// No context-ID bytes are present in the stream
    #[default]
    None,
    One,
    Two,
    Four,
}

impl ContextIdSize {
    /// Retrieve the number of context-ID bytes carried per packet
    pub const fn bytes(self) -> u8 {
        match self {
            ContextIdSize::None => 0,
            ContextIdSize::One => 1,
            ContextIdSize::Two => 2,
            ContextIdSize::Four => 4,
        }
    }
}

impl TryFrom<u8> for ContextIdSize {
    type Error = u8;

    fn try_from(num: u8) -> Result<Self, Self::Error> {
        match num {
            0 => Ok(Self::None),
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            4 => Ok(Self::Four),
            err => Err(err),
        }
    }
}

/// Decoder configuration
///
/// A parameter set captures everything about the trace source that cannot
/// be recovered from the stream itself. It mirrors the trace unit's
/// control-register setup; a decoder configured differently from the unit
/// that produced the stream will mis-parse variable-length packets.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Parameters {
    /// Protocol emitted by the trace source
    pub protocol: Protocol,
    /// Branch addresses use the alternate encoding (ETMCR bit set)
    pub alt_address_encoding: bool,
    /// Configured width of context-ID fields
    pub context_id_size: ContextIdSize,
    /// The stream carries cycle-accurate P-headers
    pub cycle_accurate: bool,
    /// The trace unit emits data trace only; I-Sync packets carry no address
    pub data_only: bool,
}
