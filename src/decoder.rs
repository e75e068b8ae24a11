// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Trace decoder
//!
//! This module provides the push-driven [`Decoder`] for ARM instruction
//! trace streams. Raw input is fed to a decoder via
//! [`pump`][Decoder::pump]; the decoder reconstructs messages according to
//! the configured [`Protocol`] and notifies a [`Sink`] as each message
//! completes. Decoders are constructed via a [`Builder`].

mod etm;
mod mtb;

#[cfg(test)]
mod tests;

use crate::config::{ContextIdSize, Parameters, Protocol};
use crate::cpu::{Change, CpuState};
use crate::sink::Sink;

/// Synchronisation statistics
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub struct Stats {
    /// Number of times the decoder was forced into sync
    pub sync_count: u32,
    /// Number of times synchronisation was lost
    pub lost_sync_count: u32,
}

/// Create a new [`Builder`] for [`Decoder`]s
pub fn builder() -> Builder {
    Default::default()
}

/// Builder for [`Decoder`]s
///
/// New builders are configured for an ETMv3.5 source with standard branch
/// address encoding, no context-ID bytes and no cycle accurate tracing.
#[derive(Copy, Clone, Default)]
pub struct Builder {
    params: Parameters,
}

impl Builder {
    /// Create a new builder
    pub fn new() -> Self {
        Default::default()
    }

    /// Set all [`Parameters`] at once
    pub fn with_params(self, params: &Parameters) -> Self {
        Self { params: *params }
    }

    /// Set the [`Protocol`] to decode
    pub fn with_protocol(self, protocol: Protocol) -> Self {
        Self {
            params: Parameters {
                protocol,
                ..self.params
            },
        }
    }

    /// Select the alternate branch-address encoding
    pub fn with_alt_address_encoding(self, alt: bool) -> Self {
        Self {
            params: Parameters {
                alt_address_encoding: alt,
                ..self.params
            },
        }
    }

    /// Set the configured width of context-ID fields
    pub fn with_context_id_size(self, size: ContextIdSize) -> Self {
        Self {
            params: Parameters {
                context_id_size: size,
                ..self.params
            },
        }
    }

    /// Select cycle-accurate P-header decoding
    pub fn with_cycle_accurate(self, cycle_accurate: bool) -> Self {
        Self {
            params: Parameters {
                cycle_accurate,
                ..self.params
            },
        }
    }

    /// Select data-only mode (I-Sync packets carry no address)
    pub fn with_data_only(self, data_only: bool) -> Self {
        Self {
            params: Parameters {
                data_only,
                ..self.params
            },
        }
    }

    /// Build the [`Decoder`]
    pub fn build(self) -> Decoder {
        Decoder {
            params: self.params,
            state: Default::default(),
            async_count: 0,
            rxed_isync: false,
            addr_construct: 0,
            ts_construct: 0,
            cycle_construct: 0,
            context_construct: 0,
            cpu: Default::default(),
            stats: Default::default(),
        }
    }
}

/// Push-driven trace protocol decoder
///
/// A decoder owns the complete state for one trace source: the externally
/// visible [`CpuState`] plus the transient packet-construction state. Its
/// footprint is flat and bounded; it never allocates.
///
/// A decoder starts out unsynchronised. An ETMv3.5 decoder synchronises on
/// an A-Sync sequence in the stream or on [`force_sync`][Self::force_sync];
/// an MTB decoder synchronises on its first address pair. ETM messages are
/// additionally withheld until the first I-Sync packet has restated the
/// processor state.
///
/// One decoder instance decodes one trace source. Decoders are independent
/// of each other; pumping them from different threads needs no coordination
/// beyond the usual exclusive access to each instance.
pub struct Decoder {
    params: Parameters,
    state: etm::State,
    async_count: u32,
    rxed_isync: bool,
    addr_construct: u32,
    ts_construct: u64,
    cycle_construct: u32,
    context_construct: u32,
    cpu: CpuState,
    stats: Stats,
}

impl Decoder {
    /// Pump raw trace data through the decoder
    ///
    /// For ETMv3.5 the buffer is consumed one octet at a time. For MTB it is
    /// consumed in 8-byte (source, destination) pairs of little-endian
    /// words; a trailing partial pair is ignored, completing it is the
    /// transport's concern.
    ///
    /// The sink's message callback is invoked at most once per consumed
    /// unit, synchronously, before `pump` returns.
    pub fn pump<S: Sink>(&mut self, data: &[u8], sink: &mut S) {
        match self.params.protocol {
            Protocol::Etm35 => {
                for &byte in data {
                    self.pump_etm_byte(byte, sink);
                }
            }
            Protocol::Mtb => {
                for pair in data.chunks_exact(8) {
                    let source = u32::from_le_bytes([pair[0], pair[1], pair[2], pair[3]]);
                    let dest = u32::from_le_bytes([pair[4], pair[5], pair[6], pair[7]]);
                    self.pump_mtb_pair(source, dest, sink);
                }
            }
        }
    }

    /// Switch the protocol to decode
    ///
    /// Intended for configuring a freshly built decoder; switching while a
    /// packet is half collected leaves the state machine where it was and
    /// the next MTB pair will panic on the stale ETM state.
    pub fn set_protocol(&mut self, protocol: Protocol) {
        self.params.protocol = protocol;
    }

    /// Select the alternate branch-address encoding
    pub fn set_alt_address_encoding(&mut self, alt: bool) {
        self.params.alt_address_encoding = alt;
    }

    /// Check whether the decoder is synchronised
    pub fn is_synced(&self) -> bool {
        !matches!(self.state, etm::State::Unsynced)
    }

    /// Force the decoder into or out of synchronisation
    ///
    /// Forcing an unsynchronised decoder into sync counts as a gained sync;
    /// forcing a synchronised decoder out counts as a lost one and discards
    /// the I-Sync state, so messages stay suppressed until the stream's
    /// next I-Sync. The other two combinations are no-ops.
    pub fn force_sync(&mut self, synced: bool) {
        if !self.is_synced() {
            if synced {
                self.state = etm::State::Idle;
                self.stats.sync_count = self.stats.sync_count.saturating_add(1);
            }
        } else if !synced {
            self.stats.lost_sync_count = self.stats.lost_sync_count.saturating_add(1);
            self.async_count = 0;
            self.rxed_isync = false;
            self.state = etm::State::Unsynced;
        }
    }

    /// Discard input until the next I-Sync packet
    ///
    /// Puts a synchronised ETM decoder into a state in which everything but
    /// an I-Sync header is ignored, re-anchoring the processor state on the
    /// stream's next full restatement. Useful after the consumer has reason
    /// to distrust the current state without having lost byte alignment.
    /// No-op while unsynchronised, and for MTB, which has no I-Sync packets
    /// to wait for.
    pub fn wait_for_isync(&mut self) {
        if self.params.protocol == Protocol::Etm35 && self.is_synced() {
            self.state = etm::State::WaitISync;
        }
    }

    /// Retrieve the synchronisation statistics
    pub fn stats(&self) -> Stats {
        self.stats
    }

    /// Reset the synchronisation statistics
    pub fn zero_stats(&mut self) {
        self.stats = Default::default();
    }

    /// Retrieve the reconstructed processor state
    pub fn cpu(&self) -> &CpuState {
        &self.cpu
    }

    /// Retrieve the reconstructed processor state, mutably
    ///
    /// Callers use this to seed fields the stream alone cannot establish,
    /// e.g. forcing [`AddressMode::Thumb`][crate::types::AddressMode] for
    /// Cortex-M targets which never execute ARM-state code.
    pub fn cpu_mut(&mut self) -> &mut CpuState {
        &mut self.cpu
    }

    /// Take a pending [`Change`] of the given kind
    ///
    /// Test-and-clear on the change record; see [`CpuState::take_change`].
    pub fn state_changed(&mut self, change: Change) -> bool {
        self.cpu.take_change(change)
    }
}
