// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Reconstructed processor state and the change record
//!
//! This module provides the [`CpuState`] a [`Decoder`][crate::decoder::Decoder]
//! maintains while consuming trace data, together with the [`Change`] kinds
//! through which consumers learn which parts of that state a message touched.

use crate::types::AddressMode;

/// A kind of change to the [`CpuState`]
///
/// Each kind corresponds to one bit of the change record. Bits are raised by
/// the decoder as packets are parsed and stay raised until a consumer takes
/// them via [`CpuState::take_change`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Change {
    /// The program address was updated
    Address,
    /// An exception number was reported
    Exception,
    /// The last instruction was cancelled
    Cancelled,
    /// The alternate instruction set flag toggled
    AltIsa,
    /// The hypervisor mode flag toggled
    Hyp,
    /// The non-secure mode flag toggled
    Secure,
    /// The Jazelle state flag toggled
    Jazelle,
    /// The Thumb state flag toggled
    Thumb,
    /// The I-Sync reason code changed
    Reason,
    /// The I-Sync LSiP flag toggled
    IsLsip,
    /// A new context ID was reported
    ContextId,
    /// A new virtual machine ID was reported
    Vmid,
    /// A timestamp was reported
    Timestamp,
    /// A cycle count was reported
    CycleCount,
    /// Start of trace (MTB)
    TraceStart,
    /// A linear code region was reported (MTB)
    Linear,
    /// Executed/non-executed atom counts were reported
    EnAtoms,
    /// Wait atom counts were reported (cycle-accurate only)
    WaitAtoms,
    /// An exception was entered
    ExceptionEntry,
    /// An exception returned
    ExceptionExit,
    /// The trigger event fired
    Trigger,
    /// The timestamp clock changed speed
    ClockSpeed,
    /// An exception resume was reported
    Resume,
}

impl Change {
    /// Retrieve the change record bit for this kind
    pub const fn mask(self) -> u32 {
        1 << self as u32
    }
}

/// The decoder's view of the traced processor
///
/// A [`Decoder`][crate::decoder::Decoder] keeps exactly one of these and
/// updates it as packets complete. Consumers receive a reference with every
/// message and may also inspect it between pumps. Which fields a message
/// refreshed is communicated through the change record: one sticky bit per
/// [`Change`] kind, cleared only by the consumer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CpuState {
    /// Current program address
    pub addr: u32,
    /// Predicted next fetch address (MTB only)
    pub next_addr: u32,
    /// Branch source address (MTB only)
    pub to_addr: u32,
    /// Instruction-set state the address bytes are interpreted in
    pub addr_mode: AddressMode,
    pub thumb: bool,
    pub jazelle: bool,
    pub alt_isa: bool,
    pub non_secure: bool,
    pub hyp: bool,
    pub context_id: u32,
    pub vmid: u8,
    /// Most recent timestamp
    pub ts: u64,
    /// Most recent cycle count
    pub cycle_count: u32,
    /// Cumulative traced instruction count
    pub inst_count: u64,
    /// Executed atoms in the most recent P-header
    pub eatoms: u8,
    /// Non-executed atoms in the most recent P-header
    pub natoms: u8,
    /// Wait atoms in the most recent P-header (cycle-accurate only)
    pub watoms: u8,
    /// Bit k set iff atom k+1 of the current P-header executed
    pub disposition: u32,
    /// Current exception number, up to 9 bits
    pub exception: u16,
    /// Exception resume code, 4 bits
    pub resume: u8,
    /// I-Sync reason code, 2 bits
    pub reason: u8,
    /// The current I-Sync carries a load/store instruction address
    pub is_lsip: bool,
    changes: u32,
}

impl CpuState {
    /// Check whether a change of the given kind is pending
    ///
    /// Unlike [`take_change`][Self::take_change] this does not clear the bit.
    pub fn is_changed(&self, change: Change) -> bool {
        self.changes & change.mask() != 0
    }

    /// Take a pending change of the given kind
    ///
    /// Returns whether a change of this kind was pending and clears its bit,
    /// so a raised change is observed exactly once. Clearing an already clear
    /// bit is a no-op.
    pub fn take_change(&mut self, change: Change) -> bool {
        let pending = self.is_changed(change);
        self.changes &= !change.mask();
        pending
    }

    /// Retrieve the raw change record
    ///
    /// Bit `Change::mask` of the returned value is set for each pending
    /// change kind. Useful for cheaply iterating all pending changes.
    pub fn changes(&self) -> u32 {
        self.changes
    }

    pub(crate) fn raise(&mut self, change: Change) {
        self.changes |= change.mask();
    }

    pub(crate) fn clear_changes(&mut self) {
        self.changes = 0;
    }

    pub(crate) fn set_non_secure(&mut self, non_secure: bool) {
        if self.non_secure != non_secure {
            self.non_secure = non_secure;
            self.raise(Change::Secure);
        }
    }

    pub(crate) fn set_alt_isa(&mut self, alt_isa: bool) {
        if self.alt_isa != alt_isa {
            self.alt_isa = alt_isa;
            self.raise(Change::AltIsa);
        }
    }

    pub(crate) fn set_hyp(&mut self, hyp: bool) {
        if self.hyp != hyp {
            self.hyp = hyp;
            self.raise(Change::Hyp);
        }
    }

    pub(crate) fn set_jazelle(&mut self, jazelle: bool) {
        if self.jazelle != jazelle {
            self.jazelle = jazelle;
            self.raise(Change::Jazelle);
        }
    }

    pub(crate) fn set_thumb(&mut self, thumb: bool) {
        if self.thumb != thumb {
            self.thumb = thumb;
            self.raise(Change::Thumb);
        }
    }

    pub(crate) fn set_reason(&mut self, reason: u8) {
        if self.reason != reason {
            self.reason = reason;
            self.raise(Change::Reason);
        }
    }

    pub(crate) fn set_lsip(&mut self, is_lsip: bool) {
        if self.is_lsip != is_lsip {
            self.is_lsip = is_lsip;
            self.raise(Change::IsLsip);
        }
    }

    pub(crate) fn set_vmid(&mut self, vmid: u8) {
        if self.vmid != vmid {
            self.vmid = vmid;
            self.raise(Change::Vmid);
        }
    }

    pub(crate) fn set_context_id(&mut self, context_id: u32) {
        if self.context_id != context_id {
            self.context_id = context_id;
            self.raise(Change::ContextId);
        }
    }
}
