// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! ETMv3.5 packet state machine
//!
//! One state per partially collected packet, dispatched per octet. Packet
//! identification happens on the first octet in [`State::Idle`]; multi-byte
//! packets carry their progress in the state's payload. The construction
//! accumulators live on the [`Decoder`] because branch addresses and
//! timestamps are folded into their predecessor's value.

use crate::cpu::Change;
use crate::sink::{Sink, Verbosity};
use crate::types::AddressMode;

use super::Decoder;

/// Protocol state of an ETMv3.5 decoder
///
/// Also doubles as the sync state for MTB, which only ever moves between
/// [`Unsynced`][State::Unsynced] and [`Idle`][State::Idle].
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq)]
pub(super) enum State {
    /// Byte alignment unknown; waiting for an A-Sync or a forced sync
    #[default]
    Unsynced,
    /// Aligned, between packets
    Idle,
    /// Collecting branch-address bytes, standard encoding
    BranchAddrStd { collected: u8 },
    /// Collecting branch-address bytes, alternate encoding
    BranchAddrAlt { collected: u8 },
    /// Collecting exception bytes behind a branch address
    Exception { late: bool },
    /// Collecting the virtual machine ID
    Vmid,
    /// Collecting timestamp bytes
    Timestamp { collected: u8 },
    /// Collecting stand-alone cycle-count bytes
    CycleCount { collected: u8 },
    /// Collecting stand-alone context-ID bytes
    ContextId { collected: u8 },
    /// Discarding input until the next I-Sync header
    WaitISync,
    /// Collecting the context-ID bytes of an I-Sync
    ISyncContext { collected: u8 },
    /// Expecting the I-Sync information byte
    ISyncInfo,
    /// Collecting the I-Sync address
    ISyncAddr { collected: u8 },
    /// Collecting the cycle count heading an I-Sync
    ISyncCycleCount { collected: u8 },
}

impl State {
    pub(super) fn name(&self) -> &'static str {
        match self {
            State::Unsynced => "UNSYNCED",
            State::Idle => "IDLE",
            State::BranchAddrStd { .. } => "BRANCH_ADDR_STD",
            State::BranchAddrAlt { .. } => "BRANCH_ADDR_ALT",
            State::Exception { .. } => "EXCEPTION",
            State::Vmid => "VMID",
            State::Timestamp { .. } => "TSTAMP",
            State::CycleCount { .. } => "CYCLECOUNT",
            State::ContextId { .. } => "CONTEXTID",
            State::WaitISync => "WAIT_ISYNC",
            State::ISyncContext { .. } => "ISYNC_CONTEXT",
            State::ISyncInfo => "ISYNC_INFO",
            State::ISyncAddr { .. } => "ISYNC_ADDR",
            State::ISyncCycleCount { .. } => "ISYNC_CYCLECOUNT",
        }
    }
}

/// Outcome of consuming one octet
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Event {
    None,
    /// Synchronisation established on an I-Sync header
    Synced,
    /// A message completed
    Message,
}

/// Bit position at which branch-address byte `collected` is folded in
///
/// ARM addresses shift the seven payload bits up by one (word alignment
/// leaves bit 1 encoded), Jazelle down by one.
fn bit_shift(mode: AddressMode, collected: u8) -> u32 {
    let ofs = match mode {
        AddressMode::Arm => 1,
        AddressMode::Thumb => 0,
        AddressMode::Jazelle => -1,
    };
    (7 * i32::from(collected) + ofs) as u32
}

impl Decoder {
    /// Pump one octet through the ETMv3.5 state machine
    pub(super) fn pump_etm_byte<S: Sink>(&mut self, c: u8, sink: &mut S) {
        let prior = self.state;

        // The A-Sync check runs ahead of per-state dispatch: five or more
        // zero bytes followed by 0x80 mark a byte-stream boundary from any
        // state.
        let (next, event) = if self.async_count >= 5 && c == 0x80 {
            sink.report(Verbosity::Debug, format_args!("A-Sync accumulation complete"));
            (State::Idle, Event::None)
        } else {
            self.async_count = if c == 0 {
                self.async_count.saturating_add(1)
            } else {
                0
            };
            self.consume(c, sink)
        };

        if prior != State::Unsynced {
            sink.report(
                Verbosity::Debug,
                format_args!("{c:02x}: {} -> {}", prior.name(), next.name()),
            );
        }

        self.state = next;

        // Nothing is surfaced before the first I-Sync anchors the state
        if event != Event::None && self.rxed_isync {
            sink.message(&mut self.cpu);
        }
    }

    fn consume<S: Sink>(&mut self, c: u8, sink: &mut S) -> (State, Event) {
        match self.state {
            State::Unsynced => (State::Unsynced, Event::None),
            State::Idle => self.idle(c, sink),
            State::BranchAddrStd { collected } => self.branch_addr_std(c, collected, sink),
            State::BranchAddrAlt { collected } => self.branch_addr_alt(c, collected, sink),
            State::Exception { late } => self.exception(c, late, sink),
            State::Vmid => self.vmid(c, sink),
            State::Timestamp { collected } => self.timestamp(c, collected, sink),
            State::CycleCount { collected } => self.cycle_count(c, collected, sink),
            State::ContextId { collected } => self.context_id(c, collected, sink),
            State::WaitISync => self.wait_isync(c),
            State::ISyncContext { collected } => self.isync_context(c, collected),
            State::ISyncInfo => self.isync_info(c, sink),
            State::ISyncAddr { collected } => self.isync_addr(c, collected, sink),
            State::ISyncCycleCount { collected } => self.isync_cycle_count(c, collected),
        }
    }

    fn idle<S: Sink>(&mut self, c: u8, sink: &mut S) -> (State, Event) {
        // Branch addresses claim every first byte with bit 0 set; all
        // other packet headers have it clear.
        if c & 0b0000_0001 != 0 {
            return self.branch_addr_start(c, sink);
        }

        match c {
            // A-Sync filler, already counted above
            0b0000_0000 => (State::Idle, Event::None),
            0b0000_0100 => {
                sink.report(Verbosity::Debug, format_args!("cycle count"));
                self.cycle_construct = 0;
                (State::CycleCount { collected: 0 }, Event::None)
            }
            0b0000_1000 => {
                sink.report(Verbosity::Debug, format_args!("I-Sync"));
                self.context_construct = 0;
                if !self.rxed_isync {
                    // Changes recorded up to here describe unanchored state
                    sink.report(Verbosity::Debug, format_args!("initial I-Sync"));
                    self.cpu.clear_changes();
                    self.rxed_isync = true;
                }
                (self.isync_entry(), Event::None)
            }
            0b0111_0000 => {
                sink.report(Verbosity::Debug, format_args!("I-Sync with cycle count"));
                self.cycle_construct = 0;
                (State::ISyncCycleCount { collected: 0 }, Event::None)
            }
            0b0000_1100 => {
                sink.report(Verbosity::Debug, format_args!("trigger"));
                self.cpu.raise(Change::Trigger);
                (State::Idle, Event::Message)
            }
            0b0011_1100 => {
                sink.report(Verbosity::Debug, format_args!("VMID"));
                (State::Vmid, Event::None)
            }
            // Ignore packet
            0b0110_0110 => (State::Idle, Event::None),
            0b0110_1110 => {
                sink.report(Verbosity::Debug, format_args!("context ID"));
                self.cpu.context_id = 0;
                self.context_construct = 0;
                if self.params.context_id_size.bytes() == 0 {
                    (State::Idle, Event::Message)
                } else {
                    (State::ContextId { collected: 0 }, Event::None)
                }
            }
            0b0111_0110 => {
                sink.report(Verbosity::Debug, format_args!("exception exit"));
                self.cpu.raise(Change::ExceptionExit);
                (State::Idle, Event::Message)
            }
            // Only emitted by CPUs with data tracing
            0b0111_1110 => {
                sink.report(Verbosity::Debug, format_args!("exception entry"));
                self.cpu.raise(Change::ExceptionEntry);
                (State::Idle, Event::Message)
            }
            _ if c & 0b1111_1011 == 0b0100_0010 => {
                sink.report(Verbosity::Debug, format_args!("timestamp"));
                if c & 0b0000_0100 != 0 {
                    self.cpu.raise(Change::ClockSpeed);
                }
                (State::Timestamp { collected: 0 }, Event::None)
            }
            _ if c & 0b1000_0001 == 0b1000_0000 => self.p_header(c, sink),
            _ => {
                sink.report(
                    Verbosity::Error,
                    format_args!("unexpected byte {c:02x} between packets"),
                );
                (State::Idle, Event::None)
            }
        }
    }

    /// First branch-address byte, straight from [`State::Idle`]
    fn branch_addr_start<S: Sink>(&mut self, c: u8, sink: &mut S) -> (State, Event) {
        // Byte 0 seeds the mode-dependent low window of the address; the
        // balance is inherited from the previous address.
        let low = u32::from(c & 0b0111_1110);
        self.addr_construct = match self.cpu.addr_mode {
            AddressMode::Arm => (self.addr_construct & !0b1111_1100) | (low << 1),
            AddressMode::Thumb => (self.addr_construct & !0b0111_1111) | low,
            AddressMode::Jazelle => (self.addr_construct & !0b0011_1111) | (low >> 1),
        };
        self.cpu.raise(Change::Address);

        let continued = c & 0x80 != 0;
        let next = if self.params.alt_address_encoding {
            State::BranchAddrAlt { collected: 1 }
        } else {
            State::BranchAddrStd { collected: 1 }
        };
        self.finish_addr_byte(c, 1, continued, false, next, sink)
    }

    fn branch_addr_std<S: Sink>(&mut self, c: u8, collected: u8, sink: &mut S) -> (State, Event) {
        let shift = bit_shift(self.cpu.addr_mode, collected);
        self.addr_construct =
            (self.addr_construct & !(0x7F << shift)) | (u32::from(c & 0x7F) << shift);

        let collected = collected + 1;
        let continued = if collected < 5 {
            c & 0x80 != 0
        } else {
            c & 0x40 != 0
        };
        let exception_follows = collected == 5 && continued;
        let next = State::BranchAddrStd { collected };
        self.finish_addr_byte(c, collected, continued, exception_follows, next, sink)
    }

    fn branch_addr_alt<S: Sink>(&mut self, c: u8, collected: u8, sink: &mut S) -> (State, Event) {
        let continued = c & 0x80 != 0;
        // A final byte reserves bit 6 as the exception marker and
        // contributes six address bits only
        let mask = if continued { 0x7F } else { 0x3F };
        let shift = bit_shift(self.cpu.addr_mode, collected);
        self.addr_construct =
            (self.addr_construct & !(mask << shift)) | ((u32::from(c) & mask) << shift);
        let exception_follows = !continued && c & 0x40 != 0;

        let collected = collected + 1;
        let next = State::BranchAddrAlt { collected };
        self.finish_addr_byte(c, collected, continued, exception_follows, next, sink)
    }

    /// Commit a branch address if its final byte just arrived
    fn finish_addr_byte<S: Sink>(
        &mut self,
        c: u8,
        collected: u8,
        continued: bool,
        exception_follows: bool,
        next: State,
        sink: &mut S,
    ) -> (State, Event) {
        if continued && collected < 5 {
            return (next, Event::None);
        }

        self.cpu.addr = self.addr_construct;

        // A continued fifth ARM byte is the legacy form packing exception
        // information into the address packet itself
        if collected == 5 && continued && self.cpu.addr_mode == AddressMode::Arm {
            self.cpu.exception = u16::from((c >> 4) & 0x07);
            self.cpu.raise(Change::Exception);
            if c & 0x40 != 0 {
                self.cpu.raise(Change::Cancelled);
            }
            sink.report(
                Verbosity::Debug,
                format_args!(
                    "branch to {:08x} with exception {}",
                    self.cpu.addr, self.cpu.exception
                ),
            );
            return (State::Idle, Event::Message);
        }

        if !continued && !exception_follows {
            sink.report(
                Verbosity::Debug,
                format_args!("branch to {:08x}", self.cpu.addr),
            );
            return (State::Idle, Event::Message);
        }

        self.cpu.resume = 0;
        self.cpu.raise(Change::ExceptionEntry);
        (State::Exception { late: false }, Event::None)
    }

    fn exception<S: Sink>(&mut self, c: u8, late: bool, sink: &mut S) -> (State, Event) {
        if !late {
            self.cpu.set_non_secure(c & 0x01 != 0);
            self.cpu.exception = u16::from((c >> 1) & 0x0F);
            if c & 0x20 != 0 {
                self.cpu.raise(Change::Cancelled);
            }
            self.cpu.set_alt_isa(c & 0x40 != 0);
            if c & 0x80 != 0 {
                return (State::Exception { late: true }, Event::None);
            }
        } else if c & 0x80 != 0 {
            // Exception byte 1 extends the number and carries the hyp flag
            self.cpu.exception |= u16::from(c & 0x1F) << 4;
            self.cpu.set_hyp(c & 0x20 != 0);
            if c & 0x40 != 0 {
                return (State::Exception { late: true }, Event::None);
            }
        } else {
            // Exception byte 2 is always the last one
            self.cpu.resume = c & 0x0F;
            if self.cpu.resume != 0 {
                self.cpu.raise(Change::Resume);
            }
        }

        sink.report(
            Verbosity::Debug,
            format_args!(
                "exception jump ({}) to {:08x}",
                self.cpu.exception, self.cpu.addr
            ),
        );
        (State::Idle, Event::Message)
    }

    fn vmid<S: Sink>(&mut self, c: u8, sink: &mut S) -> (State, Event) {
        self.cpu.set_vmid(c);
        sink.report(Verbosity::Debug, format_args!("VMID set to {c}"));
        (State::Idle, Event::Message)
    }

    fn timestamp<S: Sink>(&mut self, c: u8, collected: u8, sink: &mut S) -> (State, Event) {
        let shift = u32::from(collected);
        // The accumulator window advances one bit per byte, so bytes past
        // the first mostly overwrite their predecessor's bits
        if collected < 8 {
            self.ts_construct =
                (self.ts_construct & !(0x7Fu64 << shift)) | (u64::from(c & 0x7F) << shift);
        } else {
            self.ts_construct =
                (self.ts_construct & !(0xFFu64 << shift)) | (u64::from(c) << shift);
        }

        let collected = collected + 1;
        if c & 0x80 != 0 && collected < 9 {
            return (State::Timestamp { collected }, Event::None);
        }

        self.cpu.ts = self.ts_construct;
        self.cpu.raise(Change::Timestamp);
        sink.report(Verbosity::Debug, format_args!("timestamp {}", self.cpu.ts));
        (State::Idle, Event::Message)
    }

    /// Fold one cycle-count byte, seven bits per byte, five bytes at most
    ///
    /// Returns whether the count is complete.
    fn fold_cycle_byte(&mut self, c: u8, collected: u8) -> bool {
        let shift = 7 * u32::from(collected);
        self.cycle_construct =
            (self.cycle_construct & !(0x7F << shift)) | (u32::from(c & 0x7F) << shift);
        c & 0x80 == 0 || collected + 1 == 5
    }

    fn cycle_count<S: Sink>(&mut self, c: u8, collected: u8, sink: &mut S) -> (State, Event) {
        if !self.fold_cycle_byte(c, collected) {
            let collected = collected + 1;
            return (State::CycleCount { collected }, Event::None);
        }

        self.cpu.cycle_count = self.cycle_construct;
        self.cpu.raise(Change::CycleCount);
        sink.report(
            Verbosity::Debug,
            format_args!("cycle count {}", self.cpu.cycle_count),
        );
        (State::Idle, Event::Message)
    }

    fn context_id<S: Sink>(&mut self, c: u8, collected: u8, sink: &mut S) -> (State, Event) {
        self.fold_context_byte(c, collected);
        let collected = collected + 1;
        if collected < self.params.context_id_size.bytes() {
            return (State::ContextId { collected }, Event::None);
        }

        self.cpu.set_context_id(self.context_construct);
        sink.report(
            Verbosity::Debug,
            format_args!("context ID {:08x}", self.cpu.context_id),
        );
        (State::Idle, Event::Message)
    }

    fn fold_context_byte(&mut self, c: u8, collected: u8) {
        self.context_construct = self
            .context_construct
            .wrapping_add(u32::from(c) << (8 * u32::from(collected)));
    }

    fn wait_isync(&mut self, c: u8) -> (State, Event) {
        if c != 0b0000_1000 {
            return (State::WaitISync, Event::None);
        }

        let event = if self.rxed_isync {
            Event::None
        } else {
            Event::Synced
        };
        self.rxed_isync = true;
        self.context_construct = 0;
        (self.isync_entry(), event)
    }

    /// First collection state of an I-Sync body
    fn isync_entry(&self) -> State {
        if self.params.context_id_size.bytes() > 0 {
            State::ISyncContext { collected: 0 }
        } else {
            State::ISyncInfo
        }
    }

    fn isync_context(&mut self, c: u8, collected: u8) -> (State, Event) {
        self.fold_context_byte(c, collected);
        let collected = collected + 1;
        if collected < self.params.context_id_size.bytes() {
            return (State::ISyncContext { collected }, Event::None);
        }

        self.cpu.set_context_id(self.context_construct);
        (State::ISyncInfo, Event::None)
    }

    fn isync_info<S: Sink>(&mut self, c: u8, sink: &mut S) -> (State, Event) {
        self.cpu.set_lsip(c & 0x80 != 0);
        self.cpu.set_reason((c & 0x60) >> 5);
        self.cpu.set_jazelle(c & 0x10 != 0);
        self.cpu.set_non_secure(c & 0x08 != 0);
        self.cpu.set_alt_isa(c & 0x04 != 0);
        self.cpu.set_hyp(c & 0x02 != 0);

        if self.params.data_only {
            sink.report(Verbosity::Error, format_args!("I-Sync in data-only mode"));
            return (State::Idle, Event::Message);
        }
        (State::ISyncAddr { collected: 0 }, Event::None)
    }

    fn isync_addr<S: Sink>(&mut self, c: u8, collected: u8, sink: &mut S) -> (State, Event) {
        let shift = 8 * u32::from(collected);
        self.addr_construct = (self.addr_construct & !(0xFF << shift)) | (u32::from(c) << shift);
        let collected = collected + 1;
        if collected < 4 {
            return (State::ISyncAddr { collected }, Event::None);
        }

        self.cpu.raise(Change::Address);
        if self.cpu.jazelle {
            // Bit 0 is address bit 0 in Jazelle state
            self.cpu.addr_mode = AddressMode::Jazelle;
            self.cpu.addr = self.addr_construct;
        } else {
            let thumb = self.addr_construct & 1 != 0;
            self.cpu.set_thumb(thumb);
            if thumb {
                self.addr_construct &= !1;
                self.cpu.addr_mode = AddressMode::Thumb;
                self.cpu.addr = self.addr_construct;
            } else {
                self.cpu.addr_mode = AddressMode::Arm;
                self.cpu.addr = self.addr_construct & 0xFFFF_FFFC;
            }
        }

        if self.cpu.is_lsip {
            // The load/store instruction address follows as branch-address
            // bytes folded into the window above the restated address
            let next = if self.params.alt_address_encoding {
                State::BranchAddrAlt { collected: 4 }
            } else {
                State::BranchAddrStd { collected: 4 }
            };
            return (next, Event::None);
        }

        sink.report(
            Verbosity::Debug,
            format_args!("I-Sync with address {:08x}", self.cpu.addr),
        );
        (State::Idle, Event::Message)
    }

    fn isync_cycle_count(&mut self, c: u8, collected: u8) -> (State, Event) {
        if !self.fold_cycle_byte(c, collected) {
            let collected = collected + 1;
            return (State::ISyncCycleCount { collected }, Event::None);
        }

        self.cpu.cycle_count = self.cycle_construct;
        self.cpu.raise(Change::CycleCount);
        self.context_construct = 0;
        (self.isync_entry(), Event::None)
    }

    fn p_header<S: Sink>(&mut self, c: u8, sink: &mut S) -> (State, Event) {
        if self.params.cycle_accurate {
            self.p_header_cycle_accurate(c, sink)
        } else {
            self.p_header_plain(c, sink)
        }
    }

    fn p_header_plain<S: Sink>(&mut self, c: u8, sink: &mut S) -> (State, Event) {
        let cpu = &mut self.cpu;
        if c & 0b1000_0011 == 0b1000_0000 {
            // Format 1: up to fifteen E atoms plus an optional N atom
            cpu.eatoms = (c & 0x3C) >> 2;
            cpu.natoms = (c >> 6) & 1;
            cpu.inst_count += u64::from(cpu.eatoms + cpu.natoms);
            cpu.disposition = (1u32 << cpu.eatoms) - 1;
            cpu.raise(Change::EnAtoms);
            sink.report(
                Verbosity::Debug,
                format_args!("P-header format 1 ({c:02x} E={}, N={})", cpu.eatoms, cpu.natoms),
            );
            return (State::Idle, Event::Message);
        }

        if c & 0b1111_0011 == 0b1000_0010 {
            // Format 2: exactly two atoms, set bits mark the failed ones
            cpu.eatoms = u8::from(c & 0x04 == 0) + u8::from(c & 0x08 == 0);
            cpu.natoms = 2 - cpu.eatoms;
            cpu.disposition = u32::from(c & 0x08 == 0) | (u32::from(c & 0x04 == 0) << 1);
            cpu.inst_count += 2;
            cpu.raise(Change::EnAtoms);
            sink.report(
                Verbosity::Debug,
                format_args!("P-header format 2 (E={}, N={})", cpu.eatoms, cpu.natoms),
            );
            return (State::Idle, Event::Message);
        }

        sink.report(
            Verbosity::Error,
            format_args!("unprocessed P-header ({c:02X})"),
        );
        (State::Idle, Event::None)
    }

    fn p_header_cycle_accurate<S: Sink>(&mut self, c: u8, sink: &mut S) -> (State, Event) {
        let cpu = &mut self.cpu;
        if c == 0b1000_0000 {
            // Format 0: a single wait
            cpu.eatoms = 0;
            cpu.natoms = 0;
            cpu.watoms = 1;
            cpu.inst_count += 1;
        } else if c & 0b1010_0011 == 0b1000_0000 {
            // Format 1: counted E atoms plus an optional N atom, one wait
            // each
            cpu.eatoms = (c & 0x1C) >> 2;
            cpu.natoms = u8::from(c & 0x40 != 0);
            cpu.watoms = cpu.eatoms + cpu.natoms;
            cpu.inst_count += u64::from(cpu.watoms);
            cpu.disposition = (1u32 << cpu.eatoms) - 1;
        } else if c & 0b1111_0011 == 0b1000_0010 {
            // Format 2: two atoms behind a single wait
            cpu.eatoms = u8::from(c & 0x04 != 0) + u8::from(c & 0x08 != 0);
            cpu.natoms = 2 - cpu.eatoms;
            cpu.watoms = 1;
            cpu.inst_count += 1;
            cpu.disposition = u32::from(c & 0x08 != 0) | u32::from(c & 0x04 != 0);
        } else if c & 0b1010_0000 == 0b1010_0000 {
            // Format 3: counted waits, at most one trailing E atom
            cpu.eatoms = u8::from(c & 0x40 != 0);
            cpu.natoms = 0;
            cpu.watoms = (c & 0x1C) >> 2;
            cpu.inst_count += u64::from(cpu.watoms);
            cpu.disposition = u32::from(cpu.eatoms);
        } else if c & 0b1111_1011 == 0b1001_0010 {
            // Format 4: one atom, no wait
            cpu.eatoms = u8::from(c & 0x04 != 0);
            cpu.natoms = u8::from(c & 0x04 == 0);
            cpu.watoms = 0;
            cpu.disposition = u32::from(cpu.eatoms);
        } else {
            sink.report(
                Verbosity::Error,
                format_args!("unprocessed cycle-accurate P-header ({c:02X})"),
            );
            return (State::Idle, Event::None);
        }

        cpu.raise(Change::EnAtoms);
        cpu.raise(Change::WaitAtoms);
        sink.report(
            Verbosity::Debug,
            format_args!(
                "cycle-accurate P-header (E={}, N={}, W={})",
                cpu.eatoms, cpu.natoms, cpu.watoms
            ),
        );
        (State::Idle, Event::Message)
    }
}
