// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! MTB pair decoder
//!
//! The Micro Trace Buffer stores one (source, destination) word pair per
//! branch. Bit 0 of the destination marks the start of a tracing run; bit 0
//! of the source marks an exception entry and is carried over to the next
//! pair via the predicted address.

use crate::cpu::Change;
use crate::sink::{Sink, Verbosity};

use super::etm::State;
use super::Decoder;

impl Decoder {
    /// Pump one (source, destination) pair through the MTB decoder
    pub(super) fn pump_mtb_pair<S: Sink>(&mut self, source: u32, dest: u32, sink: &mut S) {
        sink.report(
            Verbosity::Debug,
            format_args!("from {source:08x} to {dest:08x}"),
        );

        match self.state {
            State::Unsynced => {
                // The first pair only tells us where execution continues;
                // fold the exception marker into the predicted address so
                // the next pair knows how we arrived there
                self.cpu.next_addr = (dest & !1) | (source & 1);
                if dest & 1 != 0 {
                    self.cpu.raise(Change::TraceStart);
                }
                self.state = State::Idle;
            }
            State::Idle => {
                if self.cpu.next_addr & 1 != 0 {
                    self.cpu.raise(Change::ExceptionEntry);
                }
                if dest & 1 != 0 {
                    self.cpu.raise(Change::TraceStart);
                }

                self.cpu.addr = self.cpu.next_addr & !1;
                self.cpu.next_addr = (dest & !1) | (source & 1);
                self.cpu.to_addr = source & !1;
                // The M0+ does not report the exception cause
                self.cpu.exception = 0;
                self.cpu.raise(Change::Address);
                self.cpu.raise(Change::Linear);
                sink.message(&mut self.cpu);
            }
            _ => unreachable!("MTB decoder left in a packet-collection state"),
        }
    }
}
