// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Decoder scenario tests

extern crate std;

use std::string::String;
use std::vec::Vec;

use core::fmt;

use crate::config::{ContextIdSize, Protocol};
use crate::cpu::{Change, CpuState};
use crate::sink::{Sink, Verbosity};
use crate::types::AddressMode;

use super::{builder, Decoder};

/// An I-Sync packet restating an ARM-state processor at 0x2000_0000
const ISYNC_ARM: [u8; 6] = [0x08, 0x00, 0x00, 0x00, 0x00, 0x20];

/// Sink recording a state snapshot per message and all error reports
#[derive(Default, Debug, PartialEq)]
struct Recorder {
    messages: Vec<CpuState>,
    errors: Vec<String>,
}

impl Sink for Recorder {
    fn message(&mut self, cpu: &mut CpuState) {
        self.messages.push(cpu.clone());
    }

    fn report(&mut self, verbosity: Verbosity, message: fmt::Arguments) {
        if verbosity == Verbosity::Error {
            self.errors.push(std::fmt::format(message));
        }
    }
}

/// A forced-synced decoder anchored by an initial I-Sync, changes drained
fn anchored() -> Decoder {
    let mut decoder = builder().build();
    decoder.force_sync(true);
    decoder.pump(&ISYNC_ARM, &mut Recorder::default());
    decoder.cpu_mut().clear_changes();
    decoder
}

macro_rules! isync_test {
    ($n:ident, $bytes:expr, mode: $m:ident, addr: $a:literal $(, $ch:ident)*) => {
        #[test]
        fn $n() {
            let mut decoder = builder().build();
            decoder.force_sync(true);
            let mut sink = Recorder::default();

            decoder.pump(&$bytes, &mut sink);
            assert_eq!(sink.messages.len(), 1);
            let cpu = &sink.messages[0];
            assert_eq!(cpu.addr_mode, AddressMode::$m);
            assert_eq!(cpu.addr, $a);
            assert!(cpu.is_changed(Change::Address));
            $(assert!(cpu.is_changed(Change::$ch));)*
        }
    };
}

macro_rules! branch_test {
    ($n:ident, $isync:expr, $bytes:expr, addr: $a:literal) => {
        #[test]
        fn $n() {
            let mut decoder = builder().build();
            decoder.force_sync(true);
            decoder.pump(&$isync, &mut Recorder::default());
            decoder.cpu_mut().clear_changes();

            let mut sink = Recorder::default();
            decoder.pump(&$bytes, &mut sink);
            assert_eq!(sink.messages.len(), 1);
            let cpu = &sink.messages[0];
            assert_eq!(cpu.addr, $a);
            assert!(cpu.is_changed(Change::Address));
        }
    };
}

macro_rules! p_header_test {
    ($n:ident, $b:literal, cycle_accurate: $ca:literal, unprocessed) => {
        #[test]
        fn $n() {
            let mut decoder = builder().with_cycle_accurate($ca).build();
            decoder.force_sync(true);
            decoder.pump(&ISYNC_ARM, &mut Recorder::default());

            let mut sink = Recorder::default();
            decoder.pump(&[$b], &mut sink);
            assert!(sink.messages.is_empty());
            assert_eq!(sink.errors.len(), 1);
            assert!(decoder.is_synced());
        }
    };
    ($n:ident, $b:literal, cycle_accurate: $ca:literal,
     E: $e:literal, N: $na:literal, W: $w:literal,
     disposition: $d:literal, inst: $i:literal) => {
        #[test]
        fn $n() {
            let mut decoder = builder().with_cycle_accurate($ca).build();
            decoder.force_sync(true);
            decoder.pump(&ISYNC_ARM, &mut Recorder::default());
            decoder.cpu_mut().clear_changes();

            let mut sink = Recorder::default();
            decoder.pump(&[$b], &mut sink);
            assert_eq!(sink.messages.len(), 1);
            let cpu = decoder.cpu();
            assert_eq!(cpu.eatoms, $e);
            assert_eq!(cpu.natoms, $na);
            assert_eq!(cpu.watoms, $w);
            assert_eq!(cpu.disposition, $d);
            assert_eq!(cpu.inst_count, $i);
            assert!(decoder.state_changed(Change::EnAtoms));
            assert_eq!(decoder.state_changed(Change::WaitAtoms), $ca);
        }
    };
}

isync_test!(isync_restates_arm_address, ISYNC_ARM, mode: Arm, addr: 0x2000_0000);
isync_test!(
    isync_selects_thumb,
    [0x08, 0x00, 0x01, 0x00, 0x00, 0x00],
    mode: Thumb,
    addr: 0,
    Thumb
);
isync_test!(
    isync_selects_jazelle,
    [0x08, 0x10, 0x05, 0x00, 0x00, 0x00],
    mode: Jazelle,
    addr: 5,
    Jazelle
);

branch_test!(
    arm_branch_address,
    ISYNC_ARM,
    [0x81, 0x02, 0x00],
    addr: 0x2000_0200
);
branch_test!(
    thumb_branch_address,
    [0x08, 0x00, 0x01, 0x00, 0x00, 0x00],
    [0x81, 0x02, 0x00],
    addr: 0x100
);
branch_test!(
    jazelle_branch_address,
    [0x08, 0x10, 0x05, 0x00, 0x00, 0x00],
    [0x7F],
    addr: 0x3F
);

p_header_test!(p_header_format_1, 0xCC, cycle_accurate: false,
    E: 3, N: 1, W: 0, disposition: 0b111, inst: 4);
p_header_test!(p_header_format_2, 0x8A, cycle_accurate: false,
    E: 1, N: 1, W: 0, disposition: 0b10, inst: 2);
p_header_test!(p_header_unprocessed, 0x92, cycle_accurate: false, unprocessed);
p_header_test!(ca_p_header_format_0, 0x80, cycle_accurate: true,
    E: 0, N: 0, W: 1, disposition: 0, inst: 1);
p_header_test!(ca_p_header_format_1, 0xC8, cycle_accurate: true,
    E: 2, N: 1, W: 3, disposition: 0b11, inst: 3);
p_header_test!(ca_p_header_format_2, 0x8E, cycle_accurate: true,
    E: 2, N: 0, W: 1, disposition: 1, inst: 1);
p_header_test!(ca_p_header_format_3, 0xA4, cycle_accurate: true,
    E: 0, N: 0, W: 1, disposition: 0, inst: 1);
p_header_test!(ca_p_header_format_4, 0x96, cycle_accurate: true,
    E: 1, N: 0, W: 0, disposition: 1, inst: 0);
p_header_test!(ca_p_header_unprocessed, 0x9A, cycle_accurate: true, unprocessed);

#[test]
fn async_sequence_synchronises() {
    let mut decoder = builder().build();
    let mut sink = Recorder::default();

    decoder.pump(&[0x00; 5], &mut sink);
    assert!(!decoder.is_synced());

    decoder.pump(&[0x80], &mut sink);
    assert!(decoder.is_synced());
    assert!(sink.messages.is_empty());
}

#[test]
fn async_needs_five_zero_bytes() {
    let mut decoder = builder().build();
    decoder.pump(&[0x00, 0x00, 0x00, 0x00, 0x80], &mut Recorder::default());
    assert!(!decoder.is_synced());
}

#[test]
fn async_hijacks_partial_packet() {
    let mut decoder = builder()
        .with_context_id_size(ContextIdSize::Four)
        .build();
    decoder.force_sync(true);
    let mut sink = Recorder::default();

    // Four zero context bytes and a zero info byte accumulate enough
    // filler for the 0x80 to complete an A-Sync instead of an address byte
    decoder.pump(&[0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80], &mut sink);
    assert!(decoder.is_synced());
    assert!(sink.messages.is_empty());

    decoder.pump(&[0x0C], &mut sink);
    assert_eq!(sink.messages.len(), 1);
}

#[test]
fn no_messages_before_first_isync() {
    let mut decoder = builder().build();
    decoder.force_sync(true);
    let mut sink = Recorder::default();

    decoder.pump(&[0x0C, 0xCC], &mut sink);
    assert!(sink.messages.is_empty());

    // The initial I-Sync discards changes accumulated while unanchored
    decoder.pump(&ISYNC_ARM, &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert!(decoder.state_changed(Change::Address));
    assert!(!decoder.state_changed(Change::Trigger));

    decoder.pump(&[0x0C], &mut sink);
    assert_eq!(sink.messages.len(), 2);
}

#[test]
fn trigger_packet_raises_trigger() {
    let mut decoder = anchored();
    let mut sink = Recorder::default();

    decoder.pump(&[0x0C], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert!(sink.messages[0].is_changed(Change::Trigger));

    assert!(decoder.state_changed(Change::Trigger));
    assert!(!decoder.state_changed(Change::Trigger));
}

#[test]
fn timestamp_windows_overlap() {
    let mut decoder = anchored();
    let mut sink = Recorder::default();

    decoder.pump(&[0x42, 0x85, 0x03], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert_eq!(decoder.cpu().ts, 7);
    assert!(decoder.state_changed(Change::Timestamp));
    assert!(!decoder.state_changed(Change::ClockSpeed));

    decoder.pump(&[0x46, 0x00], &mut sink);
    assert_eq!(decoder.cpu().ts, 0);
    assert!(decoder.state_changed(Change::ClockSpeed));
}

#[test]
fn timestamp_max_length() {
    let mut decoder = anchored();
    let mut sink = Recorder::default();

    decoder.pump(&[0x42], &mut sink);
    decoder.pump(&[0xFF; 9], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert_eq!(decoder.cpu().ts, 0xFFFF);
    assert!(decoder.is_synced());
}

#[test]
fn cycle_count_packet() {
    let mut decoder = anchored();
    let mut sink = Recorder::default();

    decoder.pump(&[0x04, 0x85, 0x01], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert_eq!(decoder.cpu().cycle_count, 133);
    assert!(decoder.state_changed(Change::CycleCount));
}

#[test]
fn isync_with_cycle_count() {
    let mut decoder = anchored();
    let mut sink = Recorder::default();

    decoder.pump(&[0x70, 0x0A, 0x00, 0x00, 0x01, 0x00, 0x00], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert_eq!(decoder.cpu().cycle_count, 10);
    assert_eq!(decoder.cpu().addr, 0x100);
    assert!(decoder.state_changed(Change::CycleCount));
    assert!(decoder.state_changed(Change::Address));
}

#[test]
fn isync_with_lsip_address() {
    let mut decoder = anchored();
    let mut sink = Recorder::default();

    // LSiP: the load/store address follows the restated address, so the
    // whole sequence completes as a single message
    decoder.pump(&[0x08, 0x80, 0x00, 0x00, 0x00, 0x20, 0x08], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert!(decoder.cpu().is_lsip);
    assert!(decoder.state_changed(Change::IsLsip));
}

#[test]
fn data_only_isync_carries_no_address() {
    let mut decoder = builder().with_data_only(true).build();
    decoder.force_sync(true);
    let mut sink = Recorder::default();

    decoder.pump(&[0x08, 0x06], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert!(decoder.cpu().alt_isa);
    assert!(decoder.cpu().hyp);
    assert_eq!(sink.errors.len(), 1);
}

#[test]
fn context_id_collection() {
    let mut decoder = builder()
        .with_context_id_size(ContextIdSize::Two)
        .build();
    decoder.force_sync(true);
    let mut sink = Recorder::default();

    // I-Sync carries the context bytes ahead of the info byte
    decoder.pump(&[0x08, 0x34, 0x12, 0x00, 0x00, 0x00, 0x00, 0x20], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert_eq!(decoder.cpu().context_id, 0x1234);
    assert!(decoder.state_changed(Change::ContextId));

    decoder.pump(&[0x6E, 0x78, 0x56], &mut sink);
    assert_eq!(sink.messages.len(), 2);
    assert_eq!(decoder.cpu().context_id, 0x5678);
    assert!(decoder.state_changed(Change::ContextId));
}

#[test]
fn vmid_packet() {
    let mut decoder = anchored();
    let mut sink = Recorder::default();

    decoder.pump(&[0x3C, 0x2A], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert_eq!(decoder.cpu().vmid, 42);
    assert!(decoder.state_changed(Change::Vmid));
}

#[test]
fn legacy_arm_exception_branch() {
    let mut decoder = anchored();
    let mut sink = Recorder::default();

    // Five address bytes with the final continuation marker carry the
    // exception number in the last byte itself
    decoder.pump(&[0x81, 0x80, 0x80, 0x80, 0x40], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    assert_eq!(decoder.cpu().exception, 4);
    assert!(decoder.state_changed(Change::Exception));
    assert!(decoder.state_changed(Change::Cancelled));
}

#[test]
fn branch_exception_bytes() {
    let mut decoder = builder().with_alt_address_encoding(true).build();
    decoder.force_sync(true);
    decoder.pump(&ISYNC_ARM, &mut Recorder::default());

    // Final address byte flags exception information; a single exception
    // byte follows
    let mut sink = Recorder::default();
    decoder.pump(&[0x81, 0x40, 0x11], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    let cpu = &sink.messages[0];
    assert_eq!(cpu.exception, 8);
    assert!(cpu.non_secure);
    assert!(cpu.is_changed(Change::ExceptionEntry));
    assert!(cpu.is_changed(Change::Secure));

    // Three-byte form ending in a resume code
    decoder.pump(&[0x81, 0x40, 0x91, 0xC0, 0x05], &mut sink);
    assert_eq!(sink.messages.len(), 2);
    let cpu = &sink.messages[1];
    assert_eq!(cpu.resume, 5);
    assert!(cpu.is_changed(Change::Resume));
}

#[test]
fn mtb_pairs() {
    let mut decoder = builder().with_protocol(Protocol::Mtb).build();
    let mut sink = Recorder::default();

    // First pair only seeds the predicted address; destination bit 0
    // marks the start of the trace run
    decoder.pump(&[0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x08], &mut sink);
    assert!(decoder.is_synced());
    assert!(sink.messages.is_empty());
    assert_eq!(decoder.cpu().next_addr, 0x0800_0101);
    assert!(decoder.cpu().is_changed(Change::TraceStart));

    decoder.pump(&[0x00, 0x02, 0x00, 0x08, 0x00, 0x03, 0x00, 0x08], &mut sink);
    assert_eq!(sink.messages.len(), 1);
    let cpu = &sink.messages[0];
    assert_eq!(cpu.addr, 0x0800_0100);
    assert_eq!(cpu.to_addr, 0x0800_0200);
    assert_eq!(cpu.next_addr, 0x0800_0300);
    assert!(cpu.is_changed(Change::ExceptionEntry));
    assert!(cpu.is_changed(Change::Linear));
    assert!(cpu.is_changed(Change::Address));

    // A trailing partial pair is left to the transport
    decoder.pump(&[0xFF; 7], &mut sink);
    assert_eq!(sink.messages.len(), 1);
}

#[test]
fn force_sync_controls_state() {
    let mut decoder = anchored();
    assert!(decoder.is_synced());
    assert_eq!(decoder.stats().sync_count, 1);

    decoder.force_sync(false);
    assert!(!decoder.is_synced());
    assert_eq!(decoder.stats().lost_sync_count, 1);

    // Messages stay suppressed after re-sync until the next I-Sync
    let mut sink = Recorder::default();
    decoder.pump(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80], &mut sink);
    assert!(decoder.is_synced());
    decoder.pump(&[0x0C], &mut sink);
    assert!(sink.messages.is_empty());

    decoder.zero_stats();
    assert_eq!(decoder.stats(), Default::default());
}

#[test]
fn wait_for_isync_discards_until_next_isync() {
    let mut decoder = anchored();
    decoder.wait_for_isync();
    let mut sink = Recorder::default();

    // A trigger and a P-header, all discarded while waiting
    decoder.pump(&[0x0C, 0xCC], &mut sink);
    assert!(sink.messages.is_empty());
    assert_eq!(decoder.cpu().inst_count, 0);

    decoder.pump(&ISYNC_ARM, &mut sink);
    assert_eq!(sink.messages.len(), 1);
}

#[test]
fn wait_for_isync_is_etm_only() {
    let mut decoder = builder().with_protocol(Protocol::Mtb).build();
    let mut sink = Recorder::default();

    decoder.pump(&[0x01, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x08], &mut sink);
    assert!(decoder.is_synced());

    // MTB has no I-Sync packets to wait for; pumping must keep working
    decoder.wait_for_isync();
    decoder.pump(&[0x00, 0x02, 0x00, 0x08, 0x00, 0x03, 0x00, 0x08], &mut sink);
    assert_eq!(sink.messages.len(), 1);
}

#[test]
fn runtime_reconfiguration() {
    let mut decoder = builder().build();
    decoder.set_protocol(Protocol::Mtb);
    decoder.pump(
        &[0x00, 0x02, 0x00, 0x08, 0x00, 0x03, 0x00, 0x08],
        &mut Recorder::default(),
    );
    assert!(decoder.is_synced());
}

#[test]
fn identical_streams_decode_identically() {
    let stream = [
        0x08, 0x00, 0x00, 0x00, 0x00, 0x20, // I-Sync at 0x2000_0000
        0xCC, // P-header, E=3 N=1
        0x42, 0x85, 0x03, // timestamp
        0x0C, // trigger
        0x81, 0x02, 0x00, // branch
    ];
    let run = |stream: &[u8]| {
        let mut decoder = builder().build();
        decoder.force_sync(true);
        let mut sink = Recorder::default();
        decoder.pump(stream, &mut sink);
        sink.messages
    };

    let first = run(&stream);
    assert!(!first.is_empty());
    assert_eq!(first, run(&stream));
}
