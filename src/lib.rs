// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! # Decoder for ARM instruction trace streams
//!
//! This library provides a packet-level [decoder] for the instruction
//! tracing emitted by ARM cores: the ETMv3.5 byte stream defined in
//! Appendix D4 of the ARMv7-M Architecture Reference Manual, and the Micro
//! Trace Buffer word pairs of Cortex-M0+ parts. Given raw trace data
//! previously retrieved from the target, it reconstructs the stream of
//! trace messages and maintains a view of the traced processor.
//!
//! # Decoding flow
//!
//! A [`Decoder`][decoder::Decoder] is constructed via a
//! [`decoder::Builder`] configured with the [`config::Parameters`] the
//! trace unit was set up with. Raw data is pushed in via
//! [`pump`][decoder::Decoder::pump] together with a [`Sink`][sink::Sink]
//! implementation; the sink is notified synchronously for every completed
//! message and may inspect the [`CpuState`][cpu::CpuState] and drain its
//! change record.
//!
//! An ETM decoder synchronises on an A-Sync sequence in the stream, or is
//! forced into sync via [`force_sync`][decoder::Decoder::force_sync] when
//! the transport guarantees alignment. Messages are withheld until the
//! first I-Sync packet has restated the full processor state.
//!
//! Instruction-level reconstruction is out of scope: correlating the
//! decoded branches and execution atoms with program images is left to
//! downstream consumers.
//!
//! # Crate features
//!
//! * `serde`: enables (de)serialization of [`config`] types via [`serde`]
//!
//! # no_std
//!
//! This crate does not depend on `std`, performs no allocation and is thus
//! suitable for `no_std` environments.
//!
//! # Example
//!
//! The following example forces a decoder into sync, restates the
//! processor state with an I-Sync packet and decodes a P-header reporting
//! four traced instructions.
//!
//! ```
//! use arm_itrace::cpu::{Change, CpuState};
//! use arm_itrace::decoder;
//! use arm_itrace::sink::Sink;
//!
//! #[derive(Default)]
//! struct Counter {
//!     messages: u32,
//!     last_addr: u32,
//! }
//!
//! impl Sink for Counter {
//!     fn message(&mut self, cpu: &mut CpuState) {
//!         self.messages += 1;
//!         self.last_addr = cpu.addr;
//!     }
//! }
//!
//! let mut decoder = decoder::builder().build();
//! let mut sink = Counter::default();
//!
//! // Align on an A-Sync, then anchor on an I-Sync at 0x2000_0000
//! decoder.pump(&[0x00, 0x00, 0x00, 0x00, 0x00, 0x80], &mut sink);
//! decoder.pump(&[0x08, 0x00, 0x00, 0x00, 0x00, 0x20], &mut sink);
//! // Four instructions pass, three of them executing
//! decoder.pump(&[0xCC], &mut sink);
//!
//! assert_eq!(sink.messages, 2);
//! assert_eq!(sink.last_addr, 0x2000_0000);
//! assert!(decoder.state_changed(Change::EnAtoms));
//! assert_eq!(decoder.cpu().inst_count, 4);
//! ```
#![no_std]

pub mod config;
pub mod cpu;
pub mod decoder;
pub mod sink;
pub mod types;
