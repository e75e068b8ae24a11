// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Consumer contract
//!
//! A [`Sink`] receives the decoder's output: a notification per completed
//! message and, optionally, diagnostic reports. Both arrive synchronously
//! from within [`pump`][crate::decoder::Decoder::pump], on the pumping
//! thread, before `pump` returns.

use core::fmt;

use crate::cpu::CpuState;

/// Severity of a diagnostic report
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Verbosity {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for Verbosity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verbosity::Debug => write!(f, "debug"),
            Verbosity::Info => write!(f, "info"),
            Verbosity::Warn => write!(f, "warn"),
            Verbosity::Error => write!(f, "error"),
        }
    }
}

/// Consumer of decoded trace messages
///
/// The decoder invokes [`message`][Self::message] once per completed packet.
/// The supplied [`CpuState`] is the decoder's own record; consumers will
/// usually inspect the fields relevant to them and drain the change record
/// via [`CpuState::take_change`].
///
/// A sink must not pump the decoder it is attached to from within a
/// callback.
pub trait Sink {
    /// Receive a completed trace message
    fn message(&mut self, cpu: &mut CpuState);

    /// Receive a diagnostic report
    ///
    /// Protocol violations are reported with [`Verbosity::Error`], packet
    /// narration with [`Verbosity::Debug`]. The default implementation
    /// discards all reports.
    fn report(&mut self, verbosity: Verbosity, message: fmt::Arguments) {
        let _ = (verbosity, message);
    }
}
