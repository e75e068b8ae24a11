// Copyright (C) 2025 FZI Forschungszentrum Informatik
// SPDX-License-Identifier: Apache-2.0
//! Types not specific to a single trace protocol

use core::fmt;

/// Instruction-set state of the traced processor
///
/// The address mode decides how branch-address bytes are folded into the
/// program address: ARM instructions are word aligned, Thumb instructions
/// halfword aligned and Jazelle bytecodes byte aligned.
#[derive(Copy, Clone, Default, Debug, Eq, PartialEq, Hash)]
pub enum AddressMode {
    #[default]
    Arm,
    Thumb,
    Jazelle,
}

impl fmt::Display for AddressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddressMode::Arm => write!(f, "ARM"),
            AddressMode::Thumb => write!(f, "Thumb"),
            AddressMode::Jazelle => write!(f, "Jazelle"),
        }
    }
}
