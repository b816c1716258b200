// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Abuse simulation harness for the gateway's admission and validation
//! layers.

pub mod attacks;
pub mod generators;
pub mod metrics;
