// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Abuse patterns for security testing.

/// Which kind of target each simulated request carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetMix {
    /// Only measurable public hostnames
    Valid,
    /// Only names and literals that must be refused
    Hostile,
}

/// Attack pattern configuration.
#[derive(Debug, Clone)]
pub struct AttackConfig {
    /// Total number of requests to send
    pub total_requests: usize,
    /// Requests per second rate (simulated clock)
    pub requests_per_second: f64,
    /// Number of unique caller addresses
    pub unique_callers: usize,
    /// Admissions per caller per window
    pub limit: u32,
    /// Window length in seconds
    pub window_secs: u64,
    pub targets: TargetMix,
}

impl Default for AttackConfig {
    fn default() -> Self {
        Self {
            total_requests: 100,
            requests_per_second: 10.0,
            unique_callers: 1,
            limit: 10,
            window_secs: 60,
            targets: TargetMix::Valid,
        }
    }
}

/// Predefined attack patterns.
impl AttackConfig {
    /// One caller creating pairs as fast as it can.
    pub fn single_caller_flood() -> Self {
        Self {
            total_requests: 200,
            requests_per_second: 100.0,
            ..Default::default()
        }
    }

    /// Many callers, each under its own limit.
    pub fn distributed_flood() -> Self {
        Self {
            total_requests: 500,
            requests_per_second: 50.0,
            unique_callers: 100,
            ..Default::default()
        }
    }

    /// Callers probing the validator with internal targets.
    pub fn hostile_targets() -> Self {
        Self {
            total_requests: 300,
            requests_per_second: 20.0,
            unique_callers: 50,
            limit: 1000,
            targets: TargetMix::Hostile,
            ..Default::default()
        }
    }

    /// Stay just under the window limit.
    pub fn slow_drip() -> Self {
        Self {
            total_requests: 60,
            requests_per_second: 0.15, // 9 per minute against a limit of 10
            ..Default::default()
        }
    }

    /// Simulated span of the attack in seconds.
    pub fn simulated_secs(&self) -> f64 {
        self.total_requests as f64 / self.requests_per_second
    }

    /// Most admissions one caller can get over the simulated span.
    pub fn max_admitted_per_caller(&self) -> usize {
        let windows = (self.simulated_secs() / self.window_secs as f64).floor() as usize + 1;
        windows * self.limit as usize
    }
}
