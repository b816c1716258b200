// SPDX-FileCopyrightText: 2026 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Test data generators for abuse simulation.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Generate a pool of caller addresses, alternating families.
pub fn generate_callers(count: usize) -> Vec<IpAddr> {
    (0..count)
        .map(|i| {
            let a = ((i >> 8) & 0xFF) as u8;
            let b = (i & 0xFF) as u8;
            if i % 2 == 0 {
                IpAddr::V4(Ipv4Addr::new(203, 0, a, b))
            } else {
                IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, a as u16, b as u16))
            }
        })
        .collect()
}

/// Generate measurable public hostnames.
pub fn generate_targets(count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("host-{}.site-{}.example.com", i % 7, i))
        .collect()
}

/// Targets that must never reach a provider.
pub fn generate_hostile_targets() -> Vec<&'static str> {
    vec![
        // Empty / whitespace
        "",
        "   ",
        // URLs and paths instead of hosts
        "https://example.com/",
        "example.com/path",
        "user@example.com",
        "example.com?q=1",
        "example.com#frag",
        "\\\\share\\example",
        // Header and command injection
        "example.com\r\nX-Injected: 1",
        "example.com\tfoo",
        "example.com;rm -rf /",
        // Local and internal names
        "localhost",
        "LOCALHOST.",
        "printer.local",
        "db.internal",
        "router.lan",
        "nas.home",
        "app.localhost",
        // Not fully qualified / malformed labels
        "intranet",
        "-bad.example.com",
        "bad-.example.com",
        "a..example.com",
        "exämple.com",
        // Numeric shorthand that resolves as an address
        "127.1",
        "10.1",
        // Ports
        "example.com:8080",
    ]
}

/// Address literals that are restricted regardless of type.
pub fn generate_restricted_literals() -> Vec<&'static str> {
    vec![
        "0.0.0.0",
        "10.0.0.1",
        "100.64.1.1",
        "127.0.0.1",
        "169.254.169.254",
        "172.16.0.1",
        "192.168.1.1",
        "192.0.2.10",
        "198.18.0.1",
        "224.0.0.1",
        "255.255.255.255",
        "::1",
        "::",
        "fe80::1",
        "fc00::1",
        "fd12:3456::1",
        "2001:db8::1",
        "ff02::1",
        "::ffff:10.0.0.1",
        "[::ffff:127.0.0.1]",
    ]
}

/// Resolver values that must be refused.
pub fn generate_hostile_resolvers() -> Vec<&'static str> {
    vec![
        "127.0.0.53",
        "10.0.0.2",
        "::1",
        "resolver.local",
        "localhost",
        "https://dns.example/dns-query",
        "1.1.1.1:53",
        "dns.example.com\r\nevil",
    ]
}

/// Handles a caller might try to smuggle into a provider URL path.
pub fn generate_malformed_handles() -> Vec<String> {
    vec![
        String::new(),
        "   ".to_string(),
        "../admin".to_string(),
        "a/b".to_string(),
        "id?x=1".to_string(),
        "id%2F..".to_string(),
        "id\r\nx".to_string(),
        "x".repeat(65),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_callers() {
        let callers = generate_callers(256);
        assert_eq!(callers.len(), 256);
        let unique: std::collections::HashSet<_> = callers.iter().collect();
        assert_eq!(unique.len(), 256);
        assert!(callers.iter().any(IpAddr::is_ipv6));
    }

    #[test]
    fn test_generate_targets() {
        let targets = generate_targets(10);
        assert_eq!(targets.len(), 10);
        assert!(targets.iter().all(|t| t.ends_with(".example.com")));
    }
}
