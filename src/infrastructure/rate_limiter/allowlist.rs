//! IP allowlist parsing and membership tests
//!
//! Entries are parsed once at startup from a comma- or newline-separated
//! list. Supported forms: bare address (`192.168.1.1`, `::1`), CIDR block
//! (`10.0.0.0/8`, `fd00::/8`), and inclusive range (`10.0.0.1-10.0.0.99`).
//! Malformed entries are skipped with a warning; they never fail startup.

use std::net::IpAddr;

use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
enum AllowRule {
    Single(IpAddr),
    CidrV4 { network: u32, mask: u32 },
    CidrV6 { network: u128, mask: u128 },
    RangeV4 { start: u32, end: u32 },
    RangeV6 { start: u128, end: u128 },
}

impl AllowRule {
    fn parse(entry: &str) -> Option<Self> {
        if let Some((addr, prefix)) = entry.split_once('/') {
            return Self::parse_cidr(addr.trim(), prefix.trim());
        }
        if let Some((start, end)) = entry.split_once('-') {
            return Self::parse_range(start.trim(), end.trim());
        }
        entry.parse::<IpAddr>().ok().map(AllowRule::Single)
    }

    fn parse_cidr(addr: &str, prefix: &str) -> Option<Self> {
        let prefix: u8 = prefix.parse().ok()?;
        match addr.parse::<IpAddr>().ok()? {
            IpAddr::V4(v4) => {
                if prefix > 32 {
                    return None;
                }
                let mask = prefix_mask_v4(prefix);
                Some(AllowRule::CidrV4 {
                    network: u32::from(v4) & mask,
                    mask,
                })
            }
            IpAddr::V6(v6) => {
                if prefix > 128 {
                    return None;
                }
                let mask = prefix_mask_v6(prefix);
                Some(AllowRule::CidrV6 {
                    network: u128::from(v6) & mask,
                    mask,
                })
            }
        }
    }

    fn parse_range(start: &str, end: &str) -> Option<Self> {
        match (start.parse::<IpAddr>().ok()?, end.parse::<IpAddr>().ok()?) {
            (IpAddr::V4(s), IpAddr::V4(e)) => {
                let (start, end) = (u32::from(s), u32::from(e));
                (start <= end).then_some(AllowRule::RangeV4 { start, end })
            }
            (IpAddr::V6(s), IpAddr::V6(e)) => {
                let (start, end) = (u128::from(s), u128::from(e));
                (start <= end).then_some(AllowRule::RangeV6 { start, end })
            }
            _ => None,
        }
    }

    fn matches(&self, addr: IpAddr) -> bool {
        match (self, addr) {
            (AllowRule::Single(rule), addr) => *rule == addr,
            (AllowRule::CidrV4 { network, mask }, IpAddr::V4(v4)) => {
                u32::from(v4) & mask == *network
            }
            (AllowRule::CidrV6 { network, mask }, IpAddr::V6(v6)) => {
                u128::from(v6) & mask == *network
            }
            (AllowRule::RangeV4 { start, end }, IpAddr::V4(v4)) => {
                (*start..=*end).contains(&u32::from(v4))
            }
            (AllowRule::RangeV6 { start, end }, IpAddr::V6(v6)) => {
                (*start..=*end).contains(&u128::from(v6))
            }
            _ => false,
        }
    }
}

fn prefix_mask_v4(prefix: u8) -> u32 {
    if prefix == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix))
    }
}

fn prefix_mask_v6(prefix: u8) -> u128 {
    if prefix == 0 {
        0
    } else {
        u128::MAX << (128 - u32::from(prefix))
    }
}

/// Set of IP ranges exempted from rate limiting entirely
#[derive(Debug, Clone, Default)]
pub struct IpAllowlist {
    rules: Vec<AllowRule>,
}

impl IpAllowlist {
    /// Parse a comma- or newline-separated list of entries.
    /// Malformed entries are logged and skipped.
    pub fn parse(raw: &str) -> Self {
        let mut rules = Vec::new();
        for entry in raw.split([',', '\n']) {
            let entry = entry.trim();
            if entry.is_empty() {
                continue;
            }
            match AllowRule::parse(entry) {
                Some(rule) => rules.push(rule),
                None => warn!(entry = %entry, "Skipping malformed allowlist entry"),
            }
        }
        Self { rules }
    }

    /// Test a textual client IP. Unparseable input never matches.
    pub fn contains(&self, ip: &str) -> bool {
        ip.parse::<IpAddr>()
            .map(|addr| self.contains_addr(addr))
            .unwrap_or(false)
    }

    /// Test a parsed address against every rule.
    /// Proxies often hand us v4-mapped v6 forms; those are matched as v4 too.
    pub fn contains_addr(&self, addr: IpAddr) -> bool {
        if self.rules.iter().any(|rule| rule.matches(addr)) {
            return true;
        }
        if let IpAddr::V6(v6) = addr {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return self.rules.iter().any(|rule| rule.matches(IpAddr::V4(mapped)));
            }
        }
        false
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}
