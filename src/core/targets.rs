// src/core/targets.rs

//! # Target Normalizer
//!
//! Turns raw input into the canonical target list of a run:
//! * blank lines are dropped and everything is trimmed,
//! * CIDR blocks (`10.0.0.0/30`) expand into addresses, without network and
//!   broadcast for IPv4 blocks of more than two addresses,
//! * explicit ranges (`10.0.0.1-10.0.0.9` or `10.0.0.1-9`) expand into
//!   addresses,
//! * anything else (domains, URLs, `host:port`) passes through untouched.
//!
//! Malformed blocks and ranges are never fatal: they are logged and kept as
//! literal targets.

use ipnetwork::IpNetwork;
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use tracing::{debug, info, warn};

use crate::core::errors::ScanError;
use crate::core::models::{Scheme, Target};

/// Upper bound on addresses a single block or range may expand into.
pub const MAX_EXPANSION: u64 = 65_536;

/// One host from a parsed port-scan report.
#[derive(Debug, Clone)]
pub struct ReportHost {
    pub address: String,
    pub ports: Vec<ReportPort>,
}

#[derive(Debug, Clone)]
pub struct ReportPort {
    pub port: u16,
    /// `open`, `closed`, `filtered`, ...
    pub state: String,
}

/// Expands newline-delimited input into canonical, deduplicated targets.
pub fn normalize_lines(input: &str) -> Vec<Target> {
    normalize(input.lines())
}

/// Expands raw strings into canonical, deduplicated targets.
///
/// Deduplication is by exact string, first occurrence wins.
///
/// # Arguments
/// * `raw` - Raw inputs: domains, URLs, `host:port`, IP addresses, CIDR
///   blocks or explicit ranges.
///
/// # Returns
/// Targets in first-seen order. Malformed blocks and ranges come back as
/// literal targets, so this never fails; an empty result is left for the
/// caller to reject.
pub fn normalize<I, S>(raw: I) -> Vec<Target>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for line in raw {
        let line = line.as_ref().trim();
        if line.is_empty() {
            continue;
        }
        for expanded in expand(line) {
            if seen.insert(expanded.clone()) {
                targets.push(Target::new(expanded));
            }
        }
    }

    info!(count = targets.len(), "Targets normalized.");
    targets
}

/// Turns report hosts into targets, one per open port.
///
/// Standard web ports map to the bare address so scheme resolution stays
/// with the prober; every other port is kept as `address:port`.
pub fn from_report_hosts(hosts: &[ReportHost]) -> Vec<Target> {
    let raw = hosts.iter().flat_map(|host| {
        host.ports
            .iter()
            .filter(|p| p.state.eq_ignore_ascii_case("open"))
            .map(move |p| match p.port {
                80 | 443 => host.address.clone(),
                port if host.address.contains(':') => format!("[{}]:{port}", host.address),
                port => format!("{}:{port}", host.address),
            })
    });
    normalize(raw.collect::<Vec<_>>())
}

/// Drops targets whose URL is already in a prior run's results.
///
/// A target matches when the prior set holds it verbatim, with an `https://`
/// or `http://` prefix, or with a trailing slash.
pub fn filter_incremental(targets: Vec<Target>, prior: &HashSet<String>) -> Vec<Target> {
    if prior.is_empty() {
        return targets;
    }
    let before = targets.len();
    let kept: Vec<Target> = targets
        .into_iter()
        .filter(|t| !already_scanned(t, prior))
        .collect();
    info!(skipped = before - kept.len(), remaining = kept.len(), "Incremental filter applied.");
    kept
}

fn already_scanned(target: &Target, prior: &HashSet<String>) -> bool {
    let raw = &target.raw;
    let mut candidates = vec![raw.clone(), format!("{raw}/")];
    if !target.has_scheme() {
        for scheme in [Scheme::Https, Scheme::Http] {
            let url = target.url_for(scheme);
            candidates.push(format!("{url}/"));
            candidates.push(url);
        }
    }
    candidates.iter().any(|c| prior.contains(c))
}

/// Expands one trimmed line, soft-failing to the literal line.
fn expand(line: &str) -> Vec<String> {
    let attempt = if line.contains('/') && !line.contains("://") {
        parse_cidr(line)
    } else if looks_like_range(line) {
        parse_range(line)
    } else {
        None
    };

    match attempt {
        Some(Ok(addresses)) => {
            debug!(input = %line, count = addresses.len(), "Expanded address block.");
            addresses
        }
        Some(Err(e)) => {
            warn!(error = %e, "Keeping input as a literal target.");
            vec![line.to_string()]
        }
        None => vec![line.to_string()],
    }
}

/// A range starts with a full IPv4 address followed by a dash.
fn looks_like_range(line: &str) -> bool {
    line.split_once('-')
        .is_some_and(|(start, _)| start.trim().parse::<Ipv4Addr>().is_ok())
}

/// `None` when the line is not address-like at all (e.g. `example.com/path`).
fn parse_cidr(line: &str) -> Option<Result<Vec<String>, ScanError>> {
    let (addr, _) = line.split_once('/')?;
    if addr.parse::<IpAddr>().is_err() {
        return None;
    }
    let invalid = |reason: String| ScanError::Input { input: line.to_string(), reason };

    let network = match line.parse::<IpNetwork>() {
        Ok(n) => n,
        Err(e) => return Some(Err(invalid(e.to_string()))),
    };

    let size: u128 = match network {
        IpNetwork::V4(n) => 1u128 << (32 - u32::from(n.prefix())),
        IpNetwork::V6(n) => 1u128.checked_shl(128 - u32::from(n.prefix())).unwrap_or(u128::MAX),
    };
    if size > u128::from(MAX_EXPANSION) {
        return Some(Err(invalid(format!("block of {size} addresses exceeds {MAX_EXPANSION}"))));
    }

    let addresses: Vec<String> = match network {
        IpNetwork::V4(n) => {
            let all: Vec<Ipv4Addr> = n.iter().collect();
            if all.len() > 2 {
                all[1..all.len() - 1].iter().map(ToString::to_string).collect()
            } else {
                all.iter().map(ToString::to_string).collect()
            }
        }
        IpNetwork::V6(n) => n.iter().map(|ip| ip.to_string()).collect(),
    };
    Some(Ok(addresses))
}

/// `start-end` with two full addresses, or `a.b.c.d-N` as last-octet shorthand.
fn parse_range(line: &str) -> Option<Result<Vec<String>, ScanError>> {
    let (start_str, end_str) = line.split_once('-')?;
    let start: Ipv4Addr = start_str.trim().parse().ok()?;
    let end_str = end_str.trim();
    let invalid = |reason: String| ScanError::Input { input: line.to_string(), reason };

    let end = if let Ok(full) = end_str.parse::<Ipv4Addr>() {
        full
    } else if let Ok(last) = end_str.parse::<u8>() {
        let [a, b, c, _] = start.octets();
        Ipv4Addr::new(a, b, c, last)
    } else {
        return Some(Err(invalid(format!("'{end_str}' is not an address or last octet"))));
    };

    let (lo, hi) = (u32::from(start), u32::from(end));
    if lo > hi {
        return Some(Err(invalid("range end comes before its start".into())));
    }
    if u64::from(hi - lo) + 1 > MAX_EXPANSION {
        return Some(Err(invalid(format!("range exceeds {MAX_EXPANSION} addresses"))));
    }
    Some(Ok((lo..=hi).map(|ip| Ipv4Addr::from(ip).to_string()).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raws(targets: &[Target]) -> Vec<&str> {
        targets.iter().map(|t| t.raw.as_str()).collect()
    }

    #[test]
    fn trims_drops_blanks_and_dedups_first_wins() {
        let targets = normalize_lines("  b.com \n\n a.com\nb.com\n   \nhttps://c.com/login\n");
        assert_eq!(raws(&targets), vec!["b.com", "a.com", "https://c.com/login"]);
    }

    #[test]
    fn ipv4_cidr_excludes_network_and_broadcast() {
        let targets = normalize(["192.168.1.0/30"]);
        assert_eq!(raws(&targets), vec!["192.168.1.1", "192.168.1.2"]);
    }

    #[test]
    fn tiny_blocks_keep_every_address() {
        assert_eq!(raws(&normalize(["10.0.0.4/31"])), vec!["10.0.0.4", "10.0.0.5"]);
        assert_eq!(raws(&normalize(["10.0.0.4/32"])), vec!["10.0.0.4"]);
    }

    #[test]
    fn explicit_ranges_expand() {
        assert_eq!(
            raws(&normalize(["10.0.0.1-10.0.0.3"])),
            vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]
        );
        assert_eq!(raws(&normalize(["10.0.0.8-9"])), vec!["10.0.0.8", "10.0.0.9"]);
    }

    #[test]
    fn dashed_hostnames_and_urls_pass_through() {
        let input = ["my-site.example.com", "https://a.com/x/y", "api-v2.internal:8080"];
        assert_eq!(raws(&normalize(input)), input.to_vec());
    }

    #[test]
    fn malformed_blocks_soft_fail_to_literals() {
        let input = ["10.0.0.0/99", "10.0.0.9-10.0.0.1", "10.0.0.1-abc", "10.0.0.0/8"];
        assert_eq!(raws(&normalize(input)), input.to_vec());
    }

    #[test]
    fn expansion_dedups_against_plain_entries() {
        let targets = normalize(["10.0.0.2", "10.0.0.1-3"]);
        assert_eq!(raws(&targets), vec!["10.0.0.2", "10.0.0.1", "10.0.0.3"]);
    }

    #[test]
    fn report_hosts_yield_open_ports_only() {
        let hosts = vec![
            ReportHost {
                address: "10.1.1.1".into(),
                ports: vec![
                    ReportPort { port: 443, state: "open".into() },
                    ReportPort { port: 80, state: "open".into() },
                    ReportPort { port: 8080, state: "open".into() },
                    ReportPort { port: 22, state: "filtered".into() },
                ],
            },
            ReportHost {
                address: "10.1.1.2".into(),
                ports: vec![ReportPort { port: 3000, state: "closed".into() }],
            },
        ];
        assert_eq!(raws(&from_report_hosts(&hosts)), vec!["10.1.1.1", "10.1.1.1:8080"]);
    }

    fn request_urls_parse(targets: &[Target]) -> bool {
        targets.iter().all(|t| {
            [Scheme::Https, Scheme::Http]
                .into_iter()
                .all(|scheme| url::Url::parse(&t.url_for(scheme)).is_ok_and(|u| u.host().is_some()))
        })
    }

    #[test]
    fn ipv6_blocks_expand_to_requestable_targets() {
        let targets = normalize(["2001:db8::/126", "::1/128"]);
        assert_eq!(
            raws(&targets),
            vec!["2001:db8::", "2001:db8::1", "2001:db8::2", "2001:db8::3", "::1"]
        );
        assert!(request_urls_parse(&targets));
        assert_eq!(targets[4].url_for(Scheme::Https), "https://[::1]");
    }

    #[test]
    fn ipv6_report_hosts_are_requestable() {
        let hosts = vec![ReportHost {
            address: "::1".into(),
            ports: vec![
                ReportPort { port: 443, state: "open".into() },
                ReportPort { port: 8080, state: "open".into() },
            ],
        }];
        let targets = from_report_hosts(&hosts);
        assert_eq!(raws(&targets), vec!["::1", "[::1]:8080"]);
        assert!(request_urls_parse(&targets));
        assert_eq!(targets[1].port, Some(8080));
    }

    #[test]
    fn incremental_mode_skips_prior_urls() {
        let prior: HashSet<String> = ["https://a.com".to_string()].into();
        let targets = filter_incremental(normalize(["a.com", "b.com"]), &prior);
        assert_eq!(raws(&targets), vec!["b.com"]);
    }

    #[test]
    fn incremental_mode_matches_bracketed_ipv6_urls() {
        let prior: HashSet<String> = ["https://[::1]/".to_string()].into();
        let targets = filter_incremental(normalize(["::1", "::2"]), &prior);
        assert_eq!(raws(&targets), vec!["::2"]);
    }

    #[test]
    fn incremental_mode_dedups_before_filtering() {
        let prior: HashSet<String> = ["http://c.com/".to_string()].into();
        let targets = filter_incremental(normalize(["b.com", "c.com", "b.com"]), &prior);
        assert_eq!(raws(&targets), vec!["b.com"]);
    }
}
