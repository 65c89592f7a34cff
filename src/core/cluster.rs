// src/core/cluster.rs

use tracing::debug;

use crate::core::models::{Groups, ScanResult};
use crate::core::phash::PerceptualHash;

/// Groups results by visual similarity and stamps each one with its group key.
///
/// Single pass in input order: the first unassigned result seeds a group
/// keyed by its own URL, and every later unassigned result whose fingerprint
/// is strictly closer than `threshold` bits to the seed joins it. Results
/// without a fingerprint always end up alone. O(n²), fine for batch sizes in
/// the low thousands.
///
/// # Arguments
/// * `results` - Finished results in input order; `group_key` is set on each.
/// * `threshold` - Hamming distance a member must stay strictly below.
///
/// # Returns
/// Group key to member URLs. A key is the seed URL, suffixed with `#2`,
/// `#3`, ... when an earlier group already took that URL, so distinct groups
/// are never merged.
pub fn group_results(results: &mut [ScanResult], threshold: u32) -> Groups {
    let hashes: Vec<Option<PerceptualHash>> =
        results.iter().map(ScanResult::perceptual_hash).collect();
    let mut assigned = vec![false; results.len()];
    let mut groups = Groups::new();

    for seed in 0..results.len() {
        if assigned[seed] {
            continue;
        }
        assigned[seed] = true;
        let key = unique_key(&groups, &results[seed].url);
        let mut members = vec![results[seed].url.clone()];
        results[seed].group_key = key.clone();

        if let Some(seed_hash) = hashes[seed] {
            for other in seed + 1..results.len() {
                if assigned[other] {
                    continue;
                }
                let Some(other_hash) = hashes[other] else {
                    continue;
                };
                let distance = seed_hash.distance(other_hash);
                if distance < threshold {
                    debug!(seed = %key, member = %results[other].url, distance, "Grouping similar render.");
                    assigned[other] = true;
                    results[other].group_key = key.clone();
                    members.push(results[other].url.clone());
                }
            }
        }

        groups.insert(key, members);
    }

    groups
}

fn unique_key(groups: &Groups, url: &str) -> String {
    if !groups.contains_key(url) {
        return url.to_string();
    }
    (2..)
        .map(|n| format!("{url}#{n}"))
        .find(|key| !groups.contains_key(key))
        .unwrap_or_else(|| url.to_string())
}
