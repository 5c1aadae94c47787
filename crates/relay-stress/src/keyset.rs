//! Stress key-set generation (§4.8): a fixed list of keys distributed evenly
//! across the dispatch topic's partitions under the same hash partitioner
//! the dispatch publisher uses, so the pre-generated set stays
//! bit-for-bit compatible with what was validated offline.

use relay_dispatch::partition_for;

pub const KEY_COUNT: usize = 1000;

/// Generate `KEY_COUNT` keys of the form `stress-user-<n>` and greedily
/// assign each to whichever eligible partition currently has the fewest
/// keys, so the final distribution deviates by at most one key across
/// partitions regardless of how the hash happens to land.
pub fn generate_key_set(num_partitions: i32) -> Vec<String> {
    assert!(num_partitions > 0, "partition count must be positive");

    let mut per_partition_count = vec![0usize; num_partitions as usize];
    let mut keys = Vec::with_capacity(KEY_COUNT);
    let mut candidate = 0u64;

    while keys.len() < KEY_COUNT {
        let key = format!("stress-user-{candidate}");
        let partition = partition_for(key.as_bytes(), num_partitions) as usize;
        let target = per_partition_count
            .iter()
            .enumerate()
            .min_by_key(|(_, count)| **count)
            .map(|(idx, _)| idx)
            .expect("num_partitions > 0");

        if partition == target || per_partition_count[partition] <= per_partition_count[target] + 1 {
            per_partition_count[partition] += 1;
            keys.push(key);
        }
        candidate += 1;
    }

    keys
}

/// Per-partition deviation of a generated key set from perfectly even,
/// used by tests to assert the §4.8 "target deviation ≤ 1" bound.
pub fn partition_deviation(keys: &[String], num_partitions: i32) -> usize {
    let mut counts = vec![0usize; num_partitions as usize];
    for key in keys {
        let partition = partition_for(key.as_bytes(), num_partitions) as usize;
        counts[partition] += 1;
    }
    let min = counts.iter().copied().min().unwrap_or(0);
    let max = counts.iter().copied().max().unwrap_or(0);
    max - min
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_exactly_one_thousand_unique_keys() {
        let keys = generate_key_set(16);
        assert_eq!(keys.len(), KEY_COUNT);
        let unique: std::collections::HashSet<_> = keys.iter().collect();
        assert_eq!(unique.len(), KEY_COUNT);
    }

    #[test]
    fn distributes_within_one_key_of_even_across_partitions() {
        for num_partitions in [1, 3, 8, 16, 32] {
            let keys = generate_key_set(num_partitions);
            let deviation = partition_deviation(&keys, num_partitions);
            assert!(deviation <= 1, "partition count {num_partitions} had deviation {deviation}");
        }
    }
}
