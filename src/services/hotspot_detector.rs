//! Hotspot Detector
//!
//! Ranks the top-N resource-consuming queries over the analysis window,
//! independent of whether they regressed. Pure over its inputs: the
//! analysis job aggregates recent samples per fingerprint, joins identity
//! metadata, and hands the candidates here.

use std::collections::{HashMap, HashSet};

use crate::config::HotspotConfig;
use crate::models::{Fingerprint, Hotspot, HotspotCandidate, MetricSample};

/// Aggregate window samples into one candidate per fingerprint. Totals are
/// summed across samples; the per-execution average is recomputed from the
/// summed totals.
pub fn aggregate_candidates(
    samples: &[MetricSample],
    fingerprints: &HashMap<i64, Fingerprint>,
    open_regressions: &HashSet<i64>,
) -> Vec<HotspotCandidate> {
    struct Acc {
        instance_name: String,
        database_name: String,
        execution_count: i64,
        total_cpu_us: i64,
        total_elapsed_us: i64,
        total_logical_reads: i64,
    }

    let mut by_fingerprint: HashMap<i64, Acc> = HashMap::new();
    let mut order: Vec<i64> = Vec::new();

    for sample in samples {
        let acc = by_fingerprint.entry(sample.fingerprint_id).or_insert_with(|| {
            order.push(sample.fingerprint_id);
            Acc {
                instance_name: sample.instance_name.clone(),
                database_name: sample.database_name.clone(),
                execution_count: 0,
                total_cpu_us: 0,
                total_elapsed_us: 0,
                total_logical_reads: 0,
            }
        });
        acc.execution_count += sample.execution_count;
        acc.total_cpu_us += sample.total_cpu_us;
        acc.total_elapsed_us += sample.total_elapsed_us;
        acc.total_logical_reads += sample.total_logical_reads;
    }

    // First-seen order is preserved so the required stable sort has a
    // deterministic starting arrangement
    order
        .into_iter()
        .filter_map(|fingerprint_id| {
            let acc = by_fingerprint.remove(&fingerprint_id)?;
            let hash = fingerprints
                .get(&fingerprint_id)
                .map(|f| f.hash.clone())
                .unwrap_or_default();
            Some(HotspotCandidate {
                fingerprint_id,
                fingerprint_hash: hash,
                instance_name: acc.instance_name,
                database_name: acc.database_name,
                execution_count: acc.execution_count,
                total_cpu_us: acc.total_cpu_us,
                total_elapsed_us: acc.total_elapsed_us,
                total_logical_reads: acc.total_logical_reads,
                avg_elapsed_us: if acc.execution_count > 0 {
                    acc.total_elapsed_us / acc.execution_count
                } else {
                    0
                },
                has_open_regression: open_regressions.contains(&fingerprint_id),
            })
        })
        .collect()
}

/// Filter by thresholds, rank descending by the chosen metric, take the
/// first N, annotate each with its share of the filtered set's total.
///
/// Ties break by total CPU, then fingerprint hash; the sort is stable so
/// fully-equal candidates keep insertion order.
pub fn detect(candidates: Vec<HotspotCandidate>, rules: &HotspotConfig) -> Vec<Hotspot> {
    let min_total_cpu_us = (rules.min_total_cpu_ms * 1000) as i64;
    let min_total_elapsed_us = (rules.min_total_elapsed_ms * 1000) as i64;
    let min_avg_elapsed_us = (rules.min_avg_elapsed_ms * 1000) as i64;

    let mut filtered: Vec<HotspotCandidate> = candidates
        .into_iter()
        .filter(|c| {
            c.total_cpu_us >= min_total_cpu_us
                && c.total_elapsed_us >= min_total_elapsed_us
                && c.execution_count >= rules.min_executions
                && c.avg_elapsed_us >= min_avg_elapsed_us
                && (rules.include_regressions || !c.has_open_regression)
        })
        .collect();

    let total: f64 = filtered.iter().map(|c| rules.rank_by.value_of(c)).sum();

    // Vec::sort_by is stable; equal keys preserve insertion order
    filtered.sort_by(|a, b| {
        let va = rules.rank_by.value_of(a);
        let vb = rules.rank_by.value_of(b);
        vb.partial_cmp(&va)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.total_cpu_us.cmp(&a.total_cpu_us))
            .then(a.fingerprint_hash.cmp(&b.fingerprint_hash))
    });

    filtered
        .into_iter()
        .take(rules.top_n)
        .enumerate()
        .map(|(index, c)| {
            let value = rules.rank_by.value_of(&c);
            Hotspot {
                rank: index + 1,
                fingerprint_id: c.fingerprint_id,
                instance_name: c.instance_name,
                database_name: c.database_name,
                metric: rules.rank_by,
                value,
                percent_of_total: if total > 0.0 { value / total * 100.0 } else { 0.0 },
                also_regressed: c.has_open_regression,
            }
        })
        .collect()
}
