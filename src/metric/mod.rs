//! Bounded, name-keyed table of timing and Apdex metrics.
//!
//! Grounded in `axiom/util_metrics.c`/`util_metrics_private.h`: the original
//! keeps a flat array plus a binary-tree index over metric-name hashes. This
//! rewrite keeps the documented contract (bounded non-forced inserts, a
//! `force_add` escape hatch, a single `Supportability/MetricsDropped` metric
//! the first time the bound is exceeded, six-slot reinterpreted data) but
//! replaces the from-C hash tree with a `HashMap<String, usize>` index into a
//! flat `Vec<Metric>`, per spec.md §9's re-architecture guidance.
use crate::trace_core_debug;
use bitflags::bitflags;
use serde::Serialize;
use std::collections::HashMap;

/// The default maximum number of non-forced metrics a table will hold.
pub const DEFAULT_LIMIT: usize = 2000;

/// Name of the metric force-added the first time a table's bound is
/// exceeded by a non-forced `add`. Part of the wire contract (spec.md §6).
pub const METRICS_DROPPED_METRIC: &str = "Supportability/MetricsDropped";

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct MetricFlags: u32 {
        const APDEX = 0x0000_0001;
        const FORCED = 0x0000_0002;
    }
}

/// The six-slot data array, reinterpreted depending on [`MetricFlags::APDEX`].
///
/// Mirrors `axiom/util_metrics_private.h`'s `NRM_COUNT`/`NRM_SATISFYING`
/// aliasing: for timing metrics the slots are
/// `[count, total, exclusive, min, max, sum_of_squares]`; for Apdex metrics
/// they are `[satisfying, tolerating, failing, min_apdex, max_apdex, 0]`,
/// all in the table's time unit (nanoseconds internally; seconds on the
/// wire, see [`Metric::to_json_data`]).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MetricData(pub [u64; 6]);

#[derive(Clone, Debug)]
pub struct Metric {
    pub name: String,
    pub flags: MetricFlags,
    pub data: MetricData,
}

impl Metric {
    fn new_timing(name: String) -> Self {
        Metric {
            name,
            flags: MetricFlags::empty(),
            data: MetricData::default(),
        }
    }

    fn new_apdex(name: String) -> Self {
        Metric {
            name,
            flags: MetricFlags::APDEX,
            data: MetricData::default(),
        }
    }

    pub fn is_apdex(&self) -> bool {
        self.flags.contains(MetricFlags::APDEX)
    }

    pub fn is_forced(&self) -> bool {
        self.flags.contains(MetricFlags::FORCED)
    }

    pub fn count(&self) -> u64 {
        self.data.0[0]
    }
    pub fn total(&self) -> u64 {
        self.data.0[1]
    }
    pub fn exclusive(&self) -> u64 {
        self.data.0[2]
    }
    pub fn min(&self) -> u64 {
        self.data.0[3]
    }
    pub fn max(&self) -> u64 {
        self.data.0[4]
    }
    pub fn sum_of_squares(&self) -> u64 {
        self.data.0[5]
    }
    pub fn satisfying(&self) -> u64 {
        self.data.0[0]
    }
    pub fn tolerating(&self) -> u64 {
        self.data.0[1]
    }
    pub fn failing(&self) -> u64 {
        self.data.0[2]
    }

    fn accumulate_timing(&mut self, duration_ns: u64, exclusive_ns: u64) {
        let d = &mut self.data.0;
        if d[0] == 0 {
            d[3] = duration_ns;
            d[4] = duration_ns;
        } else {
            d[3] = d[3].min(duration_ns);
            d[4] = d[4].max(duration_ns);
        }
        d[0] += 1;
        d[1] += duration_ns;
        d[2] += exclusive_ns;
        d[5] += duration_ns.saturating_mul(duration_ns);
    }

    fn accumulate_apdex(&mut self, satisfying: u64, tolerating: u64, failing: u64, apdex_ns: u64) {
        let d = &mut self.data.0;
        let first = d[0] == 0 && d[1] == 0 && d[2] == 0;
        d[0] += satisfying;
        d[1] += tolerating;
        d[2] += failing;
        if first {
            d[3] = apdex_ns;
            d[4] = apdex_ns;
        } else {
            d[3] = d[3].min(apdex_ns);
            d[4] = d[4].max(apdex_ns);
        }
    }

    /// Converts internal nanosecond data to the wire JSON tuple of spec.md
    /// §4.6/§6: `[count, total_s, exclusive_s, min_s, max_s, sumsq_s]` for
    /// timing metrics, `[sat, tol, fail, min_s, max_s, 0]` for Apdex.
    fn to_json_data(&self) -> [f64; 6] {
        const NS_PER_S: f64 = 1_000_000_000.0;
        if self.is_apdex() {
            [
                self.data.0[0] as f64,
                self.data.0[1] as f64,
                self.data.0[2] as f64,
                self.data.0[3] as f64 / NS_PER_S,
                self.data.0[4] as f64 / NS_PER_S,
                0.0,
            ]
        } else {
            [
                self.data.0[0] as f64,
                self.data.0[1] as f64 / NS_PER_S,
                self.data.0[2] as f64 / NS_PER_S,
                self.data.0[3] as f64 / NS_PER_S,
                self.data.0[4] as f64 / NS_PER_S,
                self.data.0[5] as f64 / (NS_PER_S * NS_PER_S),
            ]
        }
    }
}

#[derive(Serialize)]
struct MetricJson {
    name: String,
    data: [f64; 6],
    #[serde(skip_serializing_if = "Option::is_none")]
    forced: Option<bool>,
}

/// A bounded, name-keyed metric table.
///
/// `max_size` bounds the number of *non-forced* metrics; `force_add`/
/// `force_add_apdex` bypass the bound. The first non-forced add that would
/// exceed the bound instead force-adds a single
/// [`METRICS_DROPPED_METRIC`] with `count = 1` (spec.md §4.6).
#[derive(Debug)]
pub struct MetricTable {
    max_size: usize,
    metrics: Vec<Metric>,
    index: HashMap<String, usize>,
    dropped_metric_added: bool,
}

impl MetricTable {
    pub fn new(max_size: usize) -> Self {
        MetricTable {
            max_size,
            metrics: Vec::new(),
            index: HashMap::new(),
            dropped_metric_added: false,
        }
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn find(&self, name: &str) -> Option<&Metric> {
        self.index.get(name).map(|&i| &self.metrics[i])
    }

    fn slot(&mut self, name: &str, apdex: bool, force: bool) -> Option<&mut Metric> {
        if let Some(&i) = self.index.get(name) {
            return Some(&mut self.metrics[i]);
        }
        if !force && self.metrics.len() >= self.max_size && self.max_size > 0 {
            if !self.dropped_metric_added {
                self.dropped_metric_added = true;
                trace_core_debug!(
                    name: "MetricTable.Bound.Exceeded",
                    max_size = self.max_size as u64,
                );
                let i = self.metrics.len();
                let mut m = Metric::new_timing(METRICS_DROPPED_METRIC.to_owned());
                m.flags |= MetricFlags::FORCED;
                m.accumulate_timing(0, 0);
                self.metrics.push(m);
                self.index.insert(METRICS_DROPPED_METRIC.to_owned(), i);
            }
            return None;
        }
        let i = self.metrics.len();
        let mut m = if apdex {
            Metric::new_apdex(name.to_owned())
        } else {
            Metric::new_timing(name.to_owned())
        };
        if force {
            m.flags |= MetricFlags::FORCED;
        }
        self.metrics.push(m);
        self.index.insert(name.to_owned(), i);
        Some(&mut self.metrics[i])
    }

    pub fn add_ex(&mut self, name: &str, duration_ns: u64, exclusive_ns: u64) {
        self.add_internal(false, name, duration_ns, exclusive_ns);
    }

    pub fn force_add_ex(&mut self, name: &str, duration_ns: u64, exclusive_ns: u64) {
        self.add_internal(true, name, duration_ns, exclusive_ns);
    }

    pub fn add(&mut self, name: &str, duration_ns: u64) {
        self.add_ex(name, duration_ns, duration_ns);
    }

    pub fn force_add(&mut self, name: &str, duration_ns: u64) {
        self.force_add_ex(name, duration_ns, duration_ns);
    }

    fn add_internal(&mut self, force: bool, name: &str, duration_ns: u64, exclusive_ns: u64) {
        if let Some(m) = self.slot(name, false, force) {
            m.accumulate_timing(duration_ns, exclusive_ns);
        }
    }

    /// Records one Apdex observation. Exactly one of `satisfying`,
    /// `tolerating`, `failing` should be `1` and the rest `0`; `duration_ns`
    /// is tracked into the metric's min/max-apdex slots.
    pub fn add_apdex(
        &mut self,
        name: &str,
        satisfying: u64,
        tolerating: u64,
        failing: u64,
        duration_ns: u64,
    ) {
        self.add_apdex_internal(false, name, satisfying, tolerating, failing, duration_ns);
    }

    pub fn force_add_apdex(
        &mut self,
        name: &str,
        satisfying: u64,
        tolerating: u64,
        failing: u64,
        duration_ns: u64,
    ) {
        self.add_apdex_internal(true, name, satisfying, tolerating, failing, duration_ns);
    }

    fn add_apdex_internal(
        &mut self,
        force: bool,
        name: &str,
        satisfying: u64,
        tolerating: u64,
        failing: u64,
        duration_ns: u64,
    ) {
        if let Some(m) = self.slot(name, true, force) {
            m.accumulate_apdex(satisfying, tolerating, failing, duration_ns);
        }
    }

    /// Duplicates a metric under a new name. No-op if `current_name` is
    /// absent. Used by the namer to alias a rolled-up metric onto a
    /// transaction-specific name without re-accumulating.
    pub fn duplicate_metric(&mut self, current_name: &str, new_name: &str) {
        if let Some(&i) = self.index.get(current_name) {
            let mut clone = self.metrics[i].clone();
            clone.name = new_name.to_owned();
            if let Some(&existing) = self.index.get(new_name) {
                self.metrics[existing] = clone;
            } else {
                let j = self.metrics.len();
                self.index.insert(new_name.to_owned(), j);
                self.metrics.push(clone);
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Metric> {
        self.metrics.iter()
    }

    /// Emits the compact JSON array described in spec.md §4.6/§6:
    /// `[{"name": N, "data": [...], "forced": true?}, ...]`.
    pub fn to_json(&self) -> serde_json::Value {
        let entries: Vec<MetricJson> = self
            .metrics
            .iter()
            .map(|m| MetricJson {
                name: m.name.clone(),
                data: m.to_json_data(),
                forced: if m.is_forced() { Some(true) } else { None },
            })
            .collect();
        serde_json::to_value(entries).unwrap_or(serde_json::Value::Array(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_accumulates_count_and_total() {
        let mut t = MetricTable::new(DEFAULT_LIMIT);
        t.add("WebTransaction", 100_000_000);
        t.add("WebTransaction", 50_000_000);
        let m = t.find("WebTransaction").unwrap();
        assert_eq!(m.count(), 2);
        assert_eq!(m.total(), 150_000_000);
        assert_eq!(m.min(), 50_000_000);
        assert_eq!(m.max(), 100_000_000);
    }

    #[test]
    fn bound_drops_and_force_adds_dropped_metric() {
        let mut t = MetricTable::new(1);
        t.add("first", 1);
        t.add("second", 1); // table is full; dropped.
        t.force_add("forced", 1);

        let json = t.to_json();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0]["name"], "first");
        assert_eq!(arr[1]["name"], METRICS_DROPPED_METRIC);
        assert_eq!(arr[1]["forced"], true);
        assert_eq!(arr[1]["data"][0], 1.0);
        assert_eq!(arr[2]["name"], "forced");
    }

    #[test]
    fn apdex_buckets_accumulate_independently() {
        let mut t = MetricTable::new(DEFAULT_LIMIT);
        t.add_apdex("Apdex", 1, 0, 0, 100_000_000);
        t.add_apdex("Apdex", 0, 1, 0, 900_000_000);
        let m = t.find("Apdex").unwrap();
        assert!(m.is_apdex());
        assert_eq!(m.satisfying(), 1);
        assert_eq!(m.tolerating(), 1);
        assert_eq!(m.failing(), 0);
    }

    #[test]
    fn every_json_entry_has_six_element_data() {
        let mut t = MetricTable::new(DEFAULT_LIMIT);
        t.add("a", 1);
        t.add_apdex("b", 1, 0, 0, 100_000_000);
        let json = t.to_json();
        for entry in json.as_array().unwrap() {
            assert_eq!(entry["data"].as_array().unwrap().len(), 6);
        }
    }

    #[test]
    fn duplicate_metric_clones_under_new_name() {
        let mut t = MetricTable::new(DEFAULT_LIMIT);
        t.add("Datastore/statement/MySQL/foo/select", 10);
        t.duplicate_metric("Datastore/statement/MySQL/foo/select", "Datastore/operation/MySQL/select");
        let dup = t.find("Datastore/operation/MySQL/select").unwrap();
        assert_eq!(dup.count(), 1);
    }
}
