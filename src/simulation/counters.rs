use std::{
    fmt::{self, Display, Write},
    time::{Duration, Instant},
};

use ahash::HashMap;

use crate::floating_type_mod::FT;

#[derive(Clone)]
pub struct Counter<T> {
    values: Vec<T>,
    last_start: Instant,
}

impl<T> Counter<T> {
    fn new() -> Self {
        Counter::<T> {
            last_start: Instant::now(),
            values: Vec::new(),
        }
    }

    pub fn add_value(&mut self, v: T) {
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Counter<FT> {
    pub fn avg(&self) -> FT {
        if self.values.is_empty() {
            return 0.;
        }
        self.values.iter().cloned().sum::<FT>() / self.values.len() as FT
    }
    pub fn min(&self) -> FT {
        self.values.iter().cloned().fold(FT::MAX, FT::min)
    }
    pub fn max(&self) -> FT {
        self.values.iter().cloned().fold(FT::MIN, FT::max)
    }
}

impl Counter<Duration> {
    fn begin(&mut self) {
        self.last_start = Instant::now();
    }

    fn end(&mut self) {
        self.values.push(Instant::now() - self.last_start);
    }

    pub fn avg(&self) -> Duration {
        if self.values.is_empty() {
            return Duration::ZERO;
        }
        self.sum() / self.values.len() as u32
    }

    pub fn sum(&self) -> Duration {
        self.values.iter().cloned().sum::<Duration>()
    }

    pub fn last(&self) -> Option<Duration> {
        self.values.last().cloned()
    }
}

/// Named series of sampled values (particle counts, neighbor counts, ...).
pub struct ValueCounters {
    counters: HashMap<String, Counter<FT>>,
    enabled: bool,
}

impl ValueCounters {
    pub fn new(enabled: bool) -> ValueCounters {
        ValueCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn add_value(&mut self, id: &str, v: FT) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<FT>::new)
                .add_value(v);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<FT>> {
        self.counters.get(id)
    }

    /// All counters sorted by their label.
    pub fn sorted(&self) -> Vec<(&str, &Counter<FT>)> {
        let mut v: Vec<_> = self.counters.iter().map(|(k, c)| (k.as_str(), c)).collect();
        v.sort_by(|x, y| x.0.cmp(y.0));
        v
    }
}

/// Wall-clock timings of the simulation passes. All calls are no-ops while disabled.
pub struct PerformanceCounters {
    counters: HashMap<String, Counter<Duration>>,
    enabled: bool,
}

impl PerformanceCounters {
    pub fn new(enabled: bool) -> PerformanceCounters {
        PerformanceCounters {
            counters: HashMap::default(),
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn begin(&mut self, id: &str) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<Duration>::new)
                .begin();
        }
    }

    pub fn end(&mut self, id: &str) {
        if self.enabled {
            if let Some(counter) = self.counters.get_mut(id) {
                counter.end();
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<Duration>> {
        self.counters.get(id)
    }

    pub fn sorted(&self) -> Vec<(&str, &Counter<Duration>)> {
        let mut v: Vec<_> = self.counters.iter().map(|(k, c)| (k.as_str(), c)).collect();
        v.sort_by(|x, y| x.0.cmp(y.0));
        v
    }
}

/// Summary of the particle state after a step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameStatistics {
    pub step_number: usize,
    pub num_particles: usize,
    pub avg_neighbor_count: FT,
    pub max_neighbor_count: usize,
    pub min_density: FT,
    pub max_density: FT,
    pub max_speed: FT,
    pub max_bucket_len: usize,
}

impl Display for FrameStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "step {}: {} particles, neighbors avg:{:.2} max:{}, density min:{:.3} max:{:.3}, max speed:{:.4}, longest bucket:{}",
            self.step_number,
            self.num_particles,
            self.avg_neighbor_count,
            self.max_neighbor_count,
            self.min_density,
            self.max_density,
            self.max_speed,
            self.max_bucket_len
        )
    }
}

/// Renders the accumulated timings and sampled values as plain text.
pub fn write_counters(
    s: &mut String,
    pcounters: &PerformanceCounters,
    vcounters: &ValueCounters,
) -> Result<(), fmt::Error> {
    if let Some(step) = pcounters.get("simulation-step") {
        writeln!(
            s,
            "simulation-time: {:.3}ms ({} steps, last {:.3}ms)",
            step.sum().as_secs_f64() * 1000.,
            step.len(),
            step.last().unwrap_or_default().as_secs_f64() * 1000.
        )?;
        writeln!(s)?;
    }

    for (label, pcounter) in pcounters.sorted() {
        writeln!(s, "{}: avg:{:.4}ms", label, pcounter.avg().as_secs_f64() * 1000.)?;
    }
    writeln!(s)?;

    for (label, vcounter) in vcounters.sorted() {
        writeln!(
            s,
            "{}: min:{} max:{} avg:{}",
            label,
            vcounter.min(),
            vcounter.max(),
            vcounter.avg()
        )?;
    }

    Ok(())
}

#[test]
fn disabled_counters_record_nothing() {
    let mut pcounters = PerformanceCounters::new(false);
    pcounters.begin("integrate");
    pcounters.end("integrate");
    assert!(pcounters.get("integrate").is_none());

    let mut vcounters = ValueCounters::new(false);
    vcounters.add_value("particle-count", 3.);
    assert!(vcounters.get("particle-count").is_none());
}

#[test]
fn counters_accumulate_values() {
    let mut pcounters = PerformanceCounters::new(true);
    for _ in 0..3 {
        pcounters.begin("integrate");
        pcounters.end("integrate");
    }
    let c = pcounters.get("integrate").unwrap();
    assert_eq!(c.len(), 3);
    assert!(c.avg() <= c.sum());

    // end without begin is ignored
    pcounters.end("unknown");
    assert!(pcounters.get("unknown").is_none());

    let mut vcounters = ValueCounters::new(true);
    for v in [1., 5., 3.] {
        vcounters.add_value("neighbors", v);
    }
    let c = vcounters.get("neighbors").unwrap();
    assert_eq!(c.min(), 1.);
    assert_eq!(c.max(), 5.);
    assert_eq!(c.avg(), 3.);

    let mut s = String::new();
    write_counters(&mut s, &pcounters, &vcounters).unwrap();
    assert!(s.contains("integrate: avg:"));
    assert!(s.contains("neighbors: min:1 max:5 avg:3"));
}
