use std::fmt;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::{
    cache::{AccessResult, CacheStat, DirectMappedCache, LineEntry, WriteResult},
    geometry::{self, Geometry},
    trace::{Access, AccessOp},
};

#[cfg(feature = "stat")]
use crate::stat::{AddStats, Stats};

/// Geometry as the user gives it: block size is `2^offset_bits`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimConfig {
    pub cache_size: u64,
    pub memory_size: u64,
    pub offset_bits: u32,
}

impl SimConfig {
    pub fn deser(file: impl std::io::Read) -> Result<SimConfig> {
        Ok(serde_json::from_reader(file)?)
    }
    pub fn geometry(&self) -> geometry::Result<Geometry> {
        Geometry::from_offset_bits(self.cache_size, self.memory_size, self.offset_bits)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Event {
    Read(AccessResult),
    Write(WriteResult),
}

impl Event {
    /// write to a line the cache does not hold
    pub fn is_absent_write(&self) -> bool {
        matches!(self, Event::Write(w) if !w.is_updated())
    }
    pub fn truncated(&self) -> bool {
        match self {
            Event::Read(r) => r.decoded.truncated,
            Event::Write(w) => w.decoded.truncated,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::Read(r) => write!(f, "{r}"),
            Event::Write(w) => writeln!(f, "{w}"),
        }
    }
}

pub struct Simulator {
    cache: DirectMappedCache,
    accesses: usize,
    truncated: usize,
    absent_writes: Vec<u64>,
    #[cfg(feature = "stat")]
    stat_builder: stat::ReplayStatBuilder,
}

impl Simulator {
    pub fn new(config: &SimConfig) -> geometry::Result<Self> {
        Ok(Self::with_geometry(config.geometry()?))
    }
    pub fn with_geometry(geometry: Geometry) -> Self {
        Self {
            cache: DirectMappedCache::with_geometry(geometry),
            accesses: 0,
            truncated: 0,
            absent_writes: Vec::new(),
            #[cfg(feature = "stat")]
            stat_builder: stat::ReplayStatBuilder::new(),
        }
    }
    pub fn cache(&self) -> &DirectMappedCache {
        &self.cache
    }
    pub fn accesses(&self) -> usize {
        self.accesses
    }
    pub fn step(&mut self, access: Access) -> Event {
        #[cfg(feature = "stat")]
        let begin = std::time::Instant::now();
        let event = match access.op {
            AccessOp::Read => Event::Read(self.cache.read(access.address)),
            AccessOp::Write => Event::Write(self.cache.write(access.address)),
        };
        self.accesses += 1;
        if event.truncated() {
            self.truncated += 1;
        }
        if event.is_absent_write() {
            self.absent_writes.push(access.address);
        }
        #[cfg(feature = "stat")]
        self.stat_builder.add_busy(begin.elapsed());
        event
    }
    pub fn replay<'t>(&mut self, trace: impl IntoIterator<Item = &'t Access>) -> Vec<Event> {
        let events: Vec<_> = trace.into_iter().map(|a| self.step(*a)).collect();
        log::info!(
            "replayed {} accesses ({} total so far)",
            events.len(),
            self.accesses
        );
        events
    }
    pub fn report(&self) -> Report {
        let stat = self.cache.stat();
        Report {
            geometry: self.cache.geometry(),
            lines: self.cache.entries().collect(),
            stat,
            hit_rate: stat.hit_rate(),
            miss_rate: stat.miss_rate(),
            accesses: self.accesses,
            truncated: self.truncated,
            absent_writes: self.absent_writes.clone(),
        }
    }
}

impl Simulator {
    #[cfg(feature = "stat")]
    pub fn collect_stat(&self) -> Stats {
        let mut ss = Stats::default();
        self.add_stats(&mut ss);
        ss
    }
}

#[cfg(feature = "stat")]
impl AddStats for Simulator {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(
            self.stat_builder.finish(self.accesses, self.truncated),
        ));
        self.cache.add_stats(buf);
    }
}

/// Snapshot of the whole simulator state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub geometry: Geometry,
    pub lines: Vec<LineEntry>,
    pub stat: CacheStat,
    /// `None` (null) when nothing was read
    pub hit_rate: Option<f64>,
    pub miss_rate: Option<f64>,
    pub accesses: usize,
    pub truncated: usize,
    /// addresses of writes that found no line, in trace order
    pub absent_writes: Vec<u64>,
}

#[cfg(feature = "stat")]
mod stat {
    use crate::stat::*;

    use std::{fmt, time};

    /// Sums time spent inside `step` only, so idle time at a prompt is not counted.
    #[derive(Default)]
    pub struct ReplayStatBuilder {
        busy: time::Duration,
    }

    impl ReplayStatBuilder {
        pub fn new() -> Self {
            Self::default()
        }
        pub fn add_busy(&mut self, d: time::Duration) {
            self.busy += d;
        }
        #[cfg(test)]
        pub fn busy(&self) -> time::Duration {
            self.busy
        }
        pub fn finish(&self, accesses: usize, truncated: usize) -> ReplayStat {
            ReplayStat {
                accesses,
                truncated,
                elapsed: self.busy,
            }
        }
    }

    pub struct ReplayStat {
        accesses: usize,
        truncated: usize,
        elapsed: time::Duration,
    }

    impl Stat for ReplayStat {
        fn view(&self, _: usize) -> Box<dyn StatView + '_> {
            Box::new(self)
        }
    }

    impl StatView for &'_ ReplayStat {
        fn header(&self) -> &'static str {
            "replay stat"
        }
        fn width(&self) -> usize {
            33
        }
    }

    impl fmt::Display for &'_ ReplayStat {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let ms = format!("{} ms", self.elapsed.as_millis());
            writeln!(f, "  elapsed total: {ms:>9}")?;
            writeln!(f, "  accesses:  {:>13}", self.accesses)?;
            writeln!(f, "  truncated: {:>13}", self.truncated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        cache::{AccessKind, WriteOutcome},
        trace::{Trace, TraceFormat},
    };

    const EXAMPLE: SimConfig = SimConfig {
        cache_size: 1024,
        memory_size: 65536,
        offset_bits: 8,
    };

    #[test]
    fn test_config_deser() {
        let json = r#"{ "cache_size": 1024, "memory_size": 65536, "offset_bits": 8 }"#;
        let config = SimConfig::deser(json.as_bytes()).unwrap();
        assert_eq!(config, EXAMPLE);
        assert!(SimConfig::deser(r#"{ "cache_size": 1024 }"#.as_bytes()).is_err());
    }

    #[test]
    fn test_config_rejects_cache_larger_than_memory() {
        let config = SimConfig {
            cache_size: 4096,
            memory_size: 1024,
            offset_bits: 2,
        };
        assert!(matches!(
            Simulator::new(&config),
            Err(geometry::ConfigError::CacheExceedsMemory { .. })
        ));
    }

    #[test]
    fn test_replay_counted_session() {
        let trace = Trace::parse("3 1A3 5A3 5A3\n2 5A3 1A3\n", TraceFormat::Counted).unwrap();
        let mut sim = Simulator::new(&EXAMPLE).unwrap();
        let events = sim.replay(&trace);
        assert_eq!(events.len(), 5);
        assert!(matches!(events[0], Event::Read(r) if r.kind == AccessKind::Miss));
        assert!(matches!(
            events[1],
            Event::Read(AccessResult {
                kind: AccessKind::MissWithEviction { .. },
                ..
            })
        ));
        assert!(matches!(events[2], Event::Read(r) if r.kind.is_hit()));
        assert!(matches!(events[3], Event::Write(w) if w.outcome == WriteOutcome::Updated));
        assert!(matches!(events[4], Event::Write(w) if w.outcome == WriteOutcome::NotPresent));

        let report = sim.report();
        assert_eq!(report.accesses, 5);
        assert_eq!(report.lines.len(), 4);
        assert_eq!(
            report.lines[1],
            LineEntry {
                index: 1,
                valid: true,
                tag: Some(1),
                dirty: true
            }
        );
        assert_eq!(
            (report.stat.hits(), report.stat.misses(), report.stat.evictions()),
            (1, 2, 1)
        );
    }

    #[test]
    fn test_report_json() {
        let mut sim = Simulator::new(&EXAMPLE).unwrap();
        let report = serde_json::to_value(sim.report()).unwrap();
        assert_eq!(report["hit_rate"], serde_json::Value::Null);
        assert_eq!(report["lines"].as_array().unwrap().len(), 4);
        assert_eq!(report["lines"][0]["tag"], serde_json::Value::Null);

        sim.step(Access::read(0x3_01A3));
        let report = serde_json::to_value(sim.report()).unwrap();
        assert_eq!(report["truncated"], 1);
        assert_eq!(report["hit_rate"], 0.0);
        assert_eq!(report["geometry"]["tag_bits"], 6);

        let event = serde_json::to_value(sim.step(Access::read(0x1A3))).unwrap();
        assert_eq!(event["op"], "read");
        assert_eq!(event["kind"], "hit");
        assert_eq!(event["decoded"]["index"], 1);
    }

    #[cfg(feature = "stat")]
    #[test]
    fn test_collect_stat() {
        let mut sim = Simulator::new(&EXAMPLE).unwrap();
        sim.step(Access::read(0x1A3));
        let out = sim.collect_stat().view(80).to_string();
        assert!(out.contains("replay stat:"));
        assert!(out.contains("cache stat:"));
    }

    #[cfg(feature = "stat")]
    #[test]
    fn test_elapsed_excludes_idle_time() {
        let mut sim = Simulator::new(&EXAMPLE).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));
        sim.step(Access::read(0x1A3));
        std::thread::sleep(std::time::Duration::from_millis(50));
        sim.step(Access::write(0x1A3));
        assert!(sim.stat_builder.busy() < std::time::Duration::from_millis(50));
        let out = sim.collect_stat().view(80).to_string();
        assert!(out.contains("accesses:              2"));
    }

    #[test]
    fn test_report_lists_absent_writes() {
        let mut sim = Simulator::new(&EXAMPLE).unwrap();
        sim.step(Access::write(0x1A3));
        sim.step(Access::read(0x5A3));
        assert!(!sim.step(Access::write(0x5A3)).is_absent_write());
        assert!(sim.step(Access::write(0x9A3)).is_absent_write());
        let report = sim.report();
        assert_eq!(report.absent_writes, vec![0x1A3, 0x9A3]);
        assert_eq!(report.stat.absent_writes(), 2);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["absent_writes"], serde_json::json!([0x1A3, 0x9A3]));
    }
}
