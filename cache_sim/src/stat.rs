use std::fmt;

use crate::cache::{CacheStat, DirectMappedCache};
use crate::geometry::Geometry;

pub trait Stat {
    fn view(&self, max_width: usize) -> Box<dyn StatView + '_>;
}

pub trait StatView: fmt::Display {
    /// header of stat
    fn header(&self) -> &'static str;
    /// body width
    fn width(&self) -> usize;
}

pub trait AddStats {
    /// add stat to `buf`.
    fn add_stats(&self, buf: &mut Stats);
}

#[derive(Default)]
pub struct Stats {
    stats: Vec<Box<dyn Stat>>,
}

impl Stats {
    pub fn push(&mut self, stat: Box<dyn Stat>) {
        self.stats.push(stat)
    }
    pub fn len(&self) -> usize {
        self.stats.len()
    }
    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}

pub struct StatAllView<'s> {
    views: Vec<Box<dyn StatView + 's>>,
}

impl Stats {
    pub fn view(&self, max_width: usize) -> StatAllView<'_> {
        StatAllView {
            views: self.stats.iter().map(|s| s.view(max_width)).collect(),
        }
    }
}

impl fmt::Display for StatAllView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .views
            .iter()
            .map(|s| s.header().len().max(s.width()))
            .max()
            .unwrap_or(0);
        writeln!(f, "{:-^width$}", " statistics ")?;
        for sv in &self.views {
            writeln!(f, "{}:", sv.header())?;
            writeln!(f, "{}", sv)?;
        }
        write!(f, "{:-<width$}", "")
    }
}

impl AddStats for DirectMappedCache {
    fn add_stats(&self, buf: &mut Stats) {
        buf.push(Box::new(self.geometry()));
        buf.push(Box::new(self.stat()));
    }
}

impl Stat for Geometry {
    fn view(&self, _: usize) -> Box<dyn StatView + '_> {
        Box::new(GeometryView { geometry: self })
    }
}

pub struct GeometryView<'a> {
    geometry: &'a Geometry,
}

impl StatView for GeometryView<'_> {
    fn header(&self) -> &'static str {
        "geometry"
    }
    fn width(&self) -> usize {
        33
    }
}

impl fmt::Display for GeometryView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.geometry;
        writeln!(f, "   cache size: {:>12} B", g.cache_size())?;
        writeln!(f, "  memory size: {:>12} B", g.memory_size())?;
        writeln!(f, "   block size: {:>12} B", g.block_size())?;
        writeln!(f, "        lines: {:>12}", g.num_lines())?;
        writeln!(
            f,
            "  tag/idx/off: {:>12}",
            format!("{}/{}/{}", g.tag_bits(), g.index_bits(), g.offset_bits())
        )
    }
}

impl Stat for CacheStat {
    fn view(&self, _: usize) -> Box<dyn StatView + '_> {
        Box::new(CacheStatView::new(self))
    }
}

pub struct CacheStatView<'a> {
    stat: &'a CacheStat,
}

impl<'a> CacheStatView<'a> {
    pub fn new(stat: &'a CacheStat) -> Self {
        Self { stat }
    }
}

impl StatView for CacheStatView<'_> {
    fn header(&self) -> &'static str {
        "cache stat"
    }
    fn width(&self) -> usize {
        33
    }
}

impl fmt::Display for CacheStatView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn pct(rate: Option<f64>) -> String {
            match rate {
                Some(r) => format!("{r:.2}%"),
                None => "n/a".to_string(),
            }
        }
        let s = self.stat;
        writeln!(f, "        hit: {:>10} ({:>8})", s.hits(), pct(s.hit_rate()))?;
        writeln!(f, "       miss: {:>10} ({:>8})", s.misses(), pct(s.miss_rate()))?;
        writeln!(f, "   eviction: {:>10}", s.evictions())?;
        writeln!(f, "    updated: {:>10}", s.updates())?;
        writeln!(f, "  not found: {:>10}", s.absent_writes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stat_view() {
        let mut c = DirectMappedCache::new(1024, 256, 65536).unwrap();
        let empty = CacheStatView::new(&c.stat()).to_string();
        assert!(empty.contains("hit:          0 (     n/a)"));
        c.read(0x0);
        c.read(0x0);
        c.read(0x0);
        c.read(0x400);
        c.write(0x800);
        let s = CacheStatView::new(&c.stat()).to_string();
        assert!(s.contains("hit:          2 (  50.00%)"));
        assert!(s.contains("eviction:          1"));
        assert!(s.contains("not found:          1"));
    }

    #[test]
    fn test_stats_view() {
        let c = DirectMappedCache::new(1024, 256, 65536).unwrap();
        let mut stats = Stats::default();
        c.add_stats(&mut stats);
        assert_eq!(stats.len(), 2);
        let out = stats.view(80).to_string();
        assert!(out.starts_with("---------- statistics ---------"));
        assert!(out.contains("geometry:\n"));
        assert!(out.contains("        lines:            4\n"));
    }
}
