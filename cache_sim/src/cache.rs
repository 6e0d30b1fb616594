use std::fmt;

use serde::Serialize;

use crate::geometry::{self, DecodedAddr, Geometry};

/// One direct-mapped slot. `tag` and `dirty` are only meaningful while `valid`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheLine {
    valid: bool,
    tag: u64,
    dirty: bool,
}

impl CacheLine {
    pub fn is_valid(&self) -> bool {
        self.valid
    }
    pub fn tag(&self) -> Option<u64> {
        self.valid.then_some(self.tag)
    }
    pub fn is_dirty(&self) -> bool {
        self.valid && self.dirty
    }
    fn holds(&self, tag: u64) -> bool {
        self.valid && self.tag == tag
    }
    /// fresh copy from memory is clean
    fn load(&mut self, tag: u64) {
        self.valid = true;
        self.tag = tag;
        self.dirty = false;
    }
}

/// What a read-miss threw out. No write-back is modeled for dirty lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Evicted {
    pub tag: u64,
    pub dirty: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Hit,
    Miss,
    MissWithEviction { evicted: Evicted },
}

impl AccessKind {
    pub fn is_hit(&self) -> bool {
        matches!(self, AccessKind::Hit)
    }
    pub fn evicted(&self) -> Option<Evicted> {
        match self {
            AccessKind::MissWithEviction { evicted } => Some(*evicted),
            _ => None,
        }
    }
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessKind::Hit => write!(f, "Cache HIT"),
            AccessKind::Miss => write!(f, "Cache MISS"),
            AccessKind::MissWithEviction { evicted } => {
                write!(f, "Cache MISS -> Eviction of tag {:#x}", evicted.tag)?;
                if evicted.dirty {
                    write!(f, " (dirty, discarded)")?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessResult {
    pub address: u64,
    pub decoded: DecodedAddr,
    pub kind: AccessKind,
}

impl fmt::Display for AccessResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:#x}: {}", self.address, self.kind)?;
        if self.decoded.truncated {
            writeln!(f, "(address truncated to {:#x})", self.decoded.compose())?;
        }
        writeln!(f, "Instruction Breakdown:")?;
        write!(f, "{}", self.decoded.breakdown())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    Updated,
    /// write-miss; the line is not fetched
    NotPresent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteResult {
    pub address: u64,
    pub decoded: DecodedAddr,
    pub outcome: WriteOutcome,
}

impl WriteResult {
    pub fn is_updated(&self) -> bool {
        self.outcome == WriteOutcome::Updated
    }
}

impl fmt::Display for WriteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            WriteOutcome::Updated => write!(f, "{:#x}: Address is updated", self.address),
            WriteOutcome::NotPresent => write!(
                f,
                "{:#x}: Invalid, address is not present in cache.",
                self.address
            ),
        }
    }
}

/// Access counters. Every field only ever grows.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStat {
    hits: usize,
    misses: usize,
    evictions: usize,
    updates: usize,
    absent_writes: usize,
}

impl CacheStat {
    pub fn hits(&self) -> usize {
        self.hits
    }
    pub fn misses(&self) -> usize {
        self.misses
    }
    pub fn evictions(&self) -> usize {
        self.evictions
    }
    pub fn updates(&self) -> usize {
        self.updates
    }
    pub fn absent_writes(&self) -> usize {
        self.absent_writes
    }
    pub fn reads(&self) -> usize {
        self.hits + self.misses
    }
    /// percentage of reads that hit; `None` before the first read.
    pub fn hit_rate(&self) -> Option<f64> {
        self.rate(self.hits)
    }
    /// percentage of reads that missed; `None` before the first read.
    pub fn miss_rate(&self) -> Option<f64> {
        self.rate(self.misses)
    }
    fn rate(&self, n: usize) -> Option<f64> {
        match self.reads() {
            0 => None,
            total => Some(100. * n as f64 / total as f64),
        }
    }
}

/// Row of the line table as shown to reporting code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineEntry {
    pub index: usize,
    pub valid: bool,
    pub tag: Option<u64>,
    pub dirty: bool,
}

pub struct DirectMappedCache {
    geometry: Geometry,
    lines: Vec<CacheLine>,
    stat: CacheStat,
}

impl DirectMappedCache {
    pub fn new(cache_size: u64, block_size: u64, memory_size: u64) -> geometry::Result<Self> {
        Ok(Self::with_geometry(Geometry::new(
            cache_size,
            block_size,
            memory_size,
        )?))
    }

    pub fn with_geometry(geometry: Geometry) -> Self {
        log::info!("building direct-mapped cache: {geometry}");
        Self {
            geometry,
            lines: vec![CacheLine::default(); geometry.num_lines()],
            stat: CacheStat::default(),
        }
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }
    pub fn lines(&self) -> &[CacheLine] {
        &self.lines
    }
    pub fn line(&self, index: usize) -> Option<&CacheLine> {
        self.lines.get(index)
    }
    pub fn entries(&self) -> impl Iterator<Item = LineEntry> + '_ {
        self.lines.iter().enumerate().map(|(index, line)| LineEntry {
            index,
            valid: line.is_valid(),
            tag: line.tag(),
            dirty: line.is_dirty(),
        })
    }
    pub fn stat(&self) -> CacheStat {
        self.stat
    }
    pub fn hits(&self) -> usize {
        self.stat.hits
    }
    pub fn misses(&self) -> usize {
        self.stat.misses
    }
    pub fn evictions(&self) -> usize {
        self.stat.evictions
    }

    fn decode(&self, address: u64) -> DecodedAddr {
        let decoded = self.geometry.decode(address);
        if decoded.truncated {
            log::warn!(
                "address {address:#x} exceeds {} address bits; using {:#x}",
                self.geometry.address_bits(),
                decoded.compose()
            );
        }
        decoded
    }

    pub fn read(&mut self, address: u64) -> AccessResult {
        let decoded = self.decode(address);
        let line = &mut self.lines[decoded.index];
        let kind = if line.holds(decoded.tag) {
            self.stat.hits += 1;
            AccessKind::Hit
        } else {
            self.stat.misses += 1;
            let evicted = line.tag().map(|tag| Evicted {
                tag,
                dirty: line.is_dirty(),
            });
            line.load(decoded.tag);
            match evicted {
                Some(evicted) => {
                    self.stat.evictions += 1;
                    AccessKind::MissWithEviction { evicted }
                }
                None => AccessKind::Miss,
            }
        };
        log::debug!(
            "read {address:#x} (tag {:#x}, index {}, offset {:#x}): {kind}",
            decoded.tag,
            decoded.index,
            decoded.offset
        );
        AccessResult {
            address,
            decoded,
            kind,
        }
    }

    pub fn write(&mut self, address: u64) -> WriteResult {
        let decoded = self.decode(address);
        let line = &mut self.lines[decoded.index];
        let outcome = if line.holds(decoded.tag) {
            line.dirty = true;
            self.stat.updates += 1;
            log::debug!("write {address:#x}: line {} marked dirty", decoded.index);
            WriteOutcome::Updated
        } else {
            self.stat.absent_writes += 1;
            log::debug!("write {address:#x}: not present in cache");
            WriteOutcome::NotPresent
        };
        WriteResult {
            address,
            decoded,
            outcome,
        }
    }

    pub fn table(&self) -> LineTable<'_> {
        LineTable { cache: self }
    }
}

/// `Index | Valid | Tag | Dirty Bit` dump, tag in binary.
pub struct LineTable<'a> {
    cache: &'a DirectMappedCache,
}

impl fmt::Display for LineTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let g = self.cache.geometry;
        let index_width = (g.num_lines() - 1).to_string().len().max("Index".len());
        let tag_width = (g.tag_bits() as usize).max("Tag".len());
        writeln!(
            f,
            "{:>index_width$} | Valid | {:<tag_width$} | Dirty Bit",
            "Index", "Tag"
        )?;
        for entry in self.cache.entries() {
            let tag = match entry.tag {
                Some(_) if g.tag_bits() == 0 => "(none)".to_string(),
                Some(tag) => format!("{tag:0w$b}", w = g.tag_bits() as usize),
                None => "-".to_string(),
            };
            writeln!(
                f,
                "{:>index_width$} | {:<5} | {tag:<tag_width$} | {}",
                entry.index,
                bool_str(entry.valid),
                bool_str(entry.dirty)
            )?;
        }
        Ok(())
    }
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "True"
    } else {
        "False"
    }
}
