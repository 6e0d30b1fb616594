use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// upper bound on index bits, i.e. at most 2^24 lines in the table.
pub const MAX_INDEX_BITS: u32 = 24;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{what} must be a positive power of two, got {value}")]
    NotPowerOfTwo { what: &'static str, value: u64 },
    #[error("cache size {cache_size} is greater than memory size {memory_size}")]
    CacheExceedsMemory { cache_size: u64, memory_size: u64 },
    #[error("block size {block_size} is greater than cache size {cache_size}")]
    BlockExceedsCache { block_size: u64, cache_size: u64 },
    #[error("{offset_bits} offset bits do not fit in a 64-bit address")]
    OffsetBitsTooWide { offset_bits: u32 },
    #[error("{index_bits} index bits exceed the limit of {max}", max = MAX_INDEX_BITS)]
    TooManyLines { index_bits: u32 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

fn ensure_power_of_two(what: &'static str, value: u64) -> Result<()> {
    if value.is_power_of_two() {
        Ok(())
    } else {
        Err(ConfigError::NotPowerOfTwo { what, value })
    }
}

#[inline]
fn mask(bits: u32) -> u64 {
    if bits >= u64::BITS {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

/// Bit layout of an address: `| tag | index | offset |`, most significant first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Geometry {
    tag_bits: u32,
    index_bits: u32,
    offset_bits: u32,
}

impl Geometry {
    pub fn new(cache_size: u64, block_size: u64, memory_size: u64) -> Result<Self> {
        ensure_power_of_two("cache size", cache_size)?;
        ensure_power_of_two("block size", block_size)?;
        ensure_power_of_two("memory size", memory_size)?;
        if cache_size > memory_size {
            return Err(ConfigError::CacheExceedsMemory {
                cache_size,
                memory_size,
            });
        }
        if block_size > cache_size {
            return Err(ConfigError::BlockExceedsCache {
                block_size,
                cache_size,
            });
        }
        // all three are powers of two, so log2 is exact
        let offset_bits = block_size.trailing_zeros();
        let index_bits = (cache_size / block_size).trailing_zeros();
        let tag_bits = memory_size.trailing_zeros() - index_bits - offset_bits;
        if index_bits > MAX_INDEX_BITS {
            return Err(ConfigError::TooManyLines { index_bits });
        }
        Ok(Self {
            tag_bits,
            index_bits,
            offset_bits,
        })
    }

    /// Block size given as an exponent, `block_size == 2^offset_bits`.
    pub fn from_offset_bits(cache_size: u64, memory_size: u64, offset_bits: u32) -> Result<Self> {
        if offset_bits >= u64::BITS {
            return Err(ConfigError::OffsetBitsTooWide { offset_bits });
        }
        Self::new(cache_size, 1 << offset_bits, memory_size)
    }

    pub fn tag_bits(&self) -> u32 {
        self.tag_bits
    }
    pub fn index_bits(&self) -> u32 {
        self.index_bits
    }
    pub fn offset_bits(&self) -> u32 {
        self.offset_bits
    }
    /// `log2(memory_size)`
    pub fn address_bits(&self) -> u32 {
        self.tag_bits + self.index_bits + self.offset_bits
    }
    pub fn num_lines(&self) -> usize {
        1 << self.index_bits
    }
    pub fn block_size(&self) -> u64 {
        1 << self.offset_bits
    }
    pub fn cache_size(&self) -> u64 {
        self.block_size() << self.index_bits
    }
    pub fn memory_size(&self) -> u64 {
        1 << self.address_bits()
    }

    /// Splits `address` into its fields.
    ///
    /// Bits at or above [`Self::address_bits`] are dropped and the result is
    /// flagged as `truncated`; this never fails.
    pub fn decode(&self, address: u64) -> DecodedAddr {
        let offset = address & mask(self.offset_bits);
        let index = (address >> self.offset_bits) & mask(self.index_bits);
        let tag = (address >> (self.index_bits + self.offset_bits)) & mask(self.tag_bits);
        DecodedAddr {
            tag,
            index: index as usize,
            offset,
            truncated: address & !mask(self.address_bits()) != 0,
            geometry: *self,
        }
    }
}

impl fmt::Display for Geometry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "tag {} / index {} / offset {} bits ({} lines of {} bytes)",
            self.tag_bits,
            self.index_bits,
            self.offset_bits,
            self.num_lines(),
            self.block_size()
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DecodedAddr {
    pub tag: u64,
    pub index: usize,
    pub offset: u64,
    /// address had bits set beyond the address space
    pub truncated: bool,
    #[serde(skip)]
    geometry: Geometry,
}

impl DecodedAddr {
    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    /// Reassembles the significant bits of the decoded address.
    pub fn compose(&self) -> u64 {
        let g = &self.geometry;
        self.offset
            | (self.index as u64) << g.offset_bits
            | self.tag << (g.index_bits + g.offset_bits)
    }

    pub fn breakdown(&self) -> Breakdown<'_> {
        Breakdown { decoded: self }
    }
}

/// Bit patterns of each field, padded to the field width.
pub struct Breakdown<'a> {
    decoded: &'a DecodedAddr,
}

impl fmt::Display for Breakdown<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn field(f: &mut fmt::Formatter<'_>, name: &str, value: u64, width: u32) -> fmt::Result {
            if width == 0 {
                writeln!(f, "{name:<13}(none)")
            } else {
                let width = width as usize;
                writeln!(f, "{name:<13}{value:0width$b}")
            }
        }
        let d = self.decoded;
        let g = &d.geometry;
        field(f, "Tag bits:", d.tag, g.tag_bits)?;
        field(f, "Index bits:", d.index as u64, g.index_bits)?;
        field(f, "Offset bits:", d.offset, g.offset_bits)
    }
}
