//! # Allocation Tags
//!
//! Category labels attached to every allocation, and the per-tag counters
//! the [`MemorySystem`](super::MemorySystem) keeps for usage reports.

use std::fmt::{self, Write};

/// Category of an allocation, used only for accounting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MemoryTag {
    /// Uncategorized. Allocating with this tag logs a warning.
    Unknown = 0,
    /// Window objects.
    Window = 1,
    /// Backing blocks of linear allocators.
    LinearAllocator = 2,
    /// GPU-side buffers and textures.
    Graphics = 3,
    /// Input state.
    Input = 4,
    /// String storage.
    String = 5,
    /// Loaded asset data.
    Asset = 6,
    /// Application game state.
    Game = 7,
    /// Hash map buckets.
    HashMap = 8,
    /// Decoded images.
    Image = 9,
    /// Dynamic array elements.
    DArray = 10,
}

impl MemoryTag {
    /// Number of tags.
    pub const COUNT: usize = 11;

    /// Every tag, in report order.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Unknown,
        Self::Window,
        Self::LinearAllocator,
        Self::Graphics,
        Self::Input,
        Self::String,
        Self::Asset,
        Self::Game,
        Self::HashMap,
        Self::Image,
        Self::DArray,
    ];

    /// Returns the counter index of this tag.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Returns the tag stored at counter index `index`.
    #[must_use]
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Returns the label used in usage reports.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Window => "WINDOW",
            Self::LinearAllocator => "LINEAR ALLOCATOR",
            Self::Graphics => "GRAPHICS",
            Self::Input => "INPUT",
            Self::String => "STRING",
            Self::Asset => "ASSETS",
            Self::Game => "GAME",
            Self::HashMap => "HASH MAP",
            Self::Image => "IMAGE",
            Self::DArray => "DARRAY",
        }
    }
}

impl fmt::Display for MemoryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Snapshot of the allocation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes currently allocated.
    total_allocated: u64,
    /// Bytes currently allocated per tag.
    tagged: [u64; MemoryTag::COUNT],
    /// Number of live allocations.
    allocation_count: u64,
    /// Highest value `total_allocated` has reached.
    peak_allocated: u64,
}

impl MemoryStats {
    /// Bytes currently allocated across all tags.
    #[inline]
    #[must_use]
    pub const fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Bytes currently allocated under `tag`.
    #[inline]
    #[must_use]
    pub const fn tagged(&self, tag: MemoryTag) -> u64 {
        self.tagged[tag.index()]
    }

    /// Number of live allocations.
    #[inline]
    #[must_use]
    pub const fn allocation_count(&self) -> u64 {
        self.allocation_count
    }

    /// Highest number of bytes allocated at once.
    #[inline]
    #[must_use]
    pub const fn peak_allocated(&self) -> u64 {
        self.peak_allocated
    }

    /// Iterates `(tag, bytes)` pairs in report order.
    pub fn iter(&self) -> impl Iterator<Item = (MemoryTag, u64)> + '_ {
        MemoryTag::ALL.into_iter().map(|tag| (tag, self.tagged(tag)))
    }

    /// Formats the per-tag totals in human units.
    #[must_use]
    pub fn usage_report(&self) -> String {
        let mut report = String::from("System memory use (tagged):\n");
        for (tag, bytes) in self.iter() {
            // Writing to a String cannot fail.
            let _ = writeln!(report, "  {}: {}", tag.label(), format_bytes(bytes));
        }
        report
    }

    pub(crate) fn record_alloc(&mut self, tag: MemoryTag, size: u64) {
        self.total_allocated += size;
        self.tagged[tag.index()] += size;
        self.allocation_count += 1;
        self.peak_allocated = self.peak_allocated.max(self.total_allocated);
    }

    pub(crate) fn record_free(&mut self, tag: MemoryTag, size: u64) {
        self.total_allocated = self.total_allocated.saturating_sub(size);
        self.tagged[tag.index()] = self.tagged[tag.index()].saturating_sub(size);
        self.allocation_count = self.allocation_count.saturating_sub(1);
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.usage_report())
    }
}

/// Formats a byte count as `B`, `KiB`, `MiB` or `GiB` with two decimals.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn format_bytes(bytes: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * KIB;
    const GIB: u64 = 1024 * MIB;

    let (amount, unit) = if bytes >= GIB {
        (bytes as f64 / GIB as f64, "GiB")
    } else if bytes >= MIB {
        (bytes as f64 / MIB as f64, "MiB")
    } else if bytes >= KIB {
        (bytes as f64 / KIB as f64, "KiB")
    } else {
        (bytes as f64, "B")
    };
    format!("{amount:.2}{unit}")
}
