//! Tunables and compile-time constants shared by `gp` and `lfht`.

use bitflags::bitflags;

/// Smallest bucket-array size a table will ever shrink to.
pub const MIN_TABLE_SIZE: usize = 1;

/// Highest `order` the order table can hold. Order `o` covers `2^(o-1)`
/// buckets, so `MAX_ORDER` bounds the table at `2^(MAX_ORDER-1)` buckets.
/// Pinned to the host pointer width: see DESIGN.md for why the upstream
/// `CAA_BITS_PER_lONG` macro this mirrors was left ambiguous.
pub const MAX_ORDER: usize = usize::BITS as usize;

static_assertions::const_assert!(MAX_ORDER >= 32);

/// Number of non-dummy reverse-hash transitions a chain may accumulate
/// before an `add` schedules a lazy grow (when `AUTO_RESIZE` is set).
pub const CHAIN_LEN_RESIZE_THRESHOLD: usize = 30;

/// Per-shard local counter updates are batched into the global approximate
/// count every `2^COMMIT_ORDER` updates.
pub const COMMIT_ORDER: u32 = 8;

bitflags! {
    /// Flags accepted by `Lfht::create`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Flags: u32 {
        /// Enable chain-length- and count-triggered lazy resizing.
        const AUTO_RESIZE = 1 << 0;
        // Bits 1..31 reserved for future flags.
    }
}

impl Default for Flags {
    fn default() -> Self {
        Flags::empty()
    }
}

/// Tunables for `GpEngine`'s writer-side busy-wait.
#[derive(Debug, Clone, Copy)]
pub struct GpEngineConfig {
    /// Number of spin iterations a `synchronize()` call performs on a
    /// straggling reader before yielding the thread back to the scheduler.
    pub spin_iterations_before_yield: u32,
}

impl Default for GpEngineConfig {
    fn default() -> Self {
        GpEngineConfig {
            spin_iterations_before_yield: 1000,
        }
    }
}
