//! Engine parameters

use shadowfp_ir::RegOffset;

/// Default precision of the `value` shadow channel, in bits.
pub const DEFAULT_PRECISION: u32 = 120;

/// Number of addressable IR temporaries per block.
pub const MAX_TEMPS: usize = 1024;

/// Number of addressable guest register byte offsets.
pub const MAX_REGISTERS: usize = 1024;

/// Number of stage slots.
pub const MAX_STAGES: usize = 64;

/// Byte offset of the guest instruction pointer; puts there are never
/// shadowed.
pub const REG_OFFSET_IP: RegOffset = 168;

/// Exponent floor emulating the IEEE-754 double range (MPFR convention:
/// the smallest subnormal `2^-1074` has exponent `-1073`).
pub const EMU_EXP_MIN: i64 = -1073;

/// Exponent ceiling emulating the IEEE-754 double range.
pub const EMU_EXP_MAX: i64 = 1024;

/// Maximum records written to a single report file.
pub const MAX_ENTRIES_PER_FILE: usize = 10_000;

/// Maximum dependency graphs dumped per report.
pub const MAX_DUMPED_GRAPHS: u32 = 10;

/// Maximum depth of a dumped dependency graph.
pub const MAX_LEVEL_OF_GRAPH: u32 = 10;

/// Fraction of executions at an origin that must inflate error for the
/// origin to qualify as a precision-specific operation.
pub const PSO_ERR_RATIO: f64 = 0.7;

/// Fraction of near-zero inflations above which a PSO candidate is a
/// false positive.
pub const PSO_OVERFLOW_RATIO: f64 = 0.1;

/// Relative-error inflation factor that flags a PSO execution.
pub const PSO_INFLATION: f64 = 1e6;

/// Original magnitudes below this participate in the false-positive test.
pub const PSO_TINY_ORIGINAL: f64 = 1e-9;

/// Shadow magnitudes below this participate in the false-positive test.
pub const PSO_TINY_SHADOW: f64 = 1e-15;
