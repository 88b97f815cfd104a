// Matcher profiles and per-codec match parameters.
//
// A profile bounds how hard the hash chain is searched; the codec
// parameters bound what a legal match looks like on the wire.

/// DEFLATE minimum match length.
pub const DEFLATE_MIN_MATCH: usize = 3;

/// DEFLATE maximum match length.
pub const DEFLATE_MAX_MATCH: usize = 258;

/// LZ4 / Snappy minimum match length.
pub const LZ4_MIN_MATCH: usize = 4;

/// LZ4: the last 5 bytes of a block are always literals.
pub const LZ4_END_LITERALS: usize = 5;

/// LZ4: the last match must start at least 12 bytes before the block end.
pub const LZ4_MATCH_START_MARGIN: usize = 12;

/// LZ4 offsets are 16-bit.
pub const LZ4_MAX_OFFSET: usize = 65_535;

/// Matcher search profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatcherProfile {
    /// Name for display purposes.
    pub name: &'static str,
    /// Maximum chain entries examined per position.
    pub max_chain: usize,
    /// Chain budget for the lazy probe at `p + 1`.
    pub lazy_chain: usize,
    /// Matches at least this long skip the lazy probe (0 disables lazy mode).
    pub max_lazy: usize,
    /// Match length considered "long enough" to stop searching.
    pub nice_length: usize,
}

impl MatcherProfile {
    /// Whether the lazy probe is enabled.
    pub fn is_lazy(&self) -> bool {
        self.max_lazy > 0
    }

    /// Whether any matching happens at all.
    pub fn is_literal_only(&self) -> bool {
        self.max_chain == 0
    }
}

/// Compression levels mapping to profiles.
///
/// - Level 0: literals only
/// - Level 1: fastest
/// - Level 2: faster
/// - Levels 3-5: fast
/// - Level 6: default
/// - Levels 7-9: slow
pub fn profile_for_level(level: u32) -> MatcherProfile {
    match level {
        0 => LITERAL_ONLY,
        1 => FASTEST,
        2 => FASTER,
        3..=5 => FAST,
        6 => DEFAULT,
        _ => SLOW,
    }
}

// ---------------------------------------------------------------------------
// Profile definitions
// ---------------------------------------------------------------------------

pub const LITERAL_ONLY: MatcherProfile = MatcherProfile {
    name: "literal",
    max_chain: 0,
    lazy_chain: 0,
    max_lazy: 0,
    nice_length: 0,
};

pub const FASTEST: MatcherProfile = MatcherProfile {
    name: "fastest",
    max_chain: 4,
    lazy_chain: 0,
    max_lazy: 0,
    nice_length: 8,
};

pub const FASTER: MatcherProfile = MatcherProfile {
    name: "faster",
    max_chain: 8,
    lazy_chain: 0,
    max_lazy: 0,
    nice_length: 16,
};

pub const FAST: MatcherProfile = MatcherProfile {
    name: "fast",
    max_chain: 16,
    lazy_chain: 8,
    max_lazy: 16,
    nice_length: 32,
};

pub const DEFAULT: MatcherProfile = MatcherProfile {
    name: "default",
    max_chain: 128,
    lazy_chain: 32,
    max_lazy: 32,
    nice_length: 128,
};

pub const SLOW: MatcherProfile = MatcherProfile {
    name: "slow",
    max_chain: 1024,
    lazy_chain: 256,
    max_lazy: 258,
    nice_length: 258,
};

// ---------------------------------------------------------------------------
// Codec match parameters
// ---------------------------------------------------------------------------

/// Legal-match constraints for one codec plus the search profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchParams {
    /// Shortest match emitted.
    pub min_match: usize,
    /// Longest match emitted (`usize::MAX` for unbounded).
    pub max_match: usize,
    /// Largest offset emitted.
    pub window: usize,
    /// Trailing bytes of a block that must be literals.
    pub end_literals: usize,
    /// A match may start at `pos` only if `pos + match_start_margin <= len`.
    pub match_start_margin: usize,
    /// Search profile.
    pub profile: MatcherProfile,
}

impl MatchParams {
    /// DEFLATE family: minMatch 3, max 258, window up to 32 KiB.
    pub fn deflate(window: usize, level: u32) -> Self {
        Self {
            min_match: DEFLATE_MIN_MATCH,
            max_match: DEFLATE_MAX_MATCH,
            window: window.clamp(1, 32 * 1024),
            end_literals: 0,
            match_start_margin: DEFLATE_MIN_MATCH,
            profile: profile_for_level(level),
        }
    }

    /// LZ4 block rules: minMatch 4, 16-bit offsets, literal tail.
    pub fn lz4(window: usize, level: u32) -> Self {
        Self {
            min_match: LZ4_MIN_MATCH,
            max_match: usize::MAX,
            window: window.clamp(1, LZ4_MAX_OFFSET),
            end_literals: LZ4_END_LITERALS,
            match_start_margin: LZ4_MATCH_START_MARGIN,
            profile: profile_for_level(level),
        }
    }

    /// Snappy: minMatch 4; long copies are split by the packer.
    pub fn snappy(window: usize, level: u32) -> Self {
        Self {
            min_match: LZ4_MIN_MATCH,
            max_match: usize::MAX,
            window: window.clamp(1, LZ4_MAX_OFFSET),
            end_literals: 0,
            match_start_margin: LZ4_MIN_MATCH,
            profile: profile_for_level(level),
        }
    }
}
