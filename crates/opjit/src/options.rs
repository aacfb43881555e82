//! Compiler options

/// Cranelift optimization level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimization
    None,
    /// Optimize for speed
    #[default]
    Speed,
    /// Optimize for speed and code size
    SpeedAndSize,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting.
    pub const fn as_setting(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Speed => "speed",
            Self::SpeedAndSize => "speed_and_size",
        }
    }

    /// Parse `none`, `speed` or `speed_and_size` (case-insensitive).
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        [Self::None, Self::Speed, Self::SpeedAndSize]
            .into_iter()
            .find(|level| value.eq_ignore_ascii_case(level.as_setting()))
    }
}

/// Default executable arena size (64 MiB).
pub const DEFAULT_ARENA_SIZE: usize = 64 << 20;

/// Options of a [`crate::JitCompiler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JitOptions {
    /// Optimization level
    pub opt_level: OptLevel,
    /// Run the Cranelift IR verifier on every function
    pub verify: bool,
    /// Bytes of executable memory to reserve
    pub arena_size: usize,
}

impl Default for JitOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::default(),
            verify: cfg!(debug_assertions),
            arena_size: DEFAULT_ARENA_SIZE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_level_parsing() {
        assert_eq!(OptLevel::parse("none"), Some(OptLevel::None));
        assert_eq!(OptLevel::parse(" Speed_And_Size "), Some(OptLevel::SpeedAndSize));
        assert_eq!(OptLevel::parse("fast"), None);
    }
}
