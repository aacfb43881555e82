//! Configuration read from `OPJIT_*` environment variables, once per
//! process.

use std::sync::OnceLock;

use opjit::{JitOptions, OptLevel};

/// Process-wide JIT configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecConfig {
    /// `OPJIT_DISABLE`: never compile
    pub disabled: bool,
    /// `OPJIT_STATS`: log the counters when the JIT is released
    pub stats: bool,
    /// `OPJIT_OPT_LEVEL`, `OPJIT_VERIFY`, `OPJIT_ARENA_SIZE`
    pub options: JitOptions,
}

impl ExecConfig {
    /// Build the configuration from `lookup`, which maps a variable name
    /// to its value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let flag = |name: &str| lookup(name).is_some_and(|v| parse_env_truthy(&v));
        let mut options = JitOptions::default();

        if let Some(value) = lookup("OPJIT_OPT_LEVEL") {
            match OptLevel::parse(&value) {
                Some(level) => options.opt_level = level,
                None => tracing::warn!(
                    target: "opjit::exec",
                    value = value.as_str(),
                    "ignoring unknown OPJIT_OPT_LEVEL"
                ),
            }
        }
        if let Some(value) = lookup("OPJIT_VERIFY") {
            options.verify = parse_env_truthy(&value);
        }
        if let Some(size) = lookup("OPJIT_ARENA_SIZE")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|size| *size > 0)
        {
            options.arena_size = size;
        }

        Self {
            disabled: flag("OPJIT_DISABLE"),
            stats: flag("OPJIT_STATS"),
            options,
        }
    }

    fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }
}

static CONFIG: OnceLock<ExecConfig> = OnceLock::new();

/// The process configuration, read from the environment on first use.
pub fn config() -> &'static ExecConfig {
    CONFIG.get_or_init(ExecConfig::from_env)
}

/// Anything but empty, `0`, `false`, `off` or `no` (case-insensitive).
pub(crate) fn parse_env_truthy(value: &str) -> bool {
    let value = value.trim();
    !matches!(value, "" | "0")
        && !["false", "off", "no"]
            .iter()
            .any(|falsy| value.eq_ignore_ascii_case(falsy))
}
