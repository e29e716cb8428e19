//! Pass configuration from flags and environment variables.
//!
//! Out-of-range values are fatal: the pass refuses to produce a binary whose
//! coverage feedback would silently disagree with what the fuzzer expects.

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Environment variable selecting the percentage of blocks that receive edge
/// counters.
pub const INST_RATIO_VAR: &str = "ANGORA_INST_RATIO";
/// Environment variable selecting the early-termination flavor.
pub const EARLY_TERMINATION_VAR: &str = "ANGORA_EARLY_TERMINATION";
/// Environment variable disabling the do-not-modify guard of the edge cutter.
pub const EARLY_AGGRESSIVE_VAR: &str = "ANGORA_EARLY_AGGRESSIVE";
/// Environment variable enabling per-condition location diagnostics.
pub const OUTPUT_COND_LOC_VAR: &str = "ANGORA_OUTPUT_COND_LOC";
/// Environment variable overriding the call-context depth.
pub const CUSTOM_FN_CTX_VAR: &str = "ANGORA_CUSTOM_FN_CTX";

/// Compilation mode of the pass.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Mode {
    /// Production fuzzing: edge counters plus a gated trace for the one
    /// comparison the fuzzer is currently tracking.
    Fast,
    /// Constraint collection: unguarded traces carrying operand values.
    Track,
    /// Taint-tracking-only builds of third-party code: declare the ABI and
    /// do nothing else.
    Dfsan,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(match self {
            Self::Fast => "fast",
            Self::Track => "track",
            Self::Dfsan => "dfsan",
        })
    }
}

/// How function-call context folds into coverage state.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ContextMode {
    /// Plain xor of caller context and call site. Recursion cancels itself
    /// out, which is the point.
    Xor,
    /// No call context at all.
    Disabled,
    /// Shift the old context right by `32 / depth` before xoring, bounding
    /// how many frames of history survive.
    Depth(u32),
}

impl ContextMode {
    /// Is call-context tracking active?
    pub fn enabled(self) -> bool {
        self != Self::Disabled
    }
}

/// Which early-termination flavor is active.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum EarlyTermination {
    /// No edges are cut.
    Disabled,
    /// Cut edges that leave can-reach-sink regions (the default).
    Static,
    /// Like `Static`; the runtime additionally arms its dynamic checks.
    Full,
}

impl EarlyTermination {
    /// Is the edge cutter active?
    pub fn enabled(self) -> bool {
        self != Self::Disabled
    }
}

/// A fatal configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The instrumentation ratio was unparsable or above 100.
    #[error("bad value of {INST_RATIO_VAR} (must be between 0 and 100)")]
    BadInstRatio,
    /// The context depth was unparsable or outside 0..=31.
    #[error("custom call context depth must be >= 0 and < 32, got {0:?}")]
    BadContextDepth(String),
}

/// Everything the pass needs to know before touching a module.
#[derive(Debug, Clone)]
pub struct Config {
    /// Compilation mode.
    pub mode: Mode,
    /// Percentage of blocks receiving edge counters, 0..=100.
    pub inst_ratio: u32,
    /// Call-context folding mode.
    pub context: ContextMode,
    /// Log every id and call-site draw.
    pub output_cond_loc: bool,
    /// Early-termination flavor.
    pub early_termination: EarlyTermination,
    /// Cut edges even inside functions reachable from sink paths.
    pub early_aggressive: bool,
    /// ABI list files.
    pub abilist_files: Vec<PathBuf>,
    /// Exploitation list files (categories: cmpfn, socket, source, sink,
    /// all, i0..i4).
    pub exploitation_files: Vec<PathBuf>,
    /// Where track mode writes the comparison CFG.
    pub cfg_out: Option<PathBuf>,
}

impl Config {
    /// A default configuration for `mode`: every block counted, xor
    /// contexts, static early termination, no list files.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            inst_ratio: 100,
            context: ContextMode::Xor,
            output_cond_loc: false,
            early_termination: EarlyTermination::Static,
            early_aggressive: false,
            abilist_files: Vec::new(),
            exploitation_files: Vec::new(),
            cfg_out: None,
        }
    }

    /// Build a configuration for `mode` from the process environment.
    pub fn from_env(mode: Mode) -> Result<Self, ConfigError> {
        Self::from_lookup(mode, |key| env::var(key).ok())
    }

    /// Build a configuration for `mode`, reading variables through `get`.
    pub fn from_lookup(
        mode: Mode,
        get: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::new(mode);

        if let Some(ratio) = get(INST_RATIO_VAR) {
            config.inst_ratio = ratio
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|&r| r <= 100)
                .ok_or(ConfigError::BadInstRatio)?;
        }

        config.early_termination = match get(EARLY_TERMINATION_VAR).as_deref() {
            None | Some("static") => EarlyTermination::Static,
            Some("full") => EarlyTermination::Full,
            Some(_) => EarlyTermination::Disabled,
        };
        config.early_aggressive = get(EARLY_AGGRESSIVE_VAR).is_some();
        config.output_cond_loc = get(OUTPUT_COND_LOC_VAR).is_some();

        if let Some(depth) = get(CUSTOM_FN_CTX_VAR) {
            let parsed = depth
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|&d| d < 32)
                .ok_or(ConfigError::BadContextDepth(depth))?;
            config.context = match parsed {
                0 => ContextMode::Disabled,
                d => ContextMode::Depth(d),
            };
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|&(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = Config::from_lookup(Mode::Fast, vars(&[])).unwrap();
        assert_eq!(config.inst_ratio, 100);
        assert_eq!(config.context, ContextMode::Xor);
        assert_eq!(config.early_termination, EarlyTermination::Static);
        assert!(!config.early_aggressive);
    }

    #[test]
    fn inst_ratio_range() {
        let config =
            Config::from_lookup(Mode::Fast, vars(&[(INST_RATIO_VAR, "0")])).unwrap();
        assert_eq!(config.inst_ratio, 0);

        assert!(Config::from_lookup(Mode::Fast, vars(&[(INST_RATIO_VAR, "101")])).is_err());
        assert!(Config::from_lookup(Mode::Fast, vars(&[(INST_RATIO_VAR, "half")])).is_err());
    }

    #[test]
    fn context_depth() {
        let config =
            Config::from_lookup(Mode::Fast, vars(&[(CUSTOM_FN_CTX_VAR, "0")])).unwrap();
        assert_eq!(config.context, ContextMode::Disabled);

        let config =
            Config::from_lookup(Mode::Fast, vars(&[(CUSTOM_FN_CTX_VAR, "8")])).unwrap();
        assert_eq!(config.context, ContextMode::Depth(8));

        assert!(Config::from_lookup(Mode::Fast, vars(&[(CUSTOM_FN_CTX_VAR, "32")])).is_err());
        assert!(Config::from_lookup(Mode::Fast, vars(&[(CUSTOM_FN_CTX_VAR, "-1")])).is_err());
    }

    #[test]
    fn early_termination_values() {
        let et = |v: Option<&str>| {
            let pairs: Vec<(&str, &str)> = v.map(|v| (EARLY_TERMINATION_VAR, v)).into_iter().collect();
            Config::from_lookup(Mode::Fast, vars(&pairs))
                .unwrap()
                .early_termination
        };
        assert_eq!(et(None), EarlyTermination::Static);
        assert_eq!(et(Some("static")), EarlyTermination::Static);
        assert_eq!(et(Some("full")), EarlyTermination::Full);
        assert_eq!(et(Some("off")), EarlyTermination::Disabled);
    }
}
