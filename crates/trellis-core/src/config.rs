use std::env;

/// Runtime tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Upper bound on re-renders of one instance caused by updates it
    /// dispatches to itself while rendering.
    pub max_render_passes: usize,
    /// Emit a `trace` record for every host mutation.
    pub trace_mutations: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_render_passes: 25,
            trace_mutations: false,
        }
    }
}

impl RuntimeConfig {
    pub const MAX_RENDER_PASSES_VAR: &'static str = "TRELLIS_MAX_RENDER_PASSES";
    pub const TRACE_VAR: &'static str = "TRELLIS_TRACE";

    /// Defaults overridden by `TRELLIS_MAX_RENDER_PASSES` and `TRELLIS_TRACE`.
    pub fn from_env() -> Self {
        Self::default().apply_overrides(
            env::var(Self::MAX_RENDER_PASSES_VAR).ok().as_deref(),
            env::var(Self::TRACE_VAR).ok().as_deref(),
        )
    }

    fn apply_overrides(mut self, passes: Option<&str>, trace: Option<&str>) -> Self {
        if let Some(raw) = passes {
            match raw.trim().parse::<usize>() {
                Ok(value) if value > 0 => self.max_render_passes = value,
                _ => log::warn!(
                    "ignoring {}={raw:?}; expected a positive integer",
                    Self::MAX_RENDER_PASSES_VAR
                ),
            }
        }
        if let Some(raw) = trace {
            self.trace_mutations = !matches!(raw.trim(), "" | "0" | "false" | "off");
        }
        self
    }

    pub fn with_max_render_passes(mut self, passes: usize) -> Self {
        self.max_render_passes = passes.max(1);
        self
    }

    pub fn with_trace_mutations(mut self, enabled: bool) -> Self {
        self.trace_mutations = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_defaults() {
        let config = RuntimeConfig::default().apply_overrides(Some("4"), Some("1"));
        assert_eq!(config.max_render_passes, 4);
        assert!(config.trace_mutations);
    }

    #[test]
    fn malformed_overrides_are_ignored() {
        let config = RuntimeConfig::default().apply_overrides(Some("zero"), Some("off"));
        assert_eq!(config, RuntimeConfig::default());
        let config = RuntimeConfig::default().apply_overrides(Some("0"), None);
        assert_eq!(config.max_render_passes, 25);
    }
}
