//! Role presets and system prompt resolution.
//!
//! A role selects the system prompt placed at the head of every upstream
//! conversation. Roles starting with [`CUSTOM_ROLE_PREFIX`] carry the prompt
//! text inline; any other role is looked up in the preset table.

use rustc_hash::FxHashMap;

/// Marker distinguishing an inline literal prompt from a preset name.
pub const CUSTOM_ROLE_PREFIX: &str = "#custom#";

/// Preset name whose prompt is used when no role (or an unknown role) is given.
pub const DEFAULT_ROLE: &str = "general";

const BUILTIN_PRESETS: &[(&str, &str)] = &[
    (
        DEFAULT_ROLE,
        "You are ChatGPT, a large language model trained by OpenAI. Answer as concisely as possible.",
    ),
    (
        "programmer",
        "You are an expert programmer. Answer with working code and a short explanation. Use fenced code blocks with a language tag.",
    ),
    (
        "tutor",
        "You are a patient tutor. Explain concepts step by step and check understanding with a short question at the end.",
    ),
];

/// Static role name to system prompt table.
#[derive(Debug, Clone)]
pub struct RolePresets {
    presets: FxHashMap<String, String>,
}

impl RolePresets {
    /// Build the table from the built-in presets, overridden and extended by
    /// `overrides`.
    #[must_use]
    pub fn new(overrides: &FxHashMap<String, String>) -> Self {
        let mut presets: FxHashMap<String, String> = BUILTIN_PRESETS
            .iter()
            .map(|(name, prompt)| ((*name).to_string(), (*prompt).to_string()))
            .collect();
        for (name, prompt) in overrides {
            presets.insert(name.clone(), prompt.clone());
        }
        Self { presets }
    }

    #[must_use]
    pub fn lookup(&self, role: &str) -> Option<&str> {
        self.presets.get(role).map(String::as_str)
    }

    #[must_use]
    pub fn default_prompt(&self) -> &str {
        self.lookup(DEFAULT_ROLE).unwrap_or(BUILTIN_PRESETS[0].1)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }

    /// Resolve the system prompt for a requested role.
    ///
    /// Precedence: custom prefix (suffix verbatim, never looked up), then a
    /// preset by name, then the default prompt.
    #[must_use]
    pub fn resolve_system_prompt<'a>(&'a self, role: Option<&'a str>) -> &'a str {
        let Some(role) = role else {
            return self.default_prompt();
        };
        if let Some(custom) = role.strip_prefix(CUSTOM_ROLE_PREFIX) {
            return custom;
        }
        self.lookup(role).unwrap_or_else(|| self.default_prompt())
    }
}

impl Default for RolePresets {
    fn default() -> Self {
        Self::new(&FxHashMap::default())
    }
}
