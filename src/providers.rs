//! Named OpenAI-compatible upstreams, so a config only has to say `name = "groq"`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    /// Chat Completions root, without a trailing slash.
    pub base_url: &'static str,
    pub default_api_key_env: &'static str,
    /// Local servers accept unauthenticated requests.
    pub requires_api_key: bool,
}

const fn hosted(name: &'static str, base_url: &'static str, key_env: &'static str) -> ProviderPreset {
    ProviderPreset {
        name,
        base_url,
        default_api_key_env: key_env,
        requires_api_key: true,
    }
}

const fn local(name: &'static str, base_url: &'static str) -> ProviderPreset {
    ProviderPreset {
        name,
        base_url,
        default_api_key_env: "",
        requires_api_key: false,
    }
}

const PRESETS: &[ProviderPreset] = &[
    hosted("openai", "https://api.openai.com/v1", "OPENAI_API_KEY"),
    hosted("openrouter", "https://openrouter.ai/api/v1", "OPENROUTER_API_KEY"),
    hosted("fireworks", "https://api.fireworks.ai/inference/v1", "FIREWORKS_API_KEY"),
    hosted("grok", "https://api.x.ai/v1", "XAI_API_KEY"),
    hosted("together", "https://api.together.xyz/v1", "TOGETHER_API_KEY"),
    hosted("groq", "https://api.groq.com/openai/v1", "GROQ_API_KEY"),
    hosted("deepseek", "https://api.deepseek.com/v1", "DEEPSEEK_API_KEY"),
    // OpenAI-compatible surfaces of the vendors' native APIs
    hosted("anthropic", "https://api.anthropic.com/v1", "ANTHROPIC_API_KEY"),
    hosted(
        "gemini",
        "https://generativelanguage.googleapis.com/v1beta/openai",
        "GEMINI_API_KEY",
    ),
    local("ollama", "http://localhost:11434/v1"),
    local("llamacpp", "http://localhost:8080/v1"),
];

impl ProviderPreset {
    /// Case-insensitive lookup.
    #[must_use]
    pub fn from_name(name: &str) -> Option<&'static ProviderPreset> {
        PRESETS.iter().find(|p| p.name.eq_ignore_ascii_case(name))
    }

    #[must_use]
    pub fn all() -> &'static [ProviderPreset] {
        PRESETS
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        PRESETS.iter().map(|p| p.name)
    }
}
