/// A named provider preset for OpenAI-compatible APIs.
pub struct ProviderPreset {
    pub default_base_url: &'static str,
    pub needs_api_key: bool,
}

/// Look up a provider preset by name.
pub fn get_preset(provider: &str) -> Option<ProviderPreset> {
    match provider {
        "openai" => Some(ProviderPreset {
            default_base_url: "https://api.openai.com/v1/chat/completions",
            needs_api_key: true,
        }),
        "gemini" | "google" => Some(ProviderPreset {
            default_base_url:
                "https://generativelanguage.googleapis.com/v1beta/openai/chat/completions",
            needs_api_key: true,
        }),
        "ollama" => Some(ProviderPreset {
            default_base_url: "http://localhost:11434/v1/chat/completions",
            needs_api_key: false,
        }),
        "openrouter" => Some(ProviderPreset {
            default_base_url: "https://openrouter.ai/api/v1/chat/completions",
            needs_api_key: true,
        }),
        "groq" => Some(ProviderPreset {
            default_base_url: "https://api.groq.com/openai/v1/chat/completions",
            needs_api_key: true,
        }),
        _ => None,
    }
}

/// Chat completions endpoint for a configured base URL.
///
/// Accepts either a full endpoint or an API root like `https://host/v1`.
pub fn completions_url(base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    if trimmed.ends_with("/chat/completions") {
        trimmed.to_string()
    } else {
        format!("{}/chat/completions", trimmed)
    }
}

/// List all known preset provider names.
pub fn all_preset_names() -> &'static [&'static str] {
    &["openai", "gemini", "ollama", "openrouter", "groq"]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url() {
        assert_eq!(
            completions_url("http://localhost:8080/v1/"),
            "http://localhost:8080/v1/chat/completions"
        );
        assert_eq!(
            completions_url("https://api.openai.com/v1/chat/completions"),
            "https://api.openai.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_every_listed_preset_resolves() {
        for name in all_preset_names() {
            assert!(get_preset(name).is_some(), "missing preset {}", name);
        }
        assert!(get_preset("unknown").is_none());
        assert!(!get_preset("ollama").unwrap().needs_api_key);
    }
}
