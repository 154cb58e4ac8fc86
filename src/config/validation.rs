use crate::config::schema::{AIConfig, AppConfig, OrchestratorConfig, ProviderConfig};
use crate::error::{AppError, Result};
use std::path::Path;

/// Validate the whole configuration before the bridge is built
pub fn validate_config(config: &AppConfig) -> Result<()> {
    validate_orchestrator(&config.orchestrator)?;
    validate_ai(&config.ai)?;

    if config.browser.load_timeout_ms == 0 {
        return Err(AppError::Validation(
            "browser.load_timeout_ms must be greater than zero".to_string(),
        ));
    }
    if config.browser.max_content_chars == 0 {
        return Err(AppError::Validation(
            "browser.max_content_chars must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Room reserved for the message that precedes extracted page text
pub const TURN_HEADER_CHARS: usize = 512;

/// Validate orchestration budgets
pub fn validate_orchestrator(config: &OrchestratorConfig) -> Result<()> {
    if config.max_steps == 0 {
        return Err(AppError::Validation(
            "orchestrator.max_steps must be at least 1".to_string(),
        ));
    }
    if config.deadline_seconds == 0 {
        return Err(AppError::Validation(
            "orchestrator.deadline_seconds must be greater than zero".to_string(),
        ));
    }
    if config.max_context_turns == 0 {
        return Err(AppError::Validation(
            "orchestrator.max_context_turns must be at least 1".to_string(),
        ));
    }
    if config.max_turn_chars == 0 {
        return Err(AppError::Validation(
            "orchestrator.max_turn_chars must be at least 1".to_string(),
        ));
    }
    // One full extraction plus its result header has to fit
    if config.context_char_budget < config.max_turn_chars + TURN_HEADER_CHARS {
        return Err(AppError::Validation(format!(
            "orchestrator.context_char_budget ({}) must be at least max_turn_chars ({}) + {}",
            config.context_char_budget, config.max_turn_chars, TURN_HEADER_CHARS
        )));
    }
    Ok(())
}

/// Validate AI provider settings
pub fn validate_ai(config: &AIConfig) -> Result<()> {
    if config.request_timeout_seconds == 0 {
        return Err(AppError::Validation(
            "ai.request_timeout_seconds must be greater than zero".to_string(),
        ));
    }

    for (id, provider) in &config.providers {
        validate_provider(id, provider)?;
    }

    if let Some(selection) = &config.default_llm {
        let (provider_id, _) = parse_model_selection(selection)?;
        if !config.providers.contains_key(provider_id) {
            return Err(AppError::Validation(format!(
                "default_llm refers to unknown provider '{}'",
                provider_id
            )));
        }
    }

    Ok(())
}

fn validate_provider(id: &str, provider: &ProviderConfig) -> Result<()> {
    let parsed = url::Url::parse(&provider.base_url).map_err(|e| {
        AppError::Validation(format!(
            "Provider '{}' has invalid base_url {}: {}",
            id, provider.base_url, e
        ))
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::Validation(format!(
            "Provider '{}' base_url must start with http:// or https://",
            id
        )));
    }
    Ok(())
}

/// Split a "provider_id:model_name" selection
pub fn parse_model_selection(selection: &str) -> Result<(&str, &str)> {
    match selection.split_once(':') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            Ok((provider, model))
        }
        _ => Err(AppError::Validation(format!(
            "Invalid model selection '{}'. Expected 'provider_id:model_name'",
            selection
        ))),
    }
}

/// Validate Chrome executable path
pub fn validate_chrome_path(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(AppError::Validation(format!(
            "Chrome executable not found at {:?}",
            path
        )));
    }

    if !path.is_file() {
        return Err(AppError::Validation(format!(
            "Chrome path {:?} is not a file",
            path
        )));
    }

    // On Unix systems, check if executable
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = path.metadata().map_err(|e| {
            AppError::Validation(format!("Cannot read Chrome file metadata: {}", e))
        })?;
        if metadata.permissions().mode() & 0o111 == 0 {
            return Err(AppError::Validation(format!(
                "Chrome executable {:?} is not executable",
                path
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ApiType;

    fn provider(base_url: &str) -> ProviderConfig {
        ProviderConfig {
            name: "Test".to_string(),
            api_type: ApiType::Openai,
            base_url: base_url.to_string(),
            api_key: None,
            api_key_env: None,
            models: vec![],
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&AppConfig::default()).is_ok());
    }

    #[test]
    fn test_zero_step_budget_rejected() {
        let mut config = AppConfig::default();
        config.orchestrator.max_steps = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_context_budget_must_hold_one_extraction() {
        let mut config = AppConfig::default();
        config.orchestrator.context_char_budget = 3000;
        config.orchestrator.max_turn_chars = 4000;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("context_char_budget"));

        config.orchestrator.context_char_budget = 4000 + TURN_HEADER_CHARS;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_default_provider_rejected() {
        let mut config = AppConfig::default();
        config.ai.default_llm = Some("missing:gpt-4o".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown provider"));
    }

    #[test]
    fn test_invalid_provider_url_rejected() {
        let mut config = AppConfig::default();
        config
            .ai
            .providers
            .insert("bad".to_string(), provider("ftp://example.com"));
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_parse_model_selection() {
        assert_eq!(
            parse_model_selection("openai:gpt-4o-mini").unwrap(),
            ("openai", "gpt-4o-mini")
        );
        // Model names may themselves contain colons (ollama tags)
        assert_eq!(
            parse_model_selection("local:llama3:8b").unwrap(),
            ("local", "llama3:8b")
        );
        assert!(parse_model_selection("gpt-4").is_err());
        assert!(parse_model_selection(":gpt-4").is_err());
    }

    #[test]
    fn test_missing_chrome_path() {
        assert!(validate_chrome_path(Path::new("/definitely/not/chrome")).is_err());
    }
}
