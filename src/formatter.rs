//! LLM text formatter
//!
//! Punctuation, paragraphing and dialogue layout via an LLM, with a chained
//! fallback provider. This component never propagates errors: any provider
//! failure returns the input text unchanged.

use crate::domain::prompts::{build_format_prompt, strip_yo, too_short_to_format, FormatOptions};
use crate::error::Result;
use crate::ports::llm::{LlmConfig, LlmPort};
use std::sync::Arc;

/// LLM outputs shorter than this are treated as a provider failure
const MIN_LLM_OUTPUT_CHARS: usize = 5;

/// A named formatter provider with its request configuration
pub struct FormatterBackend {
    pub name: String,
    pub service: Arc<dyn LlmPort>,
    pub config: LlmConfig,
}

/// The formatter: an ordered provider chain behind one `format` call
pub struct Formatter {
    backends: Vec<FormatterBackend>,
}

impl Formatter {
    pub fn new(backends: Vec<FormatterBackend>) -> Self {
        Self { backends }
    }

    /// Format transcribed text.
    ///
    /// `preferred_backend` reorders the chain (user override or the
    /// orchestrator's dialogue policy); unknown names leave the chain as-is.
    /// Below ten words the LLM is skipped entirely.
    pub async fn format(
        &self,
        text: &str,
        options: FormatOptions,
        preferred_backend: Option<&str>,
    ) -> String {
        let formatted = if too_short_to_format(text) {
            log::info!(
                "Text too short for LLM formatting ({} words), returning original",
                text.split_whitespace().count()
            );
            text.to_string()
        } else {
            self.format_with_chain(text, options, preferred_backend).await
        };

        if options.use_yo {
            formatted
        } else {
            strip_yo(&formatted)
        }
    }

    async fn format_with_chain(
        &self,
        text: &str,
        options: FormatOptions,
        preferred_backend: Option<&str>,
    ) -> String {
        let prompt = build_format_prompt(text, options);

        let mut order: Vec<&FormatterBackend> = Vec::with_capacity(self.backends.len());
        if let Some(name) = preferred_backend {
            if let Some(preferred) = self.backends.iter().find(|b| b.name == name) {
                order.push(preferred);
            }
        }
        for backend in &self.backends {
            if !order.iter().any(|b| b.name == backend.name) {
                order.push(backend);
            }
        }

        for backend in order {
            if !backend.service.is_configured() {
                continue;
            }
            match self.try_backend(backend, &prompt).await {
                Ok(output) => {
                    log::info!(
                        "Formatted {} chars -> {} chars via {}",
                        text.chars().count(),
                        output.chars().count(),
                        backend.name
                    );
                    return output;
                }
                Err(e) => {
                    log::warn!("Formatter backend {} failed: {}", backend.name, e);
                }
            }
        }

        log::warn!("All formatter backends failed, returning original text");
        text.to_string()
    }

    async fn try_backend(&self, backend: &FormatterBackend, prompt: &str) -> Result<String> {
        let output = backend.service.generate(prompt, &backend.config).await?;
        let output = strip_code_wrap(output.trim());
        if output.chars().count() < MIN_LLM_OUTPUT_CHARS {
            return Err(crate::error::AppError::Llm(format!(
                "{} returned {} chars",
                backend.name,
                output.chars().count()
            )));
        }
        Ok(output)
    }
}

/// Normalize LLM output to plain text; delivery re-wraps when code tags are
/// requested, so a provider-added wrap must not stack.
fn strip_code_wrap(text: &str) -> String {
    let trimmed = text.trim();
    if let Some(inner) = trimmed
        .strip_prefix("<code>")
        .and_then(|t| t.strip_suffix("</code>"))
    {
        inner.trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::mocks::MockLlm;

    const LONG_INPUT: &str =
        "один два три четыре пять шесть семь восемь девять десять одиннадцать";

    fn backend(name: &str, mock: MockLlm) -> FormatterBackend {
        FormatterBackend {
            name: name.to_string(),
            service: Arc::new(mock),
            config: LlmConfig::default(),
        }
    }

    fn options() -> FormatOptions {
        FormatOptions {
            code_tags: false,
            use_yo: true,
            is_chunked: false,
            is_dialogue: false,
        }
    }

    #[tokio::test]
    async fn test_short_input_bypasses_llm() {
        let mock = MockLlm::returning("should not appear");
        let formatter = Formatter::new(vec![backend("qwen", mock.clone())]);
        let output = formatter.format("пара слов", options(), None).await;
        assert_eq!(output, "пара слов");
        assert_eq!(mock.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_failure_returns_input() {
        let formatter = Formatter::new(vec![backend("qwen", MockLlm::failing())]);
        let output = formatter.format(LONG_INPUT, options(), None).await;
        assert_eq!(output, LONG_INPUT);
    }

    #[tokio::test]
    async fn test_fallback_chain() {
        let primary = MockLlm::failing();
        let fallback = MockLlm::returning("Отформатированный текст.");
        let formatter = Formatter::new(vec![
            backend("qwen", primary.clone()),
            backend("gemini", fallback.clone()),
        ]);
        let output = formatter.format(LONG_INPUT, options(), None).await;
        assert_eq!(output, "Отформатированный текст.");
        assert_eq!(primary.prompt_count(), 1);
        assert_eq!(fallback.prompt_count(), 1);
    }

    #[tokio::test]
    async fn test_preferred_backend_reorders_chain() {
        let qwen = MockLlm::returning("из qwen пришло");
        let gemini = MockLlm::returning("из gemini пришло");
        let formatter = Formatter::new(vec![
            backend("qwen", qwen.clone()),
            backend("gemini", gemini.clone()),
        ]);
        let output = formatter.format(LONG_INPUT, options(), Some("gemini")).await;
        assert_eq!(output, "из gemini пришло");
        assert_eq!(qwen.prompt_count(), 0);
    }

    #[tokio::test]
    async fn test_too_short_llm_output_falls_through() {
        let primary = MockLlm::returning("ok");
        let fallback = MockLlm::returning("Полный результат.");
        let formatter = Formatter::new(vec![
            backend("qwen", primary),
            backend("gemini", fallback),
        ]);
        let output = formatter.format(LONG_INPUT, options(), None).await;
        assert_eq!(output, "Полный результат.");
    }

    #[tokio::test]
    async fn test_code_wrap_stripped_from_output() {
        let mock = MockLlm::returning("<code>внутренний текст без тегов</code>");
        let formatter = Formatter::new(vec![backend("qwen", mock)]);
        let output = formatter.format(LONG_INPUT, options(), None).await;
        assert_eq!(output, "внутренний текст без тегов");
    }

    #[tokio::test]
    async fn test_yo_stripped_when_disabled() {
        let mock = MockLlm::returning("Ёжик идёт домой через лес ёлок и пеньков.");
        let formatter = Formatter::new(vec![backend("qwen", mock)]);
        let output = formatter
            .format(
                LONG_INPUT,
                FormatOptions {
                    use_yo: false,
                    ..options()
                },
                None,
            )
            .await;
        assert_eq!(output, "Ежик идет домой через лес елок и пеньков.");
    }

    #[tokio::test]
    async fn test_yo_stripped_even_on_short_bypass() {
        let formatter = Formatter::new(vec![backend("qwen", MockLlm::returning("x"))]);
        let output = formatter
            .format(
                "ёлка",
                FormatOptions {
                    use_yo: false,
                    ..options()
                },
                None,
            )
            .await;
        assert_eq!(output, "елка");
    }

    #[tokio::test]
    async fn test_stubbed_formatter_is_idempotent() {
        let formatter = Formatter::new(vec![backend(
            "qwen",
            MockLlm::returning("Стабильный результат форматирования."),
        )]);
        let first = formatter.format(LONG_INPUT, options(), None).await;
        let second = formatter.format(LONG_INPUT, options(), None).await;
        assert_eq!(first, second);
    }
}
