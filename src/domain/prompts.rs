//! Prompt assembly for the LLM formatter
//!
//! Single source of truth for the formatting prompt: fixed rules plus four
//! boolean-driven instructions. The same builder serves every provider so
//! output stays consistent across backends.

use crate::domain::models::Segment;

/// Formatter options derived from user settings and pipeline state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatOptions {
    /// Wrap output in <code></code>
    pub code_tags: bool,
    /// Preserve the letter ё
    pub use_yo: bool,
    /// Input was concatenated from independently transcribed chunks
    pub is_chunked: bool,
    /// Input is a multi-speaker dialogue
    pub is_dialogue: bool,
}

/// Inputs shorter than this skip the LLM entirely
pub const MIN_FORMAT_WORDS: usize = 10;

/// Build the formatting prompt for the given text and options.
pub fn build_format_prompt(text: &str, options: FormatOptions) -> String {
    let code_tag_instruction = if options.code_tags {
        "Оберни ВЕСЬ текст в теги <code></code>."
    } else {
        "НЕ используй теги <code>."
    };

    let yo_instruction = if options.use_yo {
        "Сохраняй букву ё где она есть."
    } else {
        "Заменяй все буквы ё на е."
    };

    let mut extra_rules = String::new();
    if options.is_chunked {
        extra_rules.push_str(
            "\n8. Текст склеен из нескольких независимо распознанных фрагментов — \
             устрани артефакты на стыках (оборванные и продублированные фразы).",
        );
    }
    if options.is_dialogue {
        extra_rules.push_str(
            "\n9. Это диалог: каждая реплика с новой строки, начинай реплику с тире (—). \
             НЕ добавляй подписи говорящих.",
        );
    } else {
        extra_rules.push_str("\n9. НЕ используй тире в начале строк — это монолог, не диалог.");
    }

    format!(
        "Отформатируй транскрипцию аудиозаписи. Правила:\n\n\
         1. Исправь ошибки распознавания речи (артефакты, повторы, обрывки слов)\n\
         2. Расставь знаки препинания по правилам русского языка\n\
         3. НЕ заменяй слова на синонимы, НЕ меняй формы слов — сохраняй именно те слова, которые произнёс автор\n\
         4. Раздели на абзацы по смыслу и интонации (минимум 2-3 предложения в абзаце, не разбивай каждое предложение отдельно)\n\
         5. Имена собственные оставляй как распознаны, если не уверен в правильном написании\n\
         6. Слова с неоднозначными шипящими исправляй только когда вариант очевиден\n\
         7. ВАЖНО: НЕ добавляй свои комментарии, НЕ веди диалог с пользователем\n\
         {code_tag_instruction}\n\
         {yo_instruction}{extra_rules}\n\n\
         Текст для форматирования:\n\n\
         {text}"
    )
}

/// True when the text is too short to benefit from LLM formatting
pub fn too_short_to_format(text: &str) -> bool {
    text.split_whitespace().count() < MIN_FORMAT_WORDS
}

/// Replace ё with е when the user turned the letter off
pub fn strip_yo(text: &str) -> String {
    text.replace('ё', "е").replace('Ё', "Е")
}

/// Render diarized segments as dialogue text.
///
/// One utterance per line prefixed with an em-dash; consecutive segments by
/// the same speaker are joined into one turn. With `show_speakers` each turn
/// gets a "Speaker N:" header line.
pub fn render_dialogue(segments: &[Segment], show_speakers: bool) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current_speaker: Option<u32> = None;
    let mut current_text = String::new();

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        if current_speaker == Some(segment.speaker_id) {
            if !current_text.is_empty() {
                current_text.push(' ');
            }
            current_text.push_str(text);
        } else {
            if let Some(speaker) = current_speaker {
                lines.push(render_turn(speaker, &current_text, show_speakers));
            }
            current_speaker = Some(segment.speaker_id);
            current_text = text.to_string();
        }
    }
    if let Some(speaker) = current_speaker {
        lines.push(render_turn(speaker, &current_text, show_speakers));
    }

    lines.join("\n")
}

fn render_turn(speaker_id: u32, text: &str, show_speakers: bool) -> String {
    if show_speakers {
        format!("Спикер {}:\n— {}", speaker_id + 1, text)
    } else {
        format!("— {text}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> FormatOptions {
        FormatOptions {
            code_tags: false,
            use_yo: true,
            is_chunked: false,
            is_dialogue: false,
        }
    }

    #[test]
    fn test_prompt_contains_fixed_rules() {
        let prompt = build_format_prompt("тестовый текст", options());
        assert!(prompt.contains("Исправь ошибки распознавания"));
        assert!(prompt.contains("знаки препинания"));
        assert!(prompt.contains("Имена собственные"));
        assert!(prompt.contains("шипящими"));
        assert!(prompt.contains("тестовый текст"));
    }

    #[test]
    fn test_code_tags_toggle() {
        let with_tags = build_format_prompt("x", FormatOptions {
            code_tags: true,
            ..options()
        });
        assert!(with_tags.contains("Оберни ВЕСЬ текст"));

        let without = build_format_prompt("x", options());
        assert!(without.contains("НЕ используй теги <code>"));
    }

    #[test]
    fn test_yo_toggle() {
        let keep = build_format_prompt("x", options());
        assert!(keep.contains("Сохраняй букву ё"));

        let strip = build_format_prompt("x", FormatOptions {
            use_yo: false,
            ..options()
        });
        assert!(strip.contains("Заменяй все буквы ё"));
    }

    #[test]
    fn test_chunked_adds_seam_rule() {
        let chunked = build_format_prompt("x", FormatOptions {
            is_chunked: true,
            ..options()
        });
        assert!(chunked.contains("на стыках"));
        assert!(!build_format_prompt("x", options()).contains("на стыках"));
    }

    #[test]
    fn test_dialogue_toggles_dash_rule() {
        let dialogue = build_format_prompt("x", FormatOptions {
            is_dialogue: true,
            ..options()
        });
        assert!(dialogue.contains("начинай реплику с тире"));
        assert!(dialogue.contains("НЕ добавляй подписи"));

        let monologue = build_format_prompt("x", options());
        assert!(monologue.contains("НЕ используй тире"));
    }

    #[test]
    fn test_short_text_detection() {
        assert!(too_short_to_format("пара слов"));
        assert!(!too_short_to_format(
            "один два три четыре пять шесть семь восемь девять десять"
        ));
    }

    #[test]
    fn test_strip_yo() {
        assert_eq!(strip_yo("ёжик Ёлка"), "ежик Елка");
    }

    #[test]
    fn test_render_dialogue_merges_same_speaker() {
        let segments = vec![
            Segment::new(0, "Привет.", 0, 1000),
            Segment::new(0, "Как дела?", 1000, 2000),
            Segment::new(1, "Нормально.", 2000, 3000),
        ];
        let text = render_dialogue(&segments, false);
        assert_eq!(text, "— Привет. Как дела?\n— Нормально.");
    }

    #[test]
    fn test_render_dialogue_with_speaker_labels() {
        let segments = vec![
            Segment::new(0, "Да.", 0, 1000),
            Segment::new(1, "Нет.", 1000, 2000),
        ];
        let text = render_dialogue(&segments, true);
        assert!(text.contains("Спикер 1:"));
        assert!(text.contains("Спикер 2:"));
    }

    #[test]
    fn test_render_dialogue_skips_empty_segments() {
        let segments = vec![
            Segment::new(0, "Слово.", 0, 1000),
            Segment::new(1, "  ", 1000, 1500),
            Segment::new(1, "Ответ.", 1500, 2000),
        ];
        assert_eq!(render_dialogue(&segments, false), "— Слово.\n— Ответ.");
    }
}
