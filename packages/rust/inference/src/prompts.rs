//! Prompt templates for classification and summarization.

/// Content longer than this is cut before it goes into a prompt.
pub(crate) const MAX_PROMPT_CONTENT_CHARS: usize = 12_000;

pub(crate) fn classify_prompt(title: &str, content: &str, rules: &str, language: &str) -> String {
    format!(
        r#"# Task
Grade one feed item against the reader's interests.

## Levels
- high_interest: the item is squarely about a high-interest topic.
- interest: related to the reader's interests, worth a look.
- uninterested: nothing the reader asked for.
- exclude: matches an exclusion rule and must be hidden.

Judge the main subject of the item, not isolated keywords. A passing mention of a
high-interest topic in an unrelated article does not make it high interest.
Source-specific rules are listed after global ones and take precedence.

## Reader rules
{rules}

## Item
Title: {title}
Content: {content}

## Answer
Reply with a single JSON object and nothing else:
{{"thought": "short private reasoning", "type": "high_interest | interest | uninterested | exclude", "reason": "one sentence in {language}"}}
"#,
        content = truncate(content, MAX_PROMPT_CONTENT_CHARS),
    )
}

pub(crate) fn summarize_prompt(title: &str, content: &str, language: &str) -> String {
    format!(
        r#"# Task
Summarize the article below for a busy technical reader. Write in {language}.
Keep proper nouns and technical terms; add the original term in parentheses the
first time a translated term appears.

## Format
Raw HTML only, no Markdown fences. Use <p>, <ul> and <li>. Aim for three to five
short paragraphs or bullets. When the article relies on background knowledge most
readers lack, finish with
<div class="did-you-know"><strong>Did you know?</strong> ...</div>

## Article
Title: {title}
Content: {content}
"#,
        content = truncate(content, MAX_PROMPT_CONTENT_CHARS),
    )
}

/// Cut `content` to at most `max_chars` characters on a char boundary.
pub(crate) fn truncate(content: &str, max_chars: usize) -> &str {
    match content.char_indices().nth(max_chars) {
        Some((idx, _)) => &content[..idx],
        None => content,
    }
}
