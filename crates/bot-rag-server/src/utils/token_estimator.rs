use unicode_segmentation::UnicodeSegmentation;

/// Estimate tokens from text using a word-based heuristic
/// (~1.3 tokens per word plus a small formatting overhead).
pub fn estimate_tokens(text: &str) -> usize {
    if text.trim().is_empty() {
        return 0;
    }

    let words = text.unicode_words().count();

    // Scripts without word separators still cost tokens
    let graphemes = text.graphemes(true).count();
    let by_words = (words as f64 * 1.3).ceil() as usize;
    let by_chars = graphemes.div_ceil(4);

    by_words.max(by_chars) + 4
}

/// Estimate tokens for a full prompt (each message pays a role overhead).
pub fn estimate_prompt_tokens<'a>(parts: impl IntoIterator<Item = &'a str>) -> usize {
    parts
        .into_iter()
        .map(|part| estimate_tokens(part) + 3)
        .sum()
}
