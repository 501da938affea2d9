//! Text chunking for speech synthesis
//!
//! The synthesis backend rejects or garbles long inputs, so replies are split
//! into segments of at most `max_len` characters. Splitting prefers sentence
//! boundaries, then word boundaries; a single word longer than the limit is
//! emitted whole rather than cut.
//!
//! Lengths are counted in `char`s, not bytes: replies are mostly Persian.

/// Default chunk length limit used for playback
pub const DEFAULT_MAX_LEN: usize = 250;

/// Split `text` into synthesis-safe chunks of at most `max_len` characters.
///
/// Chunks are trimmed slices of the input joined by single spaces, so the
/// non-whitespace content of the input is reproduced exactly, in order.
/// A `max_len` of 0 is treated as 1.
///
/// # Examples
///
/// ```
/// use robin_voice::speech::split_text;
///
/// assert_eq!(split_text("سلام", 250), vec!["سلام"]);
/// assert_eq!(split_text("One. Two.", 5), vec!["One.", "Two."]);
/// ```
#[must_use]
pub fn split_text(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);

    if char_len(text) <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in split_on_sentences(text) {
        let sentence = sentence.trim();
        if sentence.is_empty() {
            continue;
        }

        if char_len(sentence) > max_len {
            // Oversized sentence: pack its words, keep the tail open so the
            // next sentence can join it
            for piece in split_on_words(sentence, max_len) {
                push_segment(&mut chunks, &mut current, &piece, max_len);
            }
            continue;
        }

        push_segment(&mut chunks, &mut current, sentence, max_len);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Append `segment` to `current` if it fits, otherwise flush and start over
fn push_segment(chunks: &mut Vec<String>, current: &mut String, segment: &str, max_len: usize) {
    let needed = if current.is_empty() {
        char_len(segment)
    } else {
        char_len(current) + 1 + char_len(segment)
    };

    if needed <= max_len {
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(segment);
        return;
    }

    if !current.is_empty() {
        chunks.push(std::mem::take(current));
    }

    if char_len(segment) > max_len {
        // Indivisible token
        chunks.push(segment.to_string());
    } else {
        current.push_str(segment);
    }
}

/// Sentence-terminal characters, Latin and Persian
const fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '؟' | '…' | '\n')
}

/// Split text after each run of sentence-terminal punctuation.
///
/// The punctuation stays attached to the preceding segment.
fn split_on_sentences(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_terminal_run = false;

    for (i, c) in text.char_indices() {
        if is_terminal(c) {
            in_terminal_run = true;
        } else if in_terminal_run {
            segments.push(&text[start..i]);
            start = i;
            in_terminal_run = false;
        }
    }

    if start < text.len() {
        segments.push(&text[start..]);
    }

    segments
}

/// Pack the words of one sentence into pieces of at most `max_len` chars
fn split_on_words(sentence: &str, max_len: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in sentence.split_whitespace() {
        let needed = if current.is_empty() {
            char_len(word)
        } else {
            char_len(&current) + 1 + char_len(word)
        };

        if needed <= max_len {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        } else {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            if char_len(word) > max_len {
                pieces.push(word.to_string());
            } else {
                current.push_str(word);
            }
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn non_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn text_within_limit_returns_single_chunk() {
        assert_eq!(split_text("hello world", 250), vec!["hello world"]);
        assert_eq!(split_text("", 10), vec![""]);
    }

    #[test]
    fn limit_counts_chars_not_bytes() {
        // 20 Persian chars are 40 bytes
        let text = "سلام دوست من چطوری؟!";
        assert_eq!(text.chars().count(), 20);
        assert_eq!(split_text(text, 20), vec![text]);
    }

    #[test]
    fn packs_sentences_greedily() {
        let chunks = split_text("One. Two. Three. Four.", 10);
        assert_eq!(chunks, vec!["One. Two.", "Three.", "Four."]);
    }

    #[test]
    fn splits_on_persian_question_mark() {
        let chunks = split_text("حالت چطوره؟ من خوبم.", 12);
        assert_eq!(chunks, vec!["حالت چطوره؟", "من خوبم."]);
    }

    #[test]
    fn newline_is_a_boundary() {
        let chunks = split_text("first line\nsecond line", 12);
        assert_eq!(chunks, vec!["first line", "second line"]);
    }

    #[test]
    fn long_sentence_falls_back_to_words() {
        let chunks = split_text("alpha beta gamma delta epsilon", 11);
        assert_eq!(chunks, vec!["alpha beta", "gamma delta", "epsilon"]);
    }

    #[test]
    fn word_tail_joins_next_sentence() {
        let chunks = split_text("aaaa bbbb cccc. dd.", 10);
        assert_eq!(chunks, vec!["aaaa bbbb", "cccc. dd."]);
    }

    #[test]
    fn oversized_token_is_emitted_verbatim() {
        let chunks = split_text("tiny supercalifragilistic end", 6);
        assert_eq!(chunks, vec!["tiny", "supercalifragilistic", "end"]);
    }

    #[test]
    fn zero_limit_is_clamped() {
        let chunks = split_text("a b", 0);
        assert_eq!(chunks, vec!["a", "b"]);
    }

    #[test]
    fn keeps_punctuation_runs_together() {
        let chunks = split_text("Really?! Yes... ok", 9);
        assert_eq!(chunks, vec!["Really?!", "Yes... ok"]);
    }

    #[test]
    fn realistic_reply() {
        let sentence = "این یک جمله نسبتاً طولانی برای آزمایش تقسیم متن است. ";
        let text = sentence.repeat(12);
        let chunks = split_text(&text, DEFAULT_MAX_LEN);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= DEFAULT_MAX_LEN);
            assert!(chunk.ends_with('.'));
        }
        assert_eq!(non_ws(&chunks.concat()), non_ws(&text));
    }

    proptest! {
        #[test]
        fn round_trip_preserves_content(
            text in "[a-zA-Zآ-ی .!?؟\n]{0,400}",
            max_len in 1usize..80,
        ) {
            let chunks = split_text(&text, max_len);
            prop_assert_eq!(non_ws(&chunks.concat()), non_ws(&text));

            for chunk in &chunks {
                let fits = chunk.chars().count() <= max_len;
                let indivisible = !chunk.chars().any(char::is_whitespace);
                prop_assert!(fits || indivisible, "chunk {:?} over {}", chunk, max_len);
            }
        }
    }
}
