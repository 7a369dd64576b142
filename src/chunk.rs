//! Sentence-boundary text chunker with overlap.
//!
//! Splits arbitrary text into passages bounded by `max_chars`, breaking at
//! sentence boundaries when possible. When a buffer closes, the next one is
//! seeded with the word-aligned tail of the previous chunk so neighboring
//! chunks share context. Deterministic and pure; lengths are counted in
//! characters, not bytes, so multi-byte input never splits mid-codepoint.

/// Split `text` into ordered chunks.
///
/// - Empty or whitespace-only input yields no chunks.
/// - Input at or under `max_chars` is returned as a single trimmed chunk.
/// - A single sentence longer than `max_chars` is hard-split into fixed
///   windows of `max_chars`, advancing `max_chars - overlap_chars` per step.
///
/// Every emitted chunk is non-empty after trimming and at most
/// `max_chars + overlap_chars` characters long.
pub fn chunk_text(text: &str, max_chars: usize, overlap_chars: usize) -> Vec<String> {
    debug_assert!(overlap_chars < max_chars);

    if text.trim().is_empty() {
        return Vec::new();
    }

    if char_len(text) <= max_chars {
        return vec![text.trim().to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(text) {
        if sentence.trim().is_empty() {
            continue;
        }

        let sentence_len = char_len(sentence);

        // A sentence that alone exceeds the limit gets fixed overlapping
        // windows; no overlap seeding happens after it.
        if sentence_len > max_chars {
            if !current.is_empty() {
                chunks.push(current.trim().to_string());
                current.clear();
            }
            let cs: Vec<char> = sentence.chars().collect();
            let step = max_chars - overlap_chars;
            let mut i = 0;
            while i < cs.len() {
                let end = (i + max_chars).min(cs.len());
                let window: String = cs[i..end].iter().collect();
                if !window.trim().is_empty() {
                    chunks.push(window);
                }
                i += step;
            }
            continue;
        }

        if char_len(&current) + sentence_len + 1 > max_chars {
            if !current.trim().is_empty() {
                chunks.push(current.trim().to_string());
            }
            if overlap_chars > 0 && !current.is_empty() {
                // Seed the next buffer with the tail of the closed chunk,
                // trimmed forward to a word boundary.
                let mut overlap = tail_chars(&current, overlap_chars);
                if let Some(space) = overlap.find(' ') {
                    overlap = &overlap[space + 1..];
                }
                current = format!("{} {}", overlap, sentence);
            } else {
                current = sentence.to_string();
            }
        } else if current.is_empty() {
            current = sentence.trim().to_string();
        } else {
            current = format!("{} {}", current, sentence).trim().to_string();
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// The final `n` characters of `s` as a subslice.
fn tail_chars(s: &str, n: usize) -> &str {
    let total = char_len(s);
    if total <= n {
        return s;
    }
    let (idx, _) = s.char_indices().nth(total - n).unwrap_or((0, ' '));
    &s[idx..]
}

/// Split into sentences at whitespace runs that follow `.`, `!`, or `?`.
/// The terminator stays with its sentence; the whitespace is consumed.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_terminal = false;
    let mut iter = text.char_indices().peekable();

    while let Some((i, c)) = iter.next() {
        if prev_terminal && c.is_whitespace() {
            sentences.push(&text[start..i]);
            let mut next_start = i + c.len_utf8();
            while let Some(&(j, c2)) = iter.peek() {
                if c2.is_whitespace() {
                    iter.next();
                    next_start = j + c2.len_utf8();
                } else {
                    next_start = j;
                    break;
                }
            }
            start = next_start;
            prev_terminal = false;
            continue;
        }
        prev_terminal = matches!(c, '.' | '!' | '?');
    }

    if start < text.len() {
        sentences.push(&text[start..]);
    }

    sentences
}
