//! Splits source text into ordered chunks along paragraph and sentence
//! boundaries.
//!
//! Soft goal: each chunk ≈ the per-chunk input target. Hard floor: no
//! chunk below 200 words unless the input itself is smaller. Hard
//! ceiling: twice the target. Identical input yields identical chunking.

use super::words::count_words;

/// Hard floor on input words per chunk.
const MIN_CHUNK_WORDS: u32 = 200;

/// One ordered slice of the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputChunk {
    pub text: String,
    pub word_count: u32,
}

/// Split `text` into chunks of roughly `target_words` input words each.
pub fn chunk_input(text: &str, target_words: u32) -> Vec<InputChunk> {
    let total = count_words(text);
    if total == 0 {
        return Vec::new();
    }

    let target = target_words.max(1);
    let ceiling = target * 2;

    // Work in paragraph units; paragraphs above the ceiling are split
    // further at sentence boundaries.
    let mut units: Vec<String> = Vec::new();
    for paragraph in text.split("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        if count_words(trimmed) > ceiling {
            units.extend(split_paragraph_by_sentences(trimmed, target));
        } else {
            units.push(trimmed.to_string());
        }
    }

    let mut chunks: Vec<InputChunk> = Vec::new();
    let mut current = String::new();
    let mut current_words = 0u32;

    for unit in units {
        let unit_words = count_words(&unit);

        if current_words > 0 && current_words + unit_words > ceiling {
            chunks.push(InputChunk {
                text: current.clone(),
                word_count: current_words,
            });
            current.clear();
            current_words = 0;
        }

        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&unit);
        current_words += unit_words;

        if current_words >= target {
            chunks.push(InputChunk {
                text: current.clone(),
                word_count: current_words,
            });
            current.clear();
            current_words = 0;
        }
    }

    if current_words > 0 {
        chunks.push(InputChunk {
            text: current,
            word_count: current_words,
        });
    }

    merge_small_chunks(&mut chunks);
    chunks
}

/// Split an oversized paragraph at sentence boundaries into ≈target-word
/// pieces.
fn split_paragraph_by_sentences(paragraph: &str, target: u32) -> Vec<String> {
    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_words = 0u32;

    for sentence in split_sentences(paragraph) {
        let words = count_words(&sentence);
        if current_words > 0 && current_words + words > target {
            pieces.push(current.trim().to_string());
            current.clear();
            current_words = 0;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence.trim());
        current_words += words;
    }

    if !current.trim().is_empty() {
        pieces.push(current.trim().to_string());
    }

    pieces
}

/// Naive sentence splitting on terminal punctuation followed by
/// whitespace. Good enough for budgeting; chunk boundaries only need to
/// fall between sentences, not be linguistically perfect.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let bytes = text.as_bytes();

    for (i, &b) in bytes.iter().enumerate() {
        if matches!(b, b'.' | b'!' | b'?') && bytes.get(i + 1).is_some_and(|n| n.is_ascii_whitespace())
        {
            sentences.push(text[start..=i].to_string());
            start = i + 1;
        }
    }
    if start < text.len() {
        let tail = text[start..].trim();
        if !tail.is_empty() {
            sentences.push(tail.to_string());
        }
    }

    sentences
}

/// Merge chunks below the floor into their predecessor (or forward
/// into the successor, for the first chunk — prepended, so document
/// order survives). A single undersized chunk stays as-is: the input
/// itself was smaller than the floor.
fn merge_small_chunks(chunks: &mut Vec<InputChunk>) {
    let mut i = 0;
    while i < chunks.len() {
        if chunks[i].word_count < MIN_CHUNK_WORDS && chunks.len() > 1 {
            let removed = chunks.remove(i);
            if i > 0 {
                let into = i - 1;
                chunks[into].text.push_str("\n\n");
                chunks[into].text.push_str(&removed.text);
                chunks[into].word_count += removed.word_count;
            } else {
                chunks[0].text = format!("{}\n\n{}", removed.text, chunks[0].text);
                chunks[0].word_count += removed.word_count;
            }
        } else {
            i += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paragraphs(n: usize, words_each: usize) -> String {
        (0..n)
            .map(|i| {
                (0..words_each)
                    .map(|w| format!("para{i}word{w}"))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn empty_input_returns_no_chunks() {
        assert!(chunk_input("", 1000).is_empty());
        assert!(chunk_input("\n\n \n\n", 1000).is_empty());
    }

    #[test]
    fn chunking_is_stable() {
        let text = paragraphs(12, 250);
        assert_eq!(chunk_input(&text, 1000), chunk_input(&text, 1000));
    }

    #[test]
    fn chunks_near_target() {
        let text = paragraphs(12, 250); // 3,000 words
        let chunks = chunk_input(&text, 1000);
        assert_eq!(chunks.len(), 3);
        for chunk in &chunks {
            assert!(chunk.word_count >= 1000, "chunk below target: {}", chunk.word_count);
            assert!(chunk.word_count <= 2000, "chunk above ceiling: {}", chunk.word_count);
        }
    }

    #[test]
    fn word_counts_sum_to_input() {
        let text = paragraphs(9, 333);
        let total: u32 = chunk_input(&text, 800).iter().map(|c| c.word_count).sum();
        assert_eq!(total, count_words(&text));
    }

    #[test]
    fn respects_hard_ceiling() {
        // One giant paragraph gets split at sentence boundaries.
        let sentence = "This sentence contains exactly eight words in total. ";
        let text = sentence.repeat(300); // 2,400 words, no paragraph breaks
        let chunks = chunk_input(&text, 500);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(
                chunk.word_count <= 1000,
                "chunk exceeds 2x target: {}",
                chunk.word_count
            );
        }
    }

    #[test]
    fn small_trailing_chunk_merged() {
        // 2,100 words with a 100-word tail paragraph: the tail must not
        // stand alone below the 200-word floor.
        let mut text = paragraphs(4, 500);
        text.push_str("\n\n");
        text.push_str(&paragraphs(1, 100));
        let chunks = chunk_input(&text, 500);
        for chunk in &chunks {
            assert!(chunk.word_count >= 200, "undersized chunk: {}", chunk.word_count);
        }
    }

    #[test]
    fn small_leading_chunk_merges_forward_in_order() {
        // A ~100-word opening paragraph followed by a paragraph big
        // enough to trigger the ceiling flush: the undersized first
        // chunk must merge forward with its text kept in front.
        let mut text = paragraphs(1, 100);
        text.push_str("\n\n");
        let second = (0..950)
            .map(|w| format!("tailword{w}"))
            .collect::<Vec<_>>()
            .join(" ");
        text.push_str(&second);

        let chunks = chunk_input(&text, 500);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 1050);
        let first_pos = chunks[0].text.find("para0word0").unwrap();
        let second_pos = chunks[0].text.find("tailword0").unwrap();
        assert!(
            first_pos < second_pos,
            "document order must be preserved across the forward merge"
        );
    }

    #[test]
    fn tiny_input_is_single_chunk() {
        let text = paragraphs(1, 50);
        let chunks = chunk_input(&text, 1000);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].word_count, 50);
    }

    #[test]
    fn chunk_boundaries_fall_between_paragraphs() {
        let text = paragraphs(6, 200);
        let chunks = chunk_input(&text, 400);
        for chunk in &chunks {
            assert!(chunk.text.starts_with("para"), "chunk starts mid-paragraph");
        }
    }
}
