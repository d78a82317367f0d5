use botway_common::{Error, Result};

/// Recursive character splitter: tries coarse separators first and falls
/// back to finer ones until every piece fits `chunk_size`, then merges
/// adjacent pieces back together with `chunk_overlap` characters of
/// context carried across chunk boundaries.
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

impl TextChunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::KnowledgeBase("chunk_size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::KnowledgeBase(format!(
                "chunk_overlap ({chunk_overlap}) must be strictly less than chunk_size ({chunk_size})"
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    pub fn split(&self, text: &str) -> Vec<String> {
        let pieces = self.split_recursive(text, 0);
        self.merge(pieces)
    }

    fn split_recursive(&self, text: &str, sep_index: usize) -> Vec<String> {
        if text.chars().count() <= self.chunk_size {
            if text.trim().is_empty() {
                return Vec::new();
            }
            return vec![text.to_string()];
        }

        let sep = SEPARATORS[sep_index];
        let parts: Vec<&str> = if sep.is_empty() {
            // Last resort: hard cut at chunk_size characters.
            return hard_cut(text, self.chunk_size);
        } else {
            text.split(sep).collect()
        };

        let mut out = Vec::new();
        for part in parts {
            if part.trim().is_empty() {
                continue;
            }
            if part.chars().count() <= self.chunk_size {
                out.push(part.to_string());
            } else {
                out.extend(self.split_recursive(part, sep_index + 1));
            }
        }
        out
    }

    fn merge(&self, pieces: Vec<String>) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();

        for piece in pieces {
            let candidate_len = if current.is_empty() {
                piece.chars().count()
            } else {
                current.chars().count() + 1 + piece.chars().count()
            };

            if candidate_len > self.chunk_size && !current.is_empty() {
                let tail = overlap_tail(&current, self.chunk_overlap);
                chunks.push(std::mem::take(&mut current));
                current = tail;
            }

            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(&piece);
        }

        if !current.trim().is_empty() {
            chunks.push(current);
        }
        chunks
    }
}

fn hard_cut(text: &str, size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(size)
        .map(|c| c.iter().collect::<String>())
        .filter(|s| !s.trim().is_empty())
        .collect()
}

/// The last `overlap` characters of a chunk, used to seed the next one.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = chunk.chars().collect();
    let start = chars.len().saturating_sub(overlap);
    chars[start..].iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_must_be_less_than_size() {
        assert!(TextChunker::new(100, 100).is_err());
        assert!(TextChunker::new(100, 101).is_err());
        assert!(TextChunker::new(100, 99).is_ok());
        assert!(TextChunker::new(0, 0).is_err());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunker = TextChunker::new(100, 10).unwrap();
        assert_eq!(chunker.split("short text"), vec!["short text"]);
    }

    #[test]
    fn empty_text_yields_nothing() {
        let chunker = TextChunker::new(100, 10).unwrap();
        assert!(chunker.split("   \n\n  ").is_empty());
    }

    #[test]
    fn every_chunk_respects_the_size_bound() {
        let chunker = TextChunker::new(50, 10).unwrap();
        let text = "one two three four five six seven eight nine ten ".repeat(20);
        let chunks = chunker.split(&text);
        assert!(chunks.len() > 1);
        // A chunk is at most chunk_size plus the carried overlap and its
        // joining space.
        for chunk in &chunks {
            assert!(
                chunk.chars().count() <= 50 + 10 + 1,
                "chunk too long: {}",
                chunk.len()
            );
        }
    }

    #[test]
    fn paragraph_breaks_are_preferred_split_points() {
        let chunker = TextChunker::new(20, 0).unwrap();
        let chunks = chunker.split("first paragraph\n\nsecond paragraph");
        assert_eq!(chunks, vec!["first paragraph", "second paragraph"]);
    }

    #[test]
    fn unbroken_text_is_hard_cut() {
        let chunker = TextChunker::new(10, 2).unwrap();
        let chunks = chunker.split(&"x".repeat(35));
        assert!(!chunks.is_empty());
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 10 + 2 + 1);
        }
    }

    #[test]
    fn overlap_carries_context_across_chunks() {
        let chunker = TextChunker::new(20, 8).unwrap();
        let chunks = chunker.split("alpha beta gamma delta epsilon zeta eta theta");
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let tail: String = {
                let chars: Vec<char> = pair[0].chars().collect();
                chars[chars.len().saturating_sub(8)..].iter().collect()
            };
            assert!(pair[1].starts_with(tail.as_str()));
        }
    }
}
