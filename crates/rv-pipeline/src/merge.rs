use crate::structure::Document;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: i32,
    pub text: String,
}

/// Re-flattens a `Document` and splits it into character-count chunks with
/// overlap between adjacent chunks, so AI analysis near a chunk boundary
/// still has surrounding context. Pure function: no I/O, no `.await`.
pub fn merge(doc: &Document, max_chars_per_chunk: usize, overlap_chars: usize) -> Vec<Chunk> {
    let text = doc.full_text();
    if text.is_empty() {
        return vec![Chunk { index: 0, text: String::new() }];
    }

    let chars: Vec<char> = text.chars().collect();
    let stride = max_chars_per_chunk.saturating_sub(overlap_chars).max(1);

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut index = 0i32;
    while start < chars.len() {
        let end = (start + max_chars_per_chunk).min(chars.len());
        let chunk_text: String = chars[start..end].iter().collect();
        chunks.push(Chunk { index, text: chunk_text });
        index += 1;
        if end == chars.len() {
            break;
        }
        start += stride;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::structure;

    #[test]
    fn short_document_is_a_single_chunk() {
        let doc = structure("hello world");
        let chunks = merge(&doc, 4000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn long_document_splits_with_overlap() {
        let body = "x".repeat(10_000);
        let doc = structure(&body);
        let chunks = merge(&doc, 4000, 200);
        assert!(chunks.len() > 1);
        // consecutive chunks overlap by `overlap_chars`
        let first_tail: String = chunks[0].text.chars().rev().take(200).collect::<Vec<_>>().into_iter().rev().collect();
        assert!(chunks[1].text.starts_with(&first_tail));
    }

    #[test]
    fn empty_document_yields_one_empty_chunk() {
        let doc = structure("");
        let chunks = merge(&doc, 4000, 200);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "");
    }
}
