use serde::{Deserialize, Serialize};

/// A span of extracted text that one index vector points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub chunk_index: usize,
    /// 1-based page (or worksheet) the text came from.
    pub page: usize,
    pub text: String,
}

/// Splits page texts into passages.
///
/// Paragraphs of a page are joined until they would exceed `chunk_size`, then a new
/// passage starts. Passages never span pages, so every passage has exactly one page
/// number. Paragraphs longer than `chunk_size` are split on line boundaries, and single
/// lines longer than that are cut at character boundaries.
pub fn chunk_pages(pages: &[String], chunk_size: usize) -> Vec<Passage> {
    let chunk_size = chunk_size.max(1);
    let mut passages = Vec::new();

    for (page_index, page) in pages.iter().enumerate() {
        let page_number = page_index + 1;
        let mut current = String::new();

        let pieces = page
            .split("\n\n")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .flat_map(|p| split_oversized(p, chunk_size));

        for piece in pieces {
            let would_exceed =
                !current.is_empty() && current.len() + piece.len() + 2 > chunk_size;

            if would_exceed {
                passages.push(Passage {
                    chunk_index: passages.len(),
                    page: page_number,
                    text: std::mem::take(&mut current),
                });
            }

            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
        }

        if !current.is_empty() {
            passages.push(Passage {
                chunk_index: passages.len(),
                page: page_number,
                text: current,
            });
        }
    }

    passages
}

fn split_oversized(paragraph: &str, chunk_size: usize) -> Vec<String> {
    if paragraph.len() <= chunk_size {
        return vec![paragraph.to_string()];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for line in paragraph.lines().map(str::trim).filter(|l| !l.is_empty()) {
        for part in split_chars(line, chunk_size) {
            if !current.is_empty() && current.len() + part.len() + 1 > chunk_size {
                out.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(part);
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_chars(line: &str, chunk_size: usize) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut rest = line;
    while rest.len() > chunk_size {
        let mut cut = chunk_size;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // First char is wider than the limit; take it whole.
            cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let (head, tail) = rest.split_at(cut);
        parts.push(head);
        rest = tail;
    }
    if !rest.is_empty() {
        parts.push(rest);
    }
    parts
}
