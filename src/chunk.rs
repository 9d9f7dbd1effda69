/// A window over extracted text. Offsets are byte offsets into the UTF-8
/// text and always fall on char boundaries. Only entities starting inside
/// `valid_length` belong to this chunk; the rest is look-ahead so entities
/// crossing the boundary are seen whole.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub id: u64,
    pub start: usize,
    pub length: usize,
    pub valid_length: usize,
}

impl TextChunk {
    pub fn slice<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.start + self.length]
    }

    pub fn owns(&self, local_start: usize) -> bool {
        local_start < self.valid_length
    }
}

pub fn build_text_chunks(text: &str, chunk_bytes: usize, overlap: usize) -> Vec<TextChunk> {
    let total_len = text.len();
    if chunk_bytes == 0 || total_len == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut id = 0u64;

    while start < total_len {
        let mut valid_end = floor_boundary(text, start.saturating_add(chunk_bytes).min(total_len));
        if valid_end <= start {
            // A single char wider than chunk_bytes.
            valid_end = ceil_boundary(text, start + 1);
        }
        let end = floor_boundary(text, valid_end.saturating_add(overlap).min(total_len)).max(valid_end);

        chunks.push(TextChunk {
            id,
            start,
            length: end - start,
            valid_length: valid_end - start,
        });

        start = valid_end;
        id += 1;
    }

    chunks
}

fn floor_boundary(text: &str, mut idx: usize) -> usize {
    while idx > 0 && !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
