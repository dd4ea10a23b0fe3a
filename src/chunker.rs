use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

// ~150 words/minute at ~5 characters/word.
pub const DEFAULT_CHARS_PER_SECOND: u32 = 12;
// Kept under the 15s ceiling of the lip-sync model.
pub const DEFAULT_MAX_DURATION_SECONDS: u32 = 14;

static SENTENCE_END: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("sentence boundary regex"));
// Only a comma followed by whitespace is a pause; "1,000" stays one word.
static COMMA_BREAK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r",(?:\s+|$)").expect("comma regex"));

/// One speech-length-bounded piece of a script. `index` is the playback position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub char_count: usize,
    pub estimated_duration: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkInfo {
    pub total_chunks: usize,
    pub chunks: Vec<Chunk>,
    pub total_estimated_duration: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ScriptChunker {
    chars_per_second: u32,
    max_duration_seconds: u32,
}

impl Default for ScriptChunker {
    fn default() -> Self {
        Self::new(DEFAULT_CHARS_PER_SECOND, DEFAULT_MAX_DURATION_SECONDS)
    }
}

impl ScriptChunker {
    pub fn new(chars_per_second: u32, max_duration_seconds: u32) -> Self {
        Self {
            chars_per_second: chars_per_second.max(1),
            max_duration_seconds: max_duration_seconds.max(1),
        }
    }

    pub fn chars_per_second(&self) -> u32 {
        self.chars_per_second
    }

    pub fn max_duration_seconds(&self) -> u32 {
        self.max_duration_seconds
    }

    pub fn max_chars_per_chunk(&self) -> usize {
        (self.chars_per_second as usize) * (self.max_duration_seconds as usize)
    }

    /// Estimated spoken duration in whole seconds, rounded up.
    pub fn estimate_duration(&self, text: &str) -> u32 {
        let len = char_len(text.trim()) as u32;
        len.div_ceil(self.chars_per_second)
    }

    pub fn needs_chunking(&self, text: &str) -> bool {
        self.estimate_duration(text) > self.max_duration_seconds
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        self.chunk_texts(text)
            .into_iter()
            .enumerate()
            .map(|(index, text)| Chunk {
                index,
                char_count: char_len(&text),
                estimated_duration: self.estimate_duration(&text),
                text,
            })
            .collect()
    }

    pub fn info(&self, text: &str) -> ChunkInfo {
        let chunks = self.chunk(text);
        ChunkInfo {
            total_chunks: chunks.len(),
            total_estimated_duration: chunks.iter().map(|c| c.estimated_duration).sum(),
            chunks,
        }
    }

    fn chunk_texts(&self, text: &str) -> Vec<String> {
        let clean = text.trim();
        if clean.is_empty() {
            return Vec::new();
        }
        if !self.needs_chunking(clean) {
            return vec![clean.to_string()];
        }

        let max_chars = self.max_chars_per_chunk();
        let mut packer = Packer::new(max_chars);
        for sentence in split_sentences(clean) {
            if char_len(sentence) > max_chars {
                packer.flush();
                let parts = self.split_long_sentence(sentence);
                packer.out.extend(parts);
                continue;
            }
            packer.push(sentence);
        }

        packer
            .finish()
            .into_iter()
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }

    fn split_long_sentence(&self, sentence: &str) -> Vec<String> {
        let max_chars = self.max_chars_per_chunk();
        let mut packer = Packer::new(max_chars);
        for part in split_commas(sentence) {
            if char_len(part) > max_chars {
                packer.flush();
                let words = split_words(part, max_chars);
                packer.out.extend(words);
                continue;
            }
            packer.push(part);
        }
        packer.finish()
    }
}

/// Estimate with the default speaking rate.
pub fn estimate_duration(text: &str) -> u32 {
    ScriptChunker::default().estimate_duration(text)
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

fn split_sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in SENTENCE_END.find_iter(text) {
        let sentence = text[last..m.end()].trim();
        if !sentence.is_empty() {
            out.push(sentence);
        }
        last = m.end();
    }

    let rest = text[last..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    if out.is_empty() {
        out.push(text);
    }
    out
}

// The comma stays on the part it ends.
fn split_commas(sentence: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in COMMA_BREAK.find_iter(sentence) {
        let part = sentence[last..m.start() + 1].trim();
        if !part.is_empty() {
            out.push(part);
        }
        last = m.end();
    }

    let rest = sentence[last..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

fn split_words(text: &str, max_chars: usize) -> Vec<String> {
    let mut packer = Packer::new(max_chars);
    for word in text.split_whitespace() {
        packer.push(word);
    }
    packer.finish()
}

/// Greedy accumulator shared by the sentence, comma and word passes.
struct Packer {
    max_chars: usize,
    current: String,
    current_len: usize,
    out: Vec<String>,
}

impl Packer {
    fn new(max_chars: usize) -> Self {
        Self {
            max_chars,
            current: String::new(),
            current_len: 0,
            out: Vec::new(),
        }
    }

    fn push(&mut self, piece: &str) {
        let piece_len = char_len(piece);
        if self.current.is_empty() {
            self.current.push_str(piece);
            self.current_len = piece_len;
            return;
        }

        if self.current_len + 1 + piece_len <= self.max_chars {
            self.current.push(' ');
            self.current.push_str(piece);
            self.current_len += 1 + piece_len;
        } else {
            self.flush();
            self.current.push_str(piece);
            self.current_len = piece_len;
        }
    }

    fn flush(&mut self) {
        if !self.current.is_empty() {
            let done = std::mem::take(&mut self.current);
            self.out.push(done.trim().to_string());
        }
        self.current_len = 0;
    }

    fn finish(mut self) -> Vec<String> {
        self.flush();
        self.out
    }
}
