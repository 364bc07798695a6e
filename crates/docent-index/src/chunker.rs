//! Syntax-aware chunking followed by fixed-size overlapping line windows.
//!
//! Chunking runs in two passes. A [`SyntaxSplitter`] first cuts the source
//! along AST sibling boundaries into pieces of at most `max_chars`
//! characters where the grammar allows it. Each piece is then re-windowed
//! into windows of `chunk_lines` lines that overlap by
//! `chunk_lines_overlap` lines. A window over `max_chars` is repacked by
//! whole lines, and a single line over the budget is cut by characters, so
//! every window stays within both budgets.

use std::sync::Arc;

use tree_sitter::{Node, Parser};

use crate::error::{IndexError, Result};
use crate::languages::Lang;

/// Chunker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkerConfig {
    /// Lines per window (default: 24).
    pub chunk_lines: usize,
    /// Lines shared by consecutive windows (default: 4).
    pub chunk_lines_overlap: usize,
    /// Character budget for a syntactic piece and for a window (default: 1024).
    pub max_chars: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_lines: 24,
            chunk_lines_overlap: 4,
            max_chars: 1024,
        }
    }
}

impl ChunkerConfig {
    /// Distance between the first lines of consecutive windows.
    #[must_use]
    pub fn stride(&self) -> usize {
        self.chunk_lines
            .saturating_sub(self.chunk_lines_overlap)
            .max(1)
    }
}

/// One line window of a file, before file metadata is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkWindow {
    pub text: String,
    /// 1-based position in the file's window sequence.
    pub chunk_index: usize,
    pub char_length: usize,
    pub line_length: usize,
    pub is_last_chunk: bool,
}

/// First-pass splitter that respects code structure.
pub trait SyntaxSplitter: Send + Sync {
    /// Split `source` into ordered pieces that together contain every
    /// non-blank line of the source.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be parsed for `lang`.
    fn split(&self, source: &str, lang: Lang, max_chars: usize) -> Result<Vec<String>>;
}

/// Tree-sitter backed [`SyntaxSplitter`].
///
/// Siblings are packed greedily up to `max_chars`; a child that alone
/// exceeds the budget is split recursively along its own children. Pieces
/// are snapped to whole lines and never share a line.
#[derive(Debug, Clone, Copy, Default)]
pub struct TreeSitterSplitter;

impl SyntaxSplitter for TreeSitterSplitter {
    fn split(&self, source: &str, lang: Lang, max_chars: usize) -> Result<Vec<String>> {
        let grammar = lang
            .grammar()
            .ok_or_else(|| IndexError::UnsupportedFileType(lang.id().to_string()))?;

        let mut parser = Parser::new();
        parser
            .set_language(&grammar)
            .map_err(|e| IndexError::Parse(format!("set_language failed: {e}")))?;

        let tree = parser
            .parse(source, None)
            .ok_or_else(|| IndexError::Parse(format!("parse failed for {lang} source")))?;

        let mut cuts = Cuts {
            open: 0,
            offsets: Vec::new(),
        };
        collect_cuts(&tree.root_node(), source, max_chars, &mut cuts);

        Ok(pieces_from_cuts(source, &cuts.offsets))
    }
}

/// Byte offsets where a new piece begins, plus the start of the open piece.
struct Cuts {
    open: usize,
    offsets: Vec<usize>,
}

impl Cuts {
    fn cut(&mut self, at: usize) {
        if at > self.open {
            self.offsets.push(at);
            self.open = at;
        }
    }
}

fn collect_cuts(node: &Node, source: &str, max_chars: usize, cuts: &mut Cuts) {
    let mut cursor = node.walk();
    let children: Vec<Node> = node.children(&mut cursor).collect();
    let mut last_end = cuts.open;

    for child in children {
        let child_chars = char_len(&source[child.byte_range()]);

        if child_chars > max_chars {
            cuts.cut(child.start_byte());
            // An oversized leaf (e.g. a long string literal) stays whole
            // here and is bounded by `window_piece`.
            if child.child_count() > 0 {
                collect_cuts(&child, source, max_chars, cuts);
            }
            cuts.cut(child.end_byte());
        } else if last_end > cuts.open
            && char_len(&source[cuts.open..child.end_byte()]) > max_chars
        {
            cuts.cut(last_end);
        }

        last_end = child.end_byte();
    }
}

/// Partition `source` at `offsets`, snap each part to whole lines, and drop
/// parts that are blank or whose lines were already emitted.
fn pieces_from_cuts(source: &str, offsets: &[usize]) -> Vec<String> {
    let lines: Vec<&str> = source.split('\n').collect();
    let bytes = source.as_bytes();
    let line_of = |byte: usize| bytes[..byte].iter().filter(|b| **b == b'\n').count();

    let mut bounds = Vec::with_capacity(offsets.len() + 2);
    bounds.push(0);
    bounds.extend(offsets.iter().copied().filter(|o| *o < source.len()));
    bounds.push(source.len());
    bounds.dedup();

    let mut pieces = Vec::new();
    let mut next_line = 0usize;

    for pair in bounds.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if start >= end {
            continue;
        }
        let first = line_of(start).max(next_line);
        let last = line_of(end - 1);
        if first > last {
            continue;
        }
        next_line = last + 1;

        let text = lines[first..=last].join("\n");
        if !text.trim().is_empty() {
            pieces.push(text);
        }
    }

    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Split a piece into overlapping windows of `chunk_lines` lines, each at
/// most `max_chars` characters.
///
/// The last window may be shorter. Windowing stops as soon as a window
/// reaches the end of the piece.
fn window_piece(piece: &str, config: &ChunkerConfig) -> Vec<String> {
    let lines: Vec<&str> = piece.split('\n').collect();
    let size = config.chunk_lines.max(1);
    let stride = config.stride();
    let max_chars = config.max_chars.max(1);

    let mut windows = Vec::new();
    let mut start = 0usize;
    loop {
        let end = (start + size).min(lines.len());
        let window = &lines[start..end];
        let text = window.join("\n");
        if char_len(&text) <= max_chars {
            windows.push(text);
        } else {
            windows.extend(pack_lines(window, max_chars));
        }
        if end >= lines.len() {
            break;
        }
        start += stride;
    }
    windows
}

/// Greedily pack whole lines into texts of at most `max_chars` characters.
/// A line that alone exceeds the budget is cut at character boundaries.
fn pack_lines(lines: &[&str], max_chars: usize) -> Vec<String> {
    let mut out = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_chars = 0usize;

    for &line in lines {
        let line_chars = char_len(line);
        let joined = if current.is_empty() {
            line_chars
        } else {
            current_chars + 1 + line_chars
        };

        if joined > max_chars && !current.is_empty() {
            out.push(current.join("\n"));
            current.clear();
            current_chars = 0;
        }

        if line_chars > max_chars {
            out.extend(split_chars(line, max_chars).map(str::to_string));
        } else if current.is_empty() {
            current.push(line);
            current_chars = line_chars;
        } else {
            current.push(line);
            current_chars += 1 + line_chars;
        }
    }
    if !current.is_empty() {
        out.push(current.join("\n"));
    }
    out
}

fn split_chars(line: &str, max_chars: usize) -> impl Iterator<Item = &str> {
    let mut rest = line;
    std::iter::from_fn(move || {
        if rest.is_empty() {
            return None;
        }
        let cut = rest
            .char_indices()
            .nth(max_chars)
            .map_or(rest.len(), |(i, _)| i);
        let (head, tail) = rest.split_at(cut);
        rest = tail;
        Some(head)
    })
}

/// Two-pass chunker: syntax split, then line windows.
#[derive(Clone)]
pub struct Chunker {
    config: ChunkerConfig,
    splitter: Arc<dyn SyntaxSplitter>,
}

impl std::fmt::Debug for Chunker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Chunker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(ChunkerConfig::default())
    }
}

impl Chunker {
    #[must_use]
    pub fn new(config: ChunkerConfig) -> Self {
        Self::with_splitter(config, Arc::new(TreeSitterSplitter))
    }

    #[must_use]
    pub fn with_splitter(config: ChunkerConfig, splitter: Arc<dyn SyntaxSplitter>) -> Self {
        Self { config, splitter }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk one file's source text.
    ///
    /// Deterministic for a given source, language, and configuration. An
    /// empty or whitespace-only source yields no windows.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::UnsupportedFileType`] if no grammar is compiled
    /// in for `lang`, or a parse error from the splitter.
    pub fn chunk(&self, source: &str, lang: Lang) -> Result<Vec<ChunkWindow>> {
        if source.trim().is_empty() {
            return Ok(Vec::new());
        }

        let pieces = self.splitter.split(source, lang, self.config.max_chars)?;

        let texts: Vec<String> = pieces
            .iter()
            .flat_map(|piece| window_piece(piece, &self.config))
            .filter(|text| !text.trim().is_empty())
            .collect();

        let total = texts.len();
        Ok(texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| ChunkWindow {
                chunk_index: i + 1,
                char_length: char_len(&text),
                line_length: text.split('\n').count(),
                is_last_chunk: i + 1 == total,
                text,
            })
            .collect())
    }
}
