//! Hierarchical statute chunker.
//!
//! Performs a structural parse of normalized markdown and emits a typed
//! chunk tree: document root, chapters (`第X章`), articles (`第N條`),
//! numbered sections (`一、` / `第N款`), and detail splits for oversized
//! leaves. Chunks are built in an arena and linked by id, so the output
//! tree has no owning cycles.
//!
//! # Strategy selection
//!
//! One strategy is chosen per document based on which cues are present:
//!
//! | Cues found | Tree shape |
//! |------------|-----------|
//! | Chapters (+ articles) | root → chapter → article → section |
//! | Articles only | root → article → section |
//! | Markdown headings | hierarchy follows `#` count |
//! | None | root → flat detail chunks |
//!
//! The chunker never fails on content: a document with no recognizable
//! structure produces a single root chunk (split into detail children only
//! when it exceeds `max_chunk_chars`) and a stderr warning.
//!
//! # Summaries and layers
//!
//! Non-leaf chunks carry their title line plus a computed summary (first
//! paragraph, capped at `summary_max_chars`). Documents and chapters are
//! indexed in the summary layer, articles in both layers, sections and
//! details in the detail layer.

use regex::Regex;

use crate::config::ChunkingConfig;
use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkKind, Document, IndexingLayer};
use crate::path::{chunk_id_for, sanitize_label, HierarchyPath};

pub struct Chunker {
    max_chunk_chars: usize,
    summary_max_chars: usize,
    re_chapter: Regex,
    re_article: Regex,
    re_item: Regex,
    re_clause: Regex,
    re_heading: Regex,
}

/// Arena node used while the tree is under construction.
struct Node {
    raw_label: String,
    content: String,
    kind: ChunkKind,
    layer: IndexingLayer,
    parent: Option<usize>,
    children: Vec<usize>,
    article_number: Option<String>,
    chapter_number: Option<String>,
}

struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn new(root: Node) -> Self {
        Self { nodes: vec![root] }
    }

    fn push(&mut self, parent: usize, mut node: Node) -> usize {
        let idx = self.nodes.len();
        node.parent = Some(parent);
        self.nodes.push(node);
        self.nodes[parent].children.push(idx);
        idx
    }
}

impl Chunker {
    pub fn new(config: &ChunkingConfig) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| {
                RagError::InvalidInput(format!("invalid structure pattern: {}", e))
            })
        };

        Ok(Self {
            max_chunk_chars: config.max_chunk_chars,
            summary_max_chars: config.summary_max_chars,
            re_chapter: compile(
                r"(?m)^(?:#{1,3}\s*)?(第\s*[0-9０-９一二三四五六七八九十百千零〇○兩两]+\s*章)",
            )?,
            re_article: compile(
                r"(?m)^(?:#{1,4}\s*)?(第\s*[0-9０-９一二三四五六七八九十百千零〇○兩两]+\s*條(?:之[0-9一二三四五六七八九十]+)?)",
            )?,
            re_item: compile(r"(?m)^[ \t]*([一二三四五六七八九十百千]+、)")?,
            re_clause: compile(r"(?m)^[ \t]*(第\s*[0-9０-９一二三四五六七八九十]+\s*[款項目])")?,
            re_heading: compile(r"(?m)^(#{1,6})\s+(\S[^\n]*)$")?,
        })
    }

    /// Parses one document into a chunk tree. Never fails on content shape;
    /// errors only surface for identity problems (empty document id).
    pub fn chunk(&self, doc_text: &str, file_path: &str, document_id: &str) -> Result<Document> {
        if document_id.is_empty() {
            return Err(RagError::InvalidInput(
                "document id must not be empty".to_string(),
            ));
        }

        let source_file = std::path::Path::new(file_path)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| file_path.to_string());
        let title = std::path::Path::new(&source_file)
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| source_file.clone());

        let text = doc_text.trim();

        let mut tree = Tree::new(Node {
            raw_label: title.clone(),
            content: String::new(),
            kind: ChunkKind::Document,
            layer: IndexingLayer::Summary,
            parent: None,
            children: Vec::new(),
            article_number: None,
            chapter_number: None,
        });

        if text.is_empty() {
            eprintln!("Warning: {}: unstructured document with no content", source_file);
            tree.nodes[0].content = text.to_string();
        } else if self.re_chapter.is_match(text) {
            tree.nodes[0].content = titled(&title, &self.summarize(text));
            self.chunk_by_chapters(&mut tree, 0, text);
        } else if self.re_article.is_match(text) {
            tree.nodes[0].content = titled(&title, &self.summarize(text));
            self.chunk_by_articles(&mut tree, 0, text);
        } else if self.re_heading.is_match(text) {
            tree.nodes[0].content = titled(&title, &self.summarize(text));
            self.chunk_by_headings(&mut tree, 0, text);
        } else if char_len(text) <= self.max_chunk_chars {
            // Unstructured but small: the root carries the full text.
            eprintln!("Warning: {}: unstructured document, keeping flat", source_file);
            tree.nodes[0].content = text.to_string();
        } else {
            eprintln!("Warning: {}: unstructured document, keeping flat", source_file);
            tree.nodes[0].content = titled(&title, &self.summarize(text));
            self.chunk_flat(&mut tree, 0, text);
        }

        Ok(self.materialize(tree, document_id, &source_file, &title))
    }

    fn chunk_by_chapters(&self, tree: &mut Tree, parent: usize, text: &str) {
        let spans = match_spans(&self.re_chapter, text);

        for (i, span) in spans.iter().enumerate() {
            let end = spans.get(i + 1).map(|s| s.start).unwrap_or(text.len());
            let seg = text[span.start..end].trim();
            let (title_line, body) = split_title_line(seg);
            let token = span.token.clone();

            let chapter = tree.push(
                parent,
                Node {
                    raw_label: token.clone(),
                    content: titled(title_line, &self.summarize(body)),
                    kind: ChunkKind::Chapter,
                    layer: IndexingLayer::Summary,
                    parent: None,
                    children: Vec::new(),
                    article_number: None,
                    chapter_number: Some(token.clone()),
                },
            );

            if self.re_article.is_match(seg) {
                self.chunk_by_articles(tree, chapter, seg);
            } else if !body.trim().is_empty() {
                // Chapter without articles: the body still has to be
                // addressable at the detail layer.
                self.push_details(tree, chapter, body.trim(), &token);
            }
        }
    }

    fn chunk_by_articles(&self, tree: &mut Tree, parent: usize, text: &str) {
        let spans = match_spans(&self.re_article, text);

        for (i, span) in spans.iter().enumerate() {
            let end = spans.get(i + 1).map(|s| s.start).unwrap_or(text.len());
            let seg = text[span.start..end].trim();
            let token = span.token.clone();
            let (title_line, body) = split_title_line(seg);

            if char_len(seg) <= self.max_chunk_chars && !self.has_items(body) {
                // Compact article: a single leaf indexed in both layers.
                tree.push(
                    parent,
                    Node {
                        raw_label: token.clone(),
                        content: seg.to_string(),
                        kind: ChunkKind::Article,
                        layer: IndexingLayer::Both,
                        parent: None,
                        children: Vec::new(),
                        article_number: Some(token),
                        chapter_number: None,
                    },
                );
                continue;
            }

            let article = tree.push(
                parent,
                Node {
                    raw_label: token.clone(),
                    content: titled(title_line, &self.summarize(body)),
                    kind: ChunkKind::Article,
                    layer: IndexingLayer::Both,
                    parent: None,
                    children: Vec::new(),
                    article_number: Some(token.clone()),
                    chapter_number: None,
                },
            );

            if let Some(items) = self.split_items(body) {
                for (marker, item_text) in items {
                    self.push_section(tree, article, &marker, &item_text);
                }
            } else {
                self.push_details(tree, article, body.trim(), &token);
            }
        }
    }

    /// One numbered section (`一、`, `第2款`, …) under an article. Oversized
    /// sections get detail-part children of their own.
    fn push_section(&self, tree: &mut Tree, parent: usize, marker: &str, text: &str) {
        if char_len(text) <= self.max_chunk_chars {
            tree.push(
                parent,
                Node {
                    raw_label: marker.to_string(),
                    content: text.to_string(),
                    kind: ChunkKind::Section,
                    layer: IndexingLayer::Detail,
                    parent: None,
                    children: Vec::new(),
                    article_number: None,
                    chapter_number: None,
                },
            );
            return;
        }

        let (title_line, body) = split_title_line(text);
        let section = tree.push(
            parent,
            Node {
                raw_label: marker.to_string(),
                content: titled(title_line, &self.summarize(body)),
                kind: ChunkKind::Section,
                layer: IndexingLayer::Detail,
                parent: None,
                children: Vec::new(),
                article_number: None,
                chapter_number: None,
            },
        );
        self.push_details(tree, section, body.trim(), marker);
    }

    fn chunk_by_headings(&self, tree: &mut Tree, root: usize, text: &str) {
        struct Heading {
            level: usize,
            title: String,
            start: usize,
        }

        let mut headings = Vec::new();
        for caps in self.re_heading.captures_iter(text) {
            let (Some(whole), Some(hashes), Some(title)) =
                (caps.get(0), caps.get(1), caps.get(2))
            else {
                continue;
            };
            headings.push(Heading {
                level: hashes.as_str().len(),
                title: title.as_str().trim().to_string(),
                start: whole.start(),
            });
        }

        // level → most recent node at that level; level 0 is the root.
        let mut current_parents: Vec<Option<usize>> = vec![None; 7];
        current_parents[0] = Some(root);

        for (i, heading) in headings.iter().enumerate() {
            let end = headings
                .get(i + 1)
                .map(|h| h.start)
                .unwrap_or(text.len());
            let seg = text[heading.start..end].trim();
            let (title_line, body) = split_title_line(seg);

            let parent = (0..heading.level)
                .rev()
                .find_map(|lvl| current_parents[lvl])
                .unwrap_or(root);

            let (kind, layer) = match heading.level {
                1 => (ChunkKind::Chapter, IndexingLayer::Summary),
                2 => (ChunkKind::Article, IndexingLayer::Both),
                _ => (ChunkKind::Section, IndexingLayer::Detail),
            };

            let oversized = char_len(seg) > self.max_chunk_chars;
            let content = if oversized {
                titled(title_line, &self.summarize(body))
            } else {
                seg.to_string()
            };

            let node = tree.push(
                parent,
                Node {
                    raw_label: heading.title.clone(),
                    content,
                    kind,
                    layer,
                    parent: None,
                    children: Vec::new(),
                    article_number: None,
                    chapter_number: None,
                },
            );

            for lvl in heading.level..current_parents.len() {
                current_parents[lvl] = None;
            }
            current_parents[heading.level] = Some(node);

            if oversized {
                self.push_details(tree, node, body.trim(), &heading.title);
            }
        }
    }

    fn chunk_flat(&self, tree: &mut Tree, root: usize, text: &str) {
        for (i, piece) in self.split_text(text).into_iter().enumerate() {
            tree.push(
                root,
                Node {
                    raw_label: format!("chunk_{}", i + 1),
                    content: piece,
                    kind: ChunkKind::Detail,
                    layer: IndexingLayer::Detail,
                    parent: None,
                    children: Vec::new(),
                    article_number: None,
                    chapter_number: None,
                },
            );
        }
    }

    /// Splits oversized leaf content into ordered detail children. Each part
    /// repeats the parent marker line so it stays interpretable on its own.
    fn push_details(&self, tree: &mut Tree, parent: usize, text: &str, marker: &str) {
        if text.is_empty() {
            return;
        }
        for (i, piece) in self.split_text(text).into_iter().enumerate() {
            let content = if marker.is_empty() || piece.starts_with(marker) {
                piece
            } else {
                format!("{}\n\n{}", marker, piece)
            };
            tree.push(
                parent,
                Node {
                    raw_label: format!("part_{}", i + 1),
                    content,
                    kind: ChunkKind::Detail,
                    layer: IndexingLayer::Detail,
                    parent: None,
                    children: Vec::new(),
                    article_number: None,
                    chapter_number: None,
                },
            );
        }
    }

    fn has_items(&self, body: &str) -> bool {
        self.re_item.is_match(body) || self.re_clause.is_match(body)
    }

    /// Splits an article body on numbered item or clause markers, keeping
    /// source order. Returns `None` when no marker family matches.
    fn split_items(&self, body: &str) -> Option<Vec<(String, String)>> {
        for re in [&self.re_item, &self.re_clause] {
            let spans = match_spans(re, body);
            if spans.is_empty() {
                continue;
            }
            let mut items = Vec::with_capacity(spans.len());
            for (i, span) in spans.iter().enumerate() {
                let end = spans.get(i + 1).map(|s| s.start).unwrap_or(body.len());
                let item_text = body[span.start..end].trim().to_string();
                items.push((span.token.clone(), item_text));
            }
            return Some(items);
        }
        None
    }

    /// First paragraph of a subtree if it fits `summary_max_chars`, else its
    /// truncated prefix; empty when there is no paragraph to summarize.
    fn summarize(&self, text: &str) -> String {
        let first_paragraph = text
            .split("\n\n")
            .map(str::trim)
            .find(|p| !p.is_empty())
            .unwrap_or("");
        if char_len(first_paragraph) <= self.summary_max_chars {
            first_paragraph.to_string()
        } else {
            truncate_chars(first_paragraph, self.summary_max_chars)
        }
    }

    /// Splits text into pieces of at most `max_chunk_chars` characters,
    /// preferring paragraph boundaries, then line/sentence boundaries.
    fn split_text(&self, text: &str) -> Vec<String> {
        let max = self.max_chunk_chars;
        let mut pieces = Vec::new();
        let mut buf = String::new();
        let mut buf_chars = 0usize;

        for para in text.split("\n\n") {
            let para = para.trim();
            if para.is_empty() {
                continue;
            }
            let para_chars = char_len(para);

            if buf_chars > 0 && buf_chars + 2 + para_chars > max {
                pieces.push(std::mem::take(&mut buf));
                buf_chars = 0;
            }

            if para_chars > max {
                if buf_chars > 0 {
                    pieces.push(std::mem::take(&mut buf));
                    buf_chars = 0;
                }
                split_hard(para, max, &mut pieces);
            } else {
                if buf_chars > 0 {
                    buf.push_str("\n\n");
                    buf_chars += 2;
                }
                buf.push_str(para);
                buf_chars += para_chars;
            }
        }

        if buf_chars > 0 {
            pieces.push(buf);
        }
        if pieces.is_empty() && !text.trim().is_empty() {
            pieces.push(text.trim().to_string());
        }
        pieces
    }

    /// Converts the arena into persistent chunks, assigning paths, ids, and
    /// pre-order positions, and propagating chapter numbers downward.
    fn materialize(
        &self,
        tree: Tree,
        document_id: &str,
        source_file: &str,
        title: &str,
    ) -> Document {
        let now = chrono::Utc::now().timestamp();
        let mut chunks: Vec<Chunk> = Vec::with_capacity(tree.nodes.len());

        // Pre-order walk; children visited in source order.
        struct Frame {
            node: usize,
            path: HierarchyPath,
            parent_slot: Option<usize>,
            chapter: Option<String>,
        }

        let mut stack = vec![Frame {
            node: 0,
            path: HierarchyPath::root(),
            parent_slot: None,
            chapter: None,
        }];

        while let Some(frame) = stack.pop() {
            let node = &tree.nodes[frame.node];
            let chapter_number = node.chapter_number.clone().or(frame.chapter.clone());
            let id = chunk_id_for(document_id, &frame.path);
            let slot = chunks.len();

            let parent_id = frame.parent_slot.map(|p| chunks[p].id.clone());
            if let Some(p) = frame.parent_slot {
                let child_id = id.clone();
                chunks[p].children_ids.push(child_id);
            }

            chunks.push(Chunk {
                id,
                document_id: document_id.to_string(),
                content: node.content.clone(),
                path: frame.path.clone(),
                kind: node.kind,
                indexing_layer: node.layer,
                parent_id,
                children_ids: Vec::new(),
                source_file: source_file.to_string(),
                page_number: 1,
                article_number: node.article_number.clone(),
                chapter_number,
                position: slot as i64,
                metadata: serde_json::json!({ "raw_label": node.raw_label }),
                created_at: now,
            });

            // Sibling labels must stay unique after sanitization; repeated
            // titles get a numeric suffix before digesting the child path.
            let mut used: std::collections::HashMap<String, usize> =
                std::collections::HashMap::new();
            let mut child_frames = Vec::with_capacity(node.children.len());
            for &child in &node.children {
                let raw = &tree.nodes[child].raw_label;
                let mut label = sanitize_label(raw);
                let seen = used.entry(label.clone()).or_insert(0);
                *seen += 1;
                if *seen > 1 {
                    label = format!("{}_{}", label, *seen);
                }
                child_frames.push(Frame {
                    node: child,
                    path: chunks[slot].path.child_sanitized(label),
                    parent_slot: Some(slot),
                    chapter: chunks[slot].chapter_number.clone(),
                });
            }
            // LIFO stack: push children reversed to visit them in order.
            for frame in child_frames.into_iter().rev() {
                stack.push(frame);
            }
        }

        Document {
            id: document_id.to_string(),
            title: title.to_string(),
            source_file: source_file.to_string(),
            law_category: None,
            version: None,
            chunks,
            created_at: now,
            updated_at: now,
        }
    }
}

struct MatchSpan {
    start: usize,
    token: String,
}

/// Positions and captured marker tokens for every match of a cue pattern.
fn match_spans(re: &Regex, text: &str) -> Vec<MatchSpan> {
    let mut spans = Vec::new();
    for caps in re.captures_iter(text) {
        let (Some(whole), Some(token)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        spans.push(MatchSpan {
            start: whole.start(),
            token: token.as_str().trim().to_string(),
        });
    }
    spans
}

/// Splits a segment into its first line and the remainder.
fn split_title_line(seg: &str) -> (&str, &str) {
    match seg.find('\n') {
        Some(pos) => (seg[..pos].trim_end(), &seg[pos + 1..]),
        None => (seg, ""),
    }
}

fn titled(title_line: &str, summary: &str) -> String {
    if summary.is_empty() || summary == title_line {
        title_line.to_string()
    } else {
        format!("{}\n\n{}", title_line, summary)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Hard-splits a single oversized paragraph at char boundaries, preferring
/// newline, sentence, or space breaks within the window.
fn split_hard(para: &str, max: usize, out: &mut Vec<String>) {
    let chars: Vec<char> = para.chars().collect();
    let mut start = 0;
    while start < chars.len() {
        let window_end = (start + max).min(chars.len());
        let split_at = if window_end < chars.len() {
            chars[start..window_end]
                .iter()
                .rposition(|&c| c == '\n' || c == '。' || c == ' ')
                .map(|pos| start + pos + 1)
                .unwrap_or(window_end)
        } else {
            window_end
        };
        let piece: String = chars[start..split_at].iter().collect();
        let piece = piece.trim().to_string();
        if !piece.is_empty() {
            out.push(piece);
        }
        start = split_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunker() -> Chunker {
        Chunker::new(&ChunkingConfig::default()).unwrap()
    }

    fn small_chunker(max: usize) -> Chunker {
        Chunker::new(&ChunkingConfig {
            max_chunk_chars: max,
            summary_max_chars: 240,
        })
        .unwrap()
    }

    const STATUTE: &str = "\
陸海空軍懲罰法

## 第一章 總則

本法規範陸海空軍現役軍人之懲罰。

### 第 1 條

陸海空軍現役軍人之懲罰，依本法行之。

### 第 2 條

本法所稱現役軍人，指依兵役法或其他法律服現役之軍官、士官、士兵。

## 第二章 懲罰種類

### 第 7 條

現役軍人違失行為之懲罰如下：
一、降階。
二、降級。
三、記過。

### 第 8 條

懲罰之執行，由權責單位為之。
";

    #[test]
    fn chapters_and_articles_build_a_four_level_tree() {
        let doc = chunker().chunk(STATUTE, "陸海空軍懲罰法.md", "doc1").unwrap();

        let root = doc.root().unwrap();
        assert_eq!(root.kind, ChunkKind::Document);
        assert_eq!(root.indexing_layer, IndexingLayer::Summary);
        assert_eq!(root.parent_id, None);

        let chapters: Vec<_> = doc
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Chapter)
            .collect();
        assert_eq!(chapters.len(), 2);
        for chapter in &chapters {
            assert_eq!(chapter.depth(), 1);
            assert_eq!(chapter.indexing_layer, IndexingLayer::Summary);
            assert_eq!(chapter.parent_id.as_deref(), Some(root.id.as_str()));
            assert!(chapter.chapter_number.is_some());
        }

        let articles: Vec<_> = doc
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Article)
            .collect();
        assert_eq!(articles.len(), 4);
        for article in &articles {
            assert_eq!(article.depth(), 2);
            assert_eq!(article.indexing_layer, IndexingLayer::Both);
            assert!(article.article_number.is_some());
            // Chapter numbers propagate downward as read-only metadata.
            assert!(article.chapter_number.is_some());
        }

        let article7 = articles
            .iter()
            .find(|a| a.article_number.as_deref() == Some("第 7 條"))
            .unwrap();
        assert_eq!(article7.chapter_number.as_deref(), Some("第二章"));

        // 第 7 條 has numbered items, which become depth-3 sections.
        let sections: Vec<_> = doc
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Section)
            .collect();
        assert_eq!(sections.len(), 3);
        for section in &sections {
            assert_eq!(section.depth(), 3);
            assert_eq!(section.indexing_layer, IndexingLayer::Detail);
            assert_eq!(section.parent_id.as_deref(), Some(article7.id.as_str()));
        }
        assert!(sections[0].content.starts_with("一、"));
    }

    #[test]
    fn parent_depth_and_path_invariants_hold() {
        let doc = chunker().chunk(STATUTE, "law.md", "doc1").unwrap();
        let by_id: std::collections::HashMap<_, _> =
            doc.chunks.iter().map(|c| (c.id.as_str(), c)).collect();

        for chunk in &doc.chunks {
            assert_eq!(chunk.path.depth(), chunk.depth());
            match &chunk.parent_id {
                None => assert_eq!(chunk.depth(), 0),
                Some(pid) => {
                    let parent = by_id[pid.as_str()];
                    assert_eq!(parent.depth() + 1, chunk.depth());
                    assert!(parent.path.is_ancestor_of(&chunk.path));
                    assert!(parent.children_ids.contains(&chunk.id));
                }
            }
        }

        // Pre-order positions are contiguous and parents precede children.
        for (i, chunk) in doc.chunks.iter().enumerate() {
            assert_eq!(chunk.position, i as i64);
            if let Some(pid) = &chunk.parent_id {
                let parent_pos = by_id[pid.as_str()].position;
                assert!(parent_pos < chunk.position);
            }
        }
    }

    #[test]
    fn sibling_paths_are_unique() {
        let doc = chunker().chunk(STATUTE, "law.md", "doc1").unwrap();
        let mut seen = std::collections::HashSet::new();
        for chunk in &doc.chunks {
            assert!(seen.insert(chunk.path.to_string()), "dup {}", chunk.path);
        }
    }

    #[test]
    fn chunking_is_deterministic() {
        let a = chunker().chunk(STATUTE, "law.md", "doc1").unwrap();
        let b = chunker().chunk(STATUTE, "law.md", "doc1").unwrap();
        assert_eq!(a.chunks.len(), b.chunks.len());
        for (x, y) in a.chunks.iter().zip(b.chunks.iter()) {
            assert_eq!(x.id, y.id);
            assert_eq!(x.path, y.path);
            assert_eq!(x.content, y.content);
            assert_eq!(x.indexing_layer, y.indexing_layer);
        }
    }

    #[test]
    fn articles_without_chapters_sit_at_depth_one() {
        let text = "\
### 第 1 條

甲規定。

### 第 2 條

乙規定。
";
        let doc = chunker().chunk(text, "reg.md", "doc2").unwrap();
        let articles: Vec<_> = doc
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Article)
            .collect();
        assert_eq!(articles.len(), 2);
        for article in articles {
            assert_eq!(article.depth(), 1);
            assert!(article.chapter_number.is_none());
        }
    }

    #[test]
    fn markdown_headings_follow_hash_count() {
        let text = "\
# Overview

Intro paragraph.

## Usage

How to use this.

### Flags

Detailed flags.
";
        let doc = chunker().chunk(text, "readme.md", "doc3").unwrap();
        let overview = doc
            .chunks
            .iter()
            .find(|c| c.raw_label() == Some("Overview"))
            .unwrap();
        assert_eq!(overview.kind, ChunkKind::Chapter);
        assert_eq!(overview.depth(), 1);

        let usage = doc
            .chunks
            .iter()
            .find(|c| c.raw_label() == Some("Usage"))
            .unwrap();
        assert_eq!(usage.kind, ChunkKind::Article);
        assert_eq!(usage.indexing_layer, IndexingLayer::Both);
        assert_eq!(usage.parent_id.as_deref(), Some(overview.id.as_str()));

        let flags = doc
            .chunks
            .iter()
            .find(|c| c.raw_label() == Some("Flags"))
            .unwrap();
        assert_eq!(flags.kind, ChunkKind::Section);
        assert_eq!(flags.indexing_layer, IndexingLayer::Detail);
        assert_eq!(flags.parent_id.as_deref(), Some(usage.id.as_str()));
    }

    #[test]
    fn small_unstructured_document_is_a_single_root() {
        let text = "一段沒有任何標題的短文。";
        let doc = chunker().chunk(text, "note.txt", "doc4").unwrap();
        assert_eq!(doc.chunks.len(), 1);
        assert_eq!(doc.chunks[0].content, text);
        assert_eq!(doc.chunks[0].kind, ChunkKind::Document);
    }

    #[test]
    fn large_unstructured_document_splits_into_details() {
        let paragraph = "句子。".repeat(40);
        let text = format!("{}\n\n{}\n\n{}", paragraph, paragraph, paragraph);
        let doc = small_chunker(100).chunk(&text, "note.txt", "doc5").unwrap();

        let details: Vec<_> = doc
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Detail)
            .collect();
        assert!(details.len() > 1);
        for detail in &details {
            assert_eq!(detail.depth(), 1);
            assert_eq!(detail.indexing_layer, IndexingLayer::Detail);
        }
        // Order is preserved through positions.
        let positions: Vec<i64> = details.iter().map(|d| d.position).collect();
        let mut sorted = positions.clone();
        sorted.sort();
        assert_eq!(positions, sorted);
    }

    #[test]
    fn empty_document_yields_root_only() {
        let doc = chunker().chunk("", "empty.md", "doc6").unwrap();
        assert_eq!(doc.chunks.len(), 1);
        assert_eq!(doc.chunks[0].content, "");
    }

    #[test]
    fn oversized_article_splits_into_ordered_parts() {
        let body = "很長的條文內容。".repeat(60);
        let text = format!("### 第 1 條\n\n{}", body);
        let doc = small_chunker(120).chunk(&text, "law.md", "doc7").unwrap();

        let article = doc
            .chunks
            .iter()
            .find(|c| c.kind == ChunkKind::Article)
            .unwrap();
        assert_eq!(article.indexing_layer, IndexingLayer::Both);
        assert!(article.content.starts_with("### 第 1 條"));

        let parts: Vec<_> = doc
            .chunks
            .iter()
            .filter(|c| c.kind == ChunkKind::Detail)
            .collect();
        assert!(parts.len() > 1);
        for part in &parts {
            assert_eq!(part.parent_id.as_deref(), Some(article.id.as_str()));
            // Each part repeats the article marker for context.
            assert!(part.content.starts_with("第 1 條"));
        }
    }

    #[test]
    fn summary_respects_char_cap() {
        let chunker = chunker();
        let long_paragraph = "字".repeat(500);
        let summary = chunker.summarize(&long_paragraph);
        assert_eq!(summary.chars().count(), 240);

        let short = chunker.summarize("短摘要。\n\n其餘內容。");
        assert_eq!(short, "短摘要。");
    }

    #[test]
    fn total_chars_and_chunk_count_are_derived() {
        let doc = chunker().chunk(STATUTE, "law.md", "doc1").unwrap();
        assert_eq!(doc.chunk_count(), doc.chunks.len() as i64);
        let expected: i64 = doc.chunks.iter().map(|c| c.char_count()).sum();
        assert_eq!(doc.total_chars(), expected);
    }
}
