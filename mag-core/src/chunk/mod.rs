//! AST-driven chunking: turn a source file into an ordered list of
//! semantically bounded chunks.
//!
//! Declarations are visited in pre-order. Containers (namespace, class,
//! interface, struct) produce a summary chunk holding their header and the
//! signatures of their members; members produce their own chunks. A chunk
//! over the token budget is split at statement boundaries and every
//! continuation is prefixed with the declaration's signature.

mod lang;
mod split;

pub use lang::Language;

use crate::config::IndexingConfig;
use crate::error::MagError;
use crate::model::{qualify, ChunkId, ChunkKind, CodeChunk, FragmentInfo, LineSpan, Span};
use lang::LanguageSpec;
use serde::Serialize;
use std::path::Path;
use std::sync::OnceLock;
use tiktoken_rs::CoreBPE;
use tree_sitter::{Node, Parser, Tree};

static BPE: OnceLock<Option<CoreBPE>> = OnceLock::new();

/// Eagerly build the BPE encoder before parallel work
pub fn warm_bpe() {
    let _ = BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok());
}

/// Estimate token count using tiktoken-rs
pub fn estimate_tokens(text: &str) -> usize {
    match BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        // Fallback: rough estimate of 4 chars per token
        None => text.len().div_ceil(4),
    }
}

/// Declaration entry returned by [`AstChunker::outline`]
#[derive(Debug, Clone, Serialize)]
pub struct OutlineEntry {
    pub kind: ChunkKind,
    pub name: String,
    pub parent: Option<String>,
    pub lines: LineSpan,
    pub signature: Option<String>,
    pub has_doc: bool,
}

/// Parses files and cuts them into chunks
#[derive(Debug, Clone)]
pub struct AstChunker {
    token_budget: usize,
    reject_syntax_errors: bool,
}

impl AstChunker {
    pub fn new(config: &IndexingConfig) -> Self {
        Self {
            token_budget: config.chunk_size_tokens.max(1),
            reject_syntax_errors: config.reject_syntax_errors,
        }
    }

    pub fn with_budget(token_budget: usize) -> Self {
        Self {
            token_budget: token_budget.max(1),
            reject_syntax_errors: true,
        }
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    /// Chunk one file. `path` is relative to the codebase root and picks the
    /// grammar; `fingerprint` is stamped on every chunk.
    pub fn chunk(&self, path: &str, source: &str, fingerprint: &str) -> crate::Result<Vec<CodeChunk>> {
        let language = Language::from_path(Path::new(path)).ok_or_else(|| MagError::Parse {
            path: path.to_string(),
            message: "no grammar for this file type".to_string(),
        })?;
        let tree = parse_tree(path, source, language, self.reject_syntax_errors)?;

        let mut walker = Walker {
            path,
            source,
            fingerprint,
            spec: language.spec(),
            budget: self.token_budget,
            lines: LineIndex::new(source),
            chunks: Vec::new(),
        };
        walker.visit_children(tree.root_node(), &mut Vec::new());

        if walker.chunks.is_empty() && !source.trim().is_empty() {
            walker.emit_whole_file();
        }

        Ok(walker.chunks)
    }

    /// Declarations of a file without splitting details
    pub fn outline(&self, path: &str, source: &str) -> crate::Result<Vec<OutlineEntry>> {
        let chunks = self.chunk(path, source, "")?;
        let mut entries = Vec::new();

        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.kind == ChunkKind::Fragment {
                continue;
            }
            // A split declaration ends where its last fragment ends
            let end = match chunk.fragment {
                Some(info) => chunks[i..(i + info.total).min(chunks.len())]
                    .iter()
                    .map(|c| c.lines.end)
                    .max()
                    .unwrap_or(chunk.lines.end),
                None => chunk.lines.end,
            };
            entries.push(OutlineEntry {
                kind: chunk.kind,
                name: chunk.symbol.clone(),
                parent: chunk.parent_path.clone(),
                lines: LineSpan {
                    start: chunk.lines.start,
                    end,
                },
                signature: chunk.signature.clone(),
                has_doc: chunk.has_doc,
            });
        }

        Ok(entries)
    }
}

fn parse_tree(path: &str, source: &str, language: Language, strict: bool) -> crate::Result<Tree> {
    let parse_err = |message: String| MagError::Parse {
        path: path.to_string(),
        message,
    };

    let mut parser = Parser::new();
    parser
        .set_language(&language.grammar())
        .map_err(|e| parse_err(e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| parse_err("parser produced no tree".to_string()))?;

    if strict && tree.root_node().has_error() {
        let line = first_error(tree.root_node())
            .map(|n| n.start_position().row + 1)
            .unwrap_or(1);
        return Err(parse_err(format!("syntax error near line {}", line)));
    }

    Ok(tree)
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error)
}

fn named_children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor).collect()
}

/// Whitespace runs collapsed to single spaces
fn collapse(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Line lookup by byte offset
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    /// 1-indexed line containing `offset`
    fn line_of(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset).max(1)
    }

    fn span_lines(&self, span: &Span) -> LineSpan {
        let start = self.line_of(span.start);
        let end = self.line_of(span.end.saturating_sub(1).max(span.start));
        LineSpan { start, end }
    }
}

/// A chunkable declaration located in the tree
struct Declaration<'t> {
    node: Node<'t>,
    kind: ChunkKind,
    name: String,
    body: Option<Node<'t>>,
    /// Start including attached doc comments and attributes
    start: usize,
    has_doc: bool,
}

impl<'t> Declaration<'t> {
    fn read(node: Node<'t>, kind: ChunkKind, source: &str, spec: &LanguageSpec) -> Self {
        let (start, has_doc) = leading_trivia(node, source, spec);
        Self {
            node,
            kind,
            name: declaration_name(node, source, spec),
            body: body_of(node, spec),
            start,
            has_doc,
        }
    }

    fn span(&self) -> Span {
        self.start..self.node.end_byte()
    }

    fn signature(&self, source: &str, spec: &LanguageSpec) -> String {
        let from = signature_start(self.node, spec);
        let to = self.body.map(|b| b.start_byte()).unwrap_or(self.node.end_byte());
        source[from..to.max(from)].trim().to_string()
    }
}

fn body_of<'t>(node: Node<'t>, spec: &LanguageSpec) -> Option<Node<'t>> {
    spec.body_fields
        .iter()
        .find_map(|field| node.child_by_field_name(field))
}

/// First byte after any attributes inside the declaration node
fn signature_start(node: Node<'_>, spec: &LanguageSpec) -> usize {
    let mut cursor = node.walk();
    let start = node
        .children(&mut cursor)
        .find(|c| !spec.is_attribute(c.kind()) && !spec.is_comment(c.kind()))
        .map(|c| c.start_byte())
        .unwrap_or(node.start_byte());
    start
}

/// Walk back over doc comments and attributes directly above `node`
fn leading_trivia(node: Node<'_>, source: &str, spec: &LanguageSpec) -> (usize, bool) {
    let mut start = node.start_byte();
    let mut start_row = node.start_position().row;
    let mut has_doc = false;
    let mut current = node.prev_sibling();

    while let Some(prev) = current {
        // A blank line separates unrelated comments
        if prev.end_position().row + 1 < start_row {
            break;
        }
        let kind = prev.kind();
        if spec.is_comment(kind) && spec.is_doc_comment(&source[prev.byte_range()]) {
            has_doc = true;
        } else if !spec.is_attribute(kind) {
            break;
        }
        start = prev.start_byte();
        start_row = prev.start_position().row;
        current = prev.prev_sibling();
    }

    (start, has_doc)
}

fn declaration_name(node: Node<'_>, source: &str, spec: &LanguageSpec) -> String {
    let text = |n: Node<'_>| source[n.byte_range()].trim().to_string();

    let name = spec
        .name_fields
        .iter()
        .find_map(|field| node.child_by_field_name(field))
        .map(text)
        .or_else(|| declarator_names(node, source))
        .or_else(|| match node.kind() {
            "operator_declaration" => node
                .child_by_field_name("operator")
                .map(|op| format!("operator {}", text(op))),
            "conversion_operator_declaration" => node
                .child_by_field_name("type")
                .map(|ty| format!("operator {}", text(ty))),
            "indexer_declaration" => Some("this[]".to_string()),
            _ => None,
        })
        .unwrap_or_else(|| "<anonymous>".to_string());

    // Drop generic arguments (`Repository<T>` -> `Repository`)
    match name.find('<') {
        Some(i) if i > 0 => name[..i].trim().to_string(),
        _ => name,
    }
}

/// Names declared by a field declaration (`int a, b;` -> `a,b`)
fn declarator_names(node: Node<'_>, source: &str) -> Option<String> {
    let mut names = Vec::new();
    collect_declarators(node, source, &mut names);
    if names.is_empty() {
        None
    } else {
        Some(names.join(","))
    }
}

fn collect_declarators(node: Node<'_>, source: &str, names: &mut Vec<String>) {
    for child in named_children(node) {
        if child.kind() == "variable_declarator" {
            let ident = child.child_by_field_name("name").or_else(|| {
                named_children(child)
                    .into_iter()
                    .find(|c| c.kind() == "identifier")
            });
            if let Some(ident) = ident {
                names.push(source[ident.byte_range()].to_string());
            }
        } else if child.kind() == "variable_declaration" {
            collect_declarators(child, source, names);
        }
    }
}

/// Chunk under construction
struct Draft {
    kind: ChunkKind,
    symbol: String,
    parent: Option<String>,
    span: Span,
    lines: LineSpan,
    text: String,
    signature: Option<String>,
    has_doc: bool,
    fragment: Option<FragmentInfo>,
}

struct Walker<'a> {
    path: &'a str,
    source: &'a str,
    fingerprint: &'a str,
    spec: &'static LanguageSpec,
    budget: usize,
    lines: LineIndex,
    chunks: Vec<CodeChunk>,
}

impl<'a> Walker<'a> {
    fn visit_children(&mut self, node: Node<'_>, scope: &mut Vec<String>) {
        let depth = scope.len();
        let children = named_children(node);

        for (i, child) in children.iter().enumerate() {
            let child = *child;
            let rule = match self.spec.rule(child.kind()) {
                Some(r) => r,
                None => {
                    if !self.spec.is_comment(child.kind()) {
                        self.visit_children(child, scope);
                    }
                    continue;
                }
            };

            let decl = Declaration::read(child, rule.kind, self.source, self.spec);

            if self.spec.file_scoped_namespaces.contains(&child.kind()) {
                // Members live inside the node or follow it as siblings
                let inner: Vec<Node<'_>> = named_children(child)
                    .into_iter()
                    .filter(|c| self.member_declaration(*c).is_some())
                    .collect();
                let members: Vec<Node<'_>> = if inner.is_empty() {
                    children[i + 1..]
                        .iter()
                        .copied()
                        .filter(|c| self.member_declaration(*c).is_some())
                        .collect()
                } else {
                    inner
                };
                self.emit_container(&decl, scope, &members);
                scope.push(decl.name.clone());
                self.visit_children(child, scope);
                // Scope stays open for the following siblings
                continue;
            }

            match decl.body {
                Some(body) if decl.kind.is_container() => {
                    let members = named_children(body);
                    self.emit_container(&decl, scope, &members);
                    scope.push(decl.name.clone());
                    self.visit_children(body, scope);
                    scope.pop();
                }
                _ => self.emit_member(&decl, scope),
            }
        }

        scope.truncate(depth);
    }

    /// Summary chunk: header plus one line per member
    fn emit_container(&mut self, decl: &Declaration<'_>, scope: &[String], members: &[Node<'_>]) {
        let header_end = decl.body.map(|b| b.start_byte()).unwrap_or(decl.node.end_byte());
        let mut text = self.source[decl.start..header_end].trim_end().to_string();
        let mut member_lines = Vec::new();
        for member in members {
            if let Some(line) = self.member_line(*member) {
                member_lines.push(line);
            }
        }

        if decl.body.is_some() {
            text.push('\n');
            if self.spec.braces {
                text.push_str("{\n");
            }
            for line in &member_lines {
                text.push_str("    ");
                text.push_str(line);
                text.push('\n');
            }
            if self.spec.braces {
                text.push('}');
            }
        } else if !member_lines.is_empty() {
            text.push_str("\n\n");
            text.push_str(&member_lines.join("\n"));
        }

        let span = decl.span();
        let signature = decl.signature(self.source, self.spec);
        let base = Draft {
            kind: decl.kind,
            symbol: decl.name.clone(),
            parent: parent_path(scope),
            lines: self.lines.span_lines(&span),
            span,
            text,
            signature: Some(signature),
            has_doc: decl.has_doc,
            fragment: None,
        };
        self.push_text_fragments(base);
    }

    /// Leaf declaration: full source span, split at statements if too large
    fn emit_member(&mut self, decl: &Declaration<'_>, scope: &[String]) {
        let span = decl.span();
        let signature = decl.signature(self.source, self.spec);
        let base = Draft {
            kind: decl.kind,
            symbol: decl.name.clone(),
            parent: parent_path(scope),
            lines: self.lines.span_lines(&span),
            span: span.clone(),
            text: self.source[span.clone()].to_string(),
            signature: Some(signature),
            has_doc: decl.has_doc,
            fragment: None,
        };

        if estimate_tokens(&base.text) <= self.budget {
            self.push(base);
            return;
        }

        let boundaries = self.statement_boundaries(decl);
        self.push_span_fragments(base, &boundaries);
    }

    /// A file without declarations becomes one fragment chunk
    fn emit_whole_file(&mut self) {
        let span = 0..self.source.len();
        let symbol = Path::new(self.path)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string());
        let base = Draft {
            kind: ChunkKind::Fragment,
            symbol,
            parent: None,
            lines: self.lines.span_lines(&span),
            span: span.clone(),
            text: self.source.to_string(),
            signature: None,
            has_doc: false,
            fragment: None,
        };

        if estimate_tokens(&base.text) <= self.budget {
            self.push(base);
            return;
        }
        let boundaries = split::line_starts(self.source, &span);
        self.push_span_fragments(base, &boundaries);
    }

    /// Statement starts inside the body, aligned to their line
    fn statement_boundaries(&self, decl: &Declaration<'_>) -> Vec<usize> {
        let body = match decl.body {
            Some(b) => b,
            None => return split::line_starts(self.source, &decl.span()),
        };
        let statements = named_children(body);
        if statements.len() < 2 {
            return split::line_starts(self.source, &decl.span());
        }
        statements
            .iter()
            .map(|s| split::line_aligned(self.source, s.start_byte()))
            .collect()
    }

    fn push_span_fragments(&mut self, base: Draft, boundaries: &[usize]) {
        let header = self.continuation_header(&base.signature, 99, 99);
        let rest_budget = self.budget.saturating_sub(estimate_tokens(&header)).max(1);
        let pieces =
            split::plan_pieces(self.source, base.span.clone(), boundaries, self.budget, rest_budget);

        let total = pieces.len();
        for (index, piece) in pieces.into_iter().enumerate() {
            let body = &self.source[piece.clone()];
            let text = if index == 0 {
                body.to_string()
            } else {
                format!(
                    "{}{}",
                    self.continuation_header(&base.signature, index + 1, total),
                    body
                )
            };
            self.push(Draft {
                kind: if index == 0 { base.kind } else { ChunkKind::Fragment },
                symbol: base.symbol.clone(),
                parent: base.parent.clone(),
                lines: self.lines.span_lines(&piece),
                span: piece,
                text,
                signature: base.signature.clone(),
                has_doc: base.has_doc && index == 0,
                fragment: (total > 1).then_some(FragmentInfo { index, total }),
            });
        }
    }

    /// Split synthesized text (container summaries) at line boundaries
    fn push_text_fragments(&mut self, base: Draft) {
        if estimate_tokens(&base.text) <= self.budget {
            self.push(base);
            return;
        }

        let text_span = 0..base.text.len();
        let header = self.continuation_header(&base.signature, 99, 99);
        let rest_budget = self.budget.saturating_sub(estimate_tokens(&header)).max(1);
        let pieces = split::plan_pieces(
            &base.text,
            text_span.clone(),
            &split::line_starts(&base.text, &text_span),
            self.budget,
            rest_budget,
        );

        let total = pieces.len();
        for (index, piece) in pieces.into_iter().enumerate() {
            let body = &base.text[piece];
            let text = if index == 0 {
                body.to_string()
            } else {
                format!(
                    "{}{}",
                    self.continuation_header(&base.signature, index + 1, total),
                    body
                )
            };
            self.push(Draft {
                kind: if index == 0 { base.kind } else { ChunkKind::Fragment },
                symbol: base.symbol.clone(),
                parent: base.parent.clone(),
                span: base.span.clone(),
                lines: base.lines,
                text,
                signature: base.signature.clone(),
                has_doc: base.has_doc && index == 0,
                fragment: (total > 1).then_some(FragmentInfo { index, total }),
            });
        }
    }

    fn continuation_header(&self, signature: &Option<String>, part: usize, total: usize) -> String {
        let marker = format!("{} [fragment {}/{}]", self.spec.line_comment, part, total);
        match signature {
            Some(sig) => format!("{}\n{}\n", sig, marker),
            None => format!("{}\n", marker),
        }
    }

    /// One summary line for a container member
    fn member_line(&self, node: Node<'_>) -> Option<String> {
        if self.spec.is_comment(node.kind()) || self.spec.is_attribute(node.kind()) {
            return None;
        }

        let line = match self.member_declaration(node) {
            Some(member) => {
                let from = signature_start(member, self.spec);
                let raw = &self.source[from..member.end_byte()];
                let full = collapse(raw);
                match body_of(member, self.spec) {
                    // One-line members (auto-properties, expression bodies) stay whole
                    Some(_) if !raw.contains('\n') && full.len() <= 100 => full,
                    Some(body) => format!(
                        "{}{}",
                        collapse(&self.source[from..body.start_byte()]),
                        self.spec.body_placeholder()
                    ),
                    None => full,
                }
            }
            None => collapse(
                self.source[node.byte_range()]
                    .lines()
                    .next()
                    .unwrap_or_default(),
            ),
        };

        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }

    /// The declaration a member node stands for, looking through one
    /// wrapper level (decorators, export statements)
    fn member_declaration<'t>(&self, node: Node<'t>) -> Option<Node<'t>> {
        if self.spec.rule(node.kind()).is_some() {
            return Some(node);
        }
        named_children(node)
            .into_iter()
            .find(|c| self.spec.rule(c.kind()).is_some())
    }

    fn push(&mut self, draft: Draft) {
        let ordinal = self.chunks.len();
        let symbol_path = qualify(draft.parent.as_deref(), &draft.symbol);
        self.chunks.push(CodeChunk {
            id: ChunkId::new(self.path, &symbol_path, ordinal),
            kind: draft.kind,
            symbol: draft.symbol,
            parent_path: draft.parent,
            file_path: self.path.to_string(),
            lines: draft.lines,
            span: draft.span,
            ordinal,
            text: draft.text,
            signature: draft.signature,
            has_doc: draft.has_doc,
            fragment: draft.fragment,
            fingerprint: self.fingerprint.to_string(),
        });
    }
}

fn parent_path(scope: &[String]) -> Option<String> {
    if scope.is_empty() {
        None
    } else {
        Some(scope.join("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHAPES: &str = r#"namespace Geometry
{
    /// <summary>A 2D shape.</summary>
    public interface IShape
    {
        double Area();
        double Perimeter();
    }

    public class Circle : IShape
    {
        private readonly double radius;

        public Circle(double radius)
        {
            this.radius = radius;
        }

        public double Radius { get; }

        /// <summary>Area of the circle.</summary>
        public double Area()
        {
            return System.Math.PI * radius * radius;
        }

        public double Perimeter() => 2 * System.Math.PI * radius;
    }
}
"#;

    fn kinds(chunks: &[CodeChunk]) -> Vec<(ChunkKind, String)> {
        chunks
            .iter()
            .map(|c| (c.kind, c.symbol_path()))
            .collect()
    }

    #[test]
    fn test_csharp_declarations_in_preorder() {
        let chunks = AstChunker::with_budget(512)
            .chunk("Shapes.cs", SHAPES, "fp")
            .unwrap();

        assert_eq!(
            kinds(&chunks),
            vec![
                (ChunkKind::Namespace, "Geometry".to_string()),
                (ChunkKind::Interface, "Geometry.IShape".to_string()),
                (ChunkKind::Method, "Geometry.IShape.Area".to_string()),
                (ChunkKind::Method, "Geometry.IShape.Perimeter".to_string()),
                (ChunkKind::Class, "Geometry.Circle".to_string()),
                (ChunkKind::Field, "Geometry.Circle.radius".to_string()),
                (ChunkKind::Constructor, "Geometry.Circle.Circle".to_string()),
                (ChunkKind::Property, "Geometry.Circle.Radius".to_string()),
                (ChunkKind::Method, "Geometry.Circle.Area".to_string()),
                (ChunkKind::Method, "Geometry.Circle.Perimeter".to_string()),
            ]
        );
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert_eq!(chunk.fingerprint, "fp");
            assert!(chunk.fragment.is_none());
        }
    }

    #[test]
    fn test_doc_comment_included_in_span() {
        let chunks = AstChunker::with_budget(512)
            .chunk("Shapes.cs", SHAPES, "fp")
            .unwrap();

        let area = chunks
            .iter()
            .find(|c| c.symbol_path() == "Geometry.Circle.Area")
            .unwrap();
        assert!(area.has_doc);
        assert!(area.text.starts_with("/// <summary>Area of the circle."));
        assert_eq!(area.signature.as_deref(), Some("public double Area()"));
        assert_eq!(area.lines, LineSpan { start: 21, end: 25 });

        let iface = chunks.iter().find(|c| c.symbol == "IShape").unwrap();
        assert!(iface.has_doc);
        assert_eq!(iface.lines.start, 3);
    }

    #[test]
    fn test_container_summary_elides_bodies() {
        let chunks = AstChunker::with_budget(512)
            .chunk("Shapes.cs", SHAPES, "fp")
            .unwrap();

        let class = chunks.iter().find(|c| c.kind == ChunkKind::Class).unwrap();
        assert!(class.text.contains("public class Circle : IShape"));
        assert!(class.text.contains("public Circle(double radius) { ... }"));
        assert!(class.text.contains("public double Radius { get; }"));
        assert!(!class.text.contains("this.radius = radius"));
        assert_eq!(class.lines, LineSpan { start: 10, end: 28 });
    }

    #[test]
    fn test_chunking_is_stable() {
        let chunker = AstChunker::with_budget(512);
        let a = chunker.chunk("Shapes.cs", SHAPES, "fp").unwrap();
        let b = chunker.chunk("Shapes.cs", SHAPES, "fp").unwrap();
        assert_eq!(a, b);
    }

    fn long_method(statements: usize) -> String {
        let mut src = String::from("public class Worker\n{\n    public void Process(int input)\n    {\n");
        for i in 0..statements {
            src.push_str(&format!(
                "        var value{i} = Transform(input, {i}) + Compute(value{i}Seed, \"step {i}\");\n"
            ));
        }
        src.push_str("    }\n}\n");
        src
    }

    #[test]
    fn test_oversized_method_is_split_with_signature() {
        let source = long_method(40);
        let chunks = AstChunker::with_budget(120)
            .chunk("Worker.cs", &source, "fp")
            .unwrap();

        let pieces: Vec<&CodeChunk> = chunks
            .iter()
            .filter(|c| c.symbol == "Process")
            .collect();
        assert!(pieces.len() >= 2);

        let signature = "public void Process(int input)";
        assert_eq!(pieces[0].kind, ChunkKind::Method);
        for (i, piece) in pieces.iter().enumerate() {
            assert!(piece.text.contains(signature));
            let info = piece.fragment.unwrap();
            assert_eq!(info.index, i);
            assert_eq!(info.total, pieces.len());
            if i > 0 {
                assert_eq!(piece.kind, ChunkKind::Fragment);
                assert!(piece.text.starts_with(signature));
                assert!(piece.text.contains("[fragment"));
                assert!(piece.text.ends_with(&source[piece.span.clone()]));
            }
        }

        // Fragment bodies concatenate back to the declaration
        let rebuilt: String = pieces.iter().map(|p| &source[p.span.clone()]).collect();
        let start = source.find("    public void Process").unwrap() + 4;
        let end = source.rfind("    }").unwrap() + 5;
        assert_eq!(rebuilt, source[start..end]);

        // Fragment ids are distinct
        let mut ids: Vec<&ChunkId> = pieces.iter().map(|p| &p.id).collect();
        ids.dedup();
        assert_eq!(ids.len(), pieces.len());
    }

    #[test]
    fn test_split_cuts_at_statement_boundaries() {
        let source = long_method(40);
        let chunks = AstChunker::with_budget(120)
            .chunk("Worker.cs", &source, "fp")
            .unwrap();
        for piece in chunks.iter().filter(|c| c.symbol == "Process").skip(1) {
            // Every continuation starts at the beginning of a statement line
            assert!(source[piece.span.clone()].starts_with("        var value"));
        }
    }

    #[test]
    fn test_syntax_error_is_parse_error() {
        let err = AstChunker::with_budget(512)
            .chunk("Broken.cs", "public class { void ( }", "fp")
            .unwrap_err();
        assert!(matches!(err, MagError::Parse { .. }));
    }

    #[test]
    fn test_unknown_extension_is_parse_error() {
        let err = AstChunker::with_budget(512)
            .chunk("notes.txt", "hello", "fp")
            .unwrap_err();
        assert!(matches!(err, MagError::Parse { .. }));
    }

    #[test]
    fn test_file_without_declarations_is_one_fragment() {
        let source = "using System;\n\nConsole.WriteLine(\"hi\");\n";
        let chunks = AstChunker::with_budget(512)
            .chunk("Program.cs", source, "fp")
            .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].kind, ChunkKind::Fragment);
        assert_eq!(chunks[0].symbol, "Program");
        assert_eq!(chunks[0].text, source);
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        let chunks = AstChunker::with_budget(512).chunk("Empty.cs", "", "fp").unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_file_scoped_namespace_sets_parent() {
        let source = "namespace App.Core;\n\npublic class Engine\n{\n    public void Start() { }\n}\n";
        let chunks = AstChunker::with_budget(512)
            .chunk("Engine.cs", source, "fp")
            .unwrap();
        let paths: Vec<String> = chunks.iter().map(|c| c.symbol_path()).collect();
        assert_eq!(paths, vec!["App.Core", "App.Core.Engine", "App.Core.Engine.Start"]);
        assert!(chunks[0].text.contains("public class Engine"));
    }

    #[test]
    fn test_generic_names_drop_type_arguments() {
        let source = "public class Repository<T> where T : class\n{\n    public T Find(int id) { return null; }\n}\n";
        let chunks = AstChunker::with_budget(512)
            .chunk("Repository.cs", source, "fp")
            .unwrap();
        assert_eq!(chunks[0].symbol, "Repository");
        assert_eq!(chunks[1].symbol_path(), "Repository.Find");
    }

    #[test]
    fn test_rust_impl_methods_nest_under_type() {
        let source = "/// A counter.\npub struct Counter { n: u32 }\n\nimpl Counter {\n    pub fn bump(&mut self) { self.n += 1; }\n}\n";
        let chunks = AstChunker::with_budget(512)
            .chunk("src/counter.rs", source, "fp")
            .unwrap();
        let got = kinds(&chunks);
        assert_eq!(got[0], (ChunkKind::Struct, "Counter".to_string()));
        assert!(chunks[0].has_doc);
        assert_eq!(got[1], (ChunkKind::Class, "Counter".to_string()));
        assert_eq!(got[2], (ChunkKind::Method, "Counter.bump".to_string()));
    }

    #[test]
    fn test_python_class_and_methods() {
        let source = "class Greeter:\n    def hello(self):\n        return 'hi'\n\ndef main():\n    Greeter().hello()\n";
        let chunks = AstChunker::with_budget(512)
            .chunk("app.py", source, "fp")
            .unwrap();
        assert_eq!(
            kinds(&chunks),
            vec![
                (ChunkKind::Class, "Greeter".to_string()),
                (ChunkKind::Method, "Greeter.hello".to_string()),
                (ChunkKind::Method, "main".to_string()),
            ]
        );
        assert!(chunks[0].text.contains("def hello(self): ..."));
    }

    #[test]
    fn test_outline_lists_declarations() {
        let outline = AstChunker::with_budget(512).outline("Shapes.cs", SHAPES).unwrap();
        assert_eq!(outline.len(), 10);
        assert_eq!(outline[1].name, "IShape");
        assert_eq!(outline[1].parent.as_deref(), Some("Geometry"));
    }

    #[test]
    fn test_estimate_tokens() {
        assert!(estimate_tokens("public void Run() { }") > 0);
        assert_eq!(estimate_tokens(""), 0);
    }
}
