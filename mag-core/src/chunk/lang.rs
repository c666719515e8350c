//! Grammar tables: which syntax nodes become chunks, per language

use crate::model::ChunkKind;
use std::path::Path;

/// Languages with a tree-sitter grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    CSharp,
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Tsx,
}

impl Language {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("cs") => Some(Self::CSharp),
            Some("rs") => Some(Self::Rust),
            Some("py") => Some(Self::Python),
            Some("js" | "jsx" | "mjs" | "cjs") => Some(Self::JavaScript),
            Some("ts" | "mts" | "cts") => Some(Self::TypeScript),
            Some("tsx") => Some(Self::Tsx),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::CSharp => "csharp",
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript | Self::Tsx => "typescript",
        }
    }

    pub(crate) fn grammar(self) -> tree_sitter::Language {
        match self {
            Self::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Self::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
        }
    }

    pub(crate) fn spec(self) -> &'static LanguageSpec {
        match self {
            Self::CSharp => &CSHARP,
            Self::Rust => &RUST,
            Self::Python => &PYTHON,
            Self::JavaScript => &JAVASCRIPT,
            Self::TypeScript | Self::Tsx => &TYPESCRIPT,
        }
    }
}

/// Maps a syntax node kind to the chunk kind it produces
pub(crate) struct DeclRule {
    pub node_kind: &'static str,
    pub kind: ChunkKind,
}

const fn rule(node_kind: &'static str, kind: ChunkKind) -> DeclRule {
    DeclRule { node_kind, kind }
}

pub(crate) struct LanguageSpec {
    pub rules: &'static [DeclRule],
    /// Fields holding a declaration's body, tried in order
    pub body_fields: &'static [&'static str],
    /// Fields holding a declaration's name, tried in order
    pub name_fields: &'static [&'static str],
    pub comment_kinds: &'static [&'static str],
    /// Comment prefixes that mark documentation
    pub doc_prefixes: &'static [&'static str],
    /// Attribute/decorator nodes kept with the declaration they precede
    pub attribute_kinds: &'static [&'static str],
    /// Namespace forms whose members follow as siblings
    pub file_scoped_namespaces: &'static [&'static str],
    pub line_comment: &'static str,
    /// Block bodies delimited by braces (vs. indentation)
    pub braces: bool,
}

impl LanguageSpec {
    pub fn rule(&self, node_kind: &str) -> Option<&DeclRule> {
        self.rules.iter().find(|r| r.node_kind == node_kind)
    }

    pub fn is_comment(&self, node_kind: &str) -> bool {
        self.comment_kinds.contains(&node_kind)
    }

    pub fn is_attribute(&self, node_kind: &str) -> bool {
        self.attribute_kinds.contains(&node_kind)
    }

    pub fn is_doc_comment(&self, text: &str) -> bool {
        let text = text.trim_start();
        self.doc_prefixes.iter().any(|p| text.starts_with(p))
    }

    pub fn body_placeholder(&self) -> &'static str {
        if self.braces {
            " { ... }"
        } else {
            " ..."
        }
    }
}

static CSHARP: LanguageSpec = LanguageSpec {
    rules: &[
        rule("namespace_declaration", ChunkKind::Namespace),
        rule("file_scoped_namespace_declaration", ChunkKind::Namespace),
        rule("class_declaration", ChunkKind::Class),
        rule("record_declaration", ChunkKind::Class),
        rule("record_struct_declaration", ChunkKind::Struct),
        rule("interface_declaration", ChunkKind::Interface),
        rule("struct_declaration", ChunkKind::Struct),
        rule("enum_declaration", ChunkKind::Struct),
        rule("method_declaration", ChunkKind::Method),
        rule("operator_declaration", ChunkKind::Method),
        rule("conversion_operator_declaration", ChunkKind::Method),
        rule("destructor_declaration", ChunkKind::Method),
        rule("constructor_declaration", ChunkKind::Constructor),
        rule("property_declaration", ChunkKind::Property),
        rule("indexer_declaration", ChunkKind::Property),
        rule("event_declaration", ChunkKind::Property),
        rule("field_declaration", ChunkKind::Field),
        rule("event_field_declaration", ChunkKind::Field),
    ],
    body_fields: &["body", "accessors"],
    name_fields: &["name"],
    comment_kinds: &["comment"],
    doc_prefixes: &["///", "/**"],
    attribute_kinds: &["attribute_list"],
    file_scoped_namespaces: &["file_scoped_namespace_declaration"],
    line_comment: "//",
    braces: true,
};

static RUST: LanguageSpec = LanguageSpec {
    rules: &[
        rule("mod_item", ChunkKind::Namespace),
        rule("struct_item", ChunkKind::Struct),
        rule("enum_item", ChunkKind::Struct),
        rule("union_item", ChunkKind::Struct),
        rule("trait_item", ChunkKind::Interface),
        rule("impl_item", ChunkKind::Class),
        rule("function_item", ChunkKind::Method),
        rule("function_signature_item", ChunkKind::Method),
        rule("const_item", ChunkKind::Field),
        rule("static_item", ChunkKind::Field),
    ],
    body_fields: &["body"],
    name_fields: &["name", "type"],
    comment_kinds: &["line_comment", "block_comment"],
    doc_prefixes: &["///", "/**"],
    attribute_kinds: &["attribute_item"],
    file_scoped_namespaces: &[],
    line_comment: "//",
    braces: true,
};

static PYTHON: LanguageSpec = LanguageSpec {
    rules: &[
        rule("class_definition", ChunkKind::Class),
        rule("function_definition", ChunkKind::Method),
    ],
    body_fields: &["body"],
    name_fields: &["name"],
    comment_kinds: &["comment"],
    doc_prefixes: &[],
    attribute_kinds: &["decorator"],
    file_scoped_namespaces: &[],
    line_comment: "#",
    braces: false,
};

static JAVASCRIPT: LanguageSpec = LanguageSpec {
    rules: &[
        rule("class_declaration", ChunkKind::Class),
        rule("method_definition", ChunkKind::Method),
        rule("function_declaration", ChunkKind::Method),
        rule("generator_function_declaration", ChunkKind::Method),
        rule("field_definition", ChunkKind::Field),
    ],
    body_fields: &["body"],
    name_fields: &["name", "property"],
    comment_kinds: &["comment"],
    doc_prefixes: &["/**"],
    attribute_kinds: &["decorator"],
    file_scoped_namespaces: &[],
    line_comment: "//",
    braces: true,
};

static TYPESCRIPT: LanguageSpec = LanguageSpec {
    rules: &[
        rule("internal_module", ChunkKind::Namespace),
        rule("module", ChunkKind::Namespace),
        rule("class_declaration", ChunkKind::Class),
        rule("abstract_class_declaration", ChunkKind::Class),
        rule("interface_declaration", ChunkKind::Interface),
        rule("enum_declaration", ChunkKind::Struct),
        rule("method_definition", ChunkKind::Method),
        rule("method_signature", ChunkKind::Method),
        rule("abstract_method_signature", ChunkKind::Method),
        rule("function_declaration", ChunkKind::Method),
        rule("function_signature", ChunkKind::Method),
        rule("generator_function_declaration", ChunkKind::Method),
        rule("property_signature", ChunkKind::Property),
        rule("public_field_definition", ChunkKind::Field),
    ],
    body_fields: &["body"],
    name_fields: &["name", "property"],
    comment_kinds: &["comment"],
    doc_prefixes: &["/**"],
    attribute_kinds: &["decorator"],
    file_scoped_namespaces: &[],
    line_comment: "//",
    braces: true,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_detection() {
        assert_eq!(Language::from_path(Path::new("A.cs")), Some(Language::CSharp));
        assert_eq!(Language::from_path(Path::new("lib.rs")), Some(Language::Rust));
        assert_eq!(Language::from_path(Path::new("app.py")), Some(Language::Python));
        assert_eq!(Language::from_path(Path::new("ui.tsx")), Some(Language::Tsx));
        assert_eq!(Language::from_path(Path::new("index.mjs")), Some(Language::JavaScript));
        assert_eq!(Language::from_path(Path::new("README.md")), None);
    }

    #[test]
    fn test_grammars_load() {
        for lang in [
            Language::CSharp,
            Language::Rust,
            Language::Python,
            Language::JavaScript,
            Language::TypeScript,
            Language::Tsx,
        ] {
            let mut parser = tree_sitter::Parser::new();
            assert!(parser.set_language(&lang.grammar()).is_ok(), "{:?}", lang);
        }
    }

    #[test]
    fn test_doc_comment_prefixes() {
        assert!(CSHARP.is_doc_comment("/// <summary>"));
        assert!(!CSHARP.is_doc_comment("// plain"));
        assert!(!PYTHON.is_doc_comment("# comment"));
    }
}
