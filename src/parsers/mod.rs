//! Source code parsers using tree-sitter
//!
//! Changed blobs are parsed once per use; [`SourceFile`] exposes the two
//! structural views the analyses need:
//! - imports ([`imports`]) for `Imports`
//! - outermost function spans ([`functions`]) for `Shotness`

pub mod functions;
pub mod imports;

pub use functions::FunctionSpan;

use anyhow::{Context, Result};
use tree_sitter::{Node, Parser, Tree};

/// Languages with a compiled-in grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Rust,
    Python,
    Go,
    JavaScript,
    TypeScript,
    Tsx,
    Java,
    CSharp,
    C,
    Cpp,
}

impl Language {
    /// Language of a path, by extension
    pub fn detect(path: &str) -> Option<Self> {
        let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
        let language = match extension.as_str() {
            "rs" => Language::Rust,
            "py" | "pyi" => Language::Python,
            "go" => Language::Go,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "mts" | "cts" => Language::TypeScript,
            "tsx" => Language::Tsx,
            "java" => Language::Java,
            "cs" => Language::CSharp,
            "c" | "h" => Language::C,
            "cpp" | "cc" | "cxx" | "c++" | "hpp" | "hh" | "hxx" | "h++" => Language::Cpp,
            _ => return None,
        };
        Some(language)
    }

    /// Name used in results; TSX reports as TypeScript
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Rust => "Rust",
            Language::Python => "Python",
            Language::Go => "Go",
            Language::JavaScript => "JavaScript",
            Language::TypeScript | Language::Tsx => "TypeScript",
            Language::Java => "Java",
            Language::CSharp => "C#",
            Language::C => "C",
            Language::Cpp => "C++",
        }
    }

    pub(crate) fn grammar(self) -> tree_sitter::Language {
        match self {
            Language::Rust => tree_sitter_rust::LANGUAGE.into(),
            Language::Python => tree_sitter_python::LANGUAGE.into(),
            Language::Go => tree_sitter_go::LANGUAGE.into(),
            Language::JavaScript => tree_sitter_javascript::LANGUAGE.into(),
            Language::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            Language::Tsx => tree_sitter_typescript::LANGUAGE_TSX.into(),
            Language::Java => tree_sitter_java::LANGUAGE.into(),
            Language::CSharp => tree_sitter_c_sharp::LANGUAGE.into(),
            Language::C => tree_sitter_c::LANGUAGE.into(),
            Language::Cpp => tree_sitter_cpp::LANGUAGE.into(),
        }
    }
}

/// A parsed blob
pub struct SourceFile<'s> {
    pub language: Language,
    pub source: &'s str,
    tree: Tree,
}

impl<'s> SourceFile<'s> {
    pub fn parse(language: Language, source: &'s str) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&language.grammar())
            .with_context(|| format!("Failed to set {} language", language.as_str()))?;
        let tree = parser
            .parse(source, None)
            .with_context(|| format!("Failed to parse {} source", language.as_str()))?;
        Ok(Self {
            language,
            source,
            tree,
        })
    }

    pub fn root(&self) -> Node<'_> {
        self.tree.root_node()
    }

    pub fn bytes(&self) -> &'s [u8] {
        self.source.as_bytes()
    }

    /// Imported modules, in order of first appearance
    pub fn imports(&self) -> Result<Vec<String>> {
        imports::extract(self)
    }

    /// Outermost functions and methods
    pub fn functions(&self) -> Vec<FunctionSpan> {
        functions::extract(self)
    }
}

pub(crate) fn node_text(node: Node<'_>, source: &[u8]) -> Option<String> {
    node.utf8_text(source)
        .ok()
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}
