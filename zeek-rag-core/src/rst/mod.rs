//! reStructuredText parsing.
//!
//! A block parser ([`parser`]) turns a source file into a tree of [`Node`]s, and an inline
//! parser ([`inline`]) turns paragraph text into [`Inline`] spans. Tables have their own
//! module ([`table`]) because grid, simple, list and CSV tables all end up as a [`Table`].
//!
//! Project-specific markup is looked up in an [`ExtensionSet`]; the parser itself only
//! knows docutils syntax.

pub mod inline;
pub mod parser;
pub mod table;

use crate::extensions::ExtensionSet;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum nesting of `include` directives.
pub const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("line {line}: content block expected for the \"{directive}\" directive; none found")]
    MissingContent { directive: String, line: usize },
    #[error("line {line}: section title overline has no matching underline")]
    IncompleteTitle { line: usize },
    #[error("line {line}: malformed table: {reason}")]
    MalformedTable { line: usize, reason: String },
    #[error("include nesting deeper than {0} levels")]
    IncludeDepth(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Emphasis(String),
    Strong(String),
    Literal(String),
    /// Interpreted text; an empty `name` is the default role.
    Role { name: String, text: String },
    Reference { text: String, target: RefTarget },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefTarget {
    Url(String),
    /// A named hyperlink target, normalised (lowercase, single spaces).
    Named(String),
}

pub type Cell = Vec<Inline>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub header: Option<Vec<Cell>>,
    pub rows: Vec<Vec<Cell>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub title: Vec<Inline>,
    /// Depth of the section, 1 for the document title level.
    pub level: usize,
    /// Internal targets (`.. _label:`) placed directly before the title.
    pub labels: Vec<String>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DefinitionItem {
    pub term: Vec<Inline>,
    pub definition: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDescription {
    pub objtype: String,
    pub signatures: Vec<String>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: Option<String>,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Toctree {
    pub caption: Option<String>,
    pub hidden: bool,
    pub glob: bool,
    pub entries: Vec<TocEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Section(Section),
    Paragraph(Vec<Inline>),
    LiteralBlock { language: String, text: String },
    BlockQuote(Vec<Node>),
    BulletList(Vec<Vec<Node>>),
    EnumeratedList { start: usize, items: Vec<Vec<Node>> },
    DefinitionList(Vec<DefinitionItem>),
    FieldList(Vec<Field>),
    Table(Table),
    Admonition { label: String, children: Vec<Node> },
    Container(Vec<Node>),
    Object(ObjectDescription),
    Toctree(Toctree),
    /// A directive the extension set does not know; kept as plain text.
    Unknown { name: String, argument: String, text: String },
    /// Internal hyperlink target (`.. _label:`) not attached to a section.
    Target(String),
    Transition,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    /// Title of the section the label points at, when it precedes one.
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedObject {
    pub objtype: String,
    pub name: String,
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    /// Path relative to the documentation root, without `.rst`, `/`-separated.
    pub docname: String,
    pub source_path: PathBuf,
    pub title: Option<String>,
    pub body: Vec<Node>,
    pub labels: Vec<Label>,
    /// External hyperlink targets, by normalised name.
    pub targets: BTreeMap<String, String>,
    /// Toctree entries in document order, resolved to docnames.
    pub children: Vec<String>,
    pub objects: Vec<DefinedObject>,
    pub warnings: Vec<String>,
}

/// Where the parser may read `include`d files from.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub extensions: &'a ExtensionSet,
    /// Root for absolute (`/…`) include paths.
    pub doc_root: Option<&'a Path>,
    /// Directory of the file being parsed, for relative include paths.
    pub source_dir: Option<&'a Path>,
}

impl<'a> ParseContext<'a> {
    pub fn new(extensions: &'a ExtensionSet) -> Self {
        Self {
            extensions,
            doc_root: None,
            source_dir: None,
        }
    }
}

/// Parses `source` as the document `docname`.
pub fn parse_document(
    docname: &str,
    source_path: &Path,
    source: &str,
    ctx: ParseContext<'_>,
) -> Result<Document, ParseError> {
    let parsed = parser::parse(source, ctx)?;

    let mut doc = Document {
        docname: docname.to_string(),
        source_path: source_path.to_path_buf(),
        body: parsed.body,
        targets: parsed.targets,
        warnings: parsed.warnings,
        ..Default::default()
    };
    doc.title = doc.body.iter().find_map(|node| match node {
        Node::Section(section) => Some(plain_text(&section.title)),
        _ => None,
    });

    let mut collector = Collector {
        docname,
        labels: Vec::new(),
        children: Vec::new(),
        objects: Vec::new(),
    };
    collector.visit(&doc.body);
    doc.labels = collector.labels;
    doc.children = collector.children;
    doc.objects = collector.objects;
    Ok(doc)
}

struct Collector<'d> {
    docname: &'d str,
    labels: Vec<Label>,
    children: Vec<String>,
    objects: Vec<DefinedObject>,
}

impl Collector<'_> {
    fn visit(&mut self, nodes: &[Node]) {
        for node in nodes {
            match node {
                Node::Section(section) => {
                    let title = plain_text(&section.title);
                    for label in &section.labels {
                        self.labels.push(Label {
                            name: label.clone(),
                            title: Some(title.clone()),
                        });
                    }
                    self.visit(&section.children);
                }
                Node::Target(name) => self.labels.push(Label {
                    name: name.clone(),
                    title: None,
                }),
                Node::Toctree(tree) => {
                    for entry in &tree.entries {
                        if entry.target.ends_with('*') {
                            continue;
                        }
                        self.children
                            .push(resolve_docname(self.docname, &entry.target));
                    }
                }
                Node::Object(object) => {
                    for signature in &object.signatures {
                        if let Some(name) = object_name(signature) {
                            self.objects.push(DefinedObject {
                                objtype: object.objtype.clone(),
                                name,
                            });
                        }
                    }
                    self.visit(&object.children);
                }
                Node::BlockQuote(children)
                | Node::Container(children)
                | Node::Admonition { children, .. } => self.visit(children),
                Node::BulletList(items) | Node::EnumeratedList { items, .. } => {
                    for item in items {
                        self.visit(item);
                    }
                }
                Node::DefinitionList(items) => {
                    for item in items {
                        self.visit(&item.definition);
                    }
                }
                Node::FieldList(fields) => {
                    for field in fields {
                        self.visit(&field.body);
                    }
                }
                _ => {}
            }
        }
    }
}

/// Name defined by an object signature: the first token, without a trailing colon.
pub fn object_name(signature: &str) -> Option<String> {
    let token = signature.split_whitespace().next()?;
    let token = token.trim_end_matches(':');
    (!token.is_empty()).then(|| token.to_string())
}

/// Display text of an object signature, with roles and markup reduced to what a reader sees.
///
/// A field signature carrying type and attribute roles reads `ts time &log`.
pub fn signature_text(signature: &str) -> String {
    let mut warnings = Vec::new();
    let spans = inline::parse_inline(signature, &BTreeMap::new(), &mut warnings);
    plain_text(&spans)
}

/// Resolves a toctree or `:doc:` target relative to the referring document.
///
/// `/x/y` is relative to the documentation root, anything else to the directory of
/// `from`. `.` and `..` segments are normalised and a trailing `.rst` is dropped.
pub fn resolve_docname(from: &str, target: &str) -> String {
    let target = target.trim();
    let target = target.strip_suffix(".rst").unwrap_or(target);

    let mut segments: Vec<&str> = Vec::new();
    let rest = if let Some(absolute) = target.strip_prefix('/') {
        absolute
    } else {
        if let Some((dir, _)) = from.rsplit_once('/') {
            segments.extend(dir.split('/'));
        }
        target
    };
    for segment in rest.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Normalises a reference name the way docutils does: lowercase, single spaces.
pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Text of inline spans with all markup removed.
pub fn plain_text(spans: &[Inline]) -> String {
    let mut out = String::new();
    for span in spans {
        match span {
            Inline::Text(t)
            | Inline::Emphasis(t)
            | Inline::Strong(t)
            | Inline::Literal(t) => out.push_str(t),
            Inline::Role { text, .. } => out.push_str(&role_display_text(text)),
            Inline::Reference { text, .. } => out.push_str(text),
        }
    }
    out
}

/// Splits role content of the form `Title <target>`.
pub fn split_explicit_title(text: &str) -> (Option<&str>, &str) {
    let trimmed = text.trim();
    if let Some(without_close) = trimmed.strip_suffix('>') {
        if let Some(open) = without_close.rfind('<') {
            let title = without_close[..open].trim_end();
            let target = &without_close[open + 1..];
            if !title.is_empty() && !target.is_empty() {
                return (Some(title), target);
            }
        }
    }
    (None, trimmed)
}

/// Text a reader sees for role content: explicit title, or target without `~`/`!`
/// prefixes (`~` keeps only the last `::`/`.` component).
pub fn role_display_text(text: &str) -> String {
    match split_explicit_title(text) {
        (Some(title), _) => title.to_string(),
        (None, target) => {
            if let Some(short) = target.strip_prefix('~') {
                let after_colons = short.rsplit("::").next().unwrap_or(short);
                after_colons
                    .rsplit('.')
                    .next()
                    .unwrap_or(after_colons)
                    .to_string()
            } else {
                target.trim_start_matches('!').to_string()
            }
        }
    }
}

/// Target of role content, with `~`/`!` prefixes removed.
pub fn role_target(text: &str) -> &str {
    let (_, target) = split_explicit_title(text);
    target.trim_start_matches(['~', '!'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_docname_handles_relative_absolute_and_parent_paths() {
        assert_eq!(resolve_docname("index", "install"), "install");
        assert_eq!(resolve_docname("frameworks/index", "logging"), "frameworks/logging");
        assert_eq!(resolve_docname("frameworks/index", "/scripts/base"), "scripts/base");
        assert_eq!(resolve_docname("a/b/c", "../d.rst"), "a/d");
        assert_eq!(resolve_docname("a/b", "./c/index"), "a/c/index");
    }

    #[test]
    fn role_text_helpers() {
        assert_eq!(role_display_text("Conn::Info"), "Conn::Info");
        assert_eq!(role_display_text("~Conn::Info"), "Info");
        assert_eq!(role_display_text("the log <Conn::LOG>"), "the log");
        assert_eq!(role_target("the log <~Conn::LOG>"), "Conn::LOG");
        assert_eq!(role_target("!Log::write"), "Log::write");
        assert_eq!(split_explicit_title("plain"), (None, "plain"));
    }

    #[test]
    fn object_names_come_from_the_first_signature_token() {
        assert_eq!(object_name("Conn::Info: record"), Some("Conn::Info".into()));
        assert_eq!(object_name("  Log::write "), Some("Log::write".into()));
        assert_eq!(object_name("   "), None);
    }

    #[test]
    fn signatures_lose_role_markup() {
        assert_eq!(signature_text("ts :zeek:type:`time` :zeek:attr:`&log`"), "ts time &log");
        assert_eq!(signature_text("Conn::Info: record"), "Conn::Info: record");
        assert_eq!(signature_text("zeek_init"), "zeek_init");
    }

    #[test]
    fn normalize_name_collapses_whitespace() {
        assert_eq!(normalize_name("Zeek  Home\nPage"), "zeek home page");
    }
}
