//! Markdown rendering of parsed documents, shaped for a RAG knowledge base.
//!
//! The knowledge base segments documents on `\n### `, so H3 is reserved for documented
//! objects (one segment per type, identifier or event). Section titles are pushed below
//! it with [`MarkdownOptions::heading_offset`], and every paragraph is written on a single
//! line so a segment never starts mid-sentence.

use crate::extensions::{ExtensionSet, RoleKind};
use crate::rst::{
    normalize_name, plain_text, resolve_docname, role_display_text, role_target,
    signature_text, split_explicit_title, Document, Inline, Node, RefTarget, Section, Table, Toctree,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MarkdownOptions {
    /// Added to a section's level to get its heading level (capped at 6).
    pub heading_offset: usize,
    /// Heading level of documented objects.
    pub object_heading_level: usize,
}

impl Default for MarkdownOptions {
    fn default() -> Self {
        Self {
            heading_offset: 3,
            object_heading_level: 3,
        }
    }
}

/// Line-oriented Markdown accumulator that never emits two blank lines in a row.
#[derive(Debug, Default)]
pub struct MarkdownBuilder {
    lines: Vec<String>,
}

impl MarkdownBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn add_blank(&mut self) {
        if self.lines.last().is_some_and(|l| !l.is_empty()) {
            self.lines.push(String::new());
        }
    }

    pub fn output(mut self) -> String {
        while self.lines.last().is_some_and(|l| l.is_empty()) {
            self.lines.pop();
        }
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Cross-reference targets of every document in a conversion run.
#[derive(Debug, Clone, Default)]
pub struct XrefIndex {
    docs: BTreeMap<String, Option<String>>,
    labels: BTreeMap<String, (String, Option<String>)>,
    objects: BTreeMap<String, String>,
}

impl XrefIndex {
    pub fn from_documents<'d>(docs: impl IntoIterator<Item = &'d Document>) -> Self {
        let mut index = Self::default();
        for doc in docs {
            index.add_document(doc);
        }
        index
    }

    pub fn add_document(&mut self, doc: &Document) {
        self.docs.insert(doc.docname.clone(), doc.title.clone());
        for label in &doc.labels {
            self.labels.insert(
                label.name.to_lowercase(),
                (doc.docname.clone(), label.title.clone()),
            );
        }
        for object in &doc.objects {
            self.objects
                .entry(object.name.clone())
                .or_insert_with(|| doc.docname.clone());
        }
    }

    pub fn has_doc(&self, docname: &str) -> bool {
        self.docs.contains_key(docname)
    }

    pub fn doc_title(&self, docname: &str) -> Option<&str> {
        self.docs.get(docname).and_then(|t| t.as_deref())
    }

    /// Document and section title of a `.. _label:` target.
    pub fn label(&self, name: &str) -> Option<(&str, Option<&str>)> {
        self.labels
            .get(&name.to_lowercase())
            .map(|(doc, title)| (doc.as_str(), title.as_deref()))
    }

    /// Document defining a domain object.
    pub fn object(&self, name: &str) -> Option<&str> {
        self.objects.get(name).map(String::as_str)
    }

    /// Documents directly inside `prefix`, as a toctree glob `dir/*` matches them.
    fn docs_under<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.docs
            .keys()
            .map(String::as_str)
            .filter(move |name| {
                name.strip_prefix(prefix)
                    .is_some_and(|rest| !rest.is_empty() && !rest.contains('/'))
            })
    }
}

/// Relative Markdown link from one document to another, e.g. `../d.md`.
pub fn relative_link(from_doc: &str, to_doc: &str) -> String {
    let from_dir: Vec<&str> = match from_doc.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    let to: Vec<&str> = to_doc.split('/').collect();
    let (to_dir, to_file) = to.split_at(to.len() - 1);

    let common = from_dir
        .iter()
        .zip(to_dir)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = vec![".."; from_dir.len() - common];
    parts.extend(&to_dir[common..]);
    let file = format!("{}.md", to_file[0]);
    parts.push(&file);
    parts.join("/")
}

fn comparable(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .flat_map(char::to_lowercase)
        .collect()
}

/// Renders `doc` to Markdown.
pub fn render_document(
    doc: &Document,
    index: &XrefIndex,
    extensions: &ExtensionSet,
    options: &MarkdownOptions,
) -> String {
    let mut renderer = Renderer {
        doc,
        index,
        extensions,
        options,
        md: MarkdownBuilder::new(),
    };
    renderer.md.add(format!("# {}", doc.docname));
    renderer.md.add_blank();
    renderer.nodes(&doc.body);
    renderer.md.output()
}

struct Renderer<'r> {
    doc: &'r Document,
    index: &'r XrefIndex,
    extensions: &'r ExtensionSet,
    options: &'r MarkdownOptions,
    md: MarkdownBuilder,
}

impl Renderer<'_> {
    fn nodes(&mut self, nodes: &[Node]) {
        for node in nodes {
            self.node(node);
        }
    }

    fn node(&mut self, node: &Node) {
        match node {
            Node::Section(section) => self.section(section),
            Node::Paragraph(spans) => {
                let text = self.inline(spans);
                if !text.trim().is_empty() {
                    self.md.add(text);
                    self.md.add_blank();
                }
            }
            Node::LiteralBlock { language, text } => {
                self.fence(language, text, 0);
                self.md.add_blank();
            }
            Node::BlockQuote(children) | Node::Container(children) => self.nodes(children),
            Node::BulletList(items) => {
                for item in items {
                    self.item("- ".to_string(), item, 0);
                }
                self.md.add_blank();
            }
            Node::EnumeratedList { start, items } => {
                for (n, item) in items.iter().enumerate() {
                    self.item(format!("{}. ", start + n), item, 0);
                }
                self.md.add_blank();
            }
            Node::DefinitionList(items) => {
                for item in items {
                    let term = self.inline(&item.term);
                    self.item(format!("- **{term}**: "), &item.definition, 0);
                }
                self.md.add_blank();
            }
            Node::FieldList(fields) => {
                for field in fields {
                    let (lead, rest) = split_lead(&field.body);
                    let lead = lead.map(|spans| self.inline(spans)).unwrap_or_default();
                    self.md.add(format!("**{}:** {}", field.name, lead).trim_end().to_string());
                    self.md.add_blank();
                    self.nodes(rest);
                }
            }
            Node::Table(table) => self.table(table),
            Node::Admonition { label, children } => {
                let (lead, rest) = split_lead(children);
                match lead {
                    Some(spans) => {
                        let text = self.inline(spans);
                        self.md.add(format!("**{label}:** {text}"));
                    }
                    None => self.md.add(format!("**{label}**")),
                }
                self.md.add_blank();
                self.nodes(rest);
            }
            Node::Object(object) => {
                let hashes = "#".repeat(self.options.object_heading_level.clamp(1, 6));
                for signature in &object.signatures {
                    self.md.add(format!("{hashes} {}: {}", object.objtype, signature_text(signature)));
                }
                self.md.add_blank();
                self.nodes(&object.children);
            }
            Node::Toctree(tree) => self.toctree(tree),
            Node::Unknown { argument, text, .. } => {
                let line = [argument.as_str(), text.as_str()]
                    .iter()
                    .filter(|s| !s.is_empty())
                    .copied()
                    .collect::<Vec<_>>()
                    .join(" ");
                if !line.is_empty() {
                    self.md.add(line);
                    self.md.add_blank();
                }
            }
            Node::Target(_) | Node::Transition => {}
        }
    }

    fn section(&mut self, section: &Section) {
        let title = self.inline(&section.title);
        // only a top-level document can repeat its docname, since nested ones contain `/`
        let is_doc_title =
            section.level == 1 && comparable(&plain_text(&section.title)) == comparable(&self.doc.docname);
        if !is_doc_title {
            let level = (section.level + self.options.heading_offset).min(6);
            self.md.add(format!("{} {}", "#".repeat(level), title));
            self.md.add_blank();
        }
        self.nodes(&section.children);
    }

    fn fence(&mut self, language: &str, text: &str, indent: usize) {
        let pad = " ".repeat(indent);
        let language = if language.is_empty() {
            self.extensions.default_language()
        } else {
            language
        };
        let ticks = if text.contains("```") { "~~~~" } else { "```" };
        self.md.add(format!("{pad}{ticks}{language}"));
        for line in text.lines() {
            if line.is_empty() {
                self.md.add(String::new());
            } else {
                self.md.add(format!("{pad}{line}"));
            }
        }
        self.md.add(format!("{pad}{ticks}"));
    }

    /// One list entry: `prefix` plus the leading paragraph, nested lists indented below.
    fn item(&mut self, prefix: String, children: &[Node], indent: usize) {
        let pad = " ".repeat(indent);
        let mut line = prefix;
        let mut nested: Vec<&Node> = Vec::new();
        for child in children {
            match child {
                Node::BulletList(_) | Node::EnumeratedList { .. } | Node::LiteralBlock { .. } => {
                    nested.push(child)
                }
                other => {
                    let text = self.flat_text(other);
                    if !text.is_empty() {
                        if !line.ends_with(' ') {
                            line.push(' ');
                        }
                        line.push_str(&text);
                    }
                }
            }
        }
        self.md.add(format!("{pad}{}", line.trim_end()));

        for child in nested {
            match child {
                Node::BulletList(items) => {
                    for item in items {
                        self.item("- ".to_string(), item, indent + 2);
                    }
                }
                Node::EnumeratedList { start, items } => {
                    for (n, item) in items.iter().enumerate() {
                        self.item(format!("{}. ", start + n), item, indent + 2);
                    }
                }
                Node::LiteralBlock { language, text } => self.fence(language, text, indent + 2),
                _ => {}
            }
        }
    }

    /// Single-line text of a block, for list items and table cells.
    fn flat_text(&self, node: &Node) -> String {
        let parts: Vec<String> = match node {
            Node::Paragraph(spans) => vec![self.inline(spans)],
            Node::LiteralBlock { text, .. } => vec![format!("`{}`", text.replace('\n', " "))],
            Node::BlockQuote(children)
            | Node::Container(children)
            | Node::Admonition { children, .. } => {
                children.iter().map(|c| self.flat_text(c)).collect()
            }
            Node::BulletList(items) | Node::EnumeratedList { items, .. } => items
                .iter()
                .flat_map(|item| item.iter().map(|c| self.flat_text(c)))
                .collect(),
            Node::DefinitionList(items) => items
                .iter()
                .map(|item| {
                    let definition: Vec<String> =
                        item.definition.iter().map(|c| self.flat_text(c)).collect();
                    format!("{}: {}", self.inline(&item.term), definition.join(" "))
                })
                .collect(),
            Node::FieldList(fields) => fields
                .iter()
                .map(|field| {
                    let body: Vec<String> = field.body.iter().map(|c| self.flat_text(c)).collect();
                    format!("{}: {}", field.name, body.join(" "))
                })
                .collect(),
            Node::Unknown { text, .. } => vec![text.clone()],
            Node::Object(object) => vec![object
                .signatures
                .iter()
                .map(|s| signature_text(s))
                .collect::<Vec<_>>()
                .join(", ")],
            _ => Vec::new(),
        };
        parts
            .into_iter()
            .filter(|p| !p.trim().is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn table(&mut self, table: &Table) {
        match &table.header {
            Some(header) => {
                let names: Vec<String> = header.iter().map(|c| self.inline(c)).collect();
                self.md.add(format!("**Table Data ({}):**", names.join(", ")));
                for row in &table.rows {
                    let pairs: Vec<String> = names
                        .iter()
                        .zip(row)
                        .filter_map(|(name, cell)| {
                            let value = self.inline(cell);
                            (!value.trim().is_empty()).then(|| format!("{name}: {value}"))
                        })
                        .collect();
                    if !pairs.is_empty() {
                        self.md.add(format!("- {}", pairs.join("; ")));
                    }
                }
            }
            None => {
                for row in &table.rows {
                    let cells: Vec<String> = row.iter().map(|c| self.inline(c)).collect();
                    self.md.add(format!("- {}", cells.join(" | ")));
                }
            }
        }
        self.md.add_blank();
    }

    fn toctree(&mut self, tree: &Toctree) {
        if tree.hidden {
            return;
        }
        let mut lines = Vec::new();
        for entry in &tree.entries {
            if tree.glob && entry.target.contains('*') {
                let pattern = resolve_docname(&self.doc.docname, &entry.target);
                let prefix = pattern.trim_end_matches('*').to_string();
                let matches: Vec<String> = self
                    .index
                    .docs_under(&prefix)
                    .filter(|name| *name != self.doc.docname)
                    .map(str::to_string)
                    .collect();
                for docname in matches {
                    lines.push(self.doc_link(None, &docname));
                }
                continue;
            }
            let docname = resolve_docname(&self.doc.docname, &entry.target);
            lines.push(self.doc_link(entry.title.as_deref(), &docname));
        }
        if lines.is_empty() {
            return;
        }
        if let Some(caption) = &tree.caption {
            self.md.add(format!("**{caption}**"));
            self.md.add_blank();
        }
        for line in lines {
            self.md.add(format!("- {line}"));
        }
        self.md.add_blank();
    }

    fn doc_link(&self, title: Option<&str>, docname: &str) -> String {
        let title = title
            .map(str::to_string)
            .or_else(|| self.index.doc_title(docname).map(str::to_string))
            .unwrap_or_else(|| docname.to_string());
        if self.index.has_doc(docname) {
            format!("[{title}]({})", relative_link(&self.doc.docname, docname))
        } else {
            title
        }
    }

    fn inline(&self, spans: &[Inline]) -> String {
        let mut out = String::new();
        for span in spans {
            match span {
                Inline::Text(text) => out.push_str(text),
                Inline::Emphasis(text) => out.push_str(&format!("*{text}*")),
                Inline::Strong(text) => out.push_str(&format!("**{text}**")),
                Inline::Literal(text) => out.push_str(&code_span(text)),
                Inline::Role { name, text } => out.push_str(&self.role(name, text)),
                Inline::Reference { text, target } => out.push_str(&self.reference(text, target)),
            }
        }
        out
    }

    fn role(&self, name: &str, text: &str) -> String {
        let display = role_display_text(text);
        match self.extensions.role(name) {
            RoleKind::DocRef => {
                let docname = resolve_docname(&self.doc.docname, role_target(text));
                let (explicit, _) = split_explicit_title(text);
                self.doc_link(explicit, &docname)
            }
            RoleKind::LabelRef => {
                let target = role_target(text);
                let (explicit, _) = split_explicit_title(text);
                match self.index.label(target) {
                    Some((docname, title)) => {
                        let title = explicit.or(title).unwrap_or(target);
                        format!("[{title}]({})", relative_link(&self.doc.docname, docname))
                    }
                    None => display,
                }
            }
            RoleKind::ObjectRef { .. } => {
                let code = code_span(&display);
                match self.index.object(role_target(text)) {
                    Some(docname) => {
                        format!("[{code}]({})", relative_link(&self.doc.docname, docname))
                    }
                    None => code,
                }
            }
            RoleKind::Literal => code_span(&display),
            RoleKind::Emphasis => format!("*{display}*"),
            RoleKind::Strong => format!("**{display}**"),
            RoleKind::Plain | RoleKind::Unknown => display,
        }
    }

    fn reference(&self, text: &str, target: &RefTarget) -> String {
        match target {
            RefTarget::Url(url) => format!("[{text}]({url})"),
            RefTarget::Named(name) => {
                if let Some(url) = self.doc.targets.get(&normalize_name(name)) {
                    format!("[{text}]({url})")
                } else if let Some((docname, _)) = self.index.label(name) {
                    format!("[{text}]({})", relative_link(&self.doc.docname, docname))
                } else {
                    text.to_string()
                }
            }
        }
    }
}

fn split_lead(children: &[Node]) -> (Option<&Vec<Inline>>, &[Node]) {
    match children.split_first() {
        Some((Node::Paragraph(spans), rest)) => (Some(spans), rest),
        _ => (None, children),
    }
}

fn code_span(text: &str) -> String {
    if text.contains('`') {
        format!("`` {text} ``")
    } else {
        format!("`{text}`")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rst::{parse_document, ParseContext};
    use pulldown_cmark::{Event, HeadingLevel, Parser, Tag};
    use std::path::Path;

    fn doc(docname: &str, source: &str) -> Document {
        let extensions = ExtensionSet::zeek();
        parse_document(docname, Path::new("x.rst"), source, ParseContext::new(&extensions))
            .unwrap()
    }

    fn render(doc: &Document, index: &XrefIndex) -> String {
        render_document(doc, index, &ExtensionSet::zeek(), &MarkdownOptions::default())
    }

    fn headings(markdown: &str) -> Vec<(HeadingLevel, String)> {
        let mut out = Vec::new();
        let mut current: Option<(HeadingLevel, String)> = None;
        for event in Parser::new(markdown) {
            match event {
                Event::Start(Tag::Heading { level, .. }) => current = Some((level, String::new())),
                Event::Text(text) | Event::Code(text) => {
                    if let Some((_, buf)) = current.as_mut() {
                        buf.push_str(&text);
                    }
                }
                Event::End(_) => {
                    if let Some(done) = current.take() {
                        out.push(done);
                    }
                }
                _ => {}
            }
        }
        out
    }

    #[test]
    fn relative_links_between_documents() {
        assert_eq!(relative_link("index", "install"), "install.md");
        assert_eq!(relative_link("a/b/c", "a/d"), "../d.md");
        assert_eq!(relative_link("index", "scripts/base/init"), "scripts/base/init.md");
        assert_eq!(relative_link("frameworks/logging", "frameworks/input"), "input.md");
        assert_eq!(relative_link("x/y", "z"), "../z.md");
    }

    #[test]
    fn heading_policy_reserves_h3_for_objects() {
        let doc = doc(
            "frameworks/logging",
            "=======\nLogging\n=======\n\nIntro.\n\nStreams\n-------\n\n.. zeek:type:: Log::ID\n\n   Stream identifier.\n",
        );
        let md = render(&doc, &XrefIndex::from_documents([&doc]));
        assert!(md.starts_with("# frameworks/logging\n"));
        assert_eq!(
            headings(&md),
            vec![
                (HeadingLevel::H1, "frameworks/logging".to_string()),
                (HeadingLevel::H4, "Logging".to_string()),
                (HeadingLevel::H5, "Streams".to_string()),
                (HeadingLevel::H3, "type: Log::ID".to_string()),
            ]
        );
        assert!(md.contains("\n### type: Log::ID\n"));
    }

    #[test]
    fn object_headings_show_signature_display_text() {
        let doc = doc(
            "scripts/base/conn",
            ".. zeek:field:: ts :zeek:type:`time` :zeek:attr:`&log`\n\n   Timestamp of the first packet.\n",
        );
        let md = render(&doc, &XrefIndex::default());
        assert!(md.contains("\n### field: ts time &log\n"), "{md}");
        assert!(!md.contains(":zeek:"), "{md}");
    }

    #[test]
    fn top_level_title_repeating_the_docname_is_skipped() {
        let doc = doc("quick-start", "Quick Start\n===========\n\nGo.\n");
        let md = render(&doc, &XrefIndex::default());
        assert_eq!(md, "# quick-start\n\nGo.\n");
    }

    #[test]
    fn doc_title_that_differs_from_docname_is_kept() {
        let doc = doc("install", "Installing Zeek\n===============\n\nSteps.\n");
        let md = render(&doc, &XrefIndex::default());
        assert_eq!(md, "# install\n\n#### Installing Zeek\n\nSteps.\n");
    }

    #[test]
    fn cross_references_become_relative_links() {
        let target = doc(
            "scripts/base/conn",
            ".. _conn-log:\n\nConn Log\n========\n\n.. zeek:type:: Conn::Info\n\n   Record.\n",
        );
        let source = doc(
            "frameworks/logging",
            "See :doc:`/scripts/base/conn`, :ref:`the log <conn-log>`, :zeek:type:`Conn::Info`,\n\
             :zeek:type:`count` and `Zeek <https://zeek.org>`_.\n",
        );
        let index = XrefIndex::from_documents([&target, &source]);
        let md = render(&source, &index);
        assert!(md.contains("[Conn Log](../scripts/base/conn.md)"), "{md}");
        assert!(md.contains("[the log](../scripts/base/conn.md)"), "{md}");
        assert!(md.contains("[`Conn::Info`](../scripts/base/conn.md)"), "{md}");
        assert!(md.contains("`count`"), "{md}");
        assert!(md.contains("[Zeek](https://zeek.org)"), "{md}");
    }

    #[test]
    fn tables_render_as_labelled_rows() {
        let doc = doc(
            "t",
            "===== ========\nName  Meaning\n===== ========\nS0    Attempt\nSF\n===== ========\n\n+---+---+\n| a | b |\n+---+---+\n",
        );
        let md = render(&doc, &XrefIndex::default());
        assert!(md.contains("**Table Data (Name, Meaning):**\n- Name: S0; Meaning: Attempt\n- Name: SF\n"), "{md}");
        assert!(md.contains("- a | b\n"), "{md}");
    }

    #[test]
    fn code_paragraphs_and_lists_stay_on_single_lines() {
        let doc = doc(
            "q",
            "Run the\ncommand::\n\n    zeek -r x.pcap\n\n- first\n  item\n- second\n\n  .. code-block:: console\n\n     $ ls\n\n.. note:: Be\n   careful.\n",
        );
        let md = render(&doc, &XrefIndex::default());
        assert_eq!(
            md,
            "# q\n\nRun the command:\n\n```zeek\nzeek -r x.pcap\n```\n\n- first item\n- second\n  ```console\n  $ ls\n  ```\n\n**Note:** Be careful.\n"
        );
    }

    #[test]
    fn toctrees_link_children_and_hidden_ones_are_skipped() {
        let child = doc("install", "Installing\n==========\n");
        let root = doc(
            "index",
            ".. toctree::\n   :caption: Contents\n\n   install\n   Missing <missing>\n\n.. toctree::\n   :hidden:\n\n   install\n",
        );
        let index = XrefIndex::from_documents([&child, &root]);
        let md = render(&root, &index);
        assert_eq!(
            md,
            "# index\n\n**Contents**\n\n- [Installing](install.md)\n- Missing\n"
        );
    }
}
