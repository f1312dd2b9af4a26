//! Block-level reStructuredText parsing.
//!
//! The parser works on tab-expanded, right-trimmed lines. Indented regions (list items,
//! directive bodies, block quotes) are dedented and parsed recursively in "nested" mode,
//! where section titles are not recognised. Top-level output is a flat stream of nodes
//! and titles which [`nest_sections`] folds into the section tree.

use super::inline::parse_inline;
use super::table::{self, RawTable};
use super::{
    normalize_name, Cell, DefinitionItem, Field, Inline, Node, ObjectDescription, ParseContext,
    ParseError, Section, Table, TocEntry, Toctree, MAX_INCLUDE_DEPTH,
};
use crate::extensions::{AdmonitionArgument, DirectiveKind};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

const ADORNMENT_CHARS: &str = "!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

fn directive_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9_:+.-]*?)::(?:\s+(.*))?$").expect("valid regex")
    })
}

fn substitution_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\.\.\s+\|([^|]+)\|\s+([A-Za-z0-9_:+.-]+)::(?:\s+(.*))?$")
            .expect("valid regex")
    })
}

fn target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^_(`[^`]+`|[^:`][^:]*):(?:\s+(.*))?$").expect("valid regex"))
}

fn option_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^:([A-Za-z0-9_-]+):(?:\s+(.*))?$").expect("valid regex"))
}

fn field_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^:([^:\s`][^:`]*?):(?:\s+(.*))?$").expect("valid regex"))
}

fn enumerator_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:(\d+|#)[.)]|\((\d+|#)\))(?:\s+|$)").expect("valid regex"))
}

/// Output of a top-level parse.
#[derive(Debug)]
pub struct Parsed {
    pub body: Vec<Node>,
    pub targets: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Parses a whole source file.
pub fn parse(source: &str, ctx: ParseContext<'_>) -> Result<Parsed, ParseError> {
    let lines = split_lines(source);
    let mut parser = BlockParser {
        ctx,
        source_dir: ctx.source_dir.map(PathBuf::from),
        styles: Vec::new(),
        language: ctx.extensions.default_language().to_string(),
        substitutions: BTreeMap::new(),
        targets: BTreeMap::new(),
        warnings: Vec::new(),
        include_depth: 0,
    };
    parser.collect_substitutions(&lines);
    let blocks = parser.parse_blocks(&lines, 1, false)?;
    Ok(Parsed {
        body: nest_sections(blocks),
        targets: parser.targets,
        warnings: parser.warnings,
    })
}

enum Block {
    Node(Node),
    Title { level: usize, title: Vec<Inline> },
}

struct BlockParser<'a> {
    ctx: ParseContext<'a>,
    source_dir: Option<PathBuf>,
    /// Title adornment styles in order of first appearance: (char, has overline).
    styles: Vec<(char, bool)>,
    /// Language of `::` blocks, changed by `highlight`.
    language: String,
    substitutions: BTreeMap<String, String>,
    targets: BTreeMap<String, String>,
    warnings: Vec<String>,
    include_depth: usize,
}

fn split_lines(source: &str) -> Vec<String> {
    source
        .trim_start_matches('\u{feff}')
        .lines()
        .map(|line| expand_tabs(line).trim_end().to_string())
        .collect()
}

fn expand_tabs(line: &str) -> String {
    if !line.contains('\t') {
        return line.to_string();
    }
    let mut out = String::with_capacity(line.len() + 8);
    let mut column = 0;
    for c in line.chars() {
        if c == '\t' {
            let spaces = 8 - column % 8;
            out.extend(std::iter::repeat(' ').take(spaces));
            column += spaces;
        } else {
            out.push(c);
            column += 1;
        }
    }
    out
}

fn is_blank(line: &str) -> bool {
    line.trim().is_empty()
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// End (exclusive) of the run of blank or indented lines starting at `start`,
/// with trailing blank lines excluded.
fn indented_end(lines: &[String], start: usize) -> usize {
    let mut end = start;
    while end < lines.len() && (is_blank(&lines[end]) || indent_of(&lines[end]) > 0) {
        end += 1;
    }
    while end > start && is_blank(&lines[end - 1]) {
        end -= 1;
    }
    end
}

fn dedent(lines: &[String]) -> Vec<String> {
    let min = lines
        .iter()
        .filter(|l| !is_blank(l))
        .map(|l| indent_of(l))
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| if is_blank(l) { String::new() } else { l[min..].to_string() })
        .collect()
}

fn strip_indent(line: &str, width: usize) -> String {
    let k = indent_of(line).min(width);
    line[k..].to_string()
}

fn trim_blank_edges(lines: &[String]) -> &[String] {
    let start = lines.iter().position(|l| !is_blank(l)).unwrap_or(lines.len());
    let end = lines
        .iter()
        .rposition(|l| !is_blank(l))
        .map(|i| i + 1)
        .unwrap_or(start);
    &lines[start..end.max(start)]
}

/// The repeated punctuation character of a title adornment line.
fn adornment_char(line: &str) -> Option<char> {
    let mut chars = line.chars();
    let first = chars.next()?;
    if !ADORNMENT_CHARS.contains(first) || line.chars().count() < 2 || line == "::" {
        return None;
    }
    chars.all(|c| c == first).then_some(first)
}

fn bullet_marker(line: &str) -> Option<(char, usize)> {
    let mut chars = line.chars();
    let marker = chars.next()?;
    if !matches!(marker, '-' | '*' | '+' | '•') {
        return None;
    }
    let rest = chars.as_str();
    if rest.is_empty() {
        return Some((marker, marker.len_utf8() + 1));
    }
    if !rest.starts_with(' ') {
        return None;
    }
    Some((marker, line.len() - rest.trim_start().len()))
}

fn enumerator(line: &str) -> Option<(Option<usize>, usize)> {
    let caps = enumerator_re().captures(line)?;
    let value = caps.get(1).or_else(|| caps.get(2))?.as_str();
    let width = caps.get(0)?.end();
    let width = if width >= line.len() { width + 1 } else { width };
    Some((value.parse().ok(), width))
}

impl BlockParser<'_> {
    fn inline(&mut self, text: &str) -> Vec<Inline> {
        parse_inline(text, &self.substitutions, &mut self.warnings)
    }

    fn cells(&mut self, raw: Vec<String>) -> Vec<Cell> {
        raw.iter().map(|cell| self.inline(cell)).collect()
    }

    fn table(&mut self, raw: RawTable) -> Node {
        let header = raw.header.map(|h| self.cells(h));
        let rows = raw.rows.into_iter().map(|r| self.cells(r)).collect();
        Node::Table(Table { header, rows })
    }

    fn collect_substitutions(&mut self, lines: &[String]) {
        for line in lines {
            let Some(caps) = substitution_re().captures(line) else {
                continue;
            };
            if &caps[2] == "replace" {
                let value = caps.get(3).map(|m| m.as_str().trim()).unwrap_or("");
                self.substitutions
                    .insert(normalize_name(&caps[1]), value.to_string());
            }
        }
    }

    fn parse_nodes(&mut self, lines: &[String], first_line: usize) -> Result<Vec<Node>, ParseError> {
        let blocks = self.parse_blocks(lines, first_line, true)?;
        Ok(blocks
            .into_iter()
            .map(|block| match block {
                Block::Node(node) => node,
                Block::Title { title, .. } => Node::Paragraph(title),
            })
            .collect())
    }

    fn parse_blocks(
        &mut self,
        lines: &[String],
        first_line: usize,
        nested: bool,
    ) -> Result<Vec<Block>, ParseError> {
        let mut out = Vec::new();
        let mut i = 0;
        while i < lines.len() {
            let line = &lines[i];
            let line_no = first_line + i;
            if is_blank(line) {
                i += 1;
                continue;
            }

            if indent_of(line) > 0 {
                let end = indented_end(lines, i);
                let inner = dedent(&lines[i..end]);
                let children = self.parse_nodes(&inner, line_no)?;
                out.push(Block::Node(Node::BlockQuote(children)));
                i = end;
                continue;
            }

            if !nested {
                if let Some((block, next)) = self.title(lines, i, first_line)? {
                    out.push(block);
                    i = next;
                    continue;
                }
            }

            if adornment_char(line).is_some()
                && line.len() >= 4
                && lines.get(i + 1).map_or(true, |l| is_blank(l))
            {
                out.push(Block::Node(Node::Transition));
                i += 1;
                continue;
            }

            if line == ".." || line.starts_with(".. ") {
                i = self.explicit_markup(lines, i, first_line, nested, &mut out)?;
                continue;
            }

            if table::is_grid_border(line) {
                let mut end = i + 1;
                while end < lines.len() && !is_blank(&lines[end]) {
                    end += 1;
                }
                let raw = table::parse_grid(&lines[i..end], line_no)?;
                out.push(Block::Node(self.table(raw)));
                i = end;
                continue;
            }

            if table::is_simple_border(line) {
                let end = simple_table_end(lines, i).ok_or_else(|| ParseError::MalformedTable {
                    line: line_no,
                    reason: "simple table has no closing border".to_string(),
                })?;
                let raw = table::parse_simple(&lines[i..end], line_no)?;
                out.push(Block::Node(self.table(raw)));
                i = end;
                continue;
            }

            if let Some((marker, _)) = bullet_marker(line) {
                i = self.bullet_list(lines, i, first_line, marker, &mut out)?;
                continue;
            }

            if let Some((start, _)) = enumerator(line) {
                i = self.enumerated_list(lines, i, first_line, start, &mut out)?;
                continue;
            }

            if field_re().is_match(line) {
                i = self.field_list(lines, i, first_line, &mut out)?;
                continue;
            }

            if line.starts_with(">>>") {
                let mut end = i;
                while end < lines.len() && !is_blank(&lines[end]) {
                    end += 1;
                }
                out.push(Block::Node(Node::LiteralBlock {
                    language: "python".to_string(),
                    text: lines[i..end].join("\n"),
                }));
                i = end;
                continue;
            }

            if lines
                .get(i + 1)
                .is_some_and(|next| !is_blank(next) && indent_of(next) > 0)
            {
                i = self.definition_list(lines, i, first_line, &mut out)?;
                continue;
            }

            i = self.paragraph(lines, i, first_line, nested, &mut out)?;
        }
        Ok(out)
    }

    /// Recognises an underlined or over-and-underlined title at `i`.
    fn title(
        &mut self,
        lines: &[String],
        i: usize,
        first_line: usize,
    ) -> Result<Option<(Block, usize)>, ParseError> {
        let line = &lines[i];
        let next = lines.get(i + 1);

        let (text, style, consumed) = match adornment_char(line) {
            Some(c) => {
                let Some(text_line) = next.filter(|l| !is_blank(l) && adornment_char(l.trim()).is_none())
                else {
                    return Ok(None);
                };
                match lines.get(i + 2).and_then(|l| adornment_char(l)) {
                    Some(under) if under == c => (text_line.trim().to_string(), (c, true), 3),
                    _ => return Err(ParseError::IncompleteTitle { line: first_line + i }),
                }
            }
            None => {
                let Some(c) = next.and_then(|l| adornment_char(l)) else {
                    return Ok(None);
                };
                let underline_len = next.map_or(0, |l| l.chars().count());
                let title_len = line.trim().chars().count();
                if underline_len < title_len.min(3) {
                    return Ok(None);
                }
                if underline_len < title_len {
                    self.warnings.push(format!(
                        "line {}: title underline too short",
                        first_line + i + 1
                    ));
                }
                (line.trim().to_string(), (c, false), 2)
            }
        };

        let level = match self.styles.iter().position(|s| *s == style) {
            Some(index) => index + 1,
            None => {
                self.styles.push(style);
                self.styles.len()
            }
        };
        let title = self.inline(&text);
        Ok(Some((Block::Title { level, title }, i + consumed)))
    }

    fn explicit_markup(
        &mut self,
        lines: &[String],
        i: usize,
        first_line: usize,
        nested: bool,
        out: &mut Vec<Block>,
    ) -> Result<usize, ParseError> {
        let end = indented_end(lines, i + 1);
        let header = lines[i].get(2..).unwrap_or("").trim();
        let line_no = first_line + i;

        if substitution_re().is_match(&lines[i]) || header.starts_with('[') || header.starts_with("__ ") {
            return Ok(end);
        }

        if let Some(caps) = target_re().captures(header) {
            let name = normalize_name(caps[1].trim_matches('`'));
            let mut url = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            for continuation in &lines[i + 1..end] {
                url.push_str(continuation.trim());
            }
            if url.is_empty() {
                out.push(Block::Node(Node::Target(name)));
            } else if !url.ends_with('_') {
                self.targets.insert(name, url);
            }
            return Ok(end);
        }

        if let Some(caps) = directive_re().captures(header) {
            let name = caps[1].to_string();
            let argument = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            let body = dedent(&lines[i + 1..end]);
            let blocks = self.directive(&name, &argument, &body, line_no, nested)?;
            out.extend(blocks);
            return Ok(end);
        }

        // comment
        Ok(end)
    }

    fn directive(
        &mut self,
        name: &str,
        argument: &str,
        body: &[String],
        line_no: usize,
        nested: bool,
    ) -> Result<Vec<Block>, ParseError> {
        let kind = self.ctx.extensions.directive(name);

        let mut k = 0;
        let mut extra_arguments = Vec::new();
        if matches!(kind, DirectiveKind::Object { .. }) {
            while k < body.len() && !is_blank(&body[k]) && !option_re().is_match(&body[k]) {
                extra_arguments.push(body[k].trim().to_string());
                k += 1;
            }
        }
        let mut options: BTreeMap<String, String> = BTreeMap::new();
        while k < body.len() {
            let Some(caps) = option_re().captures(&body[k]) else {
                break;
            };
            let mut value = caps.get(2).map(|m| m.as_str().trim().to_string()).unwrap_or_default();
            k += 1;
            while k < body.len() && !is_blank(&body[k]) && indent_of(&body[k]) > 0 {
                value.push(' ');
                value.push_str(body[k].trim());
                k += 1;
            }
            options.insert(caps[1].to_ascii_lowercase(), value);
        }
        let content_start = k + body[k..].iter().take_while(|l| is_blank(l)).count();
        let content_line = line_no + 1 + content_start;
        let content = dedent(trim_blank_edges(&body[k..]));

        let missing = || ParseError::MissingContent {
            directive: name.to_string(),
            line: line_no,
        };
        if kind.requires_content()
            && content.is_empty()
            && !matches!(kind, DirectiveKind::Admonition { .. })
            && !options.contains_key("file")
        {
            return Err(missing());
        }

        let node = match kind {
            DirectiveKind::Code => Node::LiteralBlock {
                language: if argument.is_empty() {
                    options
                        .get("language")
                        .map(|l| self.ctx.extensions.language(l))
                        .unwrap_or_else(|| self.language.clone())
                } else {
                    self.ctx.extensions.language(argument)
                },
                text: content.join("\n"),
            },
            DirectiveKind::LiteralEmph => Node::LiteralBlock {
                language: self.language.clone(),
                text: content.join("\n").replace("**", ""),
            },
            DirectiveKind::LiteralInclude => match self.literal_include(argument, &options, line_no) {
                Some(node) => node,
                None => return Ok(Vec::new()),
            },
            DirectiveKind::Include => return self.include(argument, &options, line_no, nested),
            DirectiveKind::Highlight => {
                self.language = self.ctx.extensions.language(argument);
                return Ok(Vec::new());
            }
            DirectiveKind::Admonition { label, argument: mode } => {
                let mut lines = Vec::new();
                let label = match mode {
                    AdmonitionArgument::Content => {
                        if !argument.is_empty() {
                            lines.push(argument.to_string());
                        }
                        label
                    }
                    AdmonitionArgument::Title => argument.to_string(),
                    AdmonitionArgument::Version => {
                        let (version, rest) =
                            argument.split_once(char::is_whitespace).unwrap_or((argument, ""));
                        if !rest.trim().is_empty() {
                            lines.push(rest.trim().to_string());
                        }
                        format!("{label} {version}").trim().to_string()
                    }
                };
                // text after the header belongs to the same paragraph as the argument
                let body_lines = if lines.is_empty() { content.clone() } else { dedent(trim_blank_edges(body)) };
                lines.extend(body_lines);
                if lines.iter().all(|l| is_blank(l)) && mode != AdmonitionArgument::Version {
                    return Err(missing());
                }
                let children = self.parse_nodes(&lines, content_line)?;
                Node::Admonition { label, children }
            }
            DirectiveKind::Container { titled } => {
                let mut children = self.parse_nodes(&content, content_line)?;
                if titled && !argument.is_empty() {
                    let title = self.inline(argument);
                    children.insert(0, Node::Paragraph(vec![Inline::Strong(super::plain_text(&title))]));
                }
                if children.is_empty() {
                    return Ok(Vec::new());
                }
                Node::Container(children)
            }
            DirectiveKind::ListTable => {
                let nodes = self.parse_nodes(&content, content_line)?;
                let raw = table::rows_from_list(&nodes, header_rows(&options), line_no)?;
                self.titled_table(argument, raw)
            }
            DirectiveKind::CsvTable => {
                let raw = table::parse_csv(
                    &content,
                    options.get("header").map(String::as_str),
                    header_rows(&options),
                );
                self.titled_table(argument, raw)
            }
            DirectiveKind::Toctree => Node::Toctree(toctree(&options, &content)),
            DirectiveKind::Object { objtype } => {
                let mut signatures = Vec::new();
                if !argument.is_empty() {
                    signatures.push(argument.to_string());
                }
                signatures.extend(extra_arguments);
                let children = self.parse_nodes(&content, content_line)?;
                Node::Object(ObjectDescription {
                    objtype,
                    signatures,
                    children,
                })
            }
            DirectiveKind::Ignored => return Ok(Vec::new()),
            DirectiveKind::Unknown => {
                self.warnings.push(format!(
                    "line {line_no}: unknown directive \"{name}\" rendered as plain text"
                ));
                let text = content
                    .iter()
                    .map(|l| l.trim())
                    .filter(|l| !l.is_empty())
                    .collect::<Vec<_>>()
                    .join(" ");
                Node::Unknown {
                    name: name.to_string(),
                    argument: argument.to_string(),
                    text,
                }
            }
        };
        Ok(vec![Block::Node(node)])
    }

    fn titled_table(&mut self, title: &str, raw: RawTable) -> Node {
        let table = self.table(raw);
        if title.is_empty() {
            return table;
        }
        let title = self.inline(title);
        Node::Container(vec![
            Node::Paragraph(vec![Inline::Strong(super::plain_text(&title))]),
            table,
        ])
    }

    fn resolve_path(&self, argument: &str) -> Option<PathBuf> {
        let argument = argument.trim();
        if argument.is_empty() || argument.starts_with('<') {
            return None;
        }
        match argument.strip_prefix('/') {
            Some(rooted) => self.ctx.doc_root.map(|root| root.join(rooted)),
            None => self.source_dir.as_ref().map(|dir| dir.join(argument)),
        }
    }

    fn read_included(&mut self, argument: &str, line_no: usize) -> Option<(PathBuf, String)> {
        let Some(path) = self.resolve_path(argument) else {
            self.warnings.push(format!(
                "line {line_no}: cannot resolve included file \"{argument}\""
            ));
            return None;
        };
        match fs::read_to_string(&path) {
            Ok(text) => Some((path, text)),
            Err(e) => {
                self.warnings.push(format!(
                    "line {line_no}: cannot read included file {}: {e}",
                    path.display()
                ));
                None
            }
        }
    }

    fn literal_include(
        &mut self,
        argument: &str,
        options: &BTreeMap<String, String>,
        line_no: usize,
    ) -> Option<Node> {
        let (path, text) = self.read_included(argument, line_no)?;
        let lines: Vec<&str> = text.lines().collect();
        let selected: Vec<&str> = match options.get("lines") {
            Some(spec) => select_lines(&lines, spec),
            None => lines,
        };
        let language = match options.get("language") {
            Some(language) => self.ctx.extensions.language(language),
            None => self.ctx.extensions.language_for_path(&path),
        };
        Some(Node::LiteralBlock {
            language,
            text: selected.join("\n").trim_end().to_string(),
        })
    }

    fn include(
        &mut self,
        argument: &str,
        options: &BTreeMap<String, String>,
        line_no: usize,
        nested: bool,
    ) -> Result<Vec<Block>, ParseError> {
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            return Err(ParseError::IncludeDepth(MAX_INCLUDE_DEPTH));
        }
        let Some((path, text)) = self.read_included(argument, line_no) else {
            return Ok(Vec::new());
        };
        if options.contains_key("literal") || options.contains_key("code") {
            let language = options
                .get("code")
                .filter(|l| !l.is_empty())
                .map(|l| self.ctx.extensions.language(l))
                .unwrap_or_else(|| "text".to_string());
            return Ok(vec![Block::Node(Node::LiteralBlock {
                language,
                text: text.trim_end().to_string(),
            })]);
        }

        let lines = split_lines(&text);
        self.collect_substitutions(&lines);
        let saved_dir = std::mem::replace(&mut self.source_dir, path.parent().map(PathBuf::from));
        self.include_depth += 1;
        let result = self.parse_blocks(&lines, 1, nested);
        self.include_depth -= 1;
        self.source_dir = saved_dir;
        result
    }

    fn bullet_list(
        &mut self,
        lines: &[String],
        mut i: usize,
        first_line: usize,
        marker: char,
        out: &mut Vec<Block>,
    ) -> Result<usize, ParseError> {
        let mut items = Vec::new();
        loop {
            let Some((_, width)) = bullet_marker(&lines[i]).filter(|(m, _)| *m == marker) else {
                break;
            };
            let (item, end) = self.list_item(lines, i, first_line, width)?;
            items.push(item);
            i = end;
            let next = next_non_blank(lines, i);
            match next.and_then(|n| bullet_marker(&lines[n])) {
                Some((m, _)) if m == marker => i = next.unwrap_or(i),
                _ => break,
            }
        }
        out.push(Block::Node(Node::BulletList(items)));
        Ok(i)
    }

    fn enumerated_list(
        &mut self,
        lines: &[String],
        mut i: usize,
        first_line: usize,
        start: Option<usize>,
        out: &mut Vec<Block>,
    ) -> Result<usize, ParseError> {
        let mut items = Vec::new();
        while let Some((_, width)) = enumerator(&lines[i]) {
            let (item, end) = self.list_item(lines, i, first_line, width)?;
            items.push(item);
            i = end;
            match next_non_blank(lines, i) {
                Some(n) if enumerator(&lines[n]).is_some() => i = n,
                _ => break,
            }
        }
        out.push(Block::Node(Node::EnumeratedList {
            start: start.unwrap_or(1),
            items,
        }));
        Ok(i)
    }

    /// Parses the item whose marker is on line `i`; `width` is the marker plus its spacing.
    fn list_item(
        &mut self,
        lines: &[String],
        i: usize,
        first_line: usize,
        width: usize,
    ) -> Result<(Vec<Node>, usize), ParseError> {
        let end = indented_end(lines, i + 1);
        let mut item_lines = vec![lines[i].get(width..).unwrap_or("").to_string()];
        item_lines.extend(lines[i + 1..end].iter().map(|l| strip_indent(l, width)));
        let children = self.parse_nodes(&item_lines, first_line + i)?;
        Ok((children, end))
    }

    fn field_list(
        &mut self,
        lines: &[String],
        mut i: usize,
        first_line: usize,
        out: &mut Vec<Block>,
    ) -> Result<usize, ParseError> {
        let mut fields = Vec::new();
        loop {
            let Some(caps) = field_re().captures(&lines[i]) else {
                break;
            };
            let name = caps[1].trim().to_string();
            let mut body = vec![caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default()];
            let end = indented_end(lines, i + 1);
            body.extend(dedent(&lines[i + 1..end]));
            let body = self.parse_nodes(&body, first_line + i)?;
            fields.push(Field { name, body });
            i = end;
            match next_non_blank(lines, i) {
                Some(n) if field_re().is_match(&lines[n]) => i = n,
                _ => break,
            }
        }
        out.push(Block::Node(Node::FieldList(fields)));
        Ok(i)
    }

    fn definition_list(
        &mut self,
        lines: &[String],
        mut i: usize,
        first_line: usize,
        out: &mut Vec<Block>,
    ) -> Result<usize, ParseError> {
        let mut items = Vec::new();
        loop {
            let term_line = lines[i].trim();
            let term_text = term_line.split(" : ").next().unwrap_or(term_line).to_string();
            let term = self.inline(&term_text);
            let end = indented_end(lines, i + 1);
            let definition_lines = dedent(&lines[i + 1..end]);
            let definition = self.parse_nodes(&definition_lines, first_line + i + 1)?;
            items.push(DefinitionItem { term, definition });
            i = end;
            match next_non_blank(lines, i) {
                Some(n)
                    if indent_of(&lines[n]) == 0
                        && lines
                            .get(n + 1)
                            .is_some_and(|l| !is_blank(l) && indent_of(l) > 0)
                        && !lines[n].starts_with("..")
                        && bullet_marker(&lines[n]).is_none() =>
                {
                    i = n
                }
                _ => break,
            }
        }
        out.push(Block::Node(Node::DefinitionList(items)));
        Ok(i)
    }

    fn paragraph(
        &mut self,
        lines: &[String],
        i: usize,
        first_line: usize,
        nested: bool,
        out: &mut Vec<Block>,
    ) -> Result<usize, ParseError> {
        let mut end = i + 1;
        while end < lines.len() && !is_blank(&lines[end]) {
            // the last line before an underline starts a new title
            if !nested && lines.get(end + 1).is_some_and(|l| adornment_char(l).is_some()) && adornment_char(&lines[end]).is_none() {
                break;
            }
            end += 1;
        }

        let text = lines[i..end]
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join(" ");
        let (text, expects_literal) = if text == "::" {
            (String::new(), true)
        } else if let Some(stripped) = text.strip_suffix(" ::") {
            (stripped.to_string(), true)
        } else if let Some(stripped) = text.strip_suffix("::") {
            (format!("{stripped}:"), true)
        } else {
            (text, false)
        };
        if !text.is_empty() {
            let spans = self.inline(&text);
            out.push(Block::Node(Node::Paragraph(spans)));
        }
        if !expects_literal {
            return Ok(end);
        }

        let Some(start) = next_non_blank(lines, end) else {
            self.warnings.push(format!(
                "line {}: literal block expected; none found",
                first_line + end
            ));
            return Ok(end);
        };
        if indent_of(&lines[start]) > 0 {
            let block_end = indented_end(lines, start);
            let text = dedent(&lines[start..block_end]).join("\n");
            out.push(Block::Node(Node::LiteralBlock {
                language: self.language.clone(),
                text,
            }));
            return Ok(block_end);
        }
        let quote = lines[start]
            .chars()
            .next()
            .filter(|c| ADORNMENT_CHARS.contains(*c) && !lines[start].starts_with(".."));
        match quote {
            Some(q) => {
                let mut block_end = start;
                while block_end < lines.len() && lines[block_end].starts_with(q) {
                    block_end += 1;
                }
                out.push(Block::Node(Node::LiteralBlock {
                    language: self.language.clone(),
                    text: lines[start..block_end].join("\n"),
                }));
                Ok(block_end)
            }
            None => {
                self.warnings.push(format!(
                    "line {}: literal block expected; none found",
                    first_line + start
                ));
                Ok(end)
            }
        }
    }
}

fn next_non_blank(lines: &[String], from: usize) -> Option<usize> {
    (from..lines.len()).find(|&n| !is_blank(&lines[n]))
}

/// End (exclusive) of a simple table starting at its top border `i`.
fn simple_table_end(lines: &[String], i: usize) -> Option<usize> {
    let mut j = i + 1;
    while j < lines.len() {
        if table::is_simple_border(&lines[j]) && lines.get(j + 1).map_or(true, |l| is_blank(l)) {
            return Some(j + 1);
        }
        j += 1;
    }
    None
}

fn header_rows(options: &BTreeMap<String, String>) -> usize {
    options
        .get("header-rows")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn toctree(options: &BTreeMap<String, String>, content: &[String]) -> Toctree {
    let entries = content
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty() && *l != "self")
        .map(|line| match super::split_explicit_title(line) {
            (Some(title), target) => TocEntry {
                title: Some(title.to_string()),
                target: target.to_string(),
            },
            (None, target) => TocEntry {
                title: None,
                target: target.to_string(),
            },
        })
        .collect();
    Toctree {
        caption: options.get("caption").cloned().filter(|c| !c.is_empty()),
        hidden: options.contains_key("hidden"),
        glob: options.contains_key("glob"),
        entries,
    }
}

/// Applies a `:lines:` selection such as `1-3,7,10-`.
fn select_lines<'l>(lines: &[&'l str], spec: &str) -> Vec<&'l str> {
    let mut selected = Vec::new();
    for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (from, to) = match part.split_once('-') {
            Some((a, b)) => (
                a.trim().parse().unwrap_or(1),
                b.trim().parse().unwrap_or(lines.len()),
            ),
            None => match part.parse::<usize>() {
                Ok(n) => (n, n),
                Err(_) => continue,
            },
        };
        let from = from.max(1);
        let to = to.min(lines.len());
        if from <= to {
            selected.extend_from_slice(&lines[from - 1..to]);
        }
    }
    selected
}

/// Folds the flat title/node stream into nested sections.
fn nest_sections(blocks: Vec<Block>) -> Vec<Node> {
    fn current<'x>(root: &'x mut Vec<Node>, stack: &'x mut [Section]) -> &'x mut Vec<Node> {
        match stack.last_mut() {
            Some(section) => &mut section.children,
            None => root,
        }
    }
    fn close(root: &mut Vec<Node>, stack: &mut Vec<Section>) {
        if let Some(done) = stack.pop() {
            current(root, stack).push(Node::Section(done));
        }
    }

    let mut root = Vec::new();
    let mut stack: Vec<Section> = Vec::new();
    for block in blocks {
        match block {
            Block::Node(node) => current(&mut root, &mut stack).push(node),
            Block::Title { level, title } => {
                let container = current(&mut root, &mut stack);
                let mut labels = Vec::new();
                while let Some(Node::Target(_)) = container.last() {
                    if let Some(Node::Target(name)) = container.pop() {
                        labels.insert(0, name);
                    }
                }
                while stack.last().is_some_and(|s| s.level >= level) {
                    close(&mut root, &mut stack);
                }
                stack.push(Section {
                    title,
                    level,
                    labels,
                    children: Vec::new(),
                });
            }
        }
    }
    while !stack.is_empty() {
        close(&mut root, &mut stack);
    }
    root
}
