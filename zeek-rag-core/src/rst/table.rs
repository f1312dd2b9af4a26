//! Grid, simple, CSV and list tables.
//!
//! Cell text is returned raw; the block parser runs inline parsing over it.

use super::{plain_text, Node, ParseError};

/// Raw table: optional header row and body rows of cell text.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawTable {
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<String>>,
}

pub fn is_grid_border(line: &str) -> bool {
    let line = line.trim_end();
    line.len() >= 3
        && line.starts_with('+')
        && line.ends_with('+')
        && line.chars().all(|c| matches!(c, '+' | '-' | '='))
        && line.contains(['-', '='])
}

pub fn is_simple_border(line: &str) -> bool {
    let line = line.trim_end();
    line.starts_with('=')
        && line.contains(' ')
        && line.chars().all(|c| c == '=' || c == ' ')
}

fn malformed(line: usize, reason: impl Into<String>) -> ParseError {
    ParseError::MalformedTable {
        line,
        reason: reason.into(),
    }
}

/// Parses a grid table. `lines` is the whole table; `first_line` its 1-based line number.
pub fn parse_grid(lines: &[String], first_line: usize) -> Result<RawTable, ParseError> {
    let border: Vec<char> = lines[0].trim_end().chars().collect();
    let width = border.len();
    let boundaries: Vec<usize> = border
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == '+')
        .map(|(i, _)| i)
        .collect();
    let columns = boundaries.len() - 1;

    let mut table = RawTable::default();
    let mut current: Vec<Vec<String>> = vec![Vec::new(); columns];
    let mut has_content = false;

    for (offset, raw) in lines.iter().enumerate().skip(1) {
        let line_no = first_line + offset;
        let chars: Vec<char> = raw.trim_end().chars().collect();
        if chars.len() != width {
            return Err(malformed(line_no, "row does not line up with the table border"));
        }
        match chars[0] {
            '+' => {
                let row: Vec<String> = current
                    .iter()
                    .map(|parts| parts.join(" ").trim().to_string())
                    .collect();
                if has_content {
                    table.rows.push(row);
                }
                if chars.contains(&'=') {
                    if table.header.is_some() {
                        return Err(malformed(line_no, "more than one header separator"));
                    }
                    let rows = std::mem::take(&mut table.rows);
                    table.header = rows.into_iter().next();
                }
                current = vec![Vec::new(); columns];
                has_content = false;
            }
            '|' => {
                if chars[width - 1] != '|' {
                    return Err(malformed(line_no, "row does not line up with the table border"));
                }
                let mut column = 0;
                let mut start = 1;
                for (index, &boundary) in boundaries.iter().enumerate().skip(1) {
                    // A boundary without a bar belongs to a cell spanning columns.
                    if chars[boundary] != '|' && index != boundaries.len() - 1 {
                        continue;
                    }
                    let text: String = chars[start..boundary].iter().collect();
                    let text = text.trim();
                    if !text.is_empty() {
                        current[column].push(text.to_string());
                        has_content = true;
                    }
                    column = index;
                    start = boundary + 1;
                }
            }
            _ => return Err(malformed(line_no, "expected a row or a border")),
        }
    }

    if has_content {
        return Err(malformed(
            first_line + lines.len() - 1,
            "table has no closing border",
        ));
    }
    Ok(table)
}

/// Parses a simple table. `lines` runs from the top border to the bottom border.
pub fn parse_simple(lines: &[String], first_line: usize) -> Result<RawTable, ParseError> {
    let top: Vec<char> = lines[0].chars().collect();
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i < top.len() {
        if top[i] == '=' {
            let start = i;
            while i < top.len() && top[i] == '=' {
                i += 1;
            }
            spans.push((start, i));
        } else {
            i += 1;
        }
    }
    if spans.len() < 2 {
        return Err(malformed(first_line, "simple table needs at least two columns"));
    }

    let borders: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| is_simple_border(l))
        .map(|(i, _)| i)
        .collect();
    let header_end = if borders.len() >= 3 { Some(borders[1]) } else { None };

    let mut table = RawTable::default();
    let mut header_rows: Vec<Vec<String>> = Vec::new();
    let mut rows: Vec<Vec<String>> = Vec::new();

    for (offset, line) in lines.iter().enumerate().skip(1) {
        if is_simple_border(line) || line.trim().is_empty() {
            continue;
        }
        // column-span underlines
        if line.trim().chars().all(|c| c == '-' || c == ' ') {
            continue;
        }
        let chars: Vec<char> = line.chars().collect();
        let cells: Vec<String> = spans
            .iter()
            .enumerate()
            .map(|(index, &(start, _))| {
                let end = spans
                    .get(index + 1)
                    .map(|&(next, _)| next)
                    .unwrap_or(chars.len())
                    .min(chars.len());
                if start >= chars.len() {
                    String::new()
                } else {
                    chars[start..end].iter().collect::<String>().trim().to_string()
                }
            })
            .collect();

        let target = match header_end {
            Some(end) if offset < end => &mut header_rows,
            _ => &mut rows,
        };
        // An empty first column continues the previous row.
        if cells[0].is_empty() && !target.is_empty() {
            if let Some(previous) = target.last_mut() {
                for (cell, extra) in previous.iter_mut().zip(cells) {
                    if !extra.is_empty() {
                        if !cell.is_empty() {
                            cell.push(' ');
                        }
                        cell.push_str(&extra);
                    }
                }
            }
        } else {
            target.push(cells);
        }
    }

    table.header = header_rows.into_iter().next();
    table.rows = rows;
    Ok(table)
}

/// Splits one CSV record, honouring double quotes and `""` escapes.
pub fn split_csv_line(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            ',' if !quoted => cells.push(std::mem::take(&mut current).trim().to_string()),
            c => current.push(c),
        }
    }
    cells.push(current.trim().to_string());
    cells
}

/// Parses `csv-table` content; `header` is the `:header:` option if present.
pub fn parse_csv(content: &[String], header: Option<&str>, header_rows: usize) -> RawTable {
    let mut records: Vec<Vec<String>> = Vec::new();
    let mut pending = String::new();
    for line in content {
        if line.trim().is_empty() && pending.is_empty() {
            continue;
        }
        if !pending.is_empty() {
            pending.push(' ');
        }
        pending.push_str(line.trim());
        // a quoted cell may run over several lines
        if pending.matches('"').count() % 2 == 0 {
            records.push(split_csv_line(&pending));
            pending.clear();
        }
    }
    if !pending.is_empty() {
        records.push(split_csv_line(&pending));
    }

    let mut table = RawTable::default();
    if let Some(header) = header {
        table.header = Some(split_csv_line(header));
    } else if header_rows > 0 && !records.is_empty() {
        table.header = Some(records.remove(0));
    }
    table.rows = records;
    table
}

/// Converts `list-table` content, a two-level bullet list, into rows of plain cells.
pub fn rows_from_list(
    nodes: &[Node],
    header_rows: usize,
    line: usize,
) -> Result<RawTable, ParseError> {
    let items = match nodes {
        [Node::BulletList(items)] => items,
        _ => {
            return Err(malformed(
                line,
                "list-table content must be a single two-level bullet list",
            ))
        }
    };
    let mut rows = Vec::with_capacity(items.len());
    for item in items {
        let cells = match item.as_slice() {
            [Node::BulletList(cells)] => cells,
            _ => return Err(malformed(line, "list-table row is not a bullet list")),
        };
        rows.push(cells.iter().map(|cell| node_text(cell)).collect());
    }
    let mut table = RawTable::default();
    if header_rows > 0 && !rows.is_empty() {
        table.header = Some(rows.remove(0));
    }
    table.rows = rows;
    Ok(table)
}

/// Flattened text of block nodes, for places that need a single line.
pub fn node_text(nodes: &[Node]) -> String {
    let mut parts = Vec::new();
    for node in nodes {
        match node {
            Node::Paragraph(spans) => parts.push(plain_text(spans)),
            Node::LiteralBlock { text, .. } => parts.push(text.replace('\n', " ")),
            Node::BulletList(items) | Node::EnumeratedList { items, .. } => {
                for item in items {
                    parts.push(node_text(item));
                }
            }
            Node::BlockQuote(children) | Node::Container(children) => {
                parts.push(node_text(children))
            }
            _ => {}
        }
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}
