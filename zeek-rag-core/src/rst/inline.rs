//! Inline markup: emphasis, strong, literals, roles, references and substitutions.

use super::{normalize_name, Inline, RefTarget};
use std::collections::BTreeMap;

/// Parses one paragraph's worth of text.
///
/// Unterminated markup is kept as literal text and a warning is pushed.
pub fn parse_inline(
    text: &str,
    substitutions: &BTreeMap<String, String>,
    warnings: &mut Vec<String>,
) -> Vec<Inline> {
    InlineParser {
        chars: text.chars().collect(),
        pos: 0,
        buffer: String::new(),
        out: Vec::new(),
        substitutions,
        warnings,
    }
    .run()
}

struct InlineParser<'a> {
    chars: Vec<char>,
    pos: usize,
    buffer: String,
    out: Vec<Inline>,
    substitutions: &'a BTreeMap<String, String>,
    warnings: &'a mut Vec<String>,
}

fn is_role_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '+' | ':')
}

fn opens_after(prev: Option<char>) -> bool {
    match prev {
        None => true,
        Some(c) => c.is_whitespace() || matches!(c, '-' | ':' | '/' | '\'' | '"' | '<' | '(' | '[' | '{'),
    }
}

fn closes_before(next: Option<char>) -> bool {
    match next {
        None => true,
        Some(c) => {
            c.is_whitespace()
                || matches!(
                    c,
                    '-' | '.' | ',' | ':' | ';' | '!' | '?' | '\\' | '/' | '\'' | '"' | ')' | ']' | '}' | '>'
                )
        }
    }
}

impl InlineParser<'_> {
    fn run(mut self) -> Vec<Inline> {
        while self.pos < self.chars.len() {
            let c = self.chars[self.pos];
            let prev = self.pos.checked_sub(1).map(|i| self.chars[i]);
            let starts = opens_after(prev) && self.peek(1).is_some_and(|n| !n.is_whitespace());

            let consumed = match c {
                '\\' => self.escape(),
                '`' if self.peek(1) == Some('`') && starts_double(&self, prev) => self.literal(),
                '`' if starts => self.interpreted(),
                ':' if starts => self.role_prefix(),
                '*' if self.peek(1) == Some('*') && starts_double(&self, prev) => {
                    self.delimited("**", Inline::Strong)
                }
                '*' if starts => self.delimited("*", Inline::Emphasis),
                '|' if starts => self.substitution(),
                '_' => self.word_reference(),
                _ => false,
            };
            if !consumed {
                self.buffer.push(c);
                self.pos += 1;
            }
        }
        self.flush();
        self.out
    }

    fn peek(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.buffer);
        if let Some(Inline::Text(last)) = self.out.last_mut() {
            last.push_str(&text);
        } else {
            self.out.push(Inline::Text(text));
        }
    }

    fn emit(&mut self, span: Inline) {
        self.flush();
        self.out.push(span);
    }

    fn unterminated(&mut self, what: &str) {
        let context: String = self.chars[self.pos..].iter().take(40).collect();
        self.warnings
            .push(format!("unterminated {what} starting at \"{context}\""));
    }

    /// Finds `end` at or after `from`, obeying the end-string rules.
    fn find_close(&self, from: usize, end: &str) -> Option<usize> {
        let end: Vec<char> = end.chars().collect();
        let mut i = from;
        while i + end.len() <= self.chars.len() {
            if self.chars[i..i + end.len()] == end[..]
                && i > from
                && !self.chars[i - 1].is_whitespace()
                && self.chars[i - 1] != '\\'
                && closes_before(self.chars.get(i + end.len()).copied())
            {
                return Some(i);
            }
            i += 1;
        }
        None
    }

    fn slice(&self, from: usize, to: usize) -> String {
        self.chars[from..to].iter().collect()
    }

    fn escape(&mut self) -> bool {
        match self.peek(1) {
            // escaped whitespace disappears entirely
            Some(c) if c.is_whitespace() => self.pos += 2,
            Some(c) => {
                self.buffer.push(c);
                self.pos += 2;
            }
            None => self.pos += 1,
        }
        true
    }

    fn literal(&mut self) -> bool {
        let start = self.pos + 2;
        match self.find_close(start, "``") {
            Some(end) => {
                let text = self.slice(start, end);
                self.emit(Inline::Literal(text));
                self.pos = end + 2;
                true
            }
            None => {
                self.unterminated("inline literal");
                self.buffer.push_str("``");
                self.pos += 2;
                true
            }
        }
    }

    fn delimited(&mut self, marker: &str, make: fn(String) -> Inline) -> bool {
        let start = self.pos + marker.len();
        match self.find_close(start, marker) {
            Some(end) => {
                let text = self.slice(start, end);
                self.emit(make(text));
                self.pos = end + marker.len();
            }
            None => {
                self.unterminated(if marker == "**" { "strong emphasis" } else { "emphasis" });
                self.buffer.push_str(marker);
                self.pos += marker.len();
            }
        }
        true
    }

    /// `:name:`text``
    fn role_prefix(&mut self) -> bool {
        let mut j = self.pos + 1;
        while j < self.chars.len() && is_role_name_char(self.chars[j]) {
            j += 1;
        }
        if j >= self.chars.len() || self.chars[j] != '`' || self.chars[j - 1] != ':' || j < self.pos + 3 {
            return false;
        }
        let name = self.slice(self.pos + 1, j - 1);
        let start = j + 1;
        match self.find_close(start, "`") {
            Some(end) => {
                let text = self.slice(start, end);
                self.emit(Inline::Role { name, text });
                self.pos = end + 1;
            }
            None => {
                self.unterminated("interpreted text");
                let prefix = self.slice(self.pos, start);
                self.buffer.push_str(&prefix);
                self.pos = start;
            }
        }
        true
    }

    /// `` `text` ``, `` `text`_ ``, `` `text <url>`_ `` and `` `text`:role: ``.
    fn interpreted(&mut self) -> bool {
        let start = self.pos + 1;
        let Some(end) = self.find_close_backtick(start) else {
            self.unterminated("interpreted text");
            self.buffer.push('`');
            self.pos += 1;
            return true;
        };
        let text = self.slice(start, end);
        let mut after = end + 1;

        if self.chars.get(after) == Some(&'_') {
            after += 1;
            if self.chars.get(after) == Some(&'_') {
                after += 1;
            }
            self.emit(reference_from(&text));
        } else if self.chars.get(after) == Some(&':') {
            let mut j = after + 1;
            while j < self.chars.len() && is_role_name_char(self.chars[j]) && self.chars[j] != ':' {
                j += 1;
            }
            if self.chars.get(j) == Some(&':') && j > after + 1 {
                let name = self.slice(after + 1, j);
                after = j + 1;
                self.emit(Inline::Role { name, text });
            } else {
                self.emit(Inline::Role {
                    name: String::new(),
                    text,
                });
            }
        } else {
            self.emit(Inline::Role {
                name: String::new(),
                text,
            });
        }
        self.pos = after;
        true
    }

    /// Closing backtick of interpreted text; it may be followed by `_` or a role suffix.
    fn find_close_backtick(&self, from: usize) -> Option<usize> {
        let mut i = from;
        while i < self.chars.len() {
            if self.chars[i] == '`' && i > from && !self.chars[i - 1].is_whitespace() {
                let next = self.chars.get(i + 1).copied();
                if matches!(next, Some('_') | Some(':')) || closes_before(next) {
                    return Some(i);
                }
            }
            i += 1;
        }
        None
    }

    fn substitution(&mut self) -> bool {
        let start = self.pos + 1;
        let Some(end) = self.find_close_any(start, '|') else {
            return false;
        };
        let name = self.slice(start, end);
        let Some(value) = self.substitutions.get(&normalize_name(&name)).cloned() else {
            return false;
        };
        self.buffer.push_str(&value);
        self.pos = end + 1;
        if self.chars.get(self.pos) == Some(&'_') {
            self.pos += 1;
        }
        true
    }

    fn find_close_any(&self, from: usize, c: char) -> Option<usize> {
        (from..self.chars.len()).find(|&i| self.chars[i] == c && i > from && !self.chars[i - 1].is_whitespace())
    }

    /// `word_`: a simple reference name directly followed by an underscore.
    fn word_reference(&mut self) -> bool {
        if !closes_before(self.peek(1)) || self.peek(1) == Some('_') {
            return false;
        }
        let word_len = self
            .buffer
            .chars()
            .rev()
            .take_while(|c| c.is_alphanumeric() || matches!(c, '-' | '.'))
            .count();
        if word_len == 0 {
            return false;
        }
        let split = self.buffer.chars().count() - word_len;
        let before: String = self.buffer.chars().take(split).collect();
        if !opens_after(before.chars().last()) {
            return false;
        }
        let word: String = self.buffer.chars().skip(split).collect();
        self.buffer = before;
        self.emit(Inline::Reference {
            target: RefTarget::Named(normalize_name(&word)),
            text: word,
        });
        self.pos += 1;
        true
    }
}

fn starts_double(parser: &InlineParser<'_>, prev: Option<char>) -> bool {
    opens_after(prev) && parser.peek(2).is_some_and(|n| !n.is_whitespace())
}

fn reference_from(text: &str) -> Inline {
    let trimmed = text.trim();
    if let Some(without_close) = trimmed.strip_suffix('>') {
        if let Some(open) = without_close.rfind('<') {
            let label = without_close[..open].trim_end();
            let target: String = without_close[open + 1..].split_whitespace().collect();
            let target = match target.strip_suffix('_') {
                Some(named) => RefTarget::Named(normalize_name(named)),
                None => RefTarget::Url(target),
            };
            let label = if label.is_empty() {
                match &target {
                    RefTarget::Url(url) | RefTarget::Named(url) => url.clone(),
                }
            } else {
                label.to_string()
            };
            return Inline::Reference {
                text: label,
                target,
            };
        }
    }
    Inline::Reference {
        text: trimmed.to_string(),
        target: RefTarget::Named(normalize_name(trimmed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> (Vec<Inline>, Vec<String>) {
        let mut warnings = Vec::new();
        let subs = BTreeMap::from([("version".to_string(), "8.1.0".to_string())]);
        let spans = parse_inline(text, &subs, &mut warnings);
        (spans, warnings)
    }

    fn text(s: &str) -> Inline {
        Inline::Text(s.to_string())
    }

    #[test]
    fn basic_markup() {
        let (spans, warnings) = parse("Use *this* and **that** with ``zeek -r``.");
        assert!(warnings.is_empty());
        assert_eq!(
            spans,
            vec![
                text("Use "),
                Inline::Emphasis("this".into()),
                text(" and "),
                Inline::Strong("that".into()),
                text(" with "),
                Inline::Literal("zeek -r".into()),
                text("."),
            ]
        );
    }

    #[test]
    fn roles_prefix_and_suffix() {
        let (spans, _) = parse("See :zeek:type:`Conn::Info` and `x`:doc: or `plain`.");
        assert_eq!(
            spans,
            vec![
                text("See "),
                Inline::Role {
                    name: "zeek:type".into(),
                    text: "Conn::Info".into()
                },
                text(" and "),
                Inline::Role {
                    name: "doc".into(),
                    text: "x".into()
                },
                text(" or "),
                Inline::Role {
                    name: String::new(),
                    text: "plain".into()
                },
                text("."),
            ]
        );
    }

    #[test]
    fn hyperlink_references() {
        let (spans, _) = parse("Visit `Zeek <https://zeek.org>`_, `the docs`_ or Spicy_.");
        assert_eq!(
            spans,
            vec![
                text("Visit "),
                Inline::Reference {
                    text: "Zeek".into(),
                    target: RefTarget::Url("https://zeek.org".into())
                },
                text(", "),
                Inline::Reference {
                    text: "the docs".into(),
                    target: RefTarget::Named("the docs".into())
                },
                text(" or "),
                Inline::Reference {
                    text: "Spicy".into(),
                    target: RefTarget::Named("spicy".into())
                },
                text("."),
            ]
        );
    }

    #[test]
    fn identifiers_with_inner_underscores_stay_text() {
        let (spans, _) = parse("the zeek_init event and a*b*c");
        assert_eq!(spans, vec![text("the zeek_init event and a*b*c")]);
    }

    #[test]
    fn substitutions_and_escapes() {
        let (spans, _) = parse(r"Zeek |version| costs \*nothing\* and |unknown|");
        assert_eq!(spans, vec![text("Zeek 8.1.0 costs *nothing* and |unknown|")]);
    }

    #[test]
    fn unterminated_markup_is_a_warning_and_plain_text() {
        let (spans, warnings) = parse("a ``broken literal");
        assert_eq!(spans, vec![text("a ``broken literal")]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("inline literal"));

        let (spans, warnings) = parse("an *open emphasis");
        assert_eq!(spans, vec![text("an *open emphasis")]);
        assert_eq!(warnings.len(), 1);
    }
}
