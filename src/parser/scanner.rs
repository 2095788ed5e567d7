//! Tag scanner for the loosely XML-shaped AI output.
//!
//! This is not an XML parser: bodies are taken verbatim, entities are not
//! decoded and tags of the same name do not nest. The scanner walks the
//! input once, looking for `<name ...>` openings and the matching `</name>`.

/// How a tag without a closing counterpart is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Only properly closed tags are yielded; scanning stops at the first
    /// unclosed one.
    Closed,
    /// An unclosed tag is yielded with `closed == false`. Its body runs up to
    /// the next opening of the same tag, or to end of input.
    AllowUnterminated,
}

/// One tag occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag<'a> {
    pub attrs: Vec<(&'a str, &'a str)>,
    pub body: &'a str,
    pub closed: bool,
}

impl<'a> Tag<'a> {
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.attrs
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
    }
}

pub struct TagScanner<'a> {
    text: &'a str,
    open: String,
    close: String,
    termination: Termination,
    pos: usize,
}

impl<'a> TagScanner<'a> {
    pub fn new(text: &'a str, name: &str, termination: Termination) -> Self {
        Self {
            text,
            open: format!("<{name}"),
            close: format!("</{name}>"),
            termination,
            pos: 0,
        }
    }

    /// Byte offset of the next `<name` that is followed by whitespace, `>`
    /// or `/`, so `<package` never matches `<packages>`.
    fn find_open(&self, from: usize) -> Option<usize> {
        let mut search = from;
        while let Some(rel) = self.text[search..].find(&self.open) {
            let at = search + rel;
            let after = at + self.open.len();
            match self.text[after..].chars().next() {
                Some(c) if c == '>' || c == '/' || c.is_whitespace() => return Some(at),
                Some(_) => search = after,
                None => return None,
            }
        }
        None
    }

    fn finish(&mut self) -> Option<Tag<'a>> {
        self.pos = self.text.len();
        None
    }
}

impl<'a> Iterator for TagScanner<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Tag<'a>> {
        if self.pos >= self.text.len() {
            return None;
        }

        let Some(start) = self.find_open(self.pos) else {
            return self.finish();
        };
        let head_start = start + self.open.len();

        // An opening tag cut off before its `>` carries no body.
        let Some(gt) = find_tag_end(self.text, head_start) else {
            return self.finish();
        };

        let head = self.text[head_start..gt].trim_end();
        let body_start = gt + 1;

        if let Some(head) = head.strip_suffix('/') {
            self.pos = body_start;
            return Some(Tag {
                attrs: parse_attrs(head),
                body: "",
                closed: true,
            });
        }
        let attrs = parse_attrs(head);

        let close_at = self.text[body_start..]
            .find(&self.close)
            .map(|i| body_start + i);

        match self.termination {
            Termination::Closed => {
                let end = match close_at {
                    Some(end) => end,
                    None => return self.finish(),
                };
                self.pos = end + self.close.len();
                Some(Tag {
                    attrs,
                    body: &self.text[body_start..end],
                    closed: true,
                })
            }
            Termination::AllowUnterminated => {
                let next_open = self.find_open(body_start);
                match (close_at, next_open) {
                    (Some(end), Some(next)) if next < end => {
                        self.pos = next;
                        Some(Tag {
                            attrs,
                            body: &self.text[body_start..next],
                            closed: false,
                        })
                    }
                    (Some(end), _) => {
                        self.pos = end + self.close.len();
                        Some(Tag {
                            attrs,
                            body: &self.text[body_start..end],
                            closed: true,
                        })
                    }
                    (None, next) => {
                        let end = next.unwrap_or(self.text.len());
                        self.pos = end;
                        Some(Tag {
                            attrs,
                            body: &self.text[body_start..end],
                            closed: false,
                        })
                    }
                }
            }
        }
    }
}

/// Offset of the `>` ending an opening tag, ignoring `>` inside quotes.
fn find_tag_end(text: &str, from: usize) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in text[from..].char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => return Some(from + i),
            None => {}
        }
    }
    None
}

/// `key="value"` pairs; single quotes and bare values are accepted too.
fn parse_attrs(head: &str) -> Vec<(&str, &str)> {
    let mut attrs = Vec::new();
    let mut rest = head.trim_start();

    while let Some(eq) = rest.find('=') {
        let key = rest[..eq].split_whitespace().last().unwrap_or_default();
        let after = rest[eq + 1..].trim_start();

        let Some(q) = after.chars().next() else {
            break;
        };
        if q == '"' || q == '\'' {
            let Some(end) = after[1..].find(q) else {
                break;
            };
            attrs.push((key, &after[1..1 + end]));
            rest = after[end + 2..].trim_start();
        } else {
            let end = after.find(char::is_whitespace).unwrap_or(after.len());
            attrs.push((key, &after[..end]));
            rest = after[end..].trim_start();
        }
    }

    attrs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bodies(text: &str, name: &str, termination: Termination) -> Vec<(String, bool)> {
        TagScanner::new(text, name, termination)
            .map(|t| (t.body.to_string(), t.closed))
            .collect()
    }

    #[test]
    fn closed_tags_in_order() {
        let text = "<command>npm run build</command> text <command>ls</command>";
        assert_eq!(
            bodies(text, "command", Termination::Closed),
            vec![("npm run build".to_string(), true), ("ls".to_string(), true)]
        );
    }

    #[test]
    fn prefix_names_do_not_match() {
        let text = "<packages>a, b</packages><package>c</package>";
        assert_eq!(
            bodies(text, "package", Termination::Closed),
            vec![("c".to_string(), true)]
        );
    }

    #[test]
    fn closed_mode_drops_unterminated_tail() {
        let text = "<command>ok</command><command>npm i";
        assert_eq!(bodies(text, "command", Termination::Closed).len(), 1);
    }

    #[test]
    fn unterminated_runs_to_end_of_input() {
        let text = r#"<file path="src/App.jsx">export default 1"#;
        let tags: Vec<_> = TagScanner::new(text, "file", Termination::AllowUnterminated).collect();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].attr("path"), Some("src/App.jsx"));
        assert_eq!(tags[0].body, "export default 1");
        assert!(!tags[0].closed);
    }

    #[test]
    fn unterminated_stops_at_next_opening() {
        let text = r#"<file path="a.js">part<file path="a.js">full</file>"#;
        assert_eq!(
            bodies(text, "file", Termination::AllowUnterminated),
            vec![("part".to_string(), false), ("full".to_string(), true)]
        );
    }

    #[test]
    fn truncated_opening_tag_yields_nothing() {
        let text = r#"<file path="a.js">x</file><file path="b"#;
        assert_eq!(bodies(text, "file", Termination::AllowUnterminated).len(), 1);
    }

    #[test]
    fn attributes_accept_quotes_and_gt_inside_values() {
        let tags: Vec<_> = TagScanner::new(
            r#"<file path='src/a>b.js' lang=js>x</file>"#,
            "file",
            Termination::Closed,
        )
        .collect();
        assert_eq!(tags[0].attr("path"), Some("src/a>b.js"));
        assert_eq!(tags[0].attr("lang"), Some("js"));
        assert_eq!(tags[0].body, "x");
    }

    #[test]
    fn self_closing_tag_has_empty_body() {
        let tags: Vec<_> =
            TagScanner::new(r#"<file path="empty.txt"/>"#, "file", Termination::AllowUnterminated)
                .collect();
        assert_eq!(tags[0].attr("path"), Some("empty.txt"));
        assert_eq!(tags[0].body, "");
        assert!(tags[0].closed);
    }
}
