//! Minimal scanner for the root `<svg>` start tag.
//!
//! Engines emit well-formed documents, but the helpers in this crate
//! only ever need to look at (and splice into) the root start tag, so a
//! full XML parser is not required. Attribute values may be single- or
//! double-quoted; unquoted values are accepted up to the next whitespace.

use std::ops::Range;

/// Location of the root `<svg ...>` start tag inside a markup string.
#[derive(Debug)]
pub struct RootTag {
    /// Byte offset just past the `<svg` element name.
    pub name_end: usize,
    /// Byte offset of the `>` (or `/>`) that closes the start tag.
    pub close: usize,
    /// Attributes in source order.
    pub attributes: Vec<Attribute>,
}

/// One attribute of the root start tag.
#[derive(Debug)]
pub struct Attribute {
    /// Byte range of the attribute name.
    pub name: Range<usize>,
    /// Byte range of the whole attribute including its leading whitespace.
    pub span: Range<usize>,
}

impl RootTag {
    /// Whether the root tag carries an attribute named exactly `name`.
    pub fn has(&self, markup: &str, name: &str) -> bool {
        self.attributes
            .iter()
            .any(|attr| &markup[attr.name.clone()] == name)
    }
}

/// Locate the root `<svg>` start tag.
///
/// Comments and CDATA sections are skipped. Returns `None` when there
/// is no `<svg` element or its start tag is never closed.
pub fn find_root(markup: &str) -> Option<RootTag> {
    let bytes = markup.as_bytes();
    let mut search = 0;
    let name_end = loop {
        let found = search + markup[search..].find('<')?;
        let rest = &markup[found..];
        if let Some((open, close)) = [("<!--", "-->"), ("<![CDATA[", "]]>")]
            .into_iter()
            .find(|(open, _)| rest.starts_with(open))
        {
            search = found + open.len() + rest[open.len()..].find(close)? + close.len();
            continue;
        }
        let end = found + "<svg".len();
        match bytes.get(end) {
            Some(b)
                if rest.starts_with("<svg")
                    && (b.is_ascii_whitespace() || *b == b'>' || *b == b'/') =>
            {
                break end;
            }
            _ => search = found + 1,
        }
    };

    let is_space = |i: usize| bytes.get(i).is_some_and(u8::is_ascii_whitespace);
    let mut attributes = Vec::new();
    let mut i = name_end;
    loop {
        let span_start = i;
        while is_space(i) {
            i += 1;
        }
        match *bytes.get(i)? {
            b'>' => {
                return Some(RootTag {
                    name_end,
                    close: i,
                    attributes,
                });
            }
            b'/' => {
                if bytes.get(i + 1) == Some(&b'>') {
                    return Some(RootTag {
                        name_end,
                        close: i,
                        attributes,
                    });
                }
                i += 1;
                continue;
            }
            _ => {}
        }

        let name_start = i;
        while bytes
            .get(i)
            .is_some_and(|b| !b.is_ascii_whitespace() && !matches!(b, b'=' | b'>' | b'/'))
        {
            i += 1;
        }
        let name = name_start..i;

        let mut probe = i;
        while is_space(probe) {
            probe += 1;
        }
        if bytes.get(probe) == Some(&b'=') {
            i = probe + 1;
            while is_space(i) {
                i += 1;
            }
            match *bytes.get(i)? {
                quote @ (b'"' | b'\'') => {
                    i += 1;
                    while *bytes.get(i)? != quote {
                        i += 1;
                    }
                    i += 1;
                }
                _ => {
                    while bytes
                        .get(i)
                        .is_some_and(|b| !b.is_ascii_whitespace() && *b != b'>')
                    {
                        i += 1;
                    }
                }
            }
        }

        attributes.push(Attribute {
            name,
            span: span_start..i,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn names(markup: &str) -> Vec<&str> {
        let root = find_root(markup).unwrap();
        root.attributes
            .iter()
            .map(|a| &markup[a.name.clone()])
            .collect()
    }

    #[test]
    fn finds_attributes_in_order() {
        let markup = r#"<svg xmlns="http://www.w3.org/2000/svg" width='10' viewBox="0 0 10 10"><path/></svg>"#;
        assert_eq!(names(markup), vec!["xmlns", "width", "viewBox"]);
    }

    #[test]
    fn skips_xml_declaration_and_lookalike_elements() {
        let markup = r#"<?xml version="1.0"?><svgx a="1"/><svg height="4"></svg>"#;
        assert_eq!(names(markup), vec!["height"]);
    }

    #[test]
    fn commented_out_roots_are_skipped() {
        let markup = r#"<!-- <svg width="1"> --><![CDATA[<svg height="2">]]><svg viewBox="0 0 3 3"></svg>"#;
        let root = find_root(markup).unwrap();
        assert_eq!(names(markup), vec!["viewBox"]);
        assert_eq!(&markup[root.name_end - 4..root.name_end], "<svg");
        assert!(find_root("<!-- <svg></svg> -->").is_none());
        assert!(find_root("<!-- <svg></svg>").is_none());
    }

    #[test]
    fn bare_tag_has_no_attributes() {
        let root = find_root("<svg></svg>").unwrap();
        assert!(root.attributes.is_empty());
        assert_eq!(root.name_end, 4);
        assert_eq!(root.close, 4);
    }

    #[test]
    fn quoted_gt_does_not_close_tag() {
        let markup = r#"<svg data-x="a>b" width="3"></svg>"#;
        assert_eq!(names(markup), vec!["data-x", "width"]);
    }

    #[test]
    fn unclosed_tag_is_rejected() {
        assert!(find_root(r#"<svg width="3""#).is_none());
        assert!(find_root("no markup here").is_none());
    }

    #[test]
    fn stroke_width_is_not_width() {
        let markup = r#"<svg stroke-width="2"></svg>"#;
        let root = find_root(markup).unwrap();
        assert!(!root.has(markup, "width"));
        assert!(root.has(markup, "stroke-width"));
    }
}
