//! Sizing repair for engine-produced markup.
//!
//! Downstream placement scales the created shape by comparing the
//! document size against the original node, so every committed or
//! previewed document must carry explicit `width`, `height`, and
//! `viewBox` attributes on its root element. Engines are not
//! consistent about emitting them.

use std::fmt::Write;

use crate::tag;

/// Shortest markup accepted as a plausible engine result.
///
/// Anything shorter cannot hold a root `<svg>` element with content.
pub const MIN_MARKUP_LEN: usize = 20;

/// Inject missing `width`, `height`, and `viewBox` attributes into the
/// root `<svg>` element.
///
/// Missing attributes are derived from the traced pixel dimensions
/// (`viewBox="0 0 width height"`). Attributes that are already present
/// are left untouched, which makes the function idempotent. Markup
/// without a root `<svg>` element is returned unchanged.
///
/// # Examples
///
/// ```
/// use pixtrace_export::normalize_markup;
///
/// let fixed = normalize_markup("<svg><path d=\"M0 0\"/></svg>", 40, 30);
/// assert_eq!(
///     fixed,
///     "<svg width=\"40\" height=\"30\" viewBox=\"0 0 40 30\"><path d=\"M0 0\"/></svg>",
/// );
/// ```
#[must_use = "returns the normalized markup"]
pub fn normalize_markup(markup: &str, width: u32, height: u32) -> String {
    let Some(root) = tag::find_root(markup) else {
        return markup.to_owned();
    };

    let mut injected = String::new();
    if !root.has(markup, "width") {
        let _ = write!(injected, r#" width="{width}""#);
    }
    if !root.has(markup, "height") {
        let _ = write!(injected, r#" height="{height}""#);
    }
    if !root.has(markup, "viewBox") {
        let _ = write!(injected, r#" viewBox="0 0 {width} {height}""#);
    }
    if injected.is_empty() {
        return markup.to_owned();
    }

    let mut out = String::with_capacity(markup.len() + injected.len());
    out.push_str(&markup[..root.name_end]);
    out.push_str(&injected);
    out.push_str(&markup[root.name_end..]);
    out
}

/// Whether `markup` looks like a usable engine result: at least
/// [`MIN_MARKUP_LEN`] bytes with a closed root `<svg>` start tag.
#[must_use]
pub fn is_plausible_markup(markup: &str) -> bool {
    markup.len() >= MIN_MARKUP_LEN && tag::find_root(markup).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg"><path d="M0 0 L1 1"/></svg>"#;

    #[test]
    fn injects_all_missing_attributes() {
        let fixed = normalize_markup(BARE, 64, 32);
        assert!(fixed.starts_with(
            r#"<svg width="64" height="32" viewBox="0 0 64 32" xmlns="http://www.w3.org/2000/svg">"#
        ));
        assert!(fixed.ends_with(r#"<path d="M0 0 L1 1"/></svg>"#));
    }

    #[test]
    fn keeps_existing_attributes() {
        let markup = r#"<svg width="10" viewBox="0 0 5 5"><path/></svg>"#;
        let fixed = normalize_markup(markup, 64, 32);
        assert_eq!(
            fixed,
            r#"<svg height="32" width="10" viewBox="0 0 5 5"><path/></svg>"#
        );
    }

    #[test]
    fn fully_sized_markup_is_unchanged() {
        let markup = r#"<svg width="1" height="2" viewBox="0 0 1 2"></svg>"#;
        assert_eq!(normalize_markup(markup, 9, 9), markup);
    }

    #[test]
    fn normalization_is_idempotent() {
        for markup in [
            BARE,
            "<svg></svg>",
            r#"<?xml version="1.0"?><svg height="3"><g stroke-width="2"/></svg>"#,
            "not markup at all",
        ] {
            let once = normalize_markup(markup, 12, 7);
            let twice = normalize_markup(&once, 12, 7);
            assert_eq!(once, twice, "not idempotent for {markup:?}");
        }
    }

    #[test]
    fn nested_width_attributes_do_not_count() {
        let markup = r#"<svg><rect width="5" height="5"/></svg>"#;
        let fixed = normalize_markup(markup, 8, 9);
        assert!(fixed.starts_with(r#"<svg width="8" height="9" viewBox="0 0 8 9">"#));
    }

    #[test]
    fn comments_before_the_root_are_left_alone() {
        let markup = r#"<!-- exported <svg> --><svg><path/></svg>"#;
        assert_eq!(
            normalize_markup(markup, 6, 4),
            r#"<!-- exported <svg> --><svg width="6" height="4" viewBox="0 0 6 4"><path/></svg>"#
        );
    }

    #[test]
    fn markup_without_root_is_returned_unchanged() {
        assert_eq!(normalize_markup("<g></g>", 1, 1), "<g></g>");
    }

    #[test]
    fn plausibility_requires_length_and_root() {
        assert!(!is_plausible_markup(""));
        assert!(!is_plausible_markup("<svg></svg>"));
        assert!(!is_plausible_markup("<g><path d=\"M0 0\"/></g><g></g>"));
        assert!(is_plausible_markup(BARE));
    }
}
