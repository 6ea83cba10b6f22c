//! Preview display transform.
//!
//! A preview container scales its content to whatever space the panel
//! offers, so fixed `width`/`height` on the root element must go, the
//! `viewBox` must be present, and the aspect ratio must be preserved.

use std::fmt::Write;

use crate::tag;

/// Rewrite the root `<svg>` element for responsive display.
///
/// - Removes `width` and `height` from the root element only (nested
///   elements keep theirs).
/// - Injects `viewBox="0 0 width height"` if absent.
/// - Injects `preserveAspectRatio="xMidYMid meet"` if absent.
///
/// Markup without a root `<svg>` element is returned unchanged.
#[must_use = "returns the display-ready markup"]
pub fn preview_markup(markup: &str, width: u32, height: u32) -> String {
    let Some(root) = tag::find_root(markup) else {
        return markup.to_owned();
    };

    let mut out = String::with_capacity(markup.len() + 64);
    out.push_str(&markup[..root.name_end]);
    if !root.has(markup, "viewBox") {
        let _ = write!(out, r#" viewBox="0 0 {width} {height}""#);
    }
    if !root.has(markup, "preserveAspectRatio") {
        out.push_str(r#" preserveAspectRatio="xMidYMid meet""#);
    }

    let mut cursor = root.name_end;
    for attr in &root.attributes {
        let name = &markup[attr.name.clone()];
        if name == "width" || name == "height" {
            out.push_str(&markup[cursor..attr.span.start]);
            cursor = attr.span.end;
        }
    }
    out.push_str(&markup[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_root_size_and_adds_scaling_attributes() {
        let markup = r#"<svg width="40" height="20" xmlns="http://www.w3.org/2000/svg"><rect width="4" height="4"/></svg>"#;
        let shown = preview_markup(markup, 40, 20);
        assert_eq!(
            shown,
            r#"<svg viewBox="0 0 40 20" preserveAspectRatio="xMidYMid meet" xmlns="http://www.w3.org/2000/svg"><rect width="4" height="4"/></svg>"#
        );
    }

    #[test]
    fn keeps_existing_view_box() {
        let markup = r#"<svg viewBox="0 0 8 8" width="8"></svg>"#;
        let shown = preview_markup(markup, 100, 100);
        assert_eq!(
            shown,
            r#"<svg preserveAspectRatio="xMidYMid meet" viewBox="0 0 8 8"></svg>"#
        );
    }

    #[test]
    fn display_transform_is_stable() {
        let markup = r#"<svg width="5" height="6"><path d="M0 0"/></svg>"#;
        let once = preview_markup(markup, 5, 6);
        assert_eq!(preview_markup(&once, 5, 6), once);
    }
}
