//! Escaping for the HTML fragments the admin handlers render.

use std::borrow::Cow;

fn escape(input: &str) -> Cow<'_, str> {
    if !input.contains(['&', '<', '>', '"', '\'']) {
        return Cow::Borrowed(input);
    }
    let mut out = String::with_capacity(input.len() + 16);
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(ch),
        }
    }
    Cow::Owned(out)
}

/// Escapes text placed between tags.
pub fn esc_html(input: &str) -> Cow<'_, str> {
    escape(input)
}

/// Escapes text placed inside a double-quoted attribute value.
pub fn esc_attr(input: &str) -> Cow<'_, str> {
    escape(input)
}
