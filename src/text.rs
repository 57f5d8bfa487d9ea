//! String helpers that reproduce the host's sanitisation of operator input
//! and the encoding applied to migrated field values.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::{char::is_combining_mark, UnicodeNormalization};

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("tag regex"));
static OCTET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"%([a-fA-F0-9][a-fA-F0-9])").expect("octet regex"));
static MARKED_OCTET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"---([a-fA-F0-9][a-fA-F0-9])---").expect("marked octet regex"));
static ENTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"&.+?;").expect("entity regex"));
static DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^%a-z0-9 _-]").expect("disallowed regex"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static DASHES: Lazy<Regex> = Lazy::new(|| Regex::new(r"-+").expect("dashes regex"));

/// Folds accented Latin characters to ASCII, leaving other scripts alone.
pub fn remove_accents(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            'ß' => out.push_str("ss"),
            'Æ' => out.push_str("AE"),
            'æ' => out.push_str("ae"),
            'Œ' => out.push_str("OE"),
            'œ' => out.push_str("oe"),
            'Ø' => out.push('O'),
            'ø' => out.push('o'),
            'Đ' | 'Ð' => out.push('D'),
            'đ' | 'ð' => out.push('d'),
            'Ł' => out.push('L'),
            'ł' => out.push('l'),
            'Þ' => out.push_str("TH"),
            'þ' => out.push_str("th"),
            _ if c.is_ascii() => out.push(c),
            _ => out.extend(c.to_string().nfd().filter(|d| !is_combining_mark(*d))),
        }
    }
    out
}

/// The host's `sanitize_title` in "save" context: a lowercase slug of
/// `[a-z0-9_-]` plus percent-encoded octets for anything non-ASCII.
pub fn sanitize_title(input: &str) -> String {
    let title = remove_accents(input);
    let title = TAGS.replace_all(&title, "");
    let title = OCTET.replace_all(&title, "---$1---");
    let title = title.replace('%', "");
    let title = MARKED_OCTET.replace_all(&title, "%$1");

    let mut encoded = String::with_capacity(title.len());
    for c in title.chars() {
        if c.is_ascii() {
            encoded.push(c.to_ascii_lowercase());
        } else {
            for b in c.to_lowercase().collect::<String>().bytes() {
                encoded.push_str(&format!("%{b:02x}"));
            }
        }
    }

    let title = encoded
        .replace("%c2%a0", "-")
        .replace("%e2%80%93", "-")
        .replace("%e2%80%94", "-")
        .replace('/', "-");
    let title = ENTITY.replace_all(&title, "");
    let title = title.replace('.', "-");
    let title = DISALLOWED.replace_all(&title, "");
    let title = WHITESPACE.replace_all(&title, "-");
    let title = DASHES.replace_all(&title, "-");
    title.trim_matches('-').to_string()
}

/// Slug used for instance and field names: `sanitize_title` with `-` → `_`.
pub fn field_slug(input: &str) -> String {
    sanitize_title(input).replace('-', "_")
}

/// PHP `stripslashes`: drops one level of backslash escaping, `\0` becomes NUL.
pub fn stripslashes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('0') => out.push('\0'),
            Some(next) => out.push(next),
            None => {}
        }
    }
    out
}

/// `htmlentities($s, ENT_QUOTES, 'UTF-8')`.
pub fn htmlentities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => match named_entity(c) {
                Some(name) => {
                    out.push('&');
                    out.push_str(name);
                    out.push(';');
                }
                None => out.push(c),
            },
        }
    }
    out
}

const LATIN1: [&str; 96] = [
    "nbsp", "iexcl", "cent", "pound", "curren", "yen", "brvbar", "sect", "uml", "copy", "ordf",
    "laquo", "not", "shy", "reg", "macr", "deg", "plusmn", "sup2", "sup3", "acute", "micro",
    "para", "middot", "cedil", "sup1", "ordm", "raquo", "frac14", "frac12", "frac34", "iquest",
    "Agrave", "Aacute", "Acirc", "Atilde", "Auml", "Aring", "AElig", "Ccedil", "Egrave", "Eacute",
    "Ecirc", "Euml", "Igrave", "Iacute", "Icirc", "Iuml", "ETH", "Ntilde", "Ograve", "Oacute",
    "Ocirc", "Otilde", "Ouml", "times", "Oslash", "Ugrave", "Uacute", "Ucirc", "Uuml", "Yacute",
    "THORN", "szlig", "agrave", "aacute", "acirc", "atilde", "auml", "aring", "aelig", "ccedil",
    "egrave", "eacute", "ecirc", "euml", "igrave", "iacute", "icirc", "iuml", "eth", "ntilde",
    "ograve", "oacute", "ocirc", "otilde", "ouml", "divide", "oslash", "ugrave", "uacute", "ucirc",
    "uuml", "yacute", "thorn", "yuml",
];

fn named_entity(c: char) -> Option<&'static str> {
    let code = c as u32;
    if (160..=255).contains(&code) {
        return Some(LATIN1[(code - 160) as usize]);
    }
    let name = match code {
        338 => "OElig",
        339 => "oelig",
        352 => "Scaron",
        353 => "scaron",
        376 => "Yuml",
        402 => "fnof",
        710 => "circ",
        732 => "tilde",
        8211 => "ndash",
        8212 => "mdash",
        8216 => "lsquo",
        8217 => "rsquo",
        8218 => "sbquo",
        8220 => "ldquo",
        8221 => "rdquo",
        8222 => "bdquo",
        8224 => "dagger",
        8225 => "Dagger",
        8226 => "bull",
        8230 => "hellip",
        8240 => "permil",
        8249 => "lsaquo",
        8250 => "rsaquo",
        8364 => "euro",
        8482 => "trade",
        _ => return None,
    };
    Some(name)
}
