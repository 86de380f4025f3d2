//! A small, forgiving, streaming HTML tokenizer and the three-rule
//! rewriter built on top of it (spec §4.4).
//!
//! This is a from-scratch module, not a port: no crate in the retrieved
//! corpus offers a streaming (non-DOM) HTML tokenizer the way the
//! reference implementation's `golang.org/x/net/html` does. It is
//! intentionally narrow — it only needs to recognize `<a>` start tags
//! (to rewrite `href`) and `<body>` start/end tags (to place pixels);
//! everything else is passed through as an opaque span of raw bytes,
//! exactly as encountered, including malformed markup.
//!
//! EOF in the middle of a tag is not an error: whatever was consumed up
//! to EOF is emitted as a trailing raw span, matching the reference
//! tokenizer's behavior (spec §9).

use std::io::{self, Write};

/// One recognized chunk of the input stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token<'a> {
    /// A `<a ...>` start tag, broken out so the caller can rewrite its
    /// `href` attribute. `attrs` preserves source order.
    Anchor { attrs: Vec<(String, String)> },
    /// A `<body ...>` start tag. Its raw bytes are passed straight
    /// through; the pixel is appended after it.
    BodyStart { raw: &'a str },
    /// A `</body>` end tag. Its raw bytes are passed straight through;
    /// the pixel is emitted before it.
    BodyEnd { raw: &'a str },
    /// Anything else — text, other tags, comments, doctypes, malformed
    /// fragments — carried verbatim.
    Raw(&'a str),
}

/// Scans `input` into a sequence of [`Token`]s. Call `next()` until it
/// returns `None` (EOF).
pub struct Tokenizer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Returns the next token, or `None` at end of input.
    pub fn next(&mut self) -> Option<Token<'a>> {
        if self.pos >= self.input.len() {
            return None;
        }
        let rest = &self.input[self.pos..];
        if !rest.starts_with('<') {
            let text_len = rest.find('<').unwrap_or(rest.len());
            let text = &rest[..text_len];
            self.pos += text_len;
            return Some(Token::Raw(text));
        }

        // Try to find the end of this tag-like construct. If we can't
        // (truncated input), the forgiving behavior is to hand back the
        // remainder as raw text and stop.
        match classify_tag(rest) {
            Some(TagShape::End) => {
                let Some(end) = rest.find('>') else {
                    self.pos = self.input.len();
                    return Some(Token::Raw(rest));
                };
                let raw = &rest[..=end];
                let name = tag_name(&raw[2..raw.len() - 1]);
                self.pos += raw.len();
                if name.eq_ignore_ascii_case("body") {
                    Some(Token::BodyEnd { raw })
                } else {
                    Some(Token::Raw(raw))
                }
            }
            Some(TagShape::Start) => {
                let Some(end) = find_tag_end(rest) else {
                    self.pos = self.input.len();
                    return Some(Token::Raw(rest));
                };
                let raw = &rest[..end];
                self.pos += raw.len();
                let name = tag_name(&raw[1..]);
                if name.eq_ignore_ascii_case("a") {
                    Some(Token::Anchor {
                        attrs: parse_attrs(raw),
                    })
                } else if name.eq_ignore_ascii_case("body") {
                    Some(Token::BodyStart { raw })
                } else {
                    Some(Token::Raw(raw))
                }
            }
            Some(TagShape::CommentOrDoctype) => {
                let raw = if let Some(rel) = rest.find("-->") {
                    &rest[..rel + 3]
                } else if let Some(rel) = rest.find('>') {
                    &rest[..=rel]
                } else {
                    self.pos = self.input.len();
                    return Some(Token::Raw(rest));
                };
                self.pos += raw.len();
                Some(Token::Raw(raw))
            }
            None => {
                // A lone '<' not followed by anything tag-shaped; treat
                // as one character of text and keep scanning.
                self.pos += 1;
                Some(Token::Raw(&rest[..1]))
            }
        }
    }
}

enum TagShape {
    Start,
    End,
    CommentOrDoctype,
}

fn classify_tag(rest: &str) -> Option<TagShape> {
    let bytes = rest.as_bytes();
    if rest.starts_with("<!") {
        Some(TagShape::CommentOrDoctype)
    } else if rest.starts_with("</") {
        Some(TagShape::End)
    } else if bytes.len() >= 2 && (bytes[1] as char).is_ascii_alphabetic() {
        Some(TagShape::Start)
    } else {
        None
    }
}

/// Finds the end (exclusive) of a start tag, respecting quoted
/// attribute values so a `>` inside `href="a>b"` doesn't terminate the
/// tag early.
fn find_tag_end(rest: &str) -> Option<usize> {
    let bytes = rest.as_bytes();
    let mut i = 1;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
            }
            None => match b {
                b'"' | b'\'' => quote = Some(b),
                b'>' => return Some(i + 1),
                _ => {}
            },
        }
        i += 1;
    }
    None
}

fn tag_name(after_bracket: &str) -> &str {
    let end = after_bracket
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(after_bracket.len());
    &after_bracket[..end]
}

/// Parses `name="value"` / `name='value'` / `name=value` / bare `name`
/// attribute pairs out of a raw start-tag span (including its `<tag`
/// prefix and trailing `>`/`/>`).
fn parse_attrs(raw: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    let bytes = raw.as_bytes();
    let mut i = 1; // skip '<'
    // skip tag name
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/' {
        i += 1;
    }
    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() || bytes[i] == b'>' || (bytes[i] == b'/' && raw[i..].starts_with("/>")) {
            break;
        }
        let name_start = i;
        while i < bytes.len()
            && bytes[i] != b'='
            && !bytes[i].is_ascii_whitespace()
            && bytes[i] != b'>'
            && bytes[i] != b'/'
        {
            i += 1;
        }
        let name = raw[name_start..i].to_string();
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                i += 1;
                let val_start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                let value = raw[val_start..i].to_string();
                if i < bytes.len() {
                    i += 1; // closing quote
                }
                attrs.push((name, value));
            } else {
                let val_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                attrs.push((name, raw[val_start..i].to_string()));
            }
        } else if !name.is_empty() {
            attrs.push((name, String::new()));
        }
    }
    attrs
}

/// Re-serializes a start tag with one attribute's value replaced,
/// preserving every other attribute and the original attribute order.
fn render_anchor(attrs: &[(String, String)], href_replacement: &str) -> String {
    let mut out = String::from("<a");
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        if name.eq_ignore_ascii_case("href") {
            out.push_str("=\"");
            out.push_str(href_replacement);
            out.push('"');
        } else if !value.is_empty() || name.eq_ignore_ascii_case("href") {
            out.push_str("=\"");
            out.push_str(value);
            out.push('"');
        }
    }
    out.push('>');
    out
}

/// Which of the three independent pixel/link behaviors are active
/// (spec §4.4); each defaults on.
#[derive(Debug, Clone, Copy)]
pub struct RewriteConfig {
    pub wrap_click: bool,
    pub initial_open_pixel: bool,
    pub open_pixel: bool,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            wrap_click: true,
            initial_open_pixel: true,
            open_pixel: true,
        }
    }
}

const INITIAL_OPEN_PREFIX: &str = "<div style=\"color:transparent;visibility:hidden;opacity:0;font-size:0px;border:0;max-height:1px;width:1px;margin:0px;padding:0px;border-width:0px!important;display:none!important;line-height:0px!important;\"><img border=\"0\" width=\"1\" height=\"1\" src=\"";
const INITIAL_OPEN_SUFFIX: &str = "\"/></div>\n";
const OPEN_PREFIX: &str = "<img border=\"0\" width=\"1\" height=\"1\" alt=\"\" src=\"";
const OPEN_SUFFIX: &str = "\">\n";

/// Streams `input` through the tokenizer to `out`, rewriting `<a href>`
/// values through `wrap_click_url`, and inserting the initial-open pixel
/// right after `<body>` and the open pixel right before `</body>` when
/// those behaviors are enabled. Tokens other than these three pass
/// through untouched, including malformed input.
pub fn rewrite_html<W: Write>(
    input: &str,
    out: &mut W,
    config: &RewriteConfig,
    mut wrap_click_url: impl FnMut(&str) -> String,
    mut initial_open_pixel_url: impl FnMut() -> String,
    mut open_pixel_url: impl FnMut() -> String,
) -> io::Result<()> {
    let mut tok = Tokenizer::new(input);
    while let Some(token) = tok.next() {
        match token {
            Token::Anchor { attrs } => {
                let has_href = attrs.iter().any(|(n, _)| n.eq_ignore_ascii_case("href"));
                if config.wrap_click && has_href {
                    let href = attrs
                        .iter()
                        .find(|(n, _)| n.eq_ignore_ascii_case("href"))
                        .map(|(_, v)| v.as_str())
                        .unwrap_or("");
                    let wrapped = wrap_click_url(href);
                    out.write_all(render_anchor(&attrs, &wrapped).as_bytes())?;
                } else {
                    out.write_all(render_anchor_passthrough(&attrs).as_bytes())?;
                }
            }
            Token::BodyStart { raw } => {
                out.write_all(raw.as_bytes())?;
                if config.initial_open_pixel {
                    let url = initial_open_pixel_url();
                    out.write_all(INITIAL_OPEN_PREFIX.as_bytes())?;
                    out.write_all(url.as_bytes())?;
                    out.write_all(INITIAL_OPEN_SUFFIX.as_bytes())?;
                }
            }
            Token::BodyEnd { raw } => {
                if config.open_pixel {
                    let url = open_pixel_url();
                    out.write_all(OPEN_PREFIX.as_bytes())?;
                    out.write_all(url.as_bytes())?;
                    out.write_all(OPEN_SUFFIX.as_bytes())?;
                }
                out.write_all(raw.as_bytes())?;
            }
            Token::Raw(raw) => {
                out.write_all(raw.as_bytes())?;
            }
        }
    }
    Ok(())
}

fn render_anchor_passthrough(attrs: &[(String, String)]) -> String {
    let mut out = String::from("<a");
    for (name, value) in attrs {
        out.push(' ');
        out.push_str(name);
        if !value.is_empty() {
            out.push_str("=\"");
            out.push_str(value);
            out.push('"');
        }
    }
    out.push('>');
    out
}
