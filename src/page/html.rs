use super::dom::{DomError, DomResult, Element, NodeKind};
use super::{Document, NodeId};

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style", "textarea", "title"];

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn is_raw_text(tag: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&tag)
}

/// Lenient HTML parse into a fresh document. Scripts that arrive with the
/// markup count as already run.
pub(crate) fn parse_html(html: &str) -> DomResult<Document> {
    let mut doc = Document::new();
    let mut stack: Vec<NodeId> = vec![doc.root()];
    let mut i = 0usize;

    while i < html.len() {
        let rest = &html[i..];

        if rest.starts_with("<!--") {
            let end = rest[4..]
                .find("-->")
                .ok_or_else(|| DomError::Parse("unclosed HTML comment".into()))?;
            i += 4 + end + 3;
            continue;
        }

        if rest.starts_with("</") {
            let end = rest
                .find('>')
                .ok_or_else(|| DomError::Parse("unclosed end tag".into()))?;
            let tag = rest[2..end].trim().to_ascii_lowercase();
            i += end + 1;

            if let Some(pos) = stack
                .iter()
                .rposition(|node| doc.tag_name(*node) == Some(tag.as_str()))
            {
                stack.truncate(pos.max(1));
            }
            continue;
        }

        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest
                .find('>')
                .ok_or_else(|| DomError::Parse("unclosed declaration".into()))?;
            i += end + 1;
            continue;
        }

        if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
            let (tag, attrs, self_closing, consumed) = parse_start_tag(rest)?;
            i += consumed;

            let parent = *stack
                .last()
                .ok_or_else(|| DomError::Parse("missing parent element".into()))?;
            let node = doc.create_node(
                Some(parent),
                NodeKind::Element(Element {
                    tag_name: tag.clone(),
                    attrs,
                }),
            );

            if is_raw_text(&tag) {
                let body = &html[i..];
                let close = find_end_tag(body, &tag)
                    .ok_or_else(|| DomError::Parse(format!("unclosed <{}>", tag)))?;
                if close > 0 {
                    let text = if tag == "script" || tag == "style" {
                        body[..close].to_string()
                    } else {
                        decode_entities(&body[..close])
                    };
                    doc.create_node(Some(node), NodeKind::Text(text));
                }
                if tag == "script" {
                    doc.mark_script_started(node);
                }
                // skip `</tag>`
                let after = &body[close..];
                let end = after.find('>').map(|p| p + 1).unwrap_or(after.len());
                i += close + end;
                continue;
            }

            if !self_closing && !is_void(&tag) {
                stack.push(node);
            }
            continue;
        }

        let next = rest
            .char_indices()
            .skip(1)
            .find(|(_, c)| *c == '<')
            .map(|(p, _)| p)
            .unwrap_or(rest.len());
        let text = &rest[..next];
        let parent = *stack
            .last()
            .ok_or_else(|| DomError::Parse("missing parent element".into()))?;
        doc.create_node(Some(parent), NodeKind::Text(decode_entities(text)));
        i += next;
    }

    Ok(doc)
}

type StartTag = (String, Vec<(String, String)>, bool, usize);

fn parse_start_tag(src: &str) -> DomResult<StartTag> {
    let bytes = src.as_bytes();
    let mut i = 1usize;

    let name_start = i;
    while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' && bytes[i] != b'/' {
        i += 1;
    }
    let tag = src[name_start..i].to_ascii_lowercase();
    let mut attrs: Vec<(String, String)> = Vec::new();
    let mut self_closing = false;

    loop {
        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(DomError::Parse(format!("unclosed <{}> tag", tag)));
        }
        match bytes[i] {
            b'>' => {
                i += 1;
                break;
            }
            b'/' => {
                self_closing = true;
                i += 1;
                continue;
            }
            _ => {}
        }

        let key_start = i;
        while i < bytes.len()
            && !bytes[i].is_ascii_whitespace()
            && !matches!(bytes[i], b'=' | b'>' | b'/')
        {
            i += 1;
        }
        let key = src[key_start..i].to_ascii_lowercase();

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }

        let mut value = String::new();
        if i < bytes.len() && bytes[i] == b'=' {
            i += 1;
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            if i < bytes.len() && (bytes[i] == b'"' || bytes[i] == b'\'') {
                let quote = bytes[i];
                i += 1;
                let value_start = i;
                while i < bytes.len() && bytes[i] != quote {
                    i += 1;
                }
                if i >= bytes.len() {
                    return Err(DomError::Parse(format!("unclosed attribute value in <{}>", tag)));
                }
                value = decode_entities(&src[value_start..i]);
                i += 1;
            } else {
                let value_start = i;
                while i < bytes.len() && !bytes[i].is_ascii_whitespace() && bytes[i] != b'>' {
                    i += 1;
                }
                value = decode_entities(&src[value_start..i]);
            }
        }

        // duplicate attributes: first one wins
        if !key.is_empty() && !attrs.iter().any(|(k, _)| *k == key) {
            attrs.push((key, value));
        }
    }

    Ok((tag, attrs, self_closing, i))
}

fn find_end_tag(body: &str, tag: &str) -> Option<usize> {
    let lower = body.to_ascii_lowercase();
    let needle = format!("</{}", tag);
    let mut from = 0;
    while let Some(pos) = lower[from..].find(&needle) {
        let at = from + pos;
        let after = lower.as_bytes().get(at + needle.len()).copied();
        if matches!(after, None | Some(b'>') | Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'/')) {
            return Some(at);
        }
        from = at + needle.len();
    }
    None
}

fn decode_entities(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }

    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|end| *end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            let ch = match entity {
                "amp" => Some('&'),
                "lt" => Some('<'),
                "gt" => Some('>'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                "nbsp" => Some('\u{00A0}'),
                _ => entity.strip_prefix('#').and_then(|num| {
                    let code = match num.strip_prefix(['x', 'X']) {
                        Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                        None => num.parse().ok()?,
                    };
                    char::from_u32(code)
                }),
            }?;
            Some((ch, end + 1))
        });
        match decoded {
            Some((ch, len)) => {
                out.push(ch);
                rest = &tail[len..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\u{00A0}', "&nbsp;")
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\u{00A0}', "&nbsp;")
}

enum Step {
    Open(NodeId),
    Close(NodeId),
}

pub(crate) fn serialize_children(doc: &Document, node: NodeId) -> String {
    let mut out = String::new();
    let mut stack: Vec<Step> = doc.children(node).iter().rev().map(|c| Step::Open(*c)).collect();

    while let Some(step) = stack.pop() {
        match step {
            Step::Open(node) => {
                if open_node(doc, node, &mut out) {
                    stack.push(Step::Close(node));
                    stack.extend(doc.children(node).iter().rev().map(|c| Step::Open(*c)));
                }
            }
            Step::Close(node) => {
                if let Some(tag) = doc.tag_name(node) {
                    out.push_str("</");
                    out.push_str(tag);
                    out.push('>');
                }
            }
        }
    }
    out
}

/// Write the node's text or start tag. Returns whether children and an end
/// tag follow.
fn open_node(doc: &Document, node: NodeId, out: &mut String) -> bool {
    match doc.kind(node) {
        Some(NodeKind::Text(text)) => {
            let raw_parent = doc
                .parent(node)
                .and_then(|p| doc.tag_name(p))
                .is_some_and(|tag| tag == "script" || tag == "style");
            if raw_parent {
                out.push_str(text);
            } else {
                out.push_str(&escape_text(text));
            }
            false
        }
        Some(NodeKind::Element(element)) => {
            out.push('<');
            out.push_str(&element.tag_name);
            for (key, value) in &element.attrs {
                out.push(' ');
                out.push_str(key);
                out.push_str("=\"");
                out.push_str(&escape_attr(value));
                out.push('"');
            }
            out.push('>');
            !is_void(&element.tag_name)
        }
        Some(NodeKind::Document) | None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_markup_and_serializes_it_back() {
        let html = r#"<div id="a" class="x y"><p>Hello <b>world</b></p><br><img src="a.png"></div>"#;
        let doc = parse_html(html).unwrap();
        assert_eq!(doc.to_html(), html);
    }

    #[test]
    fn unquoted_and_bare_attributes() {
        let doc = parse_html("<input type=checkbox checked><div data-x='1'></div>").unwrap();
        let input = doc.query_selector("input").unwrap().unwrap();
        assert_eq!(doc.attr(input, "type"), Some("checkbox"));
        assert_eq!(doc.attr(input, "checked"), Some(""));
        let div = doc.query_selector("div").unwrap().unwrap();
        assert_eq!(doc.attr(div, "data-x"), Some("1"));
    }

    #[test]
    fn script_bodies_are_raw_text() {
        let doc = parse_html("<head><script>if (a < b) { x = '</div>'; }</script></head>").unwrap();
        let script = doc.query_selector("script").unwrap().unwrap();
        assert_eq!(doc.text_content(script), "if (a < b) { x = '</div>'; }");
    }

    #[test]
    fn entities_are_decoded_and_re_escaped() {
        let doc = parse_html("<p title=\"a &quot;b&quot;\">1 &lt; 2 &amp; &#65;&#x42;</p>").unwrap();
        let p = doc.query_selector("p").unwrap().unwrap();
        assert_eq!(doc.text_content(p), "1 < 2 & AB");
        assert_eq!(doc.attr(p, "title"), Some("a \"b\""));
        assert_eq!(
            doc.to_html(),
            "<p title=\"a &quot;b&quot;\">1 &lt; 2 &amp; AB</p>"
        );
    }

    #[test]
    fn comments_and_doctype_are_dropped() {
        let doc = parse_html("<!DOCTYPE html><!-- note --><html><body></body></html>").unwrap();
        assert_eq!(doc.to_html(), "<html><body></body></html>");
    }

    #[test]
    fn stray_end_tags_are_ignored() {
        let doc = parse_html("<div></span>text</div></div>").unwrap();
        assert_eq!(doc.to_html(), "<div>text</div>");
    }

    #[test]
    fn unclosed_constructs_are_errors() {
        assert!(matches!(parse_html("<div"), Err(DomError::Parse(_))));
        assert!(matches!(parse_html("<!-- open"), Err(DomError::Parse(_))));
        assert!(matches!(parse_html("<script>x"), Err(DomError::Parse(_))));
    }

    #[test]
    fn lone_angle_bracket_is_text() {
        let doc = parse_html("<p>a < b</p>").unwrap();
        let p = doc.query_selector("p").unwrap().unwrap();
        assert_eq!(doc.text_content(p), "a < b");
    }

    #[test]
    fn deeply_nested_markup_round_trips() {
        let depth = 200_000;
        let html = format!("{}x{}", "<div>".repeat(depth), "</div>".repeat(depth));
        let doc = parse_html(&html).unwrap();
        assert_eq!(doc.elements().len(), depth);
        assert_eq!(doc.to_html(), html);
    }
}
