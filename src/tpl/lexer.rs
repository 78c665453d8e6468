use crate::error::TplError;

/// Name of the block whose body is captured verbatim.
pub const RAW_BLOCK: &str = "raw";
const RAW_OPEN: &str = "{{#raw}}";
const RAW_CLOSE: &str = "{{/raw}}";

/// Tag head split into name, positional argument texts and `key=value` texts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub name: String,
    pub args: Vec<String>,
    pub hash: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    Text(String),
    Comment(String),
    Variable { tag: Tag, escaped: bool },
    Open(Tag),
    Close(String),
    Partial(Tag),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, TplError> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    let mut line = 1;

    while pos < source.len() {
        let remaining = &source[pos..];
        let Some(start) = remaining.find("{{") else {
            tokens.push(Token {
                kind: TokenKind::Text(remaining.to_string()),
                line,
            });
            break;
        };

        if start > 0 {
            let text = &remaining[..start];
            tokens.push(Token {
                kind: TokenKind::Text(text.to_string()),
                line,
            });
            line += count_lines(text);
        }

        let tag_line = line;
        let after_open = &remaining[start + 2..];
        let (kind, consumed) = scan_tag(after_open, tag_line)?;
        line += count_lines(&after_open[..consumed]);
        pos += start + 2 + consumed;

        if matches!(&kind, TokenKind::Open(tag) if tag.name == RAW_BLOCK) {
            let rest = &source[pos..];
            let (body, consumed) = capture_raw(rest)
                .ok_or_else(|| TplError::parse(tag_line, "unclosed {{#raw}} block"))?;
            line += count_lines(&rest[..consumed]);
            pos += consumed;
            tokens.push(Token {
                kind: TokenKind::Raw(body.to_string()),
                line: tag_line,
            });
            continue;
        }

        tokens.push(Token {
            kind,
            line: tag_line,
        });
    }

    Ok(tokens)
}

/// Scans one tag starting right after `{{`. Returns the token and the number
/// of bytes consumed, closing delimiter included.
fn scan_tag(after_open: &str, line: usize) -> Result<(TokenKind, usize), TplError> {
    let unterminated = || TplError::parse(line, "unterminated tag: missing closing '}}'");

    if let Some(rest) = after_open.strip_prefix('{') {
        let end = find_close(rest, "}}}").ok_or_else(unterminated)?;
        let tag = split_tag(rest[..end].trim(), line)?;
        return Ok((TokenKind::Variable { tag, escaped: false }, 1 + end + 3));
    }
    if let Some(rest) = after_open.strip_prefix("!--") {
        let end = rest.find("--}}").ok_or_else(unterminated)?;
        return Ok((TokenKind::Comment(rest[..end].trim().to_string()), 3 + end + 4));
    }
    if let Some(rest) = after_open.strip_prefix('!') {
        let end = rest.find("}}").ok_or_else(unterminated)?;
        return Ok((TokenKind::Comment(rest[..end].trim().to_string()), 1 + end + 2));
    }

    let end = find_close(after_open, "}}").ok_or_else(unterminated)?;
    let content = after_open[..end].trim();
    let consumed = end + 2;

    let kind = if let Some(rest) = content.strip_prefix('#') {
        TokenKind::Open(split_tag(rest.trim(), line)?)
    } else if let Some(rest) = content.strip_prefix('/') {
        let name = rest.trim();
        if name.is_empty() {
            return Err(TplError::parse(line, "close tag without a name"));
        }
        TokenKind::Close(name.to_string())
    } else if let Some(rest) = content.strip_prefix('>') {
        TokenKind::Partial(split_tag(rest.trim(), line)?)
    } else if let Some(rest) = content.strip_prefix('&') {
        TokenKind::Variable {
            tag: split_tag(rest.trim(), line)?,
            escaped: false,
        }
    } else {
        TokenKind::Variable {
            tag: split_tag(content, line)?,
            escaped: true,
        }
    };
    Ok((kind, consumed))
}

/// Finds `delim` outside of `'…'`, `"…"` and backtick spans.
fn find_close(s: &str, delim: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if matches!(c, '\'' | '"' | '`') => quote = Some(c),
            None if s[i..].starts_with(delim) => return Some(i),
            None => {}
        }
    }
    None
}

/// Body of a raw block up to its matching close, and the bytes consumed
/// including that close tag.
fn capture_raw(src: &str) -> Option<(&str, usize)> {
    let mut depth = 0usize;
    let mut i = 0;
    loop {
        let rest = &src[i..];
        let close = rest.find(RAW_CLOSE)?;
        match rest.find(RAW_OPEN) {
            Some(open) if open < close => {
                depth += 1;
                i += open + RAW_OPEN.len();
            }
            _ if depth == 0 => {
                let end = i + close;
                return Some((&src[..end], end + RAW_CLOSE.len()));
            }
            _ => {
                depth -= 1;
                i += close + RAW_CLOSE.len();
            }
        }
    }
}

fn split_tag(content: &str, line: usize) -> Result<Tag, TplError> {
    let mut words = split_words(content)
        .ok_or_else(|| TplError::parse(line, format!("unterminated quote in tag '{}'", content)))?
        .into_iter();
    let name = words
        .next()
        .ok_or_else(|| TplError::parse(line, "empty tag"))?;

    let mut args = Vec::new();
    let mut hash = Vec::new();
    for word in words {
        match hash_pair(&word) {
            Some((k, v)) => hash.push((k.to_string(), v.to_string())),
            None => args.push(word),
        }
    }
    Ok(Tag { name, args, hash })
}

/// Splits on whitespace, keeping quoted and backtick spans whole.
fn split_words(content: &str) -> Option<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in content.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    words.push(std::mem::take(&mut current));
                }
            }
            None => {
                if matches!(c, '\'' | '"' | '`') {
                    quote = Some(c);
                }
                current.push(c);
            }
        }
    }
    if quote.is_some() {
        return None;
    }
    if !current.is_empty() {
        words.push(current);
    }
    Some(words)
}

/// `key=value` with an identifier key; `a==b` is not a pair.
fn hash_pair(word: &str) -> Option<(&str, &str)> {
    let (key, value) = word.split_once('=')?;
    if key.is_empty()
        || value.starts_with('=')
        || !key.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return None;
    }
    Some((key, value))
}

fn count_lines(s: &str) -> usize {
    s.matches('\n').count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src).unwrap().into_iter().map(|t| t.kind).collect()
    }

    fn tag(name: &str, args: &[&str]) -> Tag {
        Tag {
            name: name.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            hash: vec![],
        }
    }

    #[test]
    fn test_plain_text() {
        assert_eq!(kinds("hello world"), vec![TokenKind::Text("hello world".into())]);
    }

    #[test]
    fn test_variable_forms() {
        assert_eq!(
            kinds("a{{name}}b{{{html}}}{{& amp }}"),
            vec![
                TokenKind::Text("a".into()),
                TokenKind::Variable { tag: tag("name", &[]), escaped: true },
                TokenKind::Text("b".into()),
                TokenKind::Variable { tag: tag("html", &[]), escaped: false },
                TokenKind::Variable { tag: tag("amp", &[]), escaped: false },
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("{{! note }}{{!-- has }} inside --}}"),
            vec![
                TokenKind::Comment("note".into()),
                TokenKind::Comment("has }} inside".into()),
            ]
        );
    }

    #[test]
    fn test_block_with_args_and_hash() {
        let toks = kinds("{{#inflect count '%d album' \"%d albums\" sep=', '}}{{/inflect}}");
        assert_eq!(
            toks,
            vec![
                TokenKind::Open(Tag {
                    name: "inflect".into(),
                    args: vec!["count".into(), "'%d album'".into(), "\"%d albums\"".into()],
                    hash: vec![("sep".into(), "', '".into())],
                }),
                TokenKind::Close("inflect".into()),
            ]
        );
    }

    #[test]
    fn test_backtick_expression_is_one_arg() {
        let toks = kinds("{{#if `count >= 5`}}");
        assert_eq!(toks, vec![TokenKind::Open(tag("if", &["`count >= 5`"]))]);
    }

    #[test]
    fn test_quoted_close_delimiter() {
        let toks = kinds("{{default x '}}'}}");
        assert_eq!(
            toks,
            vec![TokenKind::Variable { tag: tag("default", &["x", "'}}'"]), escaped: true }]
        );
    }

    #[test]
    fn test_raw_capture() {
        assert_eq!(
            kinds("{{#raw}}I'm raw {{data}}{{/raw}}!"),
            vec![TokenKind::Raw("I'm raw {{data}}".into()), TokenKind::Text("!".into())]
        );
        assert_eq!(
            kinds("{{#raw}}a{{#raw}}b{{/raw}}c{{/raw}}"),
            vec![TokenKind::Raw("a{{#raw}}b{{/raw}}c".into())]
        );
    }

    #[test]
    fn test_partial() {
        assert_eq!(kinds("{{> header}}"), vec![TokenKind::Partial(tag("header", &[]))]);
    }

    #[test]
    fn test_line_numbers() {
        let toks = tokenize("a\nb{{x}}\n\n{{#y}}").unwrap();
        assert_eq!(toks[1].line, 2);
        assert_eq!(toks[3].line, 4);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(tokenize("hello {{name"), Err(TplError::Parse { line: 1, .. })));
        assert!(matches!(tokenize("{{{name}}"), Err(TplError::Parse { .. })));
        assert!(matches!(tokenize("{{}}"), Err(TplError::Parse { .. })));
        assert!(matches!(tokenize("{{/}}"), Err(TplError::Parse { .. })));
        assert!(matches!(tokenize("\n{{#raw}}never closed"), Err(TplError::Parse { line: 2, .. })));
        assert!(matches!(tokenize("{{x 'open}}"), Err(TplError::Parse { .. })));
    }
}
