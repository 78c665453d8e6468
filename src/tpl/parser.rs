use crate::data::is_numeric;
use crate::error::TplError;
use crate::tpl::ast::{Block, Branch, Call, Literal, Node, Param, PathExpr, Slice, Template};
use crate::tpl::expr::parse_comparison;
use crate::tpl::lexer::{Tag, Token, TokenKind, tokenize};
use std::collections::{HashMap, HashSet};

/// Built-ins that only make sense with a body; an unclosed open tag for one
/// of these is an error instead of an inline call.
const BLOCK_HELPERS: [&str; 6] = ["if", "unless", "each", "with", "repeat", "define"];

struct OpenBlock {
    call: Call,
    branches: Vec<Branch>,
    current: Branch,
    after_else: bool,
}

pub fn parse_template(source: &str) -> Result<Template, TplError> {
    parse(tokenize(source)?)
}

pub fn parse(tokens: Vec<Token>) -> Result<Template, TplError> {
    let blocks = paired_opens(&tokens);
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<OpenBlock> = Vec::new();

    for (i, token) in tokens.into_iter().enumerate() {
        let line = token.line;
        match token.kind {
            TokenKind::Text(text) => append_text(current(&mut root, &mut stack), text),
            TokenKind::Comment(_) => {}
            TokenKind::Raw(text) => current(&mut root, &mut stack).push(Node::Raw(text)),

            // 1. {{else}} / {{else if c}} / {{elseif c}}
            TokenKind::Variable { tag, .. } if tag.name == "else" || tag.name == "elseif" => {
                let condition = else_condition(&tag, line)?;
                open_branch(&mut stack, condition, line)?;
            }

            TokenKind::Variable { tag, escaped } => {
                let call = call_from_tag(tag, line)?;
                current(&mut root, &mut stack).push(Node::Mustache { call, escaped });
            }

            // 2. {{#name}}：有匹配的闭合标签才是块
            TokenKind::Open(tag) => {
                let call = call_from_tag(tag, line)?;
                if blocks.contains(&i) {
                    stack.push(OpenBlock {
                        call,
                        branches: Vec::new(),
                        current: Branch {
                            condition: None,
                            body: Vec::new(),
                        },
                        after_else: false,
                    });
                } else if BLOCK_HELPERS.contains(&call.name.as_str()) {
                    return Err(TplError::parse(
                        line,
                        format!("unclosed block '{{{{#{}}}}}'", call.name),
                    ));
                } else {
                    current(&mut root, &mut stack).push(Node::Section(call));
                }
            }

            // 3. {{/name}} 必须匹配最内层的块
            TokenKind::Close(name) => {
                let Some(mut open) = stack.pop() else {
                    return Err(TplError::parse(
                        line,
                        format!("unexpected close tag '{{{{/{}}}}}'", name),
                    ));
                };
                if open.call.name != name {
                    return Err(TplError::parse(
                        line,
                        format!(
                            "close tag '{{{{/{}}}}}' does not match open block '{}' from line {}",
                            name, open.call.name, open.call.line
                        ),
                    ));
                }
                open.branches.push(open.current);
                current(&mut root, &mut stack).push(Node::Block(Block {
                    call: open.call,
                    branches: open.branches,
                }));
            }

            TokenKind::Partial(tag) => {
                let node = partial_from_tag(tag, line)?;
                current(&mut root, &mut stack).push(node);
            }
        }
    }

    if let Some(open) = stack.last() {
        return Err(TplError::parse(
            open.call.line,
            format!("unclosed block '{{{{#{}}}}}'", open.call.name),
        ));
    }
    Ok(Template { nodes: root })
}

/// Pairs every close tag with the nearest preceding unpaired open tag of the
/// same name. Returns the indexes of open tokens that start a block.
fn paired_opens(tokens: &[Token]) -> HashSet<usize> {
    let mut pending: HashMap<&str, Vec<usize>> = HashMap::new();
    let mut paired = HashSet::new();
    for (i, token) in tokens.iter().enumerate() {
        match &token.kind {
            TokenKind::Open(tag) => pending.entry(tag.name.as_str()).or_default().push(i),
            TokenKind::Close(name) => {
                if let Some(open) = pending.get_mut(name.as_str()).and_then(Vec::pop) {
                    paired.insert(open);
                }
            }
            _ => {}
        }
    }
    paired
}

fn current<'n>(root: &'n mut Vec<Node>, stack: &'n mut [OpenBlock]) -> &'n mut Vec<Node> {
    match stack.last_mut() {
        Some(open) => &mut open.current.body,
        None => root,
    }
}

fn append_text(nodes: &mut Vec<Node>, text: String) {
    if let Some(Node::Text(last)) = nodes.last_mut() {
        last.push_str(&text);
    } else {
        nodes.push(Node::Text(text));
    }
}

fn else_condition(tag: &Tag, line: usize) -> Result<Option<Param>, TplError> {
    if !tag.hash.is_empty() {
        return Err(TplError::parse(line, "'else' does not take hash arguments"));
    }
    let cond_args: &[String] = match (tag.name.as_str(), tag.args.split_first()) {
        ("else", None) => return Ok(None),
        ("else", Some((kw, rest))) if kw == "if" => rest,
        ("elseif", _) => &tag.args,
        _ => return Err(TplError::parse(line, "unexpected arguments after 'else'")),
    };
    match cond_args {
        [cond] => Ok(Some(parse_param(cond, line)?)),
        _ => Err(TplError::parse(line, "'elseif' takes exactly one condition")),
    }
}

fn open_branch(
    stack: &mut [OpenBlock],
    condition: Option<Param>,
    line: usize,
) -> Result<(), TplError> {
    let Some(open) = stack.last_mut() else {
        return Err(TplError::parse(line, "'else' outside of a block"));
    };
    if open.after_else {
        return Err(TplError::parse(
            line,
            format!("only '{{{{/{}}}}}' may follow 'else'", open.call.name),
        ));
    }
    let is_else = condition.is_none();
    if !is_else && open.call.name != "if" {
        return Err(TplError::parse(
            line,
            format!("'elseif' is not allowed inside '{}'", open.call.name),
        ));
    }

    let finished = std::mem::replace(
        &mut open.current,
        Branch {
            condition,
            body: Vec::new(),
        },
    );
    open.branches.push(finished);
    open.after_else = is_else;
    Ok(())
}

fn call_from_tag(tag: Tag, line: usize) -> Result<Call, TplError> {
    let path = parse_path(&tag.name, line)?;
    let params = tag
        .args
        .iter()
        .map(|arg| parse_param(arg, line))
        .collect::<Result<Vec<_>, _>>()?;
    let hash = tag
        .hash
        .into_iter()
        .map(|(key, value)| Ok((key, parse_param(&value, line)?)))
        .collect::<Result<Vec<_>, TplError>>()?;
    Ok(Call {
        name: tag.name,
        path,
        params,
        hash,
        line,
    })
}

fn partial_from_tag(tag: Tag, line: usize) -> Result<Node, TplError> {
    if tag.args.len() > 1 || !tag.hash.is_empty() {
        return Err(TplError::parse(
            line,
            format!("partial '{}' takes at most one context argument", tag.name),
        ));
    }
    let name = unquote(&tag.name).unwrap_or(&tag.name).to_string();
    let context = tag
        .args
        .first()
        .map(|arg| parse_param(arg, line))
        .transpose()?;
    Ok(Node::Partial {
        name,
        context,
        line,
    })
}

/// Parses one argument: a backtick comparison, a quoted string, a number,
/// `true`/`false`/`null`, or a variable path.
pub(crate) fn parse_param(text: &str, line: usize) -> Result<Param, TplError> {
    if let Some(inner) = text
        .strip_prefix('`')
        .and_then(|rest| rest.strip_suffix('`'))
    {
        return Ok(Param::Comparison(parse_comparison(inner, line)?));
    }
    if let Some(s) = unquote(text) {
        return Ok(Param::Literal(Literal::Str(s.to_string())));
    }
    let literal = match text {
        "true" => Some(Literal::Bool(true)),
        "false" => Some(Literal::Bool(false)),
        "null" => Some(Literal::Null),
        _ => text
            .parse::<i64>()
            .ok()
            .map(Literal::Int)
            .or_else(|| {
                is_numeric(text)
                    .then(|| text.parse::<f64>().ok())
                    .flatten()
                    .map(Literal::Float)
            }),
    };
    match literal {
        Some(lit) => Ok(Param::Literal(lit)),
        None => Ok(Param::Path(parse_path(text, line)?)),
    }
}

fn unquote(text: &str) -> Option<&str> {
    let quote = text.chars().next().filter(|c| matches!(c, '\'' | '"'))?;
    text[1..].strip_suffix(quote)
}

/// Parses a variable reference: `name`, `a.b`, `a/b`, `this`, `.`,
/// `../name`, `@index`, `@../key`, `items[1:2]`.
pub(crate) fn parse_path(text: &str, line: usize) -> Result<PathExpr, TplError> {
    let invalid = |why: &str| TplError::parse(line, format!("invalid path '{}': {}", text, why));

    let mut rest = text.trim();
    if rest.is_empty() {
        return Err(invalid("empty"));
    }
    let data = match rest.strip_prefix('@') {
        Some(r) => {
            rest = r;
            true
        }
        None => false,
    };

    let mut depth = 0;
    loop {
        if let Some(r) = rest.strip_prefix("../") {
            rest = r;
        } else if rest == ".." {
            rest = "";
        } else {
            break;
        }
        depth += 1;
    }

    let mut slice = None;
    if let Some(open) = rest.find('[') {
        let inner = rest[open + 1..]
            .strip_suffix(']')
            .ok_or_else(|| invalid("slice must close the path"))?;
        slice = Some(parse_slice(inner).ok_or_else(|| invalid("slice must be [start:len]"))?);
        rest = &rest[..open];
    } else if rest.contains(']') {
        return Err(invalid("unbalanced ']'"));
    }

    let body = match rest {
        "this" | "." | "" => "",
        _ => rest
            .strip_prefix("this.")
            .or_else(|| rest.strip_prefix("this/"))
            .or_else(|| rest.strip_prefix("./"))
            .unwrap_or(rest),
    };
    let segments = if body.is_empty() {
        Vec::new()
    } else {
        body.split(['.', '/']).map(str::to_string).collect::<Vec<_>>()
    };

    for seg in &segments {
        if seg.is_empty() {
            return Err(invalid("empty segment"));
        }
        if seg
            .chars()
            .any(|c| c.is_whitespace() || "'\"`=<>!(){}[]".contains(c))
        {
            return Err(invalid("unexpected character"));
        }
    }
    if data && segments.is_empty() {
        return Err(invalid("data variable needs a name"));
    }

    Ok(PathExpr {
        raw: text.trim().to_string(),
        data,
        depth,
        segments,
        slice,
    })
}

fn parse_slice(inner: &str) -> Option<Slice> {
    let (start, len) = inner.split_once(':')?;
    let digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if !digits(start) || !digits(len) {
        return None;
    }
    Some(Slice {
        start: start.parse().ok()?,
        len: len.parse().ok()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tpl::ast::{CmpOp, Operand};

    fn parse_ok(src: &str) -> Vec<Node> {
        parse_template(src).unwrap().nodes
    }

    #[test]
    fn test_parse_simple_text() {
        let nodes = parse_ok("hello world");
        assert_eq!(nodes, vec![Node::Text("hello world".into())]);
    }

    #[test]
    fn test_comment_merges_text() {
        let nodes = parse_ok("a{{! gone }}b");
        assert_eq!(nodes, vec![Node::Text("ab".into())]);
    }

    #[test]
    fn test_parse_var() {
        let nodes = parse_ok("hello {{user.name}}!");
        assert_eq!(nodes.len(), 3);
        match &nodes[1] {
            Node::Mustache { call, escaped } => {
                assert!(escaped);
                assert_eq!(call.name, "user.name");
                assert_eq!(call.path.segments, vec!["user", "name"]);
                assert!(call.params.is_empty());
            }
            other => panic!("Expected Mustache, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_params_and_hash() {
        let nodes = parse_ok("{{#truncate data 8 '...' keep=true}}");
        match &nodes[0] {
            Node::Section(call) => {
                assert_eq!(call.name, "truncate");
                assert_eq!(
                    call.params,
                    vec![
                        Param::Path(parse_path("data", 1).unwrap()),
                        Param::Literal(Literal::Int(8)),
                        Param::Literal(Literal::Str("...".into())),
                    ]
                );
                assert_eq!(
                    call.hash,
                    vec![("keep".to_string(), Param::Literal(Literal::Bool(true)))]
                );
            }
            other => panic!("Expected Section, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_block() {
        let nodes = parse_ok("{{#each items}}<{{this}}>{{/each}}");
        assert_eq!(nodes.len(), 1);
        match &nodes[0] {
            Node::Block(block) => {
                assert_eq!(block.call.name, "each");
                assert_eq!(block.branches.len(), 1);
                assert_eq!(block.branches[0].body.len(), 3);
            }
            other => panic!("Expected Block, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_nested() {
        let nodes = parse_ok("{{#if x}}{{#each list}}{{this}}{{/each}}{{/if}}");
        match &nodes[0] {
            Node::Block(outer) => match &outer.branches[0].body[0] {
                Node::Block(inner) => assert_eq!(inner.call.name, "each"),
                other => panic!("Expected inner Block, got {:?}", other),
            },
            other => panic!("Expected Block, got {:?}", other),
        }
    }

    #[test]
    fn test_elseif_chain() {
        let nodes = parse_ok("{{#if a}}A{{elseif b}}B{{else if `c > 1`}}C{{else}}D{{/if}}");
        let Node::Block(block) = &nodes[0] else {
            panic!("Expected Block");
        };
        assert_eq!(block.branches.len(), 4);
        assert!(block.branches[0].condition.is_none());
        assert_eq!(
            block.branches[1].condition,
            Some(Param::Path(parse_path("b", 1).unwrap()))
        );
        match &block.branches[2].condition {
            Some(Param::Comparison(cmp)) => {
                assert_eq!(cmp.op, CmpOp::Gt);
                assert_eq!(cmp.right, Operand::Number("1".into()));
            }
            other => panic!("Expected comparison, got {:?}", other),
        }
        assert!(block.branches[3].condition.is_none());
        assert_eq!(block.branches[3].body, vec![Node::Text("D".into())]);
    }

    #[test]
    fn test_inline_section_without_close() {
        let nodes = parse_ok("{{#upper a}}{{#upper b}}x{{/upper}}");
        assert!(matches!(&nodes[0], Node::Section(call) if call.name == "upper"));
        assert!(matches!(&nodes[1], Node::Block(block) if block.call.name == "upper"));
    }

    #[test]
    fn test_paths() {
        let p = parse_path("@../../key", 1).unwrap();
        assert!(p.data);
        assert_eq!(p.depth, 2);
        assert_eq!(p.segments, vec!["key"]);

        let p = parse_path("data[1:2]", 1).unwrap();
        assert_eq!(p.segments, vec!["data"]);
        assert_eq!(p.slice, Some(Slice { start: 1, len: 2 }));

        assert!(parse_path("this", 1).unwrap().is_this());
        assert!(parse_path(".", 1).unwrap().is_this());
        assert_eq!(parse_path("this.name", 1).unwrap().segments, vec!["name"]);
        assert_eq!(parse_path("..", 1).unwrap().depth, 1);
    }

    #[test]
    fn test_partial() {
        let nodes = parse_ok("{{> header user}}");
        match &nodes[0] {
            Node::Partial { name, context, .. } => {
                assert_eq!(name, "header");
                assert_eq!(context, &Some(Param::Path(parse_path("user", 1).unwrap())));
            }
            other => panic!("Expected Partial, got {:?}", other),
        }
    }

    #[test]
    fn test_errors_carry_line() {
        let cases = [
            ("{{#if a}}x", 1),
            ("line\n{{/if}}", 2),
            ("{{#if a}}\n{{#each b}}{{/if}}{{/each}}", 2),
            ("{{#each a}}{{elseif b}}{{/each}}", 1),
            ("{{#if a}}{{else}}\n{{else}}{{/if}}", 2),
            ("{{#if a}}{{else}}{{elseif b}}{{/if}}", 1),
            ("{{else}}", 1),
            ("{{#each data[1:x]}}{{/each}}", 1),
            ("{{#each data[1:2}}{{/each}}", 1),
            ("{{#if `a ~ b`}}{{/if}}", 1),
            ("\n\n{{#repeat 3}}", 3),
        ];
        for (src, line) in cases {
            match parse_template(src) {
                Err(TplError::Parse { line: l, .. }) => assert_eq!(l, line, "source {:?}", src),
                other => panic!("Expected parse error for {:?}, got {:?}", src, other),
            }
        }
    }
}
