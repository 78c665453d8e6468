use crate::data::{Value, is_numeric};
use crate::error::TplError;
use crate::tpl::ast::{CmpOp, Comparison, Operand};
use crate::tpl::parser::parse_path;
use crate::tpl::render_context::Context;

// 双字符运算符在前，避免 `<=` 被识别成 `<`
const OPERATORS: [CmpOp; 6] = [
    CmpOp::Eq,
    CmpOp::Ne,
    CmpOp::Le,
    CmpOp::Ge,
    CmpOp::Lt,
    CmpOp::Gt,
];

/// Parses `left op right`, the body of a backtick expression.
pub fn parse_comparison(text: &str, line: usize) -> Result<Comparison, TplError> {
    let mut scanner = Scanner { rest: text, line };
    let left = scanner.operand()?;
    let op = scanner.operator()?;
    let right = scanner.operand()?;

    let trailing = scanner.rest.trim();
    if !trailing.is_empty() {
        return Err(TplError::parse(
            line,
            format!("unexpected '{}' in expression `{}`", trailing, text),
        ));
    }
    Ok(Comparison { left, op, right })
}

/// 数值比较优先（两侧都是数字时按 f64 比较），否则比较显示字符串
pub fn evaluate(cmp: &Comparison, ctx: &Context) -> bool {
    let left = operand_value(&cmp.left, ctx);
    let right = operand_value(&cmp.right, ctx);
    compare(&left, cmp.op, &right)
}

/// Parses and evaluates in one step, for conditions built at runtime.
pub fn evaluate_str(text: &str, ctx: &Context) -> Result<bool, TplError> {
    Ok(evaluate(&parse_comparison(text, 1)?, ctx))
}

fn operand_value(operand: &Operand, ctx: &Context) -> Value {
    match operand {
        Operand::Str(s) | Operand::Number(s) => Value::Str(s.clone()),
        Operand::Path(path) => {
            let found = if path.data && !ctx.data_variables_enabled() {
                ctx.resolve_data_field(path)
            } else {
                ctx.resolve(path)
            };
            match (found, path.slice) {
                (Some(v), Some(slice)) => slice.apply(v),
                (Some(v), None) => v.clone(),
                (None, _) => Value::Null,
            }
        }
    }
}

fn compare(left: &Value, op: CmpOp, right: &Value) -> bool {
    if let (Some(a), Some(b)) = (left.as_number(), right.as_number()) {
        return match op {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Gt => a > b,
            CmpOp::Le => a <= b,
            CmpOp::Ge => a >= b,
        };
    }

    let (a, b) = (left.to_string(), right.to_string());
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        // 非数值不参与大小比较
        _ => false,
    }
}

struct Scanner<'s> {
    rest: &'s str,
    line: usize,
}

impl<'s> Scanner<'s> {
    fn operand(&mut self) -> Result<Operand, TplError> {
        self.rest = self.rest.trim_start();
        match self.rest.chars().next() {
            None => Err(TplError::parse(self.line, "missing operand in expression")),
            Some(q @ ('\'' | '"')) => {
                let body = &self.rest[1..];
                let end = body.find(q).ok_or_else(|| {
                    TplError::parse(self.line, "unterminated string in expression")
                })?;
                self.rest = &body[end + 1..];
                Ok(Operand::Str(body[..end].to_string()))
            }
            Some(_) => {
                let end = self
                    .rest
                    .find(|c: char| c.is_whitespace() || matches!(c, '=' | '!' | '<' | '>'))
                    .unwrap_or(self.rest.len());
                let word = &self.rest[..end];
                if word.is_empty() {
                    return Err(TplError::parse(self.line, "missing operand in expression"));
                }
                self.rest = &self.rest[end..];
                Ok(match word {
                    "true" | "false" => Operand::Str(word.to_string()),
                    "null" => Operand::Str(String::new()),
                    w if is_numeric(w) => Operand::Number(w.to_string()),
                    w => Operand::Path(parse_path(w, self.line)?),
                })
            }
        }
    }

    fn operator(&mut self) -> Result<CmpOp, TplError> {
        self.rest = self.rest.trim_start();
        for op in OPERATORS {
            if let Some(after) = self.rest.strip_prefix(op.symbol()) {
                self.rest = after;
                return Ok(op);
            }
        }
        Err(TplError::parse(
            self.line,
            format!("expected a comparison operator before '{}'", self.rest),
        ))
    }
}
