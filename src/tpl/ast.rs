use crate::data::Value;
use serde::{Deserialize, Serialize};

/// A compiled template: the unit stored in the template cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Text(String),
    /// `{{name args}}`, `{{{name}}}`: a variable reference or an inline helper call.
    Mustache { call: Call, escaped: bool },
    /// `{{#name args}}` without a closing tag.
    Section(Call),
    Block(Block),
    Raw(String),
    /// `{{> name [context]}}`
    Partial { name: String, context: Option<Param>, line: usize },
}

/// Tag head shared by every helper-capable node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub name: String,
    pub path: PathExpr,
    pub params: Vec<Param>,
    pub hash: Vec<(String, Param)>,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub call: Call,
    /// The first branch is the main body; later ones come from `{{elseif}}`
    /// (with a condition) and `{{else}}` (without).
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub condition: Option<Param>,
    pub body: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Param {
    Path(PathExpr),
    Literal(Literal),
    Comparison(Comparison),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl Literal {
    pub fn to_value(&self) -> Value {
        match self {
            Literal::Str(s) => Value::Str(s.clone()),
            Literal::Int(v) => Value::I64(*v),
            Literal::Float(v) => Value::F64(*v),
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Null => Value::Null,
        }
    }
}

/// A variable reference such as `name`, `../user.name`, `@index`,
/// `@../key` or `items[1:2]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathExpr {
    pub raw: String,
    /// `@` prefix: resolved against computed data variables.
    pub data: bool,
    /// Number of `../` steps.
    pub depth: usize,
    /// Empty for `this` / `.`.
    pub segments: Vec<String>,
    pub slice: Option<Slice>,
}

impl PathExpr {
    pub fn is_this(&self) -> bool {
        !self.data && self.depth == 0 && self.segments.is_empty()
    }
}

/// `[start:len]` qualifier: skip `start` elements, keep at most `len`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slice {
    pub start: usize,
    pub len: usize,
}

impl Slice {
    pub fn apply(&self, value: &Value) -> Value {
        match value {
            Value::List(items) => Value::List(
                items.iter().skip(self.start).take(self.len).cloned().collect(),
            ),
            Value::Map(m) => Value::Map(
                m.iter()
                    .skip(self.start)
                    .take(self.len)
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub left: Operand,
    pub op: CmpOp,
    pub right: Operand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    Str(String),
    /// Kept as written; numeric coercion happens at evaluation.
    Number(String),
    Path(PathExpr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slice_list() {
        let list = Value::from(vec![1, 2, 3, 4]);
        let s = Slice { start: 1, len: 2 };
        assert_eq!(s.apply(&list), Value::from(vec![2, 3]));
        let s = Slice { start: 3, len: 5 };
        assert_eq!(s.apply(&list), Value::from(vec![4]));
        let s = Slice { start: 9, len: 1 };
        assert_eq!(s.apply(&list), Value::List(vec![]));
    }

    #[test]
    fn test_template_survives_json() {
        let tpl = Template {
            nodes: vec![
                Node::Text("a".into()),
                Node::Raw("{{b}}".into()),
                Node::Partial {
                    name: "p".into(),
                    context: Some(Param::Literal(Literal::Float(1.5))),
                    line: 1,
                },
            ],
        };
        let json = serde_json::to_string(&tpl).unwrap();
        let back: Template = serde_json::from_str(&json).unwrap();
        assert_eq!(tpl, back);
    }
}
