use crate::data::{FieldLookup, Value};
use crate::tpl::ast::PathExpr;
use crate::tpl::parser::parse_path;
use std::borrow::Cow;

/// 迭代帧上的数据变量，创建帧时一次性计算
#[derive(Debug, Clone, PartialEq)]
pub struct DataVars {
    index: Value,
    key: Option<Value>,
    first: Option<Value>,
    last: Option<Value>,
}

impl DataVars {
    /// Variables for element `index` of a collection of `len` elements.
    ///
    /// `@index` is always set. `@key` is set for map entries, and for list
    /// elements only when data variables are enabled; `@first`/`@last` only
    /// when enabled.
    pub fn iteration(index: usize, len: usize, map_key: Option<&str>, enabled: bool) -> Self {
        let key = match map_key {
            Some(k) => Some(Value::Str(k.to_string())),
            None => enabled.then(|| Value::from(index)),
        };
        Self {
            index: Value::from(index),
            key,
            first: enabled.then_some(Value::Bool(index == 0)),
            last: enabled.then_some(Value::Bool(index + 1 == len)),
        }
    }

    fn get(&self, name: &str) -> Option<&Value> {
        match name {
            "index" => Some(&self.index),
            "key" => self.key.as_ref(),
            "first" => self.first.as_ref(),
            "last" => self.last.as_ref(),
            _ => None,
        }
    }
}

struct Frame<'a> {
    value: Cow<'a, Value>,
    vars: Option<DataVars>,
}

/// Scope stack. The root frame borrows the caller's data; frames pushed for
/// block bodies own their value. A frame's parent is the one below it.
pub struct Context<'a> {
    frames: Vec<Frame<'a>>,
    data_variables: bool,
}

impl<'a> Context<'a> {
    pub fn new(root: &'a Value, data_variables: bool) -> Self {
        Self {
            frames: vec![Frame {
                value: Cow::Borrowed(root),
                vars: None,
            }],
            data_variables,
        }
    }

    pub fn push(&mut self, value: Value, vars: Option<DataVars>) {
        self.frames.push(Frame {
            value: Cow::Owned(value),
            vars,
        });
    }

    /// Pops the innermost frame. The root frame is never popped.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn data_variables_enabled(&self) -> bool {
        self.data_variables
    }

    pub fn current(&self) -> &Value {
        // 根帧始终存在
        self.frames.last().map_or(&Value::Null, |f| &f.value)
    }

    /// Resolves `path` against the stack; `None` means undefined.
    pub fn resolve(&self, path: &PathExpr) -> Option<&Value> {
        if path.data {
            return self.resolve_data(path);
        }

        // 1. 显式 ../：只在指定祖先帧内查找，不再回退
        if path.depth > 0 {
            let frame = self.ancestor(path.depth)?;
            return walk(&frame.value, &path.segments);
        }

        if path.is_this() {
            return Some(self.current());
        }
        let (head, rest) = path.segments.split_first()?;

        // 2. 从当前帧向外逐层查找首段，近处遮蔽远处
        for frame in self.frames.iter().rev() {
            if let Some(v) = frame.value.field(head) {
                return walk(v, rest);
            }
        }
        None
    }

    /// Resolves a textual path such as `user.name` and applies its slice.
    pub fn lookup(&self, path: &str) -> Option<Value> {
        let path = parse_path(path, 0).ok()?;
        let value = self.resolve(&path)?;
        Some(path.slice.map_or_else(|| value.clone(), |s| s.apply(value)))
    }

    fn resolve_data(&self, path: &PathExpr) -> Option<&Value> {
        let frame = self.ancestor(path.depth)?;
        let (name, rest) = path.segments.split_first()?;
        match frame.vars.as_ref().and_then(|vars| vars.get(name)) {
            Some(v) => walk(v, rest),
            // 开启数据变量时不合成未知的 @name
            None if self.data_variables => None,
            None => walk(frame.value.field(&format!("@{}", name))?, rest),
        }
    }

    /// `@name` read as an ordinary field literally named `@name`, ignoring
    /// computed variables.
    pub(crate) fn resolve_data_field(&self, path: &PathExpr) -> Option<&Value> {
        let frame = self.ancestor(path.depth)?;
        let (name, rest) = path.segments.split_first()?;
        walk(frame.value.field(&format!("@{}", name))?, rest)
    }

    fn ancestor(&self, depth: usize) -> Option<&Frame<'a>> {
        let idx = self.frames.len().checked_sub(depth + 1)?;
        self.frames.get(idx)
    }
}

fn walk<'v>(mut current: &'v Value, segments: &[String]) -> Option<&'v Value> {
    for seg in segments {
        current = current.field(seg)?;
    }
    Some(current)
}
