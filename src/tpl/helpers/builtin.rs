use super::{HashArgs, HelperDef, HelperRegistry, HelperResult, Options};
use crate::data::Value;
use crate::error::TplError;
use crate::tpl::render_context::DataVars;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime};

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DEFAULT_TRUNCATE_SUFFIX: &str = "...";
/// Upper bound for `repeat n`.
pub const MAX_REPEAT: usize = 10_000;

pub(crate) fn register_all(registry: &HelperRegistry) {
    registry.register("if", IfHelper);
    registry.register("unless", UnlessHelper);
    registry.register("with", WithHelper);
    registry.register("each", EachHelper);
    registry.register("upper", TextHelper(str::to_uppercase));
    registry.register("lower", TextHelper(str::to_lowercase));
    registry.register("capitalize", TextHelper(capitalize));
    registry.register("capitalize_words", TextHelper(capitalize_words));
    registry.register("reverse", TextHelper(|s: &str| s.chars().rev().collect()));
    registry.register("inflect", InflectHelper);
    registry.register("default", DefaultHelper);
    registry.register("truncate", TruncateHelper);
    registry.register("format_date", FormatDateHelper);
    registry.register("repeat", RepeatHelper);
    registry.register("define", DefineHelper);
    registry.register("invoke", InvokeHelper);
}

fn param<'p>(params: &'p [Value], i: usize, options: &Options) -> Result<&'p Value, TplError> {
    params.get(i).ok_or_else(|| {
        TplError::Render(format!(
            "helper '{}' expects at least {} argument(s)",
            options.name(),
            i + 1
        ))
    })
}

fn fragment_name(options: &Options) -> Result<String, TplError> {
    options
        .raw_param(0)
        .ok_or_else(|| TplError::Render(format!("helper '{}' needs a name", options.name())))
}

pub struct IfHelper;

impl HelperDef for IfHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        if param(params, 0, options)?.is_truthy() {
            options.render()
        } else {
            options.inverse()
        }
    }
}

pub struct UnlessHelper;

impl HelperDef for UnlessHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        if param(params, 0, options)?.is_truthy() {
            options.inverse()
        } else {
            options.render()
        }
    }
}

pub struct WithHelper;

impl HelperDef for WithHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let value = param(params, 0, options)?;
        if value.is_truthy() {
            options.render_with(value.clone())
        } else {
            options.inverse()
        }
    }
}

pub struct EachHelper;

impl HelperDef for EachHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let value = param(params, 0, options)?;
        if value.is_blank() || !matches!(value, Value::List(_) | Value::Map(_)) {
            return options.inverse();
        }
        iterate(value, options)
    }
}

/// One iteration frame per element of a list or map.
fn iterate(value: &Value, options: &mut Options<'_, '_, '_>) -> HelperResult {
    let enabled = options.data_variables_enabled();
    let mut out = String::new();
    match value {
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                let vars = DataVars::iteration(i, items.len(), None, enabled);
                out.push_str(&options.render_iteration(item.clone(), vars)?);
            }
        }
        Value::Map(entries) => {
            for (i, (key, item)) in entries.iter().enumerate() {
                let vars = DataVars::iteration(i, entries.len(), Some(key.as_str()), enabled);
                out.push_str(&options.render_iteration(item.clone(), vars)?);
            }
        }
        _ => {}
    }
    Ok(out)
}

/// `{{#name}}…{{/name}}` where `name` is a variable rather than a helper:
/// non-empty lists iterate, other truthy values render once in their own
/// frame, falsy values render the inverse.
pub(crate) fn section(value: &Value, options: &mut Options<'_, '_, '_>) -> HelperResult {
    match value {
        Value::List(items) if !items.is_empty() => iterate(value, options),
        v if v.is_truthy() => options.render_with(v.clone()),
        _ => options.inverse(),
    }
}

/// Applies a string transform to the first argument, or to the rendered
/// body when used as a block without arguments.
pub struct TextHelper(fn(&str) -> String);

impl HelperDef for TextHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let text = match params.first() {
            Some(v) => v.to_string(),
            None if options.is_block() => options.render()?,
            None => param(params, 0, options)?.to_string(),
        };
        Ok((self.0)(&text))
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn capitalize_words(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut at_word_start = true;
    for c in s.chars() {
        if at_word_start {
            out.extend(c.to_uppercase());
        } else {
            out.push(c);
        }
        at_word_start = c.is_whitespace();
    }
    out
}

/// `inflect count singular plural`: `%d` in the chosen form is replaced by
/// the count.
pub struct InflectHelper;

impl HelperDef for InflectHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let count = param(params, 0, options)?;
        let singular = param(params, 1, options)?;
        let plural = param(params, 2, options)?;
        let form = if count.as_number() == Some(1.0) {
            singular
        } else {
            plural
        };
        Ok(form.to_string().replace("%d", &count.to_string()))
    }
}

pub struct DefaultHelper;

impl HelperDef for DefaultHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let value = param(params, 0, options)?;
        if value.is_blank() {
            Ok(param(params, 1, options)?.to_string())
        } else {
            Ok(value.to_string())
        }
    }
}

/// `truncate value length [suffix]`, counted in characters.
pub struct TruncateHelper;

impl HelperDef for TruncateHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let text = param(params, 0, options)?.to_string();
        let limit = param(params, 1, options)?
            .as_number()
            .filter(|n| *n >= 0.0)
            .ok_or_else(|| TplError::Render("truncate length must be a non-negative number".into()))?;
        let limit = limit as usize;
        if text.chars().count() <= limit {
            return Ok(text);
        }
        let suffix = params
            .get(2)
            .map_or_else(|| DEFAULT_TRUNCATE_SUFFIX.to_string(), Value::to_string);
        let mut out: String = text.chars().take(limit).collect();
        out.push_str(&suffix);
        Ok(out)
    }
}

/// `format_date value [format]` with strftime syntax. Values that are not
/// recognizable dates are rendered unchanged.
pub struct FormatDateHelper;

impl HelperDef for FormatDateHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let value = param(params, 0, options)?;
        let format = params
            .get(1)
            .map_or_else(|| DEFAULT_DATE_FORMAT.to_string(), Value::to_string);

        // chrono 遇到非法格式会在 Display 时 panic，先校验
        if StrftimeItems::new(&format).any(|item| matches!(item, Item::Error)) {
            return Err(TplError::Render(format!("invalid date format '{}'", format)));
        }

        match value {
            Value::DateTimeUtc(dt) => Ok(dt.format(&format).to_string()),
            other => Ok(as_datetime(other)
                .map_or_else(|| other.to_string(), |dt| dt.format(&format).to_string())),
        }
    }
}

fn as_datetime(value: &Value) -> Option<NaiveDateTime> {
    match value {
        Value::Date(d) => d.and_hms_opt(0, 0, 0),
        Value::DateTime(dt) => Some(*dt),
        Value::DateTimeUtc(dt) => Some(dt.naive_utc()),
        Value::I64(ts) => DateTime::from_timestamp(*ts, 0).map(|dt| dt.naive_utc()),
        Value::Str(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.naive_local())
                .ok()
                .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok())
                .or_else(|| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").ok())
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                })
        }
        _ => None,
    }
}

/// `repeat n`: the body `n` times in the same frame.
pub struct RepeatHelper;

impl HelperDef for RepeatHelper {
    fn call(&self, params: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let times = param(params, 0, options)?.as_number().unwrap_or(0.0).max(0.0);
        if times > MAX_REPEAT as f64 {
            return Err(TplError::Render(format!(
                "repeat count {} exceeds {}",
                times, MAX_REPEAT
            )));
        }
        let times = times as usize;
        let mut out = String::new();
        for _ in 0..times {
            out.push_str(&options.render()?);
        }
        Ok(out)
    }
}

pub struct DefineHelper;

impl HelperDef for DefineHelper {
    fn call(&self, _: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let name = fragment_name(options)?;
        options.define(name);
        Ok(String::new())
    }
}

pub struct InvokeHelper;

impl HelperDef for InvokeHelper {
    fn call(&self, _: &[Value], _: &HashArgs, options: &mut Options<'_, '_, '_>) -> HelperResult {
        let name = fragment_name(options)?;
        options.invoke(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capitalize() {
        assert_eq!(capitalize("hello"), "Hello");
        assert_eq!(capitalize(""), "");
        assert_eq!(capitalize("élan vital"), "Élan vital");
        assert_eq!(capitalize_words("hello world"), "Hello World");
        assert_eq!(capitalize_words("  two  spaces"), "  Two  Spaces");
    }

    #[test]
    fn test_as_datetime() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .unwrap();
        assert_eq!(as_datetime(&Value::from("2024-03-09")), Some(expected));
        assert_eq!(
            as_datetime(&Value::from("2024-03-09T00:00:00+08:00")),
            Some(expected)
        );
        assert_eq!(as_datetime(&Value::I64(0)).map(|d| d.to_string()), Some("1970-01-01 00:00:00".into()));
        assert_eq!(
            as_datetime(&Value::from("2024-03-09T00:00:00")),
            Some(expected)
        );
        assert_eq!(as_datetime(&Value::from("not a date")), None);
        assert_eq!(as_datetime(&Value::Bool(true)), None);
    }
}
