use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{Error, Result};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Leading zeros are not part of a token: `$T00$` stays literal text.
    RE.get_or_init(|| match Regex::new(r"\$T(0|[1-9][0-9]*)\$") {
        Ok(re) => re,
        Err(e) => unreachable!("placeholder pattern is valid: {e}"),
    })
}

fn token_index(caps: &regex::Captures<'_>) -> Result<usize> {
    let whole = caps.get(0).map_or("", |m| m.as_str());
    caps.get(1)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| Error::template(format!("placeholder index out of range in '{whole}'")))
}

/// Distinct placeholder indices referenced by a raw value name.
pub fn placeholders(raw: &str) -> Result<BTreeSet<usize>> {
    placeholder_re()
        .captures_iter(raw)
        .map(|c| token_index(&c))
        .collect()
}

/// Substitutes `$Ti$` with `args[i]`.
///
/// The referenced indices must be exactly `0..args.len()`; any gap, extra
/// argument or out-of-range token is an error. Substituted text is never
/// scanned again.
pub fn resolve(raw: &str, args: &[String]) -> Result<String> {
    let used = placeholders(raw)?;
    let expected = used.len();
    let contiguous = used.iter().copied().eq(0..expected);
    if !contiguous || expected != args.len() {
        return Err(Error::template(format!(
            "'{raw}' references {} placeholder(s) {:?} but {} argument(s) were given",
            expected,
            used,
            args.len()
        )));
    }

    let mut out = String::with_capacity(raw.len());
    let mut last = 0;
    for caps in placeholder_re().captures_iter(raw) {
        let Some(whole) = caps.get(0) else { continue };
        let arg = args
            .get(token_index(&caps)?)
            .ok_or_else(|| Error::template(format!("'{raw}': no argument for {}", whole.as_str())))?;
        out.push_str(&raw[last..whole.start()]);
        out.push_str(arg);
        last = whole.end();
    }
    out.push_str(&raw[last..]);
    Ok(out)
}

/// A value record as it appears inside a task's parameter tuple.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ValueRecord {
    pub uuid: String,
    pub name: String,
}

/// One selected value with its template arguments.
///
/// On the wire this is a tuple: a reserved slot, the value record, then the
/// arguments `T0..Tn`. `args` holds the display text of each argument and
/// `wire` the argument exactly as received, which is what gets sent back.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "Vec<Value>")]
pub struct ParamValueRef {
    pub value: ValueRecord,
    pub args: Vec<String>,
    pub wire: Vec<Value>,
}

impl ParamValueRef {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>, args: Vec<String>) -> Self {
        let wire = args.iter().cloned().map(Value::String).collect();
        Self {
            value: ValueRecord {
                uuid: uuid.into(),
                name: name.into(),
            },
            args,
            wire,
        }
    }

    pub fn from_wire(uuid: impl Into<String>, name: impl Into<String>, wire: Vec<Value>) -> Self {
        Self {
            value: ValueRecord {
                uuid: uuid.into(),
                name: name.into(),
            },
            args: wire.iter().map(arg_text).collect(),
            wire,
        }
    }

    pub fn resolved_name(&self) -> Result<String> {
        resolve(&self.value.name, &self.args)
    }

    /// `[value_uuid, arg0, ..]` as sent back in task bodies.
    pub fn to_selection(&self) -> Value {
        let mut out = Vec::with_capacity(self.wire.len() + 1);
        out.push(Value::String(self.value.uuid.clone()));
        out.extend(self.wire.iter().cloned());
        Value::Array(out)
    }
}

pub(crate) fn arg_text(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

impl TryFrom<Vec<Value>> for ParamValueRef {
    type Error = String;

    fn try_from(items: Vec<Value>) -> std::result::Result<Self, Self::Error> {
        let mut it = items.into_iter();
        let _reserved = it.next().ok_or("empty param value tuple")?;
        let record = it.next().ok_or("param value tuple has no value record")?;
        let value: ValueRecord =
            serde_json::from_value(record).map_err(|e| format!("invalid value record: {e}"))?;
        Ok(Self::from_wire(value.uuid, value.name, it.collect()))
    }
}
