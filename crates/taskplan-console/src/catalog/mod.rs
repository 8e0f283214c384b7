//! Parameter catalog: params, their values and grouping.
//!
//! Everything here reads from the cached snapshot. Mutations are expressed
//! as requests and only become visible after the next refresh.

pub mod template;

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::{Value, json};

use crate::dispatch::{Endpoint, Request, endpoints};
use crate::error::Result;

pub const DEFAULT_GROUP_LABEL: &str = "General";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParamValue {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default, alias = "isTemplate")]
    pub is_template: bool,
    #[serde(default)]
    pub template_defaults: Vec<Value>,
    #[serde(default)]
    pub template_deprecated: Vec<Value>,
}

impl ParamValue {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            config: Value::Object(Default::default()),
            is_template: false,
            template_defaults: Vec::new(),
            template_deprecated: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Param {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub condition: String,
    #[serde(default)]
    pub values: Vec<ParamValue>,
    #[serde(default, deserialize_with = "value_ref")]
    pub default_param_value: Option<String>,
    #[serde(default, deserialize_with = "value_ref")]
    pub deprecated_param_value: Option<String>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub sorting: i64,
    #[serde(default)]
    pub group: String,
}

// The backend sends value references as a uuid string, a `{uuid, ..}`
// record, or an empty record/string/null when unset.
fn value_ref<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Option<String>, D::Error> {
    let v = Option::<Value>::deserialize(d)?;
    let uuid = match v {
        Some(Value::String(s)) => Some(s),
        Some(Value::Object(map)) => map
            .get("uuid")
            .and_then(Value::as_str)
            .map(str::to_string),
        _ => None,
    };
    Ok(uuid.filter(|s| !s.trim().is_empty()))
}

/// Default and deprecated selections for an editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueSelectors {
    pub default_value: String,
    pub deprecated_value: String,
}

impl Param {
    pub fn new(uuid: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: name.into(),
            condition: String::new(),
            values: Vec::new(),
            default_param_value: None,
            deprecated_param_value: None,
            force: false,
            sorting: 0,
            group: String::new(),
        }
    }

    pub fn find_value(&self, uuid: &str) -> Option<&ParamValue> {
        self.values.iter().find(|v| v.uuid == uuid)
    }

    fn first_value(&self) -> Option<&str> {
        self.values.first().map(|v| v.uuid.as_str())
    }

    /// Explicit default, else the first value. `None` only when there are
    /// no values at all.
    pub fn effective_default(&self) -> Option<&str> {
        self.default_param_value
            .as_deref()
            .or_else(|| self.first_value())
    }

    pub fn effective_deprecated(&self) -> Option<&str> {
        self.deprecated_param_value
            .as_deref()
            .or_else(|| self.first_value())
    }

    /// Selector state for editing; `None` when there is nothing to pick.
    pub fn value_selectors(&self) -> Option<ValueSelectors> {
        Some(ValueSelectors {
            default_value: self.effective_default()?.to_string(),
            deprecated_value: self.effective_deprecated()?.to_string(),
        })
    }

    pub fn group_label(&self) -> &str {
        display_group(&self.group)
    }
}

pub fn display_group(group: &str) -> &str {
    if group.trim().is_empty() {
        DEFAULT_GROUP_LABEL
    } else {
        group
    }
}

/// Params partitioned by group, groups in lexicographic order. Params keep
/// their snapshot order within a group.
pub fn group_params(params: &[Param]) -> BTreeMap<String, Vec<&Param>> {
    let mut out: BTreeMap<String, Vec<&Param>> = BTreeMap::new();
    for p in params {
        out.entry(p.group.trim().to_string()).or_default().push(p);
    }
    out
}

pub fn sorted_by_rank(params: &[Param]) -> Vec<&Param> {
    let mut out: Vec<&Param> = params.iter().collect();
    out.sort_by_key(|p| p.sorting);
    out
}

/// Editable fields shared by create and edit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamFields {
    pub name: String,
    pub condition: String,
    pub default_param_value: String,
    pub deprecated_param_value: String,
}

impl ParamFields {
    fn body(&self) -> Value {
        json!({
            "name": self.name,
            "condition": self.condition,
            "default_param_value": self.default_param_value,
            "deprecated_param_value": self.deprecated_param_value,
            "config": {},
        })
    }
}

pub fn create_param_request(fields: &ParamFields) -> Result<Request> {
    endpoints::AddParam.request_with_body(&[], fields.body())
}

pub fn edit_param_request(param: &str, fields: &ParamFields) -> Result<Request> {
    endpoints::EditParam.request_with_body(&[param], fields.body())
}

/// The document is forwarded untouched; the backend validates it.
pub fn create_batch_request(config: Value) -> Result<Request> {
    endpoints::AddParamBatch.request_with_body(&[], json!({ "config": config }))
}

pub fn reorder_param_request(param: &str, target_sorting: i64) -> Result<Request> {
    endpoints::ReorderParam.request(&[param, &target_sorting.to_string()])
}

pub fn force_param_request(param: &str, enabled: bool) -> Result<Request> {
    endpoints::ForceParam.request(&[param, if enabled { "1" } else { "0" }])
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamValueFields {
    pub name: String,
    pub config: Value,
    pub is_template: bool,
    pub template_defaults: Vec<Value>,
    pub template_deprecated: Vec<Value>,
}

impl ParamValueFields {
    fn body(&self) -> Value {
        let config = if self.config.is_null() {
            json!({})
        } else {
            self.config.clone()
        };
        json!({
            "name": self.name,
            "config": config,
            "isTemplate": self.is_template,
            "template_defaults": self.template_defaults,
            "template_deprecated": self.template_deprecated,
        })
    }
}

pub fn create_value_request(param: &str, fields: &ParamValueFields) -> Result<Request> {
    endpoints::AddParamValue.request_with_body(&[param], fields.body())
}

pub fn edit_value_request(param: &str, value: &str, fields: &ParamValueFields) -> Result<Request> {
    endpoints::EditParamValue.request_with_body(&[param, value], fields.body())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param_with_values(values: &[&str]) -> Param {
        let mut p = Param::new("p1", "lr");
        p.values = values.iter().map(|v| ParamValue::new(*v, *v)).collect();
        p
    }

    #[test]
    fn unset_default_falls_back_to_first_value() {
        let p = param_with_values(&["a", "b"]);
        assert_eq!(p.effective_default(), Some("a"));
        assert_eq!(p.effective_deprecated(), Some("a"));

        let mut p = p;
        p.default_param_value = Some("b".into());
        assert_eq!(p.effective_default(), Some("b"));
        assert_eq!(p.effective_deprecated(), Some("a"));
    }

    #[test]
    fn empty_values_present_no_selector() {
        let p = param_with_values(&[]);
        assert_eq!(p.effective_default(), None);
        assert_eq!(p.value_selectors(), None);
    }

    #[test]
    fn value_refs_accept_every_wire_shape() {
        let p: Param = serde_json::from_value(json!({
            "uuid": "p1",
            "name": "lr",
            "values": [{"uuid": "a", "name": "0.1"}],
            "default_param_value": {"uuid": "a", "name": "0.1"},
            "deprecated_param_value": {},
        }))
        .expect("param");
        assert_eq!(p.default_param_value.as_deref(), Some("a"));
        assert_eq!(p.deprecated_param_value, None);
        assert_eq!(p.effective_deprecated(), Some("a"));

        let p: Param = serde_json::from_value(json!({
            "uuid": "p1",
            "name": "lr",
            "default_param_value": "b",
            "deprecated_param_value": "",
        }))
        .expect("param");
        assert_eq!(p.default_param_value.as_deref(), Some("b"));
        assert_eq!(p.deprecated_param_value, None);
    }

    #[test]
    fn groups_sort_and_blank_group_is_general() {
        let mut a = Param::new("a", "a");
        a.group = "Optimizer".into();
        let b = Param::new("b", "b");
        let mut c = Param::new("c", "c");
        c.group = "Data".into();
        let params = vec![a, b, c];

        let groups = group_params(&params);
        let keys: Vec<&str> = groups.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["", "Data", "Optimizer"]);
        assert_eq!(display_group(""), "General");
        assert_eq!(params[1].group_label(), "General");
    }

    #[test]
    fn rank_order_is_ascending() {
        let mut a = Param::new("a", "a");
        a.sorting = 3;
        let mut b = Param::new("b", "b");
        b.sorting = 1;
        let params = vec![a, b];
        let uuids: Vec<&str> = sorted_by_rank(&params).iter().map(|p| p.uuid.as_str()).collect();
        assert_eq!(uuids, vec!["b", "a"]);
    }

    #[test]
    fn mutation_requests_match_backend_routes() {
        let fields = ParamFields {
            name: "lr".into(),
            condition: "".into(),
            default_param_value: "a".into(),
            deprecated_param_value: "a".into(),
        };
        let req = create_param_request(&fields).expect("create");
        assert_eq!(req.path, "/add_param");
        assert_eq!(req.body.as_ref().map(|b| &b["config"]), Some(&json!({})));

        assert_eq!(edit_param_request("p1", &fields).expect("edit").path, "/edit_param/p1");
        assert_eq!(reorder_param_request("p1", 7).expect("reorder").path, "/reorder_param/p1/7");
        assert_eq!(force_param_request("p1", true).expect("force").path, "/force_param/p1/1");
        assert_eq!(force_param_request("p1", false).expect("force").path, "/force_param/p1/0");

        let req = create_batch_request(json!({})).expect("batch");
        assert_eq!(req.body, Some(json!({"config": {}})));

        let vf = ParamValueFields {
            name: "lr_$T0$".into(),
            is_template: true,
            template_defaults: vec![json!("0.1")],
            ..Default::default()
        };
        let req = edit_value_request("p1", "v1", &vf).expect("value");
        assert_eq!(req.path, "/edit_param_value/p1/v1");
        let body = req.body.expect("body");
        assert_eq!(body["isTemplate"], json!(true));
        assert_eq!(body["config"], json!({}));
    }
}
