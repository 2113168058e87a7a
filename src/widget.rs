//! Widget definition - the declarative input of a view
//!
//! ```yaml
//! template: |
//!   <input id="field" value="${value}" onchange="${_changed}"/>
//!   <div id="label-{id}">${data.label}</div>
//! methods: [_changed]
//! attrs:
//!   field:
//!     - attr: value
//!       pattern: "{value}"
//! events:
//!   field: { change: true }
//! children:
//!   label: child_field          # or a literal list of markup strings
//! looped: []
//! scripts:
//!   render: "state.renders = (state.renders || 0) + 1"
//!   value: "label.textContent = data.value"
//! ```
//!
//! Templates delivered HTML-escaped (no `<` at all) and every script source
//! are entity-decoded once, on load.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, TesseraError};
use crate::util::entities;

/// One attribute → fields mapping
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AttrSpec {
    /// DOM attribute to read
    pub attr: String,
    /// Token pattern, e.g. `"{value}"` or `"item-{row}-{col}"`
    pub pattern: String,
    /// Model fields the pattern writes; defaults to its placeholders
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

/// Where a children slot gets its entries
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ChildrenSource {
    /// Data field holding the child models
    Field(String),
    /// Static markup entries
    Literal(Vec<String>),
}

impl ChildrenSource {
    pub fn field(&self) -> Option<&str> {
        match self {
            ChildrenSource::Field(field) => Some(field),
            ChildrenSource::Literal(_) => None,
        }
    }
}

/// Widget definition as written (raw)
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WidgetRaw {
    #[serde(default)]
    name: Option<String>,
    template: String,
    #[serde(default)]
    methods: Vec<String>,
    #[serde(default)]
    attrs: BTreeMap<String, Vec<AttrSpec>>,
    #[serde(default)]
    events: BTreeMap<String, BTreeMap<String, bool>>,
    #[serde(default)]
    children: BTreeMap<String, ChildrenSource>,
    #[serde(default)]
    looped: Vec<String>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
}

/// Decoded widget definition
#[derive(Debug, Clone, PartialEq)]
pub struct WidgetDefinition {
    pub name: Option<String>,
    pub template: String,
    pub methods: Vec<String>,
    pub attrs: BTreeMap<String, Vec<AttrSpec>>,
    /// node → event → re-run attribute extraction after forwarding
    pub events: BTreeMap<String, BTreeMap<String, bool>>,
    pub children: BTreeMap<String, ChildrenSource>,
    pub looped: Vec<String>,
    pub scripts: BTreeMap<String, String>,
}

impl<'de> Deserialize<'de> for WidgetDefinition {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = WidgetRaw::deserialize(deserializer)?;
        let template = if raw.template.contains('<') {
            raw.template
        } else {
            entities::decode(&raw.template).into_owned()
        };
        Ok(WidgetDefinition {
            name: raw.name,
            template,
            methods: raw.methods,
            attrs: raw.attrs,
            events: raw.events,
            children: raw.children,
            looped: raw.looped,
            scripts: raw
                .scripts
                .into_iter()
                .map(|(name, source)| (name, entities::decode(&source).into_owned()))
                .collect(),
        })
    }
}

impl WidgetDefinition {
    /// Definition with only a template
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            name: None,
            template: template.into(),
            methods: Vec::new(),
            attrs: BTreeMap::new(),
            events: BTreeMap::new(),
            children: BTreeMap::new(),
            looped: Vec::new(),
            scripts: BTreeMap::new(),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(yaml)?;
        if definition.template.trim().is_empty() {
            return Err(TesseraError::DefinitionParse {
                details: "template is empty".into(),
            });
        }
        Ok(definition)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    // Builder helpers, mostly for hosts assembling definitions in code

    pub fn with_method(mut self, method: &str) -> Self {
        self.methods.push(method.to_string());
        self
    }

    pub fn with_attr(mut self, node: &str, attr: &str, pattern: &str) -> Self {
        self.attrs.entry(node.to_string()).or_default().push(AttrSpec {
            attr: attr.to_string(),
            pattern: pattern.to_string(),
            fields: None,
        });
        self
    }

    pub fn with_event(mut self, node: &str, event: &str, reextract: bool) -> Self {
        self.events
            .entry(node.to_string())
            .or_default()
            .insert(event.to_string(), reextract);
        self
    }

    pub fn with_children(mut self, node: &str, source: ChildrenSource) -> Self {
        self.children.insert(node.to_string(), source);
        self
    }

    pub fn with_looped(mut self, node: &str) -> Self {
        self.looped.push(node.to_string());
        self
    }

    pub fn with_script(mut self, name: &str, source: &str) -> Self {
        self.scripts.insert(name.to_string(), source.to_string());
        self
    }
}
