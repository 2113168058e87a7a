//! Binding registry - declarative bindings per named node
//!
//! Built once per view from the widget definition and its compiled template.
//! Holds what to bind; `runtime::view` materializes it against the document.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use super::pattern::{self, TokenPattern};
use crate::error::{Result, TesseraError};
use crate::template::{CompiledTemplate, Handler};
use crate::util::constants::LIFECYCLE_SCRIPTS;
use crate::util::jsonpath;
use crate::widget::{ChildrenSource, WidgetDefinition};

/// DOM attribute → model fields, through a token pattern
#[derive(Debug, Clone)]
pub struct AttrBinding {
    pub attr: String,
    pub pattern: TokenPattern,
}

impl AttrBinding {
    pub fn fields(&self) -> &[String] {
        self.pattern.names()
    }
}

/// DOM event forwarded to the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBinding {
    pub event: String,
    /// Re-run attribute extraction on the node after forwarding
    pub reextract: bool,
}

/// Slot whose content is a list of child components
#[derive(Debug, Clone, PartialEq)]
pub struct ChildrenBinding {
    pub node: Arc<str>,
    pub source: ChildrenSource,
    /// Node is instantiated once per entry
    pub looped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptTrigger {
    /// `render`, `after_layout` or `remove`
    Lifecycle,
    /// Change of a data field (relative path)
    Field(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptBinding {
    pub name: Arc<str>,
    pub trigger: ScriptTrigger,
    pub source: String,
}

/// Callback declared in the template (`on<event>="${...}"`)
pub type CallbackBinding = Handler;

#[derive(Debug, Clone, Default)]
pub struct BindingRegistry {
    attrs: BTreeMap<Arc<str>, Vec<AttrBinding>>,
    events: BTreeMap<Arc<str>, Vec<EventBinding>>,
    children: BTreeMap<Arc<str>, ChildrenBinding>,
    scripts: Vec<ScriptBinding>,
    callbacks: Vec<CallbackBinding>,
}

impl BindingRegistry {
    pub fn build(definition: &WidgetDefinition, template: &CompiledTemplate) -> Result<Self> {
        let mut registry = Self {
            callbacks: template.handlers().to_vec(),
            ..Self::default()
        };

        for (node, specs) in &definition.attrs {
            let mut bindings = Vec::with_capacity(specs.len());
            for spec in specs {
                let fields = spec
                    .fields
                    .clone()
                    .unwrap_or_else(|| pattern::placeholders(&spec.pattern));
                if fields.is_empty() {
                    return Err(TesseraError::InvalidBinding {
                        node: node.clone(),
                        reason: format!(
                            "attribute '{}' pattern '{}' names no field",
                            spec.attr, spec.pattern
                        ),
                    });
                }
                bindings.push(AttrBinding {
                    attr: spec.attr.clone(),
                    pattern: TokenPattern::compile(&spec.pattern, &fields)?,
                });
            }
            registry.attrs.insert(node.as_str().into(), bindings);
        }

        for (node, events) in &definition.events {
            let mut bindings = Vec::with_capacity(events.len());
            for (event, reextract) in events {
                if event.is_empty() {
                    return Err(TesseraError::InvalidBinding {
                        node: node.clone(),
                        reason: "empty event name".into(),
                    });
                }
                bindings.push(EventBinding {
                    event: event.clone(),
                    reextract: *reextract,
                });
            }
            registry.events.insert(node.as_str().into(), bindings);
        }

        for (node, source) in &definition.children {
            let node: Arc<str> = node.as_str().into();
            registry.children.insert(
                Arc::clone(&node),
                ChildrenBinding {
                    looped: definition.looped.iter().any(|l| **l == *node),
                    node,
                    source: source.clone(),
                },
            );
        }
        for looped in &definition.looped {
            if !definition.children.contains_key(looped) {
                warn!(node = %looped, "Looped node has no children binding; ignored");
            }
        }

        for (name, source) in &definition.scripts {
            let trigger = if LIFECYCLE_SCRIPTS.contains(&name.as_str()) {
                ScriptTrigger::Lifecycle
            } else {
                ScriptTrigger::Field(name.clone())
            };
            registry.scripts.push(ScriptBinding {
                name: name.as_str().into(),
                trigger,
                source: source.clone(),
            });
        }

        for node in registry.bound_nodes() {
            if !template.has_node(node) {
                warn!(node = %node, "Binding targets a node the template does not declare");
            }
        }

        Ok(registry)
    }

    /// Nodes with attribute bindings
    pub fn attrs(&self) -> impl Iterator<Item = (&Arc<str>, &[AttrBinding])> {
        self.attrs.iter().map(|(n, b)| (n, b.as_slice()))
    }

    pub fn attrs_for(&self, node: &str) -> &[AttrBinding] {
        self.attrs.get(node).map_or(&[], Vec::as_slice)
    }

    pub fn has_attrs(&self, node: &str) -> bool {
        self.attrs.contains_key(node)
    }

    pub fn events(&self) -> impl Iterator<Item = (&Arc<str>, &[EventBinding])> {
        self.events.iter().map(|(n, b)| (n, b.as_slice()))
    }

    pub fn children(&self) -> impl Iterator<Item = &ChildrenBinding> {
        self.children.values()
    }

    pub fn children_for(&self, node: &str) -> Option<&ChildrenBinding> {
        self.children.get(node)
    }

    /// Children binding whose source field a change at `path` touches
    pub fn children_for_field(&self, path: &str) -> Option<&ChildrenBinding> {
        self.children
            .values()
            .find(|c| c.source.field().is_some_and(|field| touches(field, path)))
    }

    pub fn scripts(&self) -> &[ScriptBinding] {
        &self.scripts
    }

    /// Scripts whose field a change at `path` touches: the field itself,
    /// one of its ancestors or one of its descendants
    pub fn scripts_for_field<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a ScriptBinding> {
        self.scripts.iter().filter(move |s| match &s.trigger {
            ScriptTrigger::Field(field) => touches(field, path),
            ScriptTrigger::Lifecycle => false,
        })
    }

    pub fn callbacks(&self) -> &[CallbackBinding] {
        &self.callbacks
    }

    /// Every node any binding refers to
    pub fn bound_nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self
            .attrs
            .keys()
            .chain(self.events.keys())
            .chain(self.children.keys())
            .map(|n| &**n)
            .collect();
        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }
}

/// A change at `path` rewrites `field` when one contains the other
fn touches(field: &str, path: &str) -> bool {
    jsonpath::within(path, field) || jsonpath::within(field, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::compile;

    fn registry(def: &WidgetDefinition) -> Result<BindingRegistry> {
        let template = compile(&def.template, &def.methods)?;
        BindingRegistry::build(def, &template)
    }

    #[test]
    fn fields_default_to_placeholders() {
        let def = WidgetDefinition::new("<li id=\"cell\"></li>").with_attr(
            "cell",
            "data-pos",
            "item-{row}-{col}",
        );
        let reg = registry(&def).unwrap();
        let binding = &reg.attrs_for("cell")[0];
        assert_eq!(binding.fields(), &["row".to_string(), "col".to_string()]);
        assert!(reg.attrs_for("other").is_empty());
    }

    #[test]
    fn pattern_without_fields_is_invalid() {
        let def = WidgetDefinition::new("<p id=\"p\"></p>").with_attr("p", "title", "static");
        let err = registry(&def).unwrap_err();
        assert!(matches!(err, TesseraError::InvalidBinding { .. }));
    }

    #[test]
    fn looped_needs_children_binding() {
        let def = WidgetDefinition::new("<ul><li id=\"row\"></li><li id=\"lone\"></li></ul>")
            .with_children("row", ChildrenSource::Field("rows".into()))
            .with_looped("row")
            .with_looped("lone");
        let reg = registry(&def).unwrap();
        assert!(reg.children_for("row").is_some_and(|c| c.looped));
        assert!(reg.children_for("lone").is_none());
        assert_eq!(reg.children_for_field("rows").map(|c| &*c.node), Some("row"));
        assert_eq!(reg.children_for_field("rows.2.name").map(|c| &*c.node), Some("row"));
        assert!(reg.children_for_field("rowsx").is_none());
    }

    #[test]
    fn script_triggers() {
        let def = WidgetDefinition::new("<p id=\"p\"></p>")
            .with_script("render", "state.a = 1")
            .with_script("style", "state.b = 1");
        let reg = registry(&def).unwrap();
        assert_eq!(reg.scripts_for_field("style").count(), 1);
        assert_eq!(reg.scripts_for_field("style.color").count(), 1);
        assert_eq!(reg.scripts_for_field("styles").count(), 0);
        assert_eq!(reg.scripts_for_field("render").count(), 0);
    }

    #[test]
    fn replacing_a_parent_touches_nested_field_scripts() {
        let def = WidgetDefinition::new("<p id=\"p\"></p>").with_script("style.color", "state.c = 1");
        let reg = registry(&def).unwrap();
        assert_eq!(reg.scripts_for_field("style").count(), 1);
        assert_eq!(reg.scripts_for_field("style.color").count(), 1);
        assert_eq!(reg.scripts_for_field("style.size").count(), 0);
    }

    #[test]
    fn callbacks_come_from_template() {
        let def = WidgetDefinition::new("<button id=\"b\" onclick=\"${_go}\"></button>")
            .with_method("_go")
            .with_event("b", "keydown", false);
        let reg = registry(&def).unwrap();
        assert_eq!(reg.callbacks().len(), 1);
        assert_eq!(reg.bound_nodes(), vec!["b"]);
    }
}
