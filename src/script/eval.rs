//! Script interpreter - walks the AST against a [`ScriptScope`]

use rustc_hash::FxHashMap;
use serde_json::{json, Map, Number, Value};
use tracing::{info, warn};

use super::parser::{BinOp, Expr, Stmt, UnOp};
use super::{ScriptHost, ScriptScope};
use crate::dom::NodeId;
use crate::error::{Result, TesseraError};
use crate::event::{EngineEvent, WriteSource};
use crate::util::constants::DATA_ROOT;
use crate::util::{columns_to_records, jsonpath};

/// Runtime value: JSON, or a resolved document node (list for looped nodes)
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Val {
    Json(Value),
    Node(NodeId),
    Nodes(Vec<NodeId>),
}

impl Val {
    fn null() -> Self {
        Val::Json(Value::Null)
    }

    fn into_json(self) -> Value {
        match self {
            Val::Json(v) => v,
            Val::Node(_) => Value::String("[node]".into()),
            Val::Nodes(list) => Value::from(vec![Value::String("[node]".into()); list.len()]),
        }
    }
}

/// JSON number from an f64, integral values as integers
pub(crate) fn number(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        Value::Number((n as i64).into())
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

/// Text form used for concatenation, node text and attributes
pub(crate) fn display(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truthy(val: &Val) -> bool {
    match val {
        Val::Json(Value::Null) => false,
        Val::Json(Value::Bool(b)) => *b,
        Val::Json(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Val::Json(Value::String(s)) => !s.is_empty(),
        _ => true,
    }
}

enum Flow {
    Next,
    Return(Val),
}

/// Assignment path step
enum Key {
    Field(String),
    Index(usize),
}

pub(crate) struct Frame<'a> {
    pub host: &'a ScriptHost,
    pub scope: &'a dyn ScriptScope,
    pub name: &'a str,
    pub depth: usize,
    pub locals: FxHashMap<String, Val>,
}

impl Frame<'_> {
    fn fail(&self, reason: impl Into<String>) -> TesseraError {
        TesseraError::ScriptRuntime {
            name: self.name.to_string(),
            reason: reason.into(),
        }
    }

    /// Run a body; the value of the first `return`, or null
    pub fn run(&mut self, body: &[Stmt]) -> Result<Value> {
        match self.block(body)? {
            Flow::Return(val) => Ok(val.into_json()),
            Flow::Next => Ok(Value::Null),
        }
    }

    fn block(&mut self, body: &[Stmt]) -> Result<Flow> {
        for stmt in body {
            match stmt {
                Stmt::Let(name, expr) => {
                    let val = self.eval(expr)?;
                    self.locals.insert(name.clone(), val);
                }
                Stmt::Assign(target, expr) => {
                    let val = self.eval(expr)?;
                    self.assign(target, val)?;
                }
                Stmt::If(cond, then, otherwise) => {
                    let branch = if truthy(&self.eval(cond)?) { then } else { otherwise };
                    if let Flow::Return(val) = self.block(branch)? {
                        return Ok(Flow::Return(val));
                    }
                }
                Stmt::Return(expr) => {
                    let val = match expr {
                        Some(expr) => self.eval(expr)?,
                        None => Val::null(),
                    };
                    return Ok(Flow::Return(val));
                }
                Stmt::Expr(expr) => {
                    self.eval(expr)?;
                }
            }
        }
        Ok(Flow::Next)
    }

    // ═══════════════════════════════════════════
    // READS
    // ═══════════════════════════════════════════

    fn eval(&mut self, expr: &Expr) -> Result<Val> {
        Ok(match expr {
            Expr::Lit(value) => Val::Json(value.clone()),
            Expr::Var(name) => self.lookup(name)?,
            Expr::Member(base, prop) => {
                let base = self.eval(base)?;
                self.member(base, prop)?
            }
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.json(index)?;
                self.index(base, &index)?
            }
            Expr::Call(callee, args) => self.call(callee, args)?,
            Expr::Unary(op, operand) => {
                let val = self.eval(operand)?;
                match op {
                    UnOp::Not => Val::Json(Value::Bool(!truthy(&val))),
                    UnOp::Neg => {
                        let n = self.num(&val.into_json(), "-")?;
                        Val::Json(number(-n))
                    }
                }
            }
            Expr::Binary(op, lhs, rhs) => self.binary(*op, lhs, rhs)?,
            Expr::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.json(item)?);
                }
                Val::Json(Value::Array(out))
            }
            Expr::Object(fields) => {
                let mut out = Map::new();
                for (key, item) in fields {
                    out.insert(key.clone(), self.json(item)?);
                }
                Val::Json(Value::Object(out))
            }
        })
    }

    fn json(&mut self, expr: &Expr) -> Result<Value> {
        Ok(self.eval(expr)?.into_json())
    }

    fn lookup(&self, name: &str) -> Result<Val> {
        if let Some(val) = self.locals.get(name) {
            return Ok(val.clone());
        }
        let scope = self.scope;
        Ok(Val::Json(match name {
            "data" => scope.model().get(DATA_ROOT).unwrap_or(Value::Null),
            "model" => scope.model().get("").unwrap_or(Value::Null),
            "state" => Value::Object(scope.state().borrow().clone()),
            "view" => json!({ "id": scope.view_id() }),
            _ => return Err(self.fail(format!("unknown variable '{name}'"))),
        }))
    }

    fn member(&self, base: Val, prop: &str) -> Result<Val> {
        Ok(match base {
            Val::Node(id) => Val::Json(self.node_prop(id, prop)),
            Val::Nodes(list) if prop == "length" => Val::Json(Value::from(list.len())),
            Val::Nodes(_) => return Err(self.fail(format!("'{prop}' on a node list; index it first"))),
            Val::Json(value) => Val::Json(match (&value, prop) {
                (Value::Array(items), "length") => Value::from(items.len()),
                (Value::String(s), "length") => Value::from(s.chars().count()),
                _ => value.get(prop).cloned().unwrap_or(Value::Null),
            }),
        })
    }

    fn index(&self, base: Val, index: &Value) -> Result<Val> {
        Ok(match (base, index) {
            (Val::Nodes(list), Value::Number(n)) => n
                .as_u64()
                .and_then(|i| list.get(i as usize).copied())
                .map_or(Val::null(), Val::Node),
            (Val::Json(Value::Array(items)), Value::Number(n)) => Val::Json(
                n.as_u64()
                    .and_then(|i| items.get(i as usize).cloned())
                    .unwrap_or(Value::Null),
            ),
            (Val::Json(Value::Object(map)), Value::String(key)) => {
                Val::Json(map.get(key).cloned().unwrap_or(Value::Null))
            }
            (Val::Json(_), _) => Val::null(),
            (_, other) => return Err(self.fail(format!("cannot index a node with {other}"))),
        })
    }

    fn node_prop(&self, id: NodeId, prop: &str) -> Value {
        let document = self.scope.document();
        match prop {
            "textContent" | "text" | "innerText" => Value::String(document.text_content(id)),
            "innerHTML" => Value::String(document.inner_html(id)),
            _ => document
                .attribute(id, prop)
                .map_or(Value::Null, Value::String),
        }
    }

    // ═══════════════════════════════════════════
    // OPERATORS
    // ═══════════════════════════════════════════

    fn num(&self, value: &Value, op: &str) -> Result<f64> {
        value
            .as_f64()
            .ok_or_else(|| self.fail(format!("'{op}' expects numbers, got {value}")))
    }

    fn binary(&mut self, op: BinOp, lhs: &Expr, rhs: &Expr) -> Result<Val> {
        // Short-circuit operators yield an operand, not a boolean
        match op {
            BinOp::And => {
                let left = self.eval(lhs)?;
                return if truthy(&left) { self.eval(rhs) } else { Ok(left) };
            }
            BinOp::Or => {
                let left = self.eval(lhs)?;
                return if truthy(&left) { Ok(left) } else { self.eval(rhs) };
            }
            _ => {}
        }

        let left = self.json(lhs)?;
        let right = self.json(rhs)?;
        let out = match op {
            BinOp::Add => match (&left, &right) {
                (Value::String(_), _) | (_, Value::String(_)) => {
                    Value::String(display(&left) + &display(&right))
                }
                _ => number(self.num(&left, "+")? + self.num(&right, "+")?),
            },
            BinOp::Sub => number(self.num(&left, "-")? - self.num(&right, "-")?),
            BinOp::Mul => number(self.num(&left, "*")? * self.num(&right, "*")?),
            BinOp::Div | BinOp::Rem => {
                let (a, b) = (self.num(&left, "/")?, self.num(&right, "/")?);
                if b == 0.0 {
                    return Err(self.fail("division by zero"));
                }
                number(if op == BinOp::Div { a / b } else { a % b })
            }
            BinOp::Eq => Value::Bool(loose_eq(&left, &right)),
            BinOp::Ne => Value::Bool(!loose_eq(&left, &right)),
            // Comparisons; && and || returned above
            _ => {
                let ordering = match (&left, &right) {
                    (Value::String(a), Value::String(b)) => a.cmp(b),
                    _ => {
                        let (a, b) = (self.num(&left, "<")?, self.num(&right, "<")?);
                        a.partial_cmp(&b)
                            .ok_or_else(|| self.fail("cannot compare NaN"))?
                    }
                };
                Value::Bool(match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                })
            }
        };
        Ok(Val::Json(out))
    }

    // ═══════════════════════════════════════════
    // CALLS
    // ═══════════════════════════════════════════

    fn call(&mut self, callee: &Expr, args: &[Expr]) -> Result<Val> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.json(arg)?);
        }

        match callee {
            Expr::Var(name) if !self.locals.contains_key(name) => match name.as_str() {
                "script" => {
                    let target = values
                        .first()
                        .and_then(Value::as_str)
                        .ok_or_else(|| self.fail("script() expects a name"))?;
                    self.invoke(target)
                }
                "len" => {
                    let n = match values.first() {
                        Some(Value::Array(items)) => items.len(),
                        Some(Value::Object(map)) => map.len(),
                        Some(Value::String(s)) => s.chars().count(),
                        _ => 0,
                    };
                    Ok(Val::Json(Value::from(n)))
                }
                "str" => Ok(Val::Json(Value::String(
                    values.first().map(display).unwrap_or_default(),
                ))),
                "num" => Ok(Val::Json(match values.first() {
                    Some(Value::Number(n)) => Value::Number(n.clone()),
                    Some(Value::String(s)) => s.trim().parse::<f64>().map_or(Value::Null, number),
                    Some(Value::Bool(b)) => Value::from(u8::from(*b)),
                    _ => Value::Null,
                })),
                "log" => {
                    let line: Vec<String> = values.iter().map(display).collect();
                    info!(script = %self.name, "{}", line.join(" "));
                    Ok(Val::null())
                }
                other => Err(self.fail(format!("'{other}' is not callable"))),
            },
            Expr::Member(base, method) => match (&**base, method.as_str()) {
                (Expr::Var(root), "get_records") if root == "self" => {
                    let columns = match values.first() {
                        Some(Value::String(field)) => {
                            let path = jsonpath::join(DATA_ROOT, field);
                            self.scope.model().get(&path).unwrap_or(Value::Null)
                        }
                        Some(other) => other.clone(),
                        None => return Err(self.fail("get_records() expects a field")),
                    };
                    Ok(Val::Json(Value::Array(columns_to_records(&columns))))
                }
                (Expr::Var(root), target) if root == "self" => self.invoke(target),
                (Expr::Var(root), "invalidate_render") if root == "view" => {
                    self.scope.invalidate_render();
                    Ok(Val::null())
                }
                _ => Err(self.fail(format!("'{method}' is not callable"))),
            },
            _ => Err(self.fail("expression is not callable")),
        }
    }

    fn invoke(&self, target: &str) -> Result<Val> {
        let value = self
            .host
            .run_at(target, self.scope, self.depth + 1)?
            .unwrap_or(Value::Null);
        Ok(Val::Json(value))
    }

    // ═══════════════════════════════════════════
    // WRITES
    // ═══════════════════════════════════════════

    fn place(&mut self, expr: &Expr, keys: &mut Vec<Key>) -> Result<String> {
        match expr {
            Expr::Var(name) => Ok(name.clone()),
            Expr::Member(base, prop) => {
                let root = self.place(base, keys)?;
                keys.push(Key::Field(prop.clone()));
                Ok(root)
            }
            Expr::Index(base, index) => {
                let root = self.place(base, keys)?;
                let key = match self.json(index)? {
                    Value::Number(n) => n
                        .as_u64()
                        .map(|i| Key::Index(i as usize))
                        .ok_or_else(|| self.fail(format!("invalid index {n}")))?,
                    Value::String(s) => Key::Field(s),
                    other => return Err(self.fail(format!("invalid index {other}"))),
                };
                keys.push(key);
                Ok(root)
            }
            _ => Err(self.fail("invalid assignment target")),
        }
    }

    fn assign(&mut self, target: &Expr, value: Val) -> Result<()> {
        let mut keys = Vec::new();
        let root = self.place(target, &mut keys)?;

        if let Some(local) = self.locals.get_mut(&root) {
            return match (local, keys.as_slice()) {
                (slot, []) => {
                    *slot = value;
                    Ok(())
                }
                (Val::Node(id), [Key::Field(prop)]) => {
                    let id = *id;
                    self.set_node_prop(id, prop, &value.into_json())
                }
                (Val::Nodes(list), [Key::Index(i), Key::Field(prop)]) => {
                    let id = list.get(*i).copied();
                    match id {
                        Some(id) => self.set_node_prop(id, prop, &value.into_json()),
                        None => Err(self.fail(format!("no instance {i} of '{root}'"))),
                    }
                }
                (Val::Json(current), keys) => {
                    jsonpath::set(current, &segments(keys), value.into_json())?;
                    Ok(())
                }
                _ => Err(self.fail(format!("cannot assign into node '{root}'"))),
            };
        }

        match root.as_str() {
            "data" | "model" => {
                if keys.is_empty() {
                    return Err(self.fail(format!("cannot replace '{root}' itself")));
                }
                let mut path = path_string(&keys);
                if root == "data" {
                    path = jsonpath::join(DATA_ROOT, &path);
                }
                self.write_model(path, value.into_json());
                Ok(())
            }
            "state" => {
                let state = self.scope.state();
                let mut current = Value::Object(std::mem::take(&mut *state.borrow_mut()));
                let result = jsonpath::set(&mut current, &segments(&keys), value.into_json());
                if let Value::Object(map) = current {
                    *state.borrow_mut() = map;
                }
                result.map(|_| ())
            }
            _ if keys.is_empty() => {
                self.locals.insert(root, value);
                Ok(())
            }
            _ => Err(self.fail(format!("unknown variable '{root}'"))),
        }
    }

    /// Script writes go straight to the model; a failed write is logged and
    /// dropped, the script continues
    fn write_model(&self, path: String, value: Value) {
        let log = self.scope.events();
        match self.scope.model().set_batch(vec![(path.clone(), value)]) {
            Ok(()) => {
                log.emit(EngineEvent::ModelWritten {
                    source: WriteSource::Script,
                    fields: vec![path],
                });
            }
            Err(err) => {
                warn!(script = %self.name, path = %path, error = %err, "Script model write dropped");
                log.emit(EngineEvent::ModelWriteFailed {
                    fields: vec![path],
                    error: err.to_string(),
                });
            }
        }
    }

    fn set_node_prop(&self, id: NodeId, prop: &str, value: &Value) -> Result<()> {
        let document = self.scope.document();
        match prop {
            "textContent" | "text" | "innerText" => document.set_text_content(id, &display(value)),
            "innerHTML" => document.set_inner_html(id, &display(value))?,
            _ => match value {
                Value::Null | Value::Bool(false) => document.remove_attribute(id, prop),
                other => document.set_attribute(id, prop, &display(other)),
            },
        }
        Ok(())
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn segments(keys: &[Key]) -> Vec<jsonpath::Segment> {
    keys.iter()
        .map(|k| match k {
            Key::Field(name) => jsonpath::Segment::Field(name.clone()),
            Key::Index(i) => jsonpath::Segment::Index(*i),
        })
        .collect()
}

fn path_string(keys: &[Key]) -> String {
    keys.iter()
        .map(|k| match k {
            Key::Field(name) => name.clone(),
            Key::Index(i) => i.to_string(),
        })
        .collect::<Vec<_>>()
        .join(".")
}
