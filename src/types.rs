//! Core types for weft.
//!
//! These types define the foundation that everything builds on: the
//! description tree handed in by render requests, the dynamic prop values
//! that cross the transport boundary, and the effect flags the reconciler
//! attaches to fibers.

use std::fmt;
use std::rc::Rc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::events::EventBinding;
use crate::hooks::HookCtx;

// =============================================================================
// Node type names
// =============================================================================

/// Host type of the synthetic root fiber that wraps every render request.
pub const ROOT_TYPE: &str = "#root";

/// Host type of implicit text nodes produced by scalar children.
pub const TEXT_TYPE: &str = "#text";

/// Prop carrying the content of a text node.
pub const NODE_VALUE: &str = "node_value";

// =============================================================================
// Value
// =============================================================================

/// A dynamic prop value.
///
/// Props, hook state, event payloads and client parameters are all plain
/// data so they can cross a process or worker boundary. Equality is value
/// equality; the prop differ relies on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Ordered name/value pairs. Order is preserved, not significant for
    /// equality of the consumer, but kept stable for determinism.
    Map(Vec<(String, Value)>),
}

impl Value {
    /// True for `Null` and `Bool` - the child positions that vanish during
    /// normalization.
    pub fn is_void_child(&self) -> bool {
        matches!(self, Value::Null | Value::Bool(_))
    }

    /// Display form of a scalar, for consumers rendering text-node
    /// content (the `node_value` prop carries the raw value).
    ///
    /// Returns `None` for values that are not scalars (lists and maps are
    /// malformed in child position).
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::Int(n) => Some(n.to_string()),
            Value::Float(n) => Some(n.to_string()),
            Value::Str(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

// =============================================================================
// Keys
// =============================================================================

/// Ordering identity for list reconciliation.
///
/// Children carrying the same key across generations are matched to each
/// other regardless of position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key(pub String);

impl From<&str> for Key {
    fn from(v: &str) -> Self {
        Key(v.to_string())
    }
}

impl From<String> for Key {
    fn from(v: String) -> Self {
        Key(v)
    }
}

impl From<i64> for Key {
    fn from(v: i64) -> Self {
        Key(v.to_string())
    }
}

// =============================================================================
// Components
// =============================================================================

/// A pure component: props in, child description out.
///
/// State lives in hook cells reached through the [`HookCtx`], never in the
/// closure itself. Component identity for diffing is the `Rc` allocation -
/// clone the same `Rc` into every generation that should reuse the fiber.
pub type ComponentFn = Rc<dyn Fn(&Props, &mut HookCtx<'_>) -> Node>;

/// What a tree position renders as: a host tag or a component function.
#[derive(Clone)]
pub enum NodeKind {
    /// Host node consumed by the output surface, named by tag.
    Host(String),
    /// Component function resolved during reconciliation.
    Component(ComponentFn),
}

impl NodeKind {
    /// Type equality for diffing: host tags compare by name, components by
    /// function identity.
    pub fn same_type(&self, other: &NodeKind) -> bool {
        match (self, other) {
            (NodeKind::Host(a), NodeKind::Host(b)) => a == b,
            (NodeKind::Component(a), NodeKind::Component(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Host tag name, if this is a host kind.
    pub fn host_tag(&self) -> Option<&str> {
        match self {
            NodeKind::Host(tag) => Some(tag),
            NodeKind::Component(_) => None,
        }
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Host(tag) => write!(f, "Host({tag:?})"),
            NodeKind::Component(_) => write!(f, "Component(..)"),
        }
    }
}

// =============================================================================
// Descriptions
// =============================================================================

/// One node of the declarative description tree.
#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub key: Option<Key>,
    pub props: Props,
}

impl Node {
    /// Describe a host node.
    pub fn host(tag: impl Into<String>) -> Self {
        Self {
            kind: NodeKind::Host(tag.into()),
            key: None,
            props: Props::default(),
        }
    }

    /// Describe a component invocation.
    pub fn component(f: ComponentFn) -> Self {
        Self {
            kind: NodeKind::Component(f),
            key: None,
            props: Props::default(),
        }
    }

    /// Describe an explicit text node.
    pub fn text(content: impl Into<String>) -> Self {
        Self::host(TEXT_TYPE).attr(NODE_VALUE, Value::Str(content.into()))
    }

    /// Set the reconciliation key.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set a prop.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.props.set_attr(name, value);
        self
    }

    /// Bind an event.
    pub fn on(mut self, event: impl Into<String>, binding: EventBinding) -> Self {
        self.props.set_event(event, binding);
        self
    }

    /// Append a child.
    pub fn child(mut self, child: impl Into<Child>) -> Self {
        self.props.children.push(child.into());
        self
    }

    /// Append several children.
    pub fn children(mut self, children: impl IntoIterator<Item = Child>) -> Self {
        self.props.children.extend(children);
        self
    }
}

/// A child position of a description.
///
/// Scalars become implicit text nodes; `Null` and booleans vanish; a `Many`
/// flattens one level (fragment semantics).
#[derive(Debug, Clone)]
pub enum Child {
    Node(Node),
    Value(Value),
    Many(Vec<Child>),
}

impl From<Node> for Child {
    fn from(node: Node) -> Self {
        Child::Node(node)
    }
}

impl From<Value> for Child {
    fn from(value: Value) -> Self {
        Child::Value(value)
    }
}

impl From<&str> for Child {
    fn from(text: &str) -> Self {
        Child::Value(Value::Str(text.to_string()))
    }
}

impl From<Vec<Child>> for Child {
    fn from(children: Vec<Child>) -> Self {
        Child::Many(children)
    }
}

// =============================================================================
// Props
// =============================================================================

/// Ordered props of a description or fiber.
///
/// Attributes, event bindings and children are kept in separate ordered
/// lists: attributes are plain data, bindings carry a local listener that
/// never crosses the transport, and children drive reconciliation rather
/// than the prop differ.
#[derive(Debug, Clone, Default)]
pub struct Props {
    attrs: Vec<(String, Value)>,
    events: Vec<(String, EventBinding)>,
    pub children: Vec<Child>,
}

impl Props {
    /// Set or replace an attribute, preserving first-set order.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    /// Set or replace an event binding.
    pub fn set_event(&mut self, event: impl Into<String>, binding: EventBinding) {
        let event = event.into();
        match self.events.iter_mut().find(|(n, _)| *n == event) {
            Some(entry) => entry.1 = binding,
            None => self.events.push((event, binding)),
        }
    }

    /// Look up an attribute by name.
    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attrs.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Attributes in insertion order.
    pub fn attrs(&self) -> &[(String, Value)] {
        &self.attrs
    }

    /// Event bindings in insertion order.
    pub fn events(&self) -> &[(String, EventBinding)] {
        &self.events
    }
}

// =============================================================================
// Effect flags
// =============================================================================

bitflags! {
    /// Effect tags attached to fibers during reconciliation and consumed by
    /// the commit walk.
    ///
    /// PLACEMENT, UPDATE and DELETION are mutually exclusive on a fiber;
    /// REORDER only accompanies a keyed UPDATE whose sibling position
    /// changed.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EffectFlags: u8 {
        const PLACEMENT = 1 << 0;
        const UPDATE = 1 << 1;
        const DELETION = 1 << 2;
        const REORDER = 1 << 3;
    }
}

impl EffectFlags {
    /// No effect recorded.
    pub const NONE: EffectFlags = EffectFlags::empty();
}

// =============================================================================
// Tests
// =============================================================================
