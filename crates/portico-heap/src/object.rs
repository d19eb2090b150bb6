//! Heap object representation.
//!
//! Objects are property bags with three keyspaces (ordered visible
//! properties, hidden properties, indexed internal slots), an optional
//! prototype link, and a kind that decides callability:
//!
//! | Kind | Callable | Backing |
//! |------|----------|---------|
//! | `Plain` | no | |
//! | `Script` | yes | a named script in the engine's registry |
//! | `Extern` | if `ExternKind::Fun` | a host term; calls round-trip through the host |

use portico_types::{ContextId, ExternKind, ObjectId, PropKey, TermValue};

/// A visible property: either a direct value or an accessor pair.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Value(TermValue),
    Accessor {
        getter: Option<TermValue>,
        setter: Option<TermValue>,
    },
}

#[derive(Debug, Clone)]
pub(crate) enum ObjectKind {
    Plain,
    /// Callable backed by a registered script.
    Script { name: String },
    /// An externalized host term. `Fun` externs are callable.
    Extern { kind: ExternKind, term: TermValue },
}

#[derive(Debug, Clone)]
pub(crate) struct HeapObject {
    /// Visible properties in insertion order; writes to an existing
    /// key keep its position.
    props: Vec<(PropKey, Slot)>,
    hidden: Vec<(String, TermValue)>,
    internals: Vec<TermValue>,
    pub(crate) proto: Option<ObjectId>,
    pub(crate) kind: ObjectKind,
}

impl HeapObject {
    pub(crate) fn plain() -> Self {
        Self {
            props: Vec::new(),
            hidden: Vec::new(),
            internals: Vec::new(),
            proto: None,
            kind: ObjectKind::Plain,
        }
    }

    /// A plain object with `count` internal slots, all `Undefined`.
    /// The slot count is fixed for the object's lifetime.
    pub(crate) fn with_internals(count: usize) -> Self {
        let mut obj = Self::plain();
        obj.internals = vec![TermValue::Undefined; count];
        obj
    }

    pub(crate) fn script(name: String) -> Self {
        let mut obj = Self::plain();
        obj.kind = ObjectKind::Script { name };
        obj
    }

    pub(crate) fn extern_term(kind: ExternKind, term: TermValue, proto: ObjectId) -> Self {
        let mut obj = Self::plain();
        obj.kind = ObjectKind::Extern { kind, term };
        obj.proto = Some(proto);
        obj
    }

    pub(crate) fn own_slot(&self, key: &PropKey) -> Option<&Slot> {
        self.props.iter().find(|(k, _)| k == key).map(|(_, s)| s)
    }

    fn put_slot(&mut self, key: PropKey, slot: Slot) {
        match self.props.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = slot,
            None => self.props.push((key, slot)),
        }
    }

    pub(crate) fn put_value(&mut self, key: PropKey, value: TermValue) {
        self.put_slot(key, Slot::Value(value));
    }

    pub(crate) fn put_accessor(
        &mut self,
        key: PropKey,
        getter: Option<TermValue>,
        setter: Option<TermValue>,
    ) {
        self.put_slot(key, Slot::Accessor { getter, setter });
    }

    /// Removes a visible property; returns whether it existed.
    pub(crate) fn remove(&mut self, key: &PropKey) -> bool {
        let before = self.props.len();
        self.props.retain(|(k, _)| k != key);
        self.props.len() != before
    }

    /// Own visible properties in order. Accessor slots surface as
    /// `Undefined`; reading through them requires `get`.
    pub(crate) fn proplist(&self) -> Vec<(TermValue, TermValue)> {
        self.props
            .iter()
            .map(|(k, slot)| {
                let value = match slot {
                    Slot::Value(v) => v.clone(),
                    Slot::Accessor { .. } => TermValue::Undefined,
                };
                (k.to_term(), value)
            })
            .collect()
    }

    /// The dense integer-keyed prefix: values at keys `0, 1, 2, ...`
    /// up to the first gap.
    pub(crate) fn element_run(&self) -> Vec<TermValue> {
        let mut elements = Vec::new();
        for index in 0.. {
            match self.own_slot(&PropKey::Int(index)) {
                Some(Slot::Value(v)) => elements.push(v.clone()),
                _ => break,
            }
        }
        elements
    }

    pub(crate) fn hidden_get(&self, key: &str) -> Option<&TermValue> {
        self.hidden.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub(crate) fn hidden_put(&mut self, key: String, value: TermValue) {
        match self.hidden.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = value,
            None => self.hidden.push((key, value)),
        }
    }

    pub(crate) fn internal_count(&self) -> usize {
        self.internals.len()
    }

    pub(crate) fn internal_get(&self, index: usize) -> Option<&TermValue> {
        self.internals.get(index)
    }

    /// Writes an internal slot in place; `false` when out of range.
    pub(crate) fn internal_set(&mut self, index: usize, value: TermValue) -> bool {
        match self.internals.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub(crate) fn prop_count(&self) -> usize {
        self.props.len()
    }

    /// Appends every object and context id this object keeps alive:
    /// slot values, accessor sides, hidden values, internal slots, the
    /// prototype, and an extern's captured term.
    pub(crate) fn trace(&self, objects: &mut Vec<ObjectId>, contexts: &mut Vec<ContextId>) {
        for (_, slot) in &self.props {
            match slot {
                Slot::Value(v) => trace_term(v, objects, contexts),
                Slot::Accessor { getter, setter } => {
                    if let Some(g) = getter {
                        trace_term(g, objects, contexts);
                    }
                    if let Some(s) = setter {
                        trace_term(s, objects, contexts);
                    }
                }
            }
        }
        for (_, v) in &self.hidden {
            trace_term(v, objects, contexts);
        }
        for v in &self.internals {
            trace_term(v, objects, contexts);
        }
        if let Some(proto) = self.proto {
            objects.push(proto);
        }
        if let ObjectKind::Extern { term, .. } = &self.kind {
            trace_term(term, objects, contexts);
        }
    }
}

/// Collects the object and context ids reachable from one term.
pub(crate) fn trace_term(
    term: &TermValue,
    objects: &mut Vec<ObjectId>,
    contexts: &mut Vec<ContextId>,
) {
    match term {
        TermValue::Obj(id) | TermValue::Fun(id) | TermValue::Extern(id) => objects.push(*id),
        TermValue::Ctx(id) => contexts.push(*id),
        TermValue::List(items) => {
            for item in items {
                trace_term(item, objects, contexts);
            }
        }
        _ => {}
    }
}
