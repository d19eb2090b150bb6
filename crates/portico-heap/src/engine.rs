//! The heap engine: an in-process object heap implementing the full
//! engine seam.
//!
//! All state lives behind one mutex, taken per operation and released
//! before any script, accessor, or host call runs, so reentrant
//! operations started from inside a script can take it again. Nothing
//! here is thread-affine; the context-yield hooks keep their default
//! no-op behavior.
//!
//! # Reachability
//!
//! The collector's roots are every context's global object, the
//! per-kind extern prototypes, and every non-plain object (externs and
//! script bindings are pinned, since the host or a register holds them
//! by id). Plain objects survive only while reachable from a root.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use portico_types::{ContextId, ExternKind, ObjectId, PropKey, TermValue};
use portico_vm::{CallSite, EngineError, HostInvoker, ScriptEngine};
use tracing::{debug, trace, warn};

use crate::object::{trace_term, HeapObject, ObjectKind, Slot};
use crate::script::{ScriptFn, ScriptScope};

struct HeapState {
    /// Context id to its global object.
    contexts: HashMap<ContextId, ObjectId>,
    objects: HashMap<ObjectId, HeapObject>,
    extern_protos: HashMap<ExternKind, ObjectId>,
}

/// See the [module docs](self).
pub struct HeapEngine {
    default_ctx: ContextId,
    terminated: AtomicBool,
    state: Mutex<HeapState>,
    scripts: RwLock<HashMap<String, ScriptFn>>,
}

impl HeapEngine {
    /// An engine with its default context and the per-kind extern
    /// prototypes pre-built.
    #[must_use]
    pub fn new() -> Self {
        let mut objects = HashMap::new();
        let global = ObjectId::new();
        objects.insert(global, HeapObject::plain());

        let default_ctx = ContextId::new();
        let mut contexts = HashMap::new();
        contexts.insert(default_ctx, global);

        let mut extern_protos = HashMap::new();
        for kind in ExternKind::ALL {
            let proto = ObjectId::new();
            objects.insert(proto, HeapObject::plain());
            extern_protos.insert(kind, proto);
        }

        Self {
            default_ctx,
            terminated: AtomicBool::new(false),
            state: Mutex::new(HeapState {
                contexts,
                objects,
                extern_protos,
            }),
            scripts: RwLock::new(HashMap::new()),
        }
    }

    /// Registers (or replaces) a named script.
    pub fn define_script<F>(&self, name: impl Into<String>, body: F)
    where
        F: Fn(&mut ScriptScope<'_>, Vec<TermValue>) -> Result<TermValue, EngineError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        debug!(script = %name, "script defined");
        self.scripts.write().insert(name, Arc::new(body));
    }

    /// Allocates an unrooted plain object. It is reclaimed by the next
    /// collection unless attached to something reachable first.
    #[must_use]
    pub fn alloc_object(&self) -> ObjectId {
        let id = ObjectId::new();
        self.state.lock().objects.insert(id, HeapObject::plain());
        id
    }

    /// Allocates a plain object with `count` internal slots.
    #[must_use]
    pub fn alloc_with_internals(&self, count: usize) -> ObjectId {
        let id = ObjectId::new();
        self.state
            .lock()
            .objects
            .insert(id, HeapObject::with_internals(count));
        id
    }

    /// A callable backed by the named script. The binding is pinned;
    /// the name is resolved at each call.
    #[must_use]
    pub fn bind_script(&self, name: impl Into<String>) -> TermValue {
        let id = ObjectId::new();
        self.state
            .lock()
            .objects
            .insert(id, HeapObject::script(name.into()));
        TermValue::Fun(id)
    }

    /// Live object count, collection targets included.
    #[must_use]
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub(crate) fn global_of(&self, ctx: ContextId) -> Result<ObjectId, EngineError> {
        self.state
            .lock()
            .contexts
            .get(&ctx)
            .copied()
            .ok_or(EngineError::UnknownContext(ctx))
    }

    fn guard(&self) -> Result<(), EngineError> {
        if self.terminated.load(Ordering::SeqCst) {
            Err(EngineError::terminated())
        } else {
            Ok(())
        }
    }

    fn run_script(
        &self,
        name: &str,
        context: ContextId,
        args: Vec<TermValue>,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        let script = self
            .scripts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownScript(name.to_string()))?;
        trace!(script = name, context = %context, "running script");
        let mut scope = ScriptScope {
            engine: self,
            context,
            host,
        };
        script(&mut scope, args)
    }

    /// Property read with prototype-chain walk; runs a getter (outside
    /// the state lock) when the owning slot is an accessor.
    pub(crate) fn get_with(
        &self,
        obj: ObjectId,
        key: &PropKey,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        enum Lookup {
            Value(TermValue),
            Getter(TermValue),
            Missing,
        }

        let found = {
            let state = self.state.lock();
            if !state.objects.contains_key(&obj) {
                return Err(EngineError::UnknownObject(obj));
            }
            let mut visited = HashSet::new();
            let mut current = Some(obj);
            let mut found = Lookup::Missing;
            while let Some(id) = current {
                if !visited.insert(id) {
                    // Prototype cycle; treat as chain end.
                    break;
                }
                let Some(object) = state.objects.get(&id) else {
                    break;
                };
                match object.own_slot(key) {
                    Some(Slot::Value(v)) => {
                        found = Lookup::Value(v.clone());
                        break;
                    }
                    Some(Slot::Accessor { getter, .. }) => {
                        found = match getter {
                            Some(g) => Lookup::Getter(g.clone()),
                            None => Lookup::Value(TermValue::Undefined),
                        };
                        break;
                    }
                    None => current = object.proto,
                }
            }
            found
        };

        match found {
            Lookup::Value(v) => Ok(v),
            Lookup::Getter(getter) => self.call_with(getter, Vec::new(), host),
            Lookup::Missing => Ok(TermValue::Undefined),
        }
    }

    /// Property write. An accessor on the object's own slot runs its
    /// setter (a getter-only accessor swallows the write); otherwise
    /// the value is stored, shadowing any prototype property.
    pub(crate) fn set_with(
        &self,
        obj: ObjectId,
        key: PropKey,
        value: TermValue,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        let setter = {
            let mut state = self.state.lock();
            let object = state
                .objects
                .get_mut(&obj)
                .ok_or(EngineError::UnknownObject(obj))?;
            match object.own_slot(&key) {
                Some(Slot::Accessor { setter, .. }) => setter.clone(),
                _ => {
                    object.put_value(key, value.clone());
                    None
                }
            }
        };
        if let Some(setter) = setter {
            self.call_with(setter, vec![value.clone()], host)?;
        }
        Ok(value)
    }

    fn invoke(
        &self,
        fun: TermValue,
        args: Vec<TermValue>,
        host: &mut dyn HostInvoker,
        is_construct: bool,
    ) -> Result<TermValue, EngineError> {
        enum Callee {
            Host(TermValue),
            Script(String),
        }

        let Some(id) = fun.as_object() else {
            return Err(EngineError::NotCallable(fun));
        };
        let callee = {
            let state = self.state.lock();
            let object = state
                .objects
                .get(&id)
                .ok_or(EngineError::UnknownObject(id))?;
            match &object.kind {
                ObjectKind::Extern {
                    kind: ExternKind::Fun,
                    term,
                } => Callee::Host(term.clone()),
                ObjectKind::Script { name } => Callee::Script(name.clone()),
                _ => return Err(EngineError::NotCallable(fun)),
            }
        };

        match callee {
            Callee::Host(target) => {
                let this = match self.global_of(self.default_ctx) {
                    Ok(global) => TermValue::Obj(global),
                    Err(_) => TermValue::Undefined,
                };
                let site = CallSite {
                    context: self.default_ctx,
                    this,
                    holder: fun,
                    is_construct,
                };
                host.call_host(target, site, args)
            }
            Callee::Script(name) => self.run_script(&name, self.default_ctx, args, host),
        }
    }

    pub(crate) fn call_with(
        &self,
        fun: TermValue,
        args: Vec<TermValue>,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.invoke(fun, args, host, false)
    }
}

impl Default for HeapEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptEngine for HeapEngine {
    fn default_context(&self) -> ContextId {
        self.default_ctx
    }

    fn new_context(&self) -> Result<ContextId, EngineError> {
        self.guard()?;
        let mut state = self.state.lock();
        let global = ObjectId::new();
        state.objects.insert(global, HeapObject::plain());
        let ctx = ContextId::new();
        state.contexts.insert(ctx, global);
        debug!(context = %ctx, "context created");
        Ok(ctx)
    }

    fn dispose_context(&self, ctx: ContextId) -> Result<(), EngineError> {
        self.guard()?;
        if ctx == self.default_ctx {
            return Err(EngineError::BadArgument(
                "the default context cannot be disposed".into(),
            ));
        }
        match self.state.lock().contexts.remove(&ctx) {
            Some(_) => {
                debug!(context = %ctx, "context disposed");
                Ok(())
            }
            None => Err(EngineError::UnknownContext(ctx)),
        }
    }

    fn global(&self, ctx: ContextId) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Obj(self.global_of(ctx)?))
    }

    fn get(
        &self,
        obj: ObjectId,
        key: &PropKey,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        self.get_with(obj, key, host)
    }

    fn set(
        &self,
        obj: ObjectId,
        key: PropKey,
        value: TermValue,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        self.set_with(obj, key, value, host)
    }

    fn delete(&self, obj: ObjectId, key: &PropKey) -> Result<bool, EngineError> {
        self.guard()?;
        let mut state = self.state.lock();
        let object = state
            .objects
            .get_mut(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        Ok(object.remove(key))
    }

    fn get_proto(&self, obj: ObjectId) -> Result<TermValue, EngineError> {
        self.guard()?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        Ok(match object.proto {
            Some(proto) => TermValue::Obj(proto),
            None => TermValue::Undefined,
        })
    }

    fn set_proto(&self, obj: ObjectId, proto: TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        let mut state = self.state.lock();
        let new_proto = match &proto {
            TermValue::Undefined => None,
            other => match other.as_object() {
                Some(id) if state.objects.contains_key(&id) => Some(id),
                Some(id) => return Err(EngineError::UnknownObject(id)),
                // Non-object prototypes are ignored, not an error.
                None => return Ok(false),
            },
        };
        let object = state
            .objects
            .get_mut(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        object.proto = new_proto;
        Ok(true)
    }

    fn get_hidden(&self, obj: ObjectId, key: &str) -> Result<TermValue, EngineError> {
        self.guard()?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        Ok(object.hidden_get(key).cloned().unwrap_or(TermValue::Undefined))
    }

    fn set_hidden(
        &self,
        obj: ObjectId,
        key: String,
        value: TermValue,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        let mut state = self.state.lock();
        let object = state
            .objects
            .get_mut(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        object.hidden_put(key, value.clone());
        Ok(value)
    }

    fn set_accessor(
        &self,
        obj: ObjectId,
        key: PropKey,
        getter: Option<TermValue>,
        setter: Option<TermValue>,
    ) -> Result<bool, EngineError> {
        self.guard()?;
        let mut state = self.state.lock();
        let object = state
            .objects
            .get_mut(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        object.put_accessor(key, getter, setter);
        Ok(true)
    }

    fn proplist(&self, obj: ObjectId) -> Result<Vec<(TermValue, TermValue)>, EngineError> {
        self.guard()?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        Ok(object.proplist())
    }

    fn list_elements(&self, obj: ObjectId) -> Result<Vec<TermValue>, EngineError> {
        self.guard()?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        Ok(object.element_run())
    }

    fn equals(&self, a: &TermValue, b: &TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(match (a, b) {
            (TermValue::Int(i), TermValue::Float(x))
            | (TermValue::Float(x), TermValue::Int(i)) => (*i as f64) == *x,
            _ => a == b,
        })
    }

    fn strict_equals(&self, a: &TermValue, b: &TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(a == b)
    }

    fn taint(&self, value: TermValue) -> Result<TermValue, EngineError> {
        self.guard()?;
        let mut objects = Vec::new();
        let mut contexts = Vec::new();
        trace_term(&value, &mut objects, &mut contexts);
        let state = self.state.lock();
        for id in objects {
            if !state.objects.contains_key(&id) {
                return Err(EngineError::UnknownObject(id));
            }
        }
        for id in contexts {
            if !state.contexts.contains_key(&id) {
                return Err(EngineError::UnknownContext(id));
            }
        }
        Ok(value)
    }

    fn externalize(&self, kind: ExternKind, term: TermValue) -> Result<TermValue, EngineError> {
        self.guard()?;
        let mut state = self.state.lock();
        let proto = state.extern_protos[&kind];
        let id = ObjectId::new();
        state
            .objects
            .insert(id, HeapObject::extern_term(kind, term, proto));
        Ok(if kind == ExternKind::Fun {
            TermValue::Fun(id)
        } else {
            TermValue::Extern(id)
        })
    }

    fn extern_proto(&self, kind: ExternKind) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Obj(self.state.lock().extern_protos[&kind]))
    }

    fn internal_count(&self, obj: ObjectId) -> Result<usize, EngineError> {
        self.guard()?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        Ok(object.internal_count())
    }

    fn get_internal(&self, obj: ObjectId, index: usize) -> Result<TermValue, EngineError> {
        self.guard()?;
        let state = self.state.lock();
        let object = state
            .objects
            .get(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        object
            .internal_get(index)
            .cloned()
            .ok_or(EngineError::InternalOutOfRange { object: obj, index })
    }

    fn set_internal(
        &self,
        obj: ObjectId,
        index: usize,
        value: TermValue,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        let mut state = self.state.lock();
        let object = state
            .objects
            .get_mut(&obj)
            .ok_or(EngineError::UnknownObject(obj))?;
        if object.internal_set(index, value.clone()) {
            Ok(value)
        } else {
            Err(EngineError::InternalOutOfRange { object: obj, index })
        }
    }

    fn call(
        &self,
        fun: TermValue,
        args: Vec<TermValue>,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        self.invoke(fun, args, host, false)
    }

    fn construct(
        &self,
        fun: TermValue,
        args: Vec<TermValue>,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        self.invoke(fun, args, host, true)
    }

    fn eval(
        &self,
        ctx: ContextId,
        source: &str,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        if !self.state.lock().contexts.contains_key(&ctx) {
            return Err(EngineError::UnknownContext(ctx));
        }
        self.run_script(source, ctx, Vec::new(), host)
    }

    fn to_string(&self, value: &TermValue) -> Result<String, EngineError> {
        self.guard()?;
        match value.as_object() {
            Some(id) => {
                let state = self.state.lock();
                let object = state
                    .objects
                    .get(&id)
                    .ok_or(EngineError::UnknownObject(id))?;
                Ok(match &object.kind {
                    ObjectKind::Plain => "#<object>".to_string(),
                    ObjectKind::Script { name } => format!("#<script {name}>"),
                    ObjectKind::Extern { kind, .. } => format!("#<extern {kind}>"),
                })
            }
            None => Ok(value.to_string()),
        }
    }

    fn to_detail_string(&self, value: &TermValue) -> Result<String, EngineError> {
        self.guard()?;
        match value.as_object() {
            Some(id) => {
                let state = self.state.lock();
                let object = state
                    .objects
                    .get(&id)
                    .ok_or(EngineError::UnknownObject(id))?;
                Ok(match &object.kind {
                    ObjectKind::Plain => format!(
                        "#<object {} props, {} internals>",
                        object.prop_count(),
                        object.internal_count()
                    ),
                    ObjectKind::Script { name } => format!("#<script {name}>"),
                    ObjectKind::Extern { kind, term } => format!("#<extern {kind} {term}>"),
                })
            }
            None => Ok(value.to_string()),
        }
    }

    fn collect_garbage(&self) -> Result<usize, EngineError> {
        self.guard()?;
        let mut state = self.state.lock();

        let mut marked: HashSet<ObjectId> = HashSet::new();
        let mut work: Vec<ObjectId> = Vec::new();
        for global in state.contexts.values() {
            work.push(*global);
        }
        for proto in state.extern_protos.values() {
            work.push(*proto);
        }
        for (id, object) in &state.objects {
            if !matches!(object.kind, ObjectKind::Plain) {
                work.push(*id);
            }
        }

        while let Some(id) = work.pop() {
            if !marked.insert(id) {
                continue;
            }
            let Some(object) = state.objects.get(&id) else {
                continue;
            };
            let mut objects = Vec::new();
            let mut contexts = Vec::new();
            object.trace(&mut objects, &mut contexts);
            work.extend(objects);
            for ctx in contexts {
                if let Some(global) = state.contexts.get(&ctx) {
                    work.push(*global);
                }
            }
        }

        let before = state.objects.len();
        state.objects.retain(|id, _| marked.contains(id));
        let reclaimed = before - state.objects.len();
        debug!(reclaimed, live = state.objects.len(), "collection finished");
        Ok(reclaimed)
    }

    fn terminate(&self) {
        warn!("hard abort: terminating heap engine");
        self.terminated.store(true, Ordering::SeqCst);
    }
}
