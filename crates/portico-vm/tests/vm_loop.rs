//! End-to-end loop behavior over a real bound worker: transport
//! guarantees, the reentrant call protocol, and shutdown.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use parking_lot::Mutex;
use portico_types::{CallToken, ContextId, ExternKind, ObjectId, PropKey, TermValue};
use portico_vm::{
    EngineError, HostInvoker, HostMessage, QueueMailbox, ScriptEngine, VmBuilder, VmHandle,
    VmPhase,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct EngineState {
    props: HashMap<(ObjectId, PropKey), TermValue>,
    externs: HashMap<ObjectId, TermValue>,
}

/// A property-bag engine: enough state to give the loop real work.
/// Externalized `Fun` terms become callables that round-trip through
/// the host invoker.
struct MockEngine {
    default_ctx: ContextId,
    global_obj: ObjectId,
    terminated: AtomicBool,
    state: Mutex<EngineState>,
}

impl MockEngine {
    fn new() -> Self {
        Self {
            default_ctx: ContextId::new(),
            global_obj: ObjectId::new(),
            terminated: AtomicBool::new(false),
            state: Mutex::new(EngineState::default()),
        }
    }

    fn guard(&self) -> Result<(), EngineError> {
        if self.terminated.load(Ordering::SeqCst) {
            Err(EngineError::terminated())
        } else {
            Ok(())
        }
    }
}

impl ScriptEngine for MockEngine {
    fn default_context(&self) -> ContextId {
        self.default_ctx
    }

    fn new_context(&self) -> Result<ContextId, EngineError> {
        self.guard()?;
        Ok(ContextId::new())
    }

    fn dispose_context(&self, _ctx: ContextId) -> Result<(), EngineError> {
        self.guard()
    }

    fn global(&self, _ctx: ContextId) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Obj(self.global_obj))
    }

    fn get(
        &self,
        obj: ObjectId,
        key: &PropKey,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        let state = self.state.lock();
        Ok(state
            .props
            .get(&(obj, key.clone()))
            .cloned()
            .unwrap_or(TermValue::Undefined))
    }

    fn set(
        &self,
        obj: ObjectId,
        key: PropKey,
        value: TermValue,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        self.state.lock().props.insert((obj, key), value.clone());
        Ok(value)
    }

    fn delete(&self, obj: ObjectId, key: &PropKey) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(self.state.lock().props.remove(&(obj, key.clone())).is_some())
    }

    fn get_proto(&self, _obj: ObjectId) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Undefined)
    }

    fn set_proto(&self, _obj: ObjectId, _proto: TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(true)
    }

    fn get_hidden(&self, _obj: ObjectId, _key: &str) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Undefined)
    }

    fn set_hidden(
        &self,
        _obj: ObjectId,
        _key: String,
        value: TermValue,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(value)
    }

    fn set_accessor(
        &self,
        _obj: ObjectId,
        _key: PropKey,
        _getter: Option<TermValue>,
        _setter: Option<TermValue>,
    ) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(false)
    }

    fn proplist(&self, obj: ObjectId) -> Result<Vec<(TermValue, TermValue)>, EngineError> {
        self.guard()?;
        let state = self.state.lock();
        Ok(state
            .props
            .iter()
            .filter(|((o, _), _)| *o == obj)
            .map(|((_, k), v)| (k.to_term(), v.clone()))
            .collect())
    }

    fn list_elements(&self, _obj: ObjectId) -> Result<Vec<TermValue>, EngineError> {
        self.guard()?;
        Ok(Vec::new())
    }

    fn equals(&self, a: &TermValue, b: &TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(a == b)
    }

    fn strict_equals(&self, a: &TermValue, b: &TermValue) -> Result<bool, EngineError> {
        self.guard()?;
        Ok(a == b)
    }

    fn taint(&self, value: TermValue) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(value)
    }

    fn externalize(&self, _kind: ExternKind, term: TermValue) -> Result<TermValue, EngineError> {
        self.guard()?;
        let id = ObjectId::new();
        self.state.lock().externs.insert(id, term);
        Ok(TermValue::Extern(id))
    }

    fn extern_proto(&self, _kind: ExternKind) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Obj(ObjectId::new()))
    }

    fn internal_count(&self, _obj: ObjectId) -> Result<usize, EngineError> {
        self.guard()?;
        Ok(0)
    }

    fn get_internal(&self, obj: ObjectId, index: usize) -> Result<TermValue, EngineError> {
        self.guard()?;
        Err(EngineError::InternalOutOfRange { object: obj, index })
    }

    fn set_internal(
        &self,
        obj: ObjectId,
        index: usize,
        _value: TermValue,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Err(EngineError::InternalOutOfRange { object: obj, index })
    }

    fn call(
        &self,
        fun: TermValue,
        args: Vec<TermValue>,
        host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        let Some(id) = fun.as_object() else {
            return Err(EngineError::NotCallable(fun));
        };
        let Some(target) = self.state.lock().externs.get(&id).cloned() else {
            return Err(EngineError::NotCallable(fun));
        };
        let site = portico_vm::CallSite {
            context: self.default_ctx,
            this: TermValue::Undefined,
            holder: fun,
            is_construct: false,
        };
        host.call_host(target, site, args)
    }

    fn construct(
        &self,
        fun: TermValue,
        _args: Vec<TermValue>,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Err(EngineError::NotCallable(fun))
    }

    fn eval(
        &self,
        _ctx: ContextId,
        _source: &str,
        _host: &mut dyn HostInvoker,
    ) -> Result<TermValue, EngineError> {
        self.guard()?;
        Ok(TermValue::Undefined)
    }

    fn to_string(&self, value: &TermValue) -> Result<String, EngineError> {
        self.guard()?;
        Ok(value.to_string())
    }

    fn to_detail_string(&self, value: &TermValue) -> Result<String, EngineError> {
        self.guard()?;
        Ok(format!("{value:?}"))
    }

    fn collect_garbage(&self) -> Result<usize, EngineError> {
        self.guard()?;
        Ok(0)
    }

    fn terminate(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }
}

fn bound_vm() -> (VmHandle, mpsc::Receiver<HostMessage>) {
    let vm = VmBuilder::new(Arc::new(MockEngine::new())).build();
    let (mailbox, inbox) = QueueMailbox::channel();
    vm.bind_host(Arc::new(mailbox)).expect("bind host endpoint");
    (vm, inbox)
}

fn recv(inbox: &mpsc::Receiver<HostMessage>) -> HostMessage {
    inbox.recv_timeout(RECV_TIMEOUT).expect("host message")
}

fn recv_result(inbox: &mpsc::Receiver<HostMessage>) -> (Option<CallToken>, TermValue) {
    match recv(inbox) {
        HostMessage::Result { token, value } => (token, value),
        other => panic!("expected a result, got {other:?}"),
    }
}

#[test]
fn every_tick_is_answered_in_per_producer_order() {
    const PRODUCERS: usize = 8;
    const TICKS_EACH: usize = 50;

    let (vm, inbox) = bound_vm();

    let mut senders = Vec::new();
    for p in 0..PRODUCERS {
        let vm = vm.clone();
        senders.push(std::thread::spawn(move || {
            for i in 0..TICKS_EACH {
                let tag = TermValue::Str(format!("p{p}-{i}"));
                vm.tick(None, TermValue::command("taint", vec![tag]))
                    .expect("tick accepted");
            }
        }));
    }
    for s in senders {
        s.join().expect("producer thread");
    }

    let mut per_producer: HashMap<String, Vec<usize>> = HashMap::new();
    for _ in 0..PRODUCERS * TICKS_EACH {
        let (_, value) = recv_result(&inbox);
        let tag = value.as_str().expect("taint echoes the string").to_string();
        let (producer, seq) = tag.split_once('-').expect("tag shape");
        per_producer
            .entry(producer.to_string())
            .or_default()
            .push(seq.parse().expect("sequence number"));
    }

    assert_eq!(per_producer.len(), PRODUCERS);
    for (producer, seen) in per_producer {
        assert_eq!(seen.len(), TICKS_EACH, "{producer} lost ticks");
        let mut sorted = seen.clone();
        sorted.sort_unstable();
        assert_eq!(seen, sorted, "{producer} replies out of order");
    }
}

#[test]
fn property_round_trip_through_the_loop() {
    let (vm, inbox) = bound_vm();
    let global = vm.global(vm.context()).expect("global");

    vm.tick(
        None,
        TermValue::command(
            "set",
            vec![global.clone(), TermValue::Str("answer".into()), TermValue::Int(42)],
        ),
    )
    .expect("set tick");
    assert_eq!(recv_result(&inbox).1, TermValue::Int(42));

    vm.tick(
        None,
        TermValue::command("get", vec![global, TermValue::Str("answer".into())]),
    )
    .expect("get tick");
    assert_eq!(recv_result(&inbox).1, TermValue::Int(42));
}

#[test]
fn reentrant_call_round_trips_through_the_host() {
    let (vm, inbox) = bound_vm();

    vm.tick(
        None,
        TermValue::command(
            "externalize",
            vec![TermValue::Str("fun".into()), TermValue::Str("adder".into())],
        ),
    )
    .expect("externalize tick");
    let (_, fun) = recv_result(&inbox);
    assert!(matches!(fun, TermValue::Extern(_)));

    let call_token = CallToken::new();
    vm.tick(
        Some(call_token),
        TermValue::command(
            "call",
            vec![
                fun,
                TermValue::List(vec![TermValue::Int(20), TermValue::Int(22)]),
            ],
        ),
    )
    .expect("call tick");

    // The engine calls back into the host; service the invocation.
    let invocation = match recv(&inbox) {
        HostMessage::Invoke {
            target,
            invocation,
            args,
        } => {
            assert_eq!(target, TermValue::Str("adder".into()));
            assert!(!invocation.is_construct);
            let sum: i64 = args.iter().filter_map(TermValue::as_int).sum();
            assert_eq!(sum, 42);
            invocation
        }
        other => panic!("expected an invocation, got {other:?}"),
    };
    vm.tick(
        Some(invocation.token),
        TermValue::command("result", vec![TermValue::Int(42)]),
    )
    .expect("result tick");

    let (token, value) = recv_result(&inbox);
    assert_eq!(token, Some(call_token));
    assert_eq!(value, TermValue::Int(42));
}

#[test]
fn unrelated_ticks_wait_for_the_pending_call() {
    let (vm, inbox) = bound_vm();

    vm.tick(
        None,
        TermValue::command(
            "externalize",
            vec![TermValue::Str("fun".into()), TermValue::Str("cb".into())],
        ),
    )
    .expect("externalize tick");
    let (_, fun) = recv_result(&inbox);

    let call_token = CallToken::new();
    vm.tick(Some(call_token), TermValue::command("call", vec![fun]))
        .expect("call tick");

    let invocation = match recv(&inbox) {
        HostMessage::Invoke { invocation, .. } => invocation,
        other => panic!("expected an invocation, got {other:?}"),
    };

    // These arrive while the call frame is pending; the loop must not
    // consume them until the call resolves.
    for i in 0..3 {
        vm.tick(None, TermValue::command("taint", vec![TermValue::Int(i)]))
            .expect("queued tick");
    }
    vm.tick(
        Some(invocation.token),
        TermValue::command("result", vec![TermValue::Str("done".into())]),
    )
    .expect("result tick");

    // Call result first, then the deferred ticks in arrival order.
    let (token, value) = recv_result(&inbox);
    assert_eq!(token, Some(call_token));
    assert_eq!(value, TermValue::Str("done".into()));
    for i in 0..3 {
        assert_eq!(recv_result(&inbox).1, TermValue::Int(i));
    }
}

#[test]
fn nested_calls_resolve_at_depth_50() {
    const DEPTH: usize = 50;

    let (vm, inbox) = bound_vm();

    vm.tick(
        None,
        TermValue::command(
            "externalize",
            vec![TermValue::Str("fun".into()), TermValue::Str("recurse".into())],
        ),
    )
    .expect("externalize tick");
    let (_, fun) = recv_result(&inbox);

    let root_token = CallToken::new();
    vm.tick(
        Some(root_token),
        TermValue::command("call", vec![fun.clone()]),
    )
    .expect("root call tick");

    let mut invocation_tokens: HashSet<CallToken> = HashSet::new();
    let mut depth = 0usize;
    let final_value = loop {
        match recv(&inbox) {
            HostMessage::Invoke { invocation, .. } => {
                assert!(
                    invocation_tokens.insert(invocation.token),
                    "tokens are never reused"
                );
                depth += 1;
                if depth < DEPTH {
                    // Deepen: the reply to this invocation performs
                    // another call, correlated so the awaiting frame
                    // dispatches it.
                    vm.tick(
                        Some(invocation.token),
                        TermValue::command("call", vec![fun.clone()]),
                    )
                    .expect("deepening tick");
                } else {
                    vm.tick(
                        Some(invocation.token),
                        TermValue::command("result", vec![TermValue::Int(depth as i64)]),
                    )
                    .expect("innermost result tick");
                }
            }
            HostMessage::Result { token, value } => {
                if token == Some(root_token) {
                    break value;
                }
                // An inner call command finished; resolve the frame
                // that awaits this token with the same value.
                let token = token.expect("inner results are correlated");
                assert!(invocation_tokens.contains(&token));
                vm.tick(Some(token), TermValue::command("result", vec![value]))
                    .expect("unwinding result tick");
            }
            other => panic!("unexpected message: {other:?}"),
        }
    };

    assert_eq!(depth, DEPTH);
    assert_eq!(final_value, TermValue::Int(DEPTH as i64));
}

#[test]
fn out_of_order_replies_park_until_their_frame() {
    let (vm, inbox) = bound_vm();

    vm.tick(
        None,
        TermValue::command(
            "externalize",
            vec![TermValue::Str("fun".into()), TermValue::Str("cb".into())],
        ),
    )
    .expect("externalize tick");
    let (_, fun) = recv_result(&inbox);

    let root_token = CallToken::new();
    vm.tick(
        Some(root_token),
        TermValue::command("call", vec![fun.clone()]),
    )
    .expect("root call tick");
    let outer = match recv(&inbox) {
        HostMessage::Invoke { invocation, .. } => invocation.token,
        other => panic!("expected an invocation, got {other:?}"),
    };

    // Deepen once: the outer frame dispatches a second call.
    vm.tick(Some(outer), TermValue::command("call", vec![fun]))
        .expect("deepening tick");
    let inner = match recv(&inbox) {
        HostMessage::Invoke { invocation, .. } => invocation.token,
        other => panic!("expected an invocation, got {other:?}"),
    };
    assert_ne!(outer, inner);

    // Reply to the outer call first, while the inner frame is the one
    // waiting. Its token does not match, so the inner frame parks the
    // reply instead of consuming it.
    vm.tick(
        Some(outer),
        TermValue::command("result", vec![TermValue::Str("outer".into())]),
    )
    .expect("early outer reply");
    vm.tick(
        Some(inner),
        TermValue::command("result", vec![TermValue::Str("inner".into())]),
    )
    .expect("inner reply");

    // The inner call command completes with the inner reply; the
    // parked outer reply then resolves the outer frame and the root
    // call with the value that arrived early.
    let (token, value) = recv_result(&inbox);
    assert_eq!(token, Some(outer));
    assert_eq!(value, TermValue::Str("inner".into()));
    let (token, value) = recv_result(&inbox);
    assert_eq!(token, Some(root_token));
    assert_eq!(value, TermValue::Str("outer".into()));
}

#[test]
fn transport_close_stops_the_worker() {
    let (vm, inbox) = bound_vm();
    vm.tick(None, TermValue::command("gc", vec![]))
        .expect("tick accepted");
    recv_result(&inbox);

    drop(vm);
    // With every handle gone the worker drains and exits; its mailbox
    // endpoint closes with it.
    match inbox.recv_timeout(RECV_TIMEOUT) {
        Err(mpsc::RecvTimeoutError::Disconnected) => {}
        other => panic!("expected disconnect, got {other:?}"),
    }
}

#[test]
fn stop_midstream_acknowledges_and_halts() {
    let (vm, inbox) = bound_vm();

    vm.tick(None, TermValue::command("taint", vec![TermValue::Int(1)]))
        .expect("tick accepted");
    let stop_token = CallToken::new();
    vm.stop(stop_token).expect("stop");
    // Sent after stop; the worker must never answer it.
    vm.tick(None, TermValue::command("taint", vec![TermValue::Int(2)]))
        .expect("tick accepted");

    assert_eq!(recv_result(&inbox).1, TermValue::Int(1));
    match recv(&inbox) {
        HostMessage::Stopped { token } => assert_eq!(token, stop_token),
        other => panic!("expected the stop acknowledgement, got {other:?}"),
    }
    assert!(inbox.recv_timeout(Duration::from_millis(200)).is_err());
    assert_eq!(vm.phase(), VmPhase::Exited);
}

#[test]
fn kill_aborts_a_busy_instance() {
    let (vm, inbox) = bound_vm();
    vm.kill();

    // The wake tick hits a terminated engine; the worker faults out.
    match inbox.recv_timeout(RECV_TIMEOUT) {
        Err(mpsc::RecvTimeoutError::Disconnected) => {}
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert_eq!(vm.phase(), VmPhase::Faulted);
}
