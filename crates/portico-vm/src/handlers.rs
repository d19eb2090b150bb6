//! The standard command handlers.
//!
//! Each handler parses its arguments out of the command payload, runs
//! the engine operation, and replies with the outcome correlated to
//! the tick's token. Malformed arguments and per-operation engine
//! errors reply with an `["error", code, message]` value; only
//! unrecoverable faults propagate as `Err` and kill the worker.
//!
//! Argument shapes:
//!
//! | Command | Arguments |
//! |---------|-----------|
//! | `stop` | |
//! | `result` | value |
//! | `call`, `inst` | fun, \[args\] |
//! | `delete` | obj, key |
//! | `taint` | value |
//! | `equals`, `strict_equals` | a, b |
//! | `get` | obj, key |
//! | `get_proto` | obj |
//! | `get_hidden` | obj, name |
//! | `set` | obj, key, value |
//! | `set_proto` | obj, proto |
//! | `set_hidden` | obj, name, value |
//! | `set_accessor` | obj, key \[, getter \[, setter\]\] |
//! | `proplist`, `list` | obj |
//! | `script` | \[ctx,\] source |
//! | `gc` | |
//! | `to_string`, `to_detail_string` | value |
//! | `extern_proto` | kind |
//! | `externalize` | kind, term |
//! | `internal_count` | obj |
//! | `set_internal` | obj, index, value |
//! | `set_internal_extern` | obj, index, term, kind |
//! | `get_internal` | obj, index |
//!
//! `set_internal` and `set_internal_extern` share one handler; the
//! argument shape selects the form.

use portico_types::{ErrorCode, ExternKind, ObjectId, PropKey, TermValue};
use tracing::{debug, trace, warn};

use crate::engine::EngineError;
use crate::error::{VmError, VmFault};
use crate::tick::{Command, Tick, TickResolution, TickScope};
use crate::worker::TickFrame;

/// Replies with the operation outcome: values go back as-is,
/// recoverable errors as error-result values, faults propagate.
fn complete(
    frame: &TickFrame<'_>,
    tick: &Tick,
    outcome: Result<TermValue, EngineError>,
) -> Result<TickResolution, VmFault> {
    match outcome {
        Ok(value) => frame.reply(tick, value)?,
        Err(error) => match error.into_fault() {
            Ok(fault) => return Err(fault),
            Err(error) => {
                debug!(
                    vm = %frame.vm_id(),
                    code = error.code(),
                    error = %error,
                    "engine operation failed"
                );
                frame.reply(tick, TermValue::error(error.code(), error.to_string()))?;
            }
        },
    }
    Ok(TickResolution::Done)
}

fn bad_args(
    frame: &TickFrame<'_>,
    tick: &Tick,
    command: &str,
    expected: &str,
) -> Result<TickResolution, VmFault> {
    let error = EngineError::BadArgument(format!("{command}: {expected}"));
    debug!(vm = %frame.vm_id(), command, "rejecting malformed arguments");
    frame.reply(tick, TermValue::error(error.code(), error.to_string()))?;
    Ok(TickResolution::Done)
}

fn object_arg(value: &TermValue) -> Option<ObjectId> {
    value.as_object()
}

fn accessor_side(value: &TermValue) -> Option<TermValue> {
    if value.is_undefined() {
        None
    } else {
        Some(value.clone())
    }
}

/// Flags cooperative shutdown. No reply here; the `Stopped`
/// acknowledgement is delivered once the worker has left the
/// top-level loop.
pub(crate) fn stop(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    _cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    debug!(vm = %frame.vm_id(), token = ?tick.token, "stop requested");
    frame.request_stop(tick.token);
    Ok(TickResolution::Done)
}

/// Resolves the host call the current frame is waiting on. The loop
/// only dispatches a `result` tick into the frame whose token it
/// carries, so inside a call frame the value is unconditionally the
/// awaited one. At top level there is no call to resolve.
pub(crate) fn result(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let value = cmd.args.first().cloned().unwrap_or(TermValue::Undefined);
    match frame.scope() {
        TickScope::Call(_) => Ok(TickResolution::Return(value)),
        TickScope::Top => {
            warn!(vm = %frame.vm_id(), token = ?tick.token, "result tick outside any host call");
            Ok(TickResolution::Done)
        }
    }
}

pub(crate) fn call(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let (fun, call_args) = match cmd.args {
        [fun] => (fun.clone(), Vec::new()),
        [fun, TermValue::List(items)] => (fun.clone(), items.clone()),
        _ => {
            return bad_args(
                frame,
                tick,
                cmd.name,
                "expected a callable and an optional argument list",
            )
        }
    };
    let engine = frame.engine();
    let outcome = engine.call(fun, call_args, &mut frame.invoker());
    complete(frame, tick, outcome)
}

pub(crate) fn inst(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let (fun, call_args) = match cmd.args {
        [fun] => (fun.clone(), Vec::new()),
        [fun, TermValue::List(items)] => (fun.clone(), items.clone()),
        _ => {
            return bad_args(
                frame,
                tick,
                cmd.name,
                "expected a constructor and an optional argument list",
            )
        }
    };
    let engine = frame.engine();
    let outcome = engine.construct(fun, call_args, &mut frame.invoker());
    complete(frame, tick, outcome)
}

pub(crate) fn delete(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term, key_term] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object and a key");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let Some(key) = PropKey::from_term(key_term) else {
        return bad_args(frame, tick, cmd.name, "keys are strings or integers");
    };
    let outcome = frame.engine().delete(obj, &key).map(TermValue::Bool);
    complete(frame, tick, outcome)
}

pub(crate) fn taint(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [value] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected one value");
    };
    let outcome = frame.engine().taint(value.clone());
    complete(frame, tick, outcome)
}

pub(crate) fn equals(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [a, b] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected two values");
    };
    let outcome = frame.engine().equals(a, b).map(TermValue::Bool);
    complete(frame, tick, outcome)
}

pub(crate) fn strict_equals(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [a, b] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected two values");
    };
    let outcome = frame.engine().strict_equals(a, b).map(TermValue::Bool);
    complete(frame, tick, outcome)
}

pub(crate) fn get(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term, key_term] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object and a key");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let Some(key) = PropKey::from_term(key_term) else {
        return bad_args(frame, tick, cmd.name, "keys are strings or integers");
    };
    let engine = frame.engine();
    let outcome = engine.get(obj, &key, &mut frame.invoker());
    complete(frame, tick, outcome)
}

pub(crate) fn get_proto(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let outcome = frame.engine().get_proto(obj);
    complete(frame, tick, outcome)
}

pub(crate) fn get_hidden(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term, key_term] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object and a name");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let Some(key) = key_term.as_str() else {
        return bad_args(frame, tick, cmd.name, "hidden names are strings");
    };
    let outcome = frame.engine().get_hidden(obj, key);
    complete(frame, tick, outcome)
}

pub(crate) fn set(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term, key_term, value] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object, a key, and a value");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let Some(key) = PropKey::from_term(key_term) else {
        return bad_args(frame, tick, cmd.name, "keys are strings or integers");
    };
    let engine = frame.engine();
    let outcome = engine.set(obj, key, value.clone(), &mut frame.invoker());
    complete(frame, tick, outcome)
}

pub(crate) fn set_proto(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term, proto] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object and a prototype");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let outcome = frame
        .engine()
        .set_proto(obj, proto.clone())
        .map(TermValue::Bool);
    complete(frame, tick, outcome)
}

pub(crate) fn set_hidden(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term, key_term, value] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object, a name, and a value");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let Some(key) = key_term.as_str() else {
        return bad_args(frame, tick, cmd.name, "hidden names are strings");
    };
    let outcome = frame
        .engine()
        .set_hidden(obj, key.to_string(), value.clone());
    complete(frame, tick, outcome)
}

pub(crate) fn set_accessor(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let (obj_term, key_term, getter, setter) = match cmd.args {
        [o, k] => (o, k, None, None),
        [o, k, g] => (o, k, accessor_side(g), None),
        [o, k, g, s] => (o, k, accessor_side(g), accessor_side(s)),
        _ => {
            return bad_args(
                frame,
                tick,
                cmd.name,
                "expected an object, a key, and up to two accessor sides",
            )
        }
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let Some(key) = PropKey::from_term(key_term) else {
        return bad_args(frame, tick, cmd.name, "keys are strings or integers");
    };
    let outcome = frame
        .engine()
        .set_accessor(obj, key, getter, setter)
        .map(TermValue::Bool);
    complete(frame, tick, outcome)
}

pub(crate) fn proplist(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let outcome = frame.engine().proplist(obj).map(|pairs| {
        TermValue::List(
            pairs
                .into_iter()
                .map(|(k, v)| TermValue::List(vec![k, v]))
                .collect(),
        )
    });
    complete(frame, tick, outcome)
}

pub(crate) fn list(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let outcome = frame.engine().list_elements(obj).map(TermValue::List);
    complete(frame, tick, outcome)
}

pub(crate) fn script(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let engine = frame.engine();
    let (ctx, source) = match cmd.args {
        [TermValue::Str(source)] => (engine.default_context(), source.as_str()),
        [ctx_term, TermValue::Str(source)] => match ctx_term.as_ctx() {
            Some(ctx) => (ctx, source.as_str()),
            None => {
                return bad_args(frame, tick, cmd.name, "expected a context reference");
            }
        },
        _ => {
            return bad_args(
                frame,
                tick,
                cmd.name,
                "expected an optional context and source text",
            )
        }
    };
    let outcome = engine.eval(ctx, source, &mut frame.invoker());
    complete(frame, tick, outcome)
}

pub(crate) fn gc(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    _cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let outcome = frame
        .engine()
        .collect_garbage()
        .map(|count| TermValue::Int(count as i64));
    complete(frame, tick, outcome)
}

pub(crate) fn to_string(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [value] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected one value");
    };
    let outcome = frame.engine().to_string(value).map(TermValue::Str);
    complete(frame, tick, outcome)
}

pub(crate) fn to_detail_string(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [value] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected one value");
    };
    let outcome = frame.engine().to_detail_string(value).map(TermValue::Str);
    complete(frame, tick, outcome)
}

pub(crate) fn extern_proto(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [TermValue::Str(kind_name)] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an extern kind name");
    };
    let Some(kind) = ExternKind::from_name(kind_name) else {
        return bad_args(frame, tick, cmd.name, "unknown extern kind");
    };
    let outcome = frame.engine().extern_proto(kind);
    complete(frame, tick, outcome)
}

pub(crate) fn externalize(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [TermValue::Str(kind_name), term] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an extern kind and a term");
    };
    let Some(kind) = ExternKind::from_name(kind_name) else {
        return bad_args(frame, tick, cmd.name, "unknown extern kind");
    };
    let outcome = frame.engine().externalize(kind, term.clone());
    complete(frame, tick, outcome)
}

pub(crate) fn internal_count(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let outcome = frame
        .engine()
        .internal_count(obj)
        .map(|count| TermValue::Int(count as i64));
    complete(frame, tick, outcome)
}

/// Handles both `set_internal` and `set_internal_extern`; the fourth
/// argument (the extern kind) selects the extern form, which wraps the
/// term before storing it.
pub(crate) fn set_internal(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let engine = frame.engine();
    match cmd.args {
        [obj_term, TermValue::Int(raw), value] => {
            let Some(obj) = object_arg(obj_term) else {
                return bad_args(frame, tick, cmd.name, "expected an object reference");
            };
            let Ok(index) = usize::try_from(*raw) else {
                return bad_args(frame, tick, cmd.name, "slot index must be non-negative");
            };
            let outcome = engine.set_internal(obj, index, value.clone());
            complete(frame, tick, outcome)
        }
        [obj_term, TermValue::Int(raw), term, TermValue::Str(kind_name)] => {
            let Some(obj) = object_arg(obj_term) else {
                return bad_args(frame, tick, cmd.name, "expected an object reference");
            };
            let Ok(index) = usize::try_from(*raw) else {
                return bad_args(frame, tick, cmd.name, "slot index must be non-negative");
            };
            let Some(kind) = ExternKind::from_name(kind_name) else {
                return bad_args(frame, tick, cmd.name, "unknown extern kind");
            };
            let outcome = engine
                .externalize(kind, term.clone())
                .and_then(|ext| engine.set_internal(obj, index, ext));
            complete(frame, tick, outcome)
        }
        _ => bad_args(
            frame,
            tick,
            cmd.name,
            "expected an object, a slot index, a value, and for the extern form a kind",
        ),
    }
}

pub(crate) fn get_internal(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    let [obj_term, TermValue::Int(raw)] = cmd.args else {
        return bad_args(frame, tick, cmd.name, "expected an object and a slot index");
    };
    let Some(obj) = object_arg(obj_term) else {
        return bad_args(frame, tick, cmd.name, "expected an object reference");
    };
    let Ok(index) = usize::try_from(*raw) else {
        return bad_args(frame, tick, cmd.name, "slot index must be non-negative");
    };
    let outcome = frame.engine().get_internal(obj, index);
    complete(frame, tick, outcome)
}

/// The terminal wildcard: reports an unrecognized command back to the
/// sender instead of leaving it unanswered.
pub(crate) fn unknown(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    warn!(vm = %frame.vm_id(), command = cmd.name, "unknown command");
    let error = VmError::UnknownCommand(cmd.name.to_string());
    frame.reply(tick, TermValue::error(error.code(), error.to_string()))?;
    Ok(TickResolution::Done)
}

/// The observation wildcard used by `DispatchTable::with_tracing`:
/// logs every dispatched command and lets the scan continue.
pub(crate) fn trace_all(
    frame: &mut TickFrame<'_>,
    tick: &Tick,
    cmd: &Command<'_>,
) -> Result<TickResolution, VmFault> {
    trace!(
        vm = %frame.vm_id(),
        command = cmd.name,
        token = ?tick.token,
        argc = cmd.args.len(),
        "tick"
    );
    Ok(TickResolution::Continue)
}
