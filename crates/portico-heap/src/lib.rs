//! In-process reference engine for the Portico tick loop.
//!
//! This crate implements the `portico-vm` engine seam against a plain
//! Rust heap instead of an embedded language VM. It exists for two
//! jobs: exercising the full command surface and the reentrant call
//! protocol in tests without a native engine, and serving as the
//! worked example of what a [`ScriptEngine`] implementation owes the
//! tick loop (per-operation locking, lock release around callables,
//! termination behavior).
//!
//! [`ScriptEngine`]: portico_vm::ScriptEngine
//!
//! # Object Model
//!
//! ```text
//! HeapEngine
//! ├── contexts : ContextId → global ObjectId
//! ├── objects  : ObjectId  → HeapObject
//! │                 props     (ordered, value or accessor slots)
//! │                 hidden    (engine-internal keyspace)
//! │                 internals (fixed-count slots)
//! │                 proto     (optional prototype link)
//! │                 kind      (plain, script binding, or extern)
//! └── scripts  : name → ScriptFn
//! ```
//!
//! Property reads walk the prototype chain; writes always land on the
//! receiving object. Externs carry the wrapped host term and the
//! per-kind prototype; `fun` externs are callable and re-enter the
//! host when invoked.
//!
//! # Scripts
//!
//! There is no parser here. A "script" is a named Rust closure
//! registered with [`HeapEngine::define_script`]; `eval` and
//! script-bound callables resolve the name and run the closure with a
//! [`ScriptScope`] giving it heap access and the host bridge. A script
//! calling [`ScriptScope::call_host`] suspends its instance exactly
//! like native engine code would, with unrelated traffic queued and
//! replayed around the pending reply.
//!
//! # Collection
//!
//! `collect_garbage` is a mark-sweep over the object table. Roots are
//! every context's global, the extern prototypes, and all non-plain
//! objects (script bindings and externs are pinned while they exist,
//! since the host addresses them by id). Only unreachable plain
//! objects are reclaimed.
//!
//! # Example
//!
//! ```
//! use portico_heap::HeapEngine;
//! use portico_types::TermValue;
//! use portico_vm::{CallSite, EngineError, HostInvoker, ScriptEngine};
//!
//! struct NoHost;
//!
//! impl HostInvoker for NoHost {
//!     fn call_host(
//!         &mut self,
//!         _target: TermValue,
//!         _site: CallSite,
//!         _args: Vec<TermValue>,
//!     ) -> Result<TermValue, EngineError> {
//!         Ok(TermValue::Undefined)
//!     }
//! }
//!
//! let engine = HeapEngine::new();
//! engine.define_script("double", |_scope, args| match args.first() {
//!     Some(TermValue::Int(n)) => Ok(TermValue::Int(n * 2)),
//!     _ => Ok(TermValue::Undefined),
//! });
//!
//! let fun = engine.bind_script("double");
//! let out = engine
//!     .call(fun, vec![TermValue::Int(21)], &mut NoHost)
//!     .unwrap();
//! assert_eq!(out, TermValue::Int(42));
//! ```
//!
//! # Related Crates
//!
//! - `portico-vm` - the tick loop this engine plugs into
//! - [`portico_types`] - value and identifier types

mod engine;
mod object;
mod script;

pub use engine::HeapEngine;
pub use script::{ScriptFn, ScriptScope};
