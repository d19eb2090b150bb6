//! Ordered command dispatch.
//!
//! A [`DispatchTable`] is scanned top to bottom for each well-formed
//! tick. An entry matches when its name equals the tick's command
//! name, or unconditionally when it has no name (a wildcard). The
//! first matching handler runs; [`TickResolution::Continue`] resumes
//! the scan at the next entry, anything else ends it.
//!
//! | Resolution | Effect |
//! |------------|--------|
//! | `Continue` | keep scanning; later entries may still match |
//! | `Done`     | tick consumed; loop waits for the next tick |
//! | `Return`   | tick consumed; the current loop frame yields |
//!
//! The standard table ends in a wildcard that reports unknown
//! commands back to the host, so a scan normally never runs off the
//! end. If a custom table does, the tick is logged and dropped.

use tracing::warn;

use crate::error::VmFault;
use crate::handlers;
use crate::tick::{Command, Tick, TickResolution};
use crate::worker::TickFrame;

/// A command handler.
///
/// Handlers run on the worker thread with exclusive access to the
/// frame. A recoverable engine failure must be reported as a result
/// value; an `Err` here is a fault that kills the instance.
pub type TickHandler =
    fn(&mut TickFrame<'_>, &Tick, &Command<'_>) -> Result<TickResolution, VmFault>;

struct DispatchEntry {
    /// `None` matches every command.
    name: Option<&'static str>,
    handler: TickHandler,
}

/// An ordered, immutable-after-build handler registry.
pub struct DispatchTable {
    entries: Vec<DispatchEntry>,
}

impl DispatchTable {
    /// An empty table. Build it up with [`DispatchTable::entry`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Appends an entry; `None` is a wildcard.
    #[must_use]
    pub fn entry(mut self, name: Option<&'static str>, handler: TickHandler) -> Self {
        self.entries.push(DispatchEntry { name, handler });
        self
    }

    /// The full command surface, in dispatch order, terminated by the
    /// unknown-command wildcard.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .entry(Some("stop"), handlers::stop)
            .entry(Some("result"), handlers::result)
            .entry(Some("call"), handlers::call)
            .entry(Some("inst"), handlers::inst)
            .entry(Some("delete"), handlers::delete)
            .entry(Some("taint"), handlers::taint)
            .entry(Some("equals"), handlers::equals)
            .entry(Some("strict_equals"), handlers::strict_equals)
            .entry(Some("get"), handlers::get)
            .entry(Some("get_proto"), handlers::get_proto)
            .entry(Some("get_hidden"), handlers::get_hidden)
            .entry(Some("set"), handlers::set)
            .entry(Some("set_proto"), handlers::set_proto)
            .entry(Some("set_hidden"), handlers::set_hidden)
            .entry(Some("set_accessor"), handlers::set_accessor)
            .entry(Some("proplist"), handlers::proplist)
            .entry(Some("list"), handlers::list)
            .entry(Some("script"), handlers::script)
            .entry(Some("gc"), handlers::gc)
            .entry(Some("to_string"), handlers::to_string)
            .entry(Some("to_detail_string"), handlers::to_detail_string)
            .entry(Some("extern_proto"), handlers::extern_proto)
            .entry(Some("externalize"), handlers::externalize)
            .entry(Some("internal_count"), handlers::internal_count)
            .entry(Some("set_internal"), handlers::set_internal)
            .entry(Some("set_internal_extern"), handlers::set_internal)
            .entry(Some("get_internal"), handlers::get_internal)
            .entry(None, handlers::unknown)
    }

    /// The standard table behind a wildcard that logs every dispatched
    /// command at trace level and continues the scan.
    #[must_use]
    pub fn with_tracing() -> Self {
        let mut table = Self::new().entry(None, handlers::trace_all);
        table.entries.extend(Self::standard().entries);
        table
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn dispatch(
        &self,
        frame: &mut TickFrame<'_>,
        tick: &Tick,
        cmd: &Command<'_>,
    ) -> Result<TickResolution, VmFault> {
        for entry in &self.entries {
            if let Some(name) = entry.name {
                if name != cmd.name {
                    continue;
                }
            }
            match (entry.handler)(frame, tick, cmd)? {
                TickResolution::Continue => continue,
                resolution => return Ok(resolution),
            }
        }
        warn!(vm = %frame.vm_id(), command = cmd.name, "no handler resolved command; dropping tick");
        Ok(TickResolution::Done)
    }
}

impl Default for DispatchTable {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use portico_types::TermValue;

    fn resolve_done(
        _frame: &mut TickFrame<'_>,
        _tick: &Tick,
        _cmd: &Command<'_>,
    ) -> Result<TickResolution, VmFault> {
        Ok(TickResolution::Done)
    }

    fn resolve_return(
        _frame: &mut TickFrame<'_>,
        _tick: &Tick,
        _cmd: &Command<'_>,
    ) -> Result<TickResolution, VmFault> {
        Ok(TickResolution::Return(TermValue::Int(1)))
    }

    fn resolve_continue(
        _frame: &mut TickFrame<'_>,
        _tick: &Tick,
        _cmd: &Command<'_>,
    ) -> Result<TickResolution, VmFault> {
        Ok(TickResolution::Continue)
    }

    fn dispatch_one(table: &DispatchTable, payload: TermValue) -> TickResolution {
        let mut h = harness();
        let tick = Tick::uncorrelated(payload);
        let cmd = tick.command().expect("well-formed command");
        let mut frame = h.frame();
        table.dispatch(&mut frame, &tick, &cmd).expect("no fault")
    }

    #[test]
    fn first_matching_entry_wins() {
        let table = DispatchTable::new()
            .entry(Some("a"), resolve_return)
            .entry(Some("a"), resolve_done);
        let resolution = dispatch_one(&table, TermValue::command("a", vec![]));
        assert!(matches!(resolution, TickResolution::Return(_)));
    }

    #[test]
    fn continue_resumes_at_next_entry() {
        let table = DispatchTable::new()
            .entry(Some("a"), resolve_continue)
            .entry(None, resolve_return);
        let resolution = dispatch_one(&table, TermValue::command("a", vec![]));
        assert!(matches!(resolution, TickResolution::Return(_)));
    }

    #[test]
    fn wildcard_matches_any_name() {
        let table = DispatchTable::new().entry(None, resolve_done);
        let resolution = dispatch_one(&table, TermValue::command("whatever", vec![]));
        assert!(matches!(resolution, TickResolution::Done));
    }

    #[test]
    fn exhausted_scan_counts_as_done() {
        let table = DispatchTable::new().entry(Some("a"), resolve_done);
        let resolution = dispatch_one(&table, TermValue::command("b", vec![]));
        assert!(matches!(resolution, TickResolution::Done));
    }

    #[test]
    fn standard_table_ends_in_wildcard() {
        let table = DispatchTable::standard();
        assert!(table.entries.last().expect("non-empty").name.is_none());
        // Every named entry precedes the wildcard.
        let wildcards = table
            .entries
            .iter()
            .filter(|entry| entry.name.is_none())
            .count();
        assert_eq!(wildcards, 1);
    }

    #[test]
    fn standard_table_names_every_command() {
        let expected = [
            "stop",
            "result",
            "call",
            "inst",
            "delete",
            "taint",
            "equals",
            "strict_equals",
            "get",
            "get_proto",
            "get_hidden",
            "set",
            "set_proto",
            "set_hidden",
            "set_accessor",
            "proplist",
            "list",
            "script",
            "gc",
            "to_string",
            "to_detail_string",
            "extern_proto",
            "externalize",
            "internal_count",
            "set_internal",
            "set_internal_extern",
            "get_internal",
        ];
        let names: Vec<_> = DispatchTable::standard()
            .entries
            .iter()
            .filter_map(|entry| entry.name)
            .collect();
        assert_eq!(names, expected);
    }

    #[test]
    fn tracing_table_still_dispatches() {
        let table = DispatchTable::with_tracing();
        assert_eq!(table.len(), DispatchTable::standard().len() + 1);
        let resolution = dispatch_one(&table, TermValue::command("gc", vec![]));
        assert!(matches!(resolution, TickResolution::Done));
    }
}
