//! The tick envelope and the dispatch control signals.
//!
//! A [`Tick`] is the single unit everything else moves around: a
//! correlation token plus a command payload. Ticks are immutable once
//! sent, transported exactly once, and consumed exactly once — when a
//! nested frame defers a tick it relocates the same tick, it never
//! copies it.

use portico_types::{CallToken, TermValue};
use serde::{Deserialize, Serialize};

/// One transported command unit.
///
/// The payload must be command-shaped — a list headed by a command
/// name string (see [`TermValue::command`]) — to be dispatched; the
/// worker skips anything else after a `warn`. The tick owns its
/// payload: dropping the tick after dispatch releases every value it
/// carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Pairs this tick with a reply or result. `None` means "no
    /// correlation": the result is delivered unaddressed.
    pub token: Option<CallToken>,
    /// The command payload.
    pub payload: TermValue,
}

impl Tick {
    /// A correlated tick; its result will carry `token`.
    #[must_use]
    pub fn correlated(token: CallToken, payload: TermValue) -> Self {
        Self {
            token: Some(token),
            payload,
        }
    }

    /// An uncorrelated tick.
    #[must_use]
    pub fn uncorrelated(payload: TermValue) -> Self {
        Self {
            token: None,
            payload,
        }
    }

    /// Parses the payload's command view, or `None` if the payload is
    /// not command-shaped.
    #[must_use]
    pub fn command(&self) -> Option<Command<'_>> {
        self.payload
            .as_command()
            .map(|(name, args)| Command { name, args })
    }
}

/// Borrowed view of a tick's command: name plus arguments.
#[derive(Debug, Clone, Copy)]
pub struct Command<'a> {
    pub name: &'a str,
    pub args: &'a [TermValue],
}

/// Which frame of the tick loop is running.
///
/// The worker's root frame runs at [`Top`](TickScope::Top). Each
/// reentrant host call pushes a frame scoped to its freshly minted
/// token; such a frame dispatches only ticks carrying that exact
/// token and defers everything else to its replay queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickScope {
    Top,
    Call(CallToken),
}

impl TickScope {
    #[must_use]
    pub fn is_top(&self) -> bool {
        matches!(self, TickScope::Top)
    }

    /// Whether a tick with `token` is dispatched in this frame.
    /// At top level every tick is; in a call frame only the awaited
    /// token's ticks are.
    #[must_use]
    pub fn admits(&self, token: Option<CallToken>) -> bool {
        match self {
            TickScope::Top => true,
            TickScope::Call(awaited) => token == Some(*awaited),
        }
    }
}

impl std::fmt::Display for TickScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TickScope::Top => write!(f, "top"),
            TickScope::Call(token) => write!(f, "{token}"),
        }
    }
}

/// What a handler tells the tick loop to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum TickResolution {
    /// Keep scanning the dispatch table for further matches on this
    /// same tick. Used by layered observers that do not consume it.
    Continue,
    /// The tick is fully handled; wait for the next one.
    Done,
    /// Terminate the current loop frame and yield the value to its
    /// caller; the frame drains its replay queue first.
    Return(TermValue),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_view_borrows_payload() {
        let tick = Tick::uncorrelated(TermValue::command(
            "get",
            vec![TermValue::Str("x".into())],
        ));
        let cmd = tick.command().expect("command-shaped");
        assert_eq!(cmd.name, "get");
        assert_eq!(cmd.args, &[TermValue::Str("x".into())]);
    }

    #[test]
    fn malformed_payloads_have_no_command() {
        assert!(Tick::uncorrelated(TermValue::Int(1)).command().is_none());
        assert!(Tick::uncorrelated(TermValue::List(vec![TermValue::Int(1)]))
            .command()
            .is_none());
    }

    #[test]
    fn top_scope_admits_everything() {
        let scope = TickScope::Top;
        assert!(scope.admits(None));
        assert!(scope.admits(Some(CallToken::new())));
    }

    #[test]
    fn call_scope_admits_only_its_token() {
        let awaited = CallToken::new();
        let scope = TickScope::Call(awaited);
        assert!(scope.admits(Some(awaited)));
        assert!(!scope.admits(Some(CallToken::new())));
        assert!(!scope.admits(None));
    }

    #[test]
    fn ticks_roundtrip_through_serde() {
        let tick = Tick::correlated(
            CallToken::new(),
            TermValue::command("gc", vec![]),
        );
        let json = serde_json::to_string(&tick).expect("serialize");
        let back: Tick = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(tick, back);
    }
}
