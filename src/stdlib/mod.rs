//! The standard command library, registered on every fresh state.
//!
//! Everything here goes through the same registration interface a host
//! would use; nothing has special access to the VM beyond the public
//! `run_code` entry points and the loop-control plumbing.

mod base;
mod io;
mod lists;
mod math;
mod strings;

use crate::code::CodeRef;
use crate::errors::{CmdResult, Control};
use crate::state::State;
use crate::value::Value;

pub(crate) fn install(cs: &mut State) {
    base::install(cs);
    math::install(cs);
    strings::install(cs);
    lists::install(cs);
    io::install(cs);
}

/// Registers one command; the specs in this module are static and known
/// valid.
fn cmd(
    cs: &mut State,
    name: &str,
    spec: &str,
    f: impl Fn(&mut State, &mut [Value], &mut Value) -> CmdResult + 'static,
) {
    cs.new_command(name, spec, f)
        .expect("standard library command registration");
}

/// Runs a loop body, eating `break`/`continue` raised inside it.
/// Returns false when the loop should stop.
fn run_loop_body(cs: &mut State, code: &CodeRef, result: &mut Value) -> bool {
    cs.loop_depth += 1;
    let r = cs.run_code_into(code, result);
    cs.loop_depth -= 1;
    !matches!(r, Err(Control::Break))
}

/// Runs a loop condition; `None` means the loop should stop.
fn run_loop_cond(cs: &mut State, code: &CodeRef) -> Option<bool> {
    cs.loop_depth += 1;
    let r = cs.run_code(code);
    cs.loop_depth -= 1;
    match r {
        Ok(v) => Some(v.get_bool()),
        Err(_) => None,
    }
}

/// Installs an iteration value into an alias, pushing a binding on the
/// first iteration and overwriting it afterwards.
fn set_iter(cs: &mut State, id: usize, v: Value, pushed: &mut bool) {
    let mut sh = cs.shared.borrow_mut();
    if *pushed {
        if let Some(a) = sh.alias_mut(id) {
            a.set_value(v);
        }
    } else {
        sh.idents[id].push_arg(v, true);
        *pushed = true;
    }
}

fn pop_iter(cs: &mut State, id: usize, pushed: bool) {
    if pushed {
        cs.shared.borrow_mut().idents[id].pop_arg();
    }
}

fn ident_is_alias(cs: &State, id: usize) -> bool {
    cs.shared.borrow().idents[id].is_alias()
}
