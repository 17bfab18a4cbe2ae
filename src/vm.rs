//! The dispatch loop and everything invoked from it.
//!
//! Execution walks the opcode words of one block with a per-invocation value
//! stack. Entering a nested unit (`ENTER`, sub-blocks, alias bodies) recurses
//! into the loop; every such entry is bounded by the thread's recursion
//! counter. `break`/`continue` unwind through `Result` so that argument
//! stacks and call frames are restored on every exit path.

use std::rc::Rc;

use crate::code::*;
use crate::compile::{literal_block, push_float_op, push_int_op};
use crate::errors::Control;
use crate::ident::{valid_name, Builtin, IdentKind, IDF_OVERRIDDEN, IDF_UNKNOWN};
use crate::state::{CallFrame, Shared, State};
use crate::value::{float_to_str, int_to_str, parse_float, parse_int, Value};

// ---- value plumbing ----

pub(crate) fn zero_value(ret: u32) -> Value {
    match ret & RET_MASK {
        RET_INT => Value::Int(0),
        RET_FLOAT => Value::Float(0.0),
        RET_STR => Value::str_from(""),
        _ => Value::Null,
    }
}

fn bool_value(b: bool, ret: u32) -> Value {
    match ret & RET_MASK {
        RET_STR => Value::str_from(if b { "1" } else { "0" }),
        RET_FLOAT => Value::Float(if b { 1.0 } else { 0.0 }),
        _ => Value::Int(b as i32),
    }
}

/// Joins values into one string, spaced or not.
pub(crate) fn conc(vals: &[Value], space: bool) -> Rc<str> {
    let mut s = String::new();
    for (i, v) in vals.iter().enumerate() {
        if i > 0 && space {
            s.push(' ');
        }
        match v {
            Value::Int(n) => s.push_str(&int_to_str(*n)),
            Value::Float(f) => s.push_str(&float_to_str(*f)),
            Value::Str(x) => s.push_str(x),
            Value::Macro(m) => s.push_str(m.as_str()),
            _ => {}
        }
    }
    Rc::from(s.as_str())
}

/// Coerces a value to code, compiling its string form on demand.
pub(crate) fn force_code(cs: &mut State, v: &mut Value) -> CodeRef {
    if let Some(c) = v.get_code() {
        return c.clone();
    }
    let src = v.get_str();
    let code = cs.compile_tagged(&src, 0, false);
    *v = Value::Code(code.clone());
    code
}

/// Condition coercion: non-empty strings compile, empty strings become a
/// false integer, everything else passes through.
pub(crate) fn force_cond(cs: &mut State, v: &mut Value) {
    if v.is_stringish() {
        if v.get_strr().is_empty() {
            *v = Value::Int(0);
        } else {
            force_code(cs, v);
        }
    }
}

// ---- identifier reads ----

fn alias_read(sh: &Shared, idx: usize, ret: u32, macro_mode: bool) -> Value {
    let id = &sh.idents[idx];
    match ret & RET_MASK {
        RET_INT => Value::Int(id.get_int()),
        RET_FLOAT => Value::Float(id.get_float()),
        RET_STR => {
            if macro_mode {
                id.alias().map(|a| a.val.clone_str_value()).unwrap_or_default()
            } else {
                Value::Str(id.get_str())
            }
        }
        _ => {
            let a = id.alias();
            match a {
                Some(a) if macro_mode => a.val.clone_value(),
                Some(a) => a.val.to_owned_value(),
                None => Value::Null,
            }
        }
    }
}

fn ivar_read(sh: &Shared, idx: usize, ret: u32) -> Value {
    if let IdentKind::Ivar(v) = &sh.idents[idx].kind {
        match ret & RET_MASK {
            RET_STR => Value::str_from(&int_to_str(v.val)),
            RET_FLOAT => Value::Float(v.val as f32),
            _ => Value::Int(v.val),
        }
    } else {
        Value::Null
    }
}

fn fvar_read(sh: &Shared, idx: usize, ret: u32) -> Value {
    if let IdentKind::Fvar(v) = &sh.idents[idx].kind {
        match ret & RET_MASK {
            RET_STR => Value::str_from(&float_to_str(v.val)),
            RET_INT => Value::Int(v.val as i32),
            _ => Value::Float(v.val),
        }
    } else {
        Value::Null
    }
}

fn svar_read(sh: &Shared, idx: usize, ret: u32) -> Value {
    if let IdentKind::Svar(v) = &sh.idents[idx].kind {
        match ret & RET_MASK {
            RET_INT => Value::Int(parse_int(&v.val)),
            RET_FLOAT => Value::Float(parse_float(&v.val)),
            _ => Value::Str(Rc::clone(&v.val)),
        }
    } else {
        Value::Null
    }
}

/// Marks a positional slot used in the current frame, pushing a null binding
/// the first time.
fn ensure_arg_used(cs: &mut State, idx: usize) {
    if idx >= MAX_ARGUMENTS {
        return;
    }
    let top = cs.frames.len() - 1;
    if cs.frames[top].usedargs & (1 << idx) == 0 {
        cs.shared.borrow_mut().idents[idx].push_arg(Value::Null, false);
        cs.frames[top].usedargs |= 1 << idx;
    }
}

fn arg_is_used(cs: &State, idx: usize) -> bool {
    idx >= MAX_ARGUMENTS || cs.frames[cs.frames.len() - 1].usedargs & (1 << idx) != 0
}

/// Name lookup performed at run time (`$$x`, `$(...)` and `@[...]`).
fn lookup_dynamic(
    cs: &mut State,
    args: &mut Vec<Value>,
    ret: u32,
    macro_mode: bool,
) -> Result<(), Control> {
    let arg = match args.pop() {
        Some(v) => v,
        None => return Ok(()),
    };
    if !arg.is_stringish() {
        args.push(arg);
        return Ok(());
    }
    let name = arg.get_strr().to_string();
    enum Hit {
        Alias(usize),
        UnusedArg,
        Unknown,
        Ivar(usize),
        Fvar(usize),
        Svar(usize),
        Command(usize),
        Missing,
    }
    let hit = {
        let sh = cs.shared.borrow();
        match sh.names.get(name.as_str()) {
            None => Hit::Missing,
            Some(&idx) => match &sh.idents[idx].kind {
                IdentKind::Alias(_) => {
                    if sh.idents[idx].flags & IDF_UNKNOWN != 0 {
                        Hit::Unknown
                    } else if !arg_is_used(cs, idx) {
                        Hit::UnusedArg
                    } else {
                        Hit::Alias(idx)
                    }
                }
                IdentKind::Ivar(_) => Hit::Ivar(idx),
                IdentKind::Fvar(_) => Hit::Fvar(idx),
                IdentKind::Svar(_) => Hit::Svar(idx),
                IdentKind::Command(_) => Hit::Command(idx),
            },
        }
    };
    match hit {
        Hit::Alias(idx) => {
            let sh = cs.shared.borrow();
            args.push(alias_read(&sh, idx, ret, macro_mode));
        }
        Hit::UnusedArg => args.push(zero_value(ret)),
        Hit::Ivar(idx) => {
            let sh = cs.shared.borrow();
            args.push(ivar_read(&sh, idx, ret));
        }
        Hit::Fvar(idx) => {
            let sh = cs.shared.borrow();
            args.push(fvar_read(&sh, idx, ret));
        }
        Hit::Svar(idx) => {
            let sh = cs.shared.borrow();
            args.push(svar_read(&sh, idx, ret));
        }
        Hit::Command(idx) => {
            let mut buf = Vec::new();
            let mut v = Value::Null;
            exec_command(cs, idx, &mut buf, &mut v, true)?;
            v.force(ret);
            args.push(v);
        }
        Hit::Unknown | Hit::Missing => {
            cs.debug_code(format!("unknown alias lookup: {}", name));
            args.push(zero_value(ret));
        }
    }
    Ok(())
}

// ---- `doargs` scoping ----

/// Runs `f` with the caller's argument scope: the current frame's bindings
/// are unwound, the parent frame's view is installed and everything is put
/// back afterwards, keeping any slots the body added.
pub(crate) fn do_args<R>(cs: &mut State, f: impl FnOnce(&mut State) -> R) -> R {
    if cs.frames.len() < 2 {
        return f(cs);
    }
    let top = cs.frames.len() - 1;
    let used = cs.frames[top].usedargs;
    let mut displaced: Vec<(usize, Value)> = Vec::new();
    {
        let mut sh = cs.shared.borrow_mut();
        for i in 0..MAX_ARGUMENTS {
            if used & (1 << i) != 0 {
                if let Some(a) = sh.alias_mut(i) {
                    displaced.push((i, a.undo_arg()));
                }
            }
        }
    }
    let pseudo = CallFrame {
        id: cs.frames[top].id,
        usedargs: cs.frames[top - 1].usedargs,
    };
    cs.frames.push(pseudo);
    let r = f(cs);
    let pseudo = cs.frames.pop().unwrap_or(pseudo);
    cs.frames[top - 1].usedargs = pseudo.usedargs;
    {
        let mut sh = cs.shared.borrow_mut();
        for (i, v) in displaced {
            if let Some(a) = sh.alias_mut(i) {
                a.redo_arg(v);
            }
        }
    }
    r
}

// ---- command invocation ----

/// Invokes a command with host-style argument coercion: missing arguments
/// take their specifier defaults, present ones are forced in place, repeat
/// digits loop the preceding group and `C`/`V` collect the rest.
pub(crate) fn exec_command(
    cs: &mut State,
    idx: usize,
    args: &mut Vec<Value>,
    result: &mut Value,
    lookup: bool,
) -> Result<(), Control> {
    let (spec, cb) = {
        let sh = cs.shared.borrow();
        match &sh.idents[idx].kind {
            IdentKind::Command(c) => (c.argspec.to_string(), Rc::clone(&c.cb)),
            _ => return Ok(()),
        }
    };
    let given = args.len();
    let b = spec.as_bytes();
    let mut i: isize = -1;
    let mut fakeargs: i32 = 0;
    let mut rep = false;
    let mut k = 0usize;
    while k < b.len() {
        match b[k] {
            b'i' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    args.push(Value::Int(0));
                    fakeargs += 1;
                } else {
                    args[i as usize].force_int();
                }
            }
            b'b' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    args.push(Value::Int(i32::MIN));
                    fakeargs += 1;
                } else {
                    args[i as usize].force_int();
                }
            }
            b'f' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    args.push(Value::Float(0.0));
                    fakeargs += 1;
                } else {
                    args[i as usize].force_float();
                }
            }
            b'F' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    let prev = if i > 0 {
                        args[(i - 1) as usize].get_float()
                    } else {
                        0.0
                    };
                    args.push(Value::Float(prev));
                    fakeargs += 1;
                } else {
                    args[i as usize].force_float();
                }
            }
            b'S' | b's' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    args.push(Value::str_from(""));
                    fakeargs += 1;
                } else {
                    args[i as usize].force_str();
                }
            }
            b'T' | b't' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    args.push(Value::Null);
                    fakeargs += 1;
                }
            }
            b'E' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    args.push(Value::Null);
                    fakeargs += 1;
                } else {
                    let mut v = std::mem::take(&mut args[i as usize]);
                    force_cond(cs, &mut v);
                    args[i as usize] = v;
                }
            }
            b'e' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    let empty = cs.empty_code(RET_NULL);
                    args.push(Value::Code(empty));
                    fakeargs += 1;
                } else {
                    let mut v = std::mem::take(&mut args[i as usize]);
                    force_code(cs, &mut v);
                    args[i as usize] = v;
                }
            }
            b'r' => {
                i += 1;
                if i as usize >= given {
                    if rep {
                        k += 1;
                        continue;
                    }
                    let dummy = cs.dummy_idx();
                    args.push(Value::Ident(dummy));
                    fakeargs += 1;
                } else {
                    let mut v = std::mem::take(&mut args[i as usize]);
                    cs.force_ident(&mut v);
                    args[i as usize] = v;
                }
            }
            b'$' => {
                i += 1;
                set_slot(args, i as usize, Value::Ident(idx));
            }
            b'N' => {
                i += 1;
                let v = if lookup { -1 } else { i as i32 - fakeargs };
                set_slot(args, i as usize, Value::Int(v));
            }
            b'C' => {
                i = i.max(given as isize - 1) + 1;
                let joined = conc(&args[..i as usize], true);
                let mut one = vec![Value::Str(joined)];
                return cb(cs, &mut one, result);
            }
            b'V' => {
                i = i.max(given as isize - 1) + 1;
                let n = i as usize;
                return cb(cs, &mut args[..n], result);
            }
            c @ b'1'..=b'4' => {
                if i + 1 < given as isize {
                    k = k.saturating_sub((c - b'0') as usize);
                    rep = true;
                    continue;
                }
            }
            _ => {}
        }
        k += 1;
    }
    i += 1;
    let n = i as usize;
    cb(cs, &mut args[..n], result)
}

fn set_slot(args: &mut Vec<Value>, i: usize, v: Value) {
    while args.len() < i {
        args.push(Value::Null);
    }
    if i < args.len() {
        args[i] = v;
    } else {
        args.push(v);
    }
}

// ---- alias invocation ----

/// Calls an alias: positional arguments go on their identifier stacks, a
/// frame is pushed, the lazily compiled body runs, and everything is
/// unwound no matter how the body exits.
pub(crate) fn call_alias(
    cs: &mut State,
    idx: usize,
    mut callvals: Vec<Value>,
    result: &mut Value,
    ret: u32,
) -> Result<(), Control> {
    let callargs = callvals.len().min(MAX_ARGUMENTS);
    {
        let mut sh = cs.shared.borrow_mut();
        for (i, v) in callvals.drain(..).enumerate() {
            if i < callargs {
                sh.idents[i].push_arg(v, false);
            }
        }
    }
    let old_flags = cs.ident_flags;
    let numargs_var = {
        let sh = cs.shared.borrow();
        cs.ident_flags |= sh.idents[idx].flags & IDF_OVERRIDDEN;
        sh.numargs_var
    };
    let old_numargs = set_ivar_raw(cs, numargs_var, callargs as i32);
    cs.frames.push(CallFrame {
        id: idx,
        usedargs: (1u32 << callargs) - 1,
    });

    let cached = {
        let sh = cs.shared.borrow();
        sh.alias(idx).and_then(|a| a.code.clone())
    };
    let body = match cached {
        Some(c) => c,
        None => {
            let src = {
                let sh = cs.shared.borrow();
                sh.idents[idx].get_str().to_string()
            };
            let code = cs.compile_tagged(&src, 0, false);
            if let Some(a) = cs.shared.borrow_mut().alias_mut(idx) {
                a.code = Some(code.clone());
            }
            code
        }
    };

    let res = exec_block(cs, &body, result);

    let frame = cs.frames.pop().unwrap_or(CallFrame {
        id: idx,
        usedargs: 0,
    });
    {
        let mut sh = cs.shared.borrow_mut();
        for i in 0..callargs {
            sh.idents[i].pop_arg();
        }
        let mut mask = frame.usedargs >> callargs;
        let mut i = callargs;
        while mask != 0 {
            if mask & 1 != 0 {
                sh.idents[i].pop_arg();
            }
            mask >>= 1;
            i += 1;
        }
    }
    set_ivar_raw(cs, numargs_var, old_numargs);
    cs.ident_flags = old_flags;
    res?;
    result.force(ret);
    Ok(())
}

fn set_ivar_raw(cs: &mut State, idx: usize, v: i32) -> i32 {
    let mut sh = cs.shared.borrow_mut();
    if let IdentKind::Ivar(var) = &mut sh.idents[idx].kind {
        std::mem::replace(&mut var.val, v)
    } else {
        0
    }
}

// ---- the dispatch loop ----

pub(crate) fn exec_block(
    cs: &mut State,
    code: &CodeRef,
    result: &mut Value,
) -> Result<(), Control> {
    exec_inner(cs, code, code.start, result).map(|_| ())
}

fn exec_inner(
    cs: &mut State,
    block: &CodeRef,
    pc: usize,
    result: &mut Value,
) -> Result<usize, Control> {
    *result = Value::Null;
    if cs.run_depth >= MAX_RUN_DEPTH {
        cs.debug_code("exceeded recursion limit".to_string());
        return Ok(skip_to_exit(block.ops(), pc, result));
    }
    cs.run_depth += 1;
    if let Some(hook) = cs.call_hook.clone() {
        hook(cs);
    }
    let r = exec_ops(cs, block, pc, result);
    cs.run_depth -= 1;
    r
}

/// Scans forward to the `EXIT` matching the current entry, forcing the
/// result to its tag. Used when the recursion limit aborts a unit.
fn skip_to_exit(ops: &[u32], mut pc: usize, result: &mut Value) -> usize {
    let mut depth = 0i32;
    while pc < ops.len() {
        let op = ops[pc];
        pc += 1;
        match op & OP_MASK {
            OP_MACRO => pc += str_words((op >> 8) as usize),
            OP_VAL => match op & RET_MASK {
                RET_STR => pc += str_words((op >> 8) as usize),
                RET_INT | RET_FLOAT => pc += 1,
                _ => {}
            },
            OP_BLOCK | OP_JUMP | OP_JUMP_TRUE | OP_JUMP_FALSE | OP_JUMP_RESULT_TRUE
            | OP_JUMP_RESULT_FALSE => pc += (op >> 8) as usize,
            OP_ENTER | OP_ENTER_RESULT => depth += 1,
            OP_EXIT => {
                if depth <= 0 {
                    result.force(op & RET_MASK);
                    return pc;
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    pc
}

fn exec_ops(
    cs: &mut State,
    block: &CodeRef,
    mut pc: usize,
    result: &mut Value,
) -> Result<usize, Control> {
    let ops = block.ops();
    let mut args: Vec<Value> = Vec::with_capacity(MAX_ARGUMENTS + MAX_RESULTS);
    loop {
        let op = ops[pc];
        pc += 1;
        let ret = op & RET_MASK;
        match op & OP_MASK {
            OP_START | OP_OFFSET => {}

            OP_NULL => *result = zero_value(ret),
            OP_FALSE => *result = bool_value(false, ret),
            OP_TRUE => *result = bool_value(true, ret),
            OP_NOT => {
                let v = args.pop().unwrap_or_default();
                *result = bool_value(!v.get_bool(), ret);
            }
            OP_POP => {
                args.pop();
            }

            OP_ENTER => {
                let mut v = Value::Null;
                pc = exec_inner(cs, block, pc, &mut v)?;
                args.push(v);
            }
            OP_ENTER_RESULT => {
                pc = exec_inner(cs, block, pc, result)?;
            }
            OP_EXIT => {
                result.force(ret);
                return Ok(pc);
            }
            OP_RESULT_ARG => {
                result.force(ret);
                args.push(std::mem::take(result));
            }
            OP_RESULT => {
                *result = args.pop().unwrap_or_default();
                result.force(ret);
            }

            OP_PRINT => cs.print_var((op >> 8) as usize),

            OP_LOCAL => {
                *result = Value::Null;
                let numlocals = (op >> 8) as usize;
                let offset = args.len().saturating_sub(numlocals);
                let mut ids = Vec::with_capacity(numlocals);
                for v in &mut args[offset..] {
                    ids.push(cs.force_ident(v));
                }
                {
                    let mut sh = cs.shared.borrow_mut();
                    for &id in &ids {
                        sh.idents[id].push_alias();
                    }
                }
                let r = exec_inner(cs, block, pc, result);
                {
                    let mut sh = cs.shared.borrow_mut();
                    for &id in &ids {
                        sh.idents[id].pop_alias();
                    }
                }
                return r;
            }

            OP_DO_ARGS if cs.frames.len() > 1 => {
                let mut v = args.pop().unwrap_or_default();
                let code = force_code(cs, &mut v);
                do_args(cs, |cs| exec_block(cs, &code, result))?;
                result.force(ret);
            }
            OP_DO | OP_DO_ARGS => {
                let mut v = args.pop().unwrap_or_default();
                let code = force_code(cs, &mut v);
                exec_block(cs, &code, result)?;
                result.force(ret);
            }

            OP_JUMP => {
                pc += (op >> 8) as usize;
            }
            OP_JUMP_TRUE => {
                let v = args.pop().unwrap_or_default();
                if v.get_bool() {
                    pc += (op >> 8) as usize;
                }
            }
            OP_JUMP_FALSE => {
                let v = args.pop().unwrap_or_default();
                if !v.get_bool() {
                    pc += (op >> 8) as usize;
                }
            }
            OP_JUMP_RESULT_TRUE => {
                let v = args.pop().unwrap_or_default();
                if let Some(code) = v.get_code() {
                    let code = code.clone();
                    exec_block(cs, &code, result)?;
                } else {
                    *result = v;
                }
                if result.get_bool() {
                    pc += (op >> 8) as usize;
                }
            }
            OP_JUMP_RESULT_FALSE => {
                let v = args.pop().unwrap_or_default();
                if let Some(code) = v.get_code() {
                    let code = code.clone();
                    exec_block(cs, &code, result)?;
                } else {
                    *result = v;
                }
                if !result.get_bool() {
                    pc += (op >> 8) as usize;
                }
            }

            OP_MACRO => {
                let len = (op >> 8) as usize;
                args.push(Value::Macro(MacroStr {
                    block: Rc::clone(&block.block),
                    word: pc,
                    len,
                }));
                pc += str_words(len);
            }
            OP_VAL => match ret {
                RET_STR => {
                    let len = (op >> 8) as usize;
                    let s = block.block.str_payload(pc, len).to_string();
                    args.push(Value::str_from(&s));
                    pc += str_words(len);
                }
                RET_INT => {
                    args.push(Value::Int(ops[pc] as i32));
                    pc += 1;
                }
                RET_FLOAT => {
                    args.push(Value::Float(f32::from_bits(ops[pc])));
                    pc += 1;
                }
                _ => args.push(Value::Null),
            },
            OP_VALI => match ret {
                RET_STR => {
                    let bytes = [
                        (op >> 8) as u8,
                        (op >> 16) as u8,
                        (op >> 24) as u8,
                    ];
                    let len = bytes.iter().position(|&b| b == 0).unwrap_or(3);
                    let s = std::str::from_utf8(&bytes[..len]).unwrap_or("");
                    args.push(Value::str_from(s));
                }
                RET_INT => args.push(Value::Int((op as i32) >> 8)),
                RET_FLOAT => args.push(Value::Float(((op as i32) >> 8) as f32)),
                _ => args.push(Value::Null),
            },

            OP_DUP => {
                let v = match ret {
                    RET_INT => Value::Int(args.last().map_or(0, |v| v.get_int())),
                    RET_FLOAT => Value::Float(args.last().map_or(0.0, |v| v.get_float())),
                    RET_STR => Value::Str(
                        args.last().map_or_else(|| Rc::from(""), |v| v.get_str()),
                    ),
                    _ => args.last().map_or(Value::Null, |v| v.to_owned_value()),
                };
                args.push(v);
            }
            OP_FORCE => {
                if let Some(v) = args.last_mut() {
                    v.force(ret);
                }
            }

            OP_EMPTY => args.push(Value::Code(cs.empty_code(ret))),
            OP_BLOCK => {
                let len = (op >> 8) as usize;
                args.push(Value::Code(block.at(pc + 1)));
                pc += len;
            }
            OP_COMPILE => {
                let v = args.pop().unwrap_or_default();
                let code = match &v {
                    Value::Int(i) => {
                        let i = *i;
                        literal_block(|c| push_int_op(c, i))
                    }
                    Value::Float(f) => {
                        let f = *f;
                        literal_block(|c| push_float_op(c, f))
                    }
                    Value::Str(_) | Value::Macro(_) => {
                        cs.compile_tagged(&v.get_str(), 0, false)
                    }
                    _ => literal_block(|c| c.push(OP_VALI | RET_NULL)),
                };
                args.push(Value::Code(code));
            }
            OP_COND => {
                let mut v = args.pop().unwrap_or_default();
                if v.is_stringish() {
                    if v.get_strr().is_empty() {
                        v = Value::Null;
                    } else {
                        force_code(cs, &mut v);
                    }
                }
                args.push(v);
            }

            OP_IDENT => args.push(Value::Ident((op >> 8) as usize)),
            OP_IDENT_ARG => {
                let idx = (op >> 8) as usize;
                ensure_arg_used(cs, idx);
                args.push(Value::Ident(idx));
            }
            OP_IDENT_U => {
                let v = args.pop().unwrap_or_default();
                let idx = if v.is_stringish() {
                    let name = v.get_strr().to_string();
                    cs.new_ident(&name, IDF_UNKNOWN)
                } else {
                    cs.dummy_idx()
                };
                ensure_arg_used(cs, idx);
                args.push(Value::Ident(idx));
            }

            OP_LOOKUP | OP_LOOKUP_M => {
                let idx = (op >> 8) as usize;
                let unknown = {
                    let sh = cs.shared.borrow();
                    sh.idents[idx].flags & IDF_UNKNOWN != 0
                };
                if unknown {
                    let name = cs.ident_name(idx).to_string();
                    cs.debug_code(format!("unknown alias lookup: {}", name));
                }
                let sh = cs.shared.borrow();
                let v = alias_read(&sh, idx, ret, op & OP_MASK == OP_LOOKUP_M);
                drop(sh);
                args.push(v);
            }
            OP_LOOKUP_ARG | OP_LOOKUP_MARG => {
                let idx = (op >> 8) as usize;
                if !arg_is_used(cs, idx) {
                    args.push(zero_value(ret));
                } else {
                    let sh = cs.shared.borrow();
                    let v = alias_read(&sh, idx, ret, op & OP_MASK == OP_LOOKUP_MARG);
                    drop(sh);
                    args.push(v);
                }
            }
            OP_LOOKUP_U => lookup_dynamic(cs, &mut args, ret, false)?,
            OP_LOOKUP_MU => lookup_dynamic(cs, &mut args, ret, true)?,

            OP_SVAR => {
                let sh = cs.shared.borrow();
                let v = svar_read(&sh, (op >> 8) as usize, ret);
                drop(sh);
                args.push(v);
            }
            OP_SVAR_M => {
                let sh = cs.shared.borrow();
                let v = svar_read(&sh, (op >> 8) as usize, RET_STR);
                drop(sh);
                args.push(v);
            }
            OP_SVAR1 => {
                let v = args.pop().unwrap_or_default();
                cs.set_svar_checked((op >> 8) as usize, &v.get_str());
            }

            OP_IVAR => {
                let sh = cs.shared.borrow();
                let v = ivar_read(&sh, (op >> 8) as usize, ret);
                drop(sh);
                args.push(v);
            }
            OP_IVAR1 => {
                let v = args.pop().unwrap_or_default();
                cs.set_ivar_checked((op >> 8) as usize, v.get_int());
            }
            OP_IVAR2 => {
                let b = args.pop().unwrap_or_default();
                let a = args.pop().unwrap_or_default();
                cs.set_ivar_checked((op >> 8) as usize, (a.get_int() << 16) | (b.get_int() << 8));
            }
            OP_IVAR3 => {
                let c = args.pop().unwrap_or_default();
                let b = args.pop().unwrap_or_default();
                let a = args.pop().unwrap_or_default();
                cs.set_ivar_checked(
                    (op >> 8) as usize,
                    (a.get_int() << 16) | (b.get_int() << 8) | c.get_int(),
                );
            }

            OP_FVAR => {
                let sh = cs.shared.borrow();
                let v = fvar_read(&sh, (op >> 8) as usize, ret);
                drop(sh);
                args.push(v);
            }
            OP_FVAR1 => {
                let v = args.pop().unwrap_or_default();
                cs.set_fvar_checked((op >> 8) as usize, v.get_float());
            }

            OP_COM => {
                let idx = (op >> 8) as usize;
                let decl = {
                    let sh = cs.shared.borrow();
                    match &sh.idents[idx].kind {
                        IdentKind::Command(c) => c.numargs,
                        _ => 0,
                    }
                };
                let offset = args.len().saturating_sub(decl);
                let cb = command_cb(cs, idx);
                *result = Value::Null;
                let r = cb(cs, &mut args[offset..], result);
                args.truncate(offset);
                r?;
                result.force(ret);
            }
            OP_COM_V => {
                let idx = (op >> 13) as usize;
                let callargs = ((op >> 8) & 0x1F) as usize;
                let offset = args.len().saturating_sub(callargs);
                let cb = command_cb(cs, idx);
                *result = Value::Null;
                let r = cb(cs, &mut args[offset..], result);
                args.truncate(offset);
                r?;
                result.force(ret);
            }
            OP_COM_C => {
                let idx = (op >> 13) as usize;
                let callargs = ((op >> 8) & 0x1F) as usize;
                let offset = args.len().saturating_sub(callargs);
                let cb = command_cb(cs, idx);
                *result = Value::Null;
                let joined = conc(&args[offset..], true);
                args.truncate(offset);
                let mut one = vec![Value::Str(joined)];
                let r = cb(cs, &mut one, result);
                r?;
                result.force(ret);
            }

            OP_CONC | OP_CONC_W => {
                let n = (op >> 8) as usize;
                let start = args.len().saturating_sub(n);
                let joined = conc(&args[start..], op & OP_MASK == OP_CONC);
                args.truncate(start);
                let mut v = Value::Str(joined);
                v.force(ret);
                args.push(v);
            }
            OP_CONC_M => {
                let n = (op >> 8) as usize;
                let start = args.len().saturating_sub(n);
                let joined = conc(&args[start..], false);
                args.truncate(start);
                *result = Value::Str(joined);
                result.force(ret);
            }

            OP_ALIAS => {
                let v = args.pop().unwrap_or_default();
                cs.set_alias_idx((op >> 8) as usize, v);
            }
            OP_ALIAS_ARG => {
                let v = args.pop().unwrap_or_default();
                cs.set_arg((op >> 8) as usize, v);
            }
            OP_ALIAS_U => {
                let v = args.pop().unwrap_or_default();
                let name = args.pop().unwrap_or_default();
                cs.set_alias(&name.get_str(), v);
            }

            OP_CALL | OP_CALL_ARG => {
                let idx = (op >> 13) as usize;
                let callargs = ((op >> 8) & 0x1F) as usize;
                let offset = args.len().saturating_sub(callargs);
                *result = Value::Null;
                let blocked = if op & OP_MASK == OP_CALL_ARG {
                    !arg_is_used(cs, idx)
                } else {
                    let unknown = {
                        let sh = cs.shared.borrow();
                        sh.idents[idx].flags & IDF_UNKNOWN != 0
                    };
                    if unknown {
                        let name = cs.ident_name(idx).to_string();
                        cs.debug_code(format!("unknown command: {}", name));
                    }
                    unknown
                };
                if blocked {
                    args.truncate(offset);
                    result.force(ret);
                } else {
                    let tail = args.split_off(offset);
                    call_alias(cs, idx, tail, result, ret)?;
                }
            }

            OP_CALL_U => {
                let callargs = (op >> 8) as usize;
                let offset = args.len().saturating_sub(callargs);
                let tail: Vec<Value> = args.split_off(offset);
                let idarg = args.pop().unwrap_or_default();
                if !idarg.is_stringish() {
                    *result = idarg;
                    result.force(ret);
                    continue;
                }
                let name = idarg.get_strr().to_string();
                let Some(idx) = cs.ident_index(&name) else {
                    if !valid_name(&name) {
                        *result = idarg;
                        result.force(ret);
                    } else {
                        cs.debug_code(format!("unknown command: {}", name));
                        *result = zero_value(ret);
                    }
                    continue;
                };
                *result = Value::Null;
                pc = dispatch_dynamic(cs, block, pc, idx, tail, result, ret)?;
            }

            _ => {}
        }
    }
}

fn command_cb(cs: &State, idx: usize) -> Rc<crate::ident::CommandFn> {
    let sh = cs.shared.borrow();
    match &sh.idents[idx].kind {
        IdentKind::Command(c) => Rc::clone(&c.cb),
        // only command indices are encoded into command opcodes
        _ => Rc::new(|_: &mut State, _: &mut [Value], _: &mut Value| Ok(())),
    }
}

/// Dispatch for a name resolved at run time: commands, variables, `local`
/// scoping of the remaining block, or an alias call.
fn dispatch_dynamic(
    cs: &mut State,
    block: &CodeRef,
    pc: usize,
    idx: usize,
    mut tail: Vec<Value>,
    result: &mut Value,
    ret: u32,
) -> Result<usize, Control> {
    enum Kind {
        Command(Builtin),
        Ivar,
        Fvar,
        Svar,
        AliasUnused,
        AliasNull,
        Alias,
    }
    let kind = {
        let sh = cs.shared.borrow();
        match &sh.idents[idx].kind {
            IdentKind::Command(c) => Kind::Command(c.builtin),
            IdentKind::Ivar(_) => Kind::Ivar,
            IdentKind::Fvar(_) => Kind::Fvar,
            IdentKind::Svar(_) => Kind::Svar,
            IdentKind::Alias(a) => {
                if !arg_is_used(cs, idx) {
                    Kind::AliasUnused
                } else if matches!(a.val, Value::Null) {
                    Kind::AliasNull
                } else {
                    Kind::Alias
                }
            }
        }
    };
    match kind {
        Kind::Command(Builtin::Local) => {
            let mut ids = Vec::with_capacity(tail.len());
            for v in &mut tail {
                ids.push(cs.force_ident(v));
            }
            {
                let mut sh = cs.shared.borrow_mut();
                for &id in &ids {
                    sh.idents[id].push_alias();
                }
            }
            let r = exec_inner(cs, block, pc, result);
            {
                let mut sh = cs.shared.borrow_mut();
                for &id in &ids {
                    sh.idents[id].pop_alias();
                }
            }
            r
        }
        Kind::Command(_) => {
            exec_command(cs, idx, &mut tail, result, false)?;
            result.force(ret);
            Ok(pc)
        }
        Kind::Ivar => {
            if tail.is_empty() {
                cs.print_var(idx);
            } else {
                cs.set_ivar_args(idx, &mut tail);
            }
            result.force(ret);
            Ok(pc)
        }
        Kind::Fvar => {
            if tail.is_empty() {
                cs.print_var(idx);
            } else {
                let f = tail[0].force_float();
                cs.set_fvar_checked(idx, f);
            }
            result.force(ret);
            Ok(pc)
        }
        Kind::Svar => {
            if tail.is_empty() {
                cs.print_var(idx);
            } else {
                let s = tail[0].get_str();
                cs.set_svar_checked(idx, &s);
            }
            result.force(ret);
            Ok(pc)
        }
        Kind::AliasUnused => {
            result.force(ret);
            Ok(pc)
        }
        Kind::AliasNull => {
            let name = cs.ident_name(idx).to_string();
            cs.debug_code(format!("unknown command: {}", name));
            *result = zero_value(ret);
            Ok(pc)
        }
        Kind::Alias => {
            call_alias(cs, idx, tail, result, ret)?;
            Ok(pc)
        }
    }
}

// ---- public run API ----

impl State {
    /// Compiles and runs a script, returning the value of its last
    /// statement. Script-level errors are reported through the error hook.
    pub fn run(&mut self, src: &str) -> Value {
        let code = self.compile_tagged(src, 0, false);
        let mut v = Value::Null;
        let _ = exec_block(self, &code, &mut v);
        v
    }

    pub fn run_int(&mut self, src: &str) -> i32 {
        let code = self.compile_tagged(src, RET_INT, false);
        let mut v = Value::Null;
        let _ = exec_block(self, &code, &mut v);
        v.get_int()
    }

    pub fn run_float(&mut self, src: &str) -> f32 {
        let code = self.compile_tagged(src, RET_FLOAT, false);
        let mut v = Value::Null;
        let _ = exec_block(self, &code, &mut v);
        v.get_float()
    }

    pub fn run_bool(&mut self, src: &str) -> bool {
        let v = self.run(src);
        v.get_bool()
    }

    pub fn run_str(&mut self, src: &str) -> String {
        let v = self.run(src);
        match v {
            Value::Null => String::new(),
            v => v.get_str().to_string(),
        }
    }

    /// Runs compiled code. Loop-control escapes are handed to the caller so
    /// command bodies can participate in `break`/`continue`.
    pub fn run_code(&mut self, code: &CodeRef) -> Result<Value, Control> {
        let mut v = Value::Null;
        exec_block(self, code, &mut v)?;
        Ok(v)
    }

    /// Runs compiled code into an existing result slot.
    pub(crate) fn run_code_into(
        &mut self,
        code: &CodeRef,
        result: &mut Value,
    ) -> Result<(), Control> {
        exec_block(self, code, result)
    }

    /// Reads a file and runs it, with `file:line` prefixes on any report.
    pub fn run_file(&mut self, path: impl AsRef<std::path::Path>) -> Result<Value, crate::errors::CsError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let old_file = self.src_file.take();
        let old_src = self.src_str.take();
        self.src_file = Some(Rc::from(path.display().to_string().as_str()));
        self.src_str = Some(Rc::from(text.as_str()));
        let code = self.compile_tagged(&text, 0, true);
        let mut v = Value::Null;
        let _ = exec_block(self, &code, &mut v);
        self.src_file = old_file;
        self.src_str = old_src;
        Ok(v)
    }

    /// Invokes a named command or alias with host-supplied arguments.
    pub fn call(&mut self, name: &str, mut args: Vec<Value>) -> Value {
        let mut ret = Value::Null;
        if self.run_depth >= MAX_RUN_DEPTH {
            self.debug_code("exceeded recursion limit".to_string());
            return ret;
        }
        let Some(idx) = self.ident_index(name) else {
            return ret;
        };
        enum Kind {
            Command,
            Ivar,
            Fvar,
            Svar,
            Alias(bool),
        }
        let kind = {
            let sh = self.shared.borrow();
            match &sh.idents[idx].kind {
                IdentKind::Command(_) => Kind::Command,
                IdentKind::Ivar(_) => Kind::Ivar,
                IdentKind::Fvar(_) => Kind::Fvar,
                IdentKind::Svar(_) => Kind::Svar,
                IdentKind::Alias(a) => Kind::Alias(matches!(a.val, Value::Null)),
            }
        };
        match kind {
            Kind::Command => {
                let _ = exec_command(self, idx, &mut args, &mut ret, false);
            }
            Kind::Ivar => {
                if args.is_empty() {
                    self.print_var(idx);
                } else {
                    self.set_ivar_args(idx, &mut args);
                }
            }
            Kind::Fvar => {
                if args.is_empty() {
                    self.print_var(idx);
                } else {
                    let f = args[0].force_float();
                    self.set_fvar_checked(idx, f);
                }
            }
            Kind::Svar => {
                if args.is_empty() {
                    self.print_var(idx);
                } else {
                    let s = args[0].get_str();
                    self.set_svar_checked(idx, &s);
                }
            }
            Kind::Alias(is_null) => {
                if !is_null && arg_is_used(self, idx) {
                    let _ = call_alias(self, idx, args, &mut ret, RET_NULL);
                }
            }
        }
        ret
    }
}
