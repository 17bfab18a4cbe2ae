//! Control flow, alias plumbing and the loop family.

use std::mem::take;
use std::rc::Rc;

use super::{cmd, ident_is_alias, pop_iter, run_loop_body, run_loop_cond, set_iter};
use crate::code::{CodeRef, MAX_ARGUMENTS};
use crate::errors::{CmdResult, Control};
use crate::ident::Builtin;
use crate::state::State;
use crate::value::Value;
use crate::vm::do_args;

pub(super) fn install(cs: &mut State) {
    builtin(cs, "do", "e", Builtin::Do, |cs, args, res| {
        if let Some(code) = args[0].get_code() {
            let code = code.clone();
            cs.run_code_into(&code, res)?;
        }
        Ok(())
    });

    builtin(cs, "doargs", "e", Builtin::DoArgs, |cs, args, res| {
        let Some(code) = args[0].get_code().cloned() else {
            return Ok(());
        };
        if cs.frames.len() > 1 {
            do_args(cs, |cs| cs.run_code_into(&code, res))
        } else {
            cs.run_code_into(&code, res)
        }
    });

    builtin(cs, "if", "tee", Builtin::If, |cs, args, res| {
        let pick = if args[0].get_bool() { 1 } else { 2 };
        if let Some(code) = args[pick].get_code() {
            let code = code.clone();
            cs.run_code_into(&code, res)?;
        }
        Ok(())
    });

    builtin(cs, "result", "T", Builtin::Result, |_, args, res| {
        *res = take(&mut args[0]);
        Ok(())
    });

    builtin(cs, "!", "t", Builtin::Not, |_, args, res| {
        *res = Value::Int(!args[0].get_bool() as i32);
        Ok(())
    });

    builtin(cs, "&&", "E1V", Builtin::And, |cs, args, res| {
        if args.is_empty() {
            *res = Value::Int(1);
        } else {
            for a in args.iter_mut() {
                if let Some(code) = a.get_code() {
                    let code = code.clone();
                    cs.run_code_into(&code, res)?;
                } else {
                    *res = take(a);
                }
                if !res.get_bool() {
                    break;
                }
            }
        }
        Ok(())
    });

    builtin(cs, "||", "E1V", Builtin::Or, |cs, args, res| {
        if args.is_empty() {
            *res = Value::Int(0);
        } else {
            for a in args.iter_mut() {
                if let Some(code) = a.get_code() {
                    let code = code.clone();
                    cs.run_code_into(&code, res)?;
                } else {
                    *res = take(a);
                }
                if res.get_bool() {
                    break;
                }
            }
        }
        Ok(())
    });

    builtin(cs, "local", "", Builtin::Local, |_, _, _| Ok(()));

    cmd(cs, "?", "tTT", |_, args, res| {
        let pick = if args[0].get_bool() { 1 } else { 2 };
        *res = take(&mut args[pick]);
        Ok(())
    });

    cmd(cs, "cond", "ee2V", |cs, args, res| {
        let mut i = 0;
        while i < args.len() {
            if i + 1 < args.len() {
                let hit = match args[i].get_code() {
                    Some(code) => {
                        let code = code.clone();
                        cs.run_code(&code)?.get_bool()
                    }
                    None => args[i].get_bool(),
                };
                if hit {
                    if let Some(code) = args[i + 1].get_code() {
                        let code = code.clone();
                        cs.run_code_into(&code, res)?;
                    }
                    break;
                }
            } else {
                if let Some(code) = args[i].get_code() {
                    let code = code.clone();
                    cs.run_code_into(&code, res)?;
                }
                break;
            }
            i += 2;
        }
        Ok(())
    });

    cmd(cs, "case", "ite2V", |cs, args, res| {
        let val = args[0].get_int();
        run_case(cs, args, res, |v| {
            matches!(v, Value::Null) || v.get_int() == val
        })
    });

    cmd(cs, "casef", "fte2V", |cs, args, res| {
        let val = args[0].get_float();
        run_case(cs, args, res, |v| {
            matches!(v, Value::Null) || v.get_float() == val
        })
    });

    cmd(cs, "cases", "ste2V", |cs, args, res| {
        let val = args[0].get_str();
        run_case(cs, args, res, |v| {
            matches!(v, Value::Null) || *v.get_str() == *val
        })
    });

    cmd(cs, "break", "", |cs, _, _| {
        if cs.loop_depth > 0 {
            Err(Control::Break)
        } else {
            cs.debug_code("no loop to break".to_string());
            Ok(())
        }
    });

    cmd(cs, "continue", "", |cs, _, _| {
        if cs.loop_depth > 0 {
            Err(Control::Continue)
        } else {
            cs.debug_code("no loop to continue".to_string());
            Ok(())
        }
    });

    cmd(cs, "push", "rTe", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if !ident_is_alias(cs, id) || id < MAX_ARGUMENTS {
            return Ok(());
        }
        let v = take(&mut args[1]);
        cs.shared.borrow_mut().idents[id].push_arg(v, true);
        let r = match args[2].get_code() {
            Some(code) => {
                let code = code.clone();
                cs.run_code_into(&code, res)
            }
            None => Ok(()),
        };
        cs.shared.borrow_mut().idents[id].pop_arg();
        r
    });

    cmd(cs, "pushif", "rTe", |cs, args, res| {
        let Some(id) = args[0].get_ident() else {
            return Ok(());
        };
        if !ident_is_alias(cs, id) || id < MAX_ARGUMENTS {
            return Ok(());
        }
        let v = take(&mut args[1]);
        if !v.get_bool() {
            return Ok(());
        }
        cs.shared.borrow_mut().idents[id].push_arg(v, true);
        let r = match args[2].get_code() {
            Some(code) => {
                let code = code.clone();
                cs.run_code_into(&code, res)
            }
            None => Ok(()),
        };
        cs.shared.borrow_mut().idents[id].pop_arg();
        r
    });

    cmd(cs, "alias", "sT", |cs, args, res| {
        let name = args[0].get_str();
        cs.set_alias(&name, take(&mut args[1]));
        let _ = res;
        Ok(())
    });

    cmd(cs, "resetvar", "s", |cs, args, res| {
        let ok = cs.reset_var(args[0].get_strr());
        *res = Value::Int(ok as i32);
        Ok(())
    });

    cmd(cs, "getalias", "s", |cs, args, res| {
        let v = cs.get_alias(args[0].get_strr()).unwrap_or_default();
        *res = Value::str_from(&v);
        Ok(())
    });

    cmd(cs, "identexists", "s", |cs, args, res| {
        *res = Value::Int(cs.have_ident(args[0].get_strr()) as i32);
        Ok(())
    });

    cmd(cs, "getvarmin", "s", |cs, args, res| {
        *res = Value::Int(cs.get_ivar_min(args[0].get_strr()).unwrap_or(0));
        Ok(())
    });
    cmd(cs, "getvarmax", "s", |cs, args, res| {
        *res = Value::Int(cs.get_ivar_max(args[0].get_strr()).unwrap_or(0));
        Ok(())
    });
    cmd(cs, "getfvarmin", "s", |cs, args, res| {
        *res = Value::Float(cs.get_fvar_min(args[0].get_strr()).unwrap_or(0.0));
        Ok(())
    });
    cmd(cs, "getfvarmax", "s", |cs, args, res| {
        *res = Value::Float(cs.get_fvar_max(args[0].get_strr()).unwrap_or(0.0));
        Ok(())
    });

    cmd(cs, "nodebug", "e", |cs, args, res| {
        let Some(code) = args[0].get_code().cloned() else {
            return Ok(());
        };
        cs.nodebug += 1;
        let r = cs.run_code_into(&code, res);
        cs.nodebug -= 1;
        r
    });

    install_loops(cs);
}

fn builtin(
    cs: &mut State,
    name: &str,
    spec: &str,
    builtin: Builtin,
    f: impl Fn(&mut State, &mut [Value], &mut Value) -> CmdResult + 'static,
) {
    cs.new_command_full(name, spec, builtin, Rc::new(f))
        .expect("standard library builtin registration");
}

fn run_case(
    cs: &mut State,
    args: &mut [Value],
    res: &mut Value,
    matches: impl Fn(&Value) -> bool,
) -> CmdResult {
    let mut i = 1;
    while i + 1 < args.len() {
        if matches(&args[i]) {
            if let Some(code) = args[i + 1].get_code() {
                let code = code.clone();
                cs.run_code_into(&code, res)?;
            }
            break;
        }
        i += 2;
    }
    Ok(())
}

// ---- loops ----

fn loop_args(args: &[Value]) -> Option<(usize, CodeRef)> {
    let id = args[0].get_ident()?;
    let body = args.last()?.get_code()?.clone();
    Some((id, body))
}

fn do_loop(
    cs: &mut State,
    id: usize,
    offset: i32,
    n: i32,
    step: i32,
    cond: Option<CodeRef>,
    body: CodeRef,
    res: &mut Value,
) -> CmdResult {
    if n <= 0 || !ident_is_alias(cs, id) {
        return Ok(());
    }
    let mut pushed = false;
    for i in 0..n {
        set_iter(cs, id, Value::Int(offset + i * step), &mut pushed);
        if let Some(c) = &cond {
            match run_loop_cond(cs, c) {
                Some(true) => {}
                _ => break,
            }
        }
        if !run_loop_body(cs, &body, res) {
            break;
        }
    }
    pop_iter(cs, id, pushed);
    Ok(())
}

fn loop_conc(
    cs: &mut State,
    id: usize,
    offset: i32,
    n: i32,
    step: i32,
    body: CodeRef,
    space: bool,
    res: &mut Value,
) -> CmdResult {
    if n <= 0 || !ident_is_alias(cs, id) {
        return Ok(());
    }
    let mut pushed = false;
    let mut s = String::new();
    for i in 0..n {
        set_iter(cs, id, Value::Int(offset + i * step), &mut pushed);
        let mut v = Value::Null;
        let more = run_loop_body(cs, &body, &mut v);
        if space && i > 0 {
            s.push(' ');
        }
        s.push_str(&v.get_str());
        if !more {
            break;
        }
    }
    pop_iter(cs, id, pushed);
    *res = Value::str_from(&s);
    Ok(())
}

fn install_loops(cs: &mut State) {
    cmd(cs, "loop", "rie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        do_loop(cs, id, 0, args[1].get_int(), 1, None, body, res)
    });
    cmd(cs, "loop+", "riie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        do_loop(cs, id, args[1].get_int(), args[2].get_int(), 1, None, body, res)
    });
    cmd(cs, "loop*", "riie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        do_loop(cs, id, 0, args[2].get_int(), args[1].get_int(), None, body, res)
    });
    cmd(cs, "loop+*", "riiie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        do_loop(
            cs,
            id,
            args[1].get_int(),
            args[3].get_int(),
            args[2].get_int(),
            None,
            body,
            res,
        )
    });

    cmd(cs, "loopwhile", "riee", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        let cond = args[2].get_code().cloned();
        do_loop(cs, id, 0, args[1].get_int(), 1, cond, body, res)
    });
    cmd(cs, "loopwhile+", "riiee", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        let cond = args[3].get_code().cloned();
        do_loop(cs, id, args[1].get_int(), args[2].get_int(), 1, cond, body, res)
    });
    cmd(cs, "loopwhile*", "riiee", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        let cond = args[3].get_code().cloned();
        do_loop(cs, id, 0, args[2].get_int(), args[1].get_int(), cond, body, res)
    });
    cmd(cs, "loopwhile+*", "riiiee", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        let cond = args[4].get_code().cloned();
        do_loop(
            cs,
            id,
            args[1].get_int(),
            args[3].get_int(),
            args[2].get_int(),
            cond,
            body,
            res,
        )
    });

    cmd(cs, "while", "ee", |cs, args, res| {
        let (Some(cond), Some(body)) = (args[0].get_code().cloned(), args[1].get_code().cloned())
        else {
            return Ok(());
        };
        loop {
            match run_loop_cond(cs, &cond) {
                Some(true) => {}
                _ => break,
            }
            if !run_loop_body(cs, &body, res) {
                break;
            }
        }
        Ok(())
    });

    cmd(cs, "loopconcat", "rie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        loop_conc(cs, id, 0, args[1].get_int(), 1, body, true, res)
    });
    cmd(cs, "loopconcat+", "riie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        loop_conc(cs, id, args[1].get_int(), args[2].get_int(), 1, body, true, res)
    });
    cmd(cs, "loopconcat*", "riie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        loop_conc(cs, id, 0, args[2].get_int(), args[1].get_int(), body, true, res)
    });
    cmd(cs, "loopconcat+*", "riiie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        loop_conc(
            cs,
            id,
            args[1].get_int(),
            args[3].get_int(),
            args[2].get_int(),
            body,
            true,
            res,
        )
    });

    cmd(cs, "loopconcatword", "rie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        loop_conc(cs, id, 0, args[1].get_int(), 1, body, false, res)
    });
    cmd(cs, "loopconcatword+", "riie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        loop_conc(cs, id, args[1].get_int(), args[2].get_int(), 1, body, false, res)
    });
    cmd(cs, "loopconcatword*", "riie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        loop_conc(cs, id, 0, args[2].get_int(), args[1].get_int(), body, false, res)
    });
    cmd(cs, "loopconcatword+*", "riiie", |cs, args, res| {
        let Some((id, body)) = loop_args(args) else {
            return Ok(());
        };
        loop_conc(
            cs,
            id,
            args[1].get_int(),
            args[3].get_int(),
            args[2].get_int(),
            body,
            false,
            res,
        )
    });
}
