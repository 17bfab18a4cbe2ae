//! The list command family, built on the list tokenizer.

use super::{cmd, ident_is_alias, pop_iter, run_loop_body, set_iter};
use crate::code::CodeRef;
use crate::compile::unescape_string;
use crate::errors::CmdResult;
use crate::list::{list_includes, list_length, ListParser};
use crate::state::State;
use crate::value::{parse_float, parse_int, Value};

fn iter_args(args: &[Value]) -> Option<(usize, String, CodeRef)> {
    let id = args[0].get_ident()?;
    let list = args[1].get_str().to_string();
    let body = args[2].get_code()?.clone();
    Some((id, list, body))
}

pub(super) fn install(cs: &mut State) {
    cmd(cs, "listlen", "s", |_, args, res| {
        *res = Value::Int(list_length(args[0].get_strr()) as i32);
        Ok(())
    });

    cmd(cs, "at", "si1V", |_, args, res| {
        if args.is_empty() {
            return Ok(());
        }
        let mut cur = args[0].get_str().to_string();
        for idx_arg in &args[1..] {
            let mut pos = idx_arg.get_int();
            let mut p = ListParser::new(&cur);
            while pos > 0 {
                if !p.parse() {
                    break;
                }
                pos -= 1;
            }
            cur = if pos > 0 || !p.parse() {
                String::new()
            } else {
                p.element()
            };
        }
        *res = Value::str_from(&cur);
        Ok(())
    });

    cmd(cs, "sublist", "siiN", |_, args, res| {
        let s = args[0].get_strr();
        let offset = args[1].get_int().max(0);
        let len = if args[3].get_int() >= 3 {
            args[2].get_int().max(0)
        } else {
            -1
        };
        let mut p = ListParser::new(s);
        for _ in 0..offset {
            if !p.parse() {
                break;
            }
        }
        if len < 0 {
            if offset > 0 {
                p.skip();
            }
            *res = Value::str_from(p.rest());
            return Ok(());
        }
        let list_start = p.rest_pos();
        p.clear_spans();
        let mut n = len;
        while n > 0 {
            if !p.parse() {
                break;
            }
            n -= 1;
        }
        let qend = if p.quote().is_empty() {
            list_start
        } else {
            p.quote_end()
        };
        *res = Value::str_from(&s[list_start..qend.max(list_start)]);
        Ok(())
    });

    cmd(cs, "listfind", "rse", |cs, args, res| {
        let Some((id, list, body)) = iter_args(args) else {
            *res = Value::Int(-1);
            return Ok(());
        };
        if !ident_is_alias(cs, id) {
            *res = Value::Int(-1);
            return Ok(());
        }
        let mut pushed = false;
        let mut found = -1;
        let mut n = 0;
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::str_from(p.item()), &mut pushed);
            if cs.run_code(&body).map(|v| v.get_bool()).unwrap_or(false) {
                found = n;
                break;
            }
            n += 1;
        }
        pop_iter(cs, id, pushed);
        *res = Value::Int(found);
        Ok(())
    });

    cmd(cs, "listassoc", "rse", |cs, args, res| {
        let Some((id, list, body)) = iter_args(args) else {
            return Ok(());
        };
        if !ident_is_alias(cs, id) {
            return Ok(());
        }
        let mut pushed = false;
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::str_from(p.item()), &mut pushed);
            if cs.run_code(&body).map(|v| v.get_bool()).unwrap_or(false) {
                if p.parse() {
                    *res = Value::str_from(&p.element());
                }
                break;
            }
            if !p.parse() {
                break;
            }
        }
        pop_iter(cs, id, pushed);
        Ok(())
    });

    typed_find(cs, "listfind=", "sii", |item, val| parse_int(item) == val.get_int());
    typed_find(cs, "listfind=f", "sfi", |item, val| {
        parse_float(item) == val.get_float()
    });
    typed_find(cs, "listfind=s", "ssi", |item, val| item == val.get_strr());

    typed_assoc(cs, "listassoc=", "si", |item, val| parse_int(item) == val.get_int());
    typed_assoc(cs, "listassoc=f", "sf", |item, val| {
        parse_float(item) == val.get_float()
    });
    typed_assoc(cs, "listassoc=s", "ss", |item, val| item == val.get_strr());

    cmd(cs, "looplist", "rse", |cs, args, res| {
        let Some((id, list, body)) = iter_args(args) else {
            return Ok(());
        };
        loop_list(cs, &[id], &list, &body, res, None)
    });

    cmd(cs, "looplist2", "rrse", |cs, args, res| {
        let (Some(id), Some(id2)) = (args[0].get_ident(), args[1].get_ident()) else {
            return Ok(());
        };
        let list = args[2].get_str().to_string();
        let Some(body) = args[3].get_code().cloned() else {
            return Ok(());
        };
        loop_list(cs, &[id, id2], &list, &body, res, None)
    });

    cmd(cs, "looplist3", "rrrse", |cs, args, res| {
        let (Some(id), Some(id2), Some(id3)) = (
            args[0].get_ident(),
            args[1].get_ident(),
            args[2].get_ident(),
        ) else {
            return Ok(());
        };
        let list = args[3].get_str().to_string();
        let Some(body) = args[4].get_code().cloned() else {
            return Ok(());
        };
        loop_list(cs, &[id, id2, id3], &list, &body, res, None)
    });

    cmd(cs, "looplistconcat", "rse", |cs, args, res| {
        let Some((id, list, body)) = iter_args(args) else {
            return Ok(());
        };
        loop_list(cs, &[id], &list, &body, res, Some(true))
    });

    cmd(cs, "looplistconcatword", "rse", |cs, args, res| {
        let Some((id, list, body)) = iter_args(args) else {
            return Ok(());
        };
        loop_list(cs, &[id], &list, &body, res, Some(false))
    });

    cmd(cs, "listfilter", "rse", |cs, args, res| {
        let Some((id, list, body)) = iter_args(args) else {
            return Ok(());
        };
        if !ident_is_alias(cs, id) {
            return Ok(());
        }
        let mut pushed = false;
        let mut out = String::new();
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::str_from(p.item()), &mut pushed);
            if cs.run_code(&body).map(|v| v.get_bool()).unwrap_or(false) {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(p.quote());
            }
        }
        pop_iter(cs, id, pushed);
        *res = Value::str_from(&out);
        Ok(())
    });

    cmd(cs, "listcount", "rse", |cs, args, res| {
        let Some((id, list, body)) = iter_args(args) else {
            return Ok(());
        };
        if !ident_is_alias(cs, id) {
            return Ok(());
        }
        let mut pushed = false;
        let mut count = 0;
        let mut p = ListParser::new(&list);
        while p.parse() {
            set_iter(cs, id, Value::str_from(p.item()), &mut pushed);
            if cs.run_code(&body).map(|v| v.get_bool()).unwrap_or(false) {
                count += 1;
            }
        }
        pop_iter(cs, id, pushed);
        *res = Value::Int(count);
        Ok(())
    });

    cmd(cs, "prettylist", "ss", |_, args, res| {
        let s = args[0].get_strr();
        let conj = args[1].get_strr();
        let len = list_length(s);
        let mut out = String::new();
        let mut n = 0;
        let mut p = ListParser::new(s);
        while p.parse() {
            if p.quote().starts_with('"') {
                out.push_str(&unescape_string(p.item()));
            } else {
                out.push_str(p.item());
            }
            if n + 1 < len {
                if len > 2 || conj.is_empty() {
                    out.push(',');
                }
                if n + 2 == len && !conj.is_empty() {
                    out.push(' ');
                    out.push_str(conj);
                }
                out.push(' ');
            }
            n += 1;
        }
        *res = Value::str_from(&out);
        Ok(())
    });

    cmd(cs, "indexof", "ss", |_, args, res| {
        *res = Value::Int(list_includes(args[0].get_strr(), args[1].get_strr()));
        Ok(())
    });

    cmd(cs, "listdel", "ss", |_, args, res| {
        *res = merge_lists(args[0].get_strr(), args[1].get_strr(), "", false);
        Ok(())
    });
    cmd(cs, "listintersect", "ss", |_, args, res| {
        *res = merge_lists(args[0].get_strr(), args[1].get_strr(), "", true);
        Ok(())
    });
    cmd(cs, "listunion", "ss", |_, args, res| {
        let base = args[0].get_strr();
        *res = merge_lists(args[1].get_strr(), base, base, false);
        Ok(())
    });

    cmd(cs, "listsplice", "ssii", |_, args, res| {
        let s = args[0].get_strr();
        let vals = args[1].get_strr();
        let offset = args[2].get_int().max(0);
        let len = args[3].get_int().max(0);
        let mut p = ListParser::new(s);
        for _ in 0..offset {
            if !p.parse() {
                break;
            }
        }
        let qend = if offset > 0 && !p.quote().is_empty() {
            p.quote_end()
        } else {
            0
        };
        let mut out = String::new();
        out.push_str(&s[..qend]);
        if !vals.is_empty() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(vals);
        }
        for _ in 0..len {
            if !p.parse() {
                break;
            }
        }
        p.skip();
        let rest = p.rest();
        if !rest.is_empty() && !rest.starts_with(')') && !rest.starts_with(']') {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(rest);
        }
        *res = Value::str_from(&out);
        Ok(())
    });

    cmd(cs, "sortlist", "srree", |cs, args, res| {
        let list = args[0].get_str().to_string();
        let (Some(x), Some(y)) = (args[1].get_ident(), args[2].get_ident()) else {
            return Ok(());
        };
        let body = args[3].get_code().cloned();
        let unique = args[4].get_code().cloned();
        sort_list(cs, &list, x, y, body, unique, res)
    });

    cmd(cs, "uniquelist", "srre", |cs, args, res| {
        let list = args[0].get_str().to_string();
        let (Some(x), Some(y)) = (args[1].get_ident(), args[2].get_ident()) else {
            return Ok(());
        };
        let unique = args[3].get_code().cloned();
        sort_list(cs, &list, x, y, None, unique, res)
    });
}

fn typed_find(
    cs: &mut State,
    name: &str,
    spec: &str,
    matches: impl Fn(&str, &Value) -> bool + 'static,
) {
    cmd(cs, name, spec, move |_, args, res| {
        let list = args[0].get_str();
        let skip = args[2].get_int();
        let mut n = 0;
        let mut p = ListParser::new(&list);
        'outer: while p.parse() {
            if matches(p.item(), &args[1]) {
                *res = Value::Int(n);
                return Ok(());
            }
            for _ in 0..skip {
                if !p.parse() {
                    break 'outer;
                }
                n += 1;
            }
            n += 1;
        }
        *res = Value::Int(-1);
        Ok(())
    });
}

fn typed_assoc(
    cs: &mut State,
    name: &str,
    spec: &str,
    matches: impl Fn(&str, &Value) -> bool + 'static,
) {
    cmd(cs, name, spec, move |_, args, res| {
        let list = args[0].get_str();
        let mut p = ListParser::new(&list);
        while p.parse() {
            if matches(p.item(), &args[1]) {
                if p.parse() {
                    *res = Value::str_from(&p.element());
                }
                return Ok(());
            }
            if !p.parse() {
                break;
            }
        }
        Ok(())
    });
}

fn loop_list(
    cs: &mut State,
    ids: &[usize],
    list: &str,
    body: &CodeRef,
    res: &mut Value,
    concat: Option<bool>,
) -> CmdResult {
    for &id in ids {
        if !ident_is_alias(cs, id) {
            return Ok(());
        }
    }
    if ids.len() > 1 && ids.windows(2).any(|w| w[0] == w[1]) {
        return Ok(());
    }
    let mut pushed = vec![false; ids.len()];
    let mut out = String::new();
    let mut first = true;
    let mut p = ListParser::new(list);
    'outer: loop {
        if !p.parse() {
            break;
        }
        set_iter(cs, ids[0], Value::str_from(&p.element()), &mut pushed[0]);
        for k in 1..ids.len() {
            let v = if p.parse() { p.element() } else { String::new() };
            set_iter(cs, ids[k], Value::str_from(&v), &mut pushed[k]);
        }
        let mut v = Value::Null;
        let more = run_loop_body(cs, body, &mut v);
        if let Some(space) = concat {
            if space && !first {
                out.push(' ');
            }
            out.push_str(&v.get_str());
            first = false;
        } else {
            *res = v;
        }
        if !more {
            break 'outer;
        }
    }
    for (k, &id) in ids.iter().enumerate() {
        pop_iter(cs, id, pushed[k]);
    }
    if concat.is_some() {
        *res = Value::str_from(&out);
    }
    Ok(())
}

/// Keeps items of `iter` whose membership in `filter` matches `want`,
/// appended after `base`.
fn merge_lists(iter: &str, filter: &str, base: &str, want: bool) -> Value {
    let mut out = String::from(base);
    let mut p = ListParser::new(iter);
    while p.parse() {
        let found = list_includes(filter, p.item()) >= 0;
        if found == want {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(p.quote());
        }
    }
    Value::str_from(&out)
}

fn sort_list(
    cs: &mut State,
    list: &str,
    x: usize,
    y: usize,
    body: Option<CodeRef>,
    unique: Option<CodeRef>,
    res: &mut Value,
) -> CmdResult {
    if x == y || !ident_is_alias(cs, x) || !ident_is_alias(cs, y) {
        return Ok(());
    }
    struct Item {
        raw: String,
        quote: String,
        dead: bool,
    }
    let mut items: Vec<Item> = Vec::new();
    let mut p = ListParser::new(list);
    while p.parse() {
        items.push(Item {
            raw: p.item().to_string(),
            quote: p.quote().to_string(),
            dead: false,
        });
    }
    if items.is_empty() {
        *res = Value::str_from(list);
        return Ok(());
    }

    {
        let mut sh = cs.shared.borrow_mut();
        sh.idents[x].push_arg(Value::Null, true);
        sh.idents[y].push_arg(Value::Null, true);
    }

    let pair_test = |cs: &mut State, code: &CodeRef, a: &str, b: &str| -> bool {
        {
            let mut sh = cs.shared.borrow_mut();
            if let Some(ax) = sh.alias_mut(x) {
                ax.set_value(Value::str_from(a));
            }
            if let Some(ay) = sh.alias_mut(y) {
                ay.set_value(Value::str_from(b));
            }
        }
        cs.run_code(code).map(|v| v.get_bool()).unwrap_or(false)
    };

    if let Some(body) = &body {
        // insertion sort so the comparator can run script between moves
        for i in 1..items.len() {
            let mut j = i;
            while j > 0 {
                if pair_test(cs, body, &items[j].raw, &items[j - 1].raw) {
                    items.swap(j, j - 1);
                    j -= 1;
                } else {
                    break;
                }
            }
        }
        if let Some(unique) = &unique {
            for i in 1..items.len() {
                let (prev, cur) = {
                    let a = items[i - 1].raw.clone();
                    let b = items[i].raw.clone();
                    (a, b)
                };
                if pair_test(cs, unique, &prev, &cur) {
                    items[i].dead = true;
                }
            }
        }
    } else if let Some(unique) = &unique {
        for i in 1..items.len() {
            for j in 0..i {
                if !items[j].dead {
                    let (a, b) = (items[i].raw.clone(), items[j].raw.clone());
                    if pair_test(cs, unique, &a, &b) {
                        items[i].dead = true;
                        break;
                    }
                }
            }
        }
    }

    {
        let mut sh = cs.shared.borrow_mut();
        sh.idents[x].pop_arg();
        sh.idents[y].pop_arg();
    }

    let mut out = String::new();
    for item in items.iter().filter(|i| !i.dead) {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(&item.quote);
    }
    *res = Value::str_from(&out);
    Ok(())
}
