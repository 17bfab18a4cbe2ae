//! String inspection and editing commands.

use std::cmp::Ordering;

use super::cmd;
use crate::compile::{escape_string, unescape_string};
use crate::state::State;
use crate::value::Value;
use crate::vm::conc;

fn cmp_chain_str(args: &[Value], ok: impl Fn(Ordering) -> bool) -> bool {
    if args.len() >= 2 {
        args.windows(2)
            .all(|w| ok(w[0].get_strr().cmp(w[1].get_strr())))
    } else {
        ok(args.first().map_or("", |a| a.get_strr()).cmp(""))
    }
}

fn str_cmp(cs: &mut State, name: &str, ok: impl Fn(Ordering) -> bool + 'static) {
    cmd(cs, name, "s1V", move |_, args, res| {
        *res = Value::Int(cmp_chain_str(args, &ok) as i32);
        Ok(())
    });
}

pub(super) fn install(cs: &mut State) {
    cmd(cs, "strstr", "ss", |_, args, res| {
        let hay = args[0].get_strr();
        let needle = args[1].get_strr();
        *res = Value::Int(hay.find(needle).map_or(-1, |i| i as i32));
        Ok(())
    });

    cmd(cs, "strlen", "s", |_, args, res| {
        *res = Value::Int(args[0].get_strr().len() as i32);
        Ok(())
    });

    cmd(cs, "strcode", "si", |_, args, res| {
        let s = args[0].get_strr().as_bytes();
        let i = args[1].get_int();
        let c = if i >= 0 { s.get(i as usize).copied().unwrap_or(0) } else { 0 };
        *res = Value::Int(c as i32);
        Ok(())
    });

    cmd(cs, "codestr", "i", |_, args, res| {
        let c = char::from_u32(args[0].get_int() as u32).unwrap_or('\0');
        let mut s = String::new();
        if c != '\0' {
            s.push(c);
        }
        *res = Value::str_from(&s);
        Ok(())
    });

    cmd(cs, "strlower", "s", |_, args, res| {
        let s: String = args[0]
            .get_strr()
            .chars()
            .map(|c| c.to_ascii_lowercase())
            .collect();
        *res = Value::str_from(&s);
        Ok(())
    });

    cmd(cs, "strupper", "s", |_, args, res| {
        let s: String = args[0]
            .get_strr()
            .chars()
            .map(|c| c.to_ascii_uppercase())
            .collect();
        *res = Value::str_from(&s);
        Ok(())
    });

    cmd(cs, "escape", "s", |_, args, res| {
        *res = Value::str_from(&escape_string(args[0].get_strr()));
        Ok(())
    });

    cmd(cs, "unescape", "s", |_, args, res| {
        *res = Value::str_from(&unescape_string(args[0].get_strr()));
        Ok(())
    });

    cmd(cs, "concat", "V", |_, args, res| {
        *res = Value::Str(conc(args, true));
        Ok(())
    });

    cmd(cs, "concatword", "V", |_, args, res| {
        *res = Value::Str(conc(args, false));
        Ok(())
    });

    cmd(cs, "format", "V", |_, args, res| {
        if args.is_empty() {
            return Ok(());
        }
        let fmt = args[0].get_str();
        let mut out = String::with_capacity(fmt.len());
        let mut chars = fmt.chars();
        while let Some(c) = chars.next() {
            if c == '%' {
                match chars.next() {
                    Some(d @ '1'..='9') => {
                        let i = d as usize - '0' as usize;
                        if let Some(sub) = args.get(i) {
                            out.push_str(&sub.get_str());
                        }
                    }
                    Some(other) => out.push(other),
                    None => break,
                }
            } else {
                out.push(c);
            }
        }
        *res = Value::str_from(&out);
        Ok(())
    });

    cmd(cs, "tohex", "ii", |_, args, res| {
        let width = args[1].get_int().max(1) as usize;
        let s = format!("0x{:01$X}", args[0].get_int() as u32, width);
        *res = Value::str_from(&s);
        Ok(())
    });

    cmd(cs, "substr", "siiN", |_, args, res| {
        let s = args[0].get_strr();
        let len = s.len() as i32;
        let start = args[1].get_int().clamp(0, len);
        let count = if args[3].get_int() >= 3 {
            args[2].get_int().clamp(0, len - start)
        } else {
            len - start
        };
        let sub = s
            .get(start as usize..(start + count) as usize)
            .unwrap_or("");
        *res = Value::str_from(sub);
        Ok(())
    });

    str_cmp(cs, "strcmp", |o| o == Ordering::Equal);
    str_cmp(cs, "=s", |o| o == Ordering::Equal);
    str_cmp(cs, "!=s", |o| o != Ordering::Equal);
    str_cmp(cs, "<s", |o| o == Ordering::Less);
    str_cmp(cs, ">s", |o| o == Ordering::Greater);
    str_cmp(cs, "<=s", |o| o != Ordering::Greater);
    str_cmp(cs, ">=s", |o| o != Ordering::Less);

    cmd(cs, "strreplace", "ssss", |_, args, res| {
        let s = args[0].get_strr();
        let old = args[1].get_strr();
        let new1 = args[2].get_strr();
        let new2 = args[3].get_strr();
        let new2 = if new2.is_empty() { new1 } else { new2 };
        if old.is_empty() {
            *res = Value::str_from(s);
            return Ok(());
        }
        let mut out = String::with_capacity(s.len());
        let mut rest = s;
        let mut i = 0usize;
        while let Some(at) = rest.find(old) {
            out.push_str(&rest[..at]);
            out.push_str(if i % 2 == 0 { new1 } else { new2 });
            rest = &rest[at + old.len()..];
            i += 1;
        }
        out.push_str(rest);
        *res = Value::str_from(&out);
        Ok(())
    });

    cmd(cs, "strsplice", "ssii", |_, args, res| {
        let s = args[0].get_strr().as_bytes();
        let vals = args[1].get_strr().as_bytes();
        let slen = s.len() as i32;
        let offset = args[2].get_int().clamp(0, slen) as usize;
        let count = args[3].get_int().clamp(0, slen - offset as i32) as usize;
        let mut out = Vec::with_capacity(s.len() - count + vals.len());
        out.extend_from_slice(&s[..offset]);
        out.extend_from_slice(vals);
        out.extend_from_slice(&s[offset + count..]);
        *res = Value::str_from(&String::from_utf8_lossy(&out));
        Ok(())
    });
}
