//! Arithmetic, bitwise and comparison commands.
//!
//! Binary operators fold left over their argument list; a single argument
//! applies the unary form. Trigonometry works in degrees, as the original
//! console did.

use std::cmp::Ordering;

use super::cmd;
use crate::state::State;
use crate::value::Value;

const RAD: f32 = std::f32::consts::PI / 180.0;

fn fold_int(args: &[Value], init: i32, f: impl Fn(i32, i32) -> i32, unary: impl Fn(i32) -> i32) -> i32 {
    if args.len() >= 2 {
        let mut v = args[0].get_int();
        for a in &args[1..] {
            v = f(v, a.get_int());
        }
        v
    } else {
        unary(args.first().map_or(init, |a| a.get_int()))
    }
}

fn fold_float(
    args: &[Value],
    init: f32,
    f: impl Fn(f32, f32) -> f32,
    unary: impl Fn(f32) -> f32,
) -> f32 {
    if args.len() >= 2 {
        let mut v = args[0].get_float();
        for a in &args[1..] {
            v = f(v, a.get_float());
        }
        v
    } else {
        unary(args.first().map_or(init, |a| a.get_float()))
    }
}

fn cmp_chain_int(args: &[Value], ok: impl Fn(Ordering) -> bool) -> bool {
    if args.len() >= 2 {
        args.windows(2)
            .all(|w| ok(w[0].get_int().cmp(&w[1].get_int())))
    } else {
        ok(args.first().map_or(0, |a| a.get_int()).cmp(&0))
    }
}

fn cmp_chain_float(args: &[Value], ok: impl Fn(Option<Ordering>) -> bool) -> bool {
    if args.len() >= 2 {
        args.windows(2)
            .all(|w| ok(w[0].get_float().partial_cmp(&w[1].get_float())))
    } else {
        ok(args.first().map_or(0.0, |a| a.get_float()).partial_cmp(&0.0))
    }
}

fn int_op(
    cs: &mut State,
    name: &str,
    init: i32,
    f: impl Fn(i32, i32) -> i32 + 'static,
    unary: impl Fn(i32) -> i32 + 'static,
) {
    cmd(cs, name, "i1V", move |_, args, res| {
        *res = Value::Int(fold_int(args, init, &f, &unary));
        Ok(())
    });
}

fn float_op(
    cs: &mut State,
    name: &str,
    init: f32,
    f: impl Fn(f32, f32) -> f32 + 'static,
    unary: impl Fn(f32) -> f32 + 'static,
) {
    cmd(cs, name, "f1V", move |_, args, res| {
        *res = Value::Float(fold_float(args, init, &f, &unary));
        Ok(())
    });
}

fn int_cmp(cs: &mut State, name: &str, ok: impl Fn(Ordering) -> bool + 'static) {
    cmd(cs, name, "i1V", move |_, args, res| {
        *res = Value::Int(cmp_chain_int(args, &ok) as i32);
        Ok(())
    });
}

fn float_cmp(cs: &mut State, name: &str, ok: impl Fn(Option<Ordering>) -> bool + 'static) {
    cmd(cs, name, "f1V", move |_, args, res| {
        *res = Value::Int(cmp_chain_float(args, &ok) as i32);
        Ok(())
    });
}

fn float_fn(cs: &mut State, name: &str, f: impl Fn(f32) -> f32 + 'static) {
    cmd(cs, name, "f", move |_, args, res| {
        *res = Value::Float(f(args[0].get_float()));
        Ok(())
    });
}

pub(super) fn install(cs: &mut State) {
    int_op(cs, "+", 0, |a, b| a.wrapping_add(b), |v| v);
    int_op(cs, "*", 1, |a, b| a.wrapping_mul(b), |v| v);
    int_op(cs, "-", 0, |a, b| a.wrapping_sub(b), |v| v.wrapping_neg());
    int_op(cs, "^", 0, |a, b| a ^ b, |v| !v);
    int_op(cs, "~", 0, |a, b| a ^ b, |v| !v);
    int_op(cs, "&", 0, |a, b| a & b, |v| v);
    int_op(cs, "|", 0, |a, b| a | b, |v| v);
    int_op(cs, "^~", 0, |a, b| a ^ !b, |v| v);
    int_op(cs, "&~", 0, |a, b| a & !b, |v| v);
    int_op(cs, "|~", 0, |a, b| a | !b, |v| v);
    int_op(
        cs,
        "<<",
        0,
        |a, b| {
            if b < 32 {
                a.wrapping_shl(b.max(0) as u32)
            } else {
                0
            }
        },
        |v| v,
    );
    int_op(cs, ">>", 0, |a, b| a >> b.clamp(0, 31), |v| v);
    int_op(
        cs,
        "div",
        0,
        |a, b| if b != 0 { a.wrapping_div(b) } else { 0 },
        |v| v,
    );
    int_op(
        cs,
        "mod",
        0,
        |a, b| if b != 0 { a.wrapping_rem(b) } else { 0 },
        |v| v,
    );
    int_op(cs, "min", 0, i32::min, |v| v);
    int_op(cs, "max", 0, i32::max, |v| v);

    float_op(cs, "+f", 0.0, |a, b| a + b, |v| v);
    float_op(cs, "*f", 1.0, |a, b| a * b, |v| v);
    float_op(cs, "-f", 0.0, |a, b| a - b, |v| -v);
    float_op(
        cs,
        "divf",
        0.0,
        |a, b| if b != 0.0 { a / b } else { 0.0 },
        |v| v,
    );
    float_op(
        cs,
        "modf",
        0.0,
        |a, b| if b != 0.0 { a % b } else { 0.0 },
        |v| v,
    );
    float_op(cs, "pow", 0.0, f32::powf, |v| v);
    float_op(cs, "minf", 0.0, f32::min, |v| v);
    float_op(cs, "maxf", 0.0, f32::max, |v| v);

    int_cmp(cs, "=", |o| o == Ordering::Equal);
    int_cmp(cs, "!=", |o| o != Ordering::Equal);
    int_cmp(cs, "<", |o| o == Ordering::Less);
    int_cmp(cs, ">", |o| o == Ordering::Greater);
    int_cmp(cs, "<=", |o| o != Ordering::Greater);
    int_cmp(cs, ">=", |o| o != Ordering::Less);

    float_cmp(cs, "=f", |o| o == Some(Ordering::Equal));
    float_cmp(cs, "!=f", |o| o != Some(Ordering::Equal));
    float_cmp(cs, "<f", |o| o == Some(Ordering::Less));
    float_cmp(cs, ">f", |o| o == Some(Ordering::Greater));
    float_cmp(cs, "<=f", |o| matches!(o, Some(Ordering::Less | Ordering::Equal)));
    float_cmp(cs, ">=f", |o| {
        matches!(o, Some(Ordering::Greater | Ordering::Equal))
    });

    cmd(cs, "abs", "i", |_, args, res| {
        *res = Value::Int(args[0].get_int().wrapping_abs());
        Ok(())
    });
    cmd(cs, "absf", "f", |_, args, res| {
        *res = Value::Float(args[0].get_float().abs());
        Ok(())
    });

    float_fn(cs, "sin", |x| (x * RAD).sin());
    float_fn(cs, "cos", |x| (x * RAD).cos());
    float_fn(cs, "tan", |x| (x * RAD).tan());
    float_fn(cs, "asin", |x| x.asin() / RAD);
    float_fn(cs, "acos", |x| x.acos() / RAD);
    float_fn(cs, "atan", |x| x.atan() / RAD);
    cmd(cs, "atan2", "ff", |_, args, res| {
        *res = Value::Float(args[0].get_float().atan2(args[1].get_float()) / RAD);
        Ok(())
    });

    float_fn(cs, "sqrt", f32::sqrt);
    float_fn(cs, "loge", f32::ln);
    float_fn(cs, "log2", f32::log2);
    float_fn(cs, "log10", f32::log10);
    float_fn(cs, "exp", f32::exp);
    float_fn(cs, "floor", f32::floor);
    float_fn(cs, "ceil", f32::ceil);

    cmd(cs, "round", "ff", |_, args, res| {
        let step = args[1].get_float() as f64;
        let mut r = args[0].get_float() as f64;
        if step > 0.0 {
            r += step * if r < 0.0 { -0.5 } else { 0.5 };
            r -= r % step;
        } else {
            r = if r < 0.0 { (r - 0.5).ceil() } else { (r + 0.5).floor() };
        }
        *res = Value::Float(r as f32);
        Ok(())
    });
}
