//! End-to-end evaluation through the public API.

use std::cell::RefCell;
use std::rc::Rc;

use cubescript::{State, Value};

/// A state whose reports are captured instead of printed.
fn quiet_state() -> (State, Rc<RefCell<Vec<String>>>) {
    let reports: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);
    let mut cs = State::new();
    cs.set_error_hook(move |report| {
        sink.borrow_mut().push(report.message.clone());
    });
    (cs, reports)
}

#[test]
fn alias_value_round_trip() {
    let mut cs = State::new();
    let v = cs.run("alias x 5; x");
    assert!(matches!(v, Value::Int(5)));
    assert_eq!(cs.run_int("x"), 5);
    assert_eq!(cs.get_alias("x").as_deref(), Some("5"));
}

#[test]
fn alias_call_with_arguments() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("alias sq [ * $arg1 $arg1 ]; sq 7"), 49);
    assert_eq!(cs.run_int("sq 9"), 81);
}

#[test]
fn loop_leaves_last_result() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("loop i 4 [ result $i ]"), "3");
}

#[test]
fn if_selects_branch() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("if (= 2 2) [ result yes ] [ result no ]"), "yes");
    assert_eq!(cs.run_str("if (= 2 3) [ result yes ] [ result no ]"), "no");
    assert_eq!(cs.run_str("if 1 [ result on ]"), "on");
    assert_eq!(cs.run_str("if 0 [ result on ]"), "");
}

#[test]
fn concat_spacing() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("concat hello \" \" world"), "hello   world");
    assert_eq!(cs.run_str("concatword a b c"), "abc");
    assert_eq!(cs.run_str("concat a b c"), "a b c");
}

#[test]
fn list_length_counts_blocks() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("listlen \"a b [c d] e\""), 4);
}

#[test]
fn short_circuit_operators() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("|| 0 0 5 0"), 5);
    assert_eq!(cs.run_int("&& 1 1 0 1"), 0);
    assert_eq!(cs.run_int("&& 1 2 3"), 3);
    assert_eq!(cs.run_int("|| 0"), 0);
    assert_eq!(cs.run_int("&&"), 1);
    assert_eq!(cs.run_int("||"), 0);
}

#[test]
fn short_circuit_skips_side_effects() {
    let mut cs = State::new();
    cs.run("hits = 0; alias bump [hits = (+ $hits 1); result $arg1]");
    assert_eq!(cs.run_int("&& [bump 0] [bump 1]"), 0);
    assert_eq!(cs.run_int("$hits"), 1);
}

#[test]
fn string_replacement() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("strreplace \"aXbXc\" X Y"), "aYbYc");
    assert_eq!(cs.run_str("strreplace \"aXbXc\" X Y Z"), "aYbZc");
    assert_eq!(cs.run_str("strreplace abc \"\" Y"), "abc");
}

#[test]
fn recursion_limit_reports_and_yields_null() {
    let (mut cs, reports) = quiet_state();
    let v = cs.run("alias r [r]; r");
    assert!(matches!(v, Value::Null));
    assert!(reports
        .borrow()
        .iter()
        .any(|m| m.contains("exceeded recursion limit")));
}

#[test]
fn variable_write_clamps_and_warns() {
    let (mut cs, reports) = quiet_state();
    cs.new_ivar("v", 0, 10, 1).unwrap();
    cs.run("v = 99");
    assert_eq!(cs.get_ivar("v"), Some(10));
    assert!(reports.borrow().iter().any(|m| m.contains("valid range")));
}

#[test]
fn assignments_and_lookups() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("x = 5; result $x"), 5);
    assert_eq!(cs.run_int("x = 7; + $x 1"), 8);
    assert_eq!(cs.run_str("s = \"a b\"; result $s"), "a b");
}

#[test]
fn block_interpolation() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("x = 5; y = [@x]; result $y"), "5");
    assert_eq!(cs.run_str("x = ab; y = [@x cd]; result $y"), "ab cd");
    assert_eq!(cs.run_str("x = 3; result [got @(+ $x 1)]"), "got 4");
}

#[test]
fn nested_interpolation_depth() {
    let mut cs = State::new();
    // one level down, @@ reaches the outer scope
    cs.run("inner = world");
    assert_eq!(cs.run_str("result [[@@inner]]"), "[world]");
}

#[test]
fn string_escapes() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("result \"a^nb\""), "a\nb");
    assert_eq!(cs.run_str("result \"tab^there\""), "tab\there");
    assert_eq!(cs.run_str("result \"q^\"q\""), "q\"q");
}

#[test]
fn format_substitution() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("format \"x=%1 y=%2\" 3 4"), "x=3 y=4");
    assert_eq!(cs.run_str("format \"%1%1!\" do"), "dodo!");
    assert_eq!(cs.run_str("format \"100%%\""), "100%");
}

#[test]
fn doargs_sees_caller_arguments() {
    let mut cs = State::new();
    cs.run("alias inner [doargs [result $arg1]]; alias outer [inner]");
    assert_eq!(cs.run_str("outer 42"), "42");
}

#[test]
fn local_scoping() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("local tmp; tmp = 5; result $tmp"), 5);
    // the local binding disappears with the block
    cs.run("tmp2 = outer; do [local tmp2; tmp2 = inner]");
    assert_eq!(cs.get_alias("tmp2").as_deref(), Some("outer"));
}

#[test]
fn while_and_break() {
    let mut cs = State::new();
    let v = cs.run_str(
        "i = 0; while [< $i 10] [i = (+ $i 1); if (= $i 3) [break]]; result $i",
    );
    assert_eq!(v, "3");
}

#[test]
fn loop_continue_skips() {
    let mut cs = State::new();
    let v = cs.run_int(
        "sum = 0; loop i 5 [if (= $i 2) [continue]; sum = (+ $sum $i)]; result $sum",
    );
    assert_eq!(v, 8);
}

#[test]
fn break_outside_loop_reports() {
    let (mut cs, reports) = quiet_state();
    cs.run("break");
    assert!(reports.borrow().iter().any(|m| m.contains("no loop to break")));
}

#[test]
fn push_shadows_and_restores() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("x = 1; push x 2 [result $x]"), "2");
    assert_eq!(cs.run_str("result $x"), "1");
}

#[test]
fn case_dispatch() {
    let mut cs = State::new();
    assert_eq!(
        cs.run_str("case 2 1 [result one] 2 [result two] () [result other]"),
        "two"
    );
    assert_eq!(
        cs.run_str("case 5 1 [result one] () [result other]"),
        "other"
    );
    assert_eq!(
        cs.run_str("cases b a [result aa] b [result bb] () [result cc]"),
        "bb"
    );
}

#[test]
fn ternary_and_cond() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("? 1 yes no"), "yes");
    assert_eq!(cs.run_str("? 0 yes no"), "no");
    assert_eq!(
        cs.run_str("x = 7; cond [< $x 5] [result low] [< $x 10] [result mid] [result high]"),
        "mid"
    );
}

#[test]
fn math_commands() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("+ 1 2 3"), 6);
    assert_eq!(cs.run_int("- 10 3 2"), 5);
    assert_eq!(cs.run_int("- 4"), -4);
    assert_eq!(cs.run_int("* 2 3 4"), 24);
    assert_eq!(cs.run_int("div 7 2"), 3);
    assert_eq!(cs.run_int("mod 7 3"), 1);
    assert_eq!(cs.run_int("div 1 0"), 0);
    assert_eq!(cs.run_int("min 4 2 9"), 2);
    assert_eq!(cs.run_int("max 4 2 9"), 9);
    assert_eq!(cs.run_int("<< 1 4"), 16);
    assert_eq!(cs.run_int(">> 16 2"), 4);
    assert_eq!(cs.run_int("< 1 2 3"), 1);
    assert_eq!(cs.run_int("< 1 3 2"), 0);
    assert_eq!(cs.run_float("+f 1.5 2.25"), 3.75);
    assert_eq!(cs.run_float("divf 1 0"), 0.0);
    assert_eq!(cs.run_int("abs -5"), 5);
}

#[test]
fn string_commands() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("strlen hello"), 5);
    assert_eq!(cs.run_int("strstr banana nan"), 2);
    assert_eq!(cs.run_int("strstr banana zzz"), -1);
    assert_eq!(cs.run_str("strupper mixedCase"), "MIXEDCASE");
    assert_eq!(cs.run_str("strlower MixedCase"), "mixedcase");
    assert_eq!(cs.run_str("substr abcdef 2 3"), "cde");
    assert_eq!(cs.run_str("substr abcdef 2"), "cdef");
    assert_eq!(cs.run_int("strcode abc 1"), 'b' as i32);
    assert_eq!(cs.run_str("codestr 65"), "A");
    assert_eq!(cs.run_int("=s abc abc"), 1);
    assert_eq!(cs.run_int("<s abc abd"), 1);
    assert_eq!(cs.run_str("tohex 255 2"), "0xFF");
    assert_eq!(cs.run_str("strsplice abcdef XY 2 2"), "abXYef");
}

#[test]
fn value_forcing_in_scripts() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("result 0x10"), 16);
    assert_eq!(cs.run_float("result 1.5"), 1.5);
    assert_eq!(cs.run_int("+ 2.7 0"), 2);
    assert_eq!(cs.run_str("+f 1 0.5"), "1.5");
}

#[test]
fn numeric_statement_is_its_own_result() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("42"), 42);
    assert_eq!(cs.run_int("-7"), -7);
    assert_eq!(cs.run_float("1.25"), 1.25);
}

#[test]
fn unknown_command_reports() {
    let (mut cs, reports) = quiet_state();
    cs.run("definitely_not_defined 1 2");
    assert!(reports
        .borrow()
        .iter()
        .any(|m| m.contains("unknown command")));
}

#[test]
fn getalias_and_identexists() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("identexists nothing_here"), 0);
    cs.run("alias something 9");
    assert_eq!(cs.run_int("identexists something"), 1);
    assert_eq!(cs.run_str("getalias something"), "9");
}

#[test]
fn hex_variable_triplet_assignment() {
    let mut cs = State::new();
    cs.new_ivar_full("color", 0, 0xFFFFFF, 0, cubescript::IDF_HEX, None)
        .unwrap();
    cs.run("color 0xFF 0x80 0x40");
    assert_eq!(cs.get_ivar("color"), Some(0xFF8040));
    cs.run("color = 0x123456");
    assert_eq!(cs.get_ivar("color"), Some(0x123456));
}

#[test]
fn command_registration_from_host() {
    let mut cs = State::new();
    cs.new_command("triple", "i", |_, args, res| {
        *res = Value::Int(args[0].get_int() * 3);
        Ok(())
    })
    .unwrap();
    assert_eq!(cs.run_int("triple 14"), 42);
    // defaulted missing argument
    assert_eq!(cs.run_int("triple"), 0);
}

#[test]
fn variadic_argument_count() {
    let mut cs = State::new();
    cs.new_command("count", "V", |_, args, res| {
        *res = Value::Int(args.len() as i32);
        Ok(())
    })
    .unwrap();
    assert_eq!(cs.run_int("count a b c d"), 4);
    assert_eq!(cs.run_int("count"), 0);
}

#[test]
fn compiled_code_reuse() {
    let mut cs = State::new();
    cs.run("n = 0");
    let code = cs.compile("n = (+ $n 1); result $n");
    assert_eq!(code.handle_count(), 1);
    let again = code.clone();
    assert_eq!(code.handle_count(), 2);
    drop(again);
    assert_eq!(cs.run_code(&code).map(|v| v.get_int()), Ok(1));
    assert_eq!(cs.run_code(&code).map(|v| v.get_int()), Ok(2));
}

#[test]
fn threads_share_aliases() {
    let mut cs = State::new();
    cs.run("shared = 11");
    let mut thread = cs.new_thread();
    assert_eq!(thread.run_int("result $shared"), 11);
    thread.run("shared = 12");
    assert_eq!(cs.run_int("result $shared"), 12);
}

#[test]
fn call_hook_fires() {
    let mut cs = State::new();
    let count = Rc::new(RefCell::new(0usize));
    let counter = Rc::clone(&count);
    cs.set_call_hook(move |_| {
        *counter.borrow_mut() += 1;
    });
    cs.run("+ 1 2");
    assert!(*count.borrow() > 0);
}

#[test]
fn dynamic_lookup_forms() {
    let mut cs = State::new();
    cs.run("target = 5; name = target");
    assert_eq!(cs.run_int("result $$name"), 5);
    assert_eq!(cs.run_int("result $(concatword tar get)"), 5);
}

#[test]
fn empty_and_comment_only_sources() {
    let mut cs = State::new();
    assert!(matches!(cs.run(""), Value::Null));
    assert!(matches!(cs.run("// nothing here"), Value::Null));
    assert!(matches!(cs.run("   \n\n  "), Value::Null));
}

#[test]
fn statement_separators() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("a = 1; b = 2; + $a $b"), 3);
    assert_eq!(cs.run_int("a = 4\nb = 5\n+ $a $b"), 9);
    assert_eq!(cs.run_int("+ 1 2 // trailing comment"), 3);
}
