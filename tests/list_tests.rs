//! The list command family, end to end.

use cubescript::State;

#[test]
fn indexing() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("at \"a b c\" 1"), "b");
    assert_eq!(cs.run_str("at \"a [b c] d\" 1"), "b c");
    assert_eq!(cs.run_str("at \"a b c\" 5"), "");
    // nested indexing through extra arguments
    assert_eq!(cs.run_str("at \"[x y] [p q]\" 1 0"), "p");
}

#[test]
fn sublists() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("sublist \"a b c d\" 1 2"), "b c");
    assert_eq!(cs.run_str("sublist \"a b c d\" 2"), "c d");
    assert_eq!(cs.run_str("sublist \"a [b c] d\" 1 1"), "[b c]");
    assert_eq!(cs.run_str("sublist \"a b\" 5 2"), "");
}

#[test]
fn typed_finds() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("listfind= \"10 20 30\" 20 0"), 1);
    assert_eq!(cs.run_int("listfind= \"10 20 30\" 99 0"), -1);
    assert_eq!(cs.run_int("listfind=s \"aa bb cc\" cc 0"), 2);
    assert_eq!(cs.run_str("listassoc=s \"key1 v1 key2 v2\" key2"), "v2");
    assert_eq!(cs.run_str("listassoc= \"1 one 2 two\" 2"), "two");
}

#[test]
fn predicate_commands() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("listfind x \"5 9 12\" [> $x 10]"), 2);
    assert_eq!(cs.run_int("listcount x \"1 5 2 8 3\" [< $x 4]"), 3);
    assert_eq!(cs.run_str("listfilter x \"1 5 2 8 3\" [< $x 4]"), "1 2 3");
}

#[test]
fn loops_over_lists() {
    let mut cs = State::new();
    assert_eq!(
        cs.run_str("out = \"\"; looplist x \"a b c\" [out = (concatword $out $x)]; result $out"),
        "abc"
    );
    assert_eq!(cs.run_str("looplistconcat x \"1 2 3\" [+ $x 10]"), "11 12 13");
    assert_eq!(
        cs.run_str("looplistconcatword x \"1 2 3\" [+ $x 1]"),
        "234"
    );
    assert_eq!(
        cs.run_str("pairs = \"\"; looplist2 k v \"a 1 b 2\" [pairs = (concat $pairs (concatword $k = $v))]; result $pairs"),
        " a=1 b=2"
    );
}

#[test]
fn set_operations() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("listdel \"a b c d\" \"b d\""), "a c");
    assert_eq!(cs.run_str("listintersect \"a b c d\" \"b d x\""), "b d");
    assert_eq!(cs.run_str("listunion \"a b\" \"b c\""), "a b c");
}

#[test]
fn splicing() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("listsplice \"a b c d\" \"X Y\" 1 2"), "a X Y d");
    assert_eq!(cs.run_str("listsplice \"a b\" \"X\" 0 0"), "X a b");
}

#[test]
fn pretty_printing() {
    let mut cs = State::new();
    assert_eq!(cs.run_str("prettylist \"a b c\" and"), "a, b, and c");
    assert_eq!(cs.run_str("prettylist \"a b\" or"), "a or b");
    assert_eq!(cs.run_str("prettylist \"a b c\" \"\""), "a, b, c");
}

#[test]
fn index_of() {
    let mut cs = State::new();
    assert_eq!(cs.run_int("indexof \"a b c\" b"), 1);
    assert_eq!(cs.run_int("indexof \"a b c\" z"), -1);
}

#[test]
fn sorting() {
    let mut cs = State::new();
    assert_eq!(
        cs.run_str("sortlist \"3 1 2\" x y [< $x $y] []"),
        "1 2 3"
    );
    assert_eq!(
        cs.run_str("sortlist \"b a b c a\" x y [<s $x $y] [=s $x $y]"),
        "a b c"
    );
    assert_eq!(
        cs.run_str("uniquelist \"a b a c b\" x y [=s $x $y]"),
        "a b c"
    );
}

#[test]
fn break_inside_list_loop() {
    let mut cs = State::new();
    let v = cs.run_str(
        "seen = \"\"; looplist x \"a b stop c\" [if (=s $x stop) [break]; seen = (concatword $seen $x)]; result $seen",
    );
    assert_eq!(v, "ab");
}
