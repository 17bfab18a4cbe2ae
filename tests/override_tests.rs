//! Variable override policy, observed through the host API and scripts.

use std::cell::RefCell;
use std::rc::Rc;

use cubescript::{State, IDF_OVERRIDE, IDF_PERSIST};

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
fn override_mode_shadows_and_restores() {
    let mut cs = State::new();
    cs.new_ivar("depth", 0, 100, 25).unwrap();

    cs.set_override_mode(true);
    cs.run("depth = 80");
    assert_eq!(cs.get_ivar("depth"), Some(80));
    cs.set_override_mode(false);

    cs.clear_override("depth");
    assert_eq!(cs.get_ivar("depth"), Some(25));
}

#[test]
fn clear_overrides_restores_everything() {
    let mut cs = State::new();
    cs.new_ivar("a", 0, 10, 1).unwrap();
    cs.new_fvar("b", 0.0, 10.0, 2.5).unwrap();
    cs.new_svar("c", "orig").unwrap();

    cs.set_override_mode(true);
    cs.run("a = 9; b = 7.5; c = changed");
    assert_eq!(cs.get_ivar("a"), Some(9));
    assert_eq!(cs.get_fvar("b"), Some(7.5));
    assert_eq!(cs.get_svar("c").as_deref(), Some("changed"));
    cs.set_override_mode(false);

    cs.clear_overrides();
    assert_eq!(cs.get_ivar("a"), Some(1));
    assert_eq!(cs.get_fvar("b"), Some(2.5));
    assert_eq!(cs.get_svar("c").as_deref(), Some("orig"));
}

#[test]
fn plain_write_discards_stale_override() {
    let mut cs = State::new();
    cs.new_ivar("w", 0, 100, 10).unwrap();

    cs.set_override_mode(true);
    cs.run("w = 50");
    cs.set_override_mode(false);

    // a normal write clears the overridden state and sticks
    cs.run("w = 33");
    assert_eq!(cs.get_ivar("w"), Some(33));
    cs.clear_override("w");
    assert_eq!(cs.get_ivar("w"), Some(33));
}

#[test]
fn persistent_variables_cannot_be_overridden() {
    let (mut cs, reports) = quiet_state();
    cs.new_ivar_full("keep", 0, 100, 5, IDF_PERSIST, None).unwrap();

    cs.set_override_mode(true);
    cs.run("keep = 50");
    assert_eq!(cs.get_ivar("keep"), Some(5));
    assert!(reports
        .borrow()
        .iter()
        .any(|m| m.contains("cannot override persistent variable")));
}

#[test]
fn override_flagged_variables_always_shadow() {
    let mut cs = State::new();
    cs.new_ivar_full("ov", 0, 100, 3, IDF_OVERRIDE, None).unwrap();

    // no override mode needed: the variable itself demands shadowing
    cs.run("ov = 42");
    assert_eq!(cs.get_ivar("ov"), Some(42));
    cs.clear_override("ov");
    assert_eq!(cs.get_ivar("ov"), Some(3));
}

#[test]
fn readonly_variables_refuse_writes() {
    let (mut cs, reports) = quiet_state();
    cs.new_ivar_full("ro", 0, 100, 7, cubescript::IDF_READONLY, None)
        .unwrap();
    cs.run("ro = 50");
    assert_eq!(cs.get_ivar("ro"), Some(7));
    assert!(reports.borrow().iter().any(|m| m.contains("read only")));
}

#[test]
fn reset_var_clears_override() {
    let mut cs = State::new();
    cs.new_ivar("rv", 0, 100, 12).unwrap();
    cs.set_override_mode(true);
    cs.run("rv = 90");
    cs.set_override_mode(false);
    assert_eq!(cs.run_int("resetvar rv"), 1);
    assert_eq!(cs.get_ivar("rv"), Some(12));
}

#[test]
fn change_callback_fires_on_writes() {
    let hits = Rc::new(RefCell::new(0usize));
    let counter = Rc::clone(&hits);
    let mut cs = State::new();
    cs.new_ivar_full(
        "cbvar",
        0,
        100,
        0,
        0,
        Some(Rc::new(move |_: &mut State| {
            *counter.borrow_mut() += 1;
        })),
    )
    .unwrap();
    cs.run("cbvar = 4");
    assert_eq!(*hits.borrow(), 1);
    cs.touch_var("cbvar");
    assert_eq!(*hits.borrow(), 2);
}
