//! Runs the sample scripts and checks the aliases they leave behind.

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use cubescript::State;

fn run_script(name: &str) -> (State, Vec<String>) {
    let path = Path::new("scripts").join(name);
    let reports: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);
    let mut cs = State::new();
    cs.set_error_hook(move |report| {
        sink.borrow_mut().push(report.to_string());
    });
    cs.run_file(&path)
        .unwrap_or_else(|e| panic!("failed to run {}: {}", path.display(), e));
    let collected = reports.borrow().clone();
    (cs, collected)
}

#[test]
fn counters_script() {
    let (cs, reports) = run_script("counters.cfg");
    assert!(reports.is_empty(), "unexpected reports: {:?}", reports);
    assert_eq!(cs.get_alias("sum_result").as_deref(), Some("45"));
    assert_eq!(cs.get_alias("evens_result").as_deref(), Some("0 2 4 6"));
    assert_eq!(cs.get_alias("countdown_result").as_deref(), Some("5 4 3"));
}

#[test]
fn inventory_script() {
    let (cs, reports) = run_script("inventory.cfg");
    assert!(reports.is_empty(), "unexpected reports: {:?}", reports);
    assert_eq!(cs.get_alias("item_count").as_deref(), Some("5"));
    assert_eq!(cs.get_alias("second_item").as_deref(), Some("health potion"));
    assert_eq!(
        cs.get_alias("potions").as_deref(),
        Some("[health potion] [mana potion]")
    );
    assert_eq!(
        cs.get_alias("without_bow").as_deref(),
        Some("sword [health potion] shield [mana potion]")
    );
    assert_eq!(cs.get_alias("bow_price").as_deref(), Some("95"));
    assert_eq!(cs.get_alias("shouted").as_deref(), Some("SWORD"));
    assert_eq!(cs.get_alias("banner").as_deref(), Some("== sword =="));
}

#[test]
fn all_scripts_run_clean() {
    let entries = std::fs::read_dir("scripts").expect("scripts directory");
    let mut seen = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("cfg") {
            continue;
        }
        seen += 1;
        let reports: Rc<RefCell<Vec<String>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&reports);
        let mut cs = State::new();
        cs.set_error_hook(move |report| {
            sink.borrow_mut().push(report.to_string());
        });
        cs.run_file(&path)
            .unwrap_or_else(|e| panic!("failed to run {}: {}", path.display(), e));
        assert!(
            reports.borrow().is_empty(),
            "{} reported: {:?}",
            path.display(),
            reports.borrow()
        );
    }
    assert!(seen >= 2);
}
