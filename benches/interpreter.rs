use criterion::{black_box, criterion_group, criterion_main, Criterion};
use cubescript::State;

fn bench_compile(c: &mut Criterion) {
    let mut cs = State::new();
    let src = "alias fib [if (< $arg1 2) [result $arg1] [+ (fib (- $arg1 1)) (fib (- $arg1 2))]]";
    c.bench_function("compile_alias", |b| {
        b.iter(|| black_box(cs.compile(black_box(src))))
    });
}

fn bench_loop(c: &mut Criterion) {
    let mut cs = State::new();
    cs.run("total = 0");
    let code = cs.compile("total = 0; loop i 100 [total = (+ $total $i)]");
    c.bench_function("sum_loop_100", |b| {
        b.iter(|| {
            let _ = black_box(cs.run_code(&code));
        })
    });
}

fn bench_alias_calls(c: &mut Criterion) {
    let mut cs = State::new();
    cs.run("alias add3 [+ $arg1 $arg2 $arg3]");
    let code = cs.compile("add3 1 2 3");
    c.bench_function("alias_call", |b| {
        b.iter(|| {
            let _ = black_box(cs.run_code(&code));
        })
    });
}

fn bench_list_scan(c: &mut Criterion) {
    let mut cs = State::new();
    cs.run("items = (loopconcat i 64 [concatword item $i])");
    let code = cs.compile("listlen $items");
    c.bench_function("listlen_64", |b| {
        b.iter(|| {
            let _ = black_box(cs.run_code(&code));
        })
    });
}

criterion_group!(
    benches,
    bench_compile,
    bench_loop,
    bench_alias_calls,
    bench_list_scan
);
criterion_main!(benches);
