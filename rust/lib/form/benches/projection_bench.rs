use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::{Value, json};

use openerp_form::{Axis, Form, FormOptions, FormState, Runtime, StateBag, project};

fn rows(n: usize) -> (Value, Value) {
    let values: Vec<Value> = (0..n)
        .map(|i| json!({"sku": format!("sku-{}", i), "qty": i, "note": "n"}))
        .collect();
    let active: Vec<Value> = (0..n)
        .map(|i| json!({"sku": i % 3 != 0, "qty": true, "note": i % 2 == 0}))
        .collect();
    (json!({"rows": values}), json!({"rows": active}))
}

fn bench_project_rows(c: &mut Criterion) {
    let (values, active) = rows(1000);

    c.bench_function("project_1000_rows", |b| {
        b.iter(|| {
            let out = project(black_box(&values), black_box(&active));
            black_box(out);
        });
    });
}

fn bench_project_all_active(c: &mut Criterion) {
    let (values, _) = rows(1000);
    let active = json!({});

    c.bench_function("project_1000_rows_all_active", |b| {
        b.iter(|| {
            let out = project(black_box(&values), black_box(&active));
            black_box(out);
        });
    });
}

fn bench_bag_set(c: &mut Criterion) {
    let runtime = Runtime::new();
    let bag = StateBag::new(&runtime, Axis::Values, json!({}));

    c.bench_function("bag_set_nested", |b| {
        let mut i = 0usize;
        b.iter(|| {
            let path = format!("rows[{}].sku", i % 1000);
            bag.set(black_box(path.as_str()), json!(i));
            i += 1;
        });
    });
}

fn bench_active_values_memo(c: &mut Criterion) {
    let (values, active) = rows(200);
    let form = Form::new(
        FormOptions::new().initial_state(
            FormState::new()
                .with(Axis::Values, values)
                .with(Axis::Active, active),
        ),
    );

    // Cached read: nothing changed since the last projection.
    c.bench_function("active_values_cached", |b| {
        form.active_values();
        b.iter(|| black_box(form.active_values()));
    });

    c.bench_function("active_values_after_write", |b| {
        let mut i = 0usize;
        b.iter(|| {
            form.write_field_value("rows[0].qty", json!(i));
            black_box(form.active_values());
            i += 1;
        });
    });
}

criterion_group!(
    benches,
    bench_project_rows,
    bench_project_all_active,
    bench_bag_set,
    bench_active_values_memo
);
criterion_main!(benches);
