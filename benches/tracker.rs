//! Benchmarks for folding step events into run state

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use optrack::models::{Operation, OperationState, Step};
use optrack::state::apply_all;
use optrack::StepEvent;
use std::hint::black_box;

fn operation(step_count: usize) -> Operation {
    Operation {
        id: "bench".to_string(),
        title: "Benchmark".to_string(),
        success_title: None,
        success_message: None,
        steps: (0..step_count)
            .map(|i| Step::new(format!("step_{i}"), format!("Step {i}")))
            .collect(),
    }
}

/// started/finished for every step, with a failure on the last one
fn events(step_count: usize) -> Vec<StepEvent> {
    let mut events = Vec::with_capacity(step_count * 2);
    for i in 0..step_count {
        let id = format!("step_{i}");
        events.push(StepEvent::started(id.clone()));
        if i + 1 == step_count {
            events.push(StepEvent::failed(id, "● Benchmark failure"));
        } else {
            events.push(StepEvent::finished(id));
        }
    }
    events
}

fn bench_apply_all(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_all");

    for step_count in [3, 10, 50] {
        let initial = OperationState::new(operation(step_count));
        let events = events(step_count);

        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(step_count),
            &events,
            |b, events| b.iter(|| black_box(apply_all(&initial, events))),
        );
    }

    group.finish();
}

fn bench_step_views(c: &mut Criterion) {
    let state = apply_all(&OperationState::new(operation(10)), &events(10));

    c.bench_function("step_views", |b| b.iter(|| black_box(state.step_views())));
}

criterion_group!(benches, bench_apply_all, bench_step_views);
criterion_main!(benches);
