//! State machine run benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use interop_core::{
    Guard, MachineConfig, Pattern, PatternData, Report, State, StateMachine, StateTable,
    StateType, Transition,
};
use interop_protocol::{ContentKind, Event, HttpTransport, TransportConfig};
use std::sync::Arc;
use tokio::runtime::Runtime;

/// START -> s1 -> ... -> END, each step guarded on status and a JSON field.
fn chain(steps: usize) -> Pattern {
    let mut states = StateTable::new();
    for i in 0..steps {
        let state_type = if i == 0 {
            StateType::Start
        } else {
            StateType::Normal
        };
        let target = if i + 1 == steps {
            "end".to_string()
        } else {
            format!("s{}", i + 1)
        };
        let guards = vec![
            Guard::parse("status", "EQUALS", "200", None).unwrap(),
            Guard::parse("content($.step)", "EQUALS", &i.to_string(), None).unwrap(),
        ];
        states
            .insert(
                State::new(format!("s{}", i), state_type)
                    .with_transition(Transition::guarded(target, guards)),
            )
            .unwrap();
    }
    states.insert(State::new("end", StateType::End)).unwrap();
    Pattern::from_parts("chain", states, PatternData::new()).unwrap()
}

fn events(steps: usize) -> Vec<Event> {
    (0..steps)
        .map(|i| Event::response(200).with_body(format!(r#"{{"step":{}}}"#, i), ContentKind::Json))
        .collect()
}

fn bench_run(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let transport = Arc::new(HttpTransport::new(&TransportConfig::default()).unwrap());

    let mut group = c.benchmark_group("machine_run");

    for steps in [1, 10, 50] {
        let pattern = chain(steps);
        let events = events(steps);
        let config = MachineConfig {
            queue_capacity: steps,
            ..MachineConfig::default()
        };

        group.throughput(Throughput::Elements(steps as u64));
        group.bench_with_input(BenchmarkId::from_parameter(steps), &steps, |b, _| {
            b.to_async(&rt).iter(|| async {
                let machine = StateMachine::new(
                    pattern.clone(),
                    transport.clone(),
                    Report::batch(),
                    config.clone(),
                );
                let handle = machine.handle();
                for event in events.iter().cloned() {
                    handle.try_push_event(event).unwrap();
                }
                let outcome = machine.start().await;
                assert!(outcome.success);
                black_box(outcome)
            });
        });
    }

    group.finish();
}

fn bench_validate(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_validate");

    for steps in [10, 100] {
        let pattern = chain(steps);
        group.bench_with_input(BenchmarkId::from_parameter(steps), &pattern, |b, pattern| {
            b.iter(|| black_box(pattern.states().validate().unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_run, bench_validate);

criterion_main!(benches);
