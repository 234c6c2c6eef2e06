//! Content path and guard evaluation benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use interop_core::{content, Guard, GuardInput, ReferenceContext, ReferenceError};
use interop_protocol::{ContentKind, Event};

/// Reference context with a single constant and no captured events.
struct Constants;

impl ReferenceContext for Constants {
    fn data(&self, name: &str) -> Option<&str> {
        (name == "expected").then_some("200")
    }

    fn component(&self, _name: &str) -> Option<&str> {
        None
    }

    fn last_event(&self, state: &str) -> Result<&Event, ReferenceError> {
        Err(ReferenceError::UnknownState(state.to_string()))
    }
}

fn json_body(items: usize) -> String {
    let items: Vec<String> = (0..items)
        .map(|i| format!(r#"{{"id":{},"name":"item_{}"}}"#, i, i))
        .collect();
    format!(r#"{{"user":{{"age":42}},"items":[{}]}}"#, items.join(","))
}

fn xml_body(items: usize) -> String {
    let items: String = (0..items)
        .map(|i| format!("<item id=\"{}\"><name>item_{}</name></item>", i, i))
        .collect();
    format!("<root><user><age>42</age></user><items>{}</items></root>", items)
}

fn bench_extract(c: &mut Criterion) {
    let mut group = c.benchmark_group("content_extract");

    for items in [1, 100, 1000] {
        let json = json_body(items);
        let xml = xml_body(items);
        let json_format = content::for_kind(ContentKind::Json).unwrap();
        let xml_format = content::for_kind(ContentKind::Xml).unwrap();

        group.throughput(Throughput::Bytes(json.len() as u64));
        group.bench_with_input(BenchmarkId::new("json", items), &json, |b, body| {
            b.iter(|| black_box(content::extract(json_format, body, "$.user.age").unwrap()));
        });

        group.throughput(Throughput::Bytes(xml.len() as u64));
        group.bench_with_input(BenchmarkId::new("xml", items), &xml, |b, body| {
            b.iter(|| black_box(content::extract(xml_format, body, "/root/user/age").unwrap()));
        });
    }

    group.finish();
}

fn bench_guard(c: &mut Criterion) {
    let mut group = c.benchmark_group("guard_evaluate");

    let event = Event::response(200)
        .with_header("Content-Type", "application/json")
        .with_body(json_body(10), ContentKind::Json);
    let input = GuardInput::event(&event);

    let status = Guard::parse("status", "EQUALS", "200", None).unwrap();
    group.bench_function("parameter", |b| {
        b.iter(|| black_box(status.evaluate(&input, &Constants).unwrap()));
    });

    let deferred = Guard::parse("status", "EQUALS", "$$data.expected$$", None).unwrap();
    group.bench_function("parameter_with_reference", |b| {
        b.iter(|| black_box(deferred.evaluate(&input, &Constants).unwrap()));
    });

    let age = Guard::parse("content($.user.age)", "GREATERTHAN", "18", Some("integer")).unwrap();
    group.bench_function("content_numeric", |b| {
        b.iter(|| black_box(age.evaluate(&input, &Constants).unwrap()));
    });

    group.finish();
}

criterion_group!(benches, bench_extract, bench_guard);

criterion_main!(benches);
