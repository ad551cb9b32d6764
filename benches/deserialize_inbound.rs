/// Benchmarks for routing inbound bridge frames.
///
/// Every frame received from the bridge goes through `route_message` before any
/// listener runs, so this is the per-message cost of a busy subscription.
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use rosbridge_client::protocol::route_message;
use serde_json::json;

fn bench_route_message(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound/route_message");

    let publish = r#"{
        "op": "publish",
        "topic": "/chatter",
        "msg": {"data": "hello world"}
    }"#;
    group.throughput(Throughput::Bytes(publish.len() as u64));
    group.bench_function("publish", |b| {
        b.iter(|| {
            route_message(std::hint::black_box(publish))
                .expect("Routing should succeed")
                .expect("publish is routed");
        });
    });

    let service_response = r#"{
        "op": "service_response",
        "service": "/add_two_ints",
        "id": "42",
        "result": true,
        "values": {"sum": 3}
    }"#;
    group.throughput(Throughput::Bytes(service_response.len() as u64));
    group.bench_function("service_response", |b| {
        b.iter(|| {
            route_message(std::hint::black_box(service_response))
                .expect("Routing should succeed")
                .expect("service_response is routed");
        });
    });

    let service_request = r#"{
        "op": "service_request",
        "service": "/reset",
        "id": "call_service:/reset:7",
        "args": {}
    }"#;
    group.throughput(Throughput::Bytes(service_request.len() as u64));
    group.bench_function("service_request", |b| {
        b.iter(|| {
            route_message(std::hint::black_box(service_request))
                .expect("Routing should succeed")
                .expect("service_request is routed");
        });
    });

    let status = r#"{"op": "status", "level": "warning", "msg": "throttled", "id": "9"}"#;
    group.throughput(Throughput::Bytes(status.len() as u64));
    group.bench_function("status", |b| {
        b.iter(|| {
            route_message(std::hint::black_box(status))
                .expect("Routing should succeed")
                .expect("status is routed");
        });
    });

    group.finish();
}

fn bench_publish_payload_size(c: &mut Criterion) {
    let mut group = c.benchmark_group("inbound/publish_payload");

    for points in [10_u32, 100, 1000] {
        let cloud: Vec<f64> = (0..points * 3).map(|i| f64::from(i) * 0.01).collect();
        let frame = json!({
            "op": "publish",
            "topic": "/points",
            "msg": {"header": {"frame_id": "map"}, "data": cloud}
        })
        .to_string();

        group.throughput(Throughput::Bytes(frame.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(points), &frame, |b, frame| {
            b.iter(|| {
                route_message(std::hint::black_box(frame))
                    .expect("Routing should succeed")
                    .expect("publish is routed");
            });
        });
    }

    group.finish();
}

criterion_group!(inbound_benches, bench_route_message, bench_publish_payload_size);
criterion_main!(inbound_benches);
