use criterion::{black_box, criterion_group, criterion_main, Criterion};
use ecu_link::bus::MockBusHandle;
use ecu_link::config::Config;
use ecu_link::dispatcher::{EcuDispatcher, Operation, Priority};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn bench_config() -> Config {
    let mut config = Config::default();
    config.dispatcher.settle_delay_ms = 0;
    config.dispatcher.ping_interval_ms = 60_000;
    config
}

pub fn bench_dispatch_roundtrip(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let handle = MockBusHandle::new();
    handle.set_holding(0, 1234);
    let dispatcher = rt.block_on(async { EcuDispatcher::spawn(bench_config(), handle.connector()) });

    c.bench_function("dispatch_read_roundtrip", |b| {
        b.to_async(&rt).iter(|| async {
            let response = dispatcher
                .execute(
                    Operation::ReadHolding {
                        address: 0,
                        count: 1,
                    },
                    Priority::High,
                    CancellationToken::new(),
                )
                .await
                .unwrap();
            black_box(response);
        })
    });

    rt.block_on(dispatcher.shutdown());
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_dispatch_roundtrip
}
criterion_main!(benches);
