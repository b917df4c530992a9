//! Integration tests for the dispatcher, driven through the mock bus.
//!
//! These cover the scheduling, reconnection and lifecycle guarantees:
//! strict priority under load, bounded-queue admission control, exactly-one
//! `ConnectionLost` per disconnect episode, reconnect retry pacing,
//! cancellation of queued work, pause/resume semantics and polling job
//! lifecycle.

mod common;

use common::{count_lost, drain_events, expect_event, spawn_mock_dispatcher, test_config};
use ecu_link::bus::{BusOp, MockFault};
use ecu_link::dispatcher::{
    DispatchError, LinkEvent, Operation, PollReading, PollingSpec, Priority, Response,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

fn read_op(address: u16) -> Operation {
    Operation::ReadHolding { address, count: 1 }
}

#[tokio::test]
async fn first_successful_command_confirms_device() {
    let (dispatcher, handle) = spawn_mock_dispatcher(test_config());
    handle.set_holding(0, 99);
    let mut events = dispatcher.subscribe();

    expect_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, LinkEvent::ConnectionOpened)
    })
    .await;
    assert!(dispatcher.state().port_open);
    assert!(!dispatcher.state().device_confirmed);

    let response = dispatcher
        .execute(read_op(0), Priority::High, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(response, Response::Registers(vec![99]));

    expect_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, LinkEvent::ConnectionConfirmed)
    })
    .await;
    assert!(dispatcher.state().device_confirmed);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn high_priority_overtakes_queued_low() {
    let mut config = test_config();
    config.dispatcher.settle_delay_ms = 80;
    let (dispatcher, handle) = spawn_mock_dispatcher(config);
    handle.set_holding(1, 11);
    handle.set_holding(2, 22);
    handle.set_response_delay(Duration::from_millis(150));

    let dispatcher = Arc::new(dispatcher);

    // Both land in their queues while the port is still settling; the
    // slow Low was enqueued first, the High a moment later.
    let low = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let result = dispatcher
                .execute(read_op(1), Priority::Low, CancellationToken::new())
                .await;
            (result, Instant::now())
        }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    let high = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            let result = dispatcher
                .execute(read_op(2), Priority::High, CancellationToken::new())
                .await;
            (result, Instant::now())
        }
    });

    let (low_result, low_done) = low.await.unwrap();
    let (high_result, high_done) = high.await.unwrap();
    assert!(low_result.is_ok());
    assert!(high_result.is_ok());
    assert!(
        high_done < low_done,
        "high-priority command must complete before the earlier low"
    );

    // The wire saw the High read first.
    let ops = handle.ops();
    assert_eq!(ops[0], BusOp::ReadHolding(2, 1));
    assert_eq!(ops[1], BusOp::ReadHolding(1, 1));

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn commands_complete_exactly_once_under_load() {
    let (dispatcher, handle) = spawn_mock_dispatcher(test_config());
    for address in 0..20 {
        handle.set_holding(address, address);
    }

    let dispatcher = Arc::new(dispatcher);
    let mut tasks = Vec::new();
    for address in 0..20u16 {
        let dispatcher = Arc::clone(&dispatcher);
        let priority = if address % 3 == 0 {
            Priority::High
        } else {
            Priority::Low
        };
        tasks.push(tokio::spawn(async move {
            dispatcher
                .execute(read_op(address), priority, CancellationToken::new())
                .await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }
    // Every command hit the wire exactly once.
    assert_eq!(handle.ops().len(), 20);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn communication_failure_fires_one_lost_per_episode() {
    let mut config = test_config();
    config.dispatcher.settle_delay_ms = 10;
    config.dispatcher.reconnect_delay_ms = 30;
    let (dispatcher, handle) = spawn_mock_dispatcher(config);
    handle.set_holding(0, 1);
    let mut events = dispatcher.subscribe();

    // Establish a confirmed link first.
    dispatcher
        .execute(read_op(0), Priority::High, CancellationToken::new())
        .await
        .unwrap();
    expect_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, LinkEvent::ConnectionConfirmed)
    })
    .await;

    // Kill the link mid-command.
    handle.set_offline(true);
    let error = dispatcher
        .execute(read_op(0), Priority::High, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(error.is_communication());

    expect_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, LinkEvent::ConnectionLost)
    })
    .await;
    handle.set_offline(false);

    // A fresh open followed by one successful command re-confirms.
    expect_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, LinkEvent::ConnectionOpened)
    })
    .await;
    dispatcher
        .execute(read_op(0), Priority::High, CancellationToken::new())
        .await
        .unwrap();
    expect_event(&mut events, Duration::from_secs(1), |e| {
        matches!(e, LinkEvent::ConnectionConfirmed)
    })
    .await;

    // Exactly one Lost for the whole episode.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count_lost(&drain_events(&mut events)), 0);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn protocol_fault_does_not_tear_link_down() {
    let (dispatcher, handle) = spawn_mock_dispatcher(test_config());
    handle.set_holding(0, 5);
    let mut events = dispatcher.subscribe();

    dispatcher
        .execute(read_op(0), Priority::High, CancellationToken::new())
        .await
        .unwrap();

    handle.fail_next(MockFault::Exception);
    let error = dispatcher
        .execute(read_op(0), Priority::High, CancellationToken::new())
        .await
        .unwrap_err();
    assert!(!error.is_communication());

    // The link stays up: no ConnectionLost, and the next command succeeds
    // without a reconnect.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(count_lost(&drain_events(&mut events)), 0);
    assert!(dispatcher.state().device_confirmed);
    dispatcher
        .execute(read_op(0), Priority::High, CancellationToken::new())
        .await
        .unwrap();

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn connect_retries_on_fixed_delay_until_success() {
    let mut config = test_config();
    config.dispatcher.reconnect_delay_ms = 50;
    config.dispatcher.settle_delay_ms = 10;
    let (dispatcher, handle) = spawn_mock_dispatcher(config);
    handle.fail_connects(3);
    let mut events = dispatcher.subscribe();

    let started = Instant::now();
    expect_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, LinkEvent::ConnectionOpened)
    })
    .await;
    let elapsed = started.elapsed();

    // 3 failures, one success.
    assert_eq!(handle.connect_attempts(), 4);
    assert!(
        elapsed >= Duration::from_millis(150),
        "three retry delays must have elapsed, got {elapsed:?}"
    );
    assert!(elapsed < Duration::from_millis(600));

    // Exactly one ConnectionOpened.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let extra = drain_events(&mut events)
        .iter()
        .filter(|e| matches!(e, LinkEvent::ConnectionOpened))
        .count();
    assert_eq!(extra, 0);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn shutdown_cancels_all_queued_commands() {
    let (dispatcher, handle) = spawn_mock_dispatcher(test_config());
    // The worker never connects, so commands stay queued.
    handle.fail_connects(u32::MAX);

    let dispatcher = Arc::new(dispatcher);
    let mut tasks = Vec::new();
    for address in 0..5u16 {
        let dispatcher = Arc::clone(&dispatcher);
        tasks.push(tokio::spawn(async move {
            dispatcher
                .execute(read_op(address), Priority::Low, CancellationToken::new())
                .await
        }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    dispatcher.shutdown().await;

    for task in tasks {
        let result = task.await.unwrap();
        assert!(
            matches!(result, Err(DispatchError::Cancelled)),
            "queued commands must complete as cancelled, got {result:?}"
        );
    }
    assert!(handle.ops().is_empty());
}

#[tokio::test]
async fn cancelling_a_queued_command_discards_it() {
    let (dispatcher, handle) = spawn_mock_dispatcher(test_config());
    handle.fail_connects(u32::MAX);

    let cancel = CancellationToken::new();
    let pending = dispatcher.execute(read_op(0), Priority::High, cancel.clone());
    tokio::pin!(pending);

    // Not complete while queued...
    assert!(tokio::time::timeout(Duration::from_millis(50), &mut pending)
        .await
        .is_err());

    // ...until its own token fires.
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_millis(100), pending)
        .await
        .expect("cancellation must unblock the caller promptly");
    assert!(matches!(result, Err(DispatchError::Cancelled)));

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn full_low_queue_applies_backpressure() {
    let mut config = test_config();
    config.dispatcher.low_capacity = 1;
    let (dispatcher, handle) = spawn_mock_dispatcher(config);
    handle.fail_connects(u32::MAX);

    let dispatcher = Arc::new(dispatcher);
    // Occupies the single Low slot.
    let _first = tokio::spawn({
        let dispatcher = Arc::clone(&dispatcher);
        async move {
            dispatcher
                .execute(read_op(0), Priority::Low, CancellationToken::new())
                .await
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The second Low submitter suspends instead of growing the queue.
    let blocked = dispatcher.execute(read_op(1), Priority::Low, CancellationToken::new());
    assert!(tokio::time::timeout(Duration::from_millis(80), blocked)
        .await
        .is_err());

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn ping_publishes_and_caches_snapshot() {
    let mut config = test_config();
    config.dispatcher.ping_interval_ms = 50;
    config.device.status_address = 0x100;
    config.device.status_count = 4;
    let (dispatcher, handle) = spawn_mock_dispatcher(config);
    handle.set_holding_block(0x100, &[1, 2, 3, 4]);
    let mut events = dispatcher.subscribe();

    let event = expect_event(&mut events, Duration::from_secs(2), |e| {
        matches!(e, LinkEvent::PingReceived(_))
    })
    .await;
    let LinkEvent::PingReceived(snapshot) = event else {
        unreachable!()
    };
    assert_eq!(snapshot.base_address, 0x100);
    assert_eq!(snapshot.registers, vec![1, 2, 3, 4]);

    let cached = dispatcher.last_snapshot().expect("snapshot must be cached");
    assert_eq!(cached.registers, snapshot.registers);

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn polling_job_stopped_before_first_tick_delivers_nothing() {
    let (dispatcher, handle) = spawn_mock_dispatcher(test_config());
    handle.set_holding(0, 1);

    let (tx, mut rx) = mpsc::unbounded_channel::<PollReading>();
    let job = dispatcher
        .register_polling_job(PollingSpec {
            name: "boiler-temps".to_string(),
            addresses: vec![0],
            interval: Duration::from_millis(150),
            callback: Arc::new(move |reading| {
                let _ = tx.send(reading);
            }),
        })
        .unwrap();

    job.start();
    job.stop().await;
    assert!(!job.is_running());

    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(
        rx.try_recv().is_err(),
        "a job stopped before its first tick must produce zero callbacks"
    );

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn polling_job_delivers_partial_results() {
    let (dispatcher, handle) = spawn_mock_dispatcher(test_config());
    handle.set_holding(10, 1);
    handle.set_holding(11, 2);
    // Address 99 stays unmapped and fails with a device exception.

    let (tx, mut rx) = mpsc::unbounded_channel::<PollReading>();
    let job = dispatcher
        .register_polling_job(PollingSpec {
            name: "pressures".to_string(),
            addresses: vec![10, 11, 99],
            interval: Duration::from_millis(60),
            callback: Arc::new(move |reading| {
                let _ = tx.send(reading);
            }),
        })
        .unwrap();
    job.start();

    let reading = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("poll reading must arrive")
        .unwrap();
    assert_eq!(reading.job, "pressures");
    assert_eq!(reading.values, vec![(10, 1), (11, 2)]);

    job.remove().await.unwrap();
    dispatcher.shutdown().await;
}

#[tokio::test]
async fn polling_job_names_are_unique() {
    let (dispatcher, _handle) = spawn_mock_dispatcher(test_config());

    let spec = PollingSpec {
        name: "temps".to_string(),
        addresses: vec![0],
        interval: Duration::from_millis(100),
        callback: Arc::new(|_| {}),
    };
    let job = dispatcher.register_polling_job(spec.clone()).unwrap();
    let duplicate = dispatcher.register_polling_job(spec.clone());
    assert!(matches!(duplicate, Err(DispatchError::DuplicateJob(_))));

    // Removing frees the name for re-registration.
    job.remove().await.unwrap();
    assert!(dispatcher.register_polling_job(spec).is_ok());

    dispatcher.shutdown().await;
}

#[tokio::test]
async fn pause_suspends_polling_until_matching_resume() {
    let (dispatcher, handle) = spawn_mock_dispatcher(test_config());
    handle.set_holding(0, 7);

    let (tx, mut rx) = mpsc::unbounded_channel::<PollReading>();
    let job = dispatcher
        .register_polling_job(PollingSpec {
            name: "status".to_string(),
            addresses: vec![0],
            interval: Duration::from_millis(30),
            callback: Arc::new(move |reading| {
                let _ = tx.send(reading);
            }),
        })
        .unwrap();
    job.start();

    // Telemetry flows while the gate is open.
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("first reading must arrive")
        .unwrap();

    // Nested pause: two pauses, one resume keeps the gate closed.
    dispatcher.pause().await;
    dispatcher.pause().await;
    dispatcher.resume();

    while rx.try_recv().is_ok() {}
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        rx.try_recv().is_err(),
        "no readings may be delivered while paused"
    );

    dispatcher.resume();
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("polling must resume after the final resume")
        .unwrap();

    dispatcher.shutdown().await;
}
