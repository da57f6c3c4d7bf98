use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use tiny_prober::{
    Geometry, Interrupt, MemorySink, NetworkProbe, ProbeConfig, ProbeController, RetryPolicy,
    SearchMode, StopReason, Target, Timeouts,
};

type Received = Arc<Mutex<Vec<Vec<u8>>>>;

/// A stand-in for the tiny machine service: greets, reads one message of
/// `width` bytes and answers with whatever `reply` returns for it.
async fn spawn_stub<F>(width: usize, reply: F) -> (u16, Received)
where
    F: Fn(&[u8]) -> &'static str + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let received: Received = Arc::default();
    let log = received.clone();
    let reply = Arc::new(reply);

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let log = log.clone();
            let reply = reply.clone();
            tokio::spawn(async move {
                if socket.write_all(b"submit tinymachine here\n").await.is_err() {
                    return;
                }
                let mut message = vec![0u8; width];
                if socket.read_exact(&mut message).await.is_err() {
                    return;
                }
                let answer = (*reply)(&message);
                log.lock().unwrap().push(message);
                let _ = socket.write_all(answer.as_bytes()).await;
            });
        }
    });

    (port, received)
}

fn config(port: u16, register: usize, memory: usize) -> ProbeConfig {
    ProbeConfig {
        target: Target::new("127.0.0.1", port),
        geometry: Geometry::new(register, memory).unwrap(),
        timeouts: Timeouts {
            connect: Some(Duration::from_secs(2)),
            read: Some(Duration::from_secs(2)),
            write: Some(Duration::from_secs(2)),
        },
        retry: RetryPolicy::new(1, Duration::from_millis(10), Duration::from_millis(10)),
        ..ProbeConfig::default()
    }
}

#[tokio::test]
async fn invalid_replies_are_all_counted_as_invalid() {
    let (port, received) = spawn_stub(10, |_| "Invalid instruction\n").await;
    let config = config(port, 2, 8);
    let mut controller = ProbeController::new(NetworkProbe::new(&config), config);

    let report = controller.run(SearchMode::Full, Some(5)).await.unwrap();

    assert_eq!(report.stop, StopReason::LimitReached);
    assert_eq!(report.stats.rounds, 5);
    assert_eq!(report.stats.invalids, 5);
    assert_eq!(report.stats.wins, 0);
    assert_eq!(report.stats.losses, 0);

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 5);
    assert_eq!(received[0], vec![0; 10]);
    assert_eq!(received[1][0], 128);
    assert_eq!(received[2][0], 64);
}

#[tokio::test]
async fn fixed_memory_keeps_the_suffix_and_cycles_the_prefix() {
    let (port, received) = spawn_stub(2, |_| "machine halted\n").await;
    let config = config(port, 1, 1);
    let mut controller = ProbeController::new(NetworkProbe::new(&config), config);

    let report = controller
        .run(SearchMode::FixedMemory(vec![0x42]), Some(300))
        .await
        .unwrap();
    assert_eq!(report.stats.rounds, 300);
    assert_eq!(report.stats.losses, 300);

    let received = received.lock().unwrap();
    assert!(received.iter().all(|m| m.len() == 2 && m[1] == 0x42));

    let mut first_pass: Vec<u8> = received[..256].iter().map(|m| m[0]).collect();
    first_pass.sort_unstable();
    first_pass.dedup();
    assert_eq!(first_pass.len(), 256);
    assert_eq!(received[256..], received[..44]);
}

#[tokio::test]
async fn wins_are_classified_and_saved() {
    let (port, _) = spawn_stub(2, |message| {
        if message[0] == 0x40 {
            "40ByteCTF{tiny}\n"
        } else {
            "Invalid instruction\n"
        }
    })
    .await;
    let config = config(port, 1, 1);
    let sink = MemorySink::new();
    let mut controller = ProbeController::new(NetworkProbe::new(&config), config)
        .with_sink(Box::new(sink.clone()));

    let report = controller
        .run(SearchMode::FixedMemory(vec![0x00]), Some(256))
        .await
        .unwrap();

    assert_eq!(report.stats.wins, 1);
    assert_eq!(report.stats.invalids, 255);
    let saved = sink.samples();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].buffer, vec![0x40, 0x00]);
    // 0x40 is 2 reversed, so it is the third buffer tried.
    assert_eq!(saved[0].round, 3);
}

#[tokio::test]
async fn interrupt_ends_an_unlimited_run_cleanly() {
    let interrupt = Interrupt::new();
    let trigger = interrupt.clone();
    let (port, _) = spawn_stub(2, move |message| {
        if message[0] == 0x40 {
            "40ByteCTF{tiny}\n"
        } else {
            "Invalid instruction\n"
        }
    })
    .await;

    let config = config(port, 1, 1);
    let sink = MemorySink::new();
    let mut controller = ProbeController::new(NetworkProbe::new(&config), config)
        .with_interrupt(interrupt)
        .with_sink(Box::new(sink.clone()));

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.trigger();
    });

    let report = controller
        .run(SearchMode::FixedMemory(vec![0x00]), None)
        .await
        .unwrap();
    stopper.await.unwrap();

    assert_eq!(report.stop, StopReason::Interrupted);
    assert!(report.stats.rounds > 0);
    assert!(report.stats.is_consistent());
    assert_eq!(
        sink.samples().len() as u64,
        report.stats.wins,
        "every win is saved"
    );
}

#[tokio::test]
async fn unreachable_service_fails_after_retries() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config = config(port, 2, 8);
    let mut controller = ProbeController::new(NetworkProbe::new(&config), config);
    let err = controller.run(SearchMode::Full, Some(3)).await.unwrap_err();

    assert!(matches!(
        err,
        tiny_prober::Error::RetriesExhausted { attempts: 2, .. }
    ));
    assert_eq!(controller.stats().rounds, 0);
}
