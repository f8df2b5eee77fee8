use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use taskbus::{
    deep_clone_via_clone, BusBuilder, CloneContext, DeepClone, InMemoryBus, MessageBus, TaskError,
};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, PartialEq)]
struct PaymentCaptured {
    amount: u64,
}

#[derive(Clone, Debug, PartialEq)]
struct PaymentEvent {
    amount: u64,
    kind: &'static str,
}

#[derive(Clone, Debug, PartialEq)]
struct DomainEvent(String);

deep_clone_via_clone!(PaymentCaptured, PaymentEvent, DomainEvent);

impl From<PaymentCaptured> for PaymentEvent {
    fn from(p: PaymentCaptured) -> Self {
        PaymentEvent {
            amount: p.amount,
            kind: "captured",
        }
    }
}

impl From<PaymentEvent> for DomainEvent {
    fn from(p: PaymentEvent) -> Self {
        DomainEvent(format!("{} {}", p.kind, p.amount))
    }
}

#[derive(Debug, Default)]
struct Basket {
    items: Arc<Mutex<Vec<String>>>,
}

impl DeepClone for Basket {
    fn deep_clone_with(&self, cx: &mut CloneContext) -> Self {
        Basket {
            items: self.items.deep_clone_with(cx),
        }
    }
}

fn recorder<T: Send + 'static>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}

async fn settle(bus: &InMemoryBus) {
    bus.wait_idle(&CancellationToken::new()).await.unwrap();
}

#[tokio::test]
async fn publish_without_subscribers_is_a_no_op() {
    let bus = InMemoryBus::new();

    bus.publish(PaymentCaptured { amount: 1 }).await.unwrap();

    assert_eq!(bus.messages_sent(), 1);
    assert_eq!(bus.pending_dispatches(), 0);
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn base_subscriber_receives_derived_message() {
    let bus = BusBuilder::new()
        .derive::<PaymentCaptured, PaymentEvent>()
        .derive::<PaymentEvent, DomainEvent>()
        .build();

    let payments = recorder::<PaymentEvent>();
    let domain = recorder::<DomainEvent>();
    let captured = recorder::<PaymentCaptured>();
    let token = CancellationToken::new();

    {
        let payments = Arc::clone(&payments);
        bus.subscribe(
            move |e: PaymentEvent, _| {
                let payments = Arc::clone(&payments);
                async move {
                    payments.lock().push(e);
                    Ok(())
                }
            },
            token.clone(),
        )
        .await
        .unwrap();
    }
    {
        let domain = Arc::clone(&domain);
        bus.subscribe(
            move |e: DomainEvent, _| {
                let domain = Arc::clone(&domain);
                async move {
                    domain.lock().push(e);
                    Ok(())
                }
            },
            token.clone(),
        )
        .await
        .unwrap();
    }
    {
        let captured = Arc::clone(&captured);
        bus.subscribe(
            move |e: PaymentCaptured, _| {
                let captured = Arc::clone(&captured);
                async move {
                    captured.lock().push(e);
                    Ok(())
                }
            },
            token.clone(),
        )
        .await
        .unwrap();
    }

    bus.publish(PaymentCaptured { amount: 42 }).await.unwrap();
    settle(&bus).await;

    assert_eq!(
        *payments.lock(),
        vec![PaymentEvent {
            amount: 42,
            kind: "captured"
        }]
    );
    assert_eq!(*domain.lock(), vec![DomainEvent("captured 42".into())]);
    assert_eq!(*captured.lock(), vec![PaymentCaptured { amount: 42 }]);

    // A base message never reaches a subscriber of the specialization.
    bus.publish(DomainEvent("other".into())).await.unwrap();
    settle(&bus).await;
    assert_eq!(captured.lock().len(), 1);
    assert_eq!(payments.lock().len(), 1);
    assert_eq!(domain.lock().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn delayed_message_is_not_delivered_early() {
    let bus = InMemoryBus::new();
    let deliveries = recorder::<Instant>();
    {
        let deliveries = Arc::clone(&deliveries);
        bus.subscribe(
            move |_: PaymentCaptured, _| {
                let deliveries = Arc::clone(&deliveries);
                async move {
                    deliveries.lock().push(Instant::now());
                    Ok(())
                }
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    let start = Instant::now();
    bus.publish_delayed(PaymentCaptured { amount: 1 }, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(bus.delayed_count(), 1);

    sleep(Duration::from_millis(90)).await;
    assert!(deliveries.lock().is_empty());

    sleep(Duration::from_millis(110)).await;
    let deliveries = deliveries.lock();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0] - start >= Duration::from_millis(100));
    assert_eq!(bus.delayed_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn delayed_messages_within_window_are_delivered_together() {
    let bus = InMemoryBus::new();
    let seen = recorder::<(u64, Instant)>();
    {
        let seen = Arc::clone(&seen);
        bus.subscribe(
            move |p: PaymentCaptured, _| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().push((p.amount, Instant::now()));
                    Ok(())
                }
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    let start = Instant::now();
    bus.publish_delayed(PaymentCaptured { amount: 2 }, Duration::from_millis(130))
        .await
        .unwrap();
    bus.publish_delayed(PaymentCaptured { amount: 1 }, Duration::from_millis(100))
        .await
        .unwrap();
    bus.publish_delayed(PaymentCaptured { amount: 3 }, Duration::from_millis(400))
        .await
        .unwrap();

    sleep(Duration::from_millis(120)).await;
    {
        let mut early: Vec<u64> = seen.lock().iter().map(|(amount, _)| *amount).collect();
        early.sort_unstable();
        assert_eq!(early, vec![1, 2]);
    }
    assert_eq!(bus.delayed_count(), 1);

    sleep(Duration::from_millis(400)).await;
    let seen = seen.lock();
    assert_eq!(seen.len(), 3);
    let (_, last) = seen.iter().find(|(amount, _)| *amount == 3).unwrap();
    assert!(*last - start >= Duration::from_millis(350));
}

#[tokio::test]
async fn subscribers_never_observe_each_others_mutations() {
    let bus = InMemoryBus::new();
    let snapshots = recorder::<Vec<String>>();

    for name in ["first", "second"] {
        let snapshots = Arc::clone(&snapshots);
        bus.subscribe(
            move |basket: Basket, _| {
                let snapshots = Arc::clone(&snapshots);
                async move {
                    basket.items.lock().push(name.to_string());
                    tokio::task::yield_now().await;
                    snapshots.lock().push(basket.items.lock().clone());
                    Ok(())
                }
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    let original = Arc::new(Mutex::new(vec!["apple".to_string()]));
    bus.publish(Basket {
        items: Arc::clone(&original),
    })
    .await
    .unwrap();
    settle(&bus).await;

    let mut snapshots = snapshots.lock().clone();
    snapshots.sort();
    assert_eq!(
        snapshots,
        vec![
            vec!["apple".to_string(), "first".to_string()],
            vec!["apple".to_string(), "second".to_string()],
        ]
    );
    assert_eq!(*original.lock(), vec!["apple".to_string()]);
}

#[tokio::test]
async fn cancelled_subscribers_are_skipped_and_removed() {
    let bus = InMemoryBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let tokens: Vec<CancellationToken> = (0..3).map(|_| CancellationToken::new()).collect();

    for token in &tokens {
        let calls = Arc::clone(&calls);
        bus.subscribe(
            move |_: PaymentCaptured, _| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            token.clone(),
        )
        .await
        .unwrap();
    }
    assert_eq!(bus.subscriber_count(), 3);

    tokens[0].cancel();
    bus.publish(PaymentCaptured { amount: 1 }).await.unwrap();
    settle(&bus).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(bus.subscriber_count(), 2);

    tokens[1].cancel();
    bus.publish(PaymentCaptured { amount: 2 }).await.unwrap();
    settle(&bus).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(bus.subscriber_count(), 1);
}

#[tokio::test]
async fn handler_receives_subscription_token() {
    let bus = InMemoryBus::new();
    let token = CancellationToken::new();
    let observed = Arc::new(AtomicUsize::new(0));
    {
        let observed = Arc::clone(&observed);
        bus.subscribe(
            move |_: PaymentCaptured, handler_token: CancellationToken| {
                let observed = Arc::clone(&observed);
                async move {
                    if handler_token.is_cancelled() {
                        return Err(TaskError::Canceled);
                    }
                    observed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            token.clone(),
        )
        .await
        .unwrap();
    }

    bus.publish(PaymentCaptured { amount: 5 }).await.unwrap();
    settle(&bus).await;
    assert_eq!(observed.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_publishers_reach_every_subscriber() {
    let bus = InMemoryBus::new();
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let calls = Arc::clone(&calls);
        bus.subscribe(
            move |_: PaymentCaptured, _| {
                let calls = Arc::clone(&calls);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
            CancellationToken::new(),
        )
        .await
        .unwrap();
    }

    let mut publishers = Vec::new();
    for p in 0..4 {
        let bus = bus.clone();
        publishers.push(tokio::spawn(async move {
            for i in 0..25 {
                bus.publish(PaymentCaptured { amount: p * 100 + i })
                    .await
                    .unwrap();
            }
        }));
    }
    for p in publishers {
        p.await.unwrap();
    }

    while calls.load(Ordering::SeqCst) < 300 {
        sleep(Duration::from_millis(1)).await;
    }
    settle(&bus).await;
    assert_eq!(calls.load(Ordering::SeqCst), 300);
    assert_eq!(bus.messages_sent_of::<PaymentCaptured>(), 100);
}
