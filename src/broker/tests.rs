use std::time::Duration;

use super::listener::{self, Delivery};
use super::{Broadcaster, Event, Message, TopicManager};
use crate::config::BrokerSettings;
use crate::utils::error::BrokerError;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(1);

fn manager() -> TopicManager {
    TopicManager::new(&BrokerSettings::default())
}

#[test]
fn test_message_display() {
    let msg = Message::new("1", "payment is created");
    assert_eq!(msg.to_string(), "1 → payment is created");
    assert_eq!(msg.topic, None);

    let routed = Message::for_topic("1", "42", "payment is created");
    assert_eq!(routed.topic.as_deref(), Some("42"));
    assert_eq!(routed.text, "payment is created");
}

#[test]
fn test_listener_zero_capacity_holds_one() {
    let (mut sink, mut listener) = listener::channel(0);
    let msg = std::sync::Arc::new(Message::new("1", "first"));

    assert_eq!(sink.deliver(&msg), Delivery::Sent);
    assert_eq!(sink.deliver(&msg), Delivery::Dropped);
    assert_eq!(sink.dropped(), 1);
    assert_eq!(listener.try_recv().unwrap().text, "first");
    assert!(matches!(listener.try_recv(), Err(TryRecvError::Empty)));
}

#[test]
fn test_listener_gone_after_subscriber_drops() {
    let (mut sink, listener) = listener::channel(4);
    drop(listener);
    let msg = std::sync::Arc::new(Message::new("1", "nobody"));
    assert_eq!(sink.deliver(&msg), Delivery::Gone);
}

#[tokio::test]
async fn test_listener_release_ends_stream_for_good() {
    let (sink, mut listener) = listener::channel(4);
    assert_eq!(sink.id(), listener.id());

    sink.release();
    assert!(listener.recv().await.is_none());
    assert!(listener.is_ended());
    assert!(listener.recv().await.is_none());
    assert!(matches!(
        listener.try_recv(),
        Err(TryRecvError::Disconnected)
    ));
}

#[tokio::test]
async fn test_broadcaster_delivers_to_listener() {
    let b = Broadcaster::new("42", 10);
    let (sink, mut l1) = listener::channel(4);

    b.register(sink).await;
    b.submit(Message::new("1", "payment is created")).await;

    let received = timeout(WAIT, l1.recv()).await.unwrap().unwrap();
    assert_eq!(received.sender, "1");
    assert_eq!(received.text, "payment is created");

    assert_eq!(b.listener_count().await, 1);
    assert!(matches!(l1.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_broadcaster_fans_out_to_every_listener() {
    let b = Broadcaster::new("fanout", 10);
    let (s1, mut l1) = listener::channel(8);
    let (s2, mut l2) = listener::channel(8);
    b.register(s1).await;
    b.register(s2).await;

    for i in 0..3 {
        b.submit(Message::new("1", format!("update {i}"))).await;
    }

    for listener in [&mut l1, &mut l2] {
        for i in 0..3 {
            let msg = timeout(WAIT, listener.recv()).await.unwrap().unwrap();
            assert_eq!(msg.text, format!("update {i}"));
        }
    }
}

#[tokio::test]
async fn test_broadcaster_unregister_stops_delivery() {
    let b = Broadcaster::new("7", 10);
    let (s1, mut l1) = listener::channel(4);
    let (s2, mut l2) = listener::channel(4);
    let l1_id = s1.id();
    b.register(s1).await;
    b.register(s2).await;

    b.unregister(l1_id).await;
    b.submit(Message::new("1", "only l2")).await;

    let msg = timeout(WAIT, l2.recv()).await.unwrap().unwrap();
    assert_eq!(msg.text, "only l2");
    assert!(timeout(WAIT, l1.recv()).await.unwrap().is_none());
    assert_eq!(b.listener_count().await, 1);
}

#[tokio::test]
async fn test_broadcaster_unregister_unknown_is_noop() {
    let b = Broadcaster::new("noop", 10);
    let (sink, _listener) = listener::channel(1);
    let id = sink.id();

    b.unregister(id).await;
    b.register(sink).await;
    b.unregister(id).await;
    b.unregister(id).await;

    assert_eq!(b.listener_count().await, 0);
}

#[tokio::test]
async fn test_broadcaster_close_releases_exactly_once() {
    let b = Broadcaster::new("close", 10);
    let (sink, mut l1) = listener::channel(4);
    b.register(sink).await;

    b.close().await;
    b.close().await;

    assert!(matches!(
        timeout(WAIT, l1.receiver.recv()).await.unwrap(),
        Some(Event::Close)
    ));
    assert!(timeout(WAIT, l1.receiver.recv()).await.unwrap().is_none());

    timeout(WAIT, b.closed()).await.unwrap();
    assert!(b.is_closed());
}

#[tokio::test]
async fn test_broadcaster_ignores_operations_after_close() {
    let b = Broadcaster::new("closed", 10);
    b.close().await;
    timeout(WAIT, b.closed()).await.unwrap();

    let (sink, mut late) = listener::channel(4);
    b.register(sink).await;
    assert!(timeout(WAIT, late.recv()).await.unwrap().is_none());

    b.submit(Message::new("1", "into the void")).await;
    assert_eq!(
        b.try_submit(Message::new("1", "still nothing")),
        Err(BrokerError::Closed)
    );
    assert_eq!(b.listener_count().await, 0);
}

#[tokio::test]
async fn test_broadcaster_try_submit_reports_full_queue() {
    // The control loop cannot run until this task yields.
    let b = Broadcaster::new("busy", 1);
    assert_eq!(b.try_submit(Message::new("1", "first")), Ok(()));
    assert_eq!(
        b.try_submit(Message::new("1", "second")),
        Err(BrokerError::QueueFull)
    );
}

#[tokio::test]
async fn test_slow_listener_does_not_stall_others() {
    let b = Broadcaster::new("slow", 10);
    let (slow_sink, mut slow) = listener::channel(1);
    let (fast_sink, mut fast) = listener::channel(8);
    b.register(slow_sink).await;
    b.register(fast_sink).await;

    for i in 0..3 {
        b.submit(Message::new("1", format!("m{i}"))).await;
    }

    for i in 0..3 {
        let msg = timeout(WAIT, fast.recv()).await.unwrap().unwrap();
        assert_eq!(msg.text, format!("m{i}"));
    }

    assert_eq!(slow.try_recv().unwrap().text, "m0");
    assert!(matches!(slow.try_recv(), Err(TryRecvError::Empty)));
    assert_eq!(b.listener_count().await, 2);
}

#[tokio::test]
async fn test_broadcaster_prunes_dropped_listener() {
    let b = Broadcaster::new("prune", 10);
    let (sink, listener) = listener::channel(4);
    b.register(sink).await;
    drop(listener);

    b.submit(Message::new("1", "anyone?")).await;
    assert_eq!(b.listener_count().await, 0);
}

#[tokio::test]
async fn test_broadcaster_stops_when_handles_dropped() {
    let b = Broadcaster::new("orphan", 10);
    let (sink, mut l1) = listener::channel(4);
    b.register(sink).await;
    drop(b);

    assert!(timeout(WAIT, l1.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_manager_delivers_payment_created() {
    let manager = manager();
    let mut l1 = manager.open_listener("42").await;

    manager.submit("1", "42", "payment is created").await;

    let msg = timeout(WAIT, l1.recv()).await.unwrap().unwrap();
    assert_eq!(msg.sender, "1");
    assert_eq!(msg.text, "payment is created");
    assert_eq!(msg.topic.as_deref(), Some("42"));

    // round trip through both loops before checking nothing else arrived
    assert_eq!(manager.listener_count("42").await, Some(1));
    assert!(matches!(l1.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_manager_close_listener_excludes_it() {
    let manager = manager();
    let mut l1 = manager.open_listener("7").await;
    let mut l2 = manager.open_listener("7").await;

    manager.close_listener("7", l1.id()).await;
    manager.submit("1", "7", "payment is updated").await;

    let msg = timeout(WAIT, l2.recv()).await.unwrap().unwrap();
    assert_eq!(msg.text, "payment is updated");
    assert!(timeout(WAIT, l1.recv()).await.unwrap().is_none());
}

#[tokio::test]
async fn test_manager_delete_ends_listeners_and_recreates_topic() {
    let manager = manager();
    let mut l1 = manager.open_listener("9").await;

    manager.delete_broadcast("9").await;
    assert!(timeout(WAIT, l1.recv()).await.unwrap().is_none());
    assert!(manager.topics().await.is_empty());

    manager.submit("1", "9", "payment is deleted").await;
    assert_eq!(manager.listener_count("9").await, Some(0));
    assert_eq!(manager.topics().await, vec!["9".to_string()]);
    assert!(l1.recv().await.is_none());
}

#[tokio::test]
async fn test_manager_reopen_after_delete_gets_fresh_broadcaster() {
    let manager = manager();
    let _old = manager.open_listener("5").await;
    manager.delete_broadcast("5").await;

    let mut fresh = manager.open_listener("5").await;
    manager.submit("1", "5", "payment is created").await;

    let msg = timeout(WAIT, fresh.recv()).await.unwrap().unwrap();
    assert_eq!(msg.text, "payment is created");
    assert_eq!(manager.listener_count("5").await, Some(1));
}

#[tokio::test]
async fn test_manager_close_listener_twice_is_noop() {
    let manager = manager();
    let l1 = manager.open_listener("3").await;

    manager.close_listener("3", l1.id()).await;
    manager.close_listener("3", l1.id()).await;

    assert_eq!(manager.listener_count("3").await, Some(0));
}

#[tokio::test]
async fn test_manager_unknown_topic_operations_are_noops() {
    let manager = manager();
    let (_, stray) = listener::channel(1);

    timeout(WAIT, manager.close_listener("never", stray.id()))
        .await
        .unwrap();
    timeout(WAIT, manager.delete_broadcast("never")).await.unwrap();
    assert!(manager.topics().await.is_empty());
    assert_eq!(manager.listener_count("never").await, None);

    timeout(WAIT, manager.submit("1", "unseen", "hello"))
        .await
        .unwrap();
    assert_eq!(manager.listener_count("unseen").await, Some(0));
}

#[tokio::test]
async fn test_subscription_unregisters_on_drop() {
    let manager = manager();
    let sub = manager.subscribe("11").await;
    assert_eq!(sub.topic(), "11");
    assert_eq!(manager.listener_count("11").await, Some(1));

    drop(sub);
    assert_eq!(manager.listener_count("11").await, Some(0));
}

#[tokio::test]
async fn test_subscription_close_unregisters() {
    let manager = manager();
    let mut keep = manager.subscribe("12").await;
    let gone = manager.subscribe("12").await;

    gone.close().await;
    manager.submit("1", "12", "payment is updated").await;

    let msg = timeout(WAIT, keep.recv()).await.unwrap().unwrap();
    assert_eq!(msg.text, "payment is updated");
    assert_eq!(manager.listener_count("12").await, Some(1));
}

#[tokio::test]
async fn test_manager_shutdown_releases_everything() {
    let manager = manager();
    let mut l1 = manager.open_listener("1").await;
    let mut l2 = manager.open_listener("2").await;

    manager.shutdown().await;

    assert!(timeout(WAIT, l1.recv()).await.unwrap().is_none());
    assert!(timeout(WAIT, l2.recv()).await.unwrap().is_none());

    let mut late = manager.open_listener("1").await;
    assert!(timeout(WAIT, late.recv()).await.unwrap().is_none());
    manager.submit("1", "1", "ignored").await;
    assert!(manager.topics().await.is_empty());
    assert_eq!(
        manager.try_submit("1", "1", "ignored"),
        Err(BrokerError::Closed)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manager_concurrent_publishers() {
    let settings = BrokerSettings {
        listener_capacity: 256,
        ..BrokerSettings::default()
    };
    let manager = TopicManager::new(&settings);
    let mut l1 = manager.open_listener("busy").await;

    let mut tasks = Vec::new();
    for publisher in 0..10 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            for i in 0..10 {
                manager
                    .submit(&publisher.to_string(), "busy", &format!("msg {i}"))
                    .await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let mut received = 0;
    while received < 100 {
        timeout(WAIT, l1.recv()).await.unwrap().unwrap();
        received += 1;
    }
    assert_eq!(manager.listener_count("busy").await, Some(1));
    assert!(matches!(l1.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn test_subscription_drop_with_full_queue_still_unregisters() {
    let settings = BrokerSettings {
        manager_queue_capacity: 1,
        ..BrokerSettings::default()
    };
    let manager = TopicManager::new(&settings);

    // The control loop cannot run until this task yields, so the open
    // request fills the queue.
    let sub = manager.subscribe("full").await;
    assert_eq!(
        manager.try_submit("1", "full", "no room"),
        Err(BrokerError::QueueFull)
    );

    drop(sub);

    let unregistered = timeout(WAIT, async {
        while manager.listener_count("full").await != Some(0) {
            tokio::task::yield_now().await;
        }
    })
    .await;
    assert!(unregistered.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unregister_racing_submits_never_delivers_afterwards() {
    let settings = BrokerSettings {
        listener_capacity: 256,
        ..BrokerSettings::default()
    };
    let manager = TopicManager::new(&settings);

    for round in 0..20 {
        let topic = format!("race-{round}");
        let mut l1 = manager.open_listener(&topic).await;
        let mut l2 = manager.open_listener(&topic).await;
        let l1_id = l1.id();

        let publisher = {
            let manager = manager.clone();
            let topic = topic.clone();
            tokio::spawn(async move {
                for i in 0..200 {
                    manager.submit("1", &topic, &format!("m{i}")).await;
                }
            })
        };
        let closer = {
            let manager = manager.clone();
            let topic = topic.clone();
            tokio::spawn(async move { manager.close_listener(&topic, l1_id).await })
        };
        publisher.await.unwrap();
        closer.await.unwrap();

        manager.submit("1", &topic, "marker").await;

        let mut l2_got = 0;
        loop {
            let msg = timeout(WAIT, l2.recv()).await.unwrap().unwrap();
            l2_got += 1;
            if msg.text == "marker" {
                break;
            }
        }
        assert_eq!(l2_got, 201);

        // l1 only holds what arrived before its unregister, then ends
        while let Some(msg) = timeout(WAIT, l1.recv()).await.unwrap() {
            assert_ne!(msg.text, "marker");
        }
        assert_eq!(manager.listener_count(&topic).await, Some(1));
    }
}
