//! End-to-end coverage of the scenarios that actually exercise queuing,
//! compaction, and concurrent sessions on a shared steering key.

mod common;

use std::sync::{Arc, Mutex};

use common::{
    capturing_reply_sender, fixture_room_config, room_message, stub_model_router, AlwaysAllow, FakeAgentRuntime,
    FakeHistoryStore, NoopArtifactSharer, NoopAutochronicler,
};
use steercore::RoomCommandHandler;

fn build_handler(agent: Arc<FakeAgentRuntime>, history: Arc<FakeHistoryStore>) -> Arc<RoomCommandHandler> {
    RoomCommandHandler::new(
        fixture_room_config(),
        stub_model_router("CHAT"),
        history,
        agent,
        Arc::new(NoopAutochronicler),
        Arc::new(NoopArtifactSharer),
        Arc::new(AlwaysAllow),
        Arc::new(AlwaysAllow),
        None,
    )
    .unwrap()
}

/// Give already-spawned tasks a chance to run up to their next pending
/// `.await` point, on the current-thread test runtime this file relies on
/// for deterministic interleaving.
async fn let_other_tasks_run() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn s2_same_sender_queue_compacts_to_two_runs() {
    let agent = FakeAgentRuntime::new(vec!["first response", "second response"]);
    let history = FakeHistoryStore::new();
    let handler = build_handler(agent.clone(), history.clone());

    let sink = Arc::new(Mutex::new(Vec::new()));
    agent.hold_next_call();

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task1 = tokio::spawn(async move { h.handle_command(room_message("user", "!s first", None), 1, s).await });

    agent.wait_until_entered().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task2 = tokio::spawn(async move { h.handle_command(room_message("user", "!s second", None), 2, s).await });
    let_other_tasks_run().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task3 = tokio::spawn(async move { h.handle_command(room_message("user", "!s third", None), 3, s).await });
    let_other_tasks_run().await;

    agent.release_first();

    task1.await.unwrap().unwrap();
    task2.await.unwrap().unwrap();
    task3.await.unwrap().unwrap();

    let calls = agent.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].steering_drain.is_empty());
    assert_eq!(calls[1].steering_drain.len(), 1);
    assert_eq!(calls[1].steering_drain[0].content, "<user> !s third");

    assert_eq!(
        *sink.lock().unwrap(),
        vec!["first response".to_string(), "second response".to_string()]
    );
}

#[tokio::test]
async fn s3_threaded_participants_share_a_session() {
    let agent = FakeAgentRuntime::new(vec!["first response", "second response"]);
    let history = FakeHistoryStore::new();
    let handler = build_handler(agent.clone(), history.clone());

    let sink = Arc::new(Mutex::new(Vec::new()));
    agent.hold_next_call();

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task1 =
        tokio::spawn(async move { h.handle_command(room_message("alice", "!s first", Some("t1")), 1, s).await });

    agent.wait_until_entered().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task2 =
        tokio::spawn(async move { h.handle_command(room_message("bob", "!s second", Some("t1")), 2, s).await });
    let_other_tasks_run().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task3 =
        tokio::spawn(async move { h.handle_command(room_message("carol", "!s third", Some("t1")), 3, s).await });
    let_other_tasks_run().await;

    agent.release_first();

    task1.await.unwrap().unwrap();
    task2.await.unwrap().unwrap();
    task3.await.unwrap().unwrap();

    let calls = agent.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].steering_drain.len(), 1);
    assert_eq!(calls[1].steering_drain[0].content, "<carol> !s third");
}

#[tokio::test]
async fn s4_distinct_senders_run_as_independent_sessions() {
    let agent = FakeAgentRuntime::new(vec!["alice response", "bob response"]);
    let history = FakeHistoryStore::new();
    let handler = build_handler(agent.clone(), history.clone());

    let alice_sink = Arc::new(Mutex::new(Vec::new()));
    let bob_sink = Arc::new(Mutex::new(Vec::new()));
    agent.hold_next_call();

    let h = handler.clone();
    let s = capturing_reply_sender(alice_sink.clone());
    let task1 = tokio::spawn(async move { h.handle_command(room_message("alice", "!s A", None), 1, s).await });

    agent.wait_until_entered().await;

    let h = handler.clone();
    let s = capturing_reply_sender(bob_sink.clone());
    let task2 = tokio::spawn(async move { h.handle_command(room_message("bob", "!s B", None), 2, s).await });

    task2.await.unwrap().unwrap();
    agent.release_first();
    task1.await.unwrap().unwrap();

    let calls = agent.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.steering_drain.is_empty()));
    assert_eq!(*bob_sink.lock().unwrap(), vec!["bob response".to_string()]);
    assert_eq!(*alice_sink.lock().unwrap(), vec!["alice response".to_string()]);
}

#[tokio::test]
async fn s6_trailing_command_compacts_away_leading_passives() {
    let agent = FakeAgentRuntime::new(vec!["A response", "B response"]);
    let history = FakeHistoryStore::new();
    let handler = build_handler(agent.clone(), history.clone());

    let sink = Arc::new(Mutex::new(Vec::new()));
    agent.hold_next_call();

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_a = tokio::spawn(async move { h.handle_command(room_message("user", "!s A", None), 1, s).await });

    agent.wait_until_entered().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_p1 = tokio::spawn(async move { h.handle_passive_message(room_message("user", "p1", None), s).await });
    let_other_tasks_run().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_p2 = tokio::spawn(async move { h.handle_passive_message(room_message("user", "p2", None), s).await });
    let_other_tasks_run().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_b = tokio::spawn(async move { h.handle_command(room_message("user", "!s B", None), 2, s).await });
    let_other_tasks_run().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_p3 = tokio::spawn(async move { h.handle_passive_message(room_message("user", "p3", None), s).await });
    let_other_tasks_run().await;

    agent.release_first();

    task_a.await.unwrap().unwrap();
    task_p1.await.unwrap().unwrap();
    task_p2.await.unwrap().unwrap();
    task_b.await.unwrap().unwrap();
    task_p3.await.unwrap().unwrap();

    let calls = agent.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].steering_drain.is_empty());
    assert_eq!(calls[1].steering_drain.len(), 1);
    assert_eq!(calls[1].steering_drain[0].content, "<user> p3");

    assert_eq!(*sink.lock().unwrap(), vec!["A response".to_string(), "B response".to_string()]);
}

#[tokio::test]
async fn s7_passive_only_tail_runs_the_actor_only_once() {
    let agent = FakeAgentRuntime::new(vec!["A response"]);
    let history = FakeHistoryStore::new();
    let handler = build_handler(agent.clone(), history.clone());

    let sink = Arc::new(Mutex::new(Vec::new()));
    agent.hold_next_call();

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_a = tokio::spawn(async move { h.handle_command(room_message("user", "!s A", None), 1, s).await });

    agent.wait_until_entered().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_p1 = tokio::spawn(async move { h.handle_passive_message(room_message("user", "p1", None), s).await });
    let_other_tasks_run().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_p2 = tokio::spawn(async move { h.handle_passive_message(room_message("user", "p2", None), s).await });
    let_other_tasks_run().await;

    let h = handler.clone();
    let s = capturing_reply_sender(sink.clone());
    let task_p3 = tokio::spawn(async move { h.handle_passive_message(room_message("user", "p3", None), s).await });
    let_other_tasks_run().await;

    agent.release_first();

    task_a.await.unwrap().unwrap();
    task_p1.await.unwrap().unwrap();
    task_p2.await.unwrap().unwrap();
    task_p3.await.unwrap().unwrap();

    let calls = agent.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(*sink.lock().unwrap(), vec!["A response".to_string()]);
}
