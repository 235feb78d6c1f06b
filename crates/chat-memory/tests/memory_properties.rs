//! End-to-end behaviour of the memory engine through its public API.

use chat_memory::memory_db::{from_millis, DEFAULT_SESSION_TITLE};
use chat_memory::{EngineState, FactCategory, MemoryConfig, MemoryEngine, NewMessage, Role};
use chrono::Duration;
use proptest::prelude::*;

async fn engine() -> MemoryEngine {
    MemoryEngine::open(MemoryConfig::in_memory()).await.unwrap()
}

#[tokio::test]
async fn saved_message_round_trips_through_its_session() {
    let engine = engine().await;
    let session = engine.create_session(None).await;

    let id = engine.save_message(NewMessage::assistant("The oven is preheated")).await.unwrap();

    let matches: Vec<_> = engine
        .get_session_messages(&session.id, None)
        .await
        .into_iter()
        .filter(|m| m.id == id)
        .collect();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].role, Role::Assistant);
    assert_eq!(matches[0].content, "The oven is preheated");
}

#[tokio::test]
async fn sessions_do_not_see_each_others_messages() {
    let engine = engine().await;
    let a = engine.create_session(Some("A")).await;
    let b = engine.create_session(Some("B")).await;

    for i in 0..4 {
        let target = if i % 2 == 0 { &a.id } else { &b.id };
        engine
            .save_message(NewMessage::user(format!("msg {}", i)).with_session(target))
            .await
            .unwrap();
    }

    let in_a = engine.get_session_messages(&a.id, None).await;
    let in_b = engine.get_session_messages(&b.id, None).await;
    assert_eq!(in_a.len(), 2);
    assert_eq!(in_b.len(), 2);
    assert!(in_a.iter().all(|m| in_b.iter().all(|n| n.id != m.id)));
}

#[tokio::test]
async fn session_messages_follow_timestamps_not_write_order() {
    let engine = engine().await;
    let session = engine.create_session(None).await;
    let base = from_millis(1_700_000_000_000);

    for (label, offset) in [("t3", 3), ("t1", 1), ("t2", 2)] {
        engine
            .save_message(
                NewMessage::user(label)
                    .with_session(&session.id)
                    .with_timestamp(base + Duration::seconds(offset)),
            )
            .await
            .unwrap();
    }

    let order: Vec<String> = engine
        .get_session_messages(&session.id, None)
        .await
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(order, vec!["t1", "t2", "t3"]);
}

#[tokio::test]
async fn message_count_matches_successful_saves() {
    let engine = engine().await;
    let session = engine.create_session(None).await;

    for i in 0..7 {
        let message = if i % 2 == 0 {
            NewMessage::user(format!("u{}", i))
        } else {
            NewMessage::assistant(format!("a{}", i))
        };
        engine.save_message(message).await.unwrap();
    }

    let stored = engine.get_session(&session.id).await.unwrap();
    assert_eq!(stored.message_count, 7);
    assert_eq!(engine.get_session_messages(&session.id, None).await.len(), 7);
}

#[tokio::test]
async fn title_is_set_once_from_the_first_message() {
    let engine = engine().await;
    let session = engine.create_session(None).await;
    assert_eq!(session.title, DEFAULT_SESSION_TITLE);

    engine.save_message(NewMessage::user("My name is Frank")).await.unwrap();
    assert_eq!(engine.get_session(&session.id).await.unwrap().title, "My name is Frank");

    engine.save_message(NewMessage::user("What's the weather?")).await.unwrap();
    engine.save_message(NewMessage::user("Thanks")).await.unwrap();

    let stored = engine.get_session(&session.id).await.unwrap();
    assert_eq!(stored.title, "My name is Frank");
    assert_eq!(stored.message_count, 3);
}

#[tokio::test]
async fn frank_scenario() {
    let engine = engine().await;
    let session = engine.create_session(None).await;

    engine.save_message(NewMessage::user("My name is Frank")).await.unwrap();
    engine.save_message(NewMessage::user("I live in Oslo")).await.unwrap();

    let stored = engine.get_session(&session.id).await.unwrap();
    assert_eq!(stored.title, "My name is Frank");
    assert_eq!(stored.message_count, 2);
}

#[tokio::test]
async fn fallback_round_trips_and_keeps_the_newest_hundred() {
    let engine = MemoryEngine::open(MemoryConfig::fallback_only()).await.unwrap();
    assert_eq!(engine.state(), EngineState::Degraded);

    let base = from_millis(1_700_000_000_000);
    let mut ids = Vec::new();
    for i in 0..120 {
        let id = engine
            .save_message(NewMessage::user(format!("offline {}", i)).with_timestamp(base + Duration::seconds(i)))
            .await
            .unwrap();
        ids.push(id);
    }

    let recent = engine.get_recent_messages(500).await;
    assert_eq!(recent.len(), 100);
    assert_eq!(recent.first().unwrap().id, ids[20]);
    assert_eq!(recent.last().unwrap().id, ids[119]);
    assert_eq!(recent.last().unwrap().content, "offline 119");

    let tail = engine.get_recent_messages(3).await;
    assert_eq!(tail.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(), ["offline 117", "offline 118", "offline 119"]);
}

#[tokio::test]
async fn deleting_a_session_removes_it_and_its_messages() {
    let engine = engine().await;
    let session = engine.create_session(None).await;
    engine.save_message(NewMessage::user("short-lived")).await.unwrap();
    engine.save_message(NewMessage::assistant("indeed")).await.unwrap();

    assert!(engine.delete_session(&session.id).await);

    assert!(engine.get_session_messages(&session.id, None).await.is_empty());
    assert!(engine.get_all_sessions().await.iter().all(|s| s.id != session.id));
}

#[tokio::test]
async fn prompt_keeps_the_twenty_most_confident_facts_in_order() {
    let engine = engine().await;
    let mut confidences = vec![0.9, 0.3, 0.95, 0.1];
    confidences.extend((0..21).map(|i| 0.4 + i as f64 * 0.02));

    for (i, confidence) in confidences.iter().enumerate() {
        engine
            .save_fact(format!("fact {}", i), FactCategory::Other, *confidence)
            .await
            .unwrap();
    }

    let mut ranked: Vec<(usize, f64)> = confidences.iter().copied().enumerate().collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let expected: Vec<String> = ranked.iter().take(20).map(|(i, _)| format!("fact {}", i)).collect();

    let prompt = engine.get_facts_for_prompt().await;
    let body = prompt
        .strip_prefix("You remember the following about the user: ")
        .and_then(|rest| rest.strip_suffix('.'))
        .unwrap();
    let listed: Vec<&str> = body.split(". ").collect();
    assert_eq!(listed, expected);
}

#[tokio::test]
async fn creator_fact_prompt() {
    let engine = engine().await;
    engine
        .save_fact("User is the creator", "personal".parse().unwrap(), 1.0)
        .await
        .unwrap();

    assert_eq!(
        engine.get_facts_for_prompt().await,
        "You remember the following about the user: User is the creator."
    );
}

#[tokio::test]
async fn file_backed_store_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = MemoryConfig {
        db_path: Some(dir.path().join("memory.db")),
        fallback_dir: Some(dir.path().join("kv")),
        ..MemoryConfig::default()
    };

    let (session_id, message_id) = {
        let engine = MemoryEngine::open(config.clone()).await.unwrap();
        let session = engine.create_session(None).await;
        let id = engine.save_message(NewMessage::user("Remember the milk")).await.unwrap();
        engine.save_fact("Buys milk weekly", FactCategory::Context, 0.7).await.unwrap();
        engine.dispose().await;
        (session.id, id)
    };

    let engine = MemoryEngine::open(config).await.unwrap();
    assert_eq!(engine.state(), EngineState::Ready);
    assert_eq!(engine.current_session_id().as_deref(), Some(session_id.as_str()));

    let messages = engine.get_session_messages(&session_id, None).await;
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, message_id);
    assert_eq!(engine.get_session(&session_id).await.unwrap().title, "Remember the milk");
    assert_eq!(engine.get_all_facts().await.len(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn any_content_round_trips(content in "\\PC{0,200}", assistant in any::<bool>()) {
        let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        runtime.block_on(async {
            let engine = engine().await;
            let role = if assistant { Role::Assistant } else { Role::User };
            let id = engine.save_message(NewMessage::new(role, content.clone())).await.unwrap();
            let current = engine.current_session_id().unwrap();

            let stored = engine.get_session_messages(&current, None).await;
            assert_eq!(stored.len(), 1);
            assert_eq!(stored[0].id, id);
            assert_eq!(stored[0].role, role);
            assert_eq!(stored[0].content, content);
        });
    }
}
