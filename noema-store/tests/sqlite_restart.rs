//! Everything written through a SQLite store survives reopening the file

#![cfg(feature = "sqlite")]

use noema_store::storage::ids::{ClientToken, EntityId};
use noema_store::storage::types::{ContentBlock, NewUsage, RelationType, Role};
use noema_store::{
    ContentStore, ScopeFilter, SqliteStorage, SqliteStore, SqliteStores, StorageCoordinator,
    StructureStore,
};

fn open(path: &std::path::Path) -> StorageCoordinator<SqliteStorage> {
    let stores = SqliteStores::new(SqliteStore::open(path).unwrap());
    StorageCoordinator::from_stores(&stores, Default::default())
}

#[tokio::test]
async fn views_survive_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("conversations.db");

    let (main_id, fork_id, child_view, before_main, before_fork) = {
        let c = open(&path);
        let (thread, main) = c.create_conversation(Some("persisted")).await.unwrap();

        let q = c.put(ContentBlock::plain("question")).await.unwrap().id;
        let t1 = c
            .append_turn(&thread.id, Role::User, &ClientToken::new())
            .await
            .unwrap()
            .record;
        c.add_span(&t1.id, &[NewUsage::message(q)], None, &ClientToken::new())
            .await
            .unwrap();

        let t2 = c
            .append_turn(&thread.id, Role::Assistant, &ClientToken::new())
            .await
            .unwrap()
            .record;
        let mut spans = Vec::new();
        for text in ["first answer", "second answer"] {
            let id = c.put(ContentBlock::plain(text)).await.unwrap().id;
            let span = c
                .add_span(&t2.id, &[NewUsage::message(id)], Some("model-a"), &ClientToken::new())
                .await
                .unwrap()
                .record;
            spans.push(span.span.id);
        }

        c.select(&main.id, &t2.id, &spans[0], None).await.unwrap();
        let (fork, _) = c.fork(&main.id, Some("alt"), None).await.unwrap();
        c.select(&main.id, &t2.id, &spans[1], None).await.unwrap();
        let spawned = c.spawn(&fork.id, &ScopeFilter::All, None).await.unwrap();

        (
            main.id.clone(),
            fork.id.clone(),
            spawned.view.id.clone(),
            c.resolve(&main.id).await.unwrap().path(),
            c.resolve(&fork.id).await.unwrap().path(),
        )
    };

    let c = open(&path);
    let main = c.resolve(&main_id).await.unwrap();
    let fork = c.resolve(&fork_id).await.unwrap();
    assert_eq!(main.path(), before_main);
    assert_eq!(fork.path(), before_fork);
    assert_eq!(main.texts(), vec!["question", "second answer"]);
    assert_eq!(fork.texts(), vec!["question", "first answer"]);
    assert_eq!(main.turns[1].alternatives.len(), 2);

    assert_eq!(c.get_view(&main_id).await.unwrap().revision, 2);
    assert_eq!(c.selection_history(&main_id).await.unwrap().len(), 2);
    assert_eq!(c.content().count().await.unwrap(), 3);
    assert_eq!(c.structure().usage_count().await.unwrap(), 5);

    let forked = c
        .relations_from(&EntityId::from(&fork_id), Some(&RelationType::forked_from()))
        .await
        .unwrap();
    assert_eq!(forked.len(), 1);
    assert_eq!(forked[0].to_id, EntityId::from(&main_id));

    let child = c.resolve(&child_view).await.unwrap();
    assert_eq!(child.texts(), vec!["question", "first answer"]);
}

#[tokio::test]
async fn tokens_replay_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tokens.db");
    let token = ClientToken::new();

    let (thread_id, turn_id) = {
        let c = open(&path);
        let (thread, _) = c.create_conversation(None).await.unwrap();
        let turn = c
            .append_turn(&thread.id, Role::User, &token)
            .await
            .unwrap()
            .record;
        (thread.id, turn.id)
    };

    let c = open(&path);
    let replay = c.append_turn(&thread_id, Role::User, &token).await.unwrap();
    assert!(!replay.is_new);
    assert_eq!(replay.record.id, turn_id);
    assert_eq!(c.structure().list_turns(&thread_id).await.unwrap().len(), 1);
}
