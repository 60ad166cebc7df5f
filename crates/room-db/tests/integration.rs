//! Integration tests for room-db
//!
//! Runs every membership operation against a real SQLite in-memory database.

use room_db::{connect, migrate, MemberDbError, MemberRole, MemberStore};
use room_proto::{Identity, Keypair};

async fn setup_store() -> MemberStore {
    let db = connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory database");

    migrate(&db).await.expect("Failed to run migrations");

    MemberStore::new(db)
}

fn identity() -> Identity {
    Keypair::generate().identity()
}

#[tokio::test]
async fn test_migrations_run_successfully() {
    let db = connect("sqlite::memory:").await.expect("Failed to connect");

    let result = migrate(&db).await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_add_and_get_member() {
    let store = setup_store().await;
    let member = identity();

    let added = store.add(member, MemberRole::Member).await.expect("add failed");
    assert_eq!(added.public_key, member.to_hex());
    assert_eq!(added.role, MemberRole::Member);

    let fetched = store.get(member).await.expect("get failed");
    assert_eq!(fetched.id, added.id);
    assert_eq!(fetched.role, MemberRole::Member);

    let by_id = store.get_by_id(added.id).await.expect("get_by_id failed");
    assert_eq!(by_id.public_key, member.to_hex());
}

#[tokio::test]
async fn test_duplicate_add_is_rejected() {
    let store = setup_store().await;
    let member = identity();

    store.add(member, MemberRole::Member).await.expect("add failed");

    let second = store.add(member, MemberRole::Admin).await;
    assert!(matches!(second, Err(MemberDbError::AlreadyAdded(id)) if id == member));

    // The original row is untouched.
    let fetched = store.get(member).await.expect("get failed");
    assert_eq!(fetched.role, MemberRole::Member);
}

#[tokio::test]
async fn test_unknown_member_is_not_found() {
    let store = setup_store().await;

    assert!(matches!(
        store.get(identity()).await,
        Err(MemberDbError::NotFound)
    ));
    assert!(matches!(
        store.get_by_id(42).await,
        Err(MemberDbError::NotFound)
    ));
}

#[tokio::test]
async fn test_is_member() {
    let store = setup_store().await;
    let member = identity();
    let stranger = identity();

    store.add(member, MemberRole::Member).await.expect("add failed");

    assert!(store.is_member(member).await.expect("is_member failed"));
    assert!(!store.is_member(stranger).await.expect("is_member failed"));
}

#[tokio::test]
async fn test_list_returns_members_in_insertion_order() {
    let store = setup_store().await;
    let first = identity();
    let second = identity();
    let third = identity();

    store.add(first, MemberRole::Admin).await.expect("add failed");
    store.add(second, MemberRole::Member).await.expect("add failed");
    store.add(third, MemberRole::Moderator).await.expect("add failed");

    let members = store.list().await.expect("list failed");
    assert_eq!(members.len(), 3);
    assert_eq!(members[0].public_key, first.to_hex());
    assert_eq!(members[1].public_key, second.to_hex());
    assert_eq!(members[2].public_key, third.to_hex());

    assert_eq!(store.count().await.expect("count failed"), 3);
}

#[tokio::test]
async fn test_remove_member() {
    let store = setup_store().await;
    let member = identity();

    store.add(member, MemberRole::Member).await.expect("add failed");
    store.remove(member).await.expect("remove failed");

    assert!(!store.is_member(member).await.expect("is_member failed"));
    assert!(matches!(
        store.remove(member).await,
        Err(MemberDbError::NotFound)
    ));
}

#[tokio::test]
async fn test_remove_by_id() {
    let store = setup_store().await;
    let member = identity();

    let added = store.add(member, MemberRole::Member).await.expect("add failed");
    store.remove_by_id(added.id).await.expect("remove failed");

    assert!(matches!(
        store.remove_by_id(added.id).await,
        Err(MemberDbError::NotFound)
    ));
}

#[tokio::test]
async fn test_set_role_with_another_admin_present() {
    let store = setup_store().await;
    let founder = identity();
    let successor = identity();

    store.add(founder, MemberRole::Admin).await.expect("add failed");
    store.add(successor, MemberRole::Member).await.expect("add failed");

    // Promoting passes because the founder stays admin throughout.
    store
        .set_role(successor, MemberRole::Admin)
        .await
        .expect("promote failed");

    // Demoting the founder passes because the successor is now admin.
    store
        .set_role(founder, MemberRole::Member)
        .await
        .expect("demote failed");

    assert_eq!(
        store.get(founder).await.expect("get failed").role,
        MemberRole::Member
    );
    assert_eq!(
        store.get(successor).await.expect("get failed").role,
        MemberRole::Admin
    );
}

#[tokio::test]
async fn test_concurrent_adds() {
    let store = setup_store().await;

    let mut handles = vec![];
    for _ in 0..10 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.add(identity(), MemberRole::Member).await
        }));
    }

    for handle in handles {
        let result = handle.await.expect("task panicked");
        assert!(result.is_ok());
    }

    assert_eq!(store.count().await.expect("count failed"), 10);
}

#[tokio::test]
async fn test_promoting_the_first_admin_needs_no_existing_admin() {
    let store = setup_store().await;
    let member = identity();

    // A room bootstrapped without any admin can still appoint one.
    store.add(member, MemberRole::Member).await.expect("add failed");
    store
        .set_role(member, MemberRole::Admin)
        .await
        .expect("promote failed");

    assert_eq!(
        store.get(member).await.expect("get failed").role,
        MemberRole::Admin
    );
}

#[tokio::test]
async fn test_sole_admin_cannot_change_own_role() {
    let store = setup_store().await;
    let admin = identity();
    let bystander = identity();

    store.add(admin, MemberRole::Admin).await.expect("add failed");
    store.add(bystander, MemberRole::Member).await.expect("add failed");

    let result = store.set_role(admin, MemberRole::Member).await;
    assert!(matches!(result, Err(MemberDbError::LastAdmin)));

    // Still admin afterwards.
    assert_eq!(
        store.get(admin).await.expect("get failed").role,
        MemberRole::Admin
    );
}

#[tokio::test]
async fn test_concurrent_demotions_leave_an_admin() {
    let store = setup_store().await;
    let first = identity();
    let second = identity();

    store.add(first, MemberRole::Admin).await.expect("add failed");
    store.add(second, MemberRole::Admin).await.expect("add failed");

    // The two admins demote each other at the same time. The check and the
    // update share a transaction, so at most one demotion can pass.
    let demote_first = tokio::spawn({
        let store = store.clone();
        async move { store.set_role(first, MemberRole::Member).await }
    });
    let demote_second = tokio::spawn({
        let store = store.clone();
        async move { store.set_role(second, MemberRole::Member).await }
    });

    let results = [
        demote_first.await.expect("task panicked"),
        demote_second.await.expect("task panicked"),
    ];

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one demotion passes: {:?}", results);
    assert!(results
        .iter()
        .any(|r| matches!(r, Err(MemberDbError::LastAdmin))));

    let admins = store
        .list()
        .await
        .expect("list failed")
        .into_iter()
        .filter(|m| m.role == MemberRole::Admin)
        .count();
    assert_eq!(admins, 1);
}
