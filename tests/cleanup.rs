mod common;

use chrono::Days;
use common::{request, rows, MemoryStore, World, PDF};
use sea_orm::EntityTrait;

use school_mail_core::entity::{course, course_send_window, message, school, thread};
use school_mail_core::{Actor, Clock, ComposeAction, NewUser, Role, Upload};

#[tokio::test]
async fn course_cleanup_removes_members_and_their_mail() {
    let w = World::new().await;
    let store = MemoryStore::default();

    let to_clara = w
        .service
        .engine()
        .compose_with_attachments(
            &w.anna,
            request(&[w.clara], &[], &[], "Arbeitsblatt", ComposeAction::Send),
            None,
            vec![Upload::new("blatt.pdf", PDF)],
            &store,
        )
        .await
        .unwrap();
    let between_staff = w.send(&w.anna, &[w.bernd], &[], &[], "Pausenaufsicht").await.unwrap();
    let from_gerda = w.send(&w.gerda, &[w.bernd], &[], &[], "Vertretung").await.unwrap();
    w.open_window(w.c5a.id, false).await;
    let from_clara = w.send(&w.clara, &[w.david], &[], &[], "Hallo").await.unwrap();

    let cleanup = w.service.cleanup();
    let impact = cleanup.course_impact(w.c5a.id).await.unwrap();
    assert_eq!(impact.students, 2);
    assert_eq!(impact.teachers, 2);
    assert_eq!(impact.messages, 1);

    let report = cleanup.cleanup_course(w.c5a.id).await.unwrap();

    let mut users = report.deleted_user_ids.clone();
    users.sort();
    let mut expected = vec![w.clara.id, w.david.id, w.gerda.id];
    expected.sort();
    assert_eq!(users, expected);

    let mut messages = report.deleted_message_ids.clone();
    messages.sort();
    let mut expected = vec![to_clara.message_id, from_gerda.message_id, from_clara.message_id];
    expected.sort();
    assert_eq!(messages, expected);

    assert_eq!(report.attachment_storage_names, store.names());
    assert_eq!(report.purge_files(&store).await, 1);
    assert_eq!(store.len(), 0);

    // The teacher of another course survives, with only that course left.
    let dir = w.service.directory();
    assert!(dir.find_user(w.anna.id).await.unwrap().is_some());
    assert_eq!(dir.teacher_course_ids(w.anna.id).await.unwrap(), vec![w.c5b.id]);
    for gone in [w.clara, w.david, w.gerda] {
        assert!(dir.find_user(gone.id).await.unwrap().is_none());
    }

    assert!(course::Entity::find_by_id(w.c5a.id).one(w.conn()).await.unwrap().is_none());
    assert!(course_send_window::Entity::find_by_id(w.c5a.id)
        .one(w.conn())
        .await
        .unwrap()
        .is_none());

    let left: Vec<i32> = message::Entity::find()
        .all(w.conn())
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    assert_eq!(left, vec![between_staff.message_id]);
    assert_eq!(rows(w.conn(), thread::Entity).await, 1);

    let visible = w.service.visibility().visible_users(&w.anna).await.unwrap();
    assert!(visible.iter().all(|u| u.id != w.clara.id));
}

#[tokio::test]
async fn school_cleanup_leaves_other_schools_alone() {
    let w = World::new().await;
    let foreign = w.send(&w.tilo, &[w.fatma, w.sa_sued], &[], &[], "Sportfest").await.unwrap();
    let local = w.send(&w.anna, &[w.clara], &[], &[], "Lesen").await.unwrap();

    let cleanup = w.service.cleanup();
    let impact = cleanup.school_impact(w.sued.id).await.unwrap();
    assert_eq!((impact.students, impact.teachers, impact.messages), (1, 1, 1));

    let report = cleanup.cleanup_school(w.sued.id).await.unwrap();
    assert_eq!(report.deleted_message_ids, vec![foreign.message_id]);
    assert_eq!(report.deleted_user_ids.len(), 3);

    assert!(school::Entity::find_by_id(w.sued.id).one(w.conn()).await.unwrap().is_none());
    assert!(course::Entity::find_by_id(w.c7c.id).one(w.conn()).await.unwrap().is_none());
    assert!(school::Entity::find_by_id(w.nord.id).one(w.conn()).await.unwrap().is_some());

    let opened = w.service.authorizer().open_message(&w.clara, local.message_id).await.unwrap();
    assert_eq!(opened.message.subject, "Lesen");
    assert_eq!(rows(w.conn(), course::Entity).await, 2);
}

#[tokio::test]
async fn expired_accounts_are_swept() {
    let w = World::new().await;
    let today = w.clock.today();
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap();
    let dir = w.service.directory();
    let account = |username: &str, expires_at| NewUser {
        username: username.into(),
        display_name: username.to_uppercase(),
        role: Role::Student,
        course_id: Some(w.c5b.id),
        school_id: None,
        pw_hash: "x".into(),
        expires_at: Some(expires_at),
    };
    let gone = dir.create_user(account("alt", yesterday)).await.unwrap();
    let stays = dir.create_user(account("heute", today)).await.unwrap();

    w.send(&w.bernd, &[Actor::from(&gone)], &[], &[], "Abschied").await.unwrap();

    let store = MemoryStore::default();
    let report = w.service.sweep_expired_users(&store).await.unwrap();
    assert_eq!(report.deleted_user_ids, vec![gone.id]);
    assert_eq!(report.deleted_message_ids.len(), 1);
    assert!(dir.find_user(stays.id).await.unwrap().is_some());
    assert!(dir.find_active_user(stays.id).await.unwrap().is_some());

    // Nothing more to do on a second run.
    assert!(w.service.sweep_expired_users(&store).await.unwrap().is_empty());
}

#[tokio::test]
async fn cleaning_users_ignores_unknown_ids() {
    let w = World::new().await;
    let report = w
        .service
        .cleanup()
        .cleanup_users(&[w.emil.id, 9_999])
        .await
        .unwrap();
    assert_eq!(report.deleted_user_ids, vec![w.emil.id]);
    assert!(report.deleted_message_ids.is_empty());
}
