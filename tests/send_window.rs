mod common;

use chrono::Duration as ChronoDuration;
use common::{request, MemoryStore, World, PDF};
use time::Duration;

use school_mail_core::{Clock, ComposeAction, Error, MailConfig, SendWindowState, Upload};

#[tokio::test]
async fn students_cannot_send_while_the_window_is_closed() {
    let w = World::new().await;
    let status = w.service.send_window().status(w.c5a.id).await.unwrap();
    assert_eq!(status.state, SendWindowState::Closed);
    assert!(!status.attachments_enabled);

    let err = w.send(&w.clara, &[w.anna], &[], &[], "Frage").await.unwrap_err();
    assert!(matches!(err, Error::SendWindowClosed));

    // Staff are never gated, and drafts are always allowed.
    w.send(&w.anna, &[w.clara], &[], &[], "Antwort").await.unwrap();
    w.draft(&w.clara, &[w.anna], "Später").await.unwrap();
}

#[tokio::test]
async fn window_is_open_through_its_deadline_and_closed_after() {
    let w = World::new().await;
    let start = w.clock.now_db();
    let until = w.service.send_window().open(w.c5a.id, 30, false).await.unwrap();
    assert_eq!(until, start + ChronoDuration::minutes(30));

    w.send(&w.clara, &[w.anna], &[], &[], "Frage 1").await.unwrap();

    w.clock.advance(Duration::minutes(30));
    assert!(w.service.send_window().is_open(w.c5a.id).await.unwrap());
    w.send(&w.clara, &[w.anna], &[], &[], "Frage 2").await.unwrap();

    w.clock.advance(Duration::seconds(1));
    assert!(!w.service.send_window().is_open(w.c5a.id).await.unwrap());
    let err = w.send(&w.clara, &[w.anna], &[], &[], "Frage 3").await.unwrap_err();
    assert!(matches!(err, Error::SendWindowClosed));
}

#[tokio::test]
async fn a_one_minute_window_lapses_on_its_own() {
    let w = World::new().await;
    let gate = w.service.send_window();
    gate.open(w.c5b.id, 1, false).await.unwrap();
    assert!(gate.is_open(w.c5b.id).await.unwrap());

    w.clock.advance(Duration::seconds(61));
    assert!(!gate.is_open(w.c5b.id).await.unwrap());
}

#[tokio::test]
async fn windows_are_per_course() {
    let w = World::new().await;
    w.open_window(w.c5a.id, false).await;

    w.send(&w.clara, &[w.david], &[], &[], "Hausaufgaben").await.unwrap();
    let err = w.send(&w.emil, &[w.bernd], &[], &[], "Hausaufgaben").await.unwrap_err();
    assert!(matches!(err, Error::SendWindowClosed));
}

#[tokio::test]
async fn closing_and_reopening_replace_the_deadline() {
    let w = World::new().await;
    let gate = w.service.send_window();
    gate.open(w.c5a.id, 10, true).await.unwrap();
    gate.close(w.c5a.id).await.unwrap();
    let status = gate.status(w.c5a.id).await.unwrap();
    assert_eq!(status.state, SendWindowState::Closed);
    assert!(!status.attachments_enabled);

    let until = gate.open(w.c5a.id, 60, false).await.unwrap();
    assert_eq!(gate.status(w.c5a.id).await.unwrap().state, SendWindowState::OpenUntil(until));
}

#[tokio::test]
async fn durations_are_clamped() {
    let w = World::new().await;
    let gate = w.service.send_window();
    let now = w.clock.now_db();

    assert_eq!(gate.open(w.c5a.id, 0, false).await.unwrap(), now + ChronoDuration::minutes(1));
    assert_eq!(gate.open(w.c5a.id, 10_000, false).await.unwrap(), now + ChronoDuration::minutes(240));
}

#[tokio::test]
async fn default_duration_comes_from_config() {
    let config = MailConfig {
        default_send_window_minutes: 15,
        ..MailConfig::default()
    };
    let w = World::with_config(config).await;
    let now = w.clock.now_db();
    let until = w
        .service
        .open_send_window(&w.anna, w.c5a.id, None, false)
        .await
        .unwrap();
    assert_eq!(until, now + ChronoDuration::minutes(15));
}

#[tokio::test]
async fn only_managers_of_the_course_may_open_it() {
    let w = World::new().await;
    let gate = w.service.send_window();

    for outsider in [w.bernd, w.clara, w.sa_sued, w.tilo] {
        let err = gate.open_as(&outsider, w.c5a.id, 30, false).await.unwrap_err();
        assert!(matches!(err, Error::NotFound), "{outsider:?} opened 5a");
    }
    gate.open_as(&w.anna, w.c5a.id, 30, false).await.unwrap();
    gate.open_as(&w.sa_nord, w.c5b.id, 30, false).await.unwrap();
    gate.open_as(&w.admin, w.c7c.id, 30, false).await.unwrap();

    let err = gate.close_as(&w.bernd, w.c5a.id).await.unwrap_err();
    assert!(matches!(err, Error::NotFound));
    gate.close_as(&w.gerda, w.c5a.id).await.unwrap();
    assert!(!gate.is_open(w.c5a.id).await.unwrap());
}

#[tokio::test]
async fn student_attachments_need_the_switch() {
    let w = World::new().await;
    let store = MemoryStore::default();
    let engine = w.service.engine();
    let upload = || vec![Upload::new("bild.pdf", PDF)];

    w.open_window(w.c5a.id, false).await;
    let err = engine
        .compose_with_attachments(
            &w.clara,
            request(&[w.anna], &[], &[], "Mit Anhang", ComposeAction::Send),
            None,
            upload(),
            &store,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AttachmentsDisabled));
    assert_eq!(store.len(), 0);

    w.open_window(w.c5a.id, true).await;
    engine
        .compose_with_attachments(
            &w.clara,
            request(&[w.anna], &[], &[], "Mit Anhang", ComposeAction::Send),
            None,
            upload(),
            &store,
        )
        .await
        .unwrap();
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn a_draft_with_files_cannot_be_sent_once_attachments_are_switched_off() {
    let w = World::new().await;
    let store = MemoryStore::default();
    let engine = w.service.engine();

    w.open_window(w.c5a.id, true).await;
    let draft = engine
        .compose_with_attachments(
            &w.clara,
            request(&[w.anna], &[], &[], "Referat", ComposeAction::Draft),
            None,
            vec![Upload::new("referat.pdf", PDF)],
            &store,
        )
        .await
        .unwrap();

    w.open_window(w.c5a.id, false).await;
    let err = engine
        .update_draft(
            &w.clara,
            draft.message_id,
            request(&[w.anna], &[], &[], "Referat", ComposeAction::Send),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AttachmentsDisabled));

    let gate = w.service.send_window();
    assert!(gate.attachments_allowed(w.anna.role, None).await.unwrap());
    assert!(!gate.attachments_allowed(w.clara.role, Some(w.c5a.id)).await.unwrap());
}
