mod common;

use common::World;

use school_mail_core::LogScope;

#[tokio::test]
async fn the_log_records_participants_of_sent_mail_only() {
    let w = World::new().await;
    let sent = w
        .send(&w.anna, &[w.clara], &[w.david], &[w.gerda], "Zeugniskonferenz")
        .await
        .unwrap();
    w.draft(&w.anna, &[w.clara], "Nicht gesendet").await.unwrap();

    let audit = w.service.audit();
    assert_eq!(audit.count(LogScope::All).await.unwrap(), 1);

    let entries = audit.fetch(LogScope::All, 50, 0).await.unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.message_id, sent.message_id);
    assert_eq!(entry.sender.user_id, w.anna.id);
    assert_eq!(entry.to.iter().map(|p| p.user_id).collect::<Vec<_>>(), vec![w.clara.id]);
    assert_eq!(entry.cc.iter().map(|p| p.user_id).collect::<Vec<_>>(), vec![w.david.id]);
    assert_eq!(entry.bcc.iter().map(|p| p.user_id).collect::<Vec<_>>(), vec![w.gerda.id]);
}

#[tokio::test]
async fn school_scope_covers_mail_sent_from_its_courses() {
    let w = World::new().await;
    w.open_window(w.c5a.id, false).await;
    w.open_window(w.c7c.id, false).await;

    let nord_student = w.send(&w.clara, &[w.david], &[], &[], "Nord").await.unwrap();
    w.clock.advance(time::Duration::minutes(1));
    let sued_student = w.send(&w.fatma, &[w.tilo], &[], &[], "Süd").await.unwrap();
    w.send(&w.anna, &[w.clara], &[], &[], "Lehrkraft").await.unwrap();

    let audit = w.service.audit();
    assert_eq!(audit.count(LogScope::All).await.unwrap(), 3);

    let nord = audit.fetch(LogScope::School(w.nord.id), 50, 0).await.unwrap();
    assert_eq!(
        nord.iter().map(|e| e.message_id).collect::<Vec<_>>(),
        vec![nord_student.message_id]
    );
    assert_eq!(audit.count(LogScope::School(w.nord.id)).await.unwrap(), 1);

    let sued = audit.fetch(LogScope::School(w.sued.id), 50, 0).await.unwrap();
    assert_eq!(
        sued.iter().map(|e| e.message_id).collect::<Vec<_>>(),
        vec![sued_student.message_id]
    );
}

#[tokio::test]
async fn pages_are_newest_first() {
    let w = World::new().await;
    let mut ids = Vec::new();
    for subject in ["Eins", "Zwei", "Drei"] {
        ids.push(w.send(&w.anna, &[w.bernd], &[], &[], subject).await.unwrap().message_id);
        w.clock.advance(time::Duration::minutes(1));
    }

    let audit = w.service.audit();
    let first = audit.fetch(LogScope::All, 2, 0).await.unwrap();
    let second = audit.fetch(LogScope::All, 2, 2).await.unwrap();
    assert_eq!(first.iter().map(|e| e.message_id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);
    assert_eq!(second.iter().map(|e| e.message_id).collect::<Vec<_>>(), vec![ids[0]]);
}
