mod common;

use std::collections::BTreeSet;

use chrono::Days;
use common::{add, World};

use school_mail_core::access::SupervisoryScope;
use school_mail_core::{AccessPath, Actor, Clock, NewUser, Role, VisibleUser};

fn id_set(users: &[VisibleUser]) -> BTreeSet<i32> {
    users.iter().map(|u| u.id).collect()
}

fn set_of(actors: &[Actor]) -> BTreeSet<i32> {
    actors.iter().map(|a| a.id).collect()
}

#[tokio::test]
async fn students_see_their_teachers_and_classmates() {
    let w = World::new().await;
    let visible = w.service.visibility().visible_users(&w.clara).await.unwrap();

    let order: Vec<i32> = visible.iter().map(|u| u.id).collect();
    assert_eq!(order, vec![w.anna.id, w.gerda.id, w.david.id]);

    let anna = &visible[0];
    assert_eq!(anna.role, Role::Teacher);
    assert_eq!(anna.teacher_course_names, vec!["Klasse 5a", "Klasse 5b"]);
    assert_eq!(anna.school_name.as_deref(), Some("Nordschule"));

    let david = &visible[2];
    assert_eq!(david.course_name.as_deref(), Some("Klasse 5a"));
    assert_eq!(david.school_domain.as_deref(), Some("nord.example"));
}

#[tokio::test]
async fn teachers_see_school_staff_and_students_of_taught_courses() {
    let w = World::new().await;
    let visible = w.service.visibility().visible_users(&w.bernd).await.unwrap();

    assert_eq!(id_set(&visible), set_of(&[w.sa_nord, w.anna, w.gerda, w.emil]));
    let roles: Vec<Role> = visible.iter().map(|u| u.role).collect();
    assert_eq!(roles, vec![Role::SchoolAdmin, Role::Teacher, Role::Teacher, Role::Student]);
}

#[tokio::test]
async fn school_admins_see_their_school_and_the_admin() {
    let w = World::new().await;
    let visible = w.service.visibility().visible_users(&w.sa_nord).await.unwrap();

    assert_eq!(
        id_set(&visible),
        set_of(&[w.admin, w.anna, w.bernd, w.gerda, w.clara, w.david, w.emil])
    );
    assert_eq!(visible[0].id, w.admin.id);
    assert_eq!(visible.last().map(|u| u.role), Some(Role::Student));
}

#[tokio::test]
async fn the_admin_sees_staff_of_every_school_but_no_students() {
    let w = World::new().await;
    let visible = w.service.visibility().visible_users(&w.admin).await.unwrap();

    assert_eq!(
        id_set(&visible),
        set_of(&[w.sa_nord, w.sa_sued, w.anna, w.bernd, w.gerda, w.tilo])
    );
    let schools: Vec<Option<&str>> = visible.iter().map(|u| u.school_name.as_deref()).collect();
    assert_eq!(
        schools,
        vec![
            Some("Nordschule"),
            Some("Nordschule"),
            Some("Nordschule"),
            Some("Nordschule"),
            Some("Südschule"),
            Some("Südschule"),
        ]
    );
    assert_eq!(visible[0].role, Role::SchoolAdmin);
}

#[tokio::test]
async fn schools_do_not_see_each_other() {
    let w = World::new().await;
    let resolver = w.service.visibility();

    for (viewer, foreign) in [
        (w.sa_sued, w.clara),
        (w.sa_sued, w.anna),
        (w.tilo, w.sa_nord),
        (w.fatma, w.anna),
        (w.clara, w.fatma),
        (w.anna, w.tilo),
    ] {
        assert!(
            !resolver.can_address(&viewer, foreign.id).await.unwrap(),
            "{viewer:?} can address {foreign:?}"
        );
    }
}

#[tokio::test]
async fn expired_accounts_disappear_after_their_last_day() {
    let w = World::new().await;
    let today = w.clock.today();
    let leaving = w
        .service
        .directory()
        .create_user(NewUser {
            username: "jonas".into(),
            display_name: "Jonas Jahn".into(),
            role: Role::Student,
            course_id: Some(w.c5a.id),
            school_id: None,
            pw_hash: "x".into(),
            expires_at: Some(today),
        })
        .await
        .unwrap();

    let resolver = w.service.visibility();
    assert!(resolver.can_address(&w.anna, leaving.id).await.unwrap());

    w.clock.advance(time::Duration::days(1));
    assert_eq!(w.clock.today(), today.checked_add_days(Days::new(1)).unwrap());
    assert!(!resolver.can_address(&w.anna, leaving.id).await.unwrap());
}

#[tokio::test]
async fn search_matches_names_and_courses() {
    let w = World::new().await;
    let resolver = w.service.visibility();

    let hits = resolver.search(&w.anna, "5B").await.unwrap();
    assert_eq!(id_set(&hits), set_of(&[w.bernd, w.emil]));

    let hits = resolver.search(&w.anna, "  conrad ").await.unwrap();
    assert_eq!(id_set(&hits), set_of(&[w.clara]));

    let hits = resolver.search(&w.clara, "Ebert").await.unwrap();
    assert!(hits.is_empty());

    let all = resolver.search(&w.anna, "").await.unwrap();
    assert_eq!(all.len(), resolver.visible_users(&w.anna).await.unwrap().len());
}

#[tokio::test]
async fn search_is_capped() {
    let w = World::new().await;
    for n in 0..25 {
        add(
            &w.service,
            &format!("kind{n:02}"),
            &format!("Kind {n:02}"),
            Role::Student,
            Some(w.c5a.id),
            None,
        )
        .await;
    }
    let hits = w.service.visibility().search(&w.anna, "kind").await.unwrap();
    assert_eq!(hits.len(), 20);
}

#[tokio::test]
async fn addressable_subset_keeps_input_order() {
    let w = World::new().await;
    let subset = w
        .service
        .visibility()
        .addressable_subset(&w.clara, &[w.fatma.id, w.david.id, w.emil.id, w.anna.id, 9_999])
        .await
        .unwrap();
    assert_eq!(subset, vec![w.david.id, w.anna.id]);
}

#[tokio::test]
async fn unknown_viewers_see_nobody() {
    let w = World::new().await;
    let ghost = Actor::new(9_999, Role::Admin);
    assert!(w.service.visibility().visible_users(&ghost).await.unwrap().is_empty());
}

#[tokio::test]
async fn teachers_without_course_links_fall_back_to_their_own_course() {
    let w = World::new().await;
    let hans = add(&w.service, "hans", "Hans Hahn", Role::Teacher, Some(w.c5b.id), Some(w.nord.id)).await;

    let dir = w.service.directory();
    assert_eq!(dir.teacher_course_ids(hans.id).await.unwrap(), vec![w.c5b.id]);

    let visible = id_set(&w.service.visibility().visible_users(&hans).await.unwrap());
    assert!(visible.contains(&w.emil.id));
    assert!(!visible.contains(&w.clara.id));
    assert!(!visible.contains(&w.david.id));
    assert!(!visible.contains(&w.fatma.id));

    w.open_window(w.c5b.id, false).await;
    let sent = w.send(&w.emil, &[w.bernd], &[], &[], "Referat").await.unwrap();
    let access = w
        .service
        .authorizer()
        .can_view(&hans, sent.message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(access.path, AccessPath::Supervisory(SupervisoryScope::Course(w.c5b.id)));

    // Once a course link exists, the legacy course no longer counts.
    dir.assign_teacher_course(hans.id, w.c5a.id).await.unwrap();
    assert_eq!(dir.teacher_course_ids(hans.id).await.unwrap(), vec![w.c5a.id]);
    assert!(w.service.authorizer().can_view(&hans, sent.message_id).await.unwrap().is_none());
}
