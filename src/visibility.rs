//! Who may address or see whom.
//!
//! Every rule is role-dispatched with no fallthrough:
//!
//! | Viewer        | Sees                                                                  |
//! |---------------|-----------------------------------------------------------------------|
//! | `admin`       | every school admin and teacher                                        |
//! | `schooladmin` | the admin; teachers of the school (direct or via a course); its students |
//! | `teacher`     | school admins and teachers of the own school; students of taught courses |
//! | `student`     | teachers of the own course; classmates                                |
//!
//! The viewer and expired accounts are never listed.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect,
};
use serde::Serialize;

use crate::actor::Actor;
use crate::clock::Clock;
use crate::directory::{school_course_ids, teacher_course_ids};
use crate::entity::{course, school, teacher_course, user, user::Role};
use crate::error::Result;

const SEARCH_LIMIT: usize = 20;

/// Directory entry of a user visible to the viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleUser {
    pub id: i32,
    pub username: String,
    pub display_name: String,
    pub role: Role,
    pub course_name: Option<String>,
    pub school_name: Option<String>,
    pub school_domain: Option<String>,
    /// Names of the courses a teacher teaches; empty for other roles.
    pub teacher_course_names: Vec<String>,
}

impl VisibleUser {
    fn matches(&self, needle: &str) -> bool {
        let hit = |s: &str| s.to_lowercase().contains(needle);
        self.course_name.as_deref().is_some_and(hit)
            || self.teacher_course_names.iter().any(|c| hit(c))
            || hit(&self.display_name)
            || hit(&self.username)
    }
}

/// Resolves the address book of a viewer.
#[derive(Debug, Clone)]
pub struct VisibilityResolver {
    conn: DatabaseConnection,
    clock: Arc<dyn Clock>,
}

impl VisibilityResolver {
    pub fn new(conn: DatabaseConnection, clock: Arc<dyn Clock>) -> Self {
        Self { conn, clock }
    }

    /// Every user the viewer may address, ordered for display.
    pub async fn visible_users(&self, viewer: &Actor) -> Result<Vec<VisibleUser>> {
        let Some(me) = user::Entity::find_by_id(viewer.id).one(&self.conn).await? else {
            return Ok(Vec::new());
        };

        let Some(scope) = self.scope_for(viewer, &me).await? else {
            return Ok(Vec::new());
        };

        let users = user::Entity::find()
            .filter(user::Column::Id.ne(viewer.id))
            .filter(user::active_on(self.clock.today()))
            .filter(scope)
            .all(&self.conn)
            .await?;

        let mut entries = self.enrich(users).await?;
        sort_for(viewer.role, &mut entries);
        Ok(entries)
    }

    /// Address-book search: case-insensitive substring over course names,
    /// display name and username. At most 20 hits.
    pub async fn search(&self, viewer: &Actor, query: &str) -> Result<Vec<VisibleUser>> {
        let needle = query.trim().to_lowercase();
        let mut users = self.visible_users(viewer).await?;
        if !needle.is_empty() {
            users.retain(|u| u.matches(&needle));
        }
        users.truncate(SEARCH_LIMIT);
        Ok(users)
    }

    /// The ids from `candidates` the viewer may address, in input order.
    pub async fn addressable_subset(&self, viewer: &Actor, candidates: &[i32]) -> Result<Vec<i32>> {
        let visible: BTreeSet<i32> = self
            .visible_users(viewer)
            .await?
            .into_iter()
            .map(|u| u.id)
            .collect();
        Ok(candidates
            .iter()
            .copied()
            .filter(|id| visible.contains(id))
            .collect())
    }

    pub async fn can_address(&self, viewer: &Actor, target_id: i32) -> Result<bool> {
        Ok(!self.addressable_subset(viewer, &[target_id]).await?.is_empty())
    }

    /// The role-specific filter, or `None` when the viewer's scope is empty.
    async fn scope_for(&self, viewer: &Actor, me: &user::Model) -> Result<Option<Condition>> {
        let scope = match viewer.role {
            Role::Admin => Some(
                Condition::all().add(user::Column::Role.is_in([Role::SchoolAdmin, Role::Teacher])),
            ),
            Role::SchoolAdmin => {
                let mut scope = Condition::any().add(user::Column::Role.eq(Role::Admin));
                if let Some(school_id) = me.school_id {
                    let courses = school_course_ids(&self.conn, school_id).await?;
                    let course_teachers: Vec<i32> = teacher_course::Entity::find()
                        .select_only()
                        .column(teacher_course::Column::UserId)
                        .filter(teacher_course::Column::CourseId.is_in(courses.clone()))
                        .into_tuple()
                        .all(&self.conn)
                        .await?;
                    scope = scope
                        .add(
                            Condition::all()
                                .add(user::Column::Role.eq(Role::Teacher))
                                .add(
                                    Condition::any()
                                        .add(user::Column::SchoolId.eq(school_id))
                                        .add(user::Column::Id.is_in(course_teachers)),
                                ),
                        )
                        .add(
                            Condition::all()
                                .add(user::Column::Role.eq(Role::Student))
                                .add(user::Column::CourseId.is_in(courses)),
                        );
                }
                Some(scope)
            }
            Role::Teacher => {
                let mut scope = Condition::any();
                if let Some(school_id) = me.school_id {
                    scope = scope.add(
                        Condition::all()
                            .add(user::Column::Role.is_in([Role::SchoolAdmin, Role::Teacher]))
                            .add(user::Column::SchoolId.eq(school_id)),
                    );
                }
                let taught = teacher_course_ids(&self.conn, me.id).await?;
                if !taught.is_empty() {
                    scope = scope.add(
                        Condition::all()
                            .add(user::Column::Role.eq(Role::Student))
                            .add(user::Column::CourseId.is_in(taught)),
                    );
                }
                (!scope.is_empty()).then_some(scope)
            }
            Role::Student => match me.course_id {
                Some(course_id) => {
                    let teachers: Vec<i32> = teacher_course::Entity::find()
                        .select_only()
                        .column(teacher_course::Column::UserId)
                        .filter(teacher_course::Column::CourseId.eq(course_id))
                        .into_tuple()
                        .all(&self.conn)
                        .await?;
                    Some(
                        Condition::any()
                            .add(
                                Condition::all()
                                    .add(user::Column::Role.eq(Role::Teacher))
                                    .add(user::Column::Id.is_in(teachers)),
                            )
                            .add(
                                Condition::all()
                                    .add(user::Column::Role.eq(Role::Student))
                                    .add(user::Column::CourseId.eq(course_id)),
                            ),
                    )
                }
                None => None,
            },
        };
        Ok(scope)
    }

    /// Attaches course, school and teaching assignments to raw user rows.
    async fn enrich(&self, users: Vec<user::Model>) -> Result<Vec<VisibleUser>> {
        if users.is_empty() {
            return Ok(Vec::new());
        }

        let user_ids: Vec<i32> = users.iter().map(|u| u.id).collect();
        let assignments = teacher_course::Entity::find()
            .filter(teacher_course::Column::UserId.is_in(user_ids))
            .all(&self.conn)
            .await?;

        let course_ids: BTreeSet<i32> = users
            .iter()
            .filter_map(|u| u.course_id)
            .chain(assignments.iter().map(|a| a.course_id))
            .collect();
        let courses: HashMap<i32, course::Model> = course::Entity::find()
            .filter(course::Column::Id.is_in(course_ids))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let school_ids: BTreeSet<i32> = users
            .iter()
            .filter_map(|u| u.school_id)
            .chain(courses.values().filter_map(|c| c.school_id))
            .collect();
        let schools: HashMap<i32, school::Model> = school::Entity::find()
            .filter(school::Column::Id.is_in(school_ids))
            .all(&self.conn)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();

        let mut taught: HashMap<i32, Vec<String>> = HashMap::new();
        for a in &assignments {
            if let Some(c) = courses.get(&a.course_id) {
                taught.entry(a.user_id).or_default().push(c.name.clone());
            }
        }

        Ok(users
            .into_iter()
            .map(|u| {
                let course = u.course_id.and_then(|id| courses.get(&id));
                // The course's school wins over the user's own school.
                let school = course
                    .and_then(|c| c.school_id)
                    .or(u.school_id)
                    .and_then(|id| schools.get(&id));
                let mut teacher_course_names = taught.remove(&u.id).unwrap_or_default();
                teacher_course_names.sort();
                VisibleUser {
                    id: u.id,
                    course_name: course.map(|c| c.name.clone()),
                    school_name: school.map(|s| s.name.clone()),
                    school_domain: school.map(|s| s.domain.clone()),
                    teacher_course_names,
                    username: u.username,
                    display_name: u.display_name,
                    role: u.role,
                }
            })
            .collect())
    }
}

fn role_rank(viewer: Role, role: Role) -> u8 {
    match (viewer, role) {
        (Role::Admin, Role::SchoolAdmin) => 0,
        (Role::Admin, _) => 1,
        (Role::SchoolAdmin, Role::Admin) => 0,
        (Role::SchoolAdmin, Role::Teacher) => 1,
        (Role::SchoolAdmin, _) => 2,
        (Role::Teacher, Role::SchoolAdmin) => 0,
        (Role::Teacher, Role::Teacher) => 1,
        (Role::Teacher, _) => 2,
        (Role::Student, Role::Teacher) => 0,
        (Role::Student, _) => 1,
    }
}

fn sort_for(viewer: Role, entries: &mut [VisibleUser]) {
    entries.sort_by(|a, b| {
        let by_school = match viewer {
            Role::Admin => a.school_name.cmp(&b.school_name),
            _ => Ordering::Equal,
        };
        let by_course = match viewer {
            Role::SchoolAdmin | Role::Teacher => a.course_name.cmp(&b.course_name),
            _ => Ordering::Equal,
        };
        by_school
            .then(role_rank(viewer, a.role).cmp(&role_rank(viewer, b.role)))
            .then(by_course)
            .then_with(|| a.display_name.cmp(&b.display_name))
            .then(a.id.cmp(&b.id))
    });
}
