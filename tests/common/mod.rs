#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait, SqlxSqliteConnector};
use sqlx::sqlite::SqlitePoolOptions;
use time::macros::datetime;
use tracing_subscriber::EnvFilter;

use school_mail_core::entity::{course, school};
use school_mail_core::{
    Actor, AttachmentStore, ComposeAction, ComposeOutcome, ComposeRequest, MailConfig, MailService,
    ManualClock, NewUser, Result, Role,
};

pub fn init_tracing() {
    dotenvy::dotenv().ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A fresh in-memory database. The pool holds a single connection so the
/// schema lives as long as the pool does.
pub async fn connect() -> DatabaseConnection {
    init_tracing();
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    SqlxSqliteConnector::from_sqlx_sqlite_pool(pool)
}

/// Number of rows in the entity's table.
pub async fn rows<E: EntityTrait>(conn: &DatabaseConnection, _entity: E) -> usize {
    E::find().all(conn).await.unwrap().len()
}

/// Two schools with courses, staff and students.
///
/// | Who        | Role        | Where                          |
/// |------------|-------------|--------------------------------|
/// | `admin`    | admin       |                                |
/// | `sa_nord`  | schooladmin | Nordschule                     |
/// | `sa_sued`  | schooladmin | Südschule                      |
/// | `anna`     | teacher     | Nordschule, teaches 5a and 5b  |
/// | `bernd`    | teacher     | Nordschule, teaches 5b         |
/// | `gerda`    | teacher     | Nordschule, teaches 5a         |
/// | `tilo`     | teacher     | Südschule, teaches 7c          |
/// | `clara`    | student     | 5a                             |
/// | `david`    | student     | 5a                             |
/// | `emil`     | student     | 5b                             |
/// | `fatma`    | student     | 7c                             |
pub struct World {
    pub service: MailService,
    pub clock: Arc<ManualClock>,
    pub nord: school::Model,
    pub sued: school::Model,
    pub c5a: course::Model,
    pub c5b: course::Model,
    pub c7c: course::Model,
    pub admin: Actor,
    pub sa_nord: Actor,
    pub sa_sued: Actor,
    pub anna: Actor,
    pub bernd: Actor,
    pub gerda: Actor,
    pub tilo: Actor,
    pub clara: Actor,
    pub david: Actor,
    pub emil: Actor,
    pub fatma: Actor,
}

impl World {
    pub async fn new() -> Self {
        Self::with_config(MailConfig::default()).await
    }

    pub async fn with_config(config: MailConfig) -> Self {
        let clock = Arc::new(ManualClock::new(datetime!(2024-09-02 08:00 UTC)));
        let service = MailService::new(connect().await)
            .with_config(config)
            .with_clock(clock.clone());
        service.migrate().await.unwrap();

        let dir = service.directory();
        let nord = dir.create_school("Nordschule", "nord.example").await.unwrap();
        let sued = dir.create_school("Südschule", "sued.example").await.unwrap();
        let c5a = dir.create_course(nord.id, "Klasse 5a").await.unwrap();
        let c5b = dir.create_course(nord.id, "Klasse 5b").await.unwrap();
        let c7c = dir.create_course(sued.id, "Klasse 7c").await.unwrap();

        let admin = add(&service, "admin", "Admin Zentral", Role::Admin, None, None).await;
        let sa_nord = add(&service, "leitung", "Lena Leitung", Role::SchoolAdmin, None, Some(nord.id)).await;
        let sa_sued = add(&service, "leitung", "Sven Süd", Role::SchoolAdmin, None, Some(sued.id)).await;
        let anna = add(&service, "anna", "Anna Albers", Role::Teacher, None, Some(nord.id)).await;
        let bernd = add(&service, "bernd", "Bernd Brandt", Role::Teacher, None, Some(nord.id)).await;
        let gerda = add(&service, "gerda", "Gerda Gross", Role::Teacher, None, Some(nord.id)).await;
        let tilo = add(&service, "tilo", "Tilo Thal", Role::Teacher, None, Some(sued.id)).await;
        let clara = add(&service, "clara", "Clara Conrad", Role::Student, Some(c5a.id), None).await;
        let david = add(&service, "david", "David Dorn", Role::Student, Some(c5a.id), None).await;
        let emil = add(&service, "emil", "Emil Ebert", Role::Student, Some(c5b.id), None).await;
        let fatma = add(&service, "fatma", "Fatma Fink", Role::Student, Some(c7c.id), None).await;

        for (teacher, course) in [
            (anna, c5a.id),
            (anna, c5b.id),
            (bernd, c5b.id),
            (gerda, c5a.id),
            (tilo, c7c.id),
        ] {
            dir.assign_teacher_course(teacher.id, course).await.unwrap();
        }

        Self {
            service,
            clock,
            nord,
            sued,
            c5a,
            c5b,
            c7c,
            admin,
            sa_nord,
            sa_sued,
            anna,
            bernd,
            gerda,
            tilo,
            clara,
            david,
            emil,
            fatma,
        }
    }

    pub fn conn(&self) -> &DatabaseConnection {
        self.service.connection()
    }

    pub async fn send(
        &self,
        from: &Actor,
        to: &[Actor],
        cc: &[Actor],
        bcc: &[Actor],
        subject: &str,
    ) -> Result<ComposeOutcome> {
        self.service
            .engine()
            .compose(from, request(to, cc, bcc, subject, ComposeAction::Send))
            .await
    }

    pub async fn draft(&self, from: &Actor, to: &[Actor], subject: &str) -> Result<ComposeOutcome> {
        self.service
            .engine()
            .compose(from, request(to, &[], &[], subject, ComposeAction::Draft))
            .await
    }

    /// Opens the send window of a course for 30 minutes.
    pub async fn open_window(&self, course_id: i32, attachments: bool) {
        self.service
            .send_window()
            .open(course_id, 30, attachments)
            .await
            .unwrap();
    }
}

pub async fn add(
    service: &MailService,
    username: &str,
    display_name: &str,
    role: Role,
    course_id: Option<i32>,
    school_id: Option<i32>,
) -> Actor {
    let user = service
        .directory()
        .create_user(NewUser {
            username: username.into(),
            display_name: display_name.into(),
            role,
            course_id,
            school_id,
            pw_hash: "$argon2id$stub".into(),
            expires_at: None,
        })
        .await
        .unwrap();
    Actor::from(&user)
}

pub fn ids(actors: &[Actor]) -> Vec<i32> {
    actors.iter().map(|a| a.id).collect()
}

pub fn request(
    to: &[Actor],
    cc: &[Actor],
    bcc: &[Actor],
    subject: &str,
    action: ComposeAction,
) -> ComposeRequest {
    ComposeRequest {
        to: ids(to),
        cc: ids(cc),
        bcc: ids(bcc),
        subject: subject.into(),
        body_html: subject.to_string(),
        action,
        ..Default::default()
    }
}

pub const PDF: &[u8] = b"%PDF-1.4\n%fake but well-formed enough\n";

/// Attachment store keeping files in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    files: Mutex<HashMap<String, Vec<u8>>>,
    next: AtomicUsize,
}

impl MemoryStore {
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.files.lock().unwrap().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

#[async_trait]
impl AttachmentStore for MemoryStore {
    async fn put(&self, bytes: &[u8], extension: &str) -> io::Result<String> {
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let name = format!("file-{n:04}{extension}");
        self.files.lock().unwrap().insert(name.clone(), bytes.to_vec());
        Ok(name)
    }

    async fn remove(&self, storage_name: &str) -> io::Result<()> {
        match self.files.lock().unwrap().remove(storage_name) {
            Some(_) => Ok(()),
            None => Err(io::Error::from(io::ErrorKind::NotFound)),
        }
    }
}

/// Accepts `accept` files, then fails every write.
#[derive(Debug)]
pub struct FailingStore {
    pub inner: MemoryStore,
    accept: usize,
}

impl FailingStore {
    pub fn after(accept: usize) -> Self {
        Self {
            inner: MemoryStore::default(),
            accept,
        }
    }
}

#[async_trait]
impl AttachmentStore for FailingStore {
    async fn put(&self, bytes: &[u8], extension: &str) -> io::Result<String> {
        if self.inner.len() >= self.accept {
            return Err(io::Error::other("disk full"));
        }
        self.inner.put(bytes, extension).await
    }

    async fn remove(&self, storage_name: &str) -> io::Result<()> {
        self.inner.remove(storage_name).await
    }
}
