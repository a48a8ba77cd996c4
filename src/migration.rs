//! Schema migrations for the mail engine tables.
//!
//! ```no_run
//! use sea_orm::Database;
//! use school_mail_core::migration::{Migrator, MigratorTrait};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = Database::connect("sqlite://mail.db?mode=rwc").await?;
//! Migrator::up(&conn, None).await?;
//! # Ok(())
//! # }
//! ```

pub use sea_orm_migration::prelude::*;

mod m20240101_000001_create_mail_tables;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    // Own migration table so the engine can share a database with the host app.
    fn migration_table_name() -> sea_orm::DynIden {
        Alias::new("school_mail_migrations").into_iden()
    }

    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![Box::new(m20240101_000001_create_mail_tables::Migration)]
    }
}
