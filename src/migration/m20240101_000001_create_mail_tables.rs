//! Initial schema: tenants, users, mail and audit tables.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

// Partial indexes are not expressible through the index builder; the syntax is
// shared by SQLite and PostgreSQL.
const USERNAME_INDEXES: [&str; 4] = [
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_students_username_course ON users(username, course_id) WHERE role = 'student'",
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_teachers_username_school ON users(username, school_id) WHERE role = 'teacher'",
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_schooladmins_username_school ON users(username, school_id) WHERE role = 'schooladmin'",
    "CREATE UNIQUE INDEX IF NOT EXISTS uniq_admins_username ON users(username) WHERE role = 'admin'",
];

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Schools::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Schools::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Schools::Name).string().not_null().unique_key())
                    .col(ColumnDef::new(Schools::Domain).string().not_null().unique_key())
                    .col(
                        ColumnDef::new(Schools::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Courses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Courses::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Courses::Name).string().not_null())
                    .col(ColumnDef::new(Courses::SchoolId).integer().null())
                    .col(
                        ColumnDef::new(Courses::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Courses::Table, Courses::SchoolId)
                            .to(Schools::Table, Schools::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("uniq_courses_school_name")
                    .table(Courses::Table)
                    .col(Courses::SchoolId)
                    .col(Courses::Name)
                    .unique()
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Username).string().not_null())
                    .col(ColumnDef::new(Users::DisplayName).string().not_null())
                    .col(
                        ColumnDef::new(Users::Role)
                            .text()
                            .not_null()
                            .check(Expr::col(Users::Role).is_in([
                                "student",
                                "teacher",
                                "schooladmin",
                                "admin",
                            ])),
                    )
                    .col(ColumnDef::new(Users::CourseId).integer().null())
                    .col(ColumnDef::new(Users::SchoolId).integer().null())
                    .col(ColumnDef::new(Users::PwHash).string().not_null())
                    .col(ColumnDef::new(Users::ExpiresAt).date().null())
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Users::Table, Users::CourseId)
                            .to(Courses::Table, Courses::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Users::Table, Users::SchoolId)
                            .to(Schools::Table, Schools::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        let conn = manager.get_connection();
        for sql in USERNAME_INDEXES {
            conn.execute_unprepared(sql).await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(TeacherCourses::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(TeacherCourses::UserId).integer().not_null())
                    .col(ColumnDef::new(TeacherCourses::CourseId).integer().not_null())
                    .primary_key(
                        Index::create()
                            .col(TeacherCourses::UserId)
                            .col(TeacherCourses::CourseId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(TeacherCourses::Table, TeacherCourses::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(TeacherCourses::Table, TeacherCourses::CourseId)
                            .to(Courses::Table, Courses::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_teacher_courses_course")
                    .table(TeacherCourses::Table)
                    .col(TeacherCourses::CourseId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(CourseSendWindows::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(CourseSendWindows::CourseId)
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(CourseSendWindows::OpenUntil)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(CourseSendWindows::AttachmentsEnabled)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(CourseSendWindows::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(CourseSendWindows::Table, CourseSendWindows::CourseId)
                            .to(Courses::Table, Courses::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Threads::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Threads::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Threads::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Messages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Messages::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Messages::SenderId).integer().not_null())
                    .col(ColumnDef::new(Messages::Subject).string().not_null())
                    .col(ColumnDef::new(Messages::BodyHtml).text().not_null())
                    .col(ColumnDef::new(Messages::BodyText).text().not_null())
                    .col(ColumnDef::new(Messages::ThreadId).integer().not_null())
                    .col(ColumnDef::new(Messages::ParentMessageId).integer().null())
                    .col(
                        ColumnDef::new(Messages::IsDraft)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Messages::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Messages::Table, Messages::SenderId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Messages::Table, Messages::ThreadId)
                            .to(Threads::Table, Threads::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Messages::Table, Messages::ParentMessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::SetNull),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_messages_sender")
                    .table(Messages::Table)
                    .col(Messages::SenderId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Recipients::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Recipients::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Recipients::MessageId).integer().not_null())
                    .col(ColumnDef::new(Recipients::UserId).integer().not_null())
                    .col(
                        ColumnDef::new(Recipients::Type)
                            .text()
                            .not_null()
                            .check(Expr::col(Recipients::Type).is_in(["TO", "CC", "BCC"])),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Recipients::Table, Recipients::MessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Recipients::Table, Recipients::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_recipients_msg")
                    .table(Recipients::Table)
                    .col(Recipients::MessageId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_recipients_user")
                    .table(Recipients::Table)
                    .col(Recipients::UserId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Deliveries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Deliveries::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Deliveries::MessageId).integer().not_null())
                    .col(ColumnDef::new(Deliveries::OwnerUserId).integer().not_null())
                    .col(
                        ColumnDef::new(Deliveries::Folder)
                            .text()
                            .not_null()
                            .check(Expr::col(Deliveries::Folder).is_in([
                                "INBOX", "SENT", "DRAFTS", "TRASH",
                            ])),
                    )
                    .col(
                        ColumnDef::new(Deliveries::IsRead)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(Deliveries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Deliveries::DeletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Deliveries::Table, Deliveries::MessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Deliveries::Table, Deliveries::OwnerUserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_deliveries_owner_folder_created")
                    .table(Deliveries::Table)
                    .col(Deliveries::OwnerUserId)
                    .col(Deliveries::Folder)
                    .col(Deliveries::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MailLogs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MailLogs::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MailLogs::MessageId).integer().not_null())
                    .col(ColumnDef::new(MailLogs::SenderId).integer().not_null())
                    .col(
                        ColumnDef::new(MailLogs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MailLogs::Table, MailLogs::MessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MailLogs::Table, MailLogs::SenderId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mail_logs_sender_created")
                    .table(MailLogs::Table)
                    .col(MailLogs::SenderId)
                    .col(MailLogs::CreatedAt)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MailLogRecipients::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MailLogRecipients::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MailLogRecipients::LogId).integer().not_null())
                    .col(ColumnDef::new(MailLogRecipients::UserId).integer().not_null())
                    .col(
                        ColumnDef::new(MailLogRecipients::Type)
                            .text()
                            .not_null()
                            .check(
                                Expr::col(MailLogRecipients::Type).is_in(["TO", "CC", "BCC"]),
                            ),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MailLogRecipients::Table, MailLogRecipients::LogId)
                            .to(MailLogs::Table, MailLogs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(MailLogRecipients::Table, MailLogRecipients::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_mail_log_rec_log")
                    .table(MailLogRecipients::Table)
                    .col(MailLogRecipients::LogId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Attachments::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Attachments::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Attachments::MessageId).integer().not_null())
                    .col(ColumnDef::new(Attachments::OriginalName).string().not_null())
                    .col(
                        ColumnDef::new(Attachments::StorageName)
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Attachments::MimeType).string().not_null())
                    .col(ColumnDef::new(Attachments::SizeBytes).big_integer().not_null())
                    .col(
                        ColumnDef::new(Attachments::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .from(Attachments::Table, Attachments::MessageId)
                            .to(Messages::Table, Messages::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_attachments_message")
                    .table(Attachments::Table)
                    .col(Attachments::MessageId)
                    .if_not_exists()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Reverse creation order so foreign keys never dangle.
        manager
            .drop_table(Table::drop().table(Attachments::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MailLogRecipients::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(MailLogs::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Deliveries::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Recipients::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Messages::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Threads::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(CourseSendWindows::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(TeacherCourses::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Courses::Table).if_exists().to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Schools::Table).if_exists().to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Schools {
    Table,
    Id,
    Name,
    Domain,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Courses {
    Table,
    Id,
    Name,
    SchoolId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Username,
    DisplayName,
    Role,
    CourseId,
    SchoolId,
    PwHash,
    ExpiresAt,
    CreatedAt,
}

#[derive(DeriveIden)]
enum TeacherCourses {
    Table,
    UserId,
    CourseId,
}

#[derive(DeriveIden)]
enum CourseSendWindows {
    Table,
    CourseId,
    OpenUntil,
    AttachmentsEnabled,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Threads {
    Table,
    Id,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Messages {
    Table,
    Id,
    SenderId,
    Subject,
    BodyHtml,
    BodyText,
    ThreadId,
    ParentMessageId,
    IsDraft,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Recipients {
    Table,
    Id,
    MessageId,
    UserId,
    Type,
}

#[derive(DeriveIden)]
enum Deliveries {
    Table,
    Id,
    MessageId,
    OwnerUserId,
    Folder,
    IsRead,
    CreatedAt,
    DeletedAt,
}

#[derive(DeriveIden)]
enum MailLogs {
    Table,
    Id,
    MessageId,
    SenderId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum MailLogRecipients {
    Table,
    Id,
    LogId,
    UserId,
    Type,
}

#[derive(DeriveIden)]
enum Attachments {
    Table,
    Id,
    MessageId,
    OriginalName,
    StorageName,
    MimeType,
    SizeBytes,
    CreatedAt,
}
