//! SQLite-backed membership storage for a room.
//!
//! The membership table decides who may attend: the listener checks every
//! attested identity against it before admitting a connection. Rows carry a
//! role so admins and moderators can be told apart by management tooling.

pub mod entities;
pub mod migrator;
mod store;

pub use entities::member::{self, MemberRole};
pub use store::{MemberDbError, MemberStore};

use sea_orm::{Database, DatabaseConnection, DbErr};
use sea_orm_migration::MigratorTrait;
use tracing::debug;

/// Opens a database connection.
pub async fn connect(url: &str) -> Result<DatabaseConnection, DbErr> {
    debug!(%url, "connecting to membership database");
    Database::connect(url).await
}

/// Brings the schema up to date.
pub async fn migrate(db: &DatabaseConnection) -> Result<(), DbErr> {
    migrator::Migrator::up(db, None).await
}
