//! Room membership entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Privilege level of a room member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
pub enum MemberRole {
    /// Manages members, including other admins
    #[sea_orm(string_value = "admin")]
    Admin,

    /// Manages ordinary members
    #[sea_orm(string_value = "moderator")]
    Moderator,

    /// Can attend the room and open tunnels
    #[sea_orm(string_value = "member")]
    Member,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "members")]
pub struct Model {
    /// Member row id (primary key)
    #[sea_orm(primary_key)]
    pub id: i64,

    /// Hex-encoded Ed25519 identity (unique)
    #[sea_orm(unique)]
    pub public_key: String,

    /// Member role
    pub role: MemberRole,

    /// When the member was added
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
