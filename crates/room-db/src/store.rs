//! Membership persistence operations.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionError, TransactionTrait,
};
use thiserror::Error;
use tracing::debug;

use room_proto::Identity;

use crate::entities::member::{self, MemberRole};

#[derive(Debug, Error)]
pub enum MemberDbError {
    #[error("member not found")]
    NotFound,

    #[error("member already added: {0}")]
    AlreadyAdded(Identity),

    #[error("need at least one other admin")]
    LastAdmin,

    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

/// Membership table operations.
///
/// Identities are stored hex-encoded; callers pass the typed form.
#[derive(Clone)]
pub struct MemberStore {
    db: DatabaseConnection,
}

impl MemberStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Adds a member. Each identity can be added at most once.
    pub async fn add(
        &self,
        identity: Identity,
        role: MemberRole,
    ) -> Result<member::Model, MemberDbError> {
        let row = member::ActiveModel {
            public_key: Set(identity.to_hex()),
            role: Set(role),
            created_at: Set(Utc::now()),
            ..Default::default()
        };

        match row.insert(&self.db).await {
            Ok(model) => {
                debug!(member = %identity.short(), role = ?model.role, "member added");
                Ok(model)
            }
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    Err(MemberDbError::AlreadyAdded(identity))
                }
                _ => Err(err.into()),
            },
        }
    }

    pub async fn get(&self, identity: Identity) -> Result<member::Model, MemberDbError> {
        member::Entity::find()
            .filter(member::Column::PublicKey.eq(identity.to_hex()))
            .one(&self.db)
            .await?
            .ok_or(MemberDbError::NotFound)
    }

    pub async fn get_by_id(&self, id: i64) -> Result<member::Model, MemberDbError> {
        member::Entity::find_by_id(id)
            .one(&self.db)
            .await?
            .ok_or(MemberDbError::NotFound)
    }

    /// Whether the identity may attend the room.
    pub async fn is_member(&self, identity: Identity) -> Result<bool, MemberDbError> {
        let count = member::Entity::find()
            .filter(member::Column::PublicKey.eq(identity.to_hex()))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    /// All members in insertion order.
    pub async fn list(&self) -> Result<Vec<member::Model>, MemberDbError> {
        Ok(member::Entity::find()
            .order_by_asc(member::Column::Id)
            .all(&self.db)
            .await?)
    }

    pub async fn count(&self) -> Result<u64, MemberDbError> {
        Ok(member::Entity::find().count(&self.db).await?)
    }

    pub async fn remove(&self, identity: Identity) -> Result<(), MemberDbError> {
        let result = member::Entity::delete_many()
            .filter(member::Column::PublicKey.eq(identity.to_hex()))
            .exec(&self.db)
            .await?;

        if result.rows_affected == 0 {
            return Err(MemberDbError::NotFound);
        }

        debug!(member = %identity.short(), "member removed");
        Ok(())
    }

    pub async fn remove_by_id(&self, id: i64) -> Result<(), MemberDbError> {
        let result = member::Entity::delete_by_id(id).exec(&self.db).await?;

        if result.rows_affected == 0 {
            return Err(MemberDbError::NotFound);
        }

        Ok(())
    }

    /// Changes a member's role.
    ///
    /// Demoting the last admin is refused so a room can never end up without
    /// one; every other change goes through. The admin count and the update
    /// run in one transaction, so two racing demotions cannot each count the
    /// other as the surviving admin.
    pub async fn set_role(
        &self,
        identity: Identity,
        role: MemberRole,
    ) -> Result<(), MemberDbError> {
        self.db
            .transaction::<_, (), MemberDbError>(move |txn| {
                Box::pin(async move {
                    let current = member::Entity::find()
                        .filter(member::Column::PublicKey.eq(identity.to_hex()))
                        .one(txn)
                        .await?
                        .ok_or(MemberDbError::NotFound)?;

                    if current.role == MemberRole::Admin && role != MemberRole::Admin {
                        let other_admins = member::Entity::find()
                            .filter(member::Column::Id.ne(current.id))
                            .filter(member::Column::Role.eq(MemberRole::Admin))
                            .count(txn)
                            .await?;

                        if other_admins == 0 {
                            return Err(MemberDbError::LastAdmin);
                        }
                    }

                    let mut active: member::ActiveModel = current.into();
                    active.role = Set(role.clone());
                    active.update(txn).await?;

                    debug!(member = %identity.short(), role = ?role, "role changed");
                    Ok(())
                })
            })
            .await
            .map_err(|err| match err {
                TransactionError::Connection(db) => MemberDbError::Database(db),
                TransactionError::Transaction(inner) => inner,
            })
    }
}
