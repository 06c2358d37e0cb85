use crate::{
    db::{defer_effect, run_in_transaction, run_read, DbHandle},
    entities::tag,
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// Service for the tag lookup entity
#[derive(Clone)]
pub struct TagService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl TagService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a tag; the value must be unique among non-deleted tags.
    #[instrument(skip(self))]
    pub async fn create(&self, value: String) -> Result<i32, ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let existing = tag::Entity::find()
                .filter(tag::Column::Value.eq(value.as_str()))
                .filter(tag::Column::DeletedAt.is_null())
                .one(&conn)
                .await?;
            if existing.is_some() {
                return Err(ServiceError::InvalidInput(format!(
                    "Tag {} already exists",
                    value
                )));
            }

            let inserted = tag::Entity::insert(tag::ActiveModel {
                value: Set(value),
                created_at: Set(Utc::now()),
                ..Default::default()
            })
            .exec(&conn)
            .await?;
            let tag_id = inserted.last_insert_id;

            let sender = self.event_sender.clone();
            defer_effect(async move { sender.send_or_log(Event::TagCreated(tag_id)).await }).await;

            info!(tag_id, "Tag created");
            Ok(tag_id)
        })
        .await
    }

    /// Returns the non-deleted tag with the given id.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, tag_id: i32) -> Result<tag::Model, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            tag::Entity::find()
                .filter(tag::Column::Id.eq(tag_id))
                .filter(tag::Column::DeletedAt.is_null())
                .one(&conn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("Tag with ID {} not found", tag_id)))
        })
        .await
    }

    /// Lists all non-deleted tags.
    pub async fn list(&self) -> Result<Vec<tag::Model>, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            tag::Entity::find()
                .filter(tag::Column::DeletedAt.is_null())
                .order_by_asc(tag::Column::Id)
                .all(&conn)
                .await
                .map_err(Into::into)
        })
        .await
    }

    /// Soft-deletes a tag.
    #[instrument(skip(self))]
    pub async fn remove(&self, tag_id: i32) -> Result<(), ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let result = tag::Entity::update_many()
                .col_expr(tag::Column::DeletedAt, Expr::value(Utc::now()))
                .filter(tag::Column::Id.eq(tag_id))
                .filter(tag::Column::DeletedAt.is_null())
                .exec(&conn)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Tag with ID {} not found",
                    tag_id
                )));
            }

            let sender = self.event_sender.clone();
            defer_effect(async move { sender.send_or_log(Event::TagDeleted(tag_id)).await }).await;

            info!(tag_id, "Tag deleted");
            Ok(())
        })
        .await
    }

    /// Fails with the first requested id that does not exist as a
    /// non-deleted tag. The FK constraint at link-insert time remains the
    /// integrity backstop for concurrent deletions.
    pub(crate) async fn ensure_exist(
        &self,
        conn: &DbHandle,
        tag_ids: &[i32],
    ) -> Result<(), ServiceError> {
        if tag_ids.is_empty() {
            return Ok(());
        }

        let found: HashSet<i32> = tag::Entity::find()
            .filter(tag::Column::Id.is_in(tag_ids.to_vec()))
            .filter(tag::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|t| t.id)
            .collect();

        if let Some(missing) = tag_ids.iter().find(|id| !found.contains(id)) {
            return Err(ServiceError::InvalidInput(format!(
                "Tag with ID {} does not exist",
                missing
            )));
        }
        Ok(())
    }
}
