use crate::{
    db::{defer_effect, run_in_transaction, run_read, DbHandle},
    entities::material,
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

/// Service for the material lookup entity
#[derive(Clone)]
pub struct MaterialService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl MaterialService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a material; the value must be unique among non-deleted rows.
    #[instrument(skip(self))]
    pub async fn create(&self, value: String) -> Result<i32, ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let existing = material::Entity::find()
                .filter(material::Column::Value.eq(value.as_str()))
                .filter(material::Column::DeletedAt.is_null())
                .one(&conn)
                .await?;
            if existing.is_some() {
                return Err(ServiceError::InvalidInput(format!(
                    "Material {} already exists",
                    value
                )));
            }

            let inserted = material::Entity::insert(material::ActiveModel {
                value: Set(value),
                created_at: Set(Utc::now()),
                ..Default::default()
            })
            .exec(&conn)
            .await?;
            let material_id = inserted.last_insert_id;

            let sender = self.event_sender.clone();
            defer_effect(
                async move { sender.send_or_log(Event::MaterialCreated(material_id)).await },
            )
            .await;

            info!(material_id, "Material created");
            Ok(material_id)
        })
        .await
    }

    /// Returns the non-deleted material with the given id.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, material_id: i32) -> Result<material::Model, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            material::Entity::find()
                .filter(material::Column::Id.eq(material_id))
                .filter(material::Column::DeletedAt.is_null())
                .one(&conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Material with ID {} not found", material_id))
                })
        })
        .await
    }

    /// Lists all non-deleted materials.
    pub async fn list(&self) -> Result<Vec<material::Model>, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            material::Entity::find()
                .filter(material::Column::DeletedAt.is_null())
                .order_by_asc(material::Column::Id)
                .all(&conn)
                .await
                .map_err(Into::into)
        })
        .await
    }

    /// Soft-deletes a material.
    #[instrument(skip(self))]
    pub async fn remove(&self, material_id: i32) -> Result<(), ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let result = material::Entity::update_many()
                .col_expr(material::Column::DeletedAt, Expr::value(Utc::now()))
                .filter(material::Column::Id.eq(material_id))
                .filter(material::Column::DeletedAt.is_null())
                .exec(&conn)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Material with ID {} not found",
                    material_id
                )));
            }

            let sender = self.event_sender.clone();
            defer_effect(
                async move { sender.send_or_log(Event::MaterialDeleted(material_id)).await },
            )
            .await;

            info!(material_id, "Material deleted");
            Ok(())
        })
        .await
    }

    /// Fails with the first requested id that does not exist as a
    /// non-deleted material.
    pub(crate) async fn ensure_exist(
        &self,
        conn: &DbHandle,
        material_ids: &[i32],
    ) -> Result<(), ServiceError> {
        if material_ids.is_empty() {
            return Ok(());
        }

        let found: HashSet<i32> = material::Entity::find()
            .filter(material::Column::Id.is_in(material_ids.to_vec()))
            .filter(material::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|m| m.id)
            .collect();

        if let Some(missing) = material_ids.iter().find(|id| !found.contains(id)) {
            return Err(ServiceError::InvalidInput(format!(
                "Material with ID {} does not exist",
                missing
            )));
        }
        Ok(())
    }
}
