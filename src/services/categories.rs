use crate::{
    db::{defer_effect, run_in_transaction, run_read, DbHandle},
    entities::category,
    errors::ServiceError,
    events::{Event, EventSender},
    slug::{is_valid_slug, slugify},
};
use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, instrument};

/// Service for the category tree
#[derive(Clone)]
pub struct CategoryService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl CategoryService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a category. The slug defaults to a slugified form of the
    /// name and must be unique among non-deleted categories.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: CreateCategoryInput) -> Result<i32, ServiceError> {
        if let Some(slug) = input.slug.as_deref() {
            if !is_valid_slug(slug) {
                return Err(ServiceError::InvalidInput(format!("Invalid slug {}", slug)));
            }
        }

        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let slug = input.slug.unwrap_or_else(|| slugify(&input.name));
            self.ensure_unique_slug(&conn, &slug, None).await?;

            let inserted = category::Entity::insert(category::ActiveModel {
                name: Set(input.name),
                description: Set(input.description),
                slug: Set(slug),
                parent_id: Set(input.parent_id),
                created_at: Set(Utc::now()),
                ..Default::default()
            })
            .exec(&conn)
            .await?;
            let category_id = inserted.last_insert_id;

            let sender = self.event_sender.clone();
            defer_effect(
                async move { sender.send_or_log(Event::CategoryCreated(category_id)).await },
            )
            .await;

            info!(category_id, "Category created");
            Ok(category_id)
        })
        .await
    }

    /// Applies the given scalar changes to a category.
    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        category_id: i32,
        input: UpdateCategoryInput,
    ) -> Result<(), ServiceError> {
        if let Some(slug) = input.slug.as_deref() {
            if !is_valid_slug(slug) {
                return Err(ServiceError::InvalidInput(format!("Invalid slug {}", slug)));
            }
        }

        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let existing = category::Entity::find()
                .filter(category::Column::Id.eq(category_id))
                .filter(category::Column::DeletedAt.is_null())
                .one(&conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Category with ID {} not found", category_id))
                })?;

            let mut active: category::ActiveModel = existing.into();
            if let Some(name) = input.name {
                active.name = Set(name);
            }
            if let Some(description) = input.description {
                active.description = Set(Some(description));
            }
            if let Some(slug) = input.slug {
                self.ensure_unique_slug(&conn, &slug, Some(category_id))
                    .await?;
                active.slug = Set(slug);
            }
            if let Some(parent_id) = input.parent_id {
                active.parent_id = Set(Some(parent_id));
            }
            active.updated_at = Set(Some(Utc::now()));
            active.update(&conn).await?;

            let sender = self.event_sender.clone();
            defer_effect(
                async move { sender.send_or_log(Event::CategoryUpdated(category_id)).await },
            )
            .await;

            info!(category_id, "Category updated");
            Ok(())
        })
        .await
    }

    /// Returns the non-deleted category with the given id.
    #[instrument(skip(self))]
    pub async fn retrieve(&self, category_id: i32) -> Result<category::Model, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            category::Entity::find()
                .filter(category::Column::Id.eq(category_id))
                .filter(category::Column::DeletedAt.is_null())
                .one(&conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Category with ID {} not found", category_id))
                })
        })
        .await
    }

    /// Lists all non-deleted categories.
    pub async fn list(&self) -> Result<Vec<category::Model>, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            category::Entity::find()
                .filter(category::Column::DeletedAt.is_null())
                .order_by_asc(category::Column::Id)
                .all(&conn)
                .await
                .map_err(Into::into)
        })
        .await
    }

    /// Soft-deletes a category.
    #[instrument(skip(self))]
    pub async fn remove(&self, category_id: i32) -> Result<(), ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let result = category::Entity::update_many()
                .col_expr(category::Column::DeletedAt, Expr::value(Utc::now()))
                .filter(category::Column::Id.eq(category_id))
                .filter(category::Column::DeletedAt.is_null())
                .exec(&conn)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Category with ID {} not found",
                    category_id
                )));
            }

            let sender = self.event_sender.clone();
            defer_effect(
                async move { sender.send_or_log(Event::CategoryDeleted(category_id)).await },
            )
            .await;

            info!(category_id, "Category deleted");
            Ok(())
        })
        .await
    }

    /// Fails with the first requested id that does not exist as a
    /// non-deleted category.
    pub(crate) async fn ensure_exist(
        &self,
        conn: &DbHandle,
        category_ids: &[i32],
    ) -> Result<(), ServiceError> {
        if category_ids.is_empty() {
            return Ok(());
        }

        let found: HashSet<i32> = category::Entity::find()
            .filter(category::Column::Id.is_in(category_ids.to_vec()))
            .filter(category::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();

        if let Some(missing) = category_ids.iter().find(|id| !found.contains(id)) {
            return Err(ServiceError::InvalidInput(format!(
                "Category with ID {} does not exist",
                missing
            )));
        }
        Ok(())
    }

    async fn ensure_unique_slug(
        &self,
        conn: &DbHandle,
        slug: &str,
        exclude_id: Option<i32>,
    ) -> Result<(), ServiceError> {
        let mut query = category::Entity::find()
            .filter(category::Column::Slug.eq(slug))
            .filter(category::Column::DeletedAt.is_null());
        if let Some(id) = exclude_id {
            query = query.filter(category::Column::Id.ne(id));
        }

        if query.one(conn).await?.is_some() {
            return Err(ServiceError::InvalidInput(format!(
                "Slug {} already exists",
                slug
            )));
        }
        Ok(())
    }
}

/// Input for creating a category
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateCategoryInput {
    pub name: String,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub parent_id: Option<i32>,
}

/// Input for updating a category
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateCategoryInput {
    pub name: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub parent_id: Option<i32>,
}
