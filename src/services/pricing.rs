use crate::{
    db::{run_in_transaction, DbHandle},
    entities::price::{self, PriceKind},
    errors::ServiceError,
};
use chrono::Utc;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Pricing sub-service. The variant writer calls [`PricingService::create`]
/// from inside an aggregate write; the boundary join keeps every price row
/// inside the caller's transaction.
#[derive(Clone)]
pub struct PricingService {
    db: Arc<DatabaseConnection>,
}

impl PricingService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    /// Inserts the given prices and returns their ids in input order.
    #[instrument(skip(self, inputs), fields(count = inputs.len()))]
    pub async fn create(&self, inputs: Vec<PriceInput>) -> Result<Vec<i32>, ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let mut ids = Vec::with_capacity(inputs.len());
            for input in inputs {
                let inserted = price::Entity::insert(price::ActiveModel {
                    variant_id: Set(input.variant_id),
                    amount: Set(input.amount),
                    currency: Set(input.currency),
                    rules: Set(input.rules),
                    kind: Set(input.kind),
                    created_at: Set(Utc::now()),
                    ..Default::default()
                })
                .exec(&conn)
                .await?;
                ids.push(inserted.last_insert_id);
            }
            Ok(ids)
        })
        .await
    }

    /// Physically removes the given prices.
    #[instrument(skip(self))]
    pub async fn delete(&self, ids: Vec<i32>) -> Result<(), ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            price::Entity::delete_many()
                .filter(price::Column::Id.is_in(ids))
                .exec(&conn)
                .await?;
            Ok(())
        })
        .await
    }
}

/// Input for creating a variant price
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PriceInput {
    pub variant_id: i32,
    pub amount: i64,
    pub currency: String,
    pub rules: Option<serde_json::Value>,
    pub kind: PriceKind,
}
