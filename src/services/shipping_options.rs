use crate::{
    db::{defer_effect, run_in_transaction, run_read, DbHandle},
    entities::{shipping_option, shipping_option_price},
    errors::ServiceError,
    events::{Event, EventSender},
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

/// Service for shipping options and their owned prices
#[derive(Clone)]
pub struct ShippingOptionService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
}

impl ShippingOptionService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Creates a shipping option together with its prices.
    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create(&self, input: CreateShippingOptionInput) -> Result<i32, ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let inserted = shipping_option::Entity::insert(shipping_option::ActiveModel {
                name: Set(input.name),
                is_shipping_profile: Set(input.is_shipping_profile),
                postal_code: Set(input.postal_code),
                country_code: Set(input.country_code),
                created_at: Set(Utc::now()),
                ..Default::default()
            })
            .exec(&conn)
            .await?;
            let shipping_option_id = inserted.last_insert_id;

            insert_prices(&conn, shipping_option_id, &input.prices).await?;

            let sender = self.event_sender.clone();
            defer_effect(async move {
                sender
                    .send_or_log(Event::ShippingOptionCreated(shipping_option_id))
                    .await
            })
            .await;

            info!(shipping_option_id, "Shipping option created");
            Ok(shipping_option_id)
        })
        .await
    }

    /// Returns the non-deleted shipping option with its prices.
    #[instrument(skip(self))]
    pub async fn retrieve(
        &self,
        shipping_option_id: i32,
    ) -> Result<ShippingOptionDetail, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            let option = shipping_option::Entity::find()
                .filter(shipping_option::Column::Id.eq(shipping_option_id))
                .filter(shipping_option::Column::DeletedAt.is_null())
                .one(&conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Shipping option with ID {} not found",
                        shipping_option_id
                    ))
                })?;

            let prices = shipping_option_price::Entity::find()
                .filter(shipping_option_price::Column::ShippingOptionId.eq(shipping_option_id))
                .order_by_asc(shipping_option_price::Column::Id)
                .all(&conn)
                .await?;

            Ok(ShippingOptionDetail { option, prices })
        })
        .await
    }

    /// Lists all non-deleted shipping options.
    pub async fn list(&self) -> Result<Vec<shipping_option::Model>, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            shipping_option::Entity::find()
                .filter(shipping_option::Column::DeletedAt.is_null())
                .order_by_asc(shipping_option::Column::Id)
                .all(&conn)
                .await
                .map_err(Into::into)
        })
        .await
    }

    /// Applies scalar changes; a supplied price set replaces the previous
    /// one wholesale.
    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        shipping_option_id: i32,
        input: UpdateShippingOptionInput,
    ) -> Result<(), ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let existing = shipping_option::Entity::find()
                .filter(shipping_option::Column::Id.eq(shipping_option_id))
                .filter(shipping_option::Column::DeletedAt.is_null())
                .one(&conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "Shipping option with ID {} not found",
                        shipping_option_id
                    ))
                })?;

            let mut active: shipping_option::ActiveModel = existing.into();
            if let Some(name) = input.name {
                active.name = Set(name);
            }
            if let Some(is_shipping_profile) = input.is_shipping_profile {
                active.is_shipping_profile = Set(is_shipping_profile);
            }
            if let Some(postal_code) = input.postal_code {
                active.postal_code = Set(Some(postal_code));
            }
            if let Some(country_code) = input.country_code {
                active.country_code = Set(Some(country_code));
            }
            active.updated_at = Set(Some(Utc::now()));
            active.update(&conn).await?;

            if let Some(prices) = &input.prices {
                shipping_option_price::Entity::delete_many()
                    .filter(
                        shipping_option_price::Column::ShippingOptionId.eq(shipping_option_id),
                    )
                    .exec(&conn)
                    .await?;
                insert_prices(&conn, shipping_option_id, prices).await?;
            }

            let sender = self.event_sender.clone();
            defer_effect(async move {
                sender
                    .send_or_log(Event::ShippingOptionUpdated(shipping_option_id))
                    .await
            })
            .await;

            info!(shipping_option_id, "Shipping option updated");
            Ok(())
        })
        .await
    }

    /// Soft-deletes a shipping option.
    #[instrument(skip(self))]
    pub async fn remove(&self, shipping_option_id: i32) -> Result<(), ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let result = shipping_option::Entity::update_many()
                .col_expr(shipping_option::Column::DeletedAt, Expr::value(Utc::now()))
                .filter(shipping_option::Column::Id.eq(shipping_option_id))
                .filter(shipping_option::Column::DeletedAt.is_null())
                .exec(&conn)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Shipping option with ID {} not found",
                    shipping_option_id
                )));
            }

            let sender = self.event_sender.clone();
            defer_effect(async move {
                sender
                    .send_or_log(Event::ShippingOptionDeleted(shipping_option_id))
                    .await
            })
            .await;

            info!(shipping_option_id, "Shipping option deleted");
            Ok(())
        })
        .await
    }

    /// Fails with the first requested id that does not exist as a
    /// non-deleted shipping option.
    pub(crate) async fn ensure_exist(
        &self,
        conn: &DbHandle,
        shipping_option_ids: &[i32],
    ) -> Result<(), ServiceError> {
        if shipping_option_ids.is_empty() {
            return Ok(());
        }

        let found: HashSet<i32> = shipping_option::Entity::find()
            .filter(shipping_option::Column::Id.is_in(shipping_option_ids.to_vec()))
            .filter(shipping_option::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();

        if let Some(missing) = shipping_option_ids.iter().find(|id| !found.contains(id)) {
            return Err(ServiceError::InvalidInput(format!(
                "Shipping option with ID {} does not exist",
                missing
            )));
        }
        Ok(())
    }
}

async fn insert_prices(
    conn: &DbHandle,
    shipping_option_id: i32,
    prices: &[ShippingOptionPriceInput],
) -> Result<(), ServiceError> {
    if prices.is_empty() {
        return Ok(());
    }

    let now = Utc::now();
    let rows: Vec<shipping_option_price::ActiveModel> = prices
        .iter()
        .map(|price| shipping_option_price::ActiveModel {
            shipping_option_id: Set(shipping_option_id),
            amount: Set(price.amount),
            currency: Set(price.currency.clone()),
            rules: Set(price.rules.clone()),
            created_at: Set(now),
            ..Default::default()
        })
        .collect();

    shipping_option_price::Entity::insert_many(rows)
        .exec(conn)
        .await?;
    Ok(())
}

/// Input for creating a shipping option
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateShippingOptionInput {
    pub name: String,
    pub is_shipping_profile: bool,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub prices: Vec<ShippingOptionPriceInput>,
}

/// Input for updating a shipping option
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateShippingOptionInput {
    pub name: Option<String>,
    pub is_shipping_profile: Option<bool>,
    pub postal_code: Option<String>,
    pub country_code: Option<String>,
    pub prices: Option<Vec<ShippingOptionPriceInput>>,
}

/// Price attached to a shipping option
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShippingOptionPriceInput {
    pub amount: i64,
    pub currency: String,
    pub rules: Option<serde_json::Value>,
}

/// Shipping option with its owned prices
#[derive(Debug, Clone, Serialize)]
pub struct ShippingOptionDetail {
    pub option: shipping_option::Model,
    pub prices: Vec<shipping_option_price::Model>,
}
