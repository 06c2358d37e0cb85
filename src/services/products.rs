use crate::{
    db::{defer_effect, run_in_transaction, run_read, DbHandle},
    entities::{
        price, product, product_category, product_image, product_material, product_option,
        product_option_value, product_shipping_option, product_tag, product_variant,
        product_variant_option, ProductStatus,
    },
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
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{info, instrument};

use super::{
    categories::CategoryService,
    materials::MaterialService,
    pricing::{PriceInput, PricingService},
    shipping_options::{ShippingOptionDetail, ShippingOptionService},
    tags::TagService,
};
use crate::entities::{category, material, shipping_option, shipping_option_price, tag};

/// The product aggregate writer.
///
/// A product and everything it owns or links to is written as one unit:
/// each operation opens (or joins) the ambient transaction, and the
/// sub-writers for options, variants, images and associations all land in
/// it, so the whole aggregate commits or rolls back together.
#[derive(Clone)]
pub struct ProductService {
    db: Arc<DatabaseConnection>,
    event_sender: Arc<EventSender>,
    pricing: PricingService,
    tags: TagService,
    materials: MaterialService,
    categories: CategoryService,
    shipping_options: ShippingOptionService,
}

impl ProductService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Arc<EventSender>) -> Self {
        Self {
            pricing: PricingService::new(db.clone()),
            tags: TagService::new(db.clone(), event_sender.clone()),
            materials: MaterialService::new(db.clone(), event_sender.clone()),
            categories: CategoryService::new(db.clone(), event_sender.clone()),
            shipping_options: ShippingOptionService::new(db.clone(), event_sender.clone()),
            db,
            event_sender,
        }
    }

    /// Creates a product together with its options, variants, images and
    /// associations. Returns the new product's id.
    ///
    /// Either every row across every collection becomes visible, or none:
    /// any failing sub-write rolls back the whole aggregate.
    #[instrument(skip(self, input), fields(title = %input.title))]
    pub async fn create(&self, input: CreateProductInput) -> Result<i32, ServiceError> {
        validate_write(
            input.slug.as_deref(),
            input.variants.as_deref(),
            input.options.as_deref(),
        )?;

        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let slug = match &input.slug {
                Some(slug) => slug.clone(),
                None => slugify(&input.title),
            };
            self.ensure_unique_slug(&conn, &slug, None).await?;

            let inserted = product::Entity::insert(product::ActiveModel {
                status: Set(input.status.unwrap_or(ProductStatus::Draft)),
                title: Set(input.title),
                subtitle: Set(input.subtitle),
                description: Set(input.description),
                slug: Set(slug),
                weight: Set(input.weight),
                width: Set(input.width),
                height: Set(input.height),
                depth: Set(input.depth),
                attributes: Set(input.metadata),
                origin_country: Set(input.origin_country),
                created_at: Set(Utc::now()),
                ..Default::default()
            })
            .exec(&conn)
            .await?;
            let product_id = inserted.last_insert_id;

            // Options first: variant selections resolve against the values
            // created here.
            let resolution = self
                .insert_options(&conn, product_id, input.options.as_deref().unwrap_or(&[]))
                .await?;

            futures::try_join!(
                self.link_categories(
                    &conn,
                    product_id,
                    input.categories.as_deref().unwrap_or(&[])
                ),
                self.link_tags(&conn, product_id, input.tags.as_deref().unwrap_or(&[])),
                self.link_materials(&conn, product_id, input.materials.as_deref().unwrap_or(&[])),
                self.insert_images(&conn, product_id, input.images.as_deref().unwrap_or(&[])),
                self.insert_variants(
                    &conn,
                    product_id,
                    input.variants.as_deref().unwrap_or(&[]),
                    &resolution,
                ),
            )?;

            self.link_shipping_options(
                &conn,
                product_id,
                input.shipping_options.as_deref().unwrap_or(&[]),
            )
            .await?;

            let sender = self.event_sender.clone();
            defer_effect(async move { sender.send_or_log(Event::ProductCreated(product_id)).await })
                .await;

            info!(product_id, "Product created");
            Ok(product_id)
        })
        .await
    }

    /// Applies a partial update to a product.
    ///
    /// Scalar fields are patched; supplied options are added; supplied
    /// variant and image sets replace the previous ones wholesale; supplied
    /// tag/material/category/shipping-option links are only ever added.
    #[instrument(skip(self, input))]
    pub async fn update(
        &self,
        product_id: i32,
        input: UpdateProductInput,
    ) -> Result<(), ServiceError> {
        validate_write(
            input.slug.as_deref(),
            input.variants.as_deref(),
            input.options.as_deref(),
        )?;

        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let existing = product::Entity::find()
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::DeletedAt.is_null())
                .one(&conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product with ID {} not found", product_id))
                })?;

            let mut active: product::ActiveModel = existing.into();
            if let Some(title) = input.title {
                active.title = Set(title);
            }
            if let Some(subtitle) = input.subtitle {
                active.subtitle = Set(Some(subtitle));
            }
            if let Some(description) = input.description {
                active.description = Set(Some(description));
            }
            if let Some(slug) = input.slug {
                self.ensure_unique_slug(&conn, &slug, Some(product_id))
                    .await?;
                active.slug = Set(slug);
            }
            if let Some(status) = input.status {
                active.status = Set(status);
            }
            if let Some(weight) = input.weight {
                active.weight = Set(Some(weight));
            }
            if let Some(width) = input.width {
                active.width = Set(Some(width));
            }
            if let Some(height) = input.height {
                active.height = Set(Some(height));
            }
            if let Some(depth) = input.depth {
                active.depth = Set(Some(depth));
            }
            if let Some(metadata) = input.metadata {
                active.attributes = Set(Some(metadata));
            }
            if let Some(origin_country) = input.origin_country {
                active.origin_country = Set(Some(origin_country));
            }
            active.updated_at = Set(Some(Utc::now()));
            active.update(&conn).await?;

            // New options are added, not merged with the existing set; a
            // supplied variant set resolves only against options supplied
            // in this same call.
            let resolution = self
                .insert_options(&conn, product_id, input.options.as_deref().unwrap_or(&[]))
                .await?;

            if let Some(variants) = &input.variants {
                product_variant::Entity::delete_many()
                    .filter(product_variant::Column::ProductId.eq(product_id))
                    .exec(&conn)
                    .await?;
                self.insert_variants(&conn, product_id, variants, &resolution)
                    .await?;
            }

            if let Some(images) = &input.images {
                product_image::Entity::delete_many()
                    .filter(product_image::Column::ProductId.eq(product_id))
                    .exec(&conn)
                    .await?;
                self.insert_images(&conn, product_id, images).await?;
            }

            if let Some(categories) = &input.categories {
                self.link_categories(&conn, product_id, categories).await?;
            }
            if let Some(tags) = &input.tags {
                self.link_tags(&conn, product_id, tags).await?;
            }
            if let Some(materials) = &input.materials {
                self.link_materials(&conn, product_id, materials).await?;
            }
            if let Some(shipping_options) = &input.shipping_options {
                self.link_shipping_options(&conn, product_id, shipping_options)
                    .await?;
            }

            let sender = self.event_sender.clone();
            defer_effect(async move { sender.send_or_log(Event::ProductUpdated(product_id)).await })
                .await;

            info!(product_id, "Product updated");
            Ok(())
        })
        .await
    }

    /// Returns a non-deleted product with its full owned graph.
    #[instrument(skip(self))]
    pub async fn get(&self, product_id: i32) -> Result<ProductDetail, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            let found = product::Entity::find()
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::DeletedAt.is_null())
                .one(&conn)
                .await?
                .ok_or_else(|| {
                    ServiceError::NotFound(format!("Product with ID {} not found", product_id))
                })?;

            let mut details = self.load_graph(&conn, vec![found]).await?;
            details.pop().ok_or_else(|| {
                ServiceError::InternalError("product graph assembly returned no row".into())
            })
        })
        .await
    }

    /// Returns every non-deleted product with its full owned graph.
    #[instrument(skip(self))]
    pub async fn list(&self) -> Result<Vec<ProductDetail>, ServiceError> {
        run_read(&self.db, |conn: DbHandle| async move {
            let products = product::Entity::find()
                .filter(product::Column::DeletedAt.is_null())
                .order_by_asc(product::Column::Id)
                .all(&conn)
                .await?;

            self.load_graph(&conn, products).await
        })
        .await
    }

    /// Soft-deletes a product. Owned rows are left in place; they become
    /// unreachable through the non-deleted-parent join.
    #[instrument(skip(self))]
    pub async fn delete(&self, product_id: i32) -> Result<(), ServiceError> {
        run_in_transaction(&self.db, |conn: DbHandle| async move {
            let result = product::Entity::update_many()
                .col_expr(product::Column::DeletedAt, Expr::value(Utc::now()))
                .filter(product::Column::Id.eq(product_id))
                .filter(product::Column::DeletedAt.is_null())
                .exec(&conn)
                .await?;
            if result.rows_affected == 0 {
                return Err(ServiceError::NotFound(format!(
                    "Product with ID {} not found",
                    product_id
                )));
            }

            let sender = self.event_sender.clone();
            defer_effect(async move { sender.send_or_log(Event::ProductDeleted(product_id)).await })
                .await;

            info!(product_id, "Product deleted");
            Ok(())
        })
        .await
    }

    async fn ensure_unique_slug(
        &self,
        conn: &DbHandle,
        slug: &str,
        exclude_id: Option<i32>,
    ) -> Result<(), ServiceError> {
        let mut query = product::Entity::find()
            .filter(product::Column::Slug.eq(slug))
            .filter(product::Column::DeletedAt.is_null());
        if let Some(id) = exclude_id {
            query = query.filter(product::Column::Id.ne(id));
        }

        if query.one(conn).await?.is_some() {
            return Err(ServiceError::InvalidInput(format!(
                "Slug {} already exists",
                slug
            )));
        }
        Ok(())
    }

    /// Inserts options and their values, recording every created value in
    /// the resolution table the variant writer resolves selections against.
    async fn insert_options(
        &self,
        conn: &DbHandle,
        product_id: i32,
        options: &[ProductOptionInput],
    ) -> Result<OptionResolution, ServiceError> {
        let mut resolution = OptionResolution::default();

        for option in options {
            let inserted = product_option::Entity::insert(product_option::ActiveModel {
                product_id: Set(product_id),
                name: Set(option.name.clone()),
                created_at: Set(Utc::now()),
                ..Default::default()
            })
            .exec(conn)
            .await?;
            let option_id = inserted.last_insert_id;

            for value in &option.values {
                let inserted =
                    product_option_value::Entity::insert(product_option_value::ActiveModel {
                        product_option_id: Set(option_id),
                        value: Set(value.clone()),
                        ..Default::default()
                    })
                    .exec(conn)
                    .await?;
                resolution.record(&option.name, inserted.last_insert_id, value);
            }
        }

        Ok(resolution)
    }

    /// Inserts variants, resolving each selection against the options
    /// created in this operation, and hands prices to the pricing
    /// sub-service (which joins the ambient transaction).
    async fn insert_variants(
        &self,
        conn: &DbHandle,
        product_id: i32,
        variants: &[ProductVariantInput],
        resolution: &OptionResolution,
    ) -> Result<(), ServiceError> {
        for variant in variants {
            let now = Utc::now();
            let inserted = product_variant::Entity::insert(product_variant::ActiveModel {
                product_id: Set(product_id),
                title: Set(variant.title.clone()),
                description: Set(variant.description.clone()),
                sku: Set(variant.sku.clone()),
                quantity: Set(variant.quantity.unwrap_or(0)),
                manage_stock: Set(variant.manage_stock.unwrap_or(true)),
                attributes: Set(variant.attributes.clone()),
                created_at: Set(now),
                ..Default::default()
            })
            .exec(conn)
            .await?;
            let variant_id = inserted.last_insert_id;

            let mut links = Vec::with_capacity(variant.options.len());
            for (option_name, value) in &variant.options {
                let value_id = resolution.resolve(option_name, value)?;
                links.push(product_variant_option::ActiveModel {
                    product_id: Set(product_id),
                    product_variant_id: Set(variant_id),
                    product_option_value_id: Set(value_id),
                    created_at: Set(now),
                    ..Default::default()
                });
            }
            if !links.is_empty() {
                product_variant_option::Entity::insert_many(links)
                    .exec(conn)
                    .await?;
            }

            if let Some(prices) = &variant.prices {
                let inputs: Vec<PriceInput> = prices
                    .iter()
                    .map(|price| PriceInput {
                        variant_id,
                        amount: price.amount,
                        currency: price.currency.clone(),
                        rules: price.rules.clone(),
                        kind: price.kind,
                    })
                    .collect();
                self.pricing.create(inputs).await?;
            }
        }

        Ok(())
    }

    async fn insert_images(
        &self,
        conn: &DbHandle,
        product_id: i32,
        images: &[String],
    ) -> Result<(), ServiceError> {
        if images.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let rows: Vec<product_image::ActiveModel> = images
            .iter()
            .enumerate()
            .map(|(rank, url)| product_image::ActiveModel {
                product_id: Set(product_id),
                image_url: Set(url.clone()),
                rank: Set(rank as i32),
                created_at: Set(now),
                ..Default::default()
            })
            .collect();

        product_image::Entity::insert_many(rows).exec(conn).await?;
        Ok(())
    }

    async fn link_tags(
        &self,
        conn: &DbHandle,
        product_id: i32,
        tag_ids: &[i32],
    ) -> Result<(), ServiceError> {
        if tag_ids.is_empty() {
            return Ok(());
        }
        self.tags.ensure_exist(conn, tag_ids).await?;

        let existing: HashSet<i32> = product_tag::Entity::find()
            .filter(product_tag::Column::ProductId.eq(product_id))
            .all(conn)
            .await?
            .into_iter()
            .map(|link| link.tag_id)
            .collect();

        let rows: Vec<product_tag::ActiveModel> = tag_ids
            .iter()
            .filter(|id| !existing.contains(id))
            .map(|&tag_id| product_tag::ActiveModel {
                product_id: Set(product_id),
                tag_id: Set(tag_id),
            })
            .collect();
        if !rows.is_empty() {
            product_tag::Entity::insert_many(rows).exec(conn).await?;
        }
        Ok(())
    }

    async fn link_materials(
        &self,
        conn: &DbHandle,
        product_id: i32,
        material_ids: &[i32],
    ) -> Result<(), ServiceError> {
        if material_ids.is_empty() {
            return Ok(());
        }
        self.materials.ensure_exist(conn, material_ids).await?;

        let existing: HashSet<i32> = product_material::Entity::find()
            .filter(product_material::Column::ProductId.eq(product_id))
            .all(conn)
            .await?
            .into_iter()
            .map(|link| link.material_id)
            .collect();

        let rows: Vec<product_material::ActiveModel> = material_ids
            .iter()
            .filter(|id| !existing.contains(id))
            .map(|&material_id| product_material::ActiveModel {
                product_id: Set(product_id),
                material_id: Set(material_id),
            })
            .collect();
        if !rows.is_empty() {
            product_material::Entity::insert_many(rows)
                .exec(conn)
                .await?;
        }
        Ok(())
    }

    async fn link_categories(
        &self,
        conn: &DbHandle,
        product_id: i32,
        category_ids: &[i32],
    ) -> Result<(), ServiceError> {
        if category_ids.is_empty() {
            return Ok(());
        }
        self.categories.ensure_exist(conn, category_ids).await?;

        let existing: HashSet<i32> = product_category::Entity::find()
            .filter(product_category::Column::ProductId.eq(product_id))
            .all(conn)
            .await?
            .into_iter()
            .map(|link| link.category_id)
            .collect();

        let rows: Vec<product_category::ActiveModel> = category_ids
            .iter()
            .filter(|id| !existing.contains(id))
            .map(|&category_id| product_category::ActiveModel {
                product_id: Set(product_id),
                category_id: Set(category_id),
            })
            .collect();
        if !rows.is_empty() {
            product_category::Entity::insert_many(rows)
                .exec(conn)
                .await?;
        }
        Ok(())
    }

    async fn link_shipping_options(
        &self,
        conn: &DbHandle,
        product_id: i32,
        shipping_option_ids: &[i32],
    ) -> Result<(), ServiceError> {
        if shipping_option_ids.is_empty() {
            return Ok(());
        }
        self.shipping_options
            .ensure_exist(conn, shipping_option_ids)
            .await?;

        let existing: HashSet<i32> = product_shipping_option::Entity::find()
            .filter(product_shipping_option::Column::ProductId.eq(product_id))
            .all(conn)
            .await?
            .into_iter()
            .map(|link| link.shipping_option_id)
            .collect();

        let rows: Vec<product_shipping_option::ActiveModel> = shipping_option_ids
            .iter()
            .filter(|id| !existing.contains(id))
            .map(|&shipping_option_id| product_shipping_option::ActiveModel {
                product_id: Set(product_id),
                shipping_option_id: Set(shipping_option_id),
            })
            .collect();
        if !rows.is_empty() {
            product_shipping_option::Entity::insert_many(rows)
                .exec(conn)
                .await?;
        }
        Ok(())
    }

    /// Batch-loads the owned graph for a set of root rows.
    async fn load_graph(
        &self,
        conn: &DbHandle,
        products: Vec<product::Model>,
    ) -> Result<Vec<ProductDetail>, ServiceError> {
        if products.is_empty() {
            return Ok(Vec::new());
        }
        let product_ids: Vec<i32> = products.iter().map(|p| p.id).collect();

        let options = product_option::Entity::find()
            .filter(product_option::Column::ProductId.is_in(product_ids.clone()))
            .order_by_asc(product_option::Column::Id)
            .all(conn)
            .await?;
        let option_ids: Vec<i32> = options.iter().map(|o| o.id).collect();
        let values = product_option_value::Entity::find()
            .filter(product_option_value::Column::ProductOptionId.is_in(option_ids))
            .order_by_asc(product_option_value::Column::Id)
            .all(conn)
            .await?;

        let variants = product_variant::Entity::find()
            .filter(product_variant::Column::ProductId.is_in(product_ids.clone()))
            .order_by_asc(product_variant::Column::Id)
            .all(conn)
            .await?;
        let variant_ids: Vec<i32> = variants.iter().map(|v| v.id).collect();
        let variant_links = product_variant_option::Entity::find()
            .filter(product_variant_option::Column::ProductVariantId.is_in(variant_ids.clone()))
            .all(conn)
            .await?;
        let prices = price::Entity::find()
            .filter(price::Column::VariantId.is_in(variant_ids))
            .order_by_asc(price::Column::Id)
            .all(conn)
            .await?;

        let images = product_image::Entity::find()
            .filter(product_image::Column::ProductId.is_in(product_ids.clone()))
            .order_by_asc(product_image::Column::Rank)
            .all(conn)
            .await?;

        let tag_links = product_tag::Entity::find()
            .filter(product_tag::Column::ProductId.is_in(product_ids.clone()))
            .all(conn)
            .await?;
        let tag_map: HashMap<i32, tag::Model> = tag::Entity::find()
            .filter(tag::Column::Id.is_in(tag_links.iter().map(|l| l.tag_id).collect::<Vec<_>>()))
            .filter(tag::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|t| (t.id, t))
            .collect();

        let material_links = product_material::Entity::find()
            .filter(product_material::Column::ProductId.is_in(product_ids.clone()))
            .all(conn)
            .await?;
        let material_map: HashMap<i32, material::Model> = material::Entity::find()
            .filter(
                material::Column::Id
                    .is_in(material_links.iter().map(|l| l.material_id).collect::<Vec<_>>()),
            )
            .filter(material::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|m| (m.id, m))
            .collect();

        let category_links = product_category::Entity::find()
            .filter(product_category::Column::ProductId.is_in(product_ids.clone()))
            .all(conn)
            .await?;
        let category_map: HashMap<i32, category::Model> = category::Entity::find()
            .filter(
                category::Column::Id
                    .is_in(category_links.iter().map(|l| l.category_id).collect::<Vec<_>>()),
            )
            .filter(category::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|c| (c.id, c))
            .collect();

        let shipping_links = product_shipping_option::Entity::find()
            .filter(product_shipping_option::Column::ProductId.is_in(product_ids))
            .all(conn)
            .await?;
        let shipping_option_ids: Vec<i32> =
            shipping_links.iter().map(|l| l.shipping_option_id).collect();
        let shipping_map: HashMap<i32, shipping_option::Model> = shipping_option::Entity::find()
            .filter(shipping_option::Column::Id.is_in(shipping_option_ids.clone()))
            .filter(shipping_option::Column::DeletedAt.is_null())
            .all(conn)
            .await?
            .into_iter()
            .map(|s| (s.id, s))
            .collect();
        let mut shipping_prices_by_option: HashMap<i32, Vec<shipping_option_price::Model>> =
            HashMap::new();
        for shipping_price in shipping_option_price::Entity::find()
            .filter(shipping_option_price::Column::ShippingOptionId.is_in(shipping_option_ids))
            .order_by_asc(shipping_option_price::Column::Id)
            .all(conn)
            .await?
        {
            shipping_prices_by_option
                .entry(shipping_price.shipping_option_id)
                .or_default()
                .push(shipping_price);
        }

        // Indexes for resolving variant selections back to names/values.
        let option_name_index: HashMap<i32, String> =
            options.iter().map(|o| (o.id, o.name.clone())).collect();
        let value_index: HashMap<i32, (i32, String)> = values
            .iter()
            .map(|v| (v.id, (v.product_option_id, v.value.clone())))
            .collect();

        let mut values_by_option: HashMap<i32, Vec<product_option_value::Model>> = HashMap::new();
        for value in values {
            values_by_option
                .entry(value.product_option_id)
                .or_default()
                .push(value);
        }
        let mut options_by_product: HashMap<i32, Vec<product_option::Model>> = HashMap::new();
        for option in options {
            options_by_product
                .entry(option.product_id)
                .or_default()
                .push(option);
        }
        let mut variants_by_product: HashMap<i32, Vec<product_variant::Model>> = HashMap::new();
        for variant in variants {
            variants_by_product
                .entry(variant.product_id)
                .or_default()
                .push(variant);
        }
        let mut value_ids_by_variant: HashMap<i32, Vec<i32>> = HashMap::new();
        for link in variant_links {
            value_ids_by_variant
                .entry(link.product_variant_id)
                .or_default()
                .push(link.product_option_value_id);
        }
        let mut prices_by_variant: HashMap<i32, Vec<price::Model>> = HashMap::new();
        for row in prices {
            prices_by_variant.entry(row.variant_id).or_default().push(row);
        }
        let mut images_by_product: HashMap<i32, Vec<product_image::Model>> = HashMap::new();
        for image in images {
            images_by_product
                .entry(image.product_id)
                .or_default()
                .push(image);
        }
        let mut tag_ids_by_product: HashMap<i32, Vec<i32>> = HashMap::new();
        for link in tag_links {
            tag_ids_by_product
                .entry(link.product_id)
                .or_default()
                .push(link.tag_id);
        }
        let mut material_ids_by_product: HashMap<i32, Vec<i32>> = HashMap::new();
        for link in material_links {
            material_ids_by_product
                .entry(link.product_id)
                .or_default()
                .push(link.material_id);
        }
        let mut category_ids_by_product: HashMap<i32, Vec<i32>> = HashMap::new();
        for link in category_links {
            category_ids_by_product
                .entry(link.product_id)
                .or_default()
                .push(link.category_id);
        }
        let mut shipping_ids_by_product: HashMap<i32, Vec<i32>> = HashMap::new();
        for link in shipping_links {
            shipping_ids_by_product
                .entry(link.product_id)
                .or_default()
                .push(link.shipping_option_id);
        }

        let mut details = Vec::with_capacity(products.len());
        for root in products {
            let product_id = root.id;

            let options = options_by_product
                .remove(&product_id)
                .unwrap_or_default()
                .into_iter()
                .map(|option| {
                    let values = values_by_option.remove(&option.id).unwrap_or_default();
                    ProductOptionDetail { option, values }
                })
                .collect();

            let variants = variants_by_product
                .remove(&product_id)
                .unwrap_or_default()
                .into_iter()
                .map(|variant| {
                    let mut selection = HashMap::new();
                    for value_id in value_ids_by_variant.remove(&variant.id).unwrap_or_default() {
                        if let Some((option_id, value)) = value_index.get(&value_id) {
                            if let Some(name) = option_name_index.get(option_id) {
                                selection.insert(name.clone(), value.clone());
                            }
                        }
                    }
                    let prices = prices_by_variant.remove(&variant.id).unwrap_or_default();
                    ProductVariantDetail {
                        variant,
                        selection,
                        prices,
                    }
                })
                .collect();

            let tags = tag_ids_by_product
                .remove(&product_id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|id| tag_map.get(&id).cloned())
                .collect();
            let materials = material_ids_by_product
                .remove(&product_id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|id| material_map.get(&id).cloned())
                .collect();
            let categories = category_ids_by_product
                .remove(&product_id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|id| category_map.get(&id).cloned())
                .collect();
            let shipping_options = shipping_ids_by_product
                .remove(&product_id)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|id| {
                    shipping_map.get(&id).map(|option| ShippingOptionDetail {
                        option: option.clone(),
                        prices: shipping_prices_by_option
                            .get(&id)
                            .cloned()
                            .unwrap_or_default(),
                    })
                })
                .collect();

            details.push(ProductDetail {
                images: images_by_product.remove(&product_id).unwrap_or_default(),
                product: root,
                options,
                variants,
                tags,
                materials,
                categories,
                shipping_options,
            });
        }

        Ok(details)
    }
}

/// Pre-write validation shared by create and update. Runs before any row
/// is touched.
fn validate_write(
    slug: Option<&str>,
    variants: Option<&[ProductVariantInput]>,
    options: Option<&[ProductOptionInput]>,
) -> Result<(), ServiceError> {
    if let Some(slug) = slug {
        if !is_valid_slug(slug) {
            return Err(ServiceError::InvalidInput(format!("Invalid slug {}", slug)));
        }
    }

    let has_variants = variants.map_or(false, |v| !v.is_empty());
    let has_options = options.map_or(false, |o| !o.is_empty());
    if has_variants && !has_options {
        return Err(ServiceError::InvalidInput(
            "Variants are not allowed without options".into(),
        ));
    }
    Ok(())
}

/// Option name -> values created in the current operation. Variant
/// selections resolve against this table, never against the store, so a
/// selection can only reference sibling inserts from the same write.
#[derive(Debug, Default)]
struct OptionResolution {
    values: HashMap<String, Vec<(i32, String)>>,
}

impl OptionResolution {
    fn record(&mut self, option_name: &str, value_id: i32, value: &str) {
        self.values
            .entry(option_name.to_string())
            .or_default()
            .push((value_id, value.to_string()));
    }

    fn resolve(&self, option_name: &str, value: &str) -> Result<i32, ServiceError> {
        let values = self.values.get(option_name).ok_or_else(|| {
            ServiceError::InvalidInput(format!("Option {} not found", option_name))
        })?;
        values
            .iter()
            .find(|(_, candidate)| candidate == value)
            .map(|(id, _)| *id)
            .ok_or_else(|| ServiceError::InvalidInput(format!("Option value {} not found", value)))
    }
}

/// Input for creating a product
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CreateProductInput {
    pub title: String,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub status: Option<ProductStatus>,
    pub weight: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub depth: Option<i32>,
    pub metadata: Option<serde_json::Value>,
    pub origin_country: Option<String>,
    pub options: Option<Vec<ProductOptionInput>>,
    pub images: Option<Vec<String>>,
    pub tags: Option<Vec<i32>>,
    pub materials: Option<Vec<i32>>,
    pub categories: Option<Vec<i32>>,
    pub variants: Option<Vec<ProductVariantInput>>,
    pub shipping_options: Option<Vec<i32>>,
}

/// Input for updating a product; absent fields are left untouched
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct UpdateProductInput {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub description: Option<String>,
    pub slug: Option<String>,
    pub status: Option<ProductStatus>,
    pub weight: Option<i32>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub depth: Option<i32>,
    pub metadata: Option<serde_json::Value>,
    pub origin_country: Option<String>,
    pub options: Option<Vec<ProductOptionInput>>,
    pub images: Option<Vec<String>>,
    pub tags: Option<Vec<i32>>,
    pub materials: Option<Vec<i32>>,
    pub categories: Option<Vec<i32>>,
    pub variants: Option<Vec<ProductVariantInput>>,
    pub shipping_options: Option<Vec<i32>>,
}

/// An option and its values, as supplied on a product write
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProductOptionInput {
    pub name: String,
    pub values: Vec<String>,
}

/// A variant as supplied on a product write; `options` maps option name to
/// the chosen value
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProductVariantInput {
    pub title: String,
    pub description: Option<String>,
    pub sku: Option<String>,
    pub quantity: Option<i32>,
    pub manage_stock: Option<bool>,
    pub attributes: Option<serde_json::Value>,
    pub options: HashMap<String, String>,
    pub prices: Option<Vec<VariantPriceInput>>,
}

/// A price attached to a variant on a product write
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VariantPriceInput {
    pub amount: i64,
    pub currency: String,
    pub rules: Option<serde_json::Value>,
    pub kind: crate::entities::PriceKind,
}

/// A product with its full owned graph
#[derive(Debug, Clone, Serialize)]
pub struct ProductDetail {
    pub product: product::Model,
    pub options: Vec<ProductOptionDetail>,
    pub variants: Vec<ProductVariantDetail>,
    pub images: Vec<product_image::Model>,
    pub tags: Vec<tag::Model>,
    pub materials: Vec<material::Model>,
    pub categories: Vec<category::Model>,
    pub shipping_options: Vec<ShippingOptionDetail>,
}

/// An option with its values
#[derive(Debug, Clone, Serialize)]
pub struct ProductOptionDetail {
    pub option: product_option::Model,
    pub values: Vec<product_option_value::Model>,
}

/// A variant with its resolved selection and prices
#[derive(Debug, Clone, Serialize)]
pub struct ProductVariantDetail {
    pub variant: product_variant::Model,
    pub selection: HashMap<String, String>,
    pub prices: Vec<price::Model>,
}
