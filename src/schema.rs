//! Materializes the fixed table set from the entity definitions.
//!
//! The relational schema is owned by the deployment's migration pipeline;
//! this module exists for embedded sqlite setups and the test harness,
//! where the entities themselves are the source of truth.

use sea_orm::{ConnectionTrait, DbErr, Schema};
use tracing::info;

use crate::entities::{
    category, material, price, product, product_category, product_image, product_material,
    product_option, product_option_value, product_shipping_option, product_tag, product_variant,
    product_variant_option, shipping_option, shipping_option_price, tag,
};

/// Partial unique indexes: uniqueness only holds among non-deleted rows,
/// so a soft-deleted slug/value can be reused.
const UNIQUE_INDEXES: [&str; 4] = [
    "CREATE UNIQUE INDEX IF NOT EXISTS products_slug_unique_active ON products (slug) WHERE deleted_at IS NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS tags_value_unique_active ON tags (value) WHERE deleted_at IS NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS materials_value_unique_active ON materials (value) WHERE deleted_at IS NULL",
    "CREATE UNIQUE INDEX IF NOT EXISTS categories_slug_unique_active ON categories (slug) WHERE deleted_at IS NULL",
];

/// Creates every catalog table (and the partial unique indexes) if it does
/// not exist yet. Tables are created in foreign-key dependency order.
pub async fn setup_schema<C>(db: &C) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let mut statements = vec![
        schema.create_table_from_entity(tag::Entity),
        schema.create_table_from_entity(material::Entity),
        schema.create_table_from_entity(category::Entity),
        schema.create_table_from_entity(shipping_option::Entity),
        schema.create_table_from_entity(product::Entity),
        schema.create_table_from_entity(product_option::Entity),
        schema.create_table_from_entity(product_option_value::Entity),
        schema.create_table_from_entity(product_image::Entity),
        schema.create_table_from_entity(product_variant::Entity),
        schema.create_table_from_entity(product_variant_option::Entity),
        schema.create_table_from_entity(price::Entity),
        schema.create_table_from_entity(shipping_option_price::Entity),
        schema.create_table_from_entity(product_tag::Entity),
        schema.create_table_from_entity(product_material::Entity),
        schema.create_table_from_entity(product_category::Entity),
        schema.create_table_from_entity(product_shipping_option::Entity),
    ];

    for stmt in &mut statements {
        stmt.if_not_exists();
        db.execute(backend.build(&*stmt)).await?;
    }

    for sql in UNIQUE_INDEXES {
        db.execute_unprepared(sql).await?;
    }

    info!("Catalog schema ready");
    Ok(())
}
