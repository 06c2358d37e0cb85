use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One selectable value of a product option (e.g. "Red" for "Color").
/// Variant selections reference these rows.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_option_values")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub product_option_id: i32,
    pub value: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::product_option::Entity",
        from = "Column::ProductOptionId",
        to = "super::product_option::Column::Id",
        on_delete = "Cascade"
    )]
    ProductOption,
}

impl Related<super::product_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ProductOption.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
