use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Price owned by a shipping option; replaced wholesale when the option is
/// updated with a new price set.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "shipping_option_prices")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub shipping_option_id: i32,
    pub amount: i64,
    pub currency: String,
    #[sea_orm(column_type = "Json", nullable)]
    pub rules: Option<Json>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::shipping_option::Entity",
        from = "Column::ShippingOptionId",
        to = "super::shipping_option::Column::Id",
        on_delete = "Cascade"
    )]
    ShippingOption,
}

impl Related<super::shipping_option::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ShippingOption.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
