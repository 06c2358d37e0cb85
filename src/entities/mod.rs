//! Catalog entities

pub mod category;
pub mod material;
pub mod price;
pub mod product;
pub mod product_category;
pub mod product_image;
pub mod product_material;
pub mod product_option;
pub mod product_option_value;
pub mod product_shipping_option;
pub mod product_tag;
pub mod product_variant;
pub mod product_variant_option;
pub mod shipping_option;
pub mod shipping_option_price;
pub mod tag;

// Re-export entities
pub use category::{Entity as Category, Model as CategoryModel};
pub use material::{Entity as Material, Model as MaterialModel};
pub use price::{Entity as Price, Model as PriceModel, PriceKind};
pub use product::{Entity as Product, Model as ProductModel, ProductStatus};
pub use product_image::{Entity as ProductImage, Model as ProductImageModel};
pub use product_option::{Entity as ProductOption, Model as ProductOptionModel};
pub use product_option_value::{Entity as ProductOptionValue, Model as ProductOptionValueModel};
pub use product_variant::{Entity as ProductVariant, Model as ProductVariantModel};
pub use shipping_option::{Entity as ShippingOption, Model as ShippingOptionModel};
pub use shipping_option_price::{Entity as ShippingOptionPrice, Model as ShippingOptionPriceModel};
pub use tag::{Entity as Tag, Model as TagModel};
