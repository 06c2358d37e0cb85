mod common;

use common::TestApp;
use marketplace_api::{
    entities::{product, PriceKind, ProductStatus},
    errors::ServiceError,
    events::Event,
    services::categories::CreateCategoryInput,
    services::products::{
        CreateProductInput, ProductOptionInput, ProductVariantInput, UpdateProductInput,
        VariantPriceInput,
    },
    services::shipping_options::{CreateShippingOptionInput, ShippingOptionPriceInput},
};
use sea_orm::EntityTrait;
use std::collections::HashMap;

fn color_options() -> Vec<ProductOptionInput> {
    vec![ProductOptionInput {
        name: "Color".to_string(),
        values: vec!["Red".to_string(), "Blue".to_string()],
    }]
}

fn variant(title: &str, selection: &[(&str, &str)]) -> ProductVariantInput {
    ProductVariantInput {
        title: title.to_string(),
        options: selection
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>(),
        ..Default::default()
    }
}

#[tokio::test]
async fn create_product_with_full_graph() {
    let mut app = TestApp::new().await;
    let products = app.products();

    let tag_id = app.tags().create("summer".to_string()).await.unwrap();
    let material_id = app.materials().create("cotton".to_string()).await.unwrap();
    let category_id = app
        .categories()
        .create(CreateCategoryInput {
            name: "Jackets".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let shipping_option_id = app
        .shipping_options()
        .create(CreateShippingOptionInput {
            name: "Standard".to_string(),
            is_shipping_profile: false,
            prices: vec![ShippingOptionPriceInput {
                amount: 500,
                currency: "usd".to_string(),
                rules: None,
            }],
            ..Default::default()
        })
        .await
        .unwrap();
    app.drain_events();

    let mut red = variant("Red variant", &[("Color", "Red")]);
    red.sku = Some("JCK-RED".to_string());
    red.quantity = Some(5);
    red.prices = Some(vec![VariantPriceInput {
        amount: 1999,
        currency: "usd".to_string(),
        rules: None,
        kind: PriceKind::Default,
    }]);

    let product_id = products
        .create(CreateProductInput {
            title: "Winter Jacket".to_string(),
            subtitle: Some("Warm".to_string()),
            metadata: Some(serde_json::json!({"season": "winter"})),
            options: Some(color_options()),
            variants: Some(vec![red]),
            images: Some(vec!["first.png".to_string(), "second.png".to_string()]),
            tags: Some(vec![tag_id]),
            materials: Some(vec![material_id]),
            categories: Some(vec![category_id]),
            shipping_options: Some(vec![shipping_option_id]),
            ..Default::default()
        })
        .await
        .expect("create failed");

    let detail = products.get(product_id).await.expect("retrieve failed");

    assert_eq!(detail.product.title, "Winter Jacket");
    assert_eq!(detail.product.slug, "winter-jacket");
    assert_eq!(detail.product.status, ProductStatus::Draft);

    assert_eq!(detail.options.len(), 1);
    assert_eq!(detail.options[0].option.name, "Color");
    let value_texts: Vec<&str> = detail.options[0]
        .values
        .iter()
        .map(|v| v.value.as_str())
        .collect();
    assert_eq!(value_texts, vec!["Red", "Blue"]);

    assert_eq!(detail.variants.len(), 1);
    let red = &detail.variants[0];
    assert_eq!(red.variant.sku.as_deref(), Some("JCK-RED"));
    assert_eq!(red.variant.quantity, 5);
    assert_eq!(red.selection.get("Color").map(String::as_str), Some("Red"));
    assert_eq!(red.prices.len(), 1);
    assert_eq!(red.prices[0].amount, 1999);
    assert_eq!(red.prices[0].kind, PriceKind::Default);

    let image_urls: Vec<&str> = detail
        .images
        .iter()
        .map(|i| i.image_url.as_str())
        .collect();
    assert_eq!(image_urls, vec!["first.png", "second.png"]);
    assert_eq!(detail.images[0].rank, 0);
    assert_eq!(detail.images[1].rank, 1);

    assert_eq!(detail.tags.len(), 1);
    assert_eq!(detail.tags[0].value, "summer");
    assert_eq!(detail.materials.len(), 1);
    assert_eq!(detail.categories.len(), 1);
    assert_eq!(detail.categories[0].slug, "jackets");
    assert_eq!(detail.shipping_options.len(), 1);
    assert_eq!(detail.shipping_options[0].prices.len(), 1);

    assert_eq!(app.drain_events(), vec![Event::ProductCreated(product_id)]);
}

#[tokio::test]
async fn create_rolls_back_whole_aggregate_on_bad_association() {
    let mut app = TestApp::new().await;
    let products = app.products();
    let tag_id = app.tags().create("real".to_string()).await.unwrap();
    app.drain_events();

    let err = products
        .create(CreateProductInput {
            title: "Doomed".to_string(),
            options: Some(color_options()),
            variants: Some(vec![variant("V", &[("Color", "Red")])]),
            images: Some(vec!["img.png".to_string()]),
            tags: Some(vec![tag_id]),
            categories: Some(vec![9999]),
            ..Default::default()
        })
        .await
        .expect_err("create should fail");

    match err {
        ServiceError::InvalidInput(msg) => assert!(msg.contains("9999"), "got: {}", msg),
        other => panic!("expected InvalidInput, got {:?}", other),
    }

    // No partial rows are visible and no event was published
    assert!(products.list().await.unwrap().is_empty());
    assert!(app.drain_events().is_empty());
}

#[tokio::test]
async fn explicit_slug_must_be_unique_until_soft_deleted() {
    let app = TestApp::new().await;
    let products = app.products();

    let first = products
        .create(CreateProductInput {
            title: "One".to_string(),
            slug: Some("shared-slug".to_string()),
            ..Default::default()
        })
        .await
        .unwrap();

    let err = products
        .create(CreateProductInput {
            title: "Two".to_string(),
            slug: Some("shared-slug".to_string()),
            ..Default::default()
        })
        .await
        .expect_err("duplicate slug should fail");
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    // Soft-deleting the first frees the slug for reuse
    products.delete(first).await.unwrap();
    products
        .create(CreateProductInput {
            title: "Two".to_string(),
            slug: Some("shared-slug".to_string()),
            ..Default::default()
        })
        .await
        .expect("slug should be reusable after soft delete");
}

#[tokio::test]
async fn malformed_slug_is_rejected_before_any_write() {
    let app = TestApp::new().await;
    let products = app.products();

    let err = products
        .create(CreateProductInput {
            title: "Bad".to_string(),
            slug: Some("Not A Slug".to_string()),
            ..Default::default()
        })
        .await
        .expect_err("invalid slug should fail");

    assert!(matches!(err, ServiceError::InvalidInput(_)));
    assert!(products.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn variants_require_options() {
    let app = TestApp::new().await;
    let products = app.products();

    let err = products
        .create(CreateProductInput {
            title: "T".to_string(),
            variants: Some(vec![variant("V1", &[])]),
            ..Default::default()
        })
        .await
        .expect_err("variants without options should fail");

    match err {
        ServiceError::InvalidInput(msg) => {
            assert!(msg.contains("without options"), "got: {}", msg)
        }
        other => panic!("expected InvalidInput, got {:?}", other),
    }
}

#[tokio::test]
async fn variant_selection_resolves_against_sibling_options() {
    let app = TestApp::new().await;
    let products = app.products();

    let product_id = products
        .create(CreateProductInput {
            title: "T".to_string(),
            options: Some(color_options()),
            variants: Some(vec![variant("V1", &[("Color", "Red")])]),
            ..Default::default()
        })
        .await
        .expect("create failed");

    let detail = products.get(product_id).await.unwrap();
    assert_eq!(
        detail.variants[0].selection.get("Color").map(String::as_str),
        Some("Red")
    );
}

#[tokio::test]
async fn unknown_option_value_fails_naming_the_value() {
    let app = TestApp::new().await;
    let products = app.products();

    let err = products
        .create(CreateProductInput {
            title: "T".to_string(),
            options: Some(color_options()),
            variants: Some(vec![variant("V1", &[("Color", "Green")])]),
            ..Default::default()
        })
        .await
        .expect_err("unknown value should fail");

    match err {
        ServiceError::InvalidInput(msg) => assert!(msg.contains("Green"), "got: {}", msg),
        other => panic!("expected InvalidInput, got {:?}", other),
    }
    assert!(app.products().list().await.unwrap().is_empty());
}

#[tokio::test]
async fn unknown_option_name_fails_naming_the_option() {
    let app = TestApp::new().await;
    let products = app.products();

    let err = products
        .create(CreateProductInput {
            title: "T".to_string(),
            options: Some(color_options()),
            variants: Some(vec![variant("V1", &[("Size", "M")])]),
            ..Default::default()
        })
        .await
        .expect_err("unknown option should fail");

    match err {
        ServiceError::InvalidInput(msg) => assert!(msg.contains("Size"), "got: {}", msg),
        other => panic!("expected InvalidInput, got {:?}", other),
    }
}

#[tokio::test]
async fn update_replaces_images_wholesale() {
    let app = TestApp::new().await;
    let products = app.products();

    let product_id = products
        .create(CreateProductInput {
            title: "T".to_string(),
            images: Some(vec!["one.png".to_string(), "two.png".to_string()]),
            ..Default::default()
        })
        .await
        .unwrap();

    products
        .update(
            product_id,
            UpdateProductInput {
                images: Some(vec!["a.png".to_string()]),
                ..Default::default()
            },
        )
        .await
        .expect("update failed");

    let detail = products.get(product_id).await.unwrap();
    assert_eq!(detail.images.len(), 1);
    assert_eq!(detail.images[0].image_url, "a.png");
    assert_eq!(detail.images[0].rank, 0);
}

#[tokio::test]
async fn update_replaces_variants_and_their_prices() {
    let app = TestApp::new().await;
    let products = app.products();

    let mut v1 = variant("V1", &[("Color", "Red")]);
    v1.prices = Some(vec![VariantPriceInput {
        amount: 1000,
        currency: "usd".to_string(),
        rules: None,
        kind: PriceKind::Default,
    }]);

    let product_id = products
        .create(CreateProductInput {
            title: "T".to_string(),
            options: Some(color_options()),
            variants: Some(vec![v1, variant("V2", &[("Color", "Blue")])]),
            ..Default::default()
        })
        .await
        .unwrap();

    let mut v3 = variant("V3", &[("Size", "M")]);
    v3.prices = Some(vec![VariantPriceInput {
        amount: 2500,
        currency: "usd".to_string(),
        rules: None,
        kind: PriceKind::Sale,
    }]);

    // The new variant set resolves against options supplied in this call
    products
        .update(
            product_id,
            UpdateProductInput {
                options: Some(vec![ProductOptionInput {
                    name: "Size".to_string(),
                    values: vec!["M".to_string(), "L".to_string()],
                }]),
                variants: Some(vec![v3]),
                ..Default::default()
            },
        )
        .await
        .expect("update failed");

    let detail = products.get(product_id).await.unwrap();
    assert_eq!(detail.variants.len(), 1);
    assert_eq!(detail.variants[0].variant.title, "V3");
    assert_eq!(detail.variants[0].prices.len(), 1);
    assert_eq!(detail.variants[0].prices[0].amount, 2500);
    assert_eq!(
        detail.variants[0].selection.get("Size").map(String::as_str),
        Some("M")
    );
}

#[tokio::test]
async fn update_only_adds_association_links() {
    let app = TestApp::new().await;
    let products = app.products();
    let tag_a = app.tags().create("a".to_string()).await.unwrap();
    let tag_b = app.tags().create("b".to_string()).await.unwrap();

    let product_id = products
        .create(CreateProductInput {
            title: "T".to_string(),
            tags: Some(vec![tag_a]),
            ..Default::default()
        })
        .await
        .unwrap();

    // Linking tag_b does not remove the existing tag_a link, and re-linking
    // tag_a is a no-op rather than an error
    products
        .update(
            product_id,
            UpdateProductInput {
                tags: Some(vec![tag_a, tag_b]),
                ..Default::default()
            },
        )
        .await
        .expect("update failed");

    let detail = products.get(product_id).await.unwrap();
    let mut tag_values: Vec<&str> = detail.tags.iter().map(|t| t.value.as_str()).collect();
    tag_values.sort_unstable();
    assert_eq!(tag_values, vec!["a", "b"]);
}

#[tokio::test]
async fn update_patches_scalars_only() {
    let app = TestApp::new().await;
    let products = app.products();

    let product_id = products
        .create(CreateProductInput {
            title: "Original".to_string(),
            subtitle: Some("Sub".to_string()),
            weight: Some(100),
            ..Default::default()
        })
        .await
        .unwrap();

    products
        .update(
            product_id,
            UpdateProductInput {
                title: Some("Renamed".to_string()),
                status: Some(ProductStatus::Published),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let detail = products.get(product_id).await.unwrap();
    assert_eq!(detail.product.title, "Renamed");
    assert_eq!(detail.product.status, ProductStatus::Published);
    // Untouched fields survive
    assert_eq!(detail.product.subtitle.as_deref(), Some("Sub"));
    assert_eq!(detail.product.weight, Some(100));
    assert_eq!(detail.product.slug, "original");
}

#[tokio::test]
async fn update_missing_product_is_not_found() {
    let app = TestApp::new().await;

    let err = app
        .products()
        .update(
            4242,
            UpdateProductInput {
                title: Some("x".to_string()),
                ..Default::default()
            },
        )
        .await
        .expect_err("update of missing product should fail");

    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn sequential_updates_last_writer_wins() {
    // Pins observed behavior: there is no version column, so overlapping
    // updates resolve by write order
    let app = TestApp::new().await;
    let products = app.products();

    let product_id = products
        .create(CreateProductInput {
            title: "T".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    products
        .update(
            product_id,
            UpdateProductInput {
                title: Some("first".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    products
        .update(
            product_id,
            UpdateProductInput {
                title: Some("second".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(products.get(product_id).await.unwrap().product.title, "second");
}

#[tokio::test]
async fn soft_delete_hides_product_from_reads() {
    let mut app = TestApp::new().await;
    let products = app.products();

    let product_id = products
        .create(CreateProductInput {
            title: "Ghost".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    app.drain_events();

    products.delete(product_id).await.expect("delete failed");

    assert!(matches!(
        products.get(product_id).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(products.list().await.unwrap().is_empty());

    // Deleting again reports NotFound: the row is already invisible
    assert!(matches!(
        products.delete(product_id).await,
        Err(ServiceError::NotFound(_))
    ));

    // The row itself is retained, only marked
    let raw = product::Entity::find_by_id(product_id)
        .one(&*app.db)
        .await
        .unwrap()
        .expect("row should still exist");
    assert!(raw.deleted_at.is_some());

    assert_eq!(app.drain_events(), vec![Event::ProductDeleted(product_id)]);
}

#[tokio::test]
async fn list_returns_each_product_with_its_own_graph() {
    let app = TestApp::new().await;
    let products = app.products();

    let first = products
        .create(CreateProductInput {
            title: "First".to_string(),
            images: Some(vec!["f.png".to_string()]),
            ..Default::default()
        })
        .await
        .unwrap();
    let second = products
        .create(CreateProductInput {
            title: "Second".to_string(),
            options: Some(color_options()),
            variants: Some(vec![variant("V", &[("Color", "Blue")])]),
            ..Default::default()
        })
        .await
        .unwrap();

    let listed = products.list().await.expect("list failed");
    assert_eq!(listed.len(), 2);

    let first_detail = listed.iter().find(|d| d.product.id == first).unwrap();
    assert_eq!(first_detail.images.len(), 1);
    assert!(first_detail.variants.is_empty());

    let second_detail = listed.iter().find(|d| d.product.id == second).unwrap();
    assert!(second_detail.images.is_empty());
    assert_eq!(second_detail.variants.len(), 1);
    assert_eq!(
        second_detail.variants[0]
            .selection
            .get("Color")
            .map(String::as_str),
        Some("Blue")
    );
}
