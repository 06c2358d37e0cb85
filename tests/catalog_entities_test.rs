mod common;

use common::TestApp;
use marketplace_api::{
    errors::ServiceError,
    services::categories::{CreateCategoryInput, UpdateCategoryInput},
    services::products::CreateProductInput,
    services::shipping_options::{
        CreateShippingOptionInput, ShippingOptionPriceInput, UpdateShippingOptionInput,
    },
};

#[tokio::test]
async fn tag_values_are_unique_until_soft_deleted() {
    let app = TestApp::new().await;
    let tags = app.tags();

    let first = tags.create("wool".to_string()).await.unwrap();

    let err = tags
        .create("wool".to_string())
        .await
        .expect_err("duplicate value should fail");
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    tags.remove(first).await.unwrap();
    assert!(matches!(
        tags.retrieve(first).await,
        Err(ServiceError::NotFound(_))
    ));

    // The value is free again once the old row is soft-deleted
    tags.create("wool".to_string())
        .await
        .expect("value should be reusable");
}

#[tokio::test]
async fn material_crud_roundtrip() {
    let app = TestApp::new().await;
    let materials = app.materials();

    let id = materials.create("linen".to_string()).await.unwrap();
    assert_eq!(materials.retrieve(id).await.unwrap().value, "linen");
    assert_eq!(materials.list().await.unwrap().len(), 1);

    materials.remove(id).await.unwrap();
    assert!(materials.list().await.unwrap().is_empty());
    assert!(matches!(
        materials.remove(id).await,
        Err(ServiceError::NotFound(_))
    ));
}

#[tokio::test]
async fn category_slug_defaults_and_stays_unique() {
    let app = TestApp::new().await;
    let categories = app.categories();

    let parent = categories
        .create(CreateCategoryInput {
            name: "Outer Wear".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(categories.retrieve(parent).await.unwrap().slug, "outer-wear");

    let err = categories
        .create(CreateCategoryInput {
            name: "Different".to_string(),
            slug: Some("outer-wear".to_string()),
            ..Default::default()
        })
        .await
        .expect_err("duplicate slug should fail");
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let err = categories
        .create(CreateCategoryInput {
            name: "Bad".to_string(),
            slug: Some("Not Valid".to_string()),
            ..Default::default()
        })
        .await
        .expect_err("invalid slug should fail");
    assert!(matches!(err, ServiceError::InvalidInput(_)));

    let child = categories
        .create(CreateCategoryInput {
            name: "Jackets".to_string(),
            parent_id: Some(parent),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(
        categories.retrieve(child).await.unwrap().parent_id,
        Some(parent)
    );

    categories
        .update(
            child,
            UpdateCategoryInput {
                name: Some("Coats".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let updated = categories.retrieve(child).await.unwrap();
    assert_eq!(updated.name, "Coats");
    assert_eq!(updated.slug, "jackets");
}

#[tokio::test]
async fn shipping_option_prices_replace_on_update() {
    let app = TestApp::new().await;
    let shipping = app.shipping_options();

    let id = shipping
        .create(CreateShippingOptionInput {
            name: "Express".to_string(),
            is_shipping_profile: false,
            postal_code: None,
            country_code: Some("us".to_string()),
            prices: vec![
                ShippingOptionPriceInput {
                    amount: 1000,
                    currency: "usd".to_string(),
                    rules: None,
                },
                ShippingOptionPriceInput {
                    amount: 900,
                    currency: "eur".to_string(),
                    rules: None,
                },
            ],
        })
        .await
        .unwrap();

    let detail = shipping.retrieve(id).await.unwrap();
    assert_eq!(detail.option.name, "Express");
    assert_eq!(detail.prices.len(), 2);

    shipping
        .update(
            id,
            UpdateShippingOptionInput {
                name: Some("Express Plus".to_string()),
                prices: Some(vec![ShippingOptionPriceInput {
                    amount: 1500,
                    currency: "usd".to_string(),
                    rules: None,
                }]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let detail = shipping.retrieve(id).await.unwrap();
    assert_eq!(detail.option.name, "Express Plus");
    assert_eq!(detail.prices.len(), 1);
    assert_eq!(detail.prices[0].amount, 1500);

    shipping.remove(id).await.unwrap();
    assert!(matches!(
        shipping.retrieve(id).await,
        Err(ServiceError::NotFound(_))
    ));
    assert!(shipping.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn product_link_to_missing_shipping_option_fails() {
    let app = TestApp::new().await;
    let products = app.products();

    let err = products
        .create(CreateProductInput {
            title: "T".to_string(),
            shipping_options: Some(vec![777]),
            ..Default::default()
        })
        .await
        .expect_err("missing shipping option should fail");

    match err {
        ServiceError::InvalidInput(msg) => assert!(msg.contains("777"), "got: {}", msg),
        other => panic!("expected InvalidInput, got {:?}", other),
    }
    assert!(products.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn association_validators_name_the_missing_id() {
    let app = TestApp::new().await;
    let products = app.products();

    for (input, missing) in [
        (
            CreateProductInput {
                title: "T1".to_string(),
                tags: Some(vec![111]),
                ..Default::default()
            },
            "111",
        ),
        (
            CreateProductInput {
                title: "T2".to_string(),
                materials: Some(vec![222]),
                ..Default::default()
            },
            "222",
        ),
        (
            CreateProductInput {
                title: "T3".to_string(),
                categories: Some(vec![333]),
                ..Default::default()
            },
            "333",
        ),
    ] {
        let err = products.create(input).await.expect_err("should fail");
        match err {
            ServiceError::InvalidInput(msg) => {
                assert!(msg.contains(missing), "got: {}", msg)
            }
            other => panic!("expected InvalidInput, got {:?}", other),
        }
    }

    assert!(products.list().await.unwrap().is_empty());
}
