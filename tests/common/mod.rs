#![allow(dead_code)]

use marketplace_api::{
    config::AppConfig,
    db,
    events::{self, Event, EventSender},
    schema,
    services::{
        CategoryService, MaterialService, ProductService, ShippingOptionService, TagService,
    },
};
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Helper harness backed by a throwaway sqlite database per test.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub event_sender: Arc<EventSender>,
    events: mpsc::Receiver<Event>,
    _db_dir: tempfile::TempDir,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let db_path = dir.path().join("catalog_test.db");

        let mut cfg = AppConfig::new(format!("sqlite://{}?mode=rwc", db_path.display()));
        cfg.db_max_connections = 5;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        schema::setup_schema(&pool)
            .await
            .expect("failed to set up schema");

        let (event_sender, events) = events::channel(64);

        Self {
            db: Arc::new(pool),
            event_sender: Arc::new(event_sender),
            events,
            _db_dir: dir,
        }
    }

    pub fn products(&self) -> ProductService {
        ProductService::new(self.db.clone(), self.event_sender.clone())
    }

    pub fn tags(&self) -> TagService {
        TagService::new(self.db.clone(), self.event_sender.clone())
    }

    pub fn materials(&self) -> MaterialService {
        MaterialService::new(self.db.clone(), self.event_sender.clone())
    }

    pub fn categories(&self) -> CategoryService {
        CategoryService::new(self.db.clone(), self.event_sender.clone())
    }

    pub fn shipping_options(&self) -> ShippingOptionService {
        ShippingOptionService::new(self.db.clone(), self.event_sender.clone())
    }

    /// Drains every event published so far, in publication order.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
