//! # Catalog Boundary
//!
//! Read-only view of the external catalog service.
//! The bundled implementation is loaded from `config/catalog.toml`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::PaymentResult;

/// A catalog item as seen by the pricing pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogItem {
    /// Catalog identifier
    pub id: String,

    /// Display name
    pub name: String,

    /// Stock keeping unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,

    /// Category identifier (kept for reporting)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_id: Option<String>,

    /// List price in the source currency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_price: Option<Decimal>,

    /// Shipping weight
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<Decimal>,

    /// Units on hand across all warehouses
    #[serde(default)]
    pub inventory_total: u32,
}

impl CatalogItem {
    /// Create an item with price and weight
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        list_price: Decimal,
        weight: Decimal,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            sku: None,
            category_id: None,
            list_price: Some(list_price),
            weight: Some(weight),
            inventory_total: 1,
        }
    }

    /// Builder: set SKU
    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    /// Builder: set category
    pub fn with_category(mut self, category_id: impl Into<String>) -> Self {
        self.category_id = Some(category_id.into());
        self
    }

    /// Builder: set inventory count
    pub fn with_inventory(mut self, inventory_total: u32) -> Self {
        self.inventory_total = inventory_total;
        self
    }

    pub fn in_stock(&self) -> bool {
        self.inventory_total > 0
    }
}

/// Lookup of catalog items by id
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Fetch an item, `None` when the catalog does not know it
    async fn fetch(&self, item_id: &str) -> PaymentResult<Option<CatalogItem>>;
}

/// In-memory catalog (loaded from config)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemCatalog {
    #[serde(default)]
    pub items: Vec<CatalogItem>,
}

impl ItemCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Add an item to the catalog
    pub fn add(&mut self, item: CatalogItem) {
        self.items.push(item);
    }

    /// Builder: add an item
    pub fn with_item(mut self, item: CatalogItem) -> Self {
        self.add(item);
        self
    }

    /// Find an item by id
    pub fn get(&self, id: &str) -> Option<&CatalogItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Load catalog from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(toml_str)
    }
}

#[async_trait]
impl Catalog for ItemCatalog {
    async fn fetch(&self, item_id: &str) -> PaymentResult<Option<CatalogItem>> {
        Ok(self.get(item_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_catalog_from_toml() {
        let catalog = ItemCatalog::from_toml(
            r#"
            [[items]]
            id = "brake-pad-01"
            name = "Brake pad set"
            sku = "BP-01"
            category_id = "brakes"
            list_price = "42.50"
            weight = "1.2"
            inventory_total = 7

            [[items]]
            id = "mirror-02"
            name = "Side mirror"
            "#,
        )
        .unwrap();

        assert_eq!(catalog.len(), 2);
        let pad = catalog.get("brake-pad-01").unwrap();
        assert_eq!(pad.list_price, Some(dec!(42.50)));
        assert_eq!(pad.weight, Some(dec!(1.2)));
        assert!(pad.in_stock());

        let mirror = catalog.get("mirror-02").unwrap();
        assert!(mirror.list_price.is_none());
        assert!(!mirror.in_stock());
    }

    #[tokio::test]
    async fn test_fetch_unknown_item() {
        let catalog = ItemCatalog::new().with_item(CatalogItem::new(
            "a",
            "A",
            dec!(1),
            dec!(1),
        ));
        assert!(catalog.fetch("a").await.unwrap().is_some());
        assert!(catalog.fetch("b").await.unwrap().is_none());
    }
}
