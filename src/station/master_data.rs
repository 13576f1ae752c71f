// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-scan-station project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Master data: which child parts a main part is built from

use anyhow::Result;
use async_trait::async_trait;

use crate::config::Catalog;
use crate::scan::ChildPartSpec;

/// Supplies the expected child parts of a main part number
#[async_trait]
pub trait MasterDataProvider: Send + Sync {
    /// `Ok(None)` when the main part is unknown
    async fn expected_parts(&self, main_part_number: &str) -> Result<Option<Vec<ChildPartSpec>>>;
}

/// Provider serving the `catalog` section of the configuration
#[derive(Debug, Clone, Default)]
pub struct CatalogProvider {
    catalog: Catalog,
}

impl CatalogProvider {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn main_part_numbers(&self) -> impl Iterator<Item = &str> {
        self.catalog.keys().map(String::as_str)
    }
}

#[async_trait]
impl MasterDataProvider for CatalogProvider {
    async fn expected_parts(&self, main_part_number: &str) -> Result<Option<Vec<ChildPartSpec>>> {
        Ok(self.catalog.get(main_part_number).cloned())
    }
}
