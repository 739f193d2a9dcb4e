use std::sync::Arc;

use tracing::{info, warn};

use crate::config::LoanProduct;
use crate::errors::{LoanError, Result};
use crate::store::{LoanStore, ProductStore};
use crate::types::{ProductId, TenantId};

/// tenant product catalog with the system-asset and in-use guards
#[derive(Clone)]
pub struct ProductCatalog {
    products: Arc<dyn ProductStore>,
    loans: Arc<dyn LoanStore>,
}

impl ProductCatalog {
    pub fn new(products: Arc<dyn ProductStore>, loans: Arc<dyn LoanStore>) -> Self {
        Self { products, loans }
    }

    pub fn register(&self, tenant_id: TenantId, product: LoanProduct) -> Result<LoanProduct> {
        if product.is_system_asset {
            return Err(LoanError::validation("system products are seeded, not registered"));
        }
        self.insert(tenant_id, product)
    }

    /// tenant provisioning; the product is protected from then on
    pub fn seed_system_product(&self, tenant_id: TenantId, mut product: LoanProduct) -> Result<LoanProduct> {
        product.is_system_asset = true;
        self.insert(tenant_id, product)
    }

    fn insert(&self, tenant_id: TenantId, product: LoanProduct) -> Result<LoanProduct> {
        product.validate()?;
        self.products.insert_product(tenant_id, product.clone())?;
        info!(tenant_id = %tenant_id, product_id = %product.id, name = %product.name, "product registered");
        Ok(product)
    }

    pub fn get(&self, tenant_id: TenantId, id: ProductId) -> Result<LoanProduct> {
        self.products.get_product(tenant_id, id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Result<Vec<LoanProduct>> {
        self.products.list_products(tenant_id)
    }

    /// replace the product's terms; identity, ownership and flags stay as stored
    pub fn update(&self, tenant_id: TenantId, changes: LoanProduct) -> Result<LoanProduct> {
        let stored = self.get(tenant_id, changes.id)?;
        Self::guard_system_asset(&stored)?;
        self.guard_not_in_use(tenant_id, &stored)?;

        let updated = LoanProduct {
            id: stored.id,
            tenant_id: stored.tenant_id,
            is_system_asset: stored.is_system_asset,
            retired: stored.retired,
            created_at: stored.created_at,
            ..changes
        };
        updated.validate()?;
        self.products.save_product(tenant_id, updated.clone())?;
        info!(tenant_id = %tenant_id, product_id = %updated.id, "product updated");
        Ok(updated)
    }

    pub fn rename(&self, tenant_id: TenantId, id: ProductId, name: &str) -> Result<LoanProduct> {
        let mut product = self.get(tenant_id, id)?;
        Self::guard_system_asset(&product)?;
        if name.trim().is_empty() {
            return Err(LoanError::validation("product name is required"));
        }
        product.name = name.trim().to_string();
        self.products.save_product(tenant_id, product.clone())?;
        info!(tenant_id = %tenant_id, product_id = %id, name = %product.name, "product renamed");
        Ok(product)
    }

    /// retired products take no new applications; existing loans are unaffected
    pub fn retire(&self, tenant_id: TenantId, id: ProductId) -> Result<LoanProduct> {
        let mut product = self.get(tenant_id, id)?;
        Self::guard_system_asset(&product)?;
        self.guard_not_in_use(tenant_id, &product)?;
        product.retired = true;
        self.products.save_product(tenant_id, product.clone())?;
        info!(tenant_id = %tenant_id, product_id = %id, "product retired");
        Ok(product)
    }

    fn guard_system_asset(product: &LoanProduct) -> Result<()> {
        if product.is_system_asset {
            warn!(product_id = %product.id, name = %product.name, "attempt to modify a system product");
            return Err(LoanError::ProtectedAsset {
                name: product.name.clone(),
            });
        }
        Ok(())
    }

    fn guard_not_in_use(&self, tenant_id: TenantId, product: &LoanProduct) -> Result<()> {
        let in_use = self
            .loans
            .loans_for_product(tenant_id, product.id)?
            .iter()
            .any(|loan| loan.is_active());
        if in_use {
            return Err(LoanError::ProductInUse { id: product.id });
        }
        Ok(())
    }
}
