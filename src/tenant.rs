//! Tenant resolution — maps an inbound sender identity to a tenant,
//! creating one on first contact.

use std::sync::Arc;

use crate::error::{DatabaseError, ResolverError};
use crate::store::{Database, Tenant};

/// Atomic get-or-create over the tenant table.
///
/// Safe under concurrent first contact: the insert rides on the unique
/// constraint for `external_id`; losing that race falls back to a
/// re-read instead of locking.
pub struct TenantResolver {
    db: Arc<dyn Database>,
    default_currency: String,
}

impl TenantResolver {
    pub fn new(db: Arc<dyn Database>, default_currency: String) -> Self {
        Self {
            db,
            default_currency,
        }
    }

    /// Resolve the tenant for an external sender id, creating it if absent.
    pub async fn resolve(
        &self,
        external_id: &str,
        display_name: Option<&str>,
    ) -> Result<Tenant, ResolverError> {
        if let Some(tenant) = self.db.get_tenant_by_external_id(external_id).await? {
            return Ok(tenant);
        }

        let candidate = Tenant::new(external_id, display_name, Some(&self.default_currency));
        match self.db.insert_tenant(&candidate).await {
            Ok(()) => {
                tracing::info!(
                    tenant_id = %candidate.id,
                    external_id,
                    "Created tenant on first contact"
                );
                Ok(candidate)
            }
            Err(e) if e.is_conflict() => {
                // Lost the first-contact race; the row exists now.
                self.db
                    .get_tenant_by_external_id(external_id)
                    .await?
                    .ok_or_else(|| {
                        ResolverError::Store(DatabaseError::NotFound {
                            entity: "tenant".into(),
                            id: external_id.into(),
                        })
                    })
            }
            Err(e) => Err(e.into()),
        }
    }
}
