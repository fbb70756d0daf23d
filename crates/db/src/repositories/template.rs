use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;

use slideboard_core::domain::customer::TenantId;
use slideboard_core::domain::quote::{QuoteId, QuoteItemInput};
use slideboard_core::domain::template::{QuoteTemplate, TemplateId};
use slideboard_core::store::{StoreError, TemplateStore};

use super::{column, decode_decimal, decode_timestamp, encode_timestamp, RepositoryError};
use crate::DbPool;

/// Template store over `quote_template`. Lines are kept as a JSON document.
pub struct SqlTemplateStore {
    pool: DbPool,
}

impl SqlTemplateStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<QuoteTemplate>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, tenant_id, name, description, category, source_quote_id, discount_rate,
                    items_json, is_active, created_by, created_at, updated_at
             FROM quote_template
             WHERE id = ? AND tenant_id = ? AND is_active = 1",
        )
        .bind(&id.0)
        .bind(&tenant.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_template).transpose()
    }

    async fn insert(&self, template: &QuoteTemplate) -> Result<(), RepositoryError> {
        let items_json = serde_json::to_string(&template.items)
            .map_err(|error| RepositoryError::Decode(format!("items_json: {error}")))?;

        sqlx::query(
            "INSERT INTO quote_template (id, tenant_id, name, description, category,
                                         source_quote_id, discount_rate, items_json, is_active,
                                         created_by, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&template.id.0)
        .bind(&template.tenant_id.0)
        .bind(&template.name)
        .bind(template.description.as_deref())
        .bind(&template.category)
        .bind(template.source_quote_id.as_ref().map(|source| source.0.as_str()))
        .bind(template.discount_rate.to_string())
        .bind(items_json)
        .bind(template.is_active)
        .bind(&template.created_by)
        .bind(encode_timestamp(template.created_at))
        .bind(encode_timestamp(template.updated_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list(
        &self,
        tenant: &TenantId,
        category: Option<&str>,
    ) -> Result<Vec<QuoteTemplate>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, name, description, category, source_quote_id, discount_rate,
                    items_json, is_active, created_by, created_at, updated_at
             FROM quote_template
             WHERE tenant_id = ? AND is_active = 1 AND (? IS NULL OR category = ?)
             ORDER BY created_at DESC, id ASC",
        )
        .bind(&tenant.0)
        .bind(category)
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_template).collect()
    }

    async fn deactivate(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE quote_template SET is_active = 0, updated_at = ?
             WHERE id = ? AND tenant_id = ? AND is_active = 1",
        )
        .bind(encode_timestamp(now))
        .bind(&id.0)
        .bind(&tenant.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_template(row: &SqliteRow) -> Result<QuoteTemplate, RepositoryError> {
    let source_quote_id: Option<String> = column(row, "source_quote_id")?;
    let discount_rate: String = column(row, "discount_rate")?;
    let items_json: String = column(row, "items_json")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;
    let items: Vec<QuoteItemInput> = serde_json::from_str(&items_json)
        .map_err(|error| RepositoryError::Decode(format!("items_json: {error}")))?;

    Ok(QuoteTemplate {
        id: TemplateId(column(row, "id")?),
        tenant_id: TenantId(column(row, "tenant_id")?),
        name: column(row, "name")?,
        description: column(row, "description")?,
        category: column(row, "category")?,
        source_quote_id: source_quote_id.map(QuoteId),
        discount_rate: decode_decimal("discount_rate", &discount_rate)?,
        items,
        is_active: column(row, "is_active")?,
        created_by: column(row, "created_by")?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl TemplateStore for SqlTemplateStore {
    async fn find_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<QuoteTemplate>, StoreError> {
        Ok(self.fetch(tenant, id).await?)
    }

    async fn insert_template(&self, template: &QuoteTemplate) -> Result<(), StoreError> {
        Ok(self.insert(template).await?)
    }

    async fn list_templates(
        &self,
        tenant: &TenantId,
        category: Option<&str>,
    ) -> Result<Vec<QuoteTemplate>, StoreError> {
        Ok(self.list(tenant, category).await?)
    }

    async fn deactivate_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.deactivate(tenant, id, now).await?)
    }
}
