use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Sqlite, Transaction};

use slideboard_core::domain::customer::{CustomerId, TenantId};
use slideboard_core::domain::product::ProductId;
use slideboard_core::domain::quote::{Quote, QuoteId, QuoteItem, QuoteItemId};
use slideboard_core::store::{QuoteStore, StoreError, WriteOutcome};

use super::{
    column, decode_decimal, decode_optional_timestamp, decode_timestamp, decode_u32,
    encode_timestamp, RepositoryError,
};
use crate::DbPool;

macro_rules! select_quotes {
    ($tail:literal) => {
        concat!(
            "SELECT id, quote_no, tenant_id, customer_id, title, kind, bundle_id, root_quote_id,
                    revision, is_active, total_amount, discount_rate, discount_amount,
                    final_amount, status, valid_until, version, submitted_by, submitted_at,
                    approved_by, approved_at, rejected_by, reject_reason, locked_at,
                    created_by, created_at, updated_at
             FROM quote ",
            $tail
        )
    };
}

/// Quote store over the `quote` and `quote_item` tables.
///
/// Every statement filters on `tenant_id`. Updates are conditional on the
/// stored version and rewrite the lines in the same transaction.
pub struct SqlQuoteStore {
    pool: DbPool,
}

impl SqlQuoteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(
        &self,
        tenant: &TenantId,
        id: &QuoteId,
    ) -> Result<Option<Quote>, RepositoryError> {
        let row = sqlx::query(select_quotes!("WHERE id = ? AND tenant_id = ?"))
            .bind(&id.0)
            .bind(&tenant.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref row) => Ok(Some(self.hydrate(row).await?)),
            None => Ok(None),
        }
    }

    async fn hydrate(&self, row: &SqliteRow) -> Result<Quote, RepositoryError> {
        let id: String = column(row, "id")?;
        let items = sqlx::query(
            "SELECT id, product_id, product_name, category, quantity, unit_cost, unit_price,
                    subtotal
             FROM quote_item WHERE quote_id = ? ORDER BY position ASC",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?
        .iter()
        .map(row_to_item)
        .collect::<Result<Vec<_>, _>>()?;

        row_to_quote(row, items)
    }

    async fn hydrate_all(&self, rows: Vec<SqliteRow>) -> Result<Vec<Quote>, RepositoryError> {
        let mut quotes = Vec::with_capacity(rows.len());
        for row in &rows {
            quotes.push(self.hydrate(row).await?);
        }
        Ok(quotes)
    }

    async fn insert(&self, quote: &Quote) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;
        insert_row(&mut tx, quote).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(
        &self,
        quote: &Quote,
        expected_version: u32,
    ) -> Result<WriteOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        if !update_row(&mut tx, quote, expected_version).await? {
            tx.rollback().await?;
            return Ok(WriteOutcome::Conflict);
        }
        tx.commit().await?;
        Ok(WriteOutcome::Applied)
    }

    /// Retires `retired` and inserts its successor in one transaction.
    async fn replace(
        &self,
        retired: &Quote,
        expected_version: u32,
        successor: &Quote,
    ) -> Result<WriteOutcome, RepositoryError> {
        let mut tx = self.pool.begin().await?;
        if !update_row(&mut tx, retired, expected_version).await? {
            tx.rollback().await?;
            return Ok(WriteOutcome::Conflict);
        }
        if let Err(error) = insert_row(&mut tx, successor).await {
            tx.rollback().await?;
            return Err(error);
        }
        tx.commit().await?;
        Ok(WriteOutcome::Applied)
    }

    async fn children(
        &self,
        tenant: &TenantId,
        bundle_id: &QuoteId,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let rows = sqlx::query(select_quotes!(
            "WHERE tenant_id = ? AND bundle_id = ? ORDER BY created_at ASC"
        ))
        .bind(&tenant.0)
        .bind(&bundle_id.0)
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_all(rows).await
    }

    async fn expirable(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quote>, RepositoryError> {
        let rows = sqlx::query(select_quotes!(
            "WHERE tenant_id = ?
               AND valid_until IS NOT NULL
               AND valid_until < ?
               AND status IN ('DRAFT', 'PENDING_APPROVAL', 'APPROVED')
             ORDER BY valid_until ASC"
        ))
        .bind(&tenant.0)
        .bind(encode_timestamp(now))
        .fetch_all(&self.pool)
        .await?;
        self.hydrate_all(rows).await
    }
}

async fn insert_row(
    tx: &mut Transaction<'_, Sqlite>,
    quote: &Quote,
) -> Result<(), RepositoryError> {
    sqlx::query(
        "INSERT INTO quote (id, quote_no, tenant_id, customer_id, title, kind, bundle_id,
                            root_quote_id, revision, is_active, total_amount, discount_rate,
                            discount_amount, final_amount, status, valid_until, version,
                            submitted_by, submitted_at, approved_by, approved_at,
                            rejected_by, reject_reason, locked_at, created_by, created_at,
                            updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?,
                 ?, ?)",
    )
    .bind(&quote.id.0)
    .bind(&quote.quote_no)
    .bind(&quote.tenant_id.0)
    .bind(quote.customer_id.as_ref().map(|customer| customer.0.as_str()))
    .bind(quote.title.as_deref())
    .bind(quote.kind.as_str())
    .bind(quote.bundle_id.as_ref().map(|bundle| bundle.0.as_str()))
    .bind(&quote.root_quote_id.0)
    .bind(i64::from(quote.revision))
    .bind(quote.is_active)
    .bind(quote.total_amount.to_string())
    .bind(quote.discount_rate.to_string())
    .bind(quote.discount_amount.to_string())
    .bind(quote.final_amount.to_string())
    .bind(quote.status.as_str())
    .bind(quote.valid_until.map(encode_timestamp))
    .bind(i64::from(quote.version))
    .bind(quote.submitted_by.as_deref())
    .bind(quote.submitted_at.map(encode_timestamp))
    .bind(quote.approved_by.as_deref())
    .bind(quote.approved_at.map(encode_timestamp))
    .bind(quote.rejected_by.as_deref())
    .bind(quote.reject_reason.as_deref())
    .bind(quote.locked_at.map(encode_timestamp))
    .bind(&quote.created_by)
    .bind(encode_timestamp(quote.created_at))
    .bind(encode_timestamp(quote.updated_at))
    .execute(&mut **tx)
    .await?;


    write_items(tx, quote).await
}

/// Conditional replace of the quote row and its lines. `false` when the stored
/// version no longer matched.
async fn update_row(
    tx: &mut Transaction<'_, Sqlite>,
    quote: &Quote,
    expected_version: u32,
) -> Result<bool, RepositoryError> {
    let result = sqlx::query(
        "UPDATE quote SET
             customer_id = ?, title = ?, bundle_id = ?, root_quote_id = ?, revision = ?,
             is_active = ?, total_amount = ?, discount_rate = ?, discount_amount = ?,
             final_amount = ?, status = ?, valid_until = ?, version = ?, submitted_by = ?,
             submitted_at = ?, approved_by = ?, approved_at = ?, rejected_by = ?,
             reject_reason = ?, locked_at = ?, updated_at = ?
         WHERE id = ? AND tenant_id = ? AND version = ?",
    )
    .bind(quote.customer_id.as_ref().map(|customer| customer.0.as_str()))
    .bind(quote.title.as_deref())
    .bind(quote.bundle_id.as_ref().map(|bundle| bundle.0.as_str()))
    .bind(&quote.root_quote_id.0)
    .bind(i64::from(quote.revision))
    .bind(quote.is_active)
    .bind(quote.total_amount.to_string())
    .bind(quote.discount_rate.to_string())
    .bind(quote.discount_amount.to_string())
    .bind(quote.final_amount.to_string())
    .bind(quote.status.as_str())
    .bind(quote.valid_until.map(encode_timestamp))
    .bind(i64::from(quote.version))
    .bind(quote.submitted_by.as_deref())
    .bind(quote.submitted_at.map(encode_timestamp))
    .bind(quote.approved_by.as_deref())
    .bind(quote.approved_at.map(encode_timestamp))
    .bind(quote.rejected_by.as_deref())
    .bind(quote.reject_reason.as_deref())
    .bind(quote.locked_at.map(encode_timestamp))
    .bind(encode_timestamp(quote.updated_at))
    .bind(&quote.id.0)
    .bind(&quote.tenant_id.0)
    .bind(i64::from(expected_version))
    .execute(&mut **tx)
    .await?;

    if result.rows_affected() == 0 {
        return Ok(false);
    }

    sqlx::query("DELETE FROM quote_item WHERE quote_id = ? AND tenant_id = ?")
        .bind(&quote.id.0)
        .bind(&quote.tenant_id.0)
        .execute(&mut **tx)
        .await?;
    write_items(tx, quote).await?;
    Ok(true)
}

async fn write_items(
    tx: &mut Transaction<'_, Sqlite>,
    quote: &Quote,
) -> Result<(), RepositoryError> {
    for (position, item) in quote.items.iter().enumerate() {
        sqlx::query(
            "INSERT INTO quote_item (id, quote_id, tenant_id, position, product_id, product_name,
                                     category, quantity, unit_cost, unit_price, subtotal)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id.0)
        .bind(&quote.id.0)
        .bind(&quote.tenant_id.0)
        .bind(position as i64)
        .bind(item.product_id.as_ref().map(|product| product.0.as_str()))
        .bind(&item.product_name)
        .bind(item.category.as_deref())
        .bind(item.quantity.to_string())
        .bind(item.unit_cost.to_string())
        .bind(item.unit_price.to_string())
        .bind(item.subtotal.to_string())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn row_to_item(row: &SqliteRow) -> Result<QuoteItem, RepositoryError> {
    let id: String = column(row, "id")?;
    let product_id: Option<String> = column(row, "product_id")?;
    let quantity: String = column(row, "quantity")?;
    let unit_cost: String = column(row, "unit_cost")?;
    let unit_price: String = column(row, "unit_price")?;
    let subtotal: String = column(row, "subtotal")?;

    Ok(QuoteItem {
        id: QuoteItemId(id),
        product_id: product_id.map(ProductId),
        product_name: column(row, "product_name")?,
        category: column(row, "category")?,
        quantity: decode_decimal("quantity", &quantity)?,
        unit_cost: decode_decimal("unit_cost", &unit_cost)?,
        unit_price: decode_decimal("unit_price", &unit_price)?,
        subtotal: decode_decimal("subtotal", &subtotal)?,
    })
}

fn row_to_quote(row: &SqliteRow, items: Vec<QuoteItem>) -> Result<Quote, RepositoryError> {
    let kind: String = column(row, "kind")?;
    let status: String = column(row, "status")?;
    let customer_id: Option<String> = column(row, "customer_id")?;
    let bundle_id: Option<String> = column(row, "bundle_id")?;
    let total_amount: String = column(row, "total_amount")?;
    let discount_rate: String = column(row, "discount_rate")?;
    let discount_amount: String = column(row, "discount_amount")?;
    let final_amount: String = column(row, "final_amount")?;
    let created_at: String = column(row, "created_at")?;
    let updated_at: String = column(row, "updated_at")?;

    Ok(Quote {
        id: QuoteId(column(row, "id")?),
        quote_no: column(row, "quote_no")?,
        tenant_id: TenantId(column(row, "tenant_id")?),
        customer_id: customer_id.map(CustomerId),
        title: column(row, "title")?,
        kind: kind.parse().map_err(|error| RepositoryError::Decode(format!("kind: {error}")))?,
        bundle_id: bundle_id.map(QuoteId),
        root_quote_id: QuoteId(column(row, "root_quote_id")?),
        revision: decode_u32("revision", column(row, "revision")?)?,
        is_active: column(row, "is_active")?,
        items,
        total_amount: decode_decimal("total_amount", &total_amount)?,
        discount_rate: decode_decimal("discount_rate", &discount_rate)?,
        discount_amount: decode_decimal("discount_amount", &discount_amount)?,
        final_amount: decode_decimal("final_amount", &final_amount)?,
        status: status
            .parse()
            .map_err(|error| RepositoryError::Decode(format!("status: {error}")))?,
        valid_until: decode_optional_timestamp("valid_until", column(row, "valid_until")?)?,
        version: decode_u32("version", column(row, "version")?)?,
        submitted_by: column(row, "submitted_by")?,
        submitted_at: decode_optional_timestamp("submitted_at", column(row, "submitted_at")?)?,
        approved_by: column(row, "approved_by")?,
        approved_at: decode_optional_timestamp("approved_at", column(row, "approved_at")?)?,
        rejected_by: column(row, "rejected_by")?,
        reject_reason: column(row, "reject_reason")?,
        locked_at: decode_optional_timestamp("locked_at", column(row, "locked_at")?)?,
        created_by: column(row, "created_by")?,
        created_at: decode_timestamp("created_at", &created_at)?,
        updated_at: decode_timestamp("updated_at", &updated_at)?,
    })
}

#[async_trait]
impl QuoteStore for SqlQuoteStore {
    async fn find_quote(
        &self,
        tenant: &TenantId,
        id: &QuoteId,
    ) -> Result<Option<Quote>, StoreError> {
        Ok(self.fetch(tenant, id).await?)
    }

    async fn insert_quote(&self, quote: &Quote) -> Result<(), StoreError> {
        Ok(self.insert(quote).await?)
    }

    async fn update_quote(
        &self,
        quote: &Quote,
        expected_version: u32,
    ) -> Result<WriteOutcome, StoreError> {
        Ok(self.update(quote, expected_version).await?)
    }

    async fn replace_revision(
        &self,
        retired: &Quote,
        expected_version: u32,
        successor: &Quote,
    ) -> Result<WriteOutcome, StoreError> {
        Ok(self.replace(retired, expected_version, successor).await?)
    }

    async fn list_bundle_children(
        &self,
        tenant: &TenantId,
        bundle_id: &QuoteId,
    ) -> Result<Vec<Quote>, StoreError> {
        Ok(self.children(tenant, bundle_id).await?)
    }

    async fn list_expirable(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Quote>, StoreError> {
        Ok(self.expirable(tenant, now).await?)
    }
}
