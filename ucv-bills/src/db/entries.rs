//! Consumption entry persistence
//!
//! All JSON payloads (tamper reasons, extraction and verifier responses) are
//! stored as TEXT. Dates are ISO `YYYY-MM-DD`, timestamps RFC 3339.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashSet;
use uuid::Uuid;
use ucv_common::{Error, Result};

use crate::models::{ConsumptionEntry, DataSource, VerificationStatus};

const SELECT_COLUMNS: &str = r#"
    SELECT entry_id, owner_id, data_source,
           billing_amount, billing_date, units_consumed, due_date,
           biller_name, biller_category, bill_number, consumer_number,
           extraction_confidence, extraction_raw,
           content_hash, document_url, file_mime_type, file_size,
           is_imputed, is_tampered, tamper_reasons, tamper_reason,
           verification_status, verification_source, verification_confidence,
           verified_by, verifier_response, created_at
    FROM consumption_entries
"#;

/// Filters for [`search_entries`]; absent filters match everything
#[derive(Debug, Clone, Default)]
pub struct EntrySearch {
    pub owner_id: Option<Uuid>,
    pub data_source: Option<DataSource>,
    pub status: Option<VerificationStatus>,
}

/// Insert a new entry
pub async fn save_entry(pool: &SqlitePool, entry: &ConsumptionEntry) -> Result<()> {
    let tamper_reasons = to_json_text(&entry.tamper_reasons)?;
    let extraction_raw = entry.extraction_raw.as_ref().map(to_json_text).transpose()?;
    let verifier_response = entry.verifier_response.as_ref().map(to_json_text).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO consumption_entries (
            entry_id, owner_id, data_source,
            billing_amount, billing_date, units_consumed, due_date,
            biller_name, biller_category, bill_number, consumer_number,
            extraction_confidence, extraction_raw,
            content_hash, document_url, file_mime_type, file_size,
            is_imputed, is_tampered, tamper_reasons, tamper_reason,
            verification_status, verification_source, verification_confidence,
            verified_by, verifier_response, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.entry_id.to_string())
    .bind(entry.owner_id.to_string())
    .bind(entry.data_source.as_str())
    .bind(entry.billing_amount)
    .bind(entry.billing_date.map(format_date))
    .bind(entry.units_consumed)
    .bind(entry.due_date.map(format_date))
    .bind(&entry.biller_name)
    .bind(&entry.biller_category)
    .bind(&entry.bill_number)
    .bind(&entry.consumer_number)
    .bind(entry.extraction_confidence)
    .bind(extraction_raw)
    .bind(&entry.content_hash)
    .bind(&entry.document_url)
    .bind(&entry.file_mime_type)
    .bind(entry.file_size)
    .bind(entry.is_imputed)
    .bind(entry.is_tampered)
    .bind(tamper_reasons)
    .bind(&entry.tamper_reason)
    .bind(entry.verification_status.as_str())
    .bind(entry.verification_source.as_str())
    .bind(entry.verification_confidence)
    .bind(entry.verified_by.map(|id| id.to_string()))
    .bind(verifier_response)
    .bind(entry.created_at.to_rfc3339())
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one entry
pub async fn load_entry(pool: &SqlitePool, entry_id: Uuid) -> Result<Option<ConsumptionEntry>> {
    let row = sqlx::query(&format!("{} WHERE entry_id = ?", SELECT_COLUMNS))
        .bind(entry_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.as_ref().map(row_to_entry).transpose()
}

/// All entries of one owner, most recent first
pub async fn load_entries_by_owner(pool: &SqlitePool, owner_id: Uuid) -> Result<Vec<ConsumptionEntry>> {
    let rows = sqlx::query(&format!(
        "{} WHERE owner_id = ? ORDER BY created_at DESC",
        SELECT_COLUMNS
    ))
    .bind(owner_id.to_string())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

/// Owner entries whose billing date falls in `[start, end]` (inclusive)
pub async fn load_entries_by_owner_between(
    pool: &SqlitePool,
    owner_id: Uuid,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<ConsumptionEntry>> {
    let rows = sqlx::query(&format!(
        "{} WHERE owner_id = ? AND billing_date BETWEEN ? AND ? ORDER BY billing_date DESC",
        SELECT_COLUMNS
    ))
    .bind(owner_id.to_string())
    .bind(format_date(start))
    .bind(format_date(end))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

/// All entries in the given status, oldest first
pub async fn load_entries_by_status(
    pool: &SqlitePool,
    status: VerificationStatus,
) -> Result<Vec<ConsumptionEntry>> {
    let rows = sqlx::query(&format!(
        "{} WHERE verification_status = ? ORDER BY created_at ASC",
        SELECT_COLUMNS
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

/// All entries flagged as tampered, most recent first
pub async fn load_tampered_entries(pool: &SqlitePool) -> Result<Vec<ConsumptionEntry>> {
    let rows = sqlx::query(&format!(
        "{} WHERE is_tampered = 1 ORDER BY created_at DESC",
        SELECT_COLUMNS
    ))
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_entry).collect()
}

/// Entries matching every present filter
pub async fn search_entries(pool: &SqlitePool, search: &EntrySearch) -> Result<Vec<ConsumptionEntry>> {
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_COLUMNS);
    builder.push(" WHERE 1 = 1");

    if let Some(owner_id) = search.owner_id {
        builder.push(" AND owner_id = ").push_bind(owner_id.to_string());
    }
    if let Some(data_source) = search.data_source {
        builder.push(" AND data_source = ").push_bind(data_source.as_str());
    }
    if let Some(status) = search.status {
        builder.push(" AND verification_status = ").push_bind(status.as_str());
    }
    builder.push(" ORDER BY created_at DESC");

    let rows = builder.build().fetch_all(pool).await?;
    rows.iter().map(row_to_entry).collect()
}

/// Entry id of an existing entry with this owner and content hash
pub async fn find_by_owner_and_hash(
    pool: &SqlitePool,
    owner_id: Uuid,
    content_hash: &str,
) -> Result<Option<Uuid>> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT entry_id FROM consumption_entries WHERE owner_id = ? AND content_hash = ? LIMIT 1",
    )
    .bind(owner_id.to_string())
    .bind(content_hash)
    .fetch_optional(pool)
    .await?;

    row.map(|(id,)| parse_uuid(&id, "entry_id")).transpose()
}

/// Every content hash stored for an owner
pub async fn load_owner_hashes(pool: &SqlitePool, owner_id: Uuid) -> Result<HashSet<String>> {
    let hashes: Vec<String> =
        sqlx::query_scalar("SELECT content_hash FROM consumption_entries WHERE owner_id = ?")
            .bind(owner_id.to_string())
            .fetch_all(pool)
            .await?;

    Ok(hashes.into_iter().collect())
}

/// Overwrite the mutable columns of an entry
///
/// Used by manual review, which may change terminal entries.
pub async fn update_entry(pool: &SqlitePool, entry: &ConsumptionEntry) -> Result<bool> {
    execute_update(pool, entry, false).await
}

/// Overwrite the mutable columns unless the stored entry is already terminal
///
/// Returns `false` when nothing was written.
pub async fn update_entry_unless_terminal(pool: &SqlitePool, entry: &ConsumptionEntry) -> Result<bool> {
    execute_update(pool, entry, true).await
}

async fn execute_update(pool: &SqlitePool, entry: &ConsumptionEntry, guard_terminal: bool) -> Result<bool> {
    let tamper_reasons = to_json_text(&entry.tamper_reasons)?;
    let extraction_raw = entry.extraction_raw.as_ref().map(to_json_text).transpose()?;
    let verifier_response = entry.verifier_response.as_ref().map(to_json_text).transpose()?;

    let mut sql = String::from(
        r#"
        UPDATE consumption_entries SET
            billing_amount = ?, billing_date = ?, units_consumed = ?, due_date = ?,
            biller_name = ?, biller_category = ?, bill_number = ?, consumer_number = ?,
            extraction_confidence = ?, extraction_raw = ?,
            is_tampered = ?, tamper_reasons = ?, tamper_reason = ?,
            verification_status = ?, verification_source = ?, verification_confidence = ?,
            verified_by = ?, verifier_response = ?
        WHERE entry_id = ?
        "#,
    );
    if guard_terminal {
        sql.push_str(" AND verification_status NOT IN ('VERIFIED', 'REJECTED')");
    }

    let result = sqlx::query(&sql)
        .bind(entry.billing_amount)
        .bind(entry.billing_date.map(format_date))
        .bind(entry.units_consumed)
        .bind(entry.due_date.map(format_date))
        .bind(&entry.biller_name)
        .bind(&entry.biller_category)
        .bind(&entry.bill_number)
        .bind(&entry.consumer_number)
        .bind(entry.extraction_confidence)
        .bind(extraction_raw)
        .bind(entry.is_tampered)
        .bind(tamper_reasons)
        .bind(&entry.tamper_reason)
        .bind(entry.verification_status.as_str())
        .bind(entry.verification_source.as_str())
        .bind(entry.verification_confidence)
        .bind(entry.verified_by.map(|id| id.to_string()))
        .bind(verifier_response)
        .bind(entry.entry_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Delete an entry; returns whether a row existed
pub async fn delete_entry(pool: &SqlitePool, entry_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM consumption_entries WHERE entry_id = ?")
        .bind(entry_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

fn row_to_entry(row: &SqliteRow) -> Result<ConsumptionEntry> {
    let entry_id: String = row.get("entry_id");
    let owner_id: String = row.get("owner_id");
    let data_source: String = row.get("data_source");
    let status: String = row.get("verification_status");
    let source: String = row.get("verification_source");
    let tamper_reasons: String = row.get("tamper_reasons");
    let extraction_raw: Option<String> = row.get("extraction_raw");
    let verifier_response: Option<String> = row.get("verifier_response");
    let verified_by: Option<String> = row.get("verified_by");
    let billing_date: Option<String> = row.get("billing_date");
    let due_date: Option<String> = row.get("due_date");
    let created_at: String = row.get("created_at");

    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?
        .with_timezone(&Utc);

    Ok(ConsumptionEntry {
        entry_id: parse_uuid(&entry_id, "entry_id")?,
        owner_id: parse_uuid(&owner_id, "owner_id")?,
        data_source: data_source.parse().map_err(corrupt_row)?,
        billing_amount: row.get("billing_amount"),
        billing_date: billing_date.as_deref().map(parse_date).transpose()?,
        units_consumed: row.get("units_consumed"),
        due_date: due_date.as_deref().map(parse_date).transpose()?,
        biller_name: row.get("biller_name"),
        biller_category: row.get("biller_category"),
        bill_number: row.get("bill_number"),
        consumer_number: row.get("consumer_number"),
        extraction_confidence: row.get("extraction_confidence"),
        extraction_raw: extraction_raw.as_deref().map(from_json_text).transpose()?,
        content_hash: row.get("content_hash"),
        document_url: row.get("document_url"),
        file_mime_type: row.get("file_mime_type"),
        file_size: row.get("file_size"),
        is_imputed: row.get("is_imputed"),
        is_tampered: row.get("is_tampered"),
        tamper_reasons: from_json_text(&tamper_reasons)?,
        tamper_reason: row.get("tamper_reason"),
        verification_status: status.parse().map_err(corrupt_row)?,
        verification_source: source.parse().map_err(corrupt_row)?,
        verification_confidence: row.get("verification_confidence"),
        verified_by: verified_by
            .as_deref()
            .map(|id| parse_uuid(id, "verified_by"))
            .transpose()?,
        verifier_response: verifier_response.as_deref().map(from_json_text).transpose()?,
        created_at,
    })
}

fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| Error::Internal(format!("Invalid date in database '{}': {}", s, e)))
}

fn parse_uuid(s: &str, column: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Invalid UUID in {}: {}", column, e)))
}

fn corrupt_row(e: Error) -> Error {
    Error::Internal(format!("Corrupt consumption entry row: {}", e))
}

fn to_json_text<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| Error::Internal(format!("Failed to serialize JSON: {}", e)))
}

fn from_json_text<T: serde::de::DeserializeOwned>(text: &str) -> Result<T> {
    serde_json::from_str(text).map_err(|e| Error::Internal(format!("Failed to deserialize JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerificationSource;
    use ucv_common::db::init_in_memory_database;

    fn sample_entry(owner_id: Uuid, hash: &str) -> ConsumptionEntry {
        let mut entry = ConsumptionEntry::new(owner_id, DataSource::Electricity, hash.to_string());
        entry.billing_amount = Some(1250.75);
        entry.billing_date = NaiveDate::from_ymd_opt(2026, 9, 1);
        entry.document_url = Some("file:///tmp/bill.pdf".to_string());
        entry.file_mime_type = Some("application/pdf".to_string());
        entry.file_size = Some(2048);
        entry
    }

    #[tokio::test]
    async fn test_save_and_load_round_trip() {
        let pool = init_in_memory_database().await.unwrap();
        let mut entry = sample_entry(Uuid::new_v4(), "hash-a");
        entry.extraction_raw = Some(serde_json::json!({"raw_text": "TOTAL 1250.75"}));

        save_entry(&pool, &entry).await.unwrap();
        let loaded = load_entry(&pool, entry.entry_id).await.unwrap().unwrap();

        assert_eq!(loaded.entry_id, entry.entry_id);
        assert_eq!(loaded.billing_amount, Some(1250.75));
        assert_eq!(loaded.billing_date, entry.billing_date);
        assert_eq!(loaded.extraction_raw, entry.extraction_raw);
        assert_eq!(loaded.verification_status, VerificationStatus::Pending);
        assert_eq!(loaded.verification_source, VerificationSource::None);
        assert!(loaded.tamper_reasons.is_empty());
        // RFC 3339 keeps sub-second precision
        assert_eq!(loaded.created_at, entry.created_at);
    }

    #[tokio::test]
    async fn test_load_missing_entry() {
        let pool = init_in_memory_database().await.unwrap();
        assert!(load_entry(&pool, Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conditional_update_skips_terminal_entries() {
        let pool = init_in_memory_database().await.unwrap();
        let mut entry = sample_entry(Uuid::new_v4(), "hash-b");
        save_entry(&pool, &entry).await.unwrap();

        entry.mark_tampered(VerificationSource::AggregatorMock, 50.0, vec!["Amount is suspiciously low".into()]);
        assert!(update_entry_unless_terminal(&pool, &entry).await.unwrap());

        let mut again = entry.clone();
        again.mark_verified(VerificationSource::AggregatorMock, 100.0);
        assert!(!update_entry_unless_terminal(&pool, &again).await.unwrap());

        let stored = load_entry(&pool, entry.entry_id).await.unwrap().unwrap();
        assert_eq!(stored.verification_status, VerificationStatus::Rejected);
        assert_eq!(stored.tamper_reasons, vec!["Amount is suspiciously low".to_string()]);

        // Manual path ignores the guard
        assert!(update_entry(&pool, &again).await.unwrap());
        let stored = load_entry(&pool, entry.entry_id).await.unwrap().unwrap();
        assert_eq!(stored.verification_status, VerificationStatus::Verified);
    }

    #[tokio::test]
    async fn test_owner_hash_lookup() {
        let pool = init_in_memory_database().await.unwrap();
        let owner = Uuid::new_v4();
        let other = Uuid::new_v4();
        let entry = sample_entry(owner, "shared-hash");
        save_entry(&pool, &entry).await.unwrap();

        assert_eq!(
            find_by_owner_and_hash(&pool, owner, "shared-hash").await.unwrap(),
            Some(entry.entry_id)
        );
        assert_eq!(find_by_owner_and_hash(&pool, other, "shared-hash").await.unwrap(), None);

        let hashes = load_owner_hashes(&pool, owner).await.unwrap();
        assert!(hashes.contains("shared-hash"));
        assert!(load_owner_hashes(&pool, other).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_combines_filters() {
        let pool = init_in_memory_database().await.unwrap();
        let owner = Uuid::new_v4();

        let electricity = sample_entry(owner, "h1");
        let mut water = sample_entry(owner, "h2");
        water.data_source = DataSource::Water;
        let mut rejected = sample_entry(Uuid::new_v4(), "h3");
        rejected.mark_tampered(VerificationSource::AggregatorMock, 0.0, vec!["x".into()]);

        for entry in [&electricity, &water, &rejected] {
            save_entry(&pool, entry).await.unwrap();
        }

        let all = search_entries(&pool, &EntrySearch::default()).await.unwrap();
        assert_eq!(all.len(), 3);

        let owner_water = search_entries(
            &pool,
            &EntrySearch {
                owner_id: Some(owner),
                data_source: Some(DataSource::Water),
                status: None,
            },
        )
        .await
        .unwrap();
        assert_eq!(owner_water.len(), 1);
        assert_eq!(owner_water[0].entry_id, water.entry_id);

        let rejected_only = load_entries_by_status(&pool, VerificationStatus::Rejected).await.unwrap();
        assert_eq!(rejected_only.len(), 1);
        assert_eq!(load_tampered_entries(&pool).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_date_range_and_delete() {
        let pool = init_in_memory_database().await.unwrap();
        let owner = Uuid::new_v4();
        let mut august = sample_entry(owner, "aug");
        august.billing_date = NaiveDate::from_ymd_opt(2026, 8, 15);
        let september = sample_entry(owner, "sep");
        save_entry(&pool, &august).await.unwrap();
        save_entry(&pool, &september).await.unwrap();

        let in_august = load_entries_by_owner_between(
            &pool,
            owner,
            NaiveDate::from_ymd_opt(2026, 8, 1).unwrap(),
            NaiveDate::from_ymd_opt(2026, 8, 31).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(in_august.len(), 1);
        assert_eq!(in_august[0].entry_id, august.entry_id);

        assert!(delete_entry(&pool, august.entry_id).await.unwrap());
        assert!(!delete_entry(&pool, august.entry_id).await.unwrap());
        assert_eq!(load_entries_by_owner(&pool, owner).await.unwrap().len(), 1);
    }
}
