use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{format_datetime, parse_datetime},
    models::{CategoryKind, TimelineCategory},
};

fn row_to_category(row: &Row) -> Result<TimelineCategory> {
    let created_at: String = row.get("created_at")?;

    Ok(TimelineCategory {
        id: row.get("id")?,
        name: row.get("name")?,
        color: row.get("color")?,
        icon: row.get("icon")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

/// Seeds the default categories when the table is empty. Returns how many rows
/// were inserted.
fn seed_defaults(conn: &Connection) -> Result<usize> {
    let count: i64 =
        conn.query_row("SELECT COUNT(*) FROM timeline_categories", [], |row| row.get(0))?;
    if count > 0 {
        return Ok(0);
    }

    let now = format_datetime(&Utc::now());
    let mut inserted = 0;
    for kind in CategoryKind::DEFAULTS {
        inserted += conn.execute(
            "INSERT OR IGNORE INTO timeline_categories (name, color, icon, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![kind.as_str(), kind.default_color(), kind.default_icon(), now],
        )?;
    }
    Ok(inserted)
}

impl Database {
    pub async fn ensure_default_categories(&self) -> Result<usize> {
        self.execute(|conn| seed_defaults(conn)).await
    }

    pub async fn list_categories(&self) -> Result<Vec<TimelineCategory>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, color, icon, created_at
                 FROM timeline_categories
                 ORDER BY id ASC",
            )?;

            let mut rows = stmt.query([])?;
            let mut categories = Vec::new();
            while let Some(row) = rows.next()? {
                categories.push(row_to_category(row)?);
            }
            Ok(categories)
        })
        .await
    }

    pub async fn create_category(
        &self,
        name: String,
        color: String,
        icon: Option<String>,
    ) -> Result<TimelineCategory> {
        let name = name.trim().to_string();
        if name.is_empty() {
            bail!("category name must not be empty");
        }

        self.execute(move |conn| {
            let now = Utc::now();
            conn.execute(
                "INSERT INTO timeline_categories (name, color, icon, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, color, icon, format_datetime(&now)],
            )
            .with_context(|| format!("failed to create category {name}"))?;

            let mut stmt = conn.prepare(
                "SELECT id, name, color, icon, created_at
                 FROM timeline_categories
                 WHERE id = ?1",
            )?;
            let mut rows = stmt.query(params![conn.last_insert_rowid()])?;
            match rows.next()? {
                Some(row) => row_to_category(row),
                None => Err(anyhow!("Category not found after insert")),
            }
        })
        .await
    }

    /// Looks up the row for a canonical category, seeding the defaults first
    /// if the table has never been populated. `Other` resolves to `None`
    /// unless a category with that name has been created explicitly.
    pub async fn resolve_category(&self, kind: CategoryKind) -> Result<Option<i64>> {
        self.execute(move |conn| {
            seed_defaults(conn)?;
            let id = conn
                .query_row(
                    "SELECT id FROM timeline_categories WHERE name = ?1",
                    params![kind.as_str()],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            Ok(id)
        })
        .await
    }

    /// Removes a category. Its activities keep their history and become
    /// uncategorized. Returns the number of activities that were detached.
    pub async fn delete_category(&self, category_id: i64) -> Result<usize> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            let detached = tx.execute(
                "UPDATE timeline_activities
                 SET category_id = NULL, updated_at = ?1
                 WHERE category_id = ?2",
                params![format_datetime(&Utc::now()), category_id],
            )?;

            let rows_affected = tx.execute(
                "DELETE FROM timeline_categories WHERE id = ?1",
                params![category_id],
            )?;
            if rows_affected == 0 {
                return Err(anyhow!("Category {category_id} not found"));
            }

            tx.commit().context("failed to commit category deletion")?;
            Ok(detached)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn resolve_seeds_defaults_once() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("dayflow.db")).unwrap();

        let work = db.resolve_category(CategoryKind::Work).await.unwrap();
        assert!(work.is_some());
        assert_eq!(db.list_categories().await.unwrap().len(), 6);
        assert_eq!(db.ensure_default_categories().await.unwrap(), 0);

        assert_eq!(db.resolve_category(CategoryKind::Other).await.unwrap(), None);

        let other = db
            .create_category("Other".into(), "#9E9E9E".into(), None)
            .await
            .unwrap();
        assert_eq!(
            db.resolve_category(CategoryKind::Other).await.unwrap(),
            Some(other.id)
        );
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("dayflow.db")).unwrap();
        db.ensure_default_categories().await.unwrap();

        assert!(db
            .create_category("Work".into(), "#000000".into(), None)
            .await
            .is_err());
        assert!(db
            .create_category("   ".into(), "#000000".into(), None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn deleting_unknown_category_fails() {
        let dir = TempDir::new().unwrap();
        let db = Database::new(dir.path().join("dayflow.db")).unwrap();
        assert!(db.delete_category(999).await.is_err());
    }
}
