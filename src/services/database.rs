use anyhow::Result;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use crate::models::CachedProduct;

/// Local product cache: previously-resolved products stored by the rest of
/// the platform. The pipeline only ever reads from it at request time;
/// population happens asynchronously elsewhere.
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        let db = Database { pool };
        db.init_tables().await?;
        Ok(db)
    }

    async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cached_products (
                id SERIAL PRIMARY KEY,
                name TEXT NOT NULL,
                brand TEXT,
                protein_100g DOUBLE PRECISION NOT NULL,
                calories_100g DOUBLE PRECISION NOT NULL,
                carbs_100g DOUBLE PRECISION,
                fat_100g DOUBLE PRECISION,
                fiber_100g DOUBLE PRECISION,
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Text-similarity lookup: substring match in either direction, best
    /// (closest-length) candidate first. Good enough to catch repeated
    /// descriptions of the same product without a remote round trip.
    pub async fn find_similar_product(&self, query: &str) -> Result<Option<CachedProduct>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            SELECT name, brand, protein_100g, calories_100g,
                   carbs_100g, fat_100g, fiber_100g, created_at
            FROM cached_products
            WHERE LOWER(name) LIKE '%' || $1 || '%'
               OR $1 LIKE '%' || LOWER(name) || '%'
            ORDER BY ABS(LENGTH(name) - LENGTH($1))
            LIMIT 1
            "#,
        )
        .bind(&needle)
        .fetch_optional(&self.pool)
        .await?;

        let product = row.map(|row| CachedProduct {
            name: row.get(0),
            brand: row.get(1),
            protein_100g: row.get(2),
            calories_100g: row.get(3),
            carbs_100g: row.get(4),
            fat_100g: row.get(5),
            fiber_100g: row.get(6),
            created_at: row.get(7),
        });

        if let Some(p) = &product {
            log::info!("💾 Cache hit for '{}': {}", query, p.name);
        } else {
            log::debug!("💾 Cache miss for '{}'", query);
        }

        Ok(product)
    }
}
