use anyhow::Result;
use diesel::prelude::*;
use tracing::info;
use uuid::Uuid;

use crate::documents::{Document, NewDocument};
use crate::web::PgPool;

#[derive(Clone)]
pub struct DocumentsRepository {
    pool: PgPool,
}

impl DocumentsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, new_document: NewDocument) -> Result<Document> {
        use crate::schema::documents::dsl::*;

        let pool = self.pool.clone();
        let row = tokio::task::spawn_blocking(move || -> Result<Document> {
            let mut conn = pool.get()?;
            let row = diesel::insert_into(documents)
                .values(&new_document)
                .returning(Document::as_returning())
                .get_result(&mut conn)?;
            Ok(row)
        })
        .await??;

        info!(
            "Stored document {} ({}) for trip {}",
            row.id, row.document_type, row.trip_id
        );
        Ok(row)
    }

    pub async fn for_trip(
        &self,
        for_trip_id: Uuid,
        kind: Option<String>,
    ) -> Result<Vec<Document>> {
        use crate::schema::documents::dsl::*;

        let pool = self.pool.clone();
        let rows = tokio::task::spawn_blocking(move || -> Result<Vec<Document>> {
            let mut conn = pool.get()?;
            let mut query = documents.filter(trip_id.eq(for_trip_id)).into_boxed();
            if let Some(kind) = kind {
                query = query.filter(document_type.eq(kind));
            }
            let rows = query
                .order(uploaded_at.desc())
                .select(Document::as_select())
                .load(&mut conn)?;
            Ok(rows)
        })
        .await??;
        Ok(rows)
    }
}
