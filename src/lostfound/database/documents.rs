use chrono::{DateTime, Utc};
use serde_json::Value;

use super::{Database, DatabaseError, utils::parse_timestamp};
use crate::lostfound::document_store::{
    ChangeNotice, Direction, Document, DocumentPath, OrderBy, StoreError, Write, apply_write,
};

type Result<T> = std::result::Result<T, DatabaseError>;

#[derive(Debug)]
struct DocumentRow {
    collection: String,
    document_id: String,
    data: Value,
    #[allow(dead_code)]
    updated_at: DateTime<Utc>,
}

impl<'r, R> sqlx::FromRow<'r, R> for DocumentRow
where
    R: sqlx::Row,
    &'r str: sqlx::ColumnIndex<R>,
    String: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
    i64: sqlx::Decode<'r, R::Database> + sqlx::Type<R::Database>,
{
    fn from_row(row: &'r R) -> std::result::Result<Self, sqlx::Error> {
        let data_str: String = row.try_get("data")?;
        let data = serde_json::from_str(&data_str).map_err(|e| sqlx::Error::ColumnDecode {
            index: "data".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            collection: row.try_get("collection")?,
            document_id: row.try_get("document_id")?,
            data,
            updated_at: parse_timestamp(row, "updated_at")?,
        })
    }
}

impl DocumentRow {
    fn into_document(self) -> Document {
        Document {
            path: DocumentPath::new(self.collection, self.document_id),
            data: self.data,
        }
    }
}

impl Database {
    pub(crate) async fn find_document(&self, path: &DocumentPath) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT * FROM documents WHERE collection = ? AND document_id = ?",
        )
        .bind(path.collection())
        .bind(path.id())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(DocumentRow::into_document))
    }

    pub(crate) async fn find_documents(
        &self,
        collection: &str,
        order: Option<&OrderBy>,
    ) -> Result<Vec<Document>> {
        let rows = match order {
            None => {
                sqlx::query_as::<_, DocumentRow>(
                    "SELECT * FROM documents WHERE collection = ? ORDER BY document_id ASC",
                )
                .bind(collection)
                .fetch_all(&self.pool)
                .await?
            }
            Some(order) => {
                let direction = match order.direction {
                    Direction::Ascending => "ASC",
                    Direction::Descending => "DESC",
                };
                let sql = format!(
                    "SELECT * FROM documents WHERE collection = ? \
                     ORDER BY json_extract(data, ?) {direction}, document_id {direction}"
                );
                sqlx::query_as::<_, DocumentRow>(&sql)
                    .bind(collection)
                    .bind(format!("$.{}", order.field))
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        Ok(rows.into_iter().map(DocumentRow::into_document).collect())
    }

    /// Applies a batch of writes in one transaction and returns a notice per touched document.
    pub(crate) async fn commit_writes(
        &self,
        writes: &[Write],
    ) -> std::result::Result<Vec<ChangeNotice>, StoreError> {
        // Take the write lock up front; a deferred transaction that reads first
        // cannot upgrade once another writer has committed
        let mut txn = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(DatabaseError::from)?;
        let mut touched: Vec<DocumentPath> = Vec::new();
        let now = Utc::now().timestamp_millis();

        for write in writes {
            let path = write.path();
            let current: Option<(String,)> = sqlx::query_as(
                "SELECT data FROM documents WHERE collection = ? AND document_id = ?",
            )
            .bind(path.collection())
            .bind(path.id())
            .fetch_optional(&mut *txn)
            .await
            .map_err(DatabaseError::from)?;

            let current = current
                .map(|(data,)| serde_json::from_str::<Value>(&data))
                .transpose()?;
            let next = apply_write(current, write)?;

            sqlx::query(
                "INSERT INTO documents (collection, document_id, data, updated_at) VALUES (?, ?, ?, ?)
                 ON CONFLICT(collection, document_id) DO UPDATE SET
                    data = excluded.data,
                    updated_at = excluded.updated_at",
            )
            .bind(path.collection())
            .bind(path.id())
            .bind(next.to_string())
            .bind(now)
            .execute(&mut *txn)
            .await
            .map_err(DatabaseError::from)?;

            if !touched.contains(path) {
                touched.push(path.clone());
            }
        }

        // Dropping the transaction without commit rolls back on any error above
        txn.commit().await.map_err(DatabaseError::from)?;

        Ok(touched.iter().map(ChangeNotice::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn create_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::new(temp_dir.path().join("test.db"))
            .await
            .expect("Failed to create test database");
        (db, temp_dir)
    }

    #[tokio::test]
    async fn test_commit_and_find_document() {
        let (db, _temp_dir) = create_test_db().await;
        let path = DocumentPath::new("items", "i1");

        let notices = db
            .commit_writes(&[Write::Set {
                path: path.clone(),
                data: json!({"title": "Wallet"}),
            }])
            .await
            .unwrap();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].collection, "items");

        let doc = db.find_document(&path).await.unwrap().unwrap();
        assert_eq!(doc.data, json!({"title": "Wallet"}));
        assert!(
            db.find_document(&DocumentPath::new("items", "missing"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_find_documents_ordered_by_json_field() {
        let (db, _temp_dir) = create_test_db().await;

        db.commit_writes(&[
            Write::Set {
                path: DocumentPath::new("chats/a_b/messages", "m2"),
                data: json!({"sent_at": 200}),
            },
            Write::Set {
                path: DocumentPath::new("chats/a_b/messages", "m1"),
                data: json!({"sent_at": 100}),
            },
            Write::Set {
                path: DocumentPath::new("chats/a_c/messages", "other"),
                data: json!({"sent_at": 50}),
            },
        ])
        .await
        .unwrap();

        let docs = db
            .find_documents("chats/a_b/messages", Some(&OrderBy::ascending("sent_at")))
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.path.id()).collect();
        assert_eq!(ids, vec!["m1", "m2"]);

        let docs = db
            .find_documents("chats/a_b/messages", Some(&OrderBy::descending("sent_at")))
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.path.id()).collect();
        assert_eq!(ids, vec!["m2", "m1"]);
    }

    #[tokio::test]
    async fn test_failed_batch_is_rolled_back() {
        let (db, _temp_dir) = create_test_db().await;
        let bad = DocumentPath::new("users/b/partners", "a");
        db.commit_writes(&[Write::Set {
            path: bad.clone(),
            data: json!({"unread_count": "not a number"}),
        }])
        .await
        .unwrap();

        let good = DocumentPath::new("users/a/partners", "b");
        let result = db
            .commit_writes(&[
                Write::Set {
                    path: good.clone(),
                    data: json!({"last_message": "hi"}),
                },
                Write::Increment {
                    path: bad,
                    field: "unread_count".to_string(),
                    delta: 1,
                },
            ])
            .await;

        assert!(matches!(result, Err(StoreError::InvalidField { .. })));
        assert!(db.find_document(&good).await.unwrap().is_none());
    }
}
