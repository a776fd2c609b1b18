//! Product image state in the local datastore.

use super::{ImageTask, IMAGE_LOCAL_FIELD, IMAGE_URL_FIELD};
use async_trait::async_trait;
use possync_engine::{MemoryStore, SyncResult, SyncStore};
use possync_protocol::{row_id, Row};
use serde_json::Value;
use std::sync::Arc;

const PRODUCTS: &str = "products";

/// Datastore operations used by image sync.
#[async_trait]
pub trait ImageCatalog: Send + Sync {
    /// Returns one task per product carrying a remote image URL.
    async fn image_tasks(&self) -> SyncResult<Vec<ImageTask>>;

    /// Records the local filename of a product image.
    async fn set_local_image(&self, product_id: &str, filename: &str) -> SyncResult<()>;
}

#[async_trait]
impl<T: ImageCatalog + ?Sized> ImageCatalog for Arc<T> {
    async fn image_tasks(&self) -> SyncResult<Vec<ImageTask>> {
        (**self).image_tasks().await
    }

    async fn set_local_image(&self, product_id: &str, filename: &str) -> SyncResult<()> {
        (**self).set_local_image(product_id, filename).await
    }
}

fn non_empty<'a>(row: &'a Row, field: &str) -> Option<&'a str> {
    row.get(field)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Builds the image task of a product row, if it has a remote image.
pub(crate) fn task_for(row: &Row) -> Option<ImageTask> {
    Some(ImageTask {
        product_id: row_id(row)?,
        remote_url: non_empty(row, IMAGE_URL_FIELD)?.to_string(),
        existing_filename: non_empty(row, IMAGE_LOCAL_FIELD).map(str::to_string),
    })
}

#[async_trait]
impl ImageCatalog for MemoryStore {
    async fn image_tasks(&self) -> SyncResult<Vec<ImageTask>> {
        Ok(self
            .rows(PRODUCTS)
            .iter()
            .filter_map(|stored| task_for(&stored.row))
            .collect())
    }

    /// Merges the filename into the product without touching its sync flag.
    async fn set_local_image(&self, product_id: &str, filename: &str) -> SyncResult<()> {
        let mut row = Row::new();
        row.insert("id".into(), Value::String(product_id.to_string()));
        row.insert(IMAGE_LOCAL_FIELD.into(), Value::String(filename.to_string()));
        self.upsert(PRODUCTS, row).await
    }
}
