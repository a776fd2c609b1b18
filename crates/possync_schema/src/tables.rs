//! Built-in point-of-sale table catalog.

use crate::schema::{FieldKind, TableSchema};
use possync_protocol::SYNC_STATUS_FIELD;

/// Default sync order: referenced tables before the tables that reference them.
pub const POS_TABLES: &[&str] = &[
    "categories",
    "products",
    "clients",
    "suppliers",
    "sales",
    "sale_items",
    "payments",
    "expenses",
];

/// Columns every synchronized table carries.
fn synced(name: &str) -> TableSchema {
    TableSchema::new(name)
        .field("id", FieldKind::Id)
        .field("branch_id", FieldKind::OptionalText)
        .field("row_version", FieldKind::Number)
        .fields(&["created_date", "updated_date", "deleted_at"], FieldKind::Date)
        .field(SYNC_STATUS_FIELD, FieldKind::SyncStatus)
}

pub(crate) fn pos_schemas() -> Vec<TableSchema> {
    vec![
        synced("categories")
            .field("name", FieldKind::Text)
            .field("parent_id", FieldKind::OptionalText)
            .field("active", FieldKind::Flag),
        synced("products")
            .field("name", FieldKind::Text)
            .fields(&["sku", "barcode", "category_id", "image_url"], FieldKind::OptionalText)
            .fields(&["price", "cost", "stock", "min_stock", "tax_rate"], FieldKind::Number)
            .fields(&["active", "track_stock"], FieldKind::Flag)
            .field("attributes", FieldKind::Json),
        synced("clients")
            .field("name", FieldKind::Text)
            .fields(&["document", "email", "phone", "address"], FieldKind::OptionalText)
            .fields(&["credit_limit", "balance"], FieldKind::Number)
            .fields(&["approved", "active"], FieldKind::Flag)
            .field("metadata", FieldKind::Json),
        synced("suppliers")
            .field("name", FieldKind::Text)
            .fields(&["document", "email", "phone", "contact_name"], FieldKind::OptionalText)
            .field("active", FieldKind::Flag),
        synced("sales")
            .fields(&["number", "status"], FieldKind::Text)
            .fields(&["client_id", "user_id", "notes"], FieldKind::OptionalText)
            .fields(&["subtotal", "discount", "tax", "total"], FieldKind::Number)
            .field("voided", FieldKind::Flag)
            .field("sold_at", FieldKind::Date)
            .field("totals_breakdown", FieldKind::Json),
        synced("sale_items")
            .fields(&["sale_id", "product_id"], FieldKind::Text)
            .field("description", FieldKind::OptionalText)
            .fields(&["quantity", "unit_price", "discount", "total"], FieldKind::Number),
        synced("payments")
            .fields(&["sale_id", "method"], FieldKind::Text)
            .field("reference", FieldKind::OptionalText)
            .fields(&["amount", "change_given"], FieldKind::Number)
            .field("confirmed", FieldKind::Flag)
            .field("paid_at", FieldKind::Date)
            .field("gateway_response", FieldKind::Json),
        synced("expenses")
            .field("description", FieldKind::Text)
            .fields(&["category", "supplier_id"], FieldKind::OptionalText)
            .field("amount", FieldKind::Number)
            .field("approved", FieldKind::Flag)
            .field("spent_at", FieldKind::Date),
    ]
}
