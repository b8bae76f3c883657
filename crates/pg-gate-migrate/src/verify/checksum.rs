//! Order-independent table checksum.
//!
//! Each row renders as the concatenation of its column values in column
//! order, NULL as the literal `NULL`. Row strings are sorted bytewise and
//! MD5 is taken over their concatenation, so the digest does not depend on
//! physical row order or on either server's collation.

use crate::connection::{Row, SqlValue};

const NULL_TOKEN: &str = "NULL";

/// Render one row as its checksum string.
pub fn row_string(row: &[SqlValue]) -> String {
    let mut out = String::new();
    for value in row {
        out.push_str(value.as_text().unwrap_or(NULL_TOKEN));
    }
    out
}

/// MD5 hex digest over the sorted row strings.
pub fn checksum_rows(rows: &[Row]) -> String {
    let mut strings: Vec<String> = rows.iter().map(|r| row_string(r)).collect();
    strings.sort_unstable();

    let mut ctx = md5::Context::new();
    for s in &strings {
        ctx.consume(s.as_bytes());
    }
    format!("{:x}", ctx.finalize())
}
