//! Report export in CSV and JSON.
//!
//! The CSV shape is frozen for downstream consumers: a literal quoted
//! header, `;` separators, `"`-quoting with internal quotes doubled, and
//! `\n` terminators. JSON is an array of flat objects.

use crate::models::FileRecord;
use chrono::Local;
use serde_json::json;

const CSV_HEADER: &str = r#""Path";"Status";"Size";"Permissions";"Hash";"LastCheck""#;

/// `owner:group rwxrwxrwx`, with numeric ids when name resolution came up
/// empty.
pub fn permission_string(record: &FileRecord) -> String {
    let meta = &record.metadata;
    let owner = if meta.owner.is_empty() {
        meta.uid.to_string()
    } else {
        meta.owner.clone()
    };
    let group = if meta.group.is_empty() {
        meta.gid.to_string()
    } else {
        meta.group.clone()
    };

    let mut bits = String::with_capacity(9);
    for shift in (0..3).rev() {
        let triplet = (meta.permissions >> (shift * 3)) & 0o7;
        bits.push(if triplet & 0o4 != 0 { 'r' } else { '-' });
        bits.push(if triplet & 0o2 != 0 { 'w' } else { '-' });
        bits.push(if triplet & 0o1 != 0 { 'x' } else { '-' });
    }

    format!("{owner}:{group} {bits}")
}

fn last_check_local(record: &FileRecord) -> String {
    record
        .updated_at
        .with_timezone(&Local)
        .format("%Y-%m-%dT%H:%M:%S")
        .to_string()
}

pub fn to_csv(records: &[FileRecord]) -> String {
    let quote = |value: &str| format!("\"{}\"", value.replace('"', "\"\""));

    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for record in records {
        let line = [
            quote(&record.metadata.path),
            quote(record.status.as_str()),
            quote(&record.metadata.size.to_string()),
            quote(&permission_string(record)),
            quote(&record.metadata.hash),
            quote(&last_check_local(record)),
        ]
        .join(";");
        out.push_str(&line);
        out.push('\n');
    }
    out
}

pub fn to_json(records: &[FileRecord]) -> serde_json::Result<String> {
    let rows: Vec<serde_json::Value> = records
        .iter()
        .map(|record| {
            json!({
                "path": record.metadata.path,
                "status": record.status.as_str(),
                "size": record.metadata.size,
                "permissions": permission_string(record),
                "hash": record.metadata.hash,
                "lastCheck": last_check_local(record),
            })
        })
        .collect();
    serde_json::to_string_pretty(&rows)
}
