// SPDX-License-Identifier: Apache-2.0

//! MySQL identifier quoting

/// Writes `identifier` into `out` in the form "`foo`".
///
/// Every backtick byte is doubled. The input is walked byte by byte so
/// multi-byte sequences pass through untouched whatever their encoding.
pub fn write_mysql_identifier(out: &mut Vec<u8>, identifier: &[u8]) {
    out.reserve(identifier.len() + 2);
    out.push(b'`');
    for &b in identifier {
        if b == b'`' {
            out.extend_from_slice(b"``");
        } else {
            out.push(b);
        }
    }
    out.push(b'`');
}

/// Quotes a single schema or table name.
pub fn escape_identifier(identifier: &str) -> String {
    let mut out = Vec::with_capacity(identifier.len() + 2);
    write_mysql_identifier(&mut out, identifier.as_bytes());
    into_string(out)
}

/// Returns the fully qualified "`schema`.`table`" name.
pub fn unique_table(schema: &str, table: &str) -> String {
    let mut out = Vec::with_capacity(schema.len() + table.len() + 5);
    write_mysql_identifier(&mut out, schema.as_bytes());
    out.push(b'.');
    write_mysql_identifier(&mut out, table.as_bytes());
    into_string(out)
}

// Only ASCII bytes were inserted into valid UTF-8 input, so this never fails.
fn into_string(bytes: Vec<u8>) -> String {
    String::from_utf8(bytes)
        .unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}
