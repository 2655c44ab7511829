// SPDX-License-Identifier: Apache-2.0

//! SQL handle abstraction
//!
//! The retrying executor talks to the cluster only through [`SqlHandle`] and
//! [`SqlTxn`]. [`MySqlHandle`] implements them on top of an SQLx pool; tests
//! plug in scripted handles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::mysql::{MySql, MySqlArguments, MySqlPool, MySqlRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Row, Transaction};

use crate::error::{ClusterError, ClusterResult};

/// A single SQL argument or result cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Int(i64),
    UInt(u64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for SqlValue {
    fn from(v: u64) -> Self {
        Self::UInt(v)
    }
}

impl From<f64> for SqlValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

/// One row as returned by a single-row query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqlRow {
    pub values: Vec<SqlValue>,
}

impl SqlRow {
    pub fn new(values: Vec<SqlValue>) -> Self {
        Self { values }
    }

    /// Decodes column `idx` into a destination type.
    pub fn get<T: FromSqlValue>(&self, idx: usize) -> ClusterResult<T> {
        let value = self.values.get(idx).ok_or_else(|| {
            ClusterError::Decode(format!(
                "column index {} out of range for row of {} columns",
                idx,
                self.values.len()
            ))
        })?;
        T::from_sql_value(value)
    }
}

/// Conversion of a single cell into a scan destination
pub trait FromSqlValue: Sized {
    fn from_sql_value(value: &SqlValue) -> ClusterResult<Self>;
}

fn mismatch(expected: &str, value: &SqlValue) -> ClusterError {
    ClusterError::Decode(format!("cannot scan {:?} into {}", value, expected))
}

impl FromSqlValue for i64 {
    fn from_sql_value(value: &SqlValue) -> ClusterResult<Self> {
        match value {
            SqlValue::Int(v) => Ok(*v),
            SqlValue::UInt(v) => i64::try_from(*v).map_err(|_| mismatch("i64", value)),
            SqlValue::Text(s) => s.trim().parse().map_err(|_| mismatch("i64", value)),
            _ => Err(mismatch("i64", value)),
        }
    }
}

impl FromSqlValue for u64 {
    fn from_sql_value(value: &SqlValue) -> ClusterResult<Self> {
        match value {
            SqlValue::UInt(v) => Ok(*v),
            SqlValue::Int(v) => u64::try_from(*v).map_err(|_| mismatch("u64", value)),
            SqlValue::Text(s) => s.trim().parse().map_err(|_| mismatch("u64", value)),
            _ => Err(mismatch("u64", value)),
        }
    }
}

impl FromSqlValue for f64 {
    fn from_sql_value(value: &SqlValue) -> ClusterResult<Self> {
        match value {
            SqlValue::Float(v) => Ok(*v),
            SqlValue::Int(v) => Ok(*v as f64),
            SqlValue::UInt(v) => Ok(*v as f64),
            SqlValue::Text(s) => s.trim().parse().map_err(|_| mismatch("f64", value)),
            _ => Err(mismatch("f64", value)),
        }
    }
}

impl FromSqlValue for bool {
    fn from_sql_value(value: &SqlValue) -> ClusterResult<Self> {
        match value {
            SqlValue::Int(v) => Ok(*v != 0),
            SqlValue::UInt(v) => Ok(*v != 0),
            _ => Err(mismatch("bool", value)),
        }
    }
}

impl FromSqlValue for String {
    fn from_sql_value(value: &SqlValue) -> ClusterResult<Self> {
        match value {
            SqlValue::Text(s) => Ok(s.clone()),
            SqlValue::Bytes(b) => String::from_utf8(b.clone()).map_err(|_| mismatch("String", value)),
            SqlValue::Int(v) => Ok(v.to_string()),
            SqlValue::UInt(v) => Ok(v.to_string()),
            SqlValue::Float(v) => Ok(v.to_string()),
            SqlValue::Null => Err(mismatch("String", value)),
        }
    }
}

impl FromSqlValue for Vec<u8> {
    fn from_sql_value(value: &SqlValue) -> ClusterResult<Self> {
        match value {
            SqlValue::Bytes(b) => Ok(b.clone()),
            SqlValue::Text(s) => Ok(s.as_bytes().to_vec()),
            _ => Err(mismatch("Vec<u8>", value)),
        }
    }
}

impl<T: FromSqlValue> FromSqlValue for Option<T> {
    fn from_sql_value(value: &SqlValue) -> ClusterResult<Self> {
        match value {
            SqlValue::Null => Ok(None),
            other => T::from_sql_value(other).map(Some),
        }
    }
}

/// Conversion of a whole row into the destinations of a query
pub trait FromSqlRow: Sized {
    fn from_sql_row(row: &SqlRow) -> ClusterResult<Self>;
}

impl FromSqlRow for SqlRow {
    fn from_sql_row(row: &SqlRow) -> ClusterResult<Self> {
        Ok(row.clone())
    }
}

macro_rules! impl_from_sql_row_tuple {
    ($($name:ident => $idx:tt),+) => {
        impl<$($name: FromSqlValue),+> FromSqlRow for ($($name,)+) {
            fn from_sql_row(row: &SqlRow) -> ClusterResult<Self> {
                Ok(($(row.get::<$name>($idx)?,)+))
            }
        }
    };
}

impl_from_sql_row_tuple!(A => 0);
impl_from_sql_row_tuple!(A => 0, B => 1);
impl_from_sql_row_tuple!(A => 0, B => 1, C => 2);
impl_from_sql_row_tuple!(A => 0, B => 1, C => 2, D => 3);

/// Database capability consumed by the retrying executor
#[async_trait]
pub trait SqlHandle: Send + Sync {
    type Txn: SqlTxn;

    /// Executes a statement and returns the number of affected rows.
    async fn exec(&self, query: &str, args: &[SqlValue]) -> ClusterResult<u64>;

    /// Executes a query expected to return at least one row; extra rows are ignored.
    async fn query_row(&self, query: &str) -> ClusterResult<SqlRow>;

    async fn begin(&self) -> ClusterResult<Self::Txn>;

    async fn ping(&self) -> ClusterResult<()>;
}

/// An open transaction handed to `transact` actions
#[async_trait]
pub trait SqlTxn: Send {
    async fn exec(&mut self, query: &str, args: &[SqlValue]) -> ClusterResult<u64>;

    async fn query_row(&mut self, query: &str) -> ClusterResult<SqlRow>;

    async fn commit(self) -> ClusterResult<()>;

    async fn rollback(self) -> ClusterResult<()>;
}

/// SQLx-backed handle over a MySQL-protocol connection pool
#[derive(Clone)]
pub struct MySqlHandle {
    pool: MySqlPool,
}

impl MySqlHandle {
    pub fn new(pool: MySqlPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

/// A transaction borrowed from the pool for its whole lifetime
pub struct MySqlTxn {
    inner: Transaction<'static, MySql>,
}

fn bind_args<'q>(
    mut query: Query<'q, MySql, MySqlArguments>,
    args: &[SqlValue],
) -> Query<'q, MySql, MySqlArguments> {
    for arg in args {
        query = match arg.clone() {
            SqlValue::Null => query.bind(None::<String>),
            SqlValue::Int(v) => query.bind(v),
            SqlValue::UInt(v) => query.bind(v),
            SqlValue::Float(v) => query.bind(v),
            SqlValue::Text(v) => query.bind(v),
            SqlValue::Bytes(v) => query.bind(v),
        };
    }
    query
}

/// Converts an SQLx row into our row type
fn convert_row(row: &MySqlRow) -> SqlRow {
    let values = row
        .columns()
        .iter()
        .map(|col| extract_value(row, col.ordinal()))
        .collect();
    SqlRow { values }
}

fn extract_value(row: &MySqlRow, idx: usize) -> SqlValue {
    // Try u64 first for BIGINT UNSIGNED columns
    if let Ok(v) = row.try_get::<Option<u64>, _>(idx) {
        return v.map(SqlValue::UInt).unwrap_or(SqlValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(SqlValue::Int).unwrap_or(SqlValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|i| SqlValue::Int(i64::from(i))).unwrap_or(SqlValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<u32>, _>(idx) {
        return v.map(|u| SqlValue::UInt(u64::from(u))).unwrap_or(SqlValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(SqlValue::Float).unwrap_or(SqlValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(SqlValue::Text).unwrap_or(SqlValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<Vec<u8>>, _>(idx) {
        return v.map(SqlValue::Bytes).unwrap_or(SqlValue::Null);
    }

    SqlValue::Null
}

#[async_trait]
impl SqlHandle for MySqlHandle {
    type Txn = MySqlTxn;

    async fn exec(&self, query: &str, args: &[SqlValue]) -> ClusterResult<u64> {
        let result = bind_args(sqlx::query(query), args)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query_row(&self, query: &str) -> ClusterResult<SqlRow> {
        let row = sqlx::query(query).fetch_one(&self.pool).await?;
        Ok(convert_row(&row))
    }

    async fn begin(&self) -> ClusterResult<MySqlTxn> {
        let inner = self.pool.begin().await?;
        Ok(MySqlTxn { inner })
    }

    async fn ping(&self) -> ClusterResult<()> {
        let mut conn = self.pool.acquire().await?;
        conn.ping().await?;
        Ok(())
    }
}

#[async_trait]
impl SqlTxn for MySqlTxn {
    async fn exec(&mut self, query: &str, args: &[SqlValue]) -> ClusterResult<u64> {
        let result = bind_args(sqlx::query(query), args)
            .execute(&mut *self.inner)
            .await?;
        Ok(result.rows_affected())
    }

    async fn query_row(&mut self, query: &str) -> ClusterResult<SqlRow> {
        let row = sqlx::query(query).fetch_one(&mut *self.inner).await?;
        Ok(convert_row(&row))
    }

    async fn commit(self) -> ClusterResult<()> {
        self.inner.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> ClusterResult<()> {
        self.inner.rollback().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_tuple_destinations() {
        let row = SqlRow::new(vec![
            SqlValue::UInt(42),
            SqlValue::Text("v7.5.0".into()),
            SqlValue::Null,
        ]);
        let (count, version, missing): (i64, String, Option<u64>) =
            FromSqlRow::from_sql_row(&row).unwrap();
        assert_eq!(count, 42);
        assert_eq!(version, "v7.5.0");
        assert_eq!(missing, None);
    }

    #[test]
    fn test_scan_reports_decode_errors() {
        let row = SqlRow::new(vec![SqlValue::Text("abc".into())]);
        let err = row.get::<i64>(0).unwrap_err();
        assert!(matches!(err, ClusterError::Decode(_)));

        let err = row.get::<String>(3).unwrap_err();
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_numeric_text_is_parsed() {
        let row = SqlRow::new(vec![SqlValue::Text(" 18 ".into()), SqlValue::Int(0)]);
        assert_eq!(row.get::<u64>(0).unwrap(), 18);
        assert!(!row.get::<bool>(1).unwrap());
    }
}
