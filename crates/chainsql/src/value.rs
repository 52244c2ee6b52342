//! Bound values and condition arguments.
//!
//! The builder keeps every bound value as a [`Value`] so that parameter lists
//! can be cloned, fingerprinted and expanded later by the
//! [`Preprocessor`](crate::preprocess::Preprocessor). Conditions accept
//! [`Arg`]s, which are either plain values or sub-queries.

use crate::builder::SqlBuilder;
use crate::error::OrmResult;
use bytes::BytesMut;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

/// A value bound to a `?` placeholder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Timestamp(DateTime<Utc>),
    Uuid(Uuid),
    Json(serde_json::Value),
    /// Pre-formatted SQL inlined verbatim by the preprocessor.
    Literal(SqlLiteral),
    /// Expanded to `?, ?, ...`; nested lists become row tuples.
    List(Vec<Value>),
    /// Column assignments for `SET ?` and `INSERT INTO t ?`.
    Assignments(Vec<(String, Value)>),
}

impl Value {
    /// Build a byte string value.
    pub fn bytes(data: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(data.into())
    }

    /// Build a list value from anything convertible.
    pub fn list<T: Into<Value>>(items: impl IntoIterator<Item = T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Build a column assignment list (`column => value`).
    pub fn assignments<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Assignments(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short description of the value kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::Json(_) => "json",
            Value::Literal(_) => "literal",
            Value::List(_) => "array",
            Value::Assignments(_) => "assignments",
        }
    }
}

/// Raw SQL with its own parameters, e.g. `NOW()` or `COALESCE(?, 0)`.
///
/// The placeholder bound to a literal is left in place by the builder; the
/// preprocessor substitutes the literal text when the query is executed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlLiteral {
    pub sql: String,
    pub params: Vec<Value>,
}

impl SqlLiteral {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

impl fmt::Display for SqlLiteral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Fetches rows for sub-queries that cannot be inlined.
///
/// Drivers without sub-select support need the inner query executed first;
/// the builder is synchronous, so the caller supplies a source that already
/// holds the rows (or blocks on its own runtime).
pub trait RowSource: Send + Sync {
    fn fetch(&self, sql: &str, params: &[Value]) -> OrmResult<Vec<Vec<Value>>>;
}

/// Another builder used as an `IN` argument.
#[derive(Clone)]
pub struct SubQuery {
    pub(crate) builder: Box<SqlBuilder>,
    pub(crate) source: Option<Arc<dyn RowSource>>,
}

impl SubQuery {
    pub fn new(builder: &SqlBuilder) -> Self {
        Self {
            builder: Box::new(builder.clone()),
            source: None,
        }
    }

    /// Attach a row source used when the driver cannot inline sub-selects.
    pub fn with_source(mut self, source: Arc<dyn RowSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn builder(&self) -> &SqlBuilder {
        &self.builder
    }
}

impl fmt::Debug for SubQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubQuery")
            .field("table", &self.builder.table_name())
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

/// An argument passed to a condition.
#[derive(Debug, Clone)]
pub enum Arg {
    Value(Value),
    SubQuery(SubQuery),
}

impl Arg {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Arg::Value(v) => Some(v),
            Arg::SubQuery(_) => None,
        }
    }
}

/// Build a `Vec<Arg>` from heterogeneous values.
///
/// ```
/// use chainsql::{args, Arg};
/// let args: Vec<Arg> = args![5, "x", vec![1, 2]];
/// assert_eq!(args.len(), 3);
/// ```
#[macro_export]
macro_rules! args {
    () => { ::std::vec::Vec::<$crate::Arg>::new() };
    ($($arg:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($arg)),+]
    };
}

macro_rules! impl_from_scalar {
    ($($ty:ty => |$v:ident| $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from($v: $ty) -> Self {
                    $conv
                }
            }

            impl From<$ty> for Arg {
                fn from(v: $ty) -> Self {
                    Arg::Value(Value::from(v))
                }
            }
        )*
    };
}

impl_from_scalar! {
    bool => |v| Value::Bool(v),
    i16 => |v| Value::Int(i64::from(v)),
    i32 => |v| Value::Int(i64::from(v)),
    i64 => |v| Value::Int(v),
    u32 => |v| Value::Int(i64::from(v)),
    f32 => |v| Value::Float(f64::from(v)),
    f64 => |v| Value::Float(v),
    &str => |v| Value::Text(v.to_string()),
    String => |v| Value::Text(v),
    DateTime<Utc> => |v| Value::Timestamp(v),
    Uuid => |v| Value::Uuid(v),
    serde_json::Value => |v| Value::Json(v),
    SqlLiteral => |v| Value::Literal(v),
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

impl From<Value> for Arg {
    fn from(v: Value) -> Self {
        Arg::Value(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Arg {
    fn from(v: Vec<T>) -> Self {
        Arg::Value(Value::from(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Arg {
    fn from(v: Option<T>) -> Self {
        Arg::Value(Value::from(v))
    }
}

impl From<SubQuery> for Arg {
    fn from(v: SubQuery) -> Self {
        Arg::SubQuery(v)
    }
}

impl From<&SqlBuilder> for Arg {
    fn from(v: &SqlBuilder) -> Self {
        Arg::SubQuery(SubQuery::new(v))
    }
}

type BoxError = Box<dyn std::error::Error + Sync + Send>;

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(v) => v.to_sql(ty, out),
            Value::Int(v) => match *ty {
                Type::INT2 => i16::try_from(*v)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*v)?.to_sql(ty, out),
                Type::FLOAT8 => (*v as f64).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Float(v) => match *ty {
                Type::FLOAT4 => (*v as f32).to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Text(v) => v.to_sql(ty, out),
            Value::Bytes(v) => v.to_sql(ty, out),
            Value::Timestamp(v) => match *ty {
                Type::TIMESTAMP => v.naive_utc().to_sql(ty, out),
                _ => v.to_sql(ty, out),
            },
            Value::Uuid(v) => v.to_sql(ty, out),
            Value::Json(v) => v.to_sql(ty, out),
            Value::Literal(_) | Value::List(_) | Value::Assignments(_) => Err(format!(
                "{} value must be expanded before it is bound",
                self.kind()
            )
            .into()),
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conversions_cover_common_types() {
        assert_eq!(Value::from(5), Value::Int(5));
        assert_eq!(Value::from("a"), Value::Text("a".into()));
        assert_eq!(Value::from(None::<i32>), Value::Null);
        assert_eq!(
            Value::from(vec![1, 2]),
            Value::List(vec![Value::Int(1), Value::Int(2)])
        );
        assert_eq!(Value::bytes(b"ab".to_vec()), Value::Bytes(vec![97, 98]));
    }

    #[test]
    fn args_macro_wraps_values() {
        let args = args![1, "x", Value::Null];
        assert_eq!(args.len(), 3);
        assert_eq!(args[2].as_value(), Some(&Value::Null));
    }

    #[test]
    fn assignments_keep_order() {
        let v = Value::assignments([("name", Value::from("a")), ("age", Value::from(3))]);
        match v {
            Value::Assignments(pairs) => {
                assert_eq!(pairs[0].0, "name");
                assert_eq!(pairs[1].1, Value::Int(3));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unexpanded_list_is_rejected_by_to_sql() {
        let mut buf = BytesMut::new();
        let res = Value::list([1, 2]).to_sql(&Type::INT8, &mut buf);
        assert!(res.is_err());
    }
}
