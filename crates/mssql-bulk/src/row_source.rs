//! Row sources for bulk loading.
//!
//! A row source is a finite lazy sequence of rows pulled one at a time by
//! the bulk engine, which suspends the source whenever the transport is
//! not ready. Concrete shapes (vectors, synchronous iterators, async
//! streams) are unified behind the [`RowSource`] trait via the adapters
//! below.

use futures_util::StreamExt;
use mssql_types::SqlValue;

use crate::error::BoxError;

/// One row of bulk-load input.
///
/// A tuple row is taken positionally against the configured columns; a
/// keyed row is projected by column name. Either shape may omit trailing
/// or unmatched cells, which load as NULL.
#[derive(Debug, Clone)]
pub enum BulkRow {
    /// Ordered cells aligned with the column configuration.
    Tuple(Vec<SqlValue>),
    /// Cells keyed by column name.
    Keyed(Vec<(String, SqlValue)>),
}

impl BulkRow {
    /// Project this row onto the configured column order.
    #[must_use]
    pub fn project(self, column_names: &[String]) -> Vec<SqlValue> {
        match self {
            Self::Tuple(mut cells) => {
                cells.resize(column_names.len(), SqlValue::Null);
                cells
            }
            Self::Keyed(cells) => column_names
                .iter()
                .map(|name| {
                    cells
                        .iter()
                        .find(|(key, _)| key == name)
                        .map_or(SqlValue::Null, |(_, value)| value.clone())
                })
                .collect(),
        }
    }
}

impl<V: Into<SqlValue>> From<Vec<V>> for BulkRow {
    fn from(cells: Vec<V>) -> Self {
        Self::Tuple(cells.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<SqlValue>> From<Vec<(K, V)>> for BulkRow {
    fn from(cells: Vec<(K, V)>) -> Self {
        Self::Keyed(
            cells
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A finite lazy sequence of rows.
///
/// `next_row` returns `None` when the source is exhausted; an `Err` item
/// aborts the bulk load with that error, object identity preserved.
pub trait RowSource: Send {
    /// Pull the next row, suspending if none is ready yet.
    fn next_row(
        &mut self,
    ) -> impl std::future::Future<Output = Option<Result<BulkRow, BoxError>>> + Send;
}

/// Row source over an infallible synchronous iterator (vectors, ranges,
/// generators).
#[derive(Debug)]
pub struct IterSource<I> {
    iter: I,
}

/// Wrap any iterator of rows as a row source.
pub fn rows<I>(iter: I) -> IterSource<I::IntoIter>
where
    I: IntoIterator,
    I::Item: Into<BulkRow>,
{
    IterSource {
        iter: iter.into_iter(),
    }
}

impl<I> RowSource for IterSource<I>
where
    I: Iterator + Send,
    I::Item: Into<BulkRow>,
{
    async fn next_row(&mut self) -> Option<Result<BulkRow, BoxError>> {
        self.iter.next().map(|row| Ok(row.into()))
    }
}

/// Row source over a synchronous iterator whose items may fail.
#[derive(Debug)]
pub struct TryIterSource<I> {
    iter: I,
}

/// Wrap a fallible iterator of rows as a row source.
pub fn try_rows<I, R>(iter: I) -> TryIterSource<I::IntoIter>
where
    I: IntoIterator<Item = Result<R, BoxError>>,
    R: Into<BulkRow>,
{
    TryIterSource {
        iter: iter.into_iter(),
    }
}

impl<I, R> RowSource for TryIterSource<I>
where
    I: Iterator<Item = Result<R, BoxError>> + Send,
    R: Into<BulkRow>,
{
    async fn next_row(&mut self) -> Option<Result<BulkRow, BoxError>> {
        self.iter.next().map(|item| item.map(Into::into))
    }
}

/// Row source over an async stream.
#[derive(Debug)]
pub struct StreamSource<S> {
    stream: S,
}

/// Wrap an async stream of rows as a row source.
pub fn stream_rows<S, R>(stream: S) -> StreamSource<S>
where
    S: futures_core::Stream<Item = Result<R, BoxError>> + Unpin + Send,
    R: Into<BulkRow>,
{
    StreamSource { stream }
}

impl<S, R> RowSource for StreamSource<S>
where
    S: futures_core::Stream<Item = Result<R, BoxError>> + Unpin + Send,
    R: Into<BulkRow>,
{
    async fn next_row(&mut self) -> Option<Result<BulkRow, BoxError>> {
        self.stream.next().await.map(|item| item.map(Into::into))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_iter_source() {
        let mut source = rows(vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]]);
        assert!(matches!(
            source.next_row().await,
            Some(Ok(BulkRow::Tuple(_)))
        ));
        assert!(source.next_row().await.is_some());
        assert!(source.next_row().await.is_none());
    }

    #[tokio::test]
    async fn test_try_iter_source_propagates_error() {
        let items: Vec<Result<Vec<SqlValue>, BoxError>> = vec![
            Ok(vec![SqlValue::Int(1)]),
            Err("row 2 unreadable".into()),
        ];
        let mut source = try_rows(items);
        assert!(source.next_row().await.unwrap().is_ok());
        assert!(source.next_row().await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_stream_source() {
        let items: Vec<Result<Vec<SqlValue>, BoxError>> =
            vec![Ok(vec![SqlValue::Int(1)]), Ok(vec![SqlValue::Int(2)])];
        let mut source = stream_rows(futures_util::stream::iter(items));
        assert!(source.next_row().await.is_some());
        assert!(source.next_row().await.is_some());
        assert!(source.next_row().await.is_none());
    }

    #[test]
    fn test_tuple_projection_pads_with_null() {
        let row = BulkRow::Tuple(vec![SqlValue::Int(1)]);
        let cells = row.project(&["a".into(), "b".into()]);
        assert_eq!(cells, vec![SqlValue::Int(1), SqlValue::Null]);
    }

    #[test]
    fn test_keyed_projection_by_name() {
        let row = BulkRow::Keyed(vec![
            ("b".into(), SqlValue::Int(2)),
            ("a".into(), SqlValue::Int(1)),
        ]);
        let cells = row.project(&["a".into(), "b".into(), "c".into()]);
        assert_eq!(
            cells,
            vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Null]
        );
    }
}
