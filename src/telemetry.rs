//! The telemetry data model: the column [`Schema`] announced by the device,
//! the [`Record`]s parsed against it, and the [`SchemaState`] tracking which
//! schema is in effect.

use std::{fmt::Display, sync::Arc};

use itertools::Itertools;
use serde::{ser::SerializeMap, Serialize, Serializer};

use crate::error::Error;

/// The columns the collector firmware emits, used until the device sends a header of its own.
pub const DEFAULT_COLUMNS: [&str; 16] = [
    "ts_ms",
    "device",
    "rpm",
    "voltage_mV",
    "current_mA",
    "consumption_mAh",
    "pwm_x10",
    "throttle_x10",
    "tempC_x10",
    "bec_voltage_mV",
    "bec_current_mA",
    "bec_tempC_x10",
    "status",
    "rx_bytes",
    "rx_frames_received",
    "rx_frames_dropped",
];

/// An ordered, non-empty list of column names.
///
/// Cloning is cheap, clones share the same column list.
/// A schema never changes once built: a new header line yields a new schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schema(Arc<[String]>);

impl Schema {
    /// Create a schema from column names.
    /// Names are trimmed.
    ///
    /// Fails if there are no columns, or if every column name is blank.
    pub fn new<I, S>(columns: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let columns = columns
            .into_iter()
            .map(|column| column.as_ref().trim().to_owned())
            .collect::<Vec<_>>();

        if columns.iter().all(|column| column.is_empty()) {
            return Err(Error::EmptySchema);
        }

        Ok(Self(columns.into()))
    }

    /// The column names in order.
    pub fn columns(&self) -> &[String] {
        &self.0
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false, see [`Schema::new`].
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fit raw fields to this schema and build a [`Record`].
    ///
    /// Missing trailing fields become empty strings, surplus fields are dropped.
    pub fn reconcile(&self, mut fields: Vec<String>) -> Record {
        fields.resize(self.len(), String::new());

        Record {
            schema: self.clone(),
            values: fields,
        }
    }
}

impl Default for Schema {
    fn default() -> Self {
        Self(DEFAULT_COLUMNS.iter().map(|&column| column.to_owned()).collect())
    }
}

impl Display for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.iter().join(","))
    }
}

/// One parsed data line.
///
/// Holds exactly one value per column of the schema it was parsed against,
/// in schema order.
/// Serializes as a map from column name to value, keeping that order.
/// A repeated column name appears once, see [`Record::fields`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    schema: Schema,
    values: Vec<String>,
}

impl Record {
    /// The schema snapshot this record was built against.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// The values, in schema order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Look up a value by column name.
    /// If a header repeats a column name, the last occurrence wins.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.schema
            .columns()
            .iter()
            .rposition(|name| name == column)
            .map(|index| self.values[index].as_str())
    }

    /// Pairs of column name and value, one per distinct column name.
    ///
    /// Names keep the position of their first occurrence in the schema,
    /// values are the ones [`Record::get`] returns.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schema
            .columns()
            .iter()
            .map(String::as_str)
            .unique()
            .map(move |column| (column, self.get(column).unwrap_or_default()))
    }

    /// Pairs of column name and value, in schema order.
    /// Repeated column names show up once per occurrence.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.schema
            .columns()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().map(String::as_str))
    }

    /// Number of fields, which always matches the schema.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True only for records of an empty schema, which cannot be built.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        for (column, value) in self.fields() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.values.iter().join(",");

        write!(f, "{}", s.chars().take(64).collect::<String>())
    }
}

/// The schema currently in effect for an ingestion run.
#[derive(Debug, Default)]
pub struct SchemaState {
    current: Schema,
}

impl SchemaState {
    /// Start out with the default schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// The schema in effect.
    pub fn current(&self) -> &Schema {
        &self.current
    }

    /// Replace the schema with the given columns.
    ///
    /// Takes effect immediately for the next line.
    /// If the columns are degenerate the previous schema is kept.
    pub fn replace<I, S>(&mut self, columns: I) -> Result<&Schema, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.current = Schema::new(columns)?;
        Ok(&self.current)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn fields(line: &str) -> Vec<String> {
        line.split(',').map(str::to_owned).collect()
    }

    #[test]
    fn default_schema_has_the_collector_columns() {
        let schema = Schema::default();

        assert_eq!(schema.len(), 16);
        assert_eq!(schema.columns()[0], "ts_ms");
        assert_eq!(schema.columns()[2], "rpm");
        assert_eq!(schema.columns()[12], "status");
        assert_eq!(schema.columns()[15], "rx_frames_dropped");
    }

    #[test]
    fn empty_schema_is_rejected() {
        assert!(matches!(
            Schema::new(Vec::<String>::new()),
            Err(Error::EmptySchema)
        ));
        assert!(matches!(Schema::new([" ", ""]), Err(Error::EmptySchema)));
    }

    #[test]
    fn columns_are_trimmed() {
        let schema = Schema::new([" ts_ms ", "rpm\r"]).unwrap();

        assert_eq!(schema.columns(), &["ts_ms".to_owned(), "rpm".to_owned()]);
    }

    #[test]
    fn short_line_is_padded() {
        let schema = Schema::new(["a", "b", "c", "d"]).unwrap();
        let record = schema.reconcile(fields("1,2"));

        assert_eq!(record.len(), schema.len());
        assert_eq!(record.values(), &["1", "2", "", ""]);
        assert_eq!(record.get("d"), Some(""));
    }

    #[test]
    fn long_line_is_truncated() {
        let schema = Schema::new(["a", "b"]).unwrap();
        let record = schema.reconcile(fields("1,2,3,4"));

        assert_eq!(record.values(), &["1", "2"]);
        assert_eq!(record.get("c"), None);
    }

    #[test]
    fn record_keys_follow_schema_order() {
        let schema = Schema::new(["ts_ms", "rpm", "status"]).unwrap();
        let record = schema.reconcile(fields("200,9000,OK"));

        let keys = record.iter().map(|(k, _)| k).collect::<Vec<_>>();
        assert_eq!(keys, schema.columns());
    }

    #[test]
    fn record_serializes_as_ordered_map() {
        let schema = Schema::new(["ts_ms", "rpm"]).unwrap();
        let record = schema.reconcile(fields("200,9000"));

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"ts_ms":"200","rpm":"9000"}"#);
    }

    #[test]
    fn duplicate_columns_resolve_to_last() {
        let schema = Schema::new(["a", "a"]).unwrap();
        let record = schema.reconcile(fields("1,2"));

        assert_eq!(record.get("a"), Some("2"));
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn duplicate_columns_serialize_once_and_agree_with_get() {
        let schema = Schema::new(["ts_ms", "rpm", "status", "rpm"]).unwrap();
        let record = schema.reconcile(fields("1,100,OK,200"));

        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"ts_ms":"1","rpm":"200","status":"OK"}"#);

        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        for column in schema.columns() {
            assert_eq!(record.get(column), parsed[column].as_str());
        }
    }

    #[test]
    fn degenerate_replace_keeps_previous() {
        let mut state = SchemaState::new();
        state.replace(["ts_ms", "rpm"]).unwrap();

        assert!(state.replace([""]).is_err());
        assert_eq!(state.current().columns(), &["ts_ms", "rpm"]);
    }

    #[test]
    fn replace_does_not_touch_earlier_records() {
        let mut state = SchemaState::new();
        let before = state.current().reconcile(fields("1,2"));

        state.replace(["x"]).unwrap();

        assert_eq!(before.schema(), &Schema::default());
        assert_eq!(before.len(), 16);
    }
}
