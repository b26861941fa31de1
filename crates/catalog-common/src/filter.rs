//! Pushdown filters for partitioned Parquet datasets.
//!
//! Datasets such as EPA CEMS hourly emissions are partitioned by report year
//! and state. Reading a subset efficiently means skipping every file (or row
//! group) that cannot contain the requested partitions, which readers do by
//! evaluating a predicate in disjunctive normal form (DNF): an OR of ANDs of
//! `(column, operator, value)` terms.
//!
//! [`build_filter`] turns a list of years and a list of state codes into such
//! a predicate, including every combination of the two:
//!
//! ```
//! use catalog_common::build_filter;
//!
//! let filters = build_filter(&[2018, 2019], &["ca", "CO"]).unwrap().unwrap();
//! assert_eq!(filters.len(), 4);
//! assert_eq!(
//!     filters.to_string(),
//!     "(year = 2018 AND state = 'CA') OR (year = 2018 AND state = 'CO') OR \
//!      (year = 2019 AND state = 'CA') OR (year = 2019 AND state = 'CO')"
//! );
//! ```
//!
//! When neither years nor states are requested there is nothing to prune and
//! the result is `None`. That is different from an empty [`FilterSet`], which
//! matches no rows at all.

use std::fmt;
use std::str::FromStr;

use serde::ser::{SerializeTuple, Serializer};
use serde::Serialize;

use crate::error::{CatalogError, CatalogResult};

/// Column holding the report year in partitioned datasets.
pub const YEAR_COLUMN: &str = "year";

/// Column holding the two-letter state code in partitioned datasets.
pub const STATE_COLUMN: &str = "state";

/// A 4-digit report year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Year(i32);

impl Year {
    /// Validate a year. Anything outside `1000..=9999` is rejected.
    pub fn new(year: i32) -> CatalogResult<Self> {
        if (1000..=9999).contains(&year) {
            Ok(Self(year))
        } else {
            Err(CatalogError::invalid_parameter(
                YEAR_COLUMN,
                format!("expected a 4-digit year, got {}", year),
            ))
        }
    }

    pub fn value(self) -> i32 {
        self.0
    }
}

impl TryFrom<i32> for Year {
    type Error = CatalogError;

    fn try_from(year: i32) -> CatalogResult<Self> {
        Year::new(year)
    }
}

impl fmt::Display for Year {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A region (state or territory) code, canonicalized to uppercase.
///
/// Membership in any list of known states is not checked: an unknown code
/// is a valid filter that simply matches nothing downstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Region(String);

impl Region {
    pub fn new(code: &str) -> CatalogResult<Self> {
        if code.is_empty() {
            return Err(CatalogError::invalid_parameter(
                STATE_COLUMN,
                "region code cannot be empty",
            ));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CatalogError::invalid_parameter(
                STATE_COLUMN,
                format!("region code must be ASCII letters or digits, got {:?}", code),
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Region {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        Region::new(s)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Literal value on the right-hand side of a predicate term.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScalarValue {
    Int(i64),
    Utf8(String),
}

impl ScalarValue {
    /// Compare against a partition value taken from a file path.
    ///
    /// Integers are compared numerically (`year=02020` matches 2020), strings
    /// ignoring ASCII case.
    pub fn matches_partition_value(&self, raw: &str) -> bool {
        match self {
            ScalarValue::Int(v) => raw.trim().parse::<i64>().map_or(false, |p| p == *v),
            ScalarValue::Utf8(v) => raw.eq_ignore_ascii_case(v),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{}", v),
            ScalarValue::Utf8(v) => write!(f, "'{}'", v),
        }
    }
}

impl Serialize for ScalarValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScalarValue::Int(v) => serializer.serialize_i64(*v),
            ScalarValue::Utf8(v) => serializer.serialize_str(v),
        }
    }
}

/// Comparison operator of a predicate term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One `(column, operator, value)` condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PredicateTerm {
    pub column: String,
    pub op: Operator,
    pub value: ScalarValue,
}

impl PredicateTerm {
    pub fn eq(column: impl Into<String>, value: ScalarValue) -> Self {
        Self {
            column: column.into(),
            op: Operator::Eq,
            value,
        }
    }
}

impl fmt::Display for PredicateTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column, self.op, self.value)
    }
}

/// Serialized as a 3-element array, the tuple form pandas and pyarrow accept.
impl Serialize for PredicateTerm {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(3)?;
        tuple.serialize_element(&self.column)?;
        tuple.serialize_element(self.op.as_str())?;
        tuple.serialize_element(&self.value)?;
        tuple.end()
    }
}

/// Terms that must all hold: one accepted partition combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Conjunction(Vec<PredicateTerm>);

impl Conjunction {
    pub fn new(terms: Vec<PredicateTerm>) -> Self {
        Self(terms)
    }

    pub fn terms(&self) -> &[PredicateTerm] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// False only when `eval` proves some term false. `eval` returns `None`
    /// for terms it knows nothing about.
    pub fn may_match<F>(&self, mut eval: F) -> bool
    where
        F: FnMut(&PredicateTerm) -> Option<bool>,
    {
        self.0.iter().all(|term| eval(term) != Some(false))
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, term) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" AND ")?;
            }
            write!(f, "{}", term)?;
        }
        f.write_str(")")
    }
}

/// A DNF predicate: a row is selected when any conjunction holds.
///
/// An empty set selects nothing. "No filtering" is expressed as
/// `Option::<FilterSet>::None`, never as an empty set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct FilterSet(Vec<Conjunction>);

impl FilterSet {
    pub fn new(conjunctions: Vec<Conjunction>) -> Self {
        Self(conjunctions)
    }

    /// A filter that rejects every row.
    pub fn matches_nothing() -> Self {
        Self(Vec::new())
    }

    pub fn conjunctions(&self) -> &[Conjunction] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Conjunction> {
        self.0.iter()
    }

    /// Names of every column referenced by the filter, in first-seen order.
    pub fn columns(&self) -> Vec<&str> {
        let mut columns: Vec<&str> = Vec::new();
        for term in self.0.iter().flat_map(|c| c.terms()) {
            if !columns.contains(&term.column.as_str()) {
                columns.push(&term.column);
            }
        }
        columns
    }

    /// Whether any conjunction could still hold given what `eval` knows.
    ///
    /// Used for pruning: a file or row group is skipped when this is false.
    pub fn may_match<F>(&self, mut eval: F) -> bool
    where
        F: FnMut(&PredicateTerm) -> Option<bool>,
    {
        self.0.iter().any(|conj| conj.may_match(&mut eval))
    }

    /// Serialize to the JSON list-of-lists-of-tuples form.
    pub fn to_json(&self) -> CatalogResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

impl<'a> IntoIterator for &'a FilterSet {
    type Item = &'a Conjunction;
    type IntoIter = std::slice::Iter<'a, Conjunction>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl fmt::Display for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("FALSE");
        }
        for (i, conj) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            write!(f, "{}", conj)?;
        }
        Ok(())
    }
}

/// Builds year/region filters against configurable partition column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterBuilder {
    year_column: String,
    region_column: String,
}

impl Default for FilterBuilder {
    fn default() -> Self {
        Self::new(YEAR_COLUMN, STATE_COLUMN)
    }
}

impl FilterBuilder {
    pub fn new(year_column: impl Into<String>, region_column: impl Into<String>) -> Self {
        Self {
            year_column: year_column.into(),
            region_column: region_column.into(),
        }
    }

    pub fn year_column(&self) -> &str {
        &self.year_column
    }

    pub fn region_column(&self) -> &str {
        &self.region_column
    }

    /// Build the DNF filter selecting every requested (year, region) pair.
    ///
    /// An empty slice leaves that dimension unrestricted:
    ///
    /// | years | regions | result |
    /// |-------|---------|--------|
    /// | empty | empty | `None` |
    /// | empty | given | one `[(region, =, R)]` per region |
    /// | given | empty | one `[(year, =, Y)]` per year |
    /// | given | given | `[(year, =, Y), (region, =, R)]` for every Y, then every R |
    ///
    /// Fails if any year is not 4 digits or any region code is not
    /// alphanumeric.
    pub fn build<S: AsRef<str>>(
        &self,
        years: &[i32],
        regions: &[S],
    ) -> CatalogResult<Option<FilterSet>> {
        let years = years
            .iter()
            .map(|&y| Year::new(y))
            .collect::<CatalogResult<Vec<_>>>()?;
        let regions = regions
            .iter()
            .map(|r| Region::new(r.as_ref()))
            .collect::<CatalogResult<Vec<_>>>()?;

        let year_term = |year: &Year| {
            PredicateTerm::eq(&self.year_column, ScalarValue::Int(i64::from(year.value())))
        };
        let region_term = |region: &Region| {
            PredicateTerm::eq(&self.region_column, ScalarValue::Utf8(region.as_str().to_string()))
        };

        let conjunctions = match (years.is_empty(), regions.is_empty()) {
            (true, true) => return Ok(None),
            (true, false) => regions
                .iter()
                .map(|r| Conjunction::new(vec![region_term(r)]))
                .collect(),
            (false, true) => years
                .iter()
                .map(|y| Conjunction::new(vec![year_term(y)]))
                .collect(),
            (false, false) => years
                .iter()
                .flat_map(|y| {
                    regions
                        .iter()
                        .map(move |r| Conjunction::new(vec![year_term(y), region_term(r)]))
                })
                .collect(),
        };

        Ok(Some(FilterSet::new(conjunctions)))
    }
}

/// Build a year/state filter using the default `year` and `state` columns.
///
/// See [`FilterBuilder::build`].
pub fn build_filter<S: AsRef<str>>(
    years: &[i32],
    regions: &[S],
) -> CatalogResult<Option<FilterSet>> {
    FilterBuilder::default().build(years, regions)
}
