//! Partition values encoded in dataset file paths.
//!
//! Two layouts are recognized:
//! - Hive-style directories: `hourly_emissions_epacems/year=2020/state=ID/part-0.parquet`
//! - A file name pattern declared by the catalog entry, e.g.
//!   `epacems-{year}-{state}.parquet` for `epacems-2020-ID.parquet`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, CatalogResult};
use crate::filter::FilterSet;

/// Partition column values extracted from one file path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionValues(BTreeMap<String, String>);

impl PartitionValues {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.0.get(column).map(String::as_str)
    }

    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<String>) {
        self.0.insert(column.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Whether a file with these partition values can hold rows selected by `filter`.
    ///
    /// Terms on columns that are not encoded in the path never rule a file out.
    pub fn may_match(&self, filter: &FilterSet) -> bool {
        filter.may_match(|term| {
            self.get(&term.column)
                .map(|raw| term.value.matches_partition_value(raw))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternToken {
    Literal(String),
    Field(String),
}

/// Parsed `{column}` file name template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern {
    source: String,
    tokens: Vec<PatternToken>,
}

impl FilePattern {
    /// Parse a template such as `epacems-{year}-{state}.parquet`.
    ///
    /// Two adjacent fields are rejected because there is no literal to split on.
    pub fn parse(pattern: &str) -> CatalogResult<Self> {
        let invalid = |msg: &str| {
            CatalogError::InvalidCatalog(format!("file pattern {:?}: {}", pattern, msg))
        };

        let mut tokens = Vec::new();
        let mut rest = pattern;
        while !rest.is_empty() {
            match rest.find('{') {
                Some(0) => {
                    let end = rest.find('}').ok_or_else(|| invalid("unclosed '{'"))?;
                    let name = &rest[1..end];
                    if name.is_empty() {
                        return Err(invalid("empty field name"));
                    }
                    if matches!(tokens.last(), Some(PatternToken::Field(_))) {
                        return Err(invalid("fields must be separated by a literal"));
                    }
                    tokens.push(PatternToken::Field(name.to_string()));
                    rest = &rest[end + 1..];
                }
                Some(start) => {
                    tokens.push(PatternToken::Literal(rest[..start].to_string()));
                    rest = &rest[start..];
                }
                None => {
                    if rest.contains('}') {
                        return Err(invalid("unmatched '}'"));
                    }
                    tokens.push(PatternToken::Literal(rest.to_string()));
                    rest = "";
                }
            }
        }

        Ok(Self {
            source: pattern.to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Names of the fields in template order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().filter_map(|t| match t {
            PatternToken::Field(name) => Some(name.as_str()),
            PatternToken::Literal(_) => None,
        })
    }

    /// Match a file name, returning the field values or `None` if it doesn't fit.
    pub fn captures(&self, file_name: &str) -> Option<Vec<(String, String)>> {
        let mut values = Vec::new();
        let mut rest = file_name;
        let mut tokens = self.tokens.iter().peekable();

        while let Some(token) = tokens.next() {
            match token {
                PatternToken::Literal(lit) => {
                    rest = rest.strip_prefix(lit.as_str())?;
                }
                PatternToken::Field(name) => {
                    let end = match tokens.peek() {
                        Some(PatternToken::Literal(next)) => rest.find(next.as_str())?,
                        _ => rest.len(),
                    };
                    if end == 0 {
                        return None;
                    }
                    values.push((name.clone(), rest[..end].to_string()));
                    rest = &rest[end..];
                }
            }
        }

        rest.is_empty().then_some(values)
    }

    /// Render a file name from field values.
    pub fn render(&self, values: &[(&str, &str)]) -> CatalogResult<String> {
        let mut out = String::new();
        for token in &self.tokens {
            match token {
                PatternToken::Literal(lit) => out.push_str(lit),
                PatternToken::Field(name) => {
                    let value = values
                        .iter()
                        .find(|(k, _)| k == name)
                        .map(|(_, v)| *v)
                        .ok_or_else(|| {
                            CatalogError::invalid_parameter(
                                name.clone(),
                                format!("no value given for pattern {}", self.source),
                            )
                        })?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// How a dataset directory is partitioned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionScheme {
    /// Partition columns, outermost first.
    #[serde(default)]
    pub columns: Vec<String>,
    /// Optional file name template carrying partition values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_pattern: Option<String>,
}

impl PartitionScheme {
    pub fn new(columns: Vec<String>, file_pattern: Option<String>) -> CatalogResult<Self> {
        let scheme = Self {
            columns,
            file_pattern,
        };
        scheme.validate()?;
        Ok(scheme)
    }

    /// Check that the file pattern parses and only names declared columns.
    pub fn validate(&self) -> CatalogResult<()> {
        if let Some(pattern) = self.parsed_pattern()? {
            for field in pattern.fields() {
                if !self.columns.iter().any(|c| c == field) {
                    return Err(CatalogError::InvalidCatalog(format!(
                        "file pattern {:?} uses {:?}, which is not a partition column",
                        pattern.as_str(),
                        field
                    )));
                }
            }
        }
        Ok(())
    }

    fn parsed_pattern(&self) -> CatalogResult<Option<FilePattern>> {
        self.file_pattern.as_deref().map(FilePattern::parse).transpose()
    }

    /// Extract partition values from a path relative to the dataset root.
    ///
    /// Hive `key=value` segments are always honored. The file name is then
    /// matched against the file pattern, if any; pattern values win.
    pub fn extract(&self, path: &str) -> CatalogResult<PartitionValues> {
        let mut values = PartitionValues::default();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        for segment in &segments {
            if let Some((key, value)) = segment.split_once('=') {
                if !key.is_empty() && !value.is_empty() {
                    values.insert(key, value);
                }
            }
        }

        if let (Some(pattern), Some(file_name)) = (self.parsed_pattern()?, segments.last()) {
            if let Some(captures) = pattern.captures(file_name) {
                for (key, value) in captures {
                    values.insert(key, value);
                }
            }
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::build_filter;

    fn epacems_scheme() -> PartitionScheme {
        PartitionScheme::new(
            vec!["year".into(), "state".into()],
            Some("epacems-{year}-{state}.parquet".into()),
        )
        .unwrap()
    }

    #[test]
    fn test_parse_pattern() {
        let pattern = FilePattern::parse("epacems-{year}-{state}.parquet").unwrap();
        assert_eq!(pattern.fields().collect::<Vec<_>>(), vec!["year", "state"]);
    }

    #[test]
    fn test_reject_bad_patterns() {
        assert!(FilePattern::parse("epacems-{year").is_err());
        assert!(FilePattern::parse("epacems-{}.parquet").is_err());
        assert!(FilePattern::parse("{year}{state}.parquet").is_err());
        assert!(FilePattern::parse("epacems}.parquet").is_err());
    }

    #[test]
    fn test_captures() {
        let pattern = FilePattern::parse("epacems-{year}-{state}.parquet").unwrap();
        assert_eq!(
            pattern.captures("epacems-2020-NY.parquet"),
            Some(vec![
                ("year".to_string(), "2020".to_string()),
                ("state".to_string(), "NY".to_string())
            ])
        );
        assert_eq!(pattern.captures("epacems-2020.parquet"), None);
        assert_eq!(pattern.captures("other-2020-NY.parquet"), None);
        assert_eq!(pattern.captures("epacems-2020-NY.parquet.tmp"), None);
    }

    #[test]
    fn test_render() {
        let pattern = FilePattern::parse("epacems-{year}-{state}.parquet").unwrap();
        assert_eq!(
            pattern.render(&[("state", "CA"), ("year", "2019")]).unwrap(),
            "epacems-2019-CA.parquet"
        );
        assert!(pattern.render(&[("year", "2019")]).is_err());
    }

    #[test]
    fn test_extract_from_pattern() {
        let values = epacems_scheme()
            .extract("v0.1.0/hourly_emissions_epacems/epacems-2020-TX.parquet")
            .unwrap();
        assert_eq!(values.get("year"), Some("2020"));
        assert_eq!(values.get("state"), Some("TX"));
    }

    #[test]
    fn test_extract_hive() {
        let scheme = PartitionScheme::new(vec!["year".into(), "state".into()], None).unwrap();
        let values = scheme
            .extract("hourly_emissions_epacems/year=2019/state=CO/part-0.parquet")
            .unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values.get("year"), Some("2019"));
        assert_eq!(values.get("state"), Some("CO"));
    }

    #[test]
    fn test_pattern_must_use_declared_columns() {
        assert!(PartitionScheme::new(
            vec!["year".into()],
            Some("epacems-{year}-{state}.parquet".into())
        )
        .is_err());
    }

    #[test]
    fn test_may_match() {
        let scheme = epacems_scheme();
        let filter = build_filter(&[2020], &["ID"]).unwrap().unwrap();

        let id = scheme.extract("epacems-2020-ID.parquet").unwrap();
        let ca = scheme.extract("epacems-2020-CA.parquet").unwrap();
        let unknown = scheme.extract("README.md").unwrap();

        assert!(id.may_match(&filter));
        assert!(!ca.may_match(&filter));
        assert!(unknown.may_match(&filter));
    }
}
