use std::fmt;

/// Base types whose rendered form carries a character length suffix.
const TYPES_USING_MAX_LENGTH: [&str; 4] = ["varchar", "nvarchar", "char", "nchar"];

/// Base types whose rendered form carries a precision/scale suffix.
const TYPES_USING_SCALE: [&str; 2] = ["numeric", "decimal"];

/// A destination column and whether it participates in the primary key.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct Column {
    pub name: String,
    pub primary_key: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, primary_key: bool) -> Self {
        Self {
            name: name.into(),
            primary_key,
        }
    }
}

/// Declared type of a column in a schema-change event.
///
/// Carries the base type plus the optional length or precision/scale the
/// destination dialect needs to reproduce the declaration.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ColumnType {
    pub base: String,
    /// Character length; `-1` stands for the unbounded `max` length.
    pub character_maximum_length: Option<i32>,
    pub numeric_precision: Option<i32>,
    pub numeric_scale: Option<i32>,
}

impl ColumnType {
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            character_maximum_length: None,
            numeric_precision: None,
            numeric_scale: None,
        }
    }

    pub fn with_length(mut self, length: i32) -> Self {
        self.character_maximum_length = Some(length);
        self
    }

    pub fn with_precision(mut self, precision: i32, scale: i32) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    /// Renders the declaration with its length or precision suffix where the
    /// base type takes one.
    pub fn render(&self) -> String {
        if TYPES_USING_MAX_LENGTH.contains(&self.base.as_str())
            && let Some(length) = self.character_maximum_length
        {
            // Unbounded (n)varchar types are stored with a length of -1.
            return if length == -1 {
                format!("{}(max)", self.base)
            } else {
                format!("{}({})", self.base, length)
            };
        }

        if TYPES_USING_SCALE.contains(&self.base.as_str())
            && let (Some(precision), Some(scale)) = (self.numeric_precision, self.numeric_scale)
        {
            return format!("{}({}, {})", self.base, precision, scale);
        }

        self.base.clone()
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
