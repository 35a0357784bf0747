//! # Filter and Key-Condition Expressions
//!
//! Typed conditions rendered into the store's expression language. Attribute
//! names and values always go through placeholders (`#n0`, `:v0`) so a name
//! never collides with a reserved word. The same types evaluate against items
//! directly, which is what the in-memory store uses.
//!
//! Operators accept the operator-facing form `attribute:operator:value`:
//!
//! ```text
//! PK0:begins_with:Resource:
//! status:eq:PUBLISHED
//! handle:exists
//! ```

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::codec::attribute::{Item, Number, TaggedValue};
use crate::error::{MigrationError, Result};

/// Comparison operators supported in filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Exists,
    NotExists,
    Eq,
    Ne,
    BeginsWith,
    Contains,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Operator {
    pub const ALL: [Operator; 10] = [
        Operator::BeginsWith,
        Operator::Eq,
        Operator::Ne,
        Operator::Contains,
        Operator::Exists,
        Operator::NotExists,
        Operator::Gt,
        Operator::Gte,
        Operator::Lt,
        Operator::Lte,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Exists => "exists",
            Operator::NotExists => "not_exists",
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::BeginsWith => "begins_with",
            Operator::Contains => "contains",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
        }
    }

    /// Whether the operator compares against a value
    pub fn takes_value(&self) -> bool {
        !matches!(self, Operator::Exists | Operator::NotExists)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self> {
        Operator::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| {
                let supported: Vec<&str> = Operator::ALL.iter().map(Operator::as_str).collect();
                MigrationError::configuration(
                    "filter",
                    format!("unsupported operator '{s}', expected one of: {}", supported.join(", ")),
                )
            })
    }
}

/// A single predicate on a named attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub attribute: String,
    pub operator: Operator,
    pub value: Option<TaggedValue>,
}

impl Condition {
    /// Build a condition, checking that a value is present exactly when the
    /// operator needs one
    pub fn new(
        attribute: impl Into<String>,
        operator: Operator,
        value: Option<TaggedValue>,
    ) -> Result<Self> {
        let attribute = attribute.into();
        match (operator.takes_value(), value.is_some()) {
            (true, false) => Err(MigrationError::configuration(
                "filter",
                format!("operator {operator} on '{attribute}' requires a value"),
            )),
            (false, true) => Err(MigrationError::configuration(
                "filter",
                format!("operator {operator} on '{attribute}' takes no value"),
            )),
            _ => Ok(Self {
                attribute,
                operator,
                value,
            }),
        }
    }

    pub fn exists(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: Operator::Exists,
            value: None,
        }
    }

    pub fn not_exists(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: Operator::NotExists,
            value: None,
        }
    }

    pub fn equals(attribute: impl Into<String>, value: TaggedValue) -> Self {
        Self {
            attribute: attribute.into(),
            operator: Operator::Eq,
            value: Some(value),
        }
    }

    pub fn begins_with(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            operator: Operator::BeginsWith,
            value: Some(TaggedValue::S(prefix.into())),
        }
    }

    /// Render with placeholders registered in `builder`
    pub fn render(&self, builder: &mut ExpressionBuilder) -> String {
        let name = builder.name(&self.attribute);
        let value = self
            .value
            .clone()
            .map(|v| builder.value(v))
            .unwrap_or_default();
        match self.operator {
            Operator::Exists => format!("attribute_exists({name})"),
            Operator::NotExists => format!("attribute_not_exists({name})"),
            Operator::Eq => format!("{name} = {value}"),
            Operator::Ne => format!("{name} <> {value}"),
            Operator::Gt => format!("{name} > {value}"),
            Operator::Gte => format!("{name} >= {value}"),
            Operator::Lt => format!("{name} < {value}"),
            Operator::Lte => format!("{name} <= {value}"),
            Operator::BeginsWith => format!("begins_with({name}, {value})"),
            Operator::Contains => format!("contains({name}, {value})"),
        }
    }

    /// Evaluate against an item
    pub fn matches(&self, item: &Item) -> bool {
        let actual = item.get(&self.attribute);
        let (actual, expected) = match (self.operator, actual, self.value.as_ref()) {
            (Operator::Exists, actual, _) => return actual.is_some(),
            (Operator::NotExists, actual, _) => return actual.is_none(),
            (Operator::Ne, None, _) => return true,
            (_, None, _) | (_, _, None) => return false,
            (_, Some(actual), Some(expected)) => (actual, expected),
        };

        match self.operator {
            Operator::Eq => values_equal(actual, expected),
            Operator::Ne => !values_equal(actual, expected),
            Operator::Gt => compare(actual, expected) == Some(Ordering::Greater),
            Operator::Gte => matches!(
                compare(actual, expected),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Operator::Lt => compare(actual, expected) == Some(Ordering::Less),
            Operator::Lte => matches!(
                compare(actual, expected),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Operator::BeginsWith => match (actual, expected) {
                (TaggedValue::S(a), TaggedValue::S(p)) => a.starts_with(p.as_str()),
                (TaggedValue::B(a), TaggedValue::B(p)) => a.starts_with(p),
                _ => false,
            },
            Operator::Contains => contains(actual, expected),
            Operator::Exists | Operator::NotExists => false,
        }
    }
}

impl FromStr for Condition {
    type Err = MigrationError;

    /// Parse `attribute:operator[:value]`; the value may itself contain `:`
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let attribute = parts.next().unwrap_or_default().trim();
        let operator = parts.next().map(str::trim).ok_or_else(|| {
            MigrationError::configuration(
                "filter",
                format!("invalid filter '{s}', expected attribute:operator:value"),
            )
        })?;
        if attribute.is_empty() {
            return Err(MigrationError::configuration(
                "filter",
                format!("invalid filter '{s}', attribute name is empty"),
            ));
        }
        let operator: Operator = operator.parse()?;
        let value = parts.next();

        if operator.takes_value() {
            let value = value.ok_or_else(|| {
                MigrationError::configuration(
                    "filter",
                    format!("invalid filter '{s}', operator {operator} requires a value"),
                )
            })?;
            Condition::new(attribute, operator, Some(TaggedValue::S(value.to_string())))
        } else {
            let value = value
                .filter(|v| !v.is_empty())
                .map(|v| TaggedValue::S(v.to_string()));
            Condition::new(attribute, operator, value)
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(
                f,
                "{}:{}:{}",
                self.attribute,
                self.operator,
                crate::store::render_key_value(value)
            ),
            None => write!(f, "{}:{}", self.attribute, self.operator),
        }
    }
}

fn values_equal(actual: &TaggedValue, expected: &TaggedValue) -> bool {
    match (actual, expected) {
        (TaggedValue::N(_), TaggedValue::N(_)) => compare(actual, expected) == Some(Ordering::Equal),
        _ => actual == expected,
    }
}

fn compare(actual: &TaggedValue, expected: &TaggedValue) -> Option<Ordering> {
    match (actual, expected) {
        (TaggedValue::S(a), TaggedValue::S(b)) => Some(a.cmp(b)),
        (TaggedValue::B(a), TaggedValue::B(b)) => Some(a.cmp(b)),
        (TaggedValue::N(a), TaggedValue::N(b)) => {
            let a = Number::parse(a)?.as_f64();
            let b = Number::parse(b)?.as_f64();
            a.partial_cmp(&b)
        }
        _ => None,
    }
}

fn contains(actual: &TaggedValue, expected: &TaggedValue) -> bool {
    match (actual, expected) {
        (TaggedValue::S(a), TaggedValue::S(e)) => a.contains(e.as_str()),
        (TaggedValue::B(a), TaggedValue::B(e)) => {
            e.is_empty() || a.windows(e.len()).any(|w| w == e.as_slice())
        }
        (TaggedValue::Ss(set), TaggedValue::S(e)) => set.contains(e),
        (TaggedValue::Ns(set), TaggedValue::N(_)) => set
            .iter()
            .any(|n| values_equal(&TaggedValue::N(n.clone()), expected)),
        (TaggedValue::Bs(set), TaggedValue::B(e)) => set.contains(e),
        (TaggedValue::L(list), e) => list.iter().any(|v| values_equal(v, e)),
        _ => false,
    }
}

/// AND-combination of conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub conditions: Vec<Condition>,
}

impl Filter {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }

    /// Parse every `attribute:operator:value` string into one filter
    pub fn parse_all<S: AsRef<str>>(specs: &[S]) -> Result<Self> {
        specs
            .iter()
            .map(|s| s.as_ref().parse::<Condition>())
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Render as one expression, or `None` for an empty filter
    pub fn render(&self, builder: &mut ExpressionBuilder) -> Option<String> {
        if self.conditions.is_empty() {
            return None;
        }
        Some(
            self.conditions
                .iter()
                .map(|c| c.render(builder))
                .collect::<Vec<_>>()
                .join(" AND "),
        )
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.conditions.iter().all(|c| c.matches(item))
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.conditions.iter().map(ToString::to_string).collect();
        f.write_str(&parts.join(" AND "))
    }
}

/// Condition on the sort key of a query
#[derive(Debug, Clone, PartialEq)]
pub enum SortCondition {
    Eq { attribute: String, value: TaggedValue },
    BeginsWith { attribute: String, prefix: String },
}

/// Equality on the partition key plus an optional sort-key condition
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub partition_key: String,
    pub partition_value: TaggedValue,
    pub sort: Option<SortCondition>,
}

impl KeyCondition {
    pub fn partition_eq(attribute: impl Into<String>, value: TaggedValue) -> Self {
        Self {
            partition_key: attribute.into(),
            partition_value: value,
            sort: None,
        }
    }

    pub fn and_sort_eq(mut self, attribute: impl Into<String>, value: TaggedValue) -> Self {
        self.sort = Some(SortCondition::Eq {
            attribute: attribute.into(),
            value,
        });
        self
    }

    pub fn and_sort_begins_with(
        mut self,
        attribute: impl Into<String>,
        prefix: impl Into<String>,
    ) -> Self {
        self.sort = Some(SortCondition::BeginsWith {
            attribute: attribute.into(),
            prefix: prefix.into(),
        });
        self
    }

    pub fn render(&self, builder: &mut ExpressionBuilder) -> String {
        let pk = builder.name(&self.partition_key);
        let pv = builder.value(self.partition_value.clone());
        let mut expression = format!("{pk} = {pv}");
        match &self.sort {
            Some(SortCondition::Eq { attribute, value }) => {
                let sk = builder.name(attribute);
                let sv = builder.value(value.clone());
                expression.push_str(&format!(" AND {sk} = {sv}"));
            }
            Some(SortCondition::BeginsWith { attribute, prefix }) => {
                let sk = builder.name(attribute);
                let sv = builder.value(TaggedValue::S(prefix.clone()));
                expression.push_str(&format!(" AND begins_with({sk}, {sv})"));
            }
            None => {}
        }
        expression
    }

    /// The equivalent filter, for evaluating against items directly
    pub fn as_filter(&self) -> Filter {
        let mut filter = Filter::new(vec![Condition::equals(
            self.partition_key.clone(),
            self.partition_value.clone(),
        )]);
        match &self.sort {
            Some(SortCondition::Eq { attribute, value }) => {
                filter = filter.and(Condition::equals(attribute.clone(), value.clone()));
            }
            Some(SortCondition::BeginsWith { attribute, prefix }) => {
                filter = filter.and(Condition::begins_with(attribute.clone(), prefix.clone()));
            }
            None => {}
        }
        filter
    }

    pub fn sort_attribute(&self) -> Option<&str> {
        match &self.sort {
            Some(SortCondition::Eq { attribute, .. } | SortCondition::BeginsWith { attribute, .. }) => {
                Some(attribute)
            }
            None => None,
        }
    }
}

/// Allocates name and value placeholders for one request
#[derive(Debug, Clone)]
pub struct ExpressionBuilder {
    name_prefix: &'static str,
    value_prefix: &'static str,
    names: HashMap<String, String>,
    placeholders: HashMap<String, String>,
    values: Item,
}

impl Default for ExpressionBuilder {
    fn default() -> Self {
        Self::with_prefixes("#n", ":v")
    }
}

impl ExpressionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefixes(name_prefix: &'static str, value_prefix: &'static str) -> Self {
        Self {
            name_prefix,
            value_prefix,
            names: HashMap::new(),
            placeholders: HashMap::new(),
            values: Item::new(),
        }
    }

    /// Placeholder for an attribute name; the same name reuses its placeholder
    pub fn name(&mut self, attribute: &str) -> String {
        if let Some(existing) = self.placeholders.get(attribute) {
            return existing.clone();
        }
        let placeholder = format!("{}{}", self.name_prefix, self.names.len());
        self.names.insert(placeholder.clone(), attribute.to_string());
        self.placeholders
            .insert(attribute.to_string(), placeholder.clone());
        placeholder
    }

    /// Placeholder for a value
    pub fn value(&mut self, value: TaggedValue) -> String {
        let placeholder = format!("{}{}", self.value_prefix, self.values.len());
        self.values.insert(placeholder.clone(), value);
        placeholder
    }

    /// Placeholder-to-name and placeholder-to-value tables
    pub fn into_parts(self) -> (HashMap<String, String>, Item) {
        (self.names, self.values)
    }
}
