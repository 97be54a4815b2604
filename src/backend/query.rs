// SPDX-License-Identifier: MPL-2.0

//! Relational query description, rendered to PostgREST parameters.

use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    Neq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::Neq(column, _) | Filter::In(column, _) => column,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// One table read/write target: projection, filters, ordering, row cap.
///
/// The projection accepts nested foreign-key embeds, e.g.
/// `*, user:users!posts_user_id_fkey(username, avatar_url)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
    pub order: Vec<Order>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn table(name: &str) -> Self {
        Self {
            table: name.to_string(),
            columns: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    pub fn select(mut self, columns: &str) -> Self {
        self.columns = compact_projection(columns);
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn neq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Neq(column.to_string(), value.into()));
        self
    }

    pub fn in_list<V: Into<Value>>(mut self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filters.push(Filter::In(
            column.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query-string pairs for `/rest/v1/<table>`.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.columns.clone())];
        params.extend(self.filter_params());

        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect();
            params.push(("order".to_string(), order.join(",")));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }

    /// Filter-only pairs, for writes that must not carry `select`/`order`.
    pub fn filter_params(&self) -> Vec<(String, String)> {
        self.filters
            .iter()
            .map(|filter| {
                let rendered = match filter {
                    Filter::Eq(_, Value::Null) => "is.null".to_string(),
                    Filter::Neq(_, Value::Null) => "not.is.null".to_string(),
                    Filter::Eq(_, value) => format!("eq.{}", render_scalar(value)),
                    Filter::Neq(_, value) => format!("neq.{}", render_scalar(value)),
                    Filter::In(_, values) => {
                        let items: Vec<String> = values.iter().map(render_list_item).collect();
                        format!("in.({})", items.join(","))
                    }
                };
                (filter.column().to_string(), rendered)
            })
            .collect()
    }
}

/// Strip layout whitespace from a multi-line projection.
fn compact_projection(columns: &str) -> String {
    columns
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("")
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// List items containing PostgREST delimiters must be double-quoted.
fn render_list_item(value: &Value) -> String {
    let raw = render_scalar(value);
    if raw.contains([',', '(', ')', '"', ' ']) {
        format!("\"{}\"", raw.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        raw
    }
}
