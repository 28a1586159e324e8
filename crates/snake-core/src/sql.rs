//! Parameterized SQL statement construction.
//!
//! Statements only ever carry equality predicates. Identifiers are quoted
//! with double quotes and values are bound through positional `?`
//! placeholders, so the same input always yields the same SQL text.

use std::fmt;

use log::debug;
use rusqlite::{params_from_iter, Connection};

use crate::{
    error::{DatabaseResultExt, Result},
    value::{FieldValues, Value},
};

/// A SQL string together with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    /// Prepares (through the connection's statement cache) and executes the
    /// statement, returning the number of affected rows.
    pub fn execute(&self, conn: &Connection) -> Result<usize> {
        debug!("execute: {} {:?}", self.sql, self.params);
        let mut stmt = conn
            .prepare_cached(&self.sql)
            .db_context("Failed to prepare statement")?;
        stmt.execute(params_from_iter(self.params.iter()))
            .db_context("Failed to execute statement")
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Quotes an identifier, doubling any embedded quote.
pub fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

fn column_list<'a>(columns: impl IntoIterator<Item = &'a str>) -> String {
    columns
        .into_iter()
        .map(quote)
        .collect::<Vec<_>>()
        .join(", ")
}

fn push_where(sql: &mut String, params: &mut Vec<Value>, predicates: &FieldValues) {
    if predicates.is_empty() {
        return;
    }

    let conditions: Vec<String> = predicates
        .iter()
        .map(|(column, value)| {
            params.push(value.clone());
            format!("{} = ?", quote(column))
        })
        .collect();

    sql.push_str(" WHERE ");
    sql.push_str(&conditions.join(" AND "));
}

/// Sort direction for [`Select::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    fn as_str(self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Builder for `SELECT` statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    table: String,
    columns: Option<String>,
    predicates: FieldValues,
    order: Vec<(String, Order)>,
    limit: Option<u64>,
}

impl Select {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            predicates: FieldValues::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Selects the named columns instead of `*`.
    pub fn columns<'a>(mut self, columns: impl IntoIterator<Item = &'a str>) -> Self {
        self.columns = Some(column_list(columns));
        self
    }

    /// Selects a raw expression, such as a constant, instead of columns.
    pub fn raw(mut self, expression: impl Into<String>) -> Self {
        self.columns = Some(expression.into());
        self
    }

    /// Adds `column = value`; predicates are joined with `AND`.
    pub fn where_eq(&mut self, column: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.predicates.insert(column, value);
        self
    }

    pub fn where_all(&mut self, criteria: &FieldValues) -> &mut Self {
        for (column, value) in criteria.iter() {
            self.predicates.insert(column.clone(), value.clone());
        }
        self
    }

    pub fn order_by(&mut self, column: impl Into<String>, order: Order) -> &mut Self {
        self.order.push((column.into(), order));
        self
    }

    pub fn limit(&mut self, limit: u64) -> &mut Self {
        self.limit = Some(limit);
        self
    }

    pub fn to_statement(&self) -> Statement {
        let mut params = Vec::with_capacity(self.predicates.len());
        let columns = self.columns.as_deref().unwrap_or("*");
        let mut sql = format!("SELECT {columns} FROM {}", quote(&self.table));

        push_where(&mut sql, &mut params, &self.predicates);

        if !self.order.is_empty() {
            let order: Vec<String> = self
                .order
                .iter()
                .map(|(column, order)| format!("{} {}", quote(column), order.as_str()))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }

        Statement { sql, params }
    }
}

/// Starts a `SELECT * FROM table` statement.
pub fn select(table: &str) -> Select {
    Select::new(table)
}

/// `INSERT` with one placeholder per column; parameters are bound per row.
pub fn insert<'a>(table: &str, columns: impl IntoIterator<Item = &'a str>) -> String {
    let columns: Vec<&str> = columns.into_iter().collect();
    if columns.is_empty() {
        return format!("INSERT INTO {} DEFAULT VALUES", quote(table));
    }

    let placeholders = vec!["?"; columns.len()].join(", ");
    format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote(table),
        column_list(columns)
    )
}

/// `UPDATE table SET ... WHERE ...`; parameters are set values, then predicates.
pub fn update(table: &str, set: &FieldValues, predicates: &FieldValues) -> Statement {
    let mut params: Vec<Value> = set.values().cloned().collect();
    let assignments: Vec<String> = set
        .names()
        .map(|column| format!("{} = ?", quote(column)))
        .collect();
    let mut sql = format!("UPDATE {} SET {}", quote(table), assignments.join(", "));

    push_where(&mut sql, &mut params, predicates);

    Statement { sql, params }
}

/// `DELETE FROM table WHERE ...`.
pub fn delete(table: &str, predicates: &FieldValues) -> Statement {
    let mut params = Vec::with_capacity(predicates.len());
    let mut sql = format!("DELETE FROM {}", quote(table));

    push_where(&mut sql, &mut params, predicates);

    Statement { sql, params }
}
