//! Mart query templates.
//!
//! A mart is a `(query, destination table)` pair handed to the store bridge:
//! the query runs against the core store and its result replaces the
//! destination table in the mart store.

use crate::router::Category;
use crate::sql::{quote_ident, quote_literal};

/// Destination shared by every per-category branch.
pub const SUB_CATEGORY_SALES_TABLE: &str = "sub_category_sales";

/// Default destination of the yearly sales mart.
pub const SALES_BY_YEAR_TABLE: &str = "sales_by_year";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MartSpec {
    pub query: String,
    pub table: String,
}

impl MartSpec {
    /// An externally supplied aggregate query, used as-is.
    pub fn yearly(query: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            table: table.into(),
        }
    }
}

/// Sub-category sales for one category, one customer segment and one year.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubCategorySales {
    pub category: Category,
    pub segment: String,
    pub year: i32,
}

impl SubCategorySales {
    /// Corporate segment, 2015.
    pub fn corporate_2015(category: Category) -> Self {
        Self {
            category,
            segment: "Corporate".to_string(),
            year: 2015,
        }
    }

    /// Name of the aggregate column, e.g. `total_sales_in_2015`.
    pub fn total_column(&self) -> String {
        format!("total_sales_in_{}", self.year)
    }

    pub fn query(&self) -> String {
        format!(
            r#"SELECT sc.sub_category_title AS sub_category_title, SUM(ss.sum_of_sale) AS {total}
FROM sales_store AS ss
    JOIN product AS p ON ss.product_id = p.product_id
    JOIN sub_category AS sc ON p.sub_category_id = sc.sub_category_id
    JOIN category AS c ON sc.category_id = c.category_id
    JOIN customer AS cs ON cs.customer_id = ss.customer_id
    JOIN segment AS s ON s.segment_id = cs.segment_id
    JOIN order_store AS os ON os.order_id = ss.order_id
    JOIN date_conversion AS dc ON dc.date_id = os.date_id
WHERE s.segment_title = {segment}
  AND dc."year" = {year}
  AND c.category_name = {category}
GROUP BY sc.sub_category_title
ORDER BY sc.sub_category_title"#,
            total = quote_ident(&self.total_column()),
            segment = quote_literal(&self.segment),
            year = self.year,
            category = quote_literal(self.category.as_str()),
        )
    }

    pub fn spec(&self) -> MartSpec {
        MartSpec {
            query: self.query(),
            table: SUB_CATEGORY_SALES_TABLE.to_string(),
        }
    }
}
