// src/services/tables.rs

//! Table extraction from HTML documents.

use scraper::{ElementRef, Html, Selector};

use crate::error::Result;
use crate::models::{Row, Table};
use crate::services::parser::normalize_text;
use crate::services::parse_selector;

/// Extract every table matching `selector` from `html`.
///
/// Rows normalizing to zero cells and tables with zero rows are dropped;
/// zero matches yield an empty vector.
pub fn extract_tables(html: &str, selector: &str) -> Result<Vec<Table>> {
    let table_sel = parse_selector(selector)?;
    let row_sel = parse_selector("tr")?;
    let cell_sel = parse_selector("th, td")?;
    let document = Html::parse_document(html);

    let tables = document
        .select(&table_sel)
        .enumerate()
        .filter_map(|(index, element)| {
            let rows: Vec<Row> = element
                .select(&row_sel)
                .map(|row| row_cells(row, &cell_sel))
                .filter(|cells| !cells.is_empty())
                .collect();
            (!rows.is_empty()).then(|| Table::new(index, rows))
        })
        .collect();

    Ok(tables)
}

fn row_cells(row: ElementRef<'_>, cell_sel: &Selector) -> Row {
    row.select(cell_sel)
        .map(|cell| normalize_text(&cell.text().collect::<String>()))
        .collect()
}
