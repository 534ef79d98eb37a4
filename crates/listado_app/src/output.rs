//! Terminal and JSON rendering of a pipeline result.

use listado_engine::{Completeness, Outcome, PipelineResult};
use serde_json::json;

pub fn is_empty(outcome: &Outcome) -> bool {
    match outcome {
        Outcome::Count { value, .. } => *value == 0,
        Outcome::Preview { listings, .. } => listings.is_empty(),
        Outcome::Export { rows, .. } => *rows == 0,
    }
}

pub fn print_text(result: &PipelineResult) {
    let applied = &result.applied;
    println!("Busqueda: {} ({})", applied.query, applied.country);
    if !applied.include_words.is_empty() {
        println!("  con: {}", applied.include_words.join(", "));
    }
    if !applied.exclude_words.is_empty() {
        println!("  sin: {}", applied.exclude_words.join(", "));
    }

    match &result.outcome {
        Outcome::Count { value, estimate } => {
            let label = if *estimate { "~" } else { "" };
            println!("Resultados: {label}{value}");
        }
        Outcome::Preview { columns, rows, .. } => {
            if rows.is_empty() {
                println!("Sin resultados.");
            } else {
                print_table(columns, rows);
            }
        }
        Outcome::Export { path, rows } => {
            println!("Exportado: {} ({rows} filas)", path.display());
        }
    }

    let elapsed = result.elapsed.as_secs_f64();
    match &result.completeness {
        Completeness::Complete => println!("Listo en {elapsed:.1}s."),
        Completeness::Partial(reason) => {
            println!("Resultado parcial en {elapsed:.1}s: {reason}.");
        }
    }
}

pub fn to_json(result: &PipelineResult) -> String {
    let outcome = match &result.outcome {
        Outcome::Count { value, estimate } => json!({
            "mode": "count",
            "count": value,
            "estimate": estimate,
        }),
        Outcome::Preview { listings, .. } => json!({
            "mode": "preview",
            "count": listings.len(),
            "listings": listings,
        }),
        Outcome::Export { path, rows } => json!({
            "mode": "export",
            "path": path.display().to_string(),
            "rows": rows,
        }),
    };
    let value = json!({
        "applied_filters": result.applied,
        "completeness": result.completeness,
        "elapsed_secs": result.elapsed.as_secs_f64(),
        "fetched_at": chrono::Utc::now().to_rfc3339(),
        "result": outcome,
    });
    // A JSON object of plain values always serializes.
    serde_json::to_string_pretty(&value).unwrap_or_else(|_| "{}".to_string())
}

/// Fixed-width table, columns sized to their widest cell.
fn print_table(columns: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = columns.iter().map(|c| c.chars().count()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.chars().count());
            }
        }
    }

    let header: Vec<String> = columns
        .iter()
        .enumerate()
        .map(|(i, c)| pad(c, widths[i]))
        .collect();
    println!("{}", header.join("  "));
    println!("{}", widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  "));
    for row in rows {
        let line: Vec<String> = row
            .iter()
            .enumerate()
            .map(|(i, cell)| pad(cell, widths.get(i).copied().unwrap_or(0)))
            .collect();
        println!("{}", line.join("  ").trim_end());
    }
}

fn pad(text: &str, width: usize) -> String {
    let len = text.chars().count();
    if len >= width {
        text.to_string()
    } else {
        format!("{text}{}", " ".repeat(width - len))
    }
}
