//! Result rendering: aligned text tables or JSON.

use rill_core::result::QueryResult;
use rill_core::value::Value;

/// Renders a result the way the shell shows it.
pub fn render(result: &QueryResult, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(result).unwrap_or_else(|e| format!("{{\"error\": \"{e}\"}}"));
    }
    if let Some(err) = &result.error {
        return format!("error: {err}");
    }
    if result.columns.is_empty() {
        return format!(
            "ok ({} row{} affected, {:.1} ms)",
            result.affected,
            if result.affected == 1 { "" } else { "s" },
            result.execution_time_ms
        );
    }
    let mut out = table(&result.columns, &result.rows);
    out.push_str(&format!(
        "{} row{} ({:.1} ms)\n",
        result.rows.len(),
        if result.rows.len() == 1 { "" } else { "s" },
        result.execution_time_ms
    ));
    out
}

fn cell(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        other => other.to_string(),
    }
}

fn table(columns: &[String], rows: &[Vec<Value>]) -> String {
    let mut widths: Vec<usize> = columns.iter().map(String::len).collect();
    let rendered: Vec<Vec<String>> = rows
        .iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .map(|(i, v)| {
                    let s = cell(v);
                    if i < widths.len() && s.len() > widths[i] {
                        widths[i] = s.len();
                    }
                    s
                })
                .collect()
        })
        .collect();

    let mut out = String::new();
    let rule = |out: &mut String| {
        out.push('+');
        for w in &widths {
            out.push_str(&"-".repeat(w + 2));
            out.push('+');
        }
        out.push('\n');
    };
    rule(&mut out);
    out.push('|');
    for (col, &w) in columns.iter().zip(&widths) {
        out.push_str(&format!(" {col:<w$} |"));
    }
    out.push('\n');
    rule(&mut out);
    for row in &rendered {
        out.push('|');
        for (value, &w) in row.iter().zip(&widths) {
            out.push_str(&format!(" {value:<w$} |"));
        }
        out.push('\n');
    }
    rule(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_affected_summary() {
        let result = QueryResult::with_affected(2);
        let text = render(&result, false);
        assert!(text.contains("2 rows affected"));
    }

    #[test]
    fn renders_aligned_table() {
        let result = QueryResult::with_rows(
            vec!["id".into(), "name".into()],
            vec![
                vec![Value::Integer(1), Value::Text("ada".into())],
                vec![Value::Integer(2), Value::Null],
            ],
        );
        let text = render(&result, false);
        assert!(text.contains("| id | name |"));
        assert!(text.contains("| 2  | NULL |"));
        assert!(text.contains("2 rows"));
    }

    #[test]
    fn json_mode_is_machine_readable() {
        let result = QueryResult::with_affected(1);
        let text = render(&result, true);
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["affected"], 1);
    }
}
