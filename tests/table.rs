use adaptive_dash::table::{TextTable, render_table};

#[test]
fn render_table_right_aligns_numeric_columns() {
    let headers = vec!["id".to_string(), "name".to_string()];
    let rows = vec![
        vec!["1".to_string(), "Alice".to_string()],
        vec!["20".to_string(), "Bob".to_string()],
    ];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines, vec![" id  name", "---  -----", "  1  Alice", " 20  Bob"]);
}

#[test]
fn render_table_normalizes_control_characters() {
    let headers = vec!["note".to_string()];
    let rows = vec![vec!["line1\nline2\tvalue".to_string()]];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines.len(), 3);
    assert_eq!(lines[2], "line1 line2 value");
}

#[test]
fn render_table_ignores_ansi_sequences_in_widths() {
    let headers = vec!["status".to_string(), "code".to_string()];
    let rows = vec![vec!["\u{1b}[31mERR\u{1b}[0m".to_string(), "x".to_string()]];

    let rendered = render_table(&headers, &rows);
    let lines: Vec<&str> = rendered.lines().collect();

    assert_eq!(lines[0], "status  code");
    assert_eq!(lines[2], "\u{1b}[31mERR\u{1b}[0m     x");
}

#[test]
fn text_table_accepts_mixed_string_types() {
    let mut table = TextTable::new(["kpi", "value"]);
    assert!(table.is_empty());
    table.push(["leads".to_string(), "1.5".to_string()]);
    table.push(["sales", ""]);
    let rendered = table.render();
    let lines: Vec<&str> = rendered.lines().collect();
    assert_eq!(lines[2], "leads    1.5");
    assert_eq!(lines[3], "sales");
}
