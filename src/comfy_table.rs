use crate::pipeline::PipelineOutput;
use crate::presentation::{self, Theme, Trace};
use anyhow::Result;
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

// Terminal colours closest to each theme's foreground.
fn header_color(theme: Theme) -> Color {
    match theme {
        Theme::Light => Color::Black,
        Theme::Dark => Color::White,
    }
}

/// Renders the raw-data table, most recent `limit` rows last.
pub fn render(output: &PipelineOutput, limit: usize) -> Result<String> {
    let (header, rows) = presentation::raw_rows(&output.store)?;
    let color = header_color(output.params.theme);

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header.iter().enumerate().map(|(i, label)| {
            let cell = Cell::new(label).add_attribute(Attribute::Bold).fg(color);
            if i == 0 {
                cell
            } else {
                cell.set_alignment(CellAlignment::Right)
            }
        }));

    let skip = rows.len().saturating_sub(limit);
    for row in rows.into_iter().skip(skip) {
        table.add_row(row.into_iter().enumerate().map(|(i, value)| {
            if i == 0 {
                Cell::new(value).fg(Color::DarkGrey)
            } else {
                Cell::new(value).set_alignment(CellAlignment::Right)
            }
        }));
    }

    let mut text = format!(
        "{}\n\n{}\n{}",
        output.success_message(),
        presentation::price_title(&output.ticker),
        table
    );

    if let Some(trace) = presentation::volume_trace(output)? {
        text.push_str(&format!(
            "\n\n{}\n{}",
            presentation::volume_title(&output.ticker),
            volume_table(output, &trace, skip, color)
        ));
    }

    Ok(text)
}

const VOLUME_BAR_WIDTH: usize = 30;

/// Date, volume and a bar scaled to the largest volume among rows `skip..`.
fn volume_table(output: &PipelineOutput, trace: &Trace, skip: usize, color: Color) -> Table {
    let shown: Vec<(usize, f64)> = trace
        .points
        .iter()
        .map(|(x, y)| (*x as usize, *y))
        .filter(|(row, _)| *row >= skip)
        .collect();
    let max = shown.iter().map(|(_, y)| *y).fold(0.0, f64::max);

    let mut table = Table::new();
    table
        .load_preset(UTF8_BORDERS_ONLY)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new(presentation::DATE_AXIS_TITLE).add_attribute(Attribute::Bold).fg(color),
            Cell::new(&trace.name)
                .add_attribute(Attribute::Bold)
                .fg(color)
                .set_alignment(CellAlignment::Right),
            Cell::new(""),
        ]);

    for (row, volume) in shown {
        let Some(date) = output.store.dates().get(row) else {
            continue;
        };
        let width = if max > 0.0 {
            ((volume / max) * VOLUME_BAR_WIDTH as f64).round() as usize
        } else {
            0
        };
        table.add_row(vec![
            Cell::new(date.format("%Y-%m-%d")).fg(Color::DarkGrey),
            Cell::new(volume as u64).set_alignment(CellAlignment::Right),
            Cell::new("█".repeat(width)).fg(Color::Grey),
        ]);
    }
    table
}

pub fn run(output: &PipelineOutput, limit: usize) -> Result<()> {
    println!("\n{}\n", render(output, limit)?);
    Ok(())
}
