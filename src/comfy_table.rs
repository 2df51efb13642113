use anyhow::Result;
use chrono::{DateTime, Utc};
use comfy_table::{
    Attribute, Cell, CellAlignment, Color, ContentArrangement, Table, modifiers::UTF8_ROUND_CORNERS,
    presets::UTF8_BORDERS_ONLY,
};

use crate::analysis::ScanReport;

/// Presentation of a finished pass.
pub trait Reporter {
    fn report(&self, report: ScanReport) -> Result<()>;
}

/// Prints qualifying pairs as a table on stdout.
#[derive(Debug, Default)]
pub struct ComfyTableReporter {
    /// Row cap; `None` prints every hit.
    pub max_rows: Option<usize>,
}

impl Reporter for ComfyTableReporter {
    fn report(&self, report: ScanReport) -> Result<()> {
        println!("{}", self.render(&report));
        Ok(())
    }
}

// Deeper below the threshold -> brighter.
fn get_visibility_ratio(rsi: f64, threshold: f64) -> f64 {
    if threshold <= 0.0 {
        return 1.0;
    }
    (0.4 + 0.6 * (1.0 - rsi / threshold)).clamp(0.4, 1.0)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%d-%m-%Y %H:%M:%S").to_string()
}

fn format_price(price: f64) -> String {
    // Keep sub-cent pairs readable.
    if price < 1.0 {
        format!("{:.8}", price)
    } else {
        format!("{:.4}", price)
    }
}

impl ComfyTableReporter {
    pub fn render(&self, report: &ScanReport) -> String {
        let title = format!(
            "{} pairs on {} with RSI below {} (data taken at {} UTC)",
            report.quote_asset,
            report.interval,
            report.threshold,
            format_timestamp(report.finished_at)
        );

        let mut footer = format!(
            "{} of {} pairs scanned",
            report.computed, report.requested
        );
        if !report.skipped.is_empty() {
            footer.push_str(&format!(", {} skipped", report.skipped.len()));
        }
        if !report.unfinished.is_empty() {
            footer.push_str(&format!(
                ", {} unfinished at deadline",
                report.unfinished.len()
            ));
        }

        if report.hits.is_empty() {
            let what = if report.requested == 0 {
                "No pairs found.".to_string()
            } else {
                format!("No pairs found below RSI {}.", report.threshold)
            };
            return format!("\n{}\n{}\n{}\n", title, what, footer);
        }

        let mut table = Table::new();
        table
            .load_preset(UTF8_BORDERS_ONLY)
            .apply_modifier(UTF8_ROUND_CORNERS)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                Cell::new("Rank").add_attribute(Attribute::Bold),
                Cell::new("Pair").add_attribute(Attribute::Bold),
                Cell::new("RSI")
                    .add_attribute(Attribute::Bold)
                    .set_alignment(CellAlignment::Right),
                Cell::new(format!("Price ({})", report.quote_asset))
                    .add_attribute(Attribute::Bold)
                    .set_alignment(CellAlignment::Right),
            ]);

        let rows = report.hits.iter().take(self.max_rows.unwrap_or(usize::MAX));
        for (i, hit) in rows.enumerate() {
            let ratio = get_visibility_ratio(hit.rsi, report.threshold);
            let cyan_val = (255.0 * ratio) as u8;
            let red_val = (255.0 * ratio) as u8;

            table.add_row(vec![
                Cell::new(i + 1).fg(Color::DarkGrey),
                Cell::new(&hit.symbol).fg(Color::Rgb {
                    r: 0,
                    g: cyan_val,
                    b: cyan_val,
                }),
                Cell::new(format!("{:.2}", hit.rsi))
                    .fg(Color::Rgb {
                        r: red_val,
                        g: 0,
                        b: 0,
                    })
                    .set_alignment(CellAlignment::Right),
                Cell::new(format_price(hit.last_close)).set_alignment(CellAlignment::Right),
            ]);
        }

        format!("\n{}\n{}\n{}\n", title, table, footer)
    }
}
