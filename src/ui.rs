//! Terminal output.
//!
//! [`Reporter`] owns the progress bar every worker prints through, so
//! compiler output appears as each task finishes instead of after the build.
//! [`Table`] renders the end-of-build summary with box-drawing characters,
//! sized to the terminal.

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::cmp;
use std::fmt::Write as _;

pub struct Reporter {
    bar: ProgressBar,
    show_commands: bool,
}

impl Reporter {
    pub fn new(show_commands: bool) -> Self {
        let style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        Self { bar, show_commands }
    }

    /// A reporter that draws nothing.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            show_commands: false,
        }
    }

    pub fn add_work(&self, units: u64) {
        self.bar.inc_length(units);
    }

    /// Count work that will never run (aborted units).
    pub fn skip(&self, units: u64) {
        self.bar.inc(units);
    }

    pub fn println(&self, line: impl AsRef<str>) {
        self.bar.println(line.as_ref());
    }

    pub fn status(&self, message: impl Into<String>) {
        self.bar.set_message(message.into());
    }

    pub fn command(&self, command: &str) {
        if self.show_commands {
            self.bar.println(command.dimmed().to_string());
        }
    }

    /// Print one finished task together with whatever the tool wrote.
    pub fn task_done(&self, project: &str, label: &str, success: bool, output: &str, hint: Option<String>) {
        let output = output.trim_end();
        if !success {
            self.bar
                .println(format!("{} {}: failed to build {}", "x".red(), project.bold(), label));
        } else if !output.is_empty() {
            self.bar
                .println(format!("{} {}: warnings in {}", "!".yellow(), project.bold(), label));
        }
        if !output.is_empty() {
            self.bar.println(output);
        }
        if let Some(hint) = hint {
            self.bar.println(format!("   {} {}", "hint:".cyan(), hint));
        }
        self.bar.inc(1);
    }

    pub fn link_done(&self, project: &str, output_name: &str, success: bool, output: &str, hint: Option<String>) {
        let output = output.trim_end();
        if success {
            self.bar
                .println(format!("{} {}: linked {}", "✓".green(), project.bold(), output_name));
        } else {
            self.bar
                .println(format!("{} {}: failed to link {}", "x".red(), project.bold(), output_name));
        }
        if !output.is_empty() {
            self.bar.println(output);
        }
        if let Some(hint) = hint {
            self.bar.println(format!("   {} {}", "hint:".cyan(), hint));
        }
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        if row.len() == self.headers.len() {
            self.rows.push(row);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn print(&self) {
        let (_, term_width) = console::Term::stdout().size();
        print!("{}", self.render(term_width as usize));
    }

    /// Lay the table out for a terminal `max_width` columns wide.
    pub fn render(&self, max_width: usize) -> String {
        let mut out = String::new();
        if self.headers.is_empty() {
            return out;
        }

        let mut col_widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let clean_len = strip_ansi(&sanitize_content(cell)).chars().count();
                col_widths[i] = cmp::max(col_widths[i], clean_len);
            }
        }

        // Shrink the widest column until the table fits, but never below 8.
        let overhead = 3 + 3 * self.headers.len();
        let available = max_width.saturating_sub(overhead);
        let mut current: usize = col_widths.iter().sum();
        while current > available {
            let Some((idx, &widest)) = col_widths.iter().enumerate().max_by_key(|(_, w)| **w) else {
                break;
            };
            if widest <= 8 {
                break;
            }
            col_widths[idx] -= 1;
            current -= 1;
        }

        let make_sep = |left: &str, mid: &str, right: &str| -> String {
            let mut s = String::from("  ");
            s.push_str(left);
            for (i, width) in col_widths.iter().enumerate() {
                s.push_str(&"─".repeat(width + 2));
                if i < col_widths.len() - 1 {
                    s.push_str(mid);
                }
            }
            s.push_str(right);
            s
        };

        let _ = writeln!(out, "{}", make_sep("┌", "┬", "┐"));
        out.push_str("  │");
        for (i, header) in self.headers.iter().enumerate() {
            let truncated = truncate(header, col_widths[i]);
            let padding = col_widths[i].saturating_sub(truncated.chars().count());
            let _ = write!(out, " {} {}│", truncated.bold(), " ".repeat(padding));
        }
        out.push('\n');
        let _ = writeln!(out, "{}", make_sep("├", "┼", "┤"));

        for row in &self.rows {
            out.push_str("  │");
            for (i, cell) in row.iter().enumerate() {
                let clean_raw = sanitize_content(cell);
                let truncated = console::truncate_str(&clean_raw, col_widths[i], "...").to_string();
                let visible = strip_ansi(&truncated).chars().count();
                let padding = col_widths[i].saturating_sub(visible);
                let _ = write!(out, " {} {}│", truncated, " ".repeat(padding));
            }
            out.push('\n');
        }
        let _ = writeln!(out, "{}", make_sep("└", "┴", "┘"));
        out
    }
}

fn truncate(s: &str, max_width: usize) -> String {
    if s.chars().count() > max_width {
        let mut result: String = s.chars().take(max_width.saturating_sub(3)).collect();
        result.push_str("...");
        result
    } else {
        s.to_string()
    }
}

fn sanitize_content(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            _ => c,
        })
        .collect()
}

pub fn strip_ansi(s: &str) -> String {
    let mut result = String::new();
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            if let Some(&'[') = chars.peek() {
                chars.next();
                for c in chars.by_ref() {
                    if c == 'm' {
                        break;
                    }
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}
