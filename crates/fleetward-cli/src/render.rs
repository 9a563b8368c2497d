use std::cell::RefCell;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use anstyle::{AnsiColor, Effects, Style};
use fleetward_upgrade::{Stage, StageObserver, UpgradeReport};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn current_output_style() -> OutputStyle {
    output_style_for(
        std::env::var_os("NO_COLOR").is_some_and(|value| !value.is_empty()),
        std::io::stdout().is_terminal(),
    )
}

pub(crate) fn output_style_for(no_color: bool, stdout_is_terminal: bool) -> OutputStyle {
    if no_color || !stdout_is_terminal {
        OutputStyle::Plain
    } else {
        OutputStyle::Rich
    }
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("{} {message}", status_badge(status)),
    }
}

pub(crate) fn render_section_header(style: OutputStyle, title: &str) -> Option<String> {
    match style {
        OutputStyle::Plain => None,
        OutputStyle::Rich => Some(colorize(section_style(), &format!("== {title} =="))),
    }
}

fn status_badge(status: &str) -> &'static str {
    match status {
        "ok" | "pass" => "[OK]",
        "warn" => "[WARN]",
        "err" | "fail" => "[ERR]",
        _ => "[..]",
    }
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn spinner_style() -> Style {
    Style::new().fg_color(Some(AnsiColor::BrightCyan.into()))
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}

pub(crate) fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{secs}.{:03}s", elapsed.subsec_millis())
    }
}

/// Shows a spinner while the orchestrator waits for the worker to go idle.
pub(crate) struct IdleSpinner {
    style: OutputStyle,
    active: RefCell<Option<(ProgressBar, Instant)>>,
}

impl IdleSpinner {
    pub(crate) fn new(style: OutputStyle) -> Self {
        Self {
            style,
            active: RefCell::new(None),
        }
    }

    fn start(&self) {
        if self.style == OutputStyle::Plain {
            return;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan.bold} {msg} {elapsed_precise}")
        {
            spinner.set_style(style.tick_chars("|/-\\ "));
        }
        spinner.set_message(colorize(spinner_style(), "waiting for worker to go idle"));
        spinner.enable_steady_tick(Duration::from_millis(120));
        *self.active.borrow_mut() = Some((spinner, Instant::now()));
    }

    fn stop(&self) {
        let Some((spinner, started)) = self.active.borrow_mut().take() else {
            return;
        };
        spinner.finish_and_clear();
        println!(
            "{}",
            render_status_line(
                self.style,
                "step",
                &format!("waited {} for worker", format_elapsed(started.elapsed()))
            )
        );
    }
}

impl StageObserver for IdleSpinner {
    fn stage_entered(&self, stage: Stage) {
        if stage == Stage::IdleWait {
            self.start();
        } else {
            self.stop();
        }
    }

    fn run_finished(&self, _report: &UpgradeReport) {
        self.stop();
    }
}
