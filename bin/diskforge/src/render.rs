//! Terminal rendering of the event stream.

use std::io::{self, Write};

use chrono::Local;
use diskforge_core::{Event, EventReceiver, human_duration, human_size};

const BAR_WIDTH: usize = 30;

/// Prints events as they arrive. Progress redraws a single line on stderr.
pub struct Renderer {
    verbose: bool,
    /// A progress line is on screen without its trailing newline.
    bar_open: bool,
}

impl Renderer {
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            bar_open: false,
        }
    }

    /// Render until the run's `Done` event and return its success flag.
    /// A closed channel counts as failure.
    pub async fn run(mut self, events: EventReceiver) -> bool {
        while let Some(event) = events.recv_async().await {
            self.render(&event);
            if let Event::Done { success } = event {
                return success;
            }
        }
        self.close_bar();
        false
    }

    fn render(&mut self, event: &Event) {
        match event {
            Event::Progress { .. } | Event::Download { .. } => {
                if let Some(bar) = progress_line(event) {
                    eprint!("\r{bar}");
                    let _ = io::stderr().flush();
                    self.bar_open = true;
                }
            }
            Event::Log(_) if !self.verbose => {}
            Event::Done { .. } => self.close_bar(),
            _ => {
                if let Some(line) = message_line(event) {
                    self.close_bar();
                    println!("[{}] {line}", Local::now().format("%H:%M:%S"));
                }
            }
        }
    }

    fn close_bar(&mut self) {
        if self.bar_open {
            eprintln!();
            self.bar_open = false;
        }
    }
}

/// One-line text for a non-progress event, without the timestamp.
fn message_line(event: &Event) -> Option<String> {
    Some(match event {
        Event::Info(msg) => format!("  {msg}"),
        Event::Ok(msg) => format!("✓ {msg}"),
        Event::Warning(msg) => format!("! {msg}"),
        Event::Error(err) => match err.remedy() {
            Some(hint) => format!("✗ {err}\n           hint: {hint}"),
            None => format!("✗ {err}"),
        },
        Event::Log(line) => format!("│ {line}"),
        Event::Stage { index, label } => format!("▸ [{index}] {label}"),
        _ => return None,
    })
}

fn progress_line(event: &Event) -> Option<String> {
    match event {
        Event::Progress { percent, remaining } => {
            let eta = remaining.map(human_duration).unwrap_or_else(|| "—".into());
            Some(format!("{} {percent:5.1}%  ETA {eta}", bar(*percent)))
        }
        Event::Download {
            downloaded,
            total,
            percent,
            bytes_per_sec,
            remaining,
        } => {
            let size = match total {
                Some(total) => format!("{} / {}", human_size(*downloaded), human_size(*total)),
                None => human_size(*downloaded),
            };
            let eta = remaining.map(human_duration).unwrap_or_else(|| "—".into());
            Some(format!(
                "{} {size}  {}/s  ETA {eta}",
                bar(percent.unwrap_or(0.0)),
                human_size(*bytes_per_sec)
            ))
        }
        _ => None,
    }
}

fn bar(percent: f64) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * BAR_WIDTH as f64).round() as usize;
    format!("[{}{}]", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use diskforge_core::ConvertError;

    use super::*;

    #[test]
    fn bar_is_clamped() {
        assert_eq!(bar(0.0), format!("[{}]", ".".repeat(BAR_WIDTH)));
        assert_eq!(bar(250.0), format!("[{}]", "#".repeat(BAR_WIDTH)));
        assert_eq!(bar(50.0).matches('#').count(), BAR_WIDTH / 2);
    }

    #[test]
    fn progress_shows_eta() {
        let line = progress_line(&Event::Progress {
            percent: 42.0,
            remaining: Some(Duration::from_secs(65)),
        })
        .unwrap();
        assert!(line.ends_with(" 42.0%  ETA 1m 05s"), "{line}");
    }

    #[test]
    fn errors_carry_their_hint() {
        let line = message_line(&Event::Error(ConvertError::ToolMissingDependency {
            code: 127,
        }))
        .unwrap();
        assert!(line.starts_with("✗ "));
        assert!(line.contains("hint: reinstall qemu-img"));

        let plain = message_line(&Event::Error(ConvertError::ToolFailure(1))).unwrap();
        assert!(!plain.contains("hint"));
    }

    #[test]
    fn terminal_events_have_no_message() {
        assert!(message_line(&Event::Done { success: true }).is_none());
    }
}
