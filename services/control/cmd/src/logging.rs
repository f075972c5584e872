//! Console log formatting for the control client.

use std::fmt::{self, Write as _};
use std::io::IsTerminal;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// ANSI color codes for console output
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths for alignment
const COMPONENT_WIDTH: usize = 20;
const LOG_LEVEL_WIDTH: usize = 7;

/// Formats events as `[timestamp] [component] [level] message key=value`
pub struct ControlLogFormatter {
    service_name: String,
    color_enabled: bool,
}

/// Log at info level tagged with a component name
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

/// Log at warn level tagged with a component name
#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

/// Log at debug level tagged with a component name
#[macro_export]
macro_rules! component_debug {
    ($component:expr, $($arg:tt)*) => {
        tracing::debug!(component = $component, $($arg)*)
    };
}

/// Log at error level tagged with a component name
#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

impl ControlLogFormatter {
    pub fn new(service_name: &str) -> Self {
        Self::with_color(service_name, color_supported())
    }

    pub fn with_color(service_name: &str, color_enabled: bool) -> Self {
        Self {
            service_name: service_name.to_string(),
            color_enabled,
        }
    }

    /// Fixed-width component column, `service-component` when tagged
    fn format_component(&self, component: Option<&str>) -> String {
        let name = match component {
            Some(component) => format!("{}-{}", self.service_name, component),
            None => self.service_name.clone(),
        };

        if name.chars().count() > COMPONENT_WIDTH {
            let truncated: String = name.chars().take(COMPONENT_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = COMPONENT_WIDTH)
        }
    }

    fn format_log_level(&self, level: &tracing::Level) -> String {
        let level_str = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };

        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH + 2)
    }

    fn color_for_level(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }

        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG | tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }

    fn format_line(&self, timestamp: &str, level: &tracing::Level, fields: &FieldVisitor) -> String {
        let color = self.color_for_level(level);
        let (reset, cyan) = if self.color_enabled {
            (COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "")
        };

        let mut line = format!(
            "{}[{}] [{}] [{}{}{}] {}",
            cyan,
            timestamp,
            self.format_component(fields.component.as_deref()),
            color,
            self.format_log_level(level),
            reset,
            fields.message
        );
        for (key, value) in &fields.extra {
            let _ = write!(line, " {}={}", key, value);
        }
        line.push_str(reset);
        line
    }
}

impl<S, N> FormatEvent<S, N> for ControlLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f").to_string();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        writeln!(
            writer,
            "{}",
            self.format_line(&timestamp, event.metadata().level(), &visitor)
        )
    }
}

/// Collects the message, component, and remaining fields of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
    extra: Vec<(&'static str, String)>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            name => self.extra.push((name, value.to_string())),
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let formatted = format!("{:?}", value);
        let unquoted = formatted
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(formatted);

        match field.name() {
            "message" => self.message = unquoted,
            "component" => self.component = Some(unquoted),
            name => self.extra.push((name, unquoted)),
        }
    }
}

/// Colors only when stdout is a terminal that is not `dumb`
fn color_supported() -> bool {
    if std::env::var("TERM").map_or(false, |term| term == "dumb") {
        return false;
    }
    std::io::stdout().is_terminal()
}
