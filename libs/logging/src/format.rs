//! A compact, single-line event format.

use std::{fmt, num::NonZeroU8};

use nu_ansi_term::{Color, Style};
use time::{
    OffsetDateTime,
    format_description::well_known::{
        Iso8601,
        iso8601::{Config, EncodedConfig, TimePrecision},
    },
};
use tracing::{Event, Level, Subscriber};
use tracing_log::NormalizeEvent as _;
use tracing_subscriber::{
    fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields, format::Writer},
    registry::{LookupSpan, Scope},
};

/// Renders events as `<timestamp> <LEVEL> <target>: <message> <fields> <span fields>`.
///
/// Span names are omitted; their fields are appended to the event's own.
pub struct Format {
    time: bool,
    level: bool,
    target: bool,
}

impl Format {
    pub fn new() -> Self {
        Self {
            time: true,
            level: true,
            target: true,
        }
    }

    pub fn without_timestamp(self) -> Self {
        Self {
            time: false,
            ..self
        }
    }

    pub fn without_level(self) -> Self {
        Self {
            level: false,
            ..self
        }
    }

    pub fn without_target(self) -> Self {
        Self {
            target: false,
            ..self
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Self::new()
    }
}

const TIMESTAMP: EncodedConfig = Config::DEFAULT
    .set_time_precision(TimePrecision::Second {
        decimal_digits: NonZeroU8::new(3),
    })
    .encode();

impl<S, N> FormatEvent<S, N> for Format
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let normalized_meta = event.normalized_metadata();
        let meta = normalized_meta.as_ref().unwrap_or_else(|| event.metadata());
        let ansi = writer.has_ansi_escapes();
        let dimmed = if ansi {
            Style::new().dimmed()
        } else {
            Style::new()
        };

        if self.time {
            let now = OffsetDateTime::now_utc()
                .format(&Iso8601::<TIMESTAMP>)
                .map_err(|_| fmt::Error)?;

            write!(writer, "{} ", dimmed.paint(now))?;
        }

        if self.level {
            write!(writer, "{} ", FmtLevel::new(meta.level(), ansi))?;
        }

        if self.target {
            write!(writer, "{} ", dimmed.paint(format!("{}:", meta.target())))?;
        }

        ctx.format_fields(writer.by_ref(), event)?;

        for span in ctx.event_scope().into_iter().flat_map(Scope::from_root) {
            let extensions = span.extensions();

            if let Some(fields) = extensions.get::<FormattedFields<N>>()
                && !fields.is_empty()
            {
                write!(writer, " {}", fields.fields)?;
            }
        }

        writeln!(writer)
    }
}

struct FmtLevel<'a> {
    level: &'a Level,
    ansi: bool,
}

impl<'a> FmtLevel<'a> {
    fn new(level: &'a Level, ansi: bool) -> Self {
        Self { level, ansi }
    }

    fn label_and_color(&self) -> (&'static str, Color) {
        match *self.level {
            Level::TRACE => ("TRACE", Color::Purple),
            Level::DEBUG => ("DEBUG", Color::Blue),
            Level::INFO => (" INFO", Color::Green),
            Level::WARN => (" WARN", Color::Yellow),
            Level::ERROR => ("ERROR", Color::Red),
        }
    }
}

impl fmt::Display for FmtLevel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (label, color) = self.label_and_color();

        if self.ansi {
            write!(f, "{}", color.paint(label))
        } else {
            f.pad(label)
        }
    }
}
