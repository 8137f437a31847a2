use std::error::Error;
use std::fmt;

/// Displays an error followed by each of its sources, separated by `: `.
///
/// Useful for one-line log messages of errors that don't go through [`anyhow`].
pub fn err_with_src<'a>(e: &'a (dyn Error + 'static)) -> ErrorWithSources<'a> {
    ErrorWithSources { e }
}

pub struct ErrorWithSources<'a> {
    e: &'a (dyn Error + 'static),
}

impl fmt::Display for ErrorWithSources<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sources = anyhow::Chain::new(self.e);

        if let Some(first) = sources.next() {
            write!(f, "{first}")?;
        }

        sources.try_for_each(|source| write!(f, ": {source}"))
    }
}
