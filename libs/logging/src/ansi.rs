use supports_color::Stream;

/// Whether stderr is a terminal that understands ANSI escape codes.
pub fn stderr_supports_ansi() -> bool {
    supports_color::on(Stream::Stderr).is_some()
}
