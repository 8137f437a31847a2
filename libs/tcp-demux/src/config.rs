use crate::template::FilenameTemplate;

/// Largest accepted distance between a segment and the next expected sequence number.
///
/// Roughly a thousand times a typical TCP window.
pub const DEFAULT_MAX_SEEK: u32 = 16 * 1024 * 1024;

/// Policy of a [`Demultiplexer`](crate::Demultiplexer).
#[derive(Debug, Clone)]
pub struct Config {
    /// Segments further than this from the next expected sequence number start a new connection instance.
    pub max_seek: u32,
    /// Payload beyond this many bytes of a flow is dropped.
    pub max_bytes_per_flow: Option<u64>,
    /// Retire a flow as soon as its FIN is seen.
    pub purge_on_fin: bool,
    /// Write output files; flows are still tracked and finalized without.
    pub output_enabled: bool,
    pub template: FilenameTemplate,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_seek: DEFAULT_MAX_SEEK,
            max_bytes_per_flow: None,
            purge_on_fin: true,
            output_enabled: true,
            template: FilenameTemplate::default(),
        }
    }
}
