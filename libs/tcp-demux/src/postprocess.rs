use crate::finalize::FinalizedFlow;

/// Consumes finished flows, e.g. to hash or scan their content.
pub trait PostProcessor {
    /// Identifies the processor's results in reports.
    fn name(&self) -> &'static str;

    /// Processes a single flow.
    ///
    /// Called exactly once per flow after its output has been closed.
    fn process(&mut self, flow: &FinalizedFlow) -> anyhow::Result<Option<ProcessorOutput>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOutput {
    pub name: &'static str,
    pub value: String,
}

/// Runs all `processors` over `flow`.
///
/// A failing processor does not prevent the others from running.
pub fn run_all(
    processors: &mut [Box<dyn PostProcessor>],
    flow: &FinalizedFlow,
) -> Vec<ProcessorOutput> {
    processors
        .iter_mut()
        .filter_map(|processor| match processor.process(flow) {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(
                    processor = processor.name(),
                    stream = %flow.record.id,
                    "Post-processing failed: {e:#}"
                );

                None
            }
        })
        .collect()
}
