use anyhow::{Context as _, Result};
use sha2::{Digest as _, Sha256};
use tcp_demux::{FinalizedFlow, PostProcessor, ProcessorOutput};

/// Hashes the reconstructed content of every flow.
#[derive(Debug, Default)]
pub struct Sha256Digest;

impl PostProcessor for Sha256Digest {
    fn name(&self) -> &'static str {
        "sha256"
    }

    fn process(&mut self, flow: &FinalizedFlow) -> Result<Option<ProcessorOutput>> {
        let Some(mut reader) = flow
            .open_reader()
            .with_context(|| format!("Failed to open output of stream {}", flow.record.id))?
        else {
            return Ok(None);
        };

        let mut hasher = Sha256::new();
        std::io::copy(&mut reader, &mut hasher)
            .with_context(|| format!("Failed to read output of stream {}", flow.record.id))?;

        Ok(Some(ProcessorOutput {
            name: self.name(),
            value: hex::encode(hasher.finalize()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ip_datagram::FlowKey;
    use std::net::Ipv4Addr;
    use tcp_demux::{Config, Demultiplexer, NoLock, RetireReason};

    fn finalized(config: Config) -> (tempfile::TempDir, FinalizedFlow) {
        let dir = tempfile::tempdir().unwrap();
        let mut demux = Demultiplexer::new(
            dir.path(),
            config,
            std::num::NonZeroUsize::MIN,
            Box::new(NoLock),
        );
        let key = FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1).into(),
            Ipv4Addr::new(10, 0, 0, 2).into(),
            1234,
            80,
        );

        demux.dispatch(
            Utc::now(),
            &ip_datagram::TcpSegment {
                key,
                seq: 1,
                flags: Default::default(),
                payload: b"abc",
            },
            None,
        );
        demux.purge(&key);

        let flow = demux.poll_finalized().unwrap();
        assert_eq!(flow.reason, RetireReason::Purge);

        (dir, flow)
    }

    #[test]
    fn hashes_content() {
        let (_dir, flow) = finalized(Config::default());

        let output = Sha256Digest.process(&flow).unwrap().unwrap();

        assert_eq!(output.name, "sha256");
        assert_eq!(
            output.value,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn skips_flows_without_output() {
        let (_dir, flow) = finalized(Config {
            output_enabled: false,
            ..Config::default()
        });

        assert_eq!(Sha256Digest.process(&flow).unwrap(), None);
    }
}
