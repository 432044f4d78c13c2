//! Transfer statistics.
//!
//! [`TransferReport`] is what the initiator hands back after a completed
//! transfer: send counters, every RTT sample taken, and the drop rate the
//! responder advertised.  Its `Display` impl renders the operator summary.

use std::collections::BTreeMap;
use std::fmt;

/// Summary statistics over a set of RTT samples, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttSummary {
    pub max: f64,
    pub min: f64,
    pub mean: f64,
    /// Sample standard deviation (n − 1 denominator); 0 for a single sample.
    pub std_dev: f64,
}

impl RttSummary {
    /// `None` for an empty sample set.
    pub fn from_samples(samples: &[f64]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        let n = samples.len() as f64;
        let max = samples.iter().copied().fold(f64::MIN, f64::max);
        let min = samples.iter().copied().fold(f64::MAX, f64::min);
        let mean = samples.iter().sum::<f64>() / n;
        let std_dev = if samples.len() > 1 {
            let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / (n - 1.0);
            var.sqrt()
        } else {
            0.0
        };
        Some(Self {
            max,
            min,
            mean,
            std_dev,
        })
    }
}

/// Final counters of one initiator transfer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferReport {
    pub target_packets: u16,
    /// Every DATA transmission, retransmissions included.
    pub total_sent: u64,
    /// First transmissions only.
    pub initial_sent: u64,
    pub retransmits: u64,
    /// RTT of every acknowledged packet, in milliseconds, in ack order.
    pub rtt_samples: Vec<f64>,
    /// Drop rate (0.0–1.0) advertised by the responder's CONFIG packet.
    pub advertised_drop_rate: Option<f64>,
    /// Retransmission count per sequence number.
    pub retransmitted: BTreeMap<u16, u32>,
}

impl TransferReport {
    /// Share of transmissions that were needed: `target / total_sent × 100`.
    pub fn receive_rate(&self) -> f64 {
        if self.total_sent == 0 {
            0.0
        } else {
            f64::from(self.target_packets) / self.total_sent as f64 * 100.0
        }
    }

    pub fn rtt(&self) -> Option<RttSummary> {
        RttSummary::from_samples(&self.rtt_samples)
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[summary]")?;
        match self.advertised_drop_rate {
            Some(rate) => writeln!(f, "simulated drop rate: {:.2}%", rate * 100.0)?,
            None => writeln!(f, "simulated drop rate: unknown (no CONFIG received)")?,
        }
        writeln!(f, "actual receive rate: {:.2}%", self.receive_rate())?;
        writeln!(f, "total packets sent:  {}", self.total_sent)?;
        writeln!(f, "initial packets:     {}", self.initial_sent)?;
        writeln!(f, "retransmissions:     {}", self.retransmits)?;
        match self.rtt() {
            Some(rtt) => {
                writeln!(f, "max RTT:             {:.2}ms", rtt.max)?;
                writeln!(f, "min RTT:             {:.2}ms", rtt.min)?;
                writeln!(f, "mean RTT:            {:.2}ms", rtt.mean)?;
                write!(f, "RTT std deviation:   {:.2}ms", rtt.std_dev)
            }
            None => write!(f, "no RTT samples collected"),
        }
    }
}
