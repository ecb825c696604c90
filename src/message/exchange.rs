use super::comm::Communicator;
use crate::error::{Error, Result};
use crate::storage::AtomicF64;
use serde::{Deserialize, Serialize};

/// Describes which locally stored items (nodes, or entries of ghost rows)
/// are sent to and received from each peer rank. The index lists on both
/// ends of a connection must enumerate the same items in the same order.
///
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangePlan {
    /// Pairs of (peer rank, local indexes of owned items that peer reads).
    pub sends: Vec<(usize, Vec<usize>)>,
    /// Pairs of (peer rank, local indexes of ghost items that peer owns).
    pub receives: Vec<(usize, Vec<usize>)>,
}

impl ExchangePlan {
    pub fn is_empty(&self) -> bool {
        self.sends.is_empty() && self.receives.is_empty()
    }

    /// Send the owned items to the peers and overwrite the ghost items with
    /// what the peers send back. Each item consists of `n_components`
    /// consecutive values in `data`.
    ///
    pub fn exchange<C: Communicator>(
        &self,
        comm: &C,
        tag: u64,
        data: &[AtomicF64],
        n_components: usize,
    ) -> Result<()> {
        if n_components == 0 {
            return Ok(());
        }
        for (peer, indexes) in &self.sends {
            let payload: Vec<f64> = indexes
                .iter()
                .flat_map(|i| (0..n_components).map(move |k| data[i * n_components + k].load()))
                .collect();
            comm.send(*peer, tag, rmp_serde::to_vec(&payload)?);
        }
        for _ in 0..self.receives.len() {
            let (source, bytes) = comm.recv(tag);
            let payload: Vec<f64> = rmp_serde::decode::from_slice(&bytes)?;
            let indexes = self
                .receives
                .iter()
                .find(|(peer, _)| *peer == source)
                .map(|(_, indexes)| indexes)
                .ok_or_else(|| Error::Exchange(format!("unexpected message from rank {}", source)))?;

            if payload.len() != indexes.len() * n_components {
                return Err(Error::Exchange(format!(
                    "rank {} sent {} values, expected {}",
                    source,
                    payload.len(),
                    indexes.len() * n_components
                )));
            }
            for (i, values) in indexes.iter().zip(payload.chunks(n_components)) {
                for (k, value) in values.iter().enumerate() {
                    data[i * n_components + k].store(*value)
                }
            }
        }
        Ok(())
    }
}
