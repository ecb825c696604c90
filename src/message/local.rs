use super::comm::Communicator;
use crossbeam_channel::{unbounded, Receiver, Sender};
use log::error;
use parking_lot::Mutex;

type Envelope = (usize, u64, Vec<u8>);

/// A communicator connecting a group of ranks living in the same process,
/// each typically driven by its own thread. Messages travel over unbounded
/// channels, so sends never block.
///
pub struct LocalCommunicator {
    rank: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    stash: Mutex<Vec<Envelope>>,
}

impl LocalCommunicator {
    /// Create a group of `size` connected communicators. The communicator at
    /// index `n` has rank `n`.
    ///
    pub fn group(size: usize) -> Vec<Self> {
        let (peers, inboxes): (Vec<_>, Vec<_>) = (0..size).map(|_| unbounded()).unzip();

        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalCommunicator {
                rank,
                peers: peers.clone(),
                inbox,
                stash: Mutex::new(Vec::new()),
            })
            .collect()
    }

    /// Create a communicator for a single rank.
    ///
    pub fn solo() -> Self {
        let (peer, inbox) = unbounded();
        LocalCommunicator {
            rank: 0,
            peers: vec![peer],
            inbox,
            stash: Mutex::new(Vec::new()),
        }
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&self, rank: usize, tag: u64, message: Vec<u8>) {
        if self.peers[rank].send((self.rank, tag, message)).is_err() {
            error!("rank {} hung up, dropping message with tag {}", rank, tag)
        }
    }

    fn recv(&self, tag: u64) -> (usize, Vec<u8>) {
        let mut stash = self.stash.lock();

        if let Some(index) = stash.iter().position(|(_, t, _)| *t == tag) {
            let (source, _, message) = stash.swap_remove(index);
            return (source, message);
        }
        loop {
            match self.inbox.recv() {
                Ok((source, t, message)) if t == tag => return (source, message),
                Ok(envelope) => stash.push(envelope),
                Err(_) => unreachable!("rank {} holds a sender to its own inbox", self.rank),
            }
        }
    }
}
