use super::util;

/// Interface for a group of processes that can exchange tagged messages.
/// The underlying transport can in principle be TCP, in-process channels, or
/// a higher level abstraction like MPI.
///
pub trait Communicator: Sync {
    /// Must be implemented to return the rank of this process within the
    /// communicator.
    fn rank(&self) -> usize;

    /// Must be implemented to return the number of peers processes in this
    /// communicator.
    fn size(&self) -> usize;

    /// Must be implemented to send a tagged message to a peer. This method
    /// must return immediately, in other words it is not allowed to block
    /// until a matching receive is posted.
    fn send(&self, rank: usize, tag: u64, message: Vec<u8>);

    /// Must be implemented to receive a message with the given tag from any
    /// of the peers, returning the rank of the sender along with the
    /// message. Messages carrying other tags must be kept for later
    /// receives. This method is allowed to block until a matching message is
    /// ready.
    fn recv(&self, tag: u64) -> (usize, Vec<u8>);

    /// Implements a binomial tree broadcast from the root node. The message
    /// buffer must be `Some` if this is the root node, and it must be `None`
    /// otherwise.
    ///
    fn broadcast(&self, tag: u64, value: Option<Vec<u8>>) -> Vec<u8> {
        let r = self.rank();
        let p = self.size();

        let value = match value {
            Some(value) => value,
            None => self.recv(tag).1,
        };
        for level in (0..util::ceil_log2(p)).rev() {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 && r + one < p {
                self.send(r + one, tag, value.clone())
            }
        }
        value
    }

    /// Implements a binomial tree reduce. All ranks return `None` except for
    /// the root.
    ///
    fn reduce<F>(&self, tag: u64, f: F, mut value: Vec<u8>) -> Option<Vec<u8>>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        let r = self.rank();
        let p = self.size();

        for level in 0..util::ceil_log2(p) {
            let one = 1 << level;
            let two = 1 << (level + 1);

            if r % two == 0 {
                if r + one < p {
                    value = f(value, self.recv(tag).1)
                }
            } else {
                self.send(r - one, tag, value);
                return None;
            }
        }
        Some(value)
    }

    /// Implements an all-reduce (symmetric fold) operation over a commutative
    /// binary operator. Uses the given tag for the reduction and the next
    /// one for the broadcast.
    ///
    fn all_reduce<F>(&self, tag: u64, f: F, value: Vec<u8>) -> Vec<u8>
    where
        F: Fn(Vec<u8>, Vec<u8>) -> Vec<u8>,
    {
        self.broadcast(tag + 1, self.reduce(tag, f, value))
    }
}

/// Return the global minimum of the given value over all ranks.
///
pub fn all_reduce_min<C: Communicator>(comm: &C, tag: u64, value: f64) -> f64 {
    if comm.size() == 1 {
        return value;
    }
    let bytes = comm.all_reduce(
        tag,
        |a, b| {
            let (a, b) = (util::f64_from_bytes(&a), util::f64_from_bytes(&b));
            let min = if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.min(b)
            };
            min.to_le_bytes().to_vec()
        },
        value.to_le_bytes().to_vec(),
    );
    util::f64_from_bytes(&bytes)
}

/// Return true on all ranks if the given flag is set on any rank.
///
pub fn all_reduce_or<C: Communicator>(comm: &C, tag: u64, flag: bool) -> bool {
    if comm.size() == 1 {
        return flag;
    }
    let bytes = comm.all_reduce(
        tag,
        |a, b| vec![u8::from(util::bool_from_bytes(&a) || util::bool_from_bytes(&b))],
        vec![u8::from(flag)],
    );
    util::bool_from_bytes(&bytes)
}
