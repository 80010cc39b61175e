//! Proptest generators for property-based testing.

use proptest::prelude::*;

use statefetch_core::PeerId;

/// How an outstanding request gets settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settle {
    Deliver,
    Drop,
    Timeout,
}

pub fn settle() -> impl Strategy<Value = Settle> {
    prop_oneof![Just(Settle::Deliver), Just(Settle::Drop), Just(Settle::Timeout)]
}

/// A table of outstanding requests and the order their events arrive in.
#[derive(Debug, Clone)]
pub struct DrainScript {
    /// Per request (peer `i + 1`): items asked for and how it settles.
    pub requests: Vec<(usize, Settle)>,
    /// Permutation of request indices giving event order.
    pub order: Vec<usize>,
    /// How many requests, taken from the front of `order`, already
    /// finished before the drain starts.
    pub finished: usize,
    /// Deliveries from peers that were never asked.
    pub stale: usize,
}

impl Arbitrary for DrainScript {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        prop::collection::vec((1usize..=16, settle()), 1..=12)
            .prop_flat_map(|requests| {
                let n = requests.len();
                let order = Just((0..n).collect::<Vec<_>>()).prop_shuffle();
                (Just(requests), order, 0..=n, 0usize..=3)
            })
            .prop_map(|(requests, order, finished, stale)| DrainScript {
                requests,
                order,
                finished,
                stale,
            })
            .boxed()
    }
}

impl DrainScript {
    /// Peer holding request `index`.
    pub fn peer(index: usize) -> PeerId {
        PeerId::from_bytes([index as u8 + 1; 32])
    }

    /// A peer no request was sent to.
    pub fn stranger(index: usize) -> PeerId {
        PeerId::from_bytes([200 + index as u8; 32])
    }

    pub fn peers(&self) -> Vec<PeerId> {
        (0..self.requests.len()).map(Self::peer).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_order_is_a_permutation(script: DrainScript) {
            let mut order = script.order.clone();
            order.sort();
            prop_assert_eq!(order, (0..script.requests.len()).collect::<Vec<_>>());
            prop_assert!(script.finished <= script.requests.len());
        }

        #[test]
        fn test_strangers_never_collide_with_peers(script: DrainScript, i in 0usize..4) {
            prop_assert!(!script.peers().contains(&DrainScript::stranger(i)));
        }
    }
}
