//! Session membership and host election
//!
//! The host is a pure function of the present peer set and the sticky host
//! id, so every peer that has seen the same joins and leaves elects the same
//! host without exchanging messages.

use crate::{SyncError, SyncResult};
use std::collections::BTreeMap;
use tracing::debug;
use varsync_core::{Peer, PeerId};

/// Host identity before and after a roster change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostChange {
    /// Previous host, `None` before the first election
    pub old: Option<PeerId>,
    /// Current host, `None` once the roster is empty
    pub new: Option<PeerId>,
}

/// Outcome of removing a peer from the roster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// The peer that left
    pub peer: Peer,
    /// Host change caused by the departure
    pub host_change: Option<HostChange>,
    /// Whether the departing peer held the sticky host id
    pub sticky_cleared: bool,
}

/// Elect the host from a member set.
///
/// The sticky id wins while it names a present member; otherwise the
/// lexicographically smallest id does.
pub fn elect_host<'a>(
    members: impl Iterator<Item = &'a PeerId>,
    sticky: Option<&PeerId>,
) -> Option<PeerId> {
    let mut first: Option<&PeerId> = None;
    for id in members {
        if Some(id) == sticky {
            return Some(id.clone());
        }
        if first.map_or(true, |f| id < f) {
            first = Some(id);
        }
    }
    first.cloned()
}

/// Present peers plus the sticky host id.
#[derive(Debug, Default)]
pub struct Roster {
    peers: BTreeMap<PeerId, Peer>,
    sticky: Option<PeerId>,
    host: Option<PeerId>,
}

impl Roster {
    /// Create an empty roster
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a present peer
    pub fn add(&mut self, peer: Peer) -> SyncResult<Option<HostChange>> {
        if self.peers.contains_key(&peer.id) {
            return Err(SyncError::PeerAlreadyPresent { peer: peer.id });
        }
        debug!(peer = %peer.id, "Roster add");
        self.peers.insert(peer.id.clone(), peer);
        Ok(self.reelect())
    }

    /// Remove a departed peer, clearing the sticky id if it held it
    pub fn remove(&mut self, id: &PeerId) -> SyncResult<Departure> {
        let peer = self
            .peers
            .remove(id)
            .ok_or_else(|| SyncError::PeerNotPresent { peer: id.clone() })?;
        let sticky_cleared = self.sticky.as_ref() == Some(id);
        if sticky_cleared {
            self.sticky = None;
        }
        debug!(peer = %id, sticky_cleared, "Roster remove");
        Ok(Departure {
            peer,
            host_change: self.reelect(),
            sticky_cleared,
        })
    }

    /// Replace the sticky host id
    pub fn set_sticky(&mut self, sticky: Option<PeerId>) -> Option<HostChange> {
        self.sticky = sticky.filter(|id| !id.is_empty());
        self.reelect()
    }

    /// Current sticky host id
    pub fn sticky(&self) -> Option<&PeerId> {
        self.sticky.as_ref()
    }

    /// Current host
    pub fn host(&self) -> Option<&PeerId> {
        self.host.as_ref()
    }

    /// Whether `id` is present
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// Present peers in id order
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.values()
    }

    /// Present ids in order
    pub fn ids(&self) -> impl Iterator<Item = &PeerId> {
        self.peers.keys()
    }

    /// Number of present peers
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// True before the first join and after the last leave
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn reelect(&mut self) -> Option<HostChange> {
        let elected = elect_host(self.peers.keys(), self.sticky.as_ref());
        if elected == self.host {
            return None;
        }
        let old = std::mem::replace(&mut self.host, elected.clone());
        debug!(old = ?old, new = ?elected, "Host changed");
        Some(HostChange { old, new: elected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn peer(id: &str) -> Peer {
        Peer::new(id, "")
    }

    #[test]
    fn first_id_is_host_without_sticky() {
        let mut roster = Roster::new();
        let change = roster.add(peer("m")).unwrap();
        assert_eq!(
            change,
            Some(HostChange {
                old: None,
                new: Some(PeerId::from("m"))
            })
        );
        let change = roster.add(peer("c")).unwrap();
        assert_eq!(change.unwrap().new, Some(PeerId::from("c")));
        assert_eq!(roster.add(peer("x")).unwrap(), None);
    }

    #[test]
    fn sticky_overrides_order_while_present() {
        let mut roster = Roster::new();
        roster.add(peer("m")).unwrap();
        roster.set_sticky(Some(PeerId::from("m")));
        assert_eq!(roster.add(peer("a")).unwrap(), None);
        assert_eq!(roster.host(), Some(&PeerId::from("m")));

        let departure = roster.remove(&PeerId::from("m")).unwrap();
        assert!(departure.sticky_cleared);
        assert_eq!(roster.sticky(), None);
        assert_eq!(
            departure.host_change,
            Some(HostChange {
                old: Some(PeerId::from("m")),
                new: Some(PeerId::from("a"))
            })
        );
    }

    #[test]
    fn absent_sticky_falls_back_to_order() {
        let mut roster = Roster::new();
        roster.add(peer("b")).unwrap();
        roster.add(peer("c")).unwrap();
        assert_eq!(roster.set_sticky(Some(PeerId::from("zz"))), None);
        assert_eq!(roster.host(), Some(&PeerId::from("b")));
        roster.set_sticky(Some(PeerId::new("")));
        assert_eq!(roster.sticky(), None);
    }

    #[test]
    fn membership_errors() {
        let mut roster = Roster::new();
        roster.add(peer("a")).unwrap();
        assert_matches!(roster.add(peer("a")), Err(SyncError::PeerAlreadyPresent { .. }));
        assert_matches!(
            roster.remove(&PeerId::from("z")),
            Err(SyncError::PeerNotPresent { .. })
        );
        let departure = roster.remove(&PeerId::from("a")).unwrap();
        assert_eq!(departure.host_change.unwrap().new, None);
        assert!(roster.is_empty());
    }

    proptest! {
        #[test]
        fn election_ignores_arrival_order(
            ids in proptest::collection::btree_set("[a-f]{1,3}", 1..8),
            sticky_pick in any::<prop::sample::Index>(),
            use_sticky in any::<bool>(),
            seed in any::<u64>(),
        ) {
            let ids: Vec<String> = ids.into_iter().collect();
            let sticky = use_sticky.then(|| PeerId::from(sticky_pick.get(&ids).as_str()));

            let mut forward = Roster::new();
            for id in &ids {
                forward.add(peer(id)).unwrap();
            }
            forward.set_sticky(sticky.clone());

            let mut shuffled = ids.clone();
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();
            let mut other = Roster::new();
            other.set_sticky(sticky.clone());
            for id in &shuffled {
                other.add(peer(id)).unwrap();
            }

            prop_assert_eq!(forward.host(), other.host());
            let expected = sticky.unwrap_or_else(|| PeerId::from(ids[0].as_str()));
            prop_assert_eq!(forward.host(), Some(&expected));
        }

        #[test]
        fn exactly_one_host_while_non_empty(
            ids in proptest::collection::btree_set("[a-z]{1,4}", 1..10),
            removals in proptest::collection::vec(any::<prop::sample::Index>(), 0..10),
        ) {
            let mut roster = Roster::new();
            for id in &ids {
                roster.add(peer(id)).unwrap();
            }
            for pick in removals {
                if roster.is_empty() {
                    break;
                }
                let present: Vec<PeerId> = roster.ids().cloned().collect();
                roster.remove(pick.get(&present)).unwrap();
                let host = roster.host().cloned();
                prop_assert_eq!(host.is_some(), !roster.is_empty());
                if let Some(host) = host {
                    prop_assert!(roster.contains(&host));
                    prop_assert_eq!(Some(&host), roster.ids().next());
                }
            }
        }
    }
}
