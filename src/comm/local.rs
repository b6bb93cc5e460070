//! In-process multi-rank communicator
//!
//! `LocalComm` runs an entire communicator world inside one process, one
//! endpoint per rank, usually one thread per rank. Transport is a table of
//! per-edge FIFO mailboxes under a single lock; receivers park on a condvar
//! until their edge has mail. Sub-communicators reuse the parent's mailbox
//! table, namespaced by a group id derived from the member list, and
//! renumber ranks by position exactly like an MPI group.

use super::Communicator;
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Tag reserved for broadcast traffic
const BCAST_TAG: u64 = u64::MAX;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
struct EdgeKey {
    comm: u64,
    src: usize,
    dst: usize,
    tag: u64,
}

struct WorldState {
    size: usize,
    mail: Mutex<HashMap<EdgeKey, VecDeque<Vec<u8>>>>,
    delivered: Condvar,
}

/// One rank's endpoint into an in-process communicator world
pub struct LocalComm {
    world: Arc<WorldState>,
    /// Rank within this communicator
    rank: usize,
    /// World ranks of the members; position = rank in this communicator
    members: Arc<Vec<usize>>,
    /// Namespace separating this communicator's traffic in the mailbox table
    comm_id: u64,
}

impl LocalComm {
    /// Create a world of `size` ranks; element `r` of the returned vector is
    /// rank `r`'s endpoint
    pub fn world(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "communicator world must have at least one rank");

        let state = Arc::new(WorldState {
            size,
            mail: Mutex::new(HashMap::new()),
            delivered: Condvar::new(),
        });
        let members = Arc::new((0..size).collect::<Vec<_>>());

        (0..size)
            .map(|rank| LocalComm {
                world: state.clone(),
                rank,
                members: members.clone(),
                comm_id: 0,
            })
            .collect()
    }

    fn world_rank(&self) -> usize {
        self.members[self.rank]
    }

    fn check_peer(&self, peer: usize, arg: &'static str) -> Result<()> {
        if peer >= self.members.len() {
            return Err(Error::InvalidArgument {
                arg,
                reason: format!("rank {} out of range (0..{})", peer, self.members.len()),
            });
        }
        Ok(())
    }

    fn push(&self, buf: &[u8], dest: usize, tag: u64) {
        let key = EdgeKey {
            comm: self.comm_id,
            src: self.world_rank(),
            dst: self.members[dest],
            tag,
        };
        let mut mail = self.world.mail.lock();
        mail.entry(key).or_default().push_back(buf.to_vec());
        self.world.delivered.notify_all();
    }

    fn pop(&self, buf: &mut [u8], src: usize, tag: u64) -> Result<()> {
        let key = EdgeKey {
            comm: self.comm_id,
            src: self.members[src],
            dst: self.world_rank(),
            tag,
        };
        let mut mail = self.world.mail.lock();
        loop {
            if let Some(msg) = mail.get_mut(&key).and_then(VecDeque::pop_front) {
                if msg.len() != buf.len() {
                    return Err(Error::Comm(format!(
                        "message length mismatch: expected {} bytes, got {}",
                        buf.len(),
                        msg.len()
                    )));
                }
                buf.copy_from_slice(&msg);
                return Ok(());
            }
            self.world.delivered.wait(&mut mail);
        }
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.members.len()
    }

    fn send(&self, buf: &[u8], dest: usize, tag: u64) -> Result<()> {
        self.check_peer(dest, "dest")?;
        self.push(buf, dest, tag);
        Ok(())
    }

    fn recv(&self, buf: &mut [u8], src: usize, tag: u64) -> Result<()> {
        self.check_peer(src, "src")?;
        self.pop(buf, src, tag)
    }

    fn broadcast(&self, buf: &mut [u8], root: usize) -> Result<()> {
        self.check_peer(root, "root")?;

        if self.rank == root {
            for dest in 0..self.members.len() {
                if dest != root {
                    self.push(buf, dest, BCAST_TAG);
                }
            }
            Ok(())
        } else {
            self.pop(buf, root, BCAST_TAG)
        }
    }

    fn group(&self, ranks: &[usize]) -> Result<Box<dyn Communicator>> {
        if ranks.is_empty() {
            return Err(Error::InvalidArgument {
                arg: "ranks",
                reason: "group must have at least one member".into(),
            });
        }
        if !ranks.windows(2).all(|w| w[0] < w[1]) {
            return Err(Error::InvalidArgument {
                arg: "ranks",
                reason: "group members must be strictly ascending".into(),
            });
        }
        for &r in ranks {
            self.check_peer(r, "ranks")?;
        }
        let Some(new_rank) = ranks.iter().position(|&r| r == self.rank) else {
            return Err(Error::InvalidArgument {
                arg: "ranks",
                reason: format!("rank {} is not a member of the group", self.rank),
            });
        };

        // World ranks of the group, and a namespace id every member derives
        // identically from them.
        let members: Vec<usize> = ranks.iter().map(|&r| self.members[r]).collect();
        let mut hasher = DefaultHasher::new();
        self.comm_id.hash(&mut hasher);
        members.hash(&mut hasher);
        let comm_id = hasher.finish() | 1; // never collides with the world's 0

        Ok(Box::new(LocalComm {
            world: self.world.clone(),
            rank: new_rank,
            members: Arc::new(members),
            comm_id,
        }))
    }
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.members.len())
            .field("world_size", &self.world.size)
            .finish()
    }
}
