//! # sfxkit-core
//!
//! Core data model, file I/O, and MPI plumbing for `sfxkit`.
#![warn(clippy::perf, clippy::style)]

use thiserror::Error;

/// MPI backend for `sfxkit`
///
/// Message Passing Interface (MPI) is a protocol which enables communication between multiple
/// CPUs in a high-performance computing environment. While [`rayon`] can parallelize tasks on a
/// single CPU, MPI can also parallelize tasks on multiple CPUs by running independent
/// processes on all CPUs at once (tasks) which are assigned ids (ranks) which tell each
/// process what to do and where to send results. The evaluation tools use this backend to
/// fan log parsing and per-image work out over the ranks of a batch job, and the simulation
/// orchestrator uses it to ship shared per-channel inputs to every rank.
///
/// To use this backend, the library must be built with the `mpi` feature, which requires an
/// existing implementation of MPI like OpenMPI or MPICH. All processing code should be
/// sandwiched between calls to [`use_mpi`](`mpi::use_mpi`) and
/// [`finalize_mpi`](`mpi::finalize_mpi`):
/// ```ignore
/// fn main() {
///     sfxkit_core::mpi::use_mpi(true);
///     // sfxkit analysis code here
///     sfxkit_core::mpi::finalize_mpi();
/// }
/// ```
///
/// [`finalize_mpi`](`mpi::finalize_mpi`) must be called to trigger all the methods which clean
/// up the MPI environment. While these are called by default when the
/// [`Universe`](`mpi::environment::Universe`) is dropped, `sfxkit` uses a static `Universe`
/// that can be accessed by all of the methods that need it, rather than passing the context to
/// each method, so the `Universe` is not automatically dropped at the end of the program.
///
/// # Chunked collectives
///
/// Collective calls in MPI implementations carry a signed 32-bit element count, so a single
/// broadcast or gather of a serialized mapping fails once the payload reaches 2³¹ bytes. The
/// per-channel structure-factor maps shipped to the simulation ranks routinely do. The
/// [`broadcast_map_chunked`](`mpi::broadcast_map_chunked`) and
/// [`gather_map_chunked`](`mpi::gather_map_chunked`) helpers work around the ceiling by moving
/// one keyed value per call and reassembling an equivalent mapping on the receiving side(s).
pub mod mpi {
    use std::ops::Range;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::OnceLock;

    use indexmap::IndexMap;
    use lazy_static::lazy_static;
    #[cfg(feature = "mpi")]
    use mpi::{
        environment::Universe,
        topology::SimpleCommunicator,
        traits::{Communicator, CommunicatorCollectives, Destination, Root, Source},
    };
    use parking_lot::RwLock;
    use serde::{de::DeserializeOwned, Serialize};

    use crate::{SfxError, SfxResult};

    lazy_static! {
        static ref USE_MPI: AtomicBool = AtomicBool::new(false);
    }

    pub struct MPIState {
        pub size: usize,
        pub rank: usize,
        #[cfg(feature = "mpi")]
        pub universe: Universe,
    }

    static MPI_STATE: OnceLock<RwLock<Option<MPIState>>> = OnceLock::new();

    /// The default root rank for MPI processes
    pub const ROOT_RANK: usize = 0;

    /// The largest payload a single collective call may carry (a signed 32-bit element count).
    pub const COLLECTIVE_BYTE_CEILING: u64 = i32::MAX as u64;

    /// Check if the current MPI process is the root process
    pub fn is_root() -> bool {
        rank() == ROOT_RANK
    }

    /// Shortcut method to just get the global MPI communicator without accessing `size` and
    /// `rank` directly
    #[cfg(feature = "mpi")]
    pub fn world() -> Option<SimpleCommunicator> {
        if let Some(mpi_state_lock) = MPI_STATE.get() {
            if let Some(mpi_state) = &*mpi_state_lock.read() {
                return Some(mpi_state.universe.world());
            }
        }
        None
    }

    /// Get the rank of the current process
    pub fn rank() -> usize {
        if let Some(mpi_state_lock) = MPI_STATE.get() {
            if let Some(mpi_state) = &*mpi_state_lock.read() {
                return mpi_state.rank;
            }
        }
        ROOT_RANK
    }

    /// Get number of available processes/ranks
    pub fn size() -> usize {
        if let Some(mpi_state_lock) = MPI_STATE.get() {
            if let Some(mpi_state) = &*mpi_state_lock.read() {
                return mpi_state.size;
            }
        }
        1
    }

    /// Use the MPI backend
    ///
    /// # Notes
    ///
    /// You must have MPI installed for this to work, and you must call the program with
    /// `mpirun <executable>` (or the scheduler's `srun`), or bad things will happen.
    ///
    /// MPI runs an identical program on each process, but gives the program an ID called its
    /// "rank". Only the results of methods on the root process (rank 0) should be considered
    /// valid, as other processes only hold portions of the input. To ensure you don't save or
    /// print data at other ranks, use the provided [`is_root()`] method to check if the
    /// process is the root process.
    ///
    /// This must be called at the beginning of a program, before any other `sfxkit` functions.
    /// Subsequent calls have no effect.
    ///
    /// <div class="warning">
    ///
    /// You **must** call [`finalize_mpi()`] before your program exits for MPI to terminate
    /// smoothly.
    ///
    /// </div>
    pub fn use_mpi(trigger: bool) {
        if trigger {
            USE_MPI.store(true, Ordering::SeqCst);
            MPI_STATE.get_or_init(|| {
                #[cfg(feature = "mpi")]
                {
                    #[cfg(feature = "rayon")]
                    let threading = mpi::Threading::Funneled;
                    #[cfg(not(feature = "rayon"))]
                    let threading = mpi::Threading::Single;
                    let (universe, _threading) =
                        mpi::initialize_with_threading(threading).unwrap();
                    let world = universe.world();
                    RwLock::new(Some(MPIState {
                        size: world.size() as usize,
                        rank: world.rank() as usize,
                        universe,
                    }))
                }
                #[cfg(not(feature = "mpi"))]
                {
                    RwLock::new(Some(MPIState {
                        size: 1,
                        rank: ROOT_RANK,
                    }))
                }
            });
        }
    }

    /// Drop the MPI universe and finalize MPI at the end of a program
    ///
    /// This function will do nothing if MPI is not initialized.
    pub fn finalize_mpi() {
        if using_mpi() {
            let mut mpi_state = MPI_STATE.get().unwrap().write();
            *mpi_state = None;
        }
    }

    /// Check if MPI backend is enabled
    pub fn using_mpi() -> bool {
        USE_MPI.load(Ordering::SeqCst)
    }

    /// Wait for every rank to reach this point (no-op on a single rank)
    pub fn barrier() {
        #[cfg(feature = "mpi")]
        if let Some(world) = world() {
            world.barrier();
        }
    }

    /// The round-robin slice of `0..total` owned by this rank
    ///
    /// This is the conventional per-image partition of a batch job: rank `r` of `s` takes
    /// items `r, r + s, r + 2s, ...`.
    pub fn stride_indices(total: usize) -> impl Iterator<Item = usize> {
        stride_indices_for(rank(), size(), total)
    }

    pub(crate) fn stride_indices_for(
        rank: usize,
        size: usize,
        total: usize,
    ) -> impl Iterator<Item = usize> {
        (rank..total).step_by(size.max(1))
    }

    /// The contiguous near-equal slice of `0..total` owned by this rank
    pub fn block_range(total: usize) -> Range<usize> {
        block_range_for(rank(), size(), total)
    }

    pub(crate) fn block_range_for(rank: usize, size: usize, total: usize) -> Range<usize> {
        let base = total / size;
        let rem = total % size;
        let (start, count) = if rank < rem {
            (rank * (base + 1), base + 1)
        } else {
            (rem * (base + 1) + (rank - rem) * base, base)
        };
        start..start + count
    }

    /// Per-rank element counts and displacements for varcount collectives over `total` items
    /// of `stride` elements each
    pub fn counts_displs(size: usize, total: usize, stride: usize) -> (Vec<i32>, Vec<i32>) {
        let base = total / size;
        let rem = total % size;
        let mut counts = vec![0i32; size];
        let mut displs = vec![0i32; size];
        for i in 0..size {
            let n = if i < rem { base + 1 } else { base };
            counts[i] = (n * stride) as i32;
            displs[i] = if i == 0 {
                0
            } else {
                displs[i - 1] + counts[i - 1]
            };
        }
        (counts, displs)
    }

    fn encode<T: Serialize>(value: &T) -> SfxResult<Vec<u8>> {
        let bytes = bincode::serialize(value)?;
        if bytes.len() as u64 > COLLECTIVE_BYTE_CEILING {
            return Err(SfxError::MessageSizeError {
                bytes: bytes.len() as u64,
            });
        }
        Ok(bytes)
    }

    /// Broadcast the length of a byte buffer, then the buffer itself. The root passes
    /// `Some(bytes)`, every other rank `None`.
    #[cfg(feature = "mpi")]
    fn broadcast_bytes(
        world: &SimpleCommunicator,
        bytes: Option<&[u8]>,
        root: usize,
    ) -> SfxResult<Vec<u8>> {
        let root_process = world.process_at_rank(root as i32);
        let mut len = bytes.map(|b| b.len() as u64).unwrap_or(0);
        root_process.broadcast_into(&mut len);
        if len > COLLECTIVE_BYTE_CEILING {
            return Err(SfxError::MessageSizeError { bytes: len });
        }
        let mut buffer = match bytes {
            Some(b) => b.to_vec(),
            None => vec![0u8; len as usize],
        };
        root_process.broadcast_into(&mut buffer[..]);
        Ok(buffer)
    }

    /// Broadcast a keyed mapping from `root` to every rank one value per collective call
    ///
    /// The ordered key list travels first, then each value in its own broadcast, so no single
    /// call exceeds [`COLLECTIVE_BYTE_CEILING`] as long as each individual value fits. Every
    /// rank returns a mapping equal to the one passed in at `root` (keys in the same order).
    /// A single value larger than the ceiling is an error. On a single rank (or without the
    /// `mpi` feature) the input map is returned unchanged.
    pub fn broadcast_map_chunked<K, V>(
        map: IndexMap<K, V>,
        root: usize,
    ) -> SfxResult<IndexMap<K, V>>
    where
        K: Serialize + DeserializeOwned + std::hash::Hash + Eq,
        V: Serialize + DeserializeOwned,
    {
        #[cfg(feature = "mpi")]
        if let Some(world) = world() {
            if world.size() <= 1 {
                return Ok(map);
            }
            let at_root = world.rank() as usize == root;
            let keys: Vec<&K> = map.keys().collect();
            let key_bytes = if at_root {
                Some(encode(&keys)?)
            } else {
                None
            };
            let key_bytes = broadcast_bytes(&world, key_bytes.as_deref(), root)?;
            let keys: Vec<K> = bincode::deserialize(&key_bytes)?;
            let mut received = IndexMap::with_capacity(keys.len());
            for key in keys {
                let value_bytes = if at_root {
                    let value = map.get(&key).ok_or_else(|| SfxError::Custom(
                        "broadcast key list out of sync with local map".to_string(),
                    ))?;
                    Some(encode(value)?)
                } else {
                    None
                };
                let value_bytes = broadcast_bytes(&world, value_bytes.as_deref(), root)?;
                received.insert(key, bincode::deserialize(&value_bytes)?);
            }
            return Ok(received);
        }
        Ok(map)
    }

    /// Gather keyed mappings from every rank onto `root` one value per message
    ///
    /// Each rank first ships its ordered key list to `root`, then each value in its own
    /// point-to-point send, avoiding any bulk call that could exceed
    /// [`COLLECTIVE_BYTE_CEILING`]. The root returns the union mapping with entries inserted
    /// in rank order (a key owned by two ranks resolves to the higher rank); other ranks
    /// return an empty map. On a single rank (or without the `mpi` feature) the input map is
    /// returned unchanged.
    pub fn gather_map_chunked<K, V>(
        map: IndexMap<K, V>,
        root: usize,
    ) -> SfxResult<IndexMap<K, V>>
    where
        K: Serialize + DeserializeOwned + std::hash::Hash + Eq,
        V: Serialize + DeserializeOwned,
    {
        #[cfg(feature = "mpi")]
        if let Some(world) = world() {
            if world.size() <= 1 {
                return Ok(map);
            }
            let me = world.rank() as usize;
            if me == root {
                let mut received = IndexMap::new();
                for source in 0..world.size() as usize {
                    if source == me {
                        for (key, value) in &map {
                            received.insert(encode(key)?, encode(value)?);
                        }
                        continue;
                    }
                    let process = world.process_at_rank(source as i32);
                    let (key_bytes, _status) = process.receive_vec::<u8>();
                    let keys: Vec<Vec<u8>> = bincode::deserialize(&key_bytes)?;
                    for key in keys {
                        let (value_bytes, _status) = process.receive_vec::<u8>();
                        received.insert(key, value_bytes);
                    }
                }
                let mut out = IndexMap::with_capacity(received.len());
                for (key_bytes, value_bytes) in received {
                    out.insert(
                        bincode::deserialize(&key_bytes)?,
                        bincode::deserialize(&value_bytes)?,
                    );
                }
                return Ok(out);
            }
            let process = world.process_at_rank(root as i32);
            let encoded_keys = map
                .keys()
                .map(encode)
                .collect::<SfxResult<Vec<Vec<u8>>>>()?;
            process.send(&encode(&encoded_keys)?[..]);
            for value in map.values() {
                process.send(&encode(value)?[..]);
            }
            return Ok(IndexMap::new());
        }
        Ok(map)
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_stride_indices_cover_all_items_exactly_once() {
            let total = 17;
            let size = 5;
            let mut seen = vec![0usize; total];
            for rank in 0..size {
                for i in stride_indices_for(rank, size, total) {
                    seen[i] += 1;
                }
            }
            assert!(seen.iter().all(|&n| n == 1));
        }

        #[test]
        fn test_block_ranges_are_contiguous_and_near_equal() {
            let total = 23;
            let size = 4;
            let mut next = 0;
            for rank in 0..size {
                let range = block_range_for(rank, size, total);
                assert_eq!(range.start, next);
                let count = range.len();
                assert!(count == 5 || count == 6);
                next = range.end;
            }
            assert_eq!(next, total);
        }

        #[test]
        fn test_block_range_with_more_ranks_than_items() {
            assert_eq!(block_range_for(0, 8, 3), 0..1);
            assert_eq!(block_range_for(2, 8, 3), 2..3);
            assert_eq!(block_range_for(5, 8, 3).len(), 0);
        }

        #[test]
        fn test_counts_displs_partition_the_buffer() {
            let (counts, displs) = counts_displs(3, 10, 2);
            assert_eq!(counts, vec![8, 6, 6]);
            assert_eq!(displs, vec![0, 8, 14]);
            assert_eq!(
                counts.iter().sum::<i32>(),
                20,
                "counts must cover total * stride"
            );
        }

        #[test]
        fn test_chunked_collectives_are_identity_on_a_single_rank() {
            let mut map = IndexMap::new();
            map.insert("channel_0".to_string(), vec![1.0, 2.0, 3.0]);
            map.insert("channel_1".to_string(), vec![4.0]);
            let broadcast = broadcast_map_chunked(map.clone(), ROOT_RANK).unwrap();
            assert_eq!(broadcast, map);
            let gathered = gather_map_chunked(map.clone(), ROOT_RANK).unwrap();
            assert_eq!(gathered, map);
        }

        #[test]
        fn test_encode_rejects_nothing_reasonable() {
            assert!(encode(&vec![0u8; 1024]).is_ok());
        }
    }
}

/// Reflection-set resolution binning.
pub mod binning;
/// Unit cells, orientation matrices, and d-spacing math.
pub mod cell;
/// Reflection data structures and Parquet I/O.
pub mod data;
/// Utility functions shared by the evaluation tools.
pub mod utils;

pub use crate::binning::ResolutionBinner;
pub use crate::cell::{Orientation, UnitCell};
pub use crate::data::{MillerIndex, Reflection, ReflectionSet};

pub type SfxResult<T> = Result<T, SfxError>;

/// The error type used by all `sfxkit` internal methods
#[derive(Error, Debug)]
pub enum SfxError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`parquet::errors::ParquetError`].
    #[error("Parquet Error: {0}")]
    ParquetError(#[from] parquet::errors::ParquetError),
    /// An alias for [`arrow::error::ArrowError`].
    #[error("Arrow Error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An error returned by the binary (de)serializer used for caches and MPI payloads.
    #[error("Serialization error: {0}")]
    BincodeError(#[from] bincode::Error),
    /// An error which occurs when the user tries to parse an invalid string of text,
    /// typically into an enum variant or a log record.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// An error which occurs when a reflection table lacks a required column.
    #[error("Reflection table is missing required column \"{name}\"!")]
    ColumnError {
        /// Name of the missing column
        name: String,
    },
    /// An error which occurs when a single serialized value exceeds what one collective call
    /// can carry.
    #[error("Serialized value of {bytes} bytes exceeds the per-call collective ceiling")]
    MessageSizeError {
        /// Size of the offending payload
        bytes: u64,
    },
    /// A custom fallback error for errors too complex or too infrequent to warrant their own
    /// error category.
    #[error("{0}")]
    Custom(String),
}
