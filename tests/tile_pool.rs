//! Tests for the tile slab pool and tile copy primitives

mod common;

use std::sync::Arc;
use tessera::error::Error;
use tessera::runtime::{CpuRuntime, Location};
use tessera::tile::{Tile, TilePool};

fn pool_with_devices(devices: usize, block_bytes: usize) -> Arc<TilePool<CpuRuntime>> {
    Arc::new(TilePool::new(
        Arc::new(CpuRuntime::with_devices(devices)),
        block_bytes,
    ))
}

#[test]
fn test_reserve_then_acquire() {
    let pool = pool_with_devices(0, 4 * 4 * 8);
    pool.reserve_host(3).unwrap();
    assert_eq!(pool.allocated(Location::Host), 3);
    assert_eq!(pool.available(Location::Host), 3);

    let a = pool.acquire(Location::Host).unwrap();
    let b = pool.acquire(Location::Host).unwrap();
    assert_ne!(a, b);
    assert_eq!(pool.available(Location::Host), 1);
    assert_eq!(pool.allocated(Location::Host), 3);

    pool.release(a, Location::Host);
    pool.release(b, Location::Host);
    assert_eq!(pool.available(Location::Host), 3);
}

#[test]
fn test_lazy_growth_and_reuse() {
    let pool = pool_with_devices(0, 64);

    // Empty free-list grows on demand.
    let a = pool.acquire(Location::Host).unwrap();
    assert_eq!(pool.allocated(Location::Host), 1);

    // A released block is handed back out, not a fresh one.
    pool.release(a, Location::Host);
    let b = pool.acquire(Location::Host).unwrap();
    assert_eq!(a, b);
    assert_eq!(pool.allocated(Location::Host), 1);
    pool.release(b, Location::Host);
}

#[test]
fn test_per_device_free_lists() {
    let pool = pool_with_devices(2, 128);
    pool.reserve_device(0, 2).unwrap();
    pool.reserve_device(1, 1).unwrap();

    assert_eq!(pool.available(Location::Device(0)), 2);
    assert_eq!(pool.available(Location::Device(1)), 1);

    let d1 = pool.acquire(Location::Device(1)).unwrap();
    assert_eq!(pool.available(Location::Device(1)), 0);
    assert_eq!(pool.available(Location::Device(0)), 2);
    pool.release(d1, Location::Device(1));

    assert!(matches!(
        pool.acquire(Location::Device(2)),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_concurrent_acquire_release() {
    let pool = pool_with_devices(0, 32);
    let handles: Vec<_> = (0..4)
        .map(|_| {
            let pool = pool.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let ptr = pool.acquire(Location::Host).unwrap();
                    pool.release(ptr, Location::Host);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    // Every block came back; at most one per thread was ever outstanding.
    assert_eq!(
        pool.available(Location::Host),
        pool.allocated(Location::Host)
    );
    assert!(pool.allocated(Location::Host) <= 4);
}

#[test]
fn test_tile_does_not_fit_pool_block() {
    let pool = pool_with_devices(0, 2 * 2 * 8);
    assert!(matches!(
        Tile::<f64, CpuRuntime>::new(4, 4, &pool),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_tile_copy_from_into_strided() {
    let pool = pool_with_devices(0, 3 * 3 * 8);
    let tile = Tile::<f64, CpuRuntime>::new(3, 2, &pool).unwrap();

    // 5-row parent array, tile reads a 3x2 window at stride 5.
    let a: Vec<f64> = (0..10).map(|k| k as f64).collect();
    tile.copy_from(&a, 5).unwrap();
    assert_eq!(tile.get(0, 0), 0.0);
    assert_eq!(tile.get(2, 0), 2.0);
    assert_eq!(tile.get(0, 1), 5.0);
    assert_eq!(tile.get(2, 1), 7.0);
    assert_eq!(tile.as_slice(), &[0.0, 1.0, 2.0, 5.0, 6.0, 7.0]);

    let mut out = vec![0.0; 10];
    tile.copy_into(&mut out, 5).unwrap();
    assert_eq!(&out[0..3], &a[0..3]);
    assert_eq!(&out[5..8], &a[5..8]);

    // Ill-formed strides are rejected.
    assert!(tile.copy_from(&a, 2).is_err());
    assert!(tile.copy_from(&a[0..4], 5).is_err());
}

#[test]
fn test_tile_release_on_drop() {
    let pool = pool_with_devices(0, 64);
    {
        let _tile = Tile::<f64, CpuRuntime>::new(2, 2, &pool).unwrap();
        assert_eq!(pool.available(Location::Host), 0);
        assert_eq!(pool.allocated(Location::Host), 1);
    }
    assert_eq!(pool.available(Location::Host), 1);
}

#[test]
fn test_origin_tile_keeps_caller_memory() {
    let pool = pool_with_devices(0, 64);
    let mut backing = vec![7.0f64; 8];
    {
        let tile = unsafe { Tile::<f64, CpuRuntime>::from_raw(2, 2, backing.as_mut_ptr(), 4, &pool) };
        assert!(tile.is_origin());
        assert_eq!(tile.stride(), 4);
        assert_eq!(tile.get(1, 1), 7.0);
    }
    // Dropping the origin tile freed nothing and touched no pool blocks.
    assert_eq!(pool.allocated(Location::Host), 0);
    assert_eq!(backing, vec![7.0f64; 8]);
}

#[test]
fn test_origin_tile_copy_compacts_stride() {
    let runtime = Arc::new(CpuRuntime::new());
    let pool = Arc::new(TilePool::new(runtime.clone(), 2 * 2 * 8));
    let stream = tessera::runtime::cpu::CpuStream::default();

    let mut backing = common::iota(4, 2); // 4x2 array, tile is its top 2x2
    let origin =
        unsafe { Tile::<f64, CpuRuntime>::from_raw(2, 2, backing.as_mut_ptr(), 4, &pool) };

    let copy = origin.copy_to(Location::Host, &stream, runtime.as_ref()).unwrap();
    assert_eq!(copy.stride(), 2);
    assert!(!copy.is_origin());
    assert_eq!(copy.as_slice(), &[1.0, 2.0, 5.0, 6.0]);
}
