//! Single-rank matrix tests: construction, views, motion, local access

mod common;

use common::{identity, single_rank};
use std::sync::Arc;
use tessera::error::Error;
use tessera::matrix::{Matrix, ProcessGrid, StorageShape};
use tessera::runtime::{CpuRuntime, Location};
use tessera::scalar::Scalar;

fn grid1() -> ProcessGrid {
    ProcessGrid::new(1, 1).unwrap()
}

#[test]
fn test_identity_tiling() {
    // 8x8 identity in 2-tiles on one rank with no devices.
    let a = Matrix::<f64, CpuRuntime>::from_host_data(
        8,
        8,
        &identity(8),
        8,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    )
    .unwrap();

    assert_eq!(a.mt(), 4);
    assert_eq!(a.nt(), 4);

    for i in 0..4 {
        for j in 0..4 {
            let tile = a.tile(i, j).unwrap();
            if i == j {
                assert_eq!(tile.as_slice(), &[1.0, 0.0, 0.0, 1.0]);
            } else {
                assert_eq!(tile.as_slice(), &[0.0; 4]);
            }
        }
    }

    // Without devices, device motion is a no-op and no device copy appears.
    a.copy_to_device(0, 0, 0).unwrap();
    assert_eq!(a.registry().locations_of(0, 0), vec![Location::Host]);
    assert!(matches!(
        a.tile_at(0, 0, Location::Device(0)),
        Err(Error::NotResident { .. })
    ));

    // Out-of-range tile indices are caller bugs.
    assert!(matches!(
        a.tile(4, 0),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_uneven_edge_tiles() {
    // 5x7 in 3-tiles: mt=2 (3+2), nt=3 (3+3+1).
    let a = Matrix::<f64, CpuRuntime>::random(
        5,
        7,
        3,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    )
    .unwrap();

    assert_eq!((a.mt(), a.nt()), (2, 3));
    assert_eq!(a.row_height(1), 2);
    assert_eq!(a.col_width(2), 1);

    let edge = a.tile(1, 2).unwrap();
    assert_eq!((edge.mb(), edge.nb()), (2, 1));
}

#[test]
fn test_copy_move_symmetry_on_devices() {
    // Two emulated devices; copy out and back must be bit-exact and leave
    // exactly the host entry.
    let a = Matrix::<f64, CpuRuntime>::random(
        4,
        4,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::with_devices(2)),
        single_rank(),
    )
    .unwrap();

    let before = a.tile(0, 0).unwrap().pack().unwrap();

    a.copy_to_device(0, 0, 1).unwrap();
    assert_eq!(
        a.registry().locations_of(0, 0),
        vec![Location::Host, Location::Device(1)]
    );

    a.move_to_host(0, 0, 1).unwrap();
    assert_eq!(a.registry().locations_of(0, 0), vec![Location::Host]);
    assert_eq!(a.tile(0, 0).unwrap().pack().unwrap(), before);
}

#[test]
fn test_move_roundtrip_through_device() {
    let a = Matrix::<f64, CpuRuntime>::random(
        4,
        4,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::with_devices(2)),
        single_rank(),
    )
    .unwrap();

    let before = a.tile(1, 0).unwrap().pack().unwrap();

    a.move_to_device(1, 0, 0).unwrap();
    assert_eq!(
        a.registry().locations_of(1, 0),
        vec![Location::Device(0)]
    );
    assert!(matches!(a.tile(1, 0), Err(Error::NotResident { .. })));

    a.move_to_host(1, 0, 0).unwrap();
    assert_eq!(a.registry().locations_of(1, 0), vec![Location::Host]);
    assert_eq!(a.tile(1, 0).unwrap().pack().unwrap(), before);

    // Both motions are idempotent once settled.
    a.move_to_host(1, 0, 0).unwrap();
    assert_eq!(a.registry().locations_of(1, 0), vec![Location::Host]);
}

#[test]
fn test_erase_is_idempotent() {
    let a = Matrix::<f64, CpuRuntime>::random(
        4,
        4,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    )
    .unwrap();

    a.erase(0, 1, Location::Host).unwrap();
    assert!(matches!(a.tile(0, 1), Err(Error::NotResident { .. })));
    a.erase(0, 1, Location::Host).unwrap();
}

#[test]
fn test_submatrix_shares_registry() {
    let a = Matrix::<f64, CpuRuntime>::random(
        6,
        6,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    )
    .unwrap();

    let v = a.submatrix(1, 2, 1, 2).unwrap();
    assert_eq!((v.mt(), v.nt()), (2, 2));
    assert_eq!((v.it(), v.jt()), (1, 1));

    // The view's (0, 0) is the parent's (1, 1), the very same tile copy.
    let from_view = v.tile(0, 0).unwrap();
    let from_parent = a.tile(1, 1).unwrap();
    assert!(Arc::ptr_eq(&from_view, &from_parent));

    // Nested views compose offsets.
    let vv = v.submatrix(1, 1, 0, 1).unwrap();
    assert!(Arc::ptr_eq(
        &vv.tile(0, 1).unwrap(),
        &a.tile(2, 2).unwrap()
    ));

    assert!(matches!(
        a.submatrix(2, 1, 0, 0),
        Err(Error::InvalidArgument { .. })
    ));
    assert!(matches!(
        a.submatrix(0, 3, 0, 0),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_insert_through_view_lands_in_parent() {
    let a = Matrix::<f64, CpuRuntime>::new(
        6,
        6,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    )
    .unwrap();
    assert!(a.registry().is_empty());

    let v = a.submatrix(1, 2, 1, 2).unwrap();
    v.insert_local_tiles().unwrap();

    // Exactly the view's 2x2 block exists, observable from the parent at
    // offset coordinates.
    assert_eq!(a.registry().len(), 4);
    assert!(a.tile(1, 1).is_ok());
    assert!(a.tile(2, 2).is_ok());
    assert!(matches!(a.tile(0, 0), Err(Error::NotResident { .. })));
}

#[test]
fn test_max_local_tiles_by_shape() {
    let full = Matrix::<f64, CpuRuntime>::new(
        8,
        8,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::with_devices(2)),
        single_rank(),
    )
    .unwrap();
    assert_eq!(full.max_local_tiles(Location::Host), 16);

    let lower = Matrix::<f64, CpuRuntime>::new(
        8,
        8,
        2,
        StorageShape::Lower,
        grid1(),
        Arc::new(CpuRuntime::with_devices(2)),
        single_rank(),
    )
    .unwrap();
    assert_eq!(lower.max_local_tiles(Location::Host), 10);

    // Device counts partition the host count.
    let by_device: usize = (0..2)
        .map(|d| lower.max_local_tiles(Location::Device(d)))
        .sum();
    assert_eq!(by_device, 10);
}

#[test]
fn test_random_fill_is_diagonally_dominant() {
    let a = Matrix::<f64, CpuRuntime>::random(
        8,
        8,
        2,
        StorageShape::Lower,
        grid1(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    )
    .unwrap();

    // Off-diagonal entries are uniform in [0, 1); diagonal entries carry
    // the nb * nt bump, so dominance is strict.
    for k in 0..4 {
        let tile = a.tile(k, k).unwrap();
        assert!(tile.get(0, 0).re() > a.nb() as f64);
        assert!(tile.get(1, 1).re() > a.nb() as f64);
        assert!(tile.get(0, 1).re() < 1.0);
    }

    // Upper-triangle tiles are not stored.
    assert!(matches!(a.tile(0, 3), Err(Error::NotResident { .. })));

    // Refilling reproduces the same values.
    let before = a.tile(2, 1).unwrap().pack().unwrap();
    a.fill_random().unwrap();
    assert_eq!(a.tile(2, 1).unwrap().pack().unwrap(), before);
}

#[test]
fn test_copy_into_host_roundtrip() {
    let m = 6;
    let src: Vec<f64> = common::iota(m, m);
    let a = Matrix::<f64, CpuRuntime>::from_host_data(
        m,
        m,
        &src,
        m,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    )
    .unwrap();

    let mut out = vec![0.0; m * m];
    a.copy_into_host(&mut out, m).unwrap();
    assert_eq!(out, src);
}

#[test]
fn test_attach_host_tiles_borrows_caller_memory() {
    let m = 4;
    let mut backing = common::iota(m, m);
    let a = Matrix::<f64, CpuRuntime>::new(
        m,
        m,
        2,
        StorageShape::Full,
        grid1(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    )
    .unwrap();

    unsafe { a.attach_host_tiles(backing.as_mut_ptr(), m).unwrap() };

    let tile = a.tile(1, 1).unwrap();
    assert!(tile.is_origin());
    assert_eq!(tile.stride(), m);
    // Bottom-right 2x2 block of the column-major iota array.
    assert_eq!(tile.get(0, 0), 11.0);
    assert_eq!(tile.get(1, 1), 16.0);

    // Teardown must leave the caller's memory intact.
    drop(a);
    assert_eq!(backing, common::iota(m, m));
}

#[test]
fn test_grid_must_match_communicator() {
    let result = Matrix::<f64, CpuRuntime>::new(
        8,
        8,
        2,
        StorageShape::Full,
        ProcessGrid::new(2, 2).unwrap(),
        Arc::new(CpuRuntime::new()),
        single_rank(),
    );
    assert!(matches!(result, Err(Error::InvalidArgument { .. })));
}
