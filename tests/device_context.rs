//! Per-device context tests: streams, batch pointer arrays, capacity

mod common;

use common::single_rank;
use std::sync::Arc;
use tessera::error::Error;
use tessera::matrix::{Matrix, ProcessGrid, StorageShape};
use tessera::runtime::{CpuRuntime, Location, Runtime};

fn matrix_on_devices(devices: usize) -> Matrix<f64, CpuRuntime> {
    Matrix::random(
        8,
        8,
        2,
        StorageShape::Full,
        ProcessGrid::new(1, 1).unwrap(),
        Arc::new(CpuRuntime::with_devices(devices)),
        single_rank(),
    )
    .unwrap()
}

#[test]
fn test_context_capacity_matches_local_tiles() {
    let a = matrix_on_devices(2);

    for d in 0..2 {
        let ctx = a.context(d).unwrap();
        assert_eq!(ctx.device(), d);
        assert_eq!(ctx.capacity(), a.max_local_tiles(Location::Device(d)));
    }

    assert!(matches!(
        a.context(2),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_stage_batch_uploads_pointer_arrays() {
    let a = matrix_on_devices(1);
    let ctx = a.context(0).unwrap();
    let n = ctx.capacity().min(3);
    assert!(n > 0);

    // Stage the device addresses of a few tiles, the way a batched kernel
    // launch would.
    let mut ptrs = Vec::new();
    for j in 0..n {
        a.copy_to_device(0, j, 0).unwrap();
        ptrs.push(a.tile_at(0, j, Location::Device(0)).unwrap().data_ptr());
    }
    ctx.stage_batch(&ptrs, &ptrs, &ptrs).unwrap();
    ctx.sync_compute().unwrap();

    // Read the device-side mirror back and compare.
    let (a_dev, _, _) = ctx.device_arrays();
    let runtime = a.runtime();
    let mut back = vec![0u64; n];
    runtime
        .copy_to_host(
            a_dev,
            back.as_mut_ptr() as u64,
            n * std::mem::size_of::<u64>(),
            0,
            ctx.comm_stream(),
        )
        .unwrap();
    runtime.sync_stream(ctx.comm_stream()).unwrap();
    assert_eq!(back, ptrs);
}

#[test]
fn test_stage_batch_validates_lengths() {
    let a = matrix_on_devices(1);
    let ctx = a.context(0).unwrap();

    let over = vec![0u64; ctx.capacity() + 1];
    assert!(matches!(
        ctx.stage_batch(&over, &over, &over),
        Err(Error::InvalidArgument { .. })
    ));

    let two = vec![0u64; 2.min(ctx.capacity())];
    let three = vec![0u64; 3.min(ctx.capacity())];
    assert!(matches!(
        ctx.stage_batch(&two, &three, &two),
        Err(Error::InvalidArgument { .. })
    ));

    // The empty batch is a no-op.
    ctx.stage_batch(&[], &[], &[]).unwrap();
}

#[test]
fn test_streams_are_distinct_per_concern() {
    let a = matrix_on_devices(1);
    let ctx = a.context(0).unwrap();

    // Compute and communication streams are separate objects; synchronizing
    // one must not require the other.
    let c1: *const _ = ctx.compute_stream();
    let c2: *const _ = ctx.comm_stream();
    assert_ne!(c1 as usize, c2 as usize);
    ctx.sync_comm().unwrap();
    ctx.sync_compute().unwrap();
}
